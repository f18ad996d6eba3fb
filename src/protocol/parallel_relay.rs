//! A multi-server relay party: like [`crate::protocol::relay::Relay`] but
//! shared across `server_count > 1` sibling servers, which shuffle ciphers,
//! queries, and responses among themselves before the local shuffle runs.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;
use crate::containers::{Batch, CipherBatch};
use crate::database::Database;
use crate::error::Result;
use crate::noise::{self, NoiseDistribution};
use crate::onion;
use crate::protocol::TagSampling;
use crate::sharing::{additive, incremental};
use crate::shuffle::local::LocalShuffler;
use crate::shuffle::parallel::ParallelShuffler;
use crate::state::{ClientState, PartyState};
use crate::transport::parallel::ParallelTransport;
use crate::transport::tcp::Connection;
use crate::types::{
    Index, IncrementalShare, Key, OfflineSecret, Preshare, Query, Response, Sample, ServerId, Tag,
    PRESHARE_SIZE, SIG_SIZE,
};

pub struct ParallelRelay {
    party_id: u8,
    server_id: ServerId,
    party_count: u8,
    server_count: ServerId,
    back_cipher_size: usize,
    output_cipher_size: usize,
    back: Connection,
    next: Connection,
    siblings: ParallelTransport,
    db: Database,
    pshuffler: ParallelShuffler,
    lshuffler: LocalShuffler,
    at_sibling_counts: Vec<Index>,
    total_batch_size: Index,
    noise_from_sibling_counts: Vec<Index>,
    noise_from_sibling_prefixsum: Vec<Index>,
    received_from_sibling_counts: Vec<Index>,
    noise_count: Index,
    input_count: Index,
    shuffled_count: Index,
    noise: Batch<Sample>,
    in_ciphers: CipherBatch,
    out_ciphers: CipherBatch,
    in_tags: Batch<Tag>,
    in_queries: Batch<Query>,
    out_queries: Batch<Query>,
    in_responses: Batch<Response>,
    out_responses: Batch<Response>,
    queries_state: PartyState,
    noise_state: ClientState,
    distribution: NoiseDistribution,
    noise_start: Key,
    noise_end: Key,
    pkeys: Vec<crypto_box::PublicKey>,
    onion_skey: crypto_box::SecretKey,
    tag_sampling: TagSampling,
}

impl ParallelRelay {
    pub fn new(
        party_id: u8,
        server_id: ServerId,
        config: &Config,
        db: Database,
        tag_sampling: TagSampling,
    ) -> Result<Self> {
        assert!(config.party_count >= 2 && party_id < config.party_count - 1);
        assert!(config.server_count > 1 && server_id < config.server_count);

        let pkeys = config.parties.iter().map(|p| p.onion_pkey.clone()).collect();
        let party_config = &config.parties[party_id as usize];
        let server_config = &party_config.servers[server_id as usize];

        let back_cipher_size = onion::cipher_size((config.party_count - party_id) as usize);
        let output_cipher_size = onion::cipher_size((config.party_count - party_id - 1) as usize);

        let back = Connection::listen_one(server_config.port as u16)?;
        let next_party = &config.parties[party_id as usize + 1];
        let next_server = &next_party.servers[server_id as usize];
        let next = Connection::connect(&next_server.ip, next_server.port as u16)?;
        let siblings = ParallelTransport::connect(server_id, config.server_count, &party_config.servers)?;

        let server_count = config.server_count as usize;

        Ok(ParallelRelay {
            party_id,
            server_id,
            party_count: config.party_count,
            server_count: config.server_count,
            back_cipher_size,
            output_cipher_size,
            back,
            next,
            siblings,
            db,
            pshuffler: ParallelShuffler::new(server_id, config.server_count, party_config.shared_seed as u64),
            lshuffler: LocalShuffler::new(server_config.local_seed as u64),
            at_sibling_counts: vec![0; server_count],
            total_batch_size: 0,
            noise_from_sibling_counts: vec![0; server_count],
            noise_from_sibling_prefixsum: vec![0; server_count],
            received_from_sibling_counts: vec![0; server_count],
            noise_count: 0,
            input_count: 0,
            shuffled_count: 0,
            noise: Batch::new(),
            in_ciphers: CipherBatch::new(),
            out_ciphers: CipherBatch::new(),
            in_tags: Batch::new(),
            in_queries: Batch::new(),
            out_queries: Batch::new(),
            in_responses: Batch::new(),
            out_responses: Batch::new(),
            queries_state: PartyState::new(),
            noise_state: ClientState::new(),
            distribution: NoiseDistribution::new(config.epsilon, config.delta),
            noise_start: 0,
            noise_end: 0,
            pkeys,
            onion_skey: party_config.onion_skey.clone(),
            tag_sampling,
        })
    }

    fn remaining_parties(&self) -> usize {
        self.party_count as usize - self.party_id as usize - 1
    }

    fn sample_tag(&self, id: Index) -> Tag {
        match self.tag_sampling {
            TagSampling::Deterministic => self.total_batch_size as Tag + id as Tag,
            TagSampling::Uniform => rand::thread_rng().gen(),
        }
    }

    fn make_noise_secret(&mut self, id: Index) -> Vec<OfflineSecret> {
        let remaining = self.remaining_parties();
        let mut rng = rand::thread_rng();
        let tag0 = self.sample_tag(id);
        let incrementals = incremental::pre_shares(&mut rng, remaining);
        let preshares = additive::zero_shares(&mut rng, remaining + 1);

        let mut secrets = Vec::with_capacity(remaining);
        let mut tag = tag0;
        for i in 0..remaining {
            let next_tag = self.sample_tag(id);
            secrets.push(OfflineSecret {
                tag,
                next_tag,
                share: incrementals[i],
                preshare: preshares[i],
            });
            tag = next_tag;
        }

        self.noise_state.add_secret(tag0, incrementals, [0u8; PRESHARE_SIZE]);
        secrets
    }

    fn make_noise_query(&mut self, key: Key) -> Query {
        self.noise_state.load_next();
        let tag = self.noise_state.tag();
        let tally = incremental::build_tally(key, self.noise_state.incremental_shares());
        Query { tag, tally }
    }

    fn handle_query(&mut self, input: Query) -> Query {
        self.queries_state.load_secret(input.tag);
        Query {
            tag: self.queries_state.next_tag(),
            tally: incremental::reconstruct(input.tally, &self.queries_state.incremental()),
        }
    }

    fn handle_response(&self, tag: Tag, input: Response) -> Response {
        additive::additive_reconstruct(input, self.queries_state.preshare(tag))
    }

    fn initialize_noise_samples(&mut self) {
        self.noise_count = 0;
        let (start, end) = noise::find_range(self.server_id, self.server_count, self.db.size());
        self.noise_start = start;
        self.noise_end = end;

        let size = (end - start) as usize;
        self.noise.initialize(size);
        for _ in 0..size {
            let sample = self.distribution.sample();
            self.noise.push_back(sample);
            self.noise_count += sample;
        }
    }

    fn initialize_counts(&mut self) -> Result<()> {
        self.input_count = self.back.read_count()?;
        self.siblings.broadcast_count(self.noise_count + self.input_count)?;

        self.total_batch_size = 0;
        for id in 0..self.server_count {
            self.at_sibling_counts[id as usize] = if id != self.server_id {
                self.siblings.read_count(id)?
            } else {
                self.noise_count + self.input_count
            };
            self.total_batch_size += self.at_sibling_counts[id as usize];
        }

        self.shuffled_count = self.total_batch_size / self.server_count as Index;
        if self.server_id == self.server_count - 1 {
            self.shuffled_count =
                self.total_batch_size - self.shuffled_count * self.server_id as Index;
        }

        self.next.send_count(self.shuffled_count)?;
        println!(
            "Input: {}; Noise: {}; Shuffled: {}",
            self.input_count, self.noise_count, self.shuffled_count
        );
        Ok(())
    }

    fn initialize_shufflers(&mut self) -> Result<()> {
        self.pshuffler.initialize(&self.at_sibling_counts, self.noise_count);
        debug_assert_eq!(self.shuffled_count, self.pshuffler.get_server_slice_size());

        for id in 0..self.server_count {
            if id != self.server_id {
                self.siblings.send_count(id, self.pshuffler.count_noise_to_server(id))?;
            }
        }

        let mut total: Index = 0;
        for id in 0..self.server_count {
            self.noise_from_sibling_counts[id as usize] = if id != self.server_id {
                self.siblings.read_count(id)?
            } else {
                self.pshuffler.count_noise_to_server(id)
            };
            total += self.noise_from_sibling_counts[id as usize];
            self.noise_from_sibling_prefixsum[id as usize] = total;
        }

        self.lshuffler.initialize(self.shuffled_count);
        Ok(())
    }

    fn initialize_noise_queries(&mut self) {
        let mut idx = 0;
        for key in self.noise_start..self.noise_end {
            let sample = self.noise[(key - self.noise_start) as usize];
            for _ in 0..sample {
                self.in_queries[idx as usize] = self.make_noise_query(key);
                idx += 1;
            }
        }
        self.noise.free();
        self.noise_state = ClientState::new();
    }

    fn collect_ciphers(&mut self) -> Result<()> {
        println!("Listening for offline ciphers...");
        for _ in 0..self.input_count {
            let cipher = self.back.read_cipher(self.back_cipher_size)?;
            self.in_ciphers.push_long(cipher);
        }
        Ok(())
    }

    fn create_noise_ciphers(&mut self) -> Result<()> {
        self.in_ciphers
            .initialize(self.noise_count as usize, self.input_count as usize);
        println!("Creating secrets and ciphers for noise queries...");
        for i in 0..self.noise_count {
            let secrets = self.make_noise_secret(i);
            let cipher = onion::encrypt(&secrets, self.party_id as usize + 1, &self.pkeys)?;
            self.in_ciphers.push_short(cipher);
        }
        Ok(())
    }

    fn install_secrets(&mut self) -> Result<()> {
        println!("Decrypting offline ciphers...");
        while self.in_ciphers.has_long() {
            let cipher = self.in_ciphers.pop_long().unwrap();
            let layer = onion::decrypt(&cipher, &self.onion_skey)?;
            let secret = layer.message();
            self.queries_state
                .store(secret.tag, secret.next_tag, secret.share, secret.preshare);
            self.in_ciphers.push_short(layer.next_layer().to_vec());
        }
        Ok(())
    }

    fn from_sibling_cipher(&mut self, source: ServerId, cipher: Vec<u8>) {
        let source_start = self.pshuffler.prefix_sum_count_from_server(source);
        let source_count = self.received_from_sibling_counts[source as usize];
        self.received_from_sibling_counts[source as usize] += 1;
        let target = self.lshuffler.shuffle(source_start + source_count);
        self.out_ciphers.set_short(target as usize, cipher);
    }

    fn from_sibling_query(&mut self, source: ServerId, query: Query) {
        let source_start = self.pshuffler.prefix_sum_count_from_server(source);
        let source_count = self.received_from_sibling_counts[source as usize];
        self.received_from_sibling_counts[source as usize] += 1;
        let target = self.lshuffler.shuffle(source_start + source_count);
        self.out_queries[target as usize] = query;
    }

    fn from_sibling_response(&mut self, source: ServerId, response: Response) {
        let mut idx;
        loop {
            idx = self.pshuffler.deshuffle_one(source);
            if idx >= self.noise_count {
                break;
            }
        }
        idx -= self.noise_count;
        let tag = self.in_tags[idx as usize];
        self.out_responses[idx as usize] = self.handle_response(tag, response);
    }

    /// Per-source non-noise/noise counts for the current shuffle round
    /// (every one of `shuffle_ciphers`/`shuffle_queries`/`deshuffle_responses`
    /// needs this, built the same way each time).
    fn from_counts(&self, total: Index, non_noise: impl Fn(ServerId) -> Index) -> (Index, Vec<Index>) {
        let mut total_read = total;
        let mut counts = vec![0 as Index; self.server_count as usize];
        for id in 0..self.server_count {
            let count = non_noise(id);
            if id != self.server_id {
                counts[id as usize] = count;
            } else {
                total_read -= count;
            }
        }
        (total_read, counts)
    }

    fn drain_ready_siblings_ciphers(&mut self, total_read: &mut Index) -> Result<()> {
        while let Some(source) = self.siblings.poll(Duration::from_millis(0))? {
            let cipher = self.siblings.read_cipher(source, self.output_cipher_size)?;
            self.from_sibling_cipher(source, cipher);
            *total_read -= 1;
        }
        Ok(())
    }

    fn shuffle_ciphers(&mut self) -> Result<()> {
        println!("Shuffling ciphers with siblings...");
        self.out_ciphers.initialize_short_with(self.shuffled_count as usize, Vec::new());
        self.received_from_sibling_counts = vec![0; self.server_count as usize];

        let (mut total_read, _from_counts) =
            self.from_counts(self.shuffled_count, |id| self.pshuffler.count_from_server(id));

        let poll_rate = crate::transport::poll_rate(self.output_cipher_size);
        let mut sent_since_poll = 0usize;

        let to_send = self.in_ciphers.take_short();
        for cipher in to_send {
            let target = self.pshuffler.shuffle_one();
            if target == self.server_id {
                self.from_sibling_cipher(target, cipher);
            } else {
                self.siblings.send_cipher(target, &cipher)?;
                sent_since_poll += 1;
            }
            self.drain_ready_siblings_ciphers(&mut total_read)?;
            if sent_since_poll >= poll_rate {
                self.siblings.flush_all()?;
                if total_read > 0 {
                    let source = self
                        .siblings
                        .poll(Duration::from_millis(50))?
                        .expect("sibling stalled mid cipher shuffle");
                    let cipher = self.siblings.read_cipher(source, self.output_cipher_size)?;
                    self.from_sibling_cipher(source, cipher);
                    total_read -= 1;
                }
                sent_since_poll = 0;
            }
        }
        self.siblings.flush_all()?;
        while total_read > 0 {
            let source = self
                .siblings
                .poll(Duration::from_millis(50))?
                .expect("sibling stalled mid cipher shuffle");
            let cipher = self.siblings.read_cipher(source, self.output_cipher_size)?;
            self.from_sibling_cipher(source, cipher);
            total_read -= 1;
        }

        self.in_ciphers.free();
        self.pshuffler.finish_forward();
        self.lshuffler.finish_forward();

        println!("Waiting for siblings...");
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        Ok(())
    }

    fn shuffle_queries(&mut self) -> Result<()> {
        println!("Shuffling queries with siblings...");
        self.out_queries
            .initialize_with(self.shuffled_count as usize, Query { tag: 0, tally: 0 });
        self.received_from_sibling_counts = vec![0; self.server_count as usize];

        let (mut total_read, _from_counts) =
            self.from_counts(self.shuffled_count, |id| self.pshuffler.count_from_server(id));

        let poll_rate = crate::transport::poll_rate(Query::ENCODED_SIZE);
        let mut sent_since_poll = 0usize;

        let to_send = self.in_queries.as_slice().to_vec();
        for query in to_send {
            let target = self.pshuffler.shuffle_one();
            if target == self.server_id {
                self.from_sibling_query(target, query);
            } else {
                self.siblings.send_query(target, query)?;
                sent_since_poll += 1;
            }
            while let Some(source) = self.siblings.poll(Duration::from_millis(0))? {
                let q = self.siblings.read_query(source)?;
                self.from_sibling_query(source, q);
                total_read -= 1;
            }
            if sent_since_poll >= poll_rate {
                self.siblings.flush_all()?;
                if total_read > 0 {
                    let source = self
                        .siblings
                        .poll(Duration::from_millis(50))?
                        .expect("sibling stalled mid query shuffle");
                    let q = self.siblings.read_query(source)?;
                    self.from_sibling_query(source, q);
                    total_read -= 1;
                }
                sent_since_poll = 0;
            }
        }
        self.siblings.flush_all()?;
        while total_read > 0 {
            let source = self
                .siblings
                .poll(Duration::from_millis(50))?
                .expect("sibling stalled mid query shuffle");
            let q = self.siblings.read_query(source)?;
            self.from_sibling_query(source, q);
            total_read -= 1;
        }

        self.in_queries.free();
        self.pshuffler.finish_forward();
        self.lshuffler.finish_forward();

        println!("Waiting for siblings...");
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        Ok(())
    }

    fn deshuffle_responses(&mut self) -> Result<()> {
        println!("Deshuffling responses with siblings...");
        let zero = Response { value: 0, sig: [0u8; SIG_SIZE] };
        self.out_responses.initialize_with(self.input_count as usize, zero);

        let (mut total_read, _from_counts) = self.from_counts(self.input_count, |id| {
            self.pshuffler.count_to_server(id) - self.pshuffler.count_noise_to_server(id)
        });

        let mut index: Index = 0;
        let mut target: ServerId = 0;
        let mut target_end = if self.server_count > 1 {
            self.pshuffler.prefix_sum_count_from_server(target + 1)
                - self.noise_from_sibling_prefixsum[target as usize]
        } else {
            0
        };

        let poll_rate = crate::transport::poll_rate(Response::ENCODED_SIZE);
        let mut sent_since_poll = 0usize;

        let to_send = self.in_responses.as_slice().to_vec();
        self.in_responses.free();
        for response in to_send {
            while index >= target_end && target < self.server_count - 1 {
                target += 1;
                if target < self.server_count - 1 {
                    target_end = self.pshuffler.prefix_sum_count_from_server(target + 1)
                        - self.noise_from_sibling_prefixsum[target as usize];
                }
            }
            if target == self.server_id {
                self.from_sibling_response(target, response);
            } else {
                self.siblings.send_response(target, response)?;
                sent_since_poll += 1;
            }
            index += 1;

            while let Some(source) = self.siblings.poll(Duration::from_millis(0))? {
                let r = self.siblings.read_response(source)?;
                self.from_sibling_response(source, r);
                total_read -= 1;
            }
            if sent_since_poll >= poll_rate {
                self.siblings.flush_all()?;
                if total_read > 0 {
                    let source = self
                        .siblings
                        .poll(Duration::from_millis(50))?
                        .expect("sibling stalled mid response deshuffle");
                    let r = self.siblings.read_response(source)?;
                    self.from_sibling_response(source, r);
                    total_read -= 1;
                }
                sent_since_poll = 0;
            }
        }
        self.siblings.flush_all()?;
        while total_read > 0 {
            let source = self
                .siblings
                .poll(Duration::from_millis(50))?
                .expect("sibling stalled mid response deshuffle");
            let r = self.siblings.read_response(source)?;
            self.from_sibling_response(source, r);
            total_read -= 1;
        }

        self.pshuffler.finish_backward();
        println!("Waiting for siblings...");
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        Ok(())
    }

    fn send_ciphers(&mut self) -> Result<()> {
        println!("Sending offline ciphers...");
        for cipher in self.out_ciphers.iter_short() {
            self.next.send_cipher(cipher)?;
        }
        self.next.flush()?;
        self.out_ciphers.free();
        Ok(())
    }

    /// Exchanges every installed offline secret with every sibling, so any
    /// sibling can answer an online query regardless of which of us
    /// originally installed its secret.
    fn broadcast_secrets(&mut self) -> Result<()> {
        println!("Broadcasting secrets...");
        self.siblings.broadcast_count(self.queries_state.len() as u32)?;

        let mut total_read: Index = 0;
        for id in 0..self.server_count {
            if id != self.server_id {
                total_read += self.siblings.read_count(id)?;
            }
        }

        let to_send: Vec<(Tag, Tag, IncrementalShare, Preshare)> = self
            .queries_state
            .iter()
            .map(|(tag, next_tag, share, preshare)| (*tag, next_tag, share, *preshare))
            .collect();

        let poll_rate = crate::transport::poll_rate(OfflineSecret::ENCODED_SIZE);
        let mut sent_since_poll = 0usize;

        for (tag, next_tag, share, preshare) in to_send {
            let secret = OfflineSecret { tag, next_tag, share, preshare };
            self.siblings.broadcast_secret(&secret)?;
            sent_since_poll += 1;
            while let Some(source) = self.siblings.poll(Duration::from_millis(0))? {
                let secret = self.siblings.read_secret(source)?;
                self.queries_state
                    .store(secret.tag, secret.next_tag, secret.share, secret.preshare);
                total_read -= 1;
            }
            if sent_since_poll >= poll_rate {
                self.siblings.flush_all()?;
                if total_read > 0 {
                    let source = self
                        .siblings
                        .poll(Duration::from_millis(50))?
                        .expect("sibling stalled mid secret broadcast");
                    let secret = self.siblings.read_secret(source)?;
                    self.queries_state
                        .store(secret.tag, secret.next_tag, secret.share, secret.preshare);
                    total_read -= 1;
                }
                sent_since_poll = 0;
            }
        }
        self.siblings.flush_all()?;
        while total_read > 0 {
            let source = self
                .siblings
                .poll(Duration::from_millis(50))?
                .expect("sibling stalled mid secret broadcast");
            let secret = self.siblings.read_secret(source)?;
            self.queries_state
                .store(secret.tag, secret.next_tag, secret.share, secret.preshare);
            total_read -= 1;
        }
        Ok(())
    }

    pub fn start_offline(&mut self) -> Result<()> {
        self.initialize_noise_samples();
        self.initialize_counts()?;

        self.queries_state.initialize(false);
        self.noise_state
            .initialize(self.remaining_parties(), self.noise_count as usize, false);

        self.create_noise_ciphers()?;

        self.next.wait_for_ready()?;
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;

        self.collect_ciphers()?;

        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;

        self.initialize_shufflers()?;
        self.install_secrets()?;
        self.shuffle_ciphers()?;
        self.send_ciphers()?;
        self.broadcast_secrets()?;

        self.initialize_shufflers()?;

        self.in_tags.initialize(self.input_count as usize);
        self.in_queries
            .initialize_with((self.input_count + self.noise_count) as usize, Query { tag: 0, tally: 0 });
        self.initialize_noise_queries();

        self.next.wait_for_ready()?;
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    pub fn simulate_offline(&mut self) -> Result<()> {
        self.initialize_noise_samples();
        self.initialize_counts()?;
        self.initialize_shufflers()?;

        self.queries_state.initialize(true);
        self.noise_state
            .initialize(self.remaining_parties(), self.noise_count as usize, true);

        self.in_tags.initialize(self.input_count as usize);
        self.in_queries
            .initialize_with((self.input_count + self.noise_count) as usize, Query { tag: 0, tally: 0 });
        self.initialize_noise_queries();

        self.next.wait_for_ready()?;
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    fn collect_queries(&mut self) -> Result<()> {
        println!("Listening for queries...");
        let mut read = self.noise_count;
        while read < self.in_queries.capacity() as Index {
            let in_query = self.back.read_query()?;
            self.in_tags.push_back(in_query.tag);
            let out_query = self.handle_query(in_query);
            self.in_queries[read as usize] = out_query;
            read += 1;
        }
        Ok(())
    }

    fn send_queries(&mut self) -> Result<()> {
        println!("Sending queries...");
        for i in 0..self.out_queries.len() {
            self.next.send_query(self.out_queries[i])?;
        }
        self.next.flush()?;
        self.out_queries.free();
        Ok(())
    }

    fn collect_responses(&mut self) -> Result<()> {
        println!("Listening for responses...");
        let noise_total = self.noise_from_sibling_prefixsum[self.server_count as usize - 1];
        let non_noise = self.shuffled_count - noise_total;
        let zero = Response { value: 0, sig: [0u8; SIG_SIZE] };
        self.in_responses.initialize_with(non_noise as usize, zero);

        let mut read: Index = 0;
        while read < self.shuffled_count {
            let in_response = self.next.read_response()?;
            let target = self.lshuffler.deshuffle(read);
            read += 1;
            let source = self.pshuffler.find_source_of(target);
            let start = self.pshuffler.prefix_sum_count_from_server(source);
            if target >= start + self.noise_from_sibling_counts[source as usize] {
                let idx = target - self.noise_from_sibling_prefixsum[source as usize];
                self.in_responses[idx as usize] = in_response;
            }
        }
        self.lshuffler.finish_backward();
        Ok(())
    }

    fn send_responses(&mut self) -> Result<()> {
        println!("Sending responses...");
        for i in 0..self.out_responses.len() {
            self.back.send_response(self.out_responses[i])?;
        }
        self.back.flush()?;
        self.out_responses.free();
        Ok(())
    }

    pub fn start_online(&mut self) -> Result<()> {
        self.collect_queries()?;
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;

        self.shuffle_queries()?;
        self.send_queries()?;
        self.collect_responses()?;
        self.deshuffle_responses()?;

        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;

        self.send_responses()?;
        Ok(())
    }
}
