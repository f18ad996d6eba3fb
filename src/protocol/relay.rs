//! A single-server relay party: the `P - 2` middle parties in the chain
//! between the client and the backend.

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
use crate::state::{ClientState, PartyState};
use crate::transport::tcp::Connection;
use crate::types::{Index, Key, OfflineSecret, Query, Response, Sample, Tag, PRESHARE_SIZE, SIG_SIZE};

pub struct Relay {
    party_id: u8,
    server_id: u8,
    party_count: u8,
    server_count: u8,
    back: Connection,
    back_cipher_size: usize,
    next: Connection,
    db: Database,
    shuffler: LocalShuffler,
    noise_count: Index,
    input_count: Index,
    shuffled_count: Index,
    noise: Batch<Sample>,
    ciphers: CipherBatch,
    tags: Batch<Tag>,
    queries: Batch<Query>,
    responses: Batch<Response>,
    queries_state: PartyState,
    noise_state: ClientState,
    distribution: NoiseDistribution,
    noise_start: Key,
    noise_end: Key,
    pkeys: Vec<crypto_box::PublicKey>,
    onion_skey: crypto_box::SecretKey,
    tag_sampling: TagSampling,
}

impl Relay {
    pub fn new(
        party_id: u8,
        server_id: u8,
        config: &Config,
        db: Database,
        tag_sampling: TagSampling,
    ) -> Result<Self> {
        assert!(config.party_count >= 2 && party_id < config.party_count - 1);
        assert_eq!(config.server_count, 1);

        let pkeys = config.parties.iter().map(|p| p.onion_pkey.clone()).collect();
        let party_config = &config.parties[party_id as usize];
        let server_config = &party_config.servers[server_id as usize];

        // The size of an incoming cipher still carrying this party's own
        // layer; the outgoing (peeled) cipher has no fixed size this party
        // needs to track, since it writes whatever bytes `onion::decrypt`
        // hands back.
        let back_cipher_size = onion::cipher_size((config.party_count - party_id) as usize);

        let back = Connection::listen_one(server_config.port as u16)?;
        let next_party = &config.parties[party_id as usize + 1];
        let next_server = &next_party.servers[server_id as usize];
        let next = Connection::connect(&next_server.ip, next_server.port as u16)?;

        Ok(Relay {
            party_id,
            server_id,
            party_count: config.party_count,
            server_count: config.server_count,
            back,
            back_cipher_size,
            next,
            db,
            shuffler: LocalShuffler::new(server_config.local_seed as u64),
            noise_count: 0,
            input_count: 0,
            shuffled_count: 0,
            noise: Batch::new(),
            ciphers: CipherBatch::new(),
            tags: Batch::new(),
            queries: Batch::new(),
            responses: Batch::new(),
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
            TagSampling::Deterministic => self.input_count as Tag + id as Tag,
            TagSampling::Uniform => rand::thread_rng().gen(),
        }
    }

    /// Samples a noise query's offline secret chain for the parties after
    /// this one, stashing the incremental shares this party needs to build
    /// the noise query itself (this party never reconstructs the noise
    /// response, so no preshare is kept for it).
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
        self.shuffled_count = self.input_count + self.noise_count;
        self.next.send_count(self.shuffled_count)?;
        println!(
            "Input: {}; Noise: {}; Shuffled: {}",
            self.input_count, self.noise_count, self.shuffled_count
        );
        Ok(())
    }

    fn initialize_noise_queries(&mut self) {
        let mut idx = 0;
        for key in self.noise_start..self.noise_end {
            let sample = self.noise[(key - self.noise_start) as usize];
            for _ in 0..sample {
                let target = self.shuffler.shuffle(idx);
                let query = self.make_noise_query(key);
                self.queries[target as usize] = query;
                idx += 1;
            }
        }
        self.noise.free();
        // Noise responses are always discarded, so the noise state is never
        // consulted again after this point.
        self.noise_state = ClientState::new();
    }

    fn collect_ciphers(&mut self) -> Result<()> {
        println!("Listening for offline ciphers...");
        for _ in 0..self.input_count {
            let cipher = self.back.read_cipher(self.back_cipher_size)?;
            self.ciphers.push_long(cipher);
        }
        Ok(())
    }

    fn create_noise_ciphers(&mut self) -> Result<()> {
        self.ciphers
            .initialize(self.noise_count as usize, self.input_count as usize);
        println!("Creating secrets and ciphers for noise queries...");
        for i in 0..self.noise_count {
            let secrets = self.make_noise_secret(i);
            let cipher = onion::encrypt(&secrets, self.party_id as usize + 1, &self.pkeys)?;
            self.ciphers.push_short(cipher);
        }
        Ok(())
    }

    fn install_secrets(&mut self) -> Result<()> {
        println!("Decrypting offline ciphers...");
        while self.ciphers.has_long() {
            let cipher = self.ciphers.pop_long().unwrap();
            let layer = onion::decrypt(&cipher, &self.onion_skey)?;
            let secret = layer.message();
            self.queries_state
                .store(secret.tag, secret.next_tag, secret.share, secret.preshare);
            self.ciphers.push_short(layer.next_layer().to_vec());
        }
        Ok(())
    }

    fn send_ciphers(&mut self) -> Result<()> {
        println!("Sending offline ciphers...");
        for i in 0..self.shuffled_count {
            let idx = self.shuffler.shuffle(i);
            self.next.send_cipher(self.ciphers.get_short(idx as usize))?;
        }
        self.next.flush()?;
        self.shuffler.finish_forward();
        self.ciphers.free();
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
        self.back.send_ready()?;

        self.collect_ciphers()?;

        self.shuffler.initialize(self.shuffled_count);
        self.install_secrets()?;
        self.send_ciphers()?;

        self.shuffler.initialize(self.shuffled_count);
        self.tags.initialize(self.input_count as usize);
        self.queries
            .initialize_with(self.shuffled_count as usize, Query { tag: 0, tally: 0 });
        self.initialize_noise_queries();

        self.next.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    pub fn simulate_offline(&mut self) -> Result<()> {
        self.initialize_noise_samples();
        self.initialize_counts()?;
        self.shuffler.initialize(self.shuffled_count);

        self.queries_state.initialize(true);
        self.noise_state
            .initialize(self.remaining_parties(), self.noise_count as usize, true);

        self.tags.initialize(self.input_count as usize);
        self.queries
            .initialize_with(self.shuffled_count as usize, Query { tag: 0, tally: 0 });
        self.initialize_noise_queries();

        self.next.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    fn collect_queries(&mut self) -> Result<()> {
        println!("Listening for queries...");
        let mut read = self.noise_count;
        while read < self.shuffled_count {
            let in_query = self.back.read_query()?;
            self.tags.push_back(in_query.tag);
            let target = self.shuffler.shuffle(read);
            read += 1;
            let out_query = self.handle_query(in_query);
            self.queries[target as usize] = out_query;
        }
        Ok(())
    }

    fn send_queries(&mut self) -> Result<()> {
        println!("Sending queries...");
        for i in 0..self.queries.len() {
            self.next.send_query(self.queries[i])?;
        }
        self.next.flush()?;
        self.shuffler.finish_forward();
        self.queries.free();
        Ok(())
    }

    fn collect_responses(&mut self) -> Result<()> {
        println!("Listening for responses...");
        let zero = Response { value: 0, sig: [0u8; SIG_SIZE] };
        self.responses.initialize_with(self.input_count as usize, zero);

        let mut read = 0;
        while read < self.shuffled_count {
            let in_response = self.next.read_response()?;
            let target = self.shuffler.deshuffle(read);
            read += 1;
            if target >= self.noise_count {
                let target_index = (target - self.noise_count) as usize;
                let tag = self.tags[target_index];
                self.responses[target_index] = self.handle_response(tag, in_response);
            }
        }

        self.shuffler.finish_backward();
        self.tags.free();
        Ok(())
    }

    fn send_responses(&mut self) -> Result<()> {
        println!("Sending responses...");
        for i in 0..self.responses.len() {
            self.back.send_response(self.responses[i])?;
        }
        self.back.flush()?;
        self.responses.free();
        Ok(())
    }

    pub fn start_online(&mut self) -> Result<()> {
        self.collect_queries()?;
        self.send_queries()?;
        self.collect_responses()?;
        self.send_responses()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onion::generate_keypair;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Builds a 3-party config and spins up a dummy "next" listener so a
    /// `Relay` for party 0 can complete its handshakes in-process.
    fn test_relay(back_port: u16, next_port: u16) -> Relay {
        let next_listener = TcpListener::bind(("127.0.0.1", next_port)).unwrap();
        let accept_next = thread::spawn(move || next_listener.accept().unwrap());

        let connect_back = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            Connection::connect("127.0.0.1", back_port)
        });

        let keys: Vec<_> = (0..3).map(|_| generate_keypair()).collect();
        let config = Config {
            db_size: 100,
            epsilon: 0.0,
            delta: 0.0,
            party_count: 3,
            server_count: 1,
            parties: keys
                .into_iter()
                .enumerate()
                .map(|(i, (onion_pkey, onion_skey))| {
                    let port = if i == 0 { back_port } else { next_port };
                    crate::config::PartyConfig {
                        shared_seed: 1,
                        servers: vec![crate::config::ServerConfig {
                            local_seed: 7,
                            port: port as i32,
                            parallel_port: port as i32 + 1000,
                            ip: "127.0.0.1".into(),
                        }],
                        onion_pkey,
                        onion_skey,
                    }
                })
                .collect(),
        };

        let relay = Relay::new(0, 0, &config, Database::new(100), TagSampling::Uniform).unwrap();
        accept_next.join().unwrap();
        connect_back.join().unwrap().unwrap();
        relay
    }

    #[test]
    fn make_noise_secret_shares_round_trip() {
        let mut relay = test_relay(28750, 28751);
        let secrets = relay.make_noise_secret(0);
        assert_eq!(secrets.len(), 2); // remaining_parties = 3 - 0 - 1

        let key: Key = 42;
        let incrementals: Vec<_> = secrets.iter().map(|s| s.share).collect();
        let tally = incremental::build_tally(key, &incrementals);
        let mut t = tally;
        for share in &incrementals {
            t = incremental::reconstruct(t, share);
        }
        assert_eq!(t, key);
    }

    #[test]
    fn handle_query_reconstructs_one_incremental_step() {
        let mut relay = test_relay(28752, 28753);
        relay.queries_state.initialize(false);
        relay.queries_state.store(
            10,
            11,
            crate::types::IncrementalShare { x: 3, y: 5 },
            [0u8; PRESHARE_SIZE],
        );

        let key: Key = 999;
        let tally = incremental::build_tally(key, &[crate::types::IncrementalShare { x: 3, y: 5 }]);
        let out = relay.handle_query(Query { tag: 10, tally });
        assert_eq!(out.tag, 11);
        assert_eq!(out.tally, key);
    }

    #[test]
    fn handle_response_xors_in_the_stored_preshare() {
        let mut relay = test_relay(28754, 28755);
        relay.queries_state.initialize(false);
        let preshare = [5u8; PRESHARE_SIZE];
        relay.queries_state.store(
            20,
            21,
            crate::types::IncrementalShare { x: 0, y: 1 },
            preshare,
        );

        let response = Response { value: 100, sig: [2u8; SIG_SIZE] };
        let masked = additive::additive_reconstruct(response, &preshare);
        let out = relay.handle_response(20, masked);
        assert_eq!(out, response);
    }
}
