//! The query-issuing client role.

use rand::Rng;

use crate::config::Config;
use crate::database::Database;
use crate::onion;
use crate::protocol::TagSampling;
use crate::sharing::{additive, incremental};
use crate::state::ClientState;
use crate::transport::tcp::Connection;
use crate::types::{Key, OfflineSecret, Query, Response, Tag};
use crate::error::Result;

pub struct Client {
    server_id: u8,
    party_count: u8,
    next: Connection,
    db: Database,
    state: ClientState,
    pkeys: Vec<crypto_box::PublicKey>,
    queries_count: u32,
    tag_sampling: TagSampling,
}

impl Client {
    pub fn new(server_id: u8, config: &Config, db: Database, tag_sampling: TagSampling) -> Result<Self> {
        assert!(config.party_count >= 2);
        let pkeys = config.parties.iter().map(|p| p.onion_pkey.clone()).collect();
        let server = &config.parties[0].servers[server_id as usize];
        let next = Connection::connect(&server.ip, server.port as u16)?;
        Ok(Client {
            server_id,
            party_count: config.party_count,
            next,
            db,
            state: ClientState::new(),
            pkeys,
            queries_count: 0,
            tag_sampling,
        })
    }

    fn sample_tag(&self, id: u32) -> Tag {
        match self.tag_sampling {
            TagSampling::Deterministic => self.server_id as Tag * self.queries_count as Tag + id as Tag,
            TagSampling::Uniform => rand::thread_rng().gen(),
        }
    }

    /// Samples one query's full offline secret chain, stashing this
    /// client's own tail preshare in `state` and returning one
    /// `OfflineSecret` per party to be onion-encrypted.
    fn make_secret(&mut self, id: u32) -> Vec<OfflineSecret> {
        let mut rng = rand::thread_rng();
        let tag0 = self.sample_tag(id);
        let incrementals = incremental::pre_shares(&mut rng, self.party_count as usize);
        let preshares = additive::zero_shares(&mut rng, self.party_count as usize + 1);

        let mut secrets = Vec::with_capacity(self.party_count as usize);
        let mut tag = tag0;
        for party_id in 0..self.party_count as usize {
            let next_tag = self.sample_tag(id);
            secrets.push(OfflineSecret {
                tag,
                next_tag,
                share: incrementals[party_id],
                preshare: preshares[party_id],
            });
            tag = next_tag;
        }

        // The client itself only ever needs tag0, the routing tag it hands
        // party 0 in the online query; every later tag is the parties' own
        // business.
        self.state.add_secret(tag0, incrementals, preshares[self.party_count as usize]);
        secrets
    }

    fn make_query(&mut self, key: Key) -> Query {
        self.state.load_next();
        let tag = self.state.tag();
        let tally = incremental::build_tally(key, self.state.incremental_shares());
        Query { tag, tally }
    }

    fn reconstruct_response(&mut self, response: Response) -> Response {
        self.state.load_next();
        additive::additive_reconstruct(response, self.state.preshare())
    }

    pub fn start_offline(&mut self, count: u32) -> Result<()> {
        self.queries_count = count;
        self.next.send_count(count)?;
        self.next.wait_for_ready()?;

        self.state.initialize(self.party_count as usize, count as usize, false);

        for id in 0..count {
            let secrets = self.make_secret(id);
            let cipher = onion::encrypt(&secrets, 0, &self.pkeys)?;
            self.next.send_cipher(&cipher)?;
        }
        self.next.flush()?;
        self.next.wait_for_ready()?;
        Ok(())
    }

    pub fn simulate_offline(&mut self, count: u32) -> Result<()> {
        self.state.initialize(self.party_count as usize, 0, true);
        self.next.send_count(count)?;
        self.next.wait_for_ready()?;
        Ok(())
    }

    /// Runs the online stage, returning the reconstructed responses in the
    /// order queries were issued. `verify` additionally checks each
    /// response against a direct database lookup (debug/testing only: a
    /// real client cannot do this).
    pub fn start_online(&mut self, count: u32, verify: bool) -> Result<Vec<Response>> {
        self.queries_count = count;
        let mut queried_keys = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let key = self.db.random_row(&mut rand::thread_rng());
            queried_keys.push(key);
            let query = self.make_query(key);
            self.next.send_query(query)?;
        }
        self.next.flush()?;
        self.state.finish_sharing();

        let mut responses = Vec::with_capacity(count as usize);
        for i in 0..count {
            let response = self.next.read_response()?;
            let response = self.reconstruct_response(response);
            if verify {
                let expected = self.db.lookup(queried_keys[i as usize]);
                assert_eq!(response, expected, "response mismatch for query {i}");
            }
            responses.push(response);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onion::generate_keypair;
    use std::net::TcpListener;
    use std::thread;

    fn test_client(port: u16, party_count: u8, tag_sampling: TagSampling) -> Client {
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let accept = thread::spawn(move || listener.accept().unwrap());
        thread::sleep(std::time::Duration::from_millis(20));

        let pkeys: Vec<_> = (0..party_count).map(|_| generate_keypair()).collect();
        let config = Config {
            db_size: 100,
            epsilon: 0.0,
            delta: 0.0,
            party_count,
            server_count: 1,
            parties: pkeys
                .into_iter()
                .map(|(onion_pkey, onion_skey)| crate::config::PartyConfig {
                    shared_seed: 1,
                    servers: vec![crate::config::ServerConfig {
                        local_seed: 1,
                        port: port as i32,
                        parallel_port: port as i32 + 1,
                        ip: "127.0.0.1".into(),
                    }],
                    onion_pkey,
                    onion_skey,
                })
                .collect(),
        };

        let client = Client::new(0, &config, Database::new(100), tag_sampling).unwrap();
        accept.join().unwrap();
        client
    }

    #[test]
    fn make_secret_shares_round_trip_through_the_whole_chain() {
        let mut client = test_client(28740, 4, TagSampling::Uniform);
        let secrets = client.make_secret(0);
        assert_eq!(secrets.len(), 4);

        let key: Key = 12345;
        let incrementals: Vec<_> = secrets.iter().map(|s| s.share).collect();
        let tally = incremental::build_tally(key, &incrementals);
        let mut t = tally;
        for share in &incrementals {
            t = incremental::reconstruct(t, share);
        }
        assert_eq!(t, key);

        let response = Response { value: 7, sig: [1u8; 48] };
        let mut acc = response;
        for secret in &secrets {
            acc = additive::additive_reconstruct(acc, &secret.preshare);
        }
        client.state.load_next();
        acc = additive::additive_reconstruct(acc, client.state.preshare());
        assert_eq!(acc, response);
    }

    #[test]
    fn deterministic_sampling_repeats_the_same_tag_every_hop() {
        let mut client = test_client(28742, 3, TagSampling::Deterministic);
        client.queries_count = 10;
        let secrets = client.make_secret(4);
        let expected = 0u64 * 10 + 4;
        for secret in &secrets {
            assert_eq!(secret.tag, expected);
            assert_eq!(secret.next_tag, expected);
        }
    }

    #[test]
    fn make_query_and_reconstruct_response_advance_the_read_cursor() {
        let mut client = test_client(28744, 2, TagSampling::Uniform);
        client.state.initialize(2, 2, false);
        client.make_secret(0);
        client.make_secret(1);

        let q0 = client.make_query(5);
        let q1 = client.make_query(6);
        assert_ne!(q0.tag, q1.tag);
    }
}
