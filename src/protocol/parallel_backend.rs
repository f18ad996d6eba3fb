//! A multi-server backend: like [`crate::protocol::backend::Backend`] but
//! sharded across `server_count > 1` sibling servers. Each server installs
//! only the secrets for the ciphers routed to it, then broadcasts them to
//! every sibling so any server can answer any query in the online stage.

use std::time::Duration;

use crate::config::Config;
use crate::containers::Batch;
use crate::database::Database;
use crate::error::Result;
use crate::onion;
use crate::state::BackendState;
use crate::transport::parallel::ParallelTransport;
use crate::transport::tcp::Connection;
use crate::types::{Query, Response, ServerId};

pub struct ParallelBackend {
    server_id: ServerId,
    server_count: ServerId,
    back: Connection,
    siblings: ParallelTransport,
    cipher_size: usize,
    db: Database,
    input_count: u32,
    queries: Batch<Query>,
    state: BackendState,
    onion_skey: crypto_box::SecretKey,
}

impl ParallelBackend {
    pub fn new(server_id: ServerId, config: &Config, db: Database) -> Result<Self> {
        assert!(config.party_count >= 2);
        assert!(config.server_count > 1 && server_id < config.server_count);

        let party_id = config.party_count as usize - 1;
        let party_config = &config.parties[party_id];
        let server_config = &party_config.servers[server_id as usize];

        let back = Connection::listen_one(server_config.port as u16)?;
        let siblings = ParallelTransport::connect(server_id, config.server_count, &party_config.servers)?;

        Ok(ParallelBackend {
            server_id,
            server_count: config.server_count,
            back,
            siblings,
            cipher_size: onion::cipher_size(1),
            db,
            input_count: 0,
            queries: Batch::new(),
            state: BackendState::new(),
            onion_skey: party_config.onion_skey.clone(),
        })
    }

    fn handle_query(&mut self, input: Query) -> Response {
        self.state.load_secret(input.tag);
        let key = crate::sharing::incremental::reconstruct(input.tally, &self.state.incremental());
        let row = self.db.lookup(key);
        crate::sharing::additive::additive_reconstruct(row, self.state.preshare())
    }

    fn initialize_batch(&mut self) -> Result<()> {
        self.input_count = self.back.read_count()?;
        self.queries.initialize(self.input_count as usize);
        Ok(())
    }

    fn collect_and_install_secrets(&mut self) -> Result<()> {
        println!("Listening for offline ciphers...");
        for _ in 0..self.input_count {
            let cipher = self.back.read_cipher(self.cipher_size)?;
            let layer = onion::decrypt(&cipher, &self.onion_skey)?;
            let secret = layer.message();
            debug_assert!(layer.next_layer().is_empty());
            self.state.store(secret.tag, secret.share, secret.preshare);
        }
        Ok(())
    }

    /// Exchanges every installed secret with every sibling: whichever
    /// server a future query happens to land on needs to be able to answer
    /// it, regardless of which server originally installed its secret.
    fn broadcast_secrets(&mut self) -> Result<()> {
        println!("Broadcasting secrets...");
        self.siblings.broadcast_count(self.state.len() as u32)?;

        let mut total_read: u32 = 0;
        for id in 0..self.server_count {
            if id != self.server_id {
                total_read += self.siblings.read_count(id)?;
            }
        }

        let to_send: Vec<_> = self
            .state
            .iter()
            .map(|(tag, share, preshare)| (*tag, share, *preshare))
            .collect();

        let poll_rate = crate::transport::poll_rate(crate::types::OfflineSecret::ENCODED_SIZE);
        let mut sent_since_poll = 0usize;

        for (tag, share, preshare) in to_send {
            let secret = crate::types::OfflineSecret {
                tag,
                next_tag: 0,
                share,
                preshare,
            };
            self.siblings.broadcast_secret(&secret)?;
            sent_since_poll += 1;
            while let Some(source) = self.siblings.poll(Duration::from_millis(0))? {
                let secret = self.siblings.read_secret(source)?;
                self.state.store(secret.tag, secret.share, secret.preshare);
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
                    self.state.store(secret.tag, secret.share, secret.preshare);
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
            self.state.store(secret.tag, secret.share, secret.preshare);
            total_read -= 1;
        }
        Ok(())
    }

    pub fn start_offline(&mut self) -> Result<()> {
        self.initialize_batch()?;
        self.state.initialize(false);
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;

        self.collect_and_install_secrets()?;
        self.broadcast_secrets()?;

        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    pub fn simulate_offline(&mut self) -> Result<()> {
        self.initialize_batch()?;
        self.state.initialize(true);
        self.siblings.broadcast_ready()?;
        self.siblings.wait_for_ready()?;
        self.back.send_ready()?;
        Ok(())
    }

    fn collect_queries(&mut self) -> Result<()> {
        println!("Listening for queries...");
        for _ in 0..self.input_count {
            let query = self.back.read_query()?;
            self.queries.push_back(query);
        }
        Ok(())
    }

    fn send_responses(&mut self) -> Result<()> {
        println!("Sending responses...");
        for i in 0..self.queries.len() {
            let response = self.handle_query(self.queries[i]);
            self.back.send_response(response)?;
        }
        self.back.flush()?;
        self.queries.free();
        Ok(())
    }

    pub fn start_online(&mut self) -> Result<()> {
        self.collect_queries()?;
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
    use std::time::Duration as StdDuration;

    fn test_parallel_backend(back_port: u16, sibling_parallel_port: u16) -> ParallelBackend {
        let connect_back = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            Connection::connect("127.0.0.1", back_port)
        });

        let our_parallel_port = sibling_parallel_port + 1;
        let sibling_listener = TcpListener::bind(("127.0.0.1", sibling_parallel_port)).unwrap();
        let sibling_thread = thread::spawn(move || {
            let (stream, _) = sibling_listener.accept().unwrap();
            let mut conn = Connection::from_raw(stream).unwrap();
            let _ = conn.read_sibling_id().unwrap();
            thread::sleep(StdDuration::from_millis(20));
            let mut dial = Connection::connect("127.0.0.1", our_parallel_port).unwrap();
            dial.send_sibling_id(1).unwrap();
        });

        let keys: Vec<_> = (0..3).map(|_| generate_keypair()).collect();
        let config = Config {
            db_size: 100,
            epsilon: 0.0,
            delta: 0.0,
            party_count: 3,
            server_count: 2,
            parties: keys
                .into_iter()
                .map(|(onion_pkey, onion_skey)| crate::config::PartyConfig {
                    shared_seed: 1,
                    servers: vec![
                        crate::config::ServerConfig {
                            local_seed: 7,
                            port: back_port as i32,
                            parallel_port: sibling_parallel_port as i32,
                            ip: "127.0.0.1".into(),
                        },
                        crate::config::ServerConfig {
                            local_seed: 8,
                            port: back_port as i32 + 1,
                            parallel_port: our_parallel_port as i32,
                            ip: "127.0.0.1".into(),
                        },
                    ],
                    onion_pkey,
                    onion_skey,
                })
                .collect(),
        };

        let backend = ParallelBackend::new(0, &config, Database::new(100)).unwrap();
        connect_back.join().unwrap().unwrap();
        sibling_thread.join().unwrap();
        backend
    }

    #[test]
    fn handle_query_unmasks_the_looked_up_row() {
        let mut backend = test_parallel_backend(28790, 28792);
        backend.state.initialize(false);
        let share = crate::types::IncrementalShare { x: 1, y: 1 };
        let preshare = [4u8; crate::types::PRESHARE_SIZE];
        backend.state.store(77, share, preshare);

        let key: crate::types::Key = 11;
        let tally = crate::sharing::incremental::build_tally(key, &[share]);
        let response = backend.handle_query(Query { tag: 77, tally });

        let expected = crate::sharing::additive::additive_reconstruct(backend.db.lookup(key), &preshare);
        assert_eq!(response, expected);
    }
}
