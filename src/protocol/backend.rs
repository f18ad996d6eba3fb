//! A single-server backend: the database-holding last party in the chain.
//! Unlike a relay, it never forwards onion ciphers or queries onward — it
//! resolves the incremental tally into a key, looks the row up, and masks
//! it with its own additive share before sending the response back up the
//! chain.

use crate::config::Config;
use crate::containers::Batch;
use crate::database::Database;
use crate::error::Result;
use crate::onion;
use crate::state::BackendState;
use crate::transport::tcp::Connection;
use crate::types::{Query, Response};

pub struct Backend {
    back: Connection,
    cipher_size: usize,
    db: Database,
    input_count: u32,
    queries: Batch<Query>,
    state: BackendState,
    onion_skey: crypto_box::SecretKey,
}

impl Backend {
    pub fn new(server_id: u8, config: &Config, db: Database) -> Result<Self> {
        assert!(config.party_count >= 2);
        assert_eq!(config.server_count, 1);

        let party_id = config.party_count as usize - 1;
        let party_config = &config.parties[party_id];
        let server_config = &party_config.servers[server_id as usize];

        let back = Connection::listen_one(server_config.port as u16)?;

        Ok(Backend {
            back,
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

    pub fn start_offline(&mut self) -> Result<()> {
        self.initialize_batch()?;
        self.state.initialize(false);
        self.back.send_ready()?;
        self.collect_and_install_secrets()?;
        self.back.send_ready()?;
        Ok(())
    }

    pub fn simulate_offline(&mut self) -> Result<()> {
        self.initialize_batch()?;
        self.state.initialize(true);
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
