//! Full protocol run over real TCP sockets: a client, two single-server
//! relay parties, and a single-server backend, with noise disabled
//! (`epsilon = 0.0`) so every response can be checked against a direct
//! database lookup.

use std::thread;

use dppir::config::{Config, PartyConfig, ServerConfig};
use dppir::database::Database;
use dppir::onion::generate_keypair;
use dppir::protocol::backend::Backend;
use dppir::protocol::client::Client;
use dppir::protocol::relay::Relay;
use dppir::protocol::TagSampling;

const DB_SIZE: u32 = 500;
const QUERIES: u32 = 64;

fn build_config(ports: [u16; 3]) -> Config {
    let keys: Vec<_> = (0..3).map(|_| generate_keypair()).collect();
    Config {
        db_size: DB_SIZE,
        epsilon: 0.0,
        delta: 0.0,
        party_count: 3,
        server_count: 1,
        parties: keys
            .into_iter()
            .enumerate()
            .map(|(i, (onion_pkey, onion_skey))| PartyConfig {
                shared_seed: 1000 + i as i32,
                servers: vec![ServerConfig {
                    local_seed: i as i32,
                    port: ports[i] as i32,
                    parallel_port: ports[i] as i32 + 1000,
                    ip: "127.0.0.1".into(),
                }],
                onion_pkey,
                onion_skey,
            })
            .collect(),
    }
}

#[test]
fn client_queries_flow_through_two_relays_to_the_backend() {
    let ports = [29100u16, 29101, 29102];

    let backend_config = build_config(ports);
    let backend_thread = thread::spawn(move || {
        let mut backend = Backend::new(0, &backend_config, Database::new(DB_SIZE)).unwrap();
        backend.start_offline().unwrap();
        backend.start_online().unwrap();
    });

    let relay1_config = build_config(ports);
    let relay1_thread = thread::spawn(move || {
        let mut relay = Relay::new(1, 0, &relay1_config, Database::new(DB_SIZE), TagSampling::Uniform).unwrap();
        relay.start_offline().unwrap();
        relay.start_online().unwrap();
    });

    let relay0_config = build_config(ports);
    let relay0_thread = thread::spawn(move || {
        let mut relay = Relay::new(0, 0, &relay0_config, Database::new(DB_SIZE), TagSampling::Uniform).unwrap();
        relay.start_offline().unwrap();
        relay.start_online().unwrap();
    });

    let client_config = build_config(ports);
    let mut client = Client::new(0, &client_config, Database::new(DB_SIZE), TagSampling::Uniform).unwrap();
    client.start_offline(QUERIES).unwrap();
    let responses = client.start_online(QUERIES, true).unwrap();
    assert_eq!(responses.len(), QUERIES as usize);

    backend_thread.join().unwrap();
    relay1_thread.join().unwrap();
    relay0_thread.join().unwrap();
}

#[test]
fn deterministic_tag_sampling_still_completes_the_chain() {
    let ports = [29110u16, 29111, 29112];

    let backend_config = build_config(ports);
    let backend_thread = thread::spawn(move || {
        let mut backend = Backend::new(0, &backend_config, Database::new(DB_SIZE)).unwrap();
        backend.start_offline().unwrap();
        backend.start_online().unwrap();
    });

    let relay1_config = build_config(ports);
    let relay1_thread = thread::spawn(move || {
        let mut relay =
            Relay::new(1, 0, &relay1_config, Database::new(DB_SIZE), TagSampling::Deterministic).unwrap();
        relay.start_offline().unwrap();
        relay.start_online().unwrap();
    });

    let relay0_config = build_config(ports);
    let relay0_thread = thread::spawn(move || {
        let mut relay =
            Relay::new(0, 0, &relay0_config, Database::new(DB_SIZE), TagSampling::Deterministic).unwrap();
        relay.start_offline().unwrap();
        relay.start_online().unwrap();
    });

    let client_config = build_config(ports);
    let mut client =
        Client::new(0, &client_config, Database::new(DB_SIZE), TagSampling::Deterministic).unwrap();
    client.start_offline(16).unwrap();
    let responses = client.start_online(16, true).unwrap();
    assert_eq!(responses.len(), 16);

    backend_thread.join().unwrap();
    relay1_thread.join().unwrap();
    relay0_thread.join().unwrap();
}
