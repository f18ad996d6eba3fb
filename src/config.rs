//! Deployment configuration: per-party/server network and key material,
//! serialized to a fixed native-endian binary layout.
//!
//! The layout intentionally matches `original_source/DPPIR/config/config.cc`
//! byte-for-byte (raw `int`/`double` fields, NUL-terminated IP strings) —
//! this is a single-host experimental protocol, not a cross-architecture
//! wire format, so native rather than network byte order is preserved on
//! purpose.

use std::fs;
use std::path::Path;

use crypto_box::{PublicKey, SecretKey};

use crate::error::{Error, Result};
use crate::types::{Key, PartyId, ServerId};

pub const ONION_PKEY_SIZE: usize = 32;
pub const ONION_SKEY_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub local_seed: i32,
    pub port: i32,
    pub parallel_port: i32,
    pub ip: String,
}

#[derive(Clone)]
pub struct PartyConfig {
    pub shared_seed: i32,
    pub servers: Vec<ServerConfig>,
    pub onion_pkey: PublicKey,
    pub onion_skey: SecretKey,
}

impl std::fmt::Debug for PartyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyConfig")
            .field("shared_seed", &self.shared_seed)
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_size: Key,
    pub epsilon: f64,
    pub delta: f64,
    pub party_count: PartyId,
    pub server_count: ServerId,
    pub parties: Vec<PartyConfig>,
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn push_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn read_i32(data: &[u8], pos: &mut usize) -> Result<i32> {
    let bytes = data
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::Config("truncated config: expected i32".into()))?;
    *pos += 4;
    Ok(i32::from_ne_bytes(bytes.try_into().unwrap()))
}

fn read_f64(data: &[u8], pos: &mut usize) -> Result<f64> {
    let bytes = data
        .get(*pos..*pos + 8)
        .ok_or_else(|| Error::Config("truncated config: expected f64".into()))?;
    *pos += 8;
    Ok(f64::from_ne_bytes(bytes.try_into().unwrap()))
}

fn read_bytes<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let bytes = data
        .get(*pos..*pos + n)
        .ok_or_else(|| Error::Config("truncated config: expected fixed-size field".into()))?;
    *pos += n;
    Ok(bytes)
}

fn read_cstr(data: &[u8], pos: &mut usize) -> Result<String> {
    let rest = &data[*pos..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Config("config ip string missing NUL terminator".into()))?;
    let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
    *pos += nul + 1;
    Ok(s)
}

impl Config {
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::new();
        push_i32(&mut data, self.db_size as i32);
        push_f64(&mut data, self.epsilon);
        push_f64(&mut data, self.delta);
        push_i32(&mut data, self.party_count as i32);
        push_i32(&mut data, self.server_count as i32);

        assert_eq!(self.parties.len(), self.party_count as usize);
        for party in &self.parties {
            push_i32(&mut data, party.shared_seed);
            data.extend_from_slice(party.onion_pkey.as_bytes());
            data.extend_from_slice(&party.onion_skey.to_bytes());
            assert_eq!(party.servers.len(), self.server_count as usize);
            for server in &party.servers {
                push_i32(&mut data, server.local_seed);
                push_i32(&mut data, server.port);
                push_i32(&mut data, server.parallel_port);
                data.extend_from_slice(server.ip.as_bytes());
                data.push(0);
            }
        }
        data
    }

    pub fn deserialize(data: &[u8]) -> Result<Config> {
        let mut pos = 0usize;
        let db_size = read_i32(data, &mut pos)? as Key;
        let epsilon = read_f64(data, &mut pos)?;
        let delta = read_f64(data, &mut pos)?;
        let party_count = read_i32(data, &mut pos)? as PartyId;
        let server_count = read_i32(data, &mut pos)? as ServerId;

        let mut parties = Vec::with_capacity(party_count as usize);
        for _ in 0..party_count {
            let shared_seed = read_i32(data, &mut pos)?;
            let pkey_bytes = read_bytes(data, &mut pos, ONION_PKEY_SIZE)?;
            let skey_bytes = read_bytes(data, &mut pos, ONION_SKEY_SIZE)?;
            let onion_pkey = PublicKey::from(<[u8; ONION_PKEY_SIZE]>::try_from(pkey_bytes).unwrap());
            let onion_skey =
                SecretKey::from(<[u8; ONION_SKEY_SIZE]>::try_from(skey_bytes).unwrap());

            let mut servers = Vec::with_capacity(server_count as usize);
            for _ in 0..server_count {
                let local_seed = read_i32(data, &mut pos)?;
                let port = read_i32(data, &mut pos)?;
                let parallel_port = read_i32(data, &mut pos)?;
                let ip = read_cstr(data, &mut pos)?;
                servers.push(ServerConfig {
                    local_seed,
                    port,
                    parallel_port,
                    ip,
                });
            }
            parties.push(PartyConfig {
                shared_seed,
                servers,
                onion_pkey,
                onion_skey,
            });
        }

        if pos != data.len() {
            return Err(Error::Config(format!(
                "config had {} trailing bytes after parsing",
                data.len() - pos
            )));
        }

        Ok(Config {
            db_size,
            epsilon,
            delta,
            party_count,
            server_count,
            parties,
        })
    }

    pub fn read_file(path: impl AsRef<Path>) -> Result<Config> {
        let data = fs::read(path).map_err(Error::Transport)?;
        Config::deserialize(&data)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize()).map_err(Error::Transport)
    }
}

/// Builds the server/seed/port conventions every generated config shares:
/// `local_seed = party*server_count + server`, `port = 3000 + that`,
/// `parallel_port = 4000 + that`, `shared_seed = party + 1000`.
pub fn default_server_config(party: PartyId, server: ServerId, server_count: ServerId, ip: String) -> ServerConfig {
    let flat = party as i32 * server_count as i32 + server as i32;
    ServerConfig {
        local_seed: flat,
        port: 3000 + flat,
        parallel_port: 4000 + flat,
        ip,
    }
}

pub fn default_shared_seed(party: PartyId) -> i32 {
    party as i32 + 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onion::generate_keypair;

    fn sample_config() -> Config {
        let (pkey0, skey0) = generate_keypair();
        let (pkey1, skey1) = generate_keypair();
        Config {
            db_size: 1000,
            epsilon: 1.0,
            delta: 1e-6,
            party_count: 2,
            server_count: 1,
            parties: vec![
                PartyConfig {
                    shared_seed: default_shared_seed(0),
                    servers: vec![default_server_config(0, 0, 1, "127.0.0.1".into())],
                    onion_pkey: pkey0,
                    onion_skey: skey0,
                },
                PartyConfig {
                    shared_seed: default_shared_seed(1),
                    servers: vec![default_server_config(1, 0, 1, "127.0.0.1".into())],
                    onion_pkey: pkey1,
                    onion_skey: skey1,
                },
            ],
        }
    }

    #[test]
    fn round_trips_through_serialize() {
        let config = sample_config();
        let bytes = config.serialize();
        let parsed = Config::deserialize(&bytes).unwrap();

        assert_eq!(parsed.db_size, config.db_size);
        assert_eq!(parsed.epsilon, config.epsilon);
        assert_eq!(parsed.delta, config.delta);
        assert_eq!(parsed.party_count, config.party_count);
        assert_eq!(parsed.server_count, config.server_count);
        assert_eq!(parsed.parties.len(), config.parties.len());
        for (a, b) in parsed.parties.iter().zip(config.parties.iter()) {
            assert_eq!(a.shared_seed, b.shared_seed);
            assert_eq!(a.onion_pkey.as_bytes(), b.onion_pkey.as_bytes());
            assert_eq!(a.onion_skey.to_bytes(), b.onion_skey.to_bytes());
            for (sa, sb) in a.servers.iter().zip(b.servers.iter()) {
                assert_eq!(sa.local_seed, sb.local_seed);
                assert_eq!(sa.port, sb.port);
                assert_eq!(sa.parallel_port, sb.parallel_port);
                assert_eq!(sa.ip, sb.ip);
            }
        }
    }

    #[test]
    fn rejects_truncated_data() {
        let config = sample_config();
        let mut bytes = config.serialize();
        bytes.truncate(bytes.len() - 5);
        assert!(Config::deserialize(&bytes).is_err());
    }
}
