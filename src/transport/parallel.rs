//! Connections between the `server_count - 1` sibling servers of one party,
//! used by the parallel shuffle and by backend secret broadcast.
//!
//! Each pair of siblings opens exactly one connection: the lower-numbered
//! server listens, the higher-numbered one dials in and announces its id
//! first (the same accept-then-identify handshake used elsewhere in this
//! crate's TCP layer). Waiting for "whichever sibling has data next" — the
//! original's `poll(2)` over raw fds — is replaced here by a non-blocking
//! `peek` sweep across siblings, which is the std-only equivalent without
//! reaching for an async runtime the rest of this crate doesn't use.

use std::net::TcpListener;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::containers::ServersMap;
use crate::error::Result;
use crate::transport::tcp::Connection;
use crate::types::{OfflineSecret, Query, Response, ServerId};

pub struct ParallelTransport {
    server_id: ServerId,
    server_count: ServerId,
    connections: ServersMap<Connection>,
    poll_cursor: ServerId,
}

impl ParallelTransport {
    /// Connects to every sibling server in `servers` (indexed by server id,
    /// including this server's own unused slot).
    pub fn connect(server_id: ServerId, server_count: ServerId, servers: &[ServerConfig]) -> Result<Self> {
        assert_eq!(servers.len(), server_count as usize);

        let lower_count = server_id as usize;
        let listener = if lower_count > 0 {
            Some(TcpListener::bind(("0.0.0.0", servers[server_id as usize].parallel_port as u16))?)
        } else {
            None
        };

        let mut connections: ServersMap<Option<Connection>> =
            ServersMap::new_with(server_id, server_count, |_| None);

        // Accept from every sibling with a lower id; they announce themselves.
        if let Some(listener) = listener {
            for _ in 0..lower_count {
                let (stream, _) = listener.accept()?;
                let mut conn = Connection::from_raw(stream)?;
                let who = conn.read_sibling_id()?;
                *connections.get_mut(who) = Some(conn);
            }
        }

        // Dial every sibling with a higher id, announcing ourselves.
        for target in (server_id + 1)..server_count {
            let ip = &servers[target as usize].ip;
            let port = servers[target as usize].parallel_port as u16;
            let mut conn = Connection::connect(ip, port)?;
            conn.send_sibling_id(server_id)?;
            *connections.get_mut(target) = Some(conn);
        }

        let connections = connections.map(|c| c.expect("every sibling slot filled"));

        Ok(ParallelTransport {
            server_id,
            server_count,
            connections,
            poll_cursor: 0,
        })
    }

    fn conn(&mut self, id: ServerId) -> &mut Connection {
        self.connections.get_mut(id)
    }

    pub fn send_count(&mut self, target: ServerId, count: u32) -> Result<()> {
        self.conn(target).send_count(count)
    }

    pub fn broadcast_count(&mut self, count: u32) -> Result<()> {
        for id in 0..self.server_count {
            if id != self.server_id {
                self.send_count(id, count)?;
            }
        }
        Ok(())
    }

    pub fn read_count(&mut self, source: ServerId) -> Result<u32> {
        self.conn(source).read_count()
    }

    pub fn broadcast_ready(&mut self) -> Result<()> {
        for id in 0..self.server_count {
            if id != self.server_id {
                self.conn(id).send_ready()?;
            }
        }
        Ok(())
    }

    pub fn wait_for_ready(&mut self) -> Result<()> {
        for id in 0..self.server_count {
            if id != self.server_id {
                self.conn(id).wait_for_ready()?;
            }
        }
        Ok(())
    }

    /// Returns the first sibling (round-robin, to avoid starving any one
    /// sibling) observed to have unread bytes, or `None` if nobody does
    /// before `timeout` elapses.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<ServerId>> {
        let deadline = Instant::now() + timeout;
        loop {
            for offset in 0..self.server_count {
                let id = (self.poll_cursor + offset) % self.server_count;
                if id == self.server_id {
                    continue;
                }
                if self.conn(id).has_data_ready()? {
                    self.poll_cursor = (id + 1) % self.server_count;
                    return Ok(Some(id));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_micros(200));
        }
    }

    pub fn send_cipher(&mut self, target: ServerId, cipher: &[u8]) -> Result<()> {
        self.conn(target).send_cipher(cipher)
    }

    pub fn read_cipher(&mut self, source: ServerId, cipher_size: usize) -> Result<Vec<u8>> {
        self.conn(source).read_cipher(cipher_size)
    }

    pub fn send_query(&mut self, target: ServerId, query: Query) -> Result<()> {
        self.conn(target).send_query(query)
    }

    pub fn read_query(&mut self, source: ServerId) -> Result<Query> {
        self.conn(source).read_query()
    }

    pub fn send_response(&mut self, target: ServerId, response: Response) -> Result<()> {
        self.conn(target).send_response(response)
    }

    pub fn read_response(&mut self, source: ServerId) -> Result<Response> {
        self.conn(source).read_response()
    }

    pub fn broadcast_secret(&mut self, secret: &OfflineSecret) -> Result<()> {
        for id in 0..self.server_count {
            if id != self.server_id {
                self.conn(id).send_offline_secret(secret)?;
            }
        }
        Ok(())
    }

    pub fn read_secret(&mut self, source: ServerId) -> Result<OfflineSecret> {
        self.conn(source).read_offline_secret()
    }

    pub fn flush(&mut self, target: ServerId) -> Result<()> {
        self.conn(target).flush()
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for id in 0..self.server_count {
            if id != self.server_id {
                self.flush(id)?;
            }
        }
        Ok(())
    }
}

