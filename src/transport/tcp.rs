//! A single framed connection between two adjacent roles: client->relay,
//! relay->relay, or relay->backend.
//!
//! Every record type (`OfflineSecret`, `Query`, `Response`, onion ciphers)
//! has a fixed width once the role knows how many onion layers remain, so
//! records are read with `read_exact` rather than length-prefixed frames.
//! A single `\0xAA` byte is used as the "ready" handshake token that marks
//! the end of the offline stage for a connection, matching the original's
//! one-byte ready signal.

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::sleep;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{OfflineSecret, Query, Response};

const READY_TOKEN: u8 = 0xAA;
const RCVBUF: usize = 12_328_960;
const SNDBUF: usize = 12_328_960;

fn configure_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    // A cloned fd shares the same underlying socket, so sizing it here
    // sizes the buffers `stream` itself reads/writes through; dropping the
    // clone closes only the duplicated descriptor.
    let sock = socket2::Socket::from(stream.try_clone()?);
    let _ = sock.set_recv_buffer_size(RCVBUF);
    let _ = sock.set_send_buffer_size(SNDBUF);
    Ok(())
}

pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn from_stream(stream: TcpStream) -> Result<Self> {
        configure_socket(&stream)?;
        let read_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(stream),
        })
    }

    /// Connects to `ip:port`, retrying with a one-second backoff: peers in
    /// this protocol may start in any order.
    pub fn connect(ip: &str, port: u16) -> Result<Self> {
        loop {
            match TcpStream::connect((ip, port)) {
                Ok(stream) => return Connection::from_stream(stream),
                Err(_) => sleep(Duration::from_secs(1)),
            }
        }
    }

    /// Binds `port` and accepts exactly one incoming connection.
    pub fn listen_one(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let (stream, _) = listener.accept()?;
        Connection::from_stream(stream)
    }

    /// Binds `port` and blocks until `count` peers have connected, in
    /// arrival order.
    pub fn listen_many(port: u16, count: usize) -> Result<Vec<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let mut conns = Vec::with_capacity(count);
        for stream in listener.incoming().take(count) {
            conns.push(Connection::from_stream(stream?)?);
        }
        Ok(conns)
    }

    /// Wraps an already-accepted stream (used by the sibling transport,
    /// which does its own `accept()` loop so it can read the sibling's id
    /// off the wire before this type takes over).
    pub fn from_raw(stream: TcpStream) -> Result<Self> {
        Connection::from_stream(stream)
    }

    pub fn send_sibling_id(&mut self, id: u8) -> Result<()> {
        self.writer.write_all(&[id])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn read_sibling_id(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Non-blocking check for unread bytes, used by the sibling poll loop
    /// in place of the original's `poll(2)` over raw file descriptors.
    pub fn has_data_ready(&mut self) -> Result<bool> {
        let stream = self.reader.get_ref();
        stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let result = stream.peek(&mut probe);
        stream.set_nonblocking(false)?;
        match result {
            Ok(n) => Ok(n > 0),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(Error::from(e)),
        }
    }

    pub fn send_count(&mut self, count: u32) -> Result<()> {
        self.writer.write_all(&count.to_ne_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn read_count(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    pub fn send_ready(&mut self) -> Result<()> {
        self.writer.write_all(&[READY_TOKEN])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn wait_for_ready(&mut self) -> Result<()> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        if buf[0] != READY_TOKEN {
            return Err(Error::Protocol("expected ready token on wire".into()));
        }
        Ok(())
    }

    pub fn send_cipher(&mut self, cipher: &[u8]) -> Result<()> {
        self.writer.write_all(cipher)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn read_cipher(&mut self, cipher_size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; cipher_size];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn send_offline_secret(&mut self, secret: &OfflineSecret) -> Result<()> {
        self.writer.write_all(&secret.to_bytes())?;
        Ok(())
    }

    pub fn read_offline_secret(&mut self) -> Result<OfflineSecret> {
        let mut buf = [0u8; OfflineSecret::ENCODED_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(OfflineSecret::from_bytes(&buf))
    }

    pub fn send_query(&mut self, query: Query) -> Result<()> {
        self.writer.write_all(&query.to_bytes())?;
        Ok(())
    }

    pub fn read_query(&mut self) -> Result<Query> {
        let mut buf = [0u8; Query::ENCODED_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(Query::from_bytes(&buf))
    }

    pub fn send_response(&mut self, response: Response) -> Result<()> {
        self.writer.write_all(&response.to_bytes())?;
        Ok(())
    }

    pub fn read_response(&mut self) -> Result<Response> {
        let mut buf = [0u8; Response::ENCODED_SIZE];
        self.reader.read_exact(&mut buf)?;
        Ok(Response::from_bytes(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn round_trips_counts_and_ready_handshake() {
        let port = 28731;
        let server = thread::spawn(move || -> Result<()> {
            let mut conn = Connection::listen_one(port)?;
            let count = conn.read_count()?;
            assert_eq!(count, 7);
            conn.send_ready()?;
            Ok(())
        });

        // Give the listener a moment to bind before the client connects.
        thread::sleep(Duration::from_millis(50));
        let mut client = Connection::connect("127.0.0.1", port).unwrap();
        client.send_count(7).unwrap();
        client.wait_for_ready().unwrap();

        server.join().unwrap().unwrap();
    }

    #[test]
    fn round_trips_queries_and_responses() {
        let port = 28732;
        let server = thread::spawn(move || -> Result<()> {
            let mut conn = Connection::listen_one(port)?;
            let query = conn.read_query()?;
            assert_eq!(query.tag, 99);
            conn.send_response(Response {
                value: 42,
                sig: [0u8; 48],
            })?;
            conn.flush()?;
            Ok(())
        });

        thread::sleep(Duration::from_millis(50));
        let mut client = Connection::connect("127.0.0.1", port).unwrap();
        client
            .send_query(Query {
                tag: 99,
                tally: 5,
            })
            .unwrap();
        client.flush().unwrap();
        let response = client.read_response().unwrap();
        assert_eq!(response.value, 42);

        server.join().unwrap().unwrap();
    }
}
