//! A single TCP connection to one peer raft-port, shared across every
//! replication group in the process (spec.md §4.2, "one TCP connection per
//! peer node... shared across all groups").

use std::convert::TryInto;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use super::envelope::Envelope;

pub struct PeerConn {
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl PeerConn {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(PeerConn {
            stream,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        })
    }

    /// Queues `envelope`'s framed bytes and attempts to flush immediately.
    /// Any tail the non-blocking socket won't accept right now stays
    /// buffered — `flush_pending` retries it on a later poll pass, so a
    /// partial write never desyncs the length-prefixed frame boundary.
    pub fn send(&mut self, envelope: &Envelope) {
        let body = envelope.encode();
        self.write_buf.reserve(4 + body.len());
        self.write_buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.write_buf.extend_from_slice(&body);
        self.flush_pending();
    }

    /// Writes as much of the buffered queue as the socket accepts without
    /// blocking, retaining any unsent tail for the next call.
    pub fn flush_pending(&mut self) {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("failed writing to peer raft connection: {}", err);
                    break;
                }
            }
        }
    }

    /// Reads whatever is currently available without blocking and returns
    /// every complete frame that has accumulated.
    pub fn poll_frames(&mut self) -> Vec<Envelope> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::debug!("peer raft connection read error: {}", err);
                    break;
                }
            }
        }

        let mut envelopes = Vec::new();
        loop {
            if self.read_buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(self.read_buf[0..4].try_into().unwrap()) as usize;
            if self.read_buf.len() < 4 + len {
                break;
            }

            let body: Vec<u8> = self.read_buf.drain(0..4 + len).skip(4).collect();
            match Envelope::decode(&body) {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => log::warn!("dropping malformed raft frame: {:?}", err),
            }
        }

        envelopes
    }
}
