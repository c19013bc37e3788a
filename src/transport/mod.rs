//! Shared Transport + Poller (C2, spec.md §4.2): the single dedicated
//! thread that owns every peer TCP connection and every replication
//! group's consensus state in this process.
//!
//! Grounded on the teacher's `cluster::mod::Cluster::init` (a background
//! thread looping `receiver.recv_timeout` and ticking Raft) and
//! `server::mod::start_server` (non-blocking `TcpListener` plus a
//! `thread::sleep` backoff), generalized from one cluster to many
//! independently-ticked replication groups sharing one set of sockets.

pub mod envelope;
mod peer_conn;

mod handle;

pub use handle::{LoopCommand, TransportHandle};

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use raft::message::{MessageDestination, SendableMessage};

use crate::error::BrokerError;
use crate::replication::{GroupKey, ReplicationGroupState};
use envelope::Envelope;
use peer_conn::PeerConn;

/// Cadence of the poll loop's main pass. Must be fast relative to the
/// consensus election timeout (spec.md §4.2: "tens of milliseconds").
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PollLoop {
    self_addr: String,
    groups: HashMap<GroupKey, ReplicationGroupState>,
    peers: HashMap<String, PeerConn>,
    // Accepted connections whose peer address isn't known yet — learned
    // from the `from` field of their first envelope.
    pending: Vec<PeerConn>,
    cmd_rx: crossbeam_channel::Receiver<LoopCommand>,
    listener: TcpListener,
    shutdown: crossbeam_channel::Receiver<()>,
}

impl PollLoop {
    /// Binds the shared raft-port listener and returns the loop together
    /// with the handle RPC-handler threads use to reach it.
    pub fn bind(
        self_addr: String,
        raft_port: u16,
    ) -> io::Result<(Self, TransportHandle, crossbeam_channel::Sender<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", raft_port))?;
        listener.set_nonblocking(true)?;

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let poll_loop = PollLoop {
            self_addr,
            groups: HashMap::new(),
            peers: HashMap::new(),
            pending: Vec::new(),
            cmd_rx,
            listener,
            shutdown: shutdown_rx,
        };

        Ok((poll_loop, TransportHandle::new(cmd_tx), shutdown_tx))
    }

    /// Runs the poll loop on a dedicated OS thread until shut down.
    pub fn spawn(mut self) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            if self.shutdown.try_recv().is_ok() {
                log::info!("poll loop shutting down");
                return;
            }

            self.accept_incoming();
            self.drain_commands();
            self.poll_peers();
            self.tick_groups();

            thread::sleep(POLL_INTERVAL);
        })
    }

    fn accept_incoming(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => match PeerConn::from_stream(stream) {
                    Ok(conn) => {
                        log::debug!("accepted raft peer connection from {}", addr);
                        self.pending.push(conn);
                    }
                    Err(err) => log::warn!("failed to configure accepted peer socket: {}", err),
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("raft listener accept error: {}", err);
                    break;
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        let commands: Vec<LoopCommand> = self.cmd_rx.try_iter().collect();
        for command in commands {
            match command {
                LoopCommand::RegisterGroup {
                    key,
                    peers,
                    reply_tx,
                } => {
                    if !self.groups.contains_key(&key) {
                        for addr in &peers {
                            self.connect_if_missing(addr);
                        }
                        log::info!("replication group {} installed", key);
                        self.groups.insert(
                            key,
                            ReplicationGroupState::new(self.self_addr.clone(), peers),
                        );
                    }
                    let _ = reply_tx.send(());
                }
                LoopCommand::Append {
                    key,
                    record,
                    reply_tx,
                } => match self.groups.get_mut(&key) {
                    Some(group) => {
                        let messages = group.submit_append(record, reply_tx);
                        self.dispatch(&key, messages);
                    }
                    None => {
                        let _ = reply_tx.send(Err(BrokerError::GroupNotReady));
                    }
                },
                LoopCommand::Drain { key, reply_tx } => match self.groups.get_mut(&key) {
                    Some(group) => {
                        let messages = group.submit_drain(reply_tx);
                        self.dispatch(&key, messages);
                    }
                    None => {
                        let _ = reply_tx.send(Err(BrokerError::GroupNotReady));
                    }
                },
                LoopCommand::Reset { reply_tx } => {
                    log::info!("discarding all replication group bindings (Init)");
                    self.groups.clear();
                    let _ = reply_tx.send(());
                }
            }
        }
    }

    fn poll_peers(&mut self) {
        let mut inbound = Vec::new();
        for conn in self.peers.values_mut() {
            conn.flush_pending();
            inbound.extend(conn.poll_frames());
        }
        inbound.extend(self.poll_pending());

        let mut outbound = Vec::new();
        for envelope in inbound {
            match self.groups.get_mut(&envelope.group) {
                Some(group) => {
                    let messages = group.on_receive(envelope.message, envelope.from);
                    outbound.push((envelope.group, messages));
                }
                None => log::debug!(
                    "dropping raft message for unknown group {}",
                    envelope.group
                ),
            }
        }

        for (key, messages) in outbound {
            self.dispatch(&key, messages);
        }
    }

    fn poll_pending(&mut self) -> Vec<Envelope> {
        let pending = std::mem::take(&mut self.pending);
        let mut identified = Vec::new();
        let mut still_pending = Vec::new();

        for mut conn in pending {
            let mut envelopes = conn.poll_frames();
            if let Some(first) = envelopes.first() {
                let addr = first.from.clone();
                log::debug!("identified peer raft connection as {}", addr);
                self.peers.entry(addr).or_insert(conn);
                identified.append(&mut envelopes);
            } else {
                still_pending.push(conn);
            }
        }

        self.pending = still_pending;
        identified
    }

    fn tick_groups(&mut self) {
        let keys: Vec<GroupKey> = self.groups.keys().cloned().collect();
        for key in keys {
            if let Some(group) = self.groups.get_mut(&key) {
                let messages = group.on_tick();
                self.dispatch(&key, messages);
            }
        }
    }

    fn dispatch(&mut self, key: &GroupKey, messages: Vec<SendableMessage<String>>) {
        if messages.is_empty() {
            return;
        }

        let group_peers: BTreeSet<String> = match self.groups.get(key) {
            Some(group) => group.peers().clone(),
            None => return,
        };

        for sendable in messages {
            match sendable.dest {
                MessageDestination::Broadcast => {
                    for peer in &group_peers {
                        if peer != &self.self_addr {
                            self.send_to(peer, key, sendable.message.clone());
                        }
                    }
                }
                MessageDestination::To(peer) => {
                    self.send_to(&peer, key, sendable.message);
                }
            }
        }
    }

    fn send_to(&mut self, addr: &str, key: &GroupKey, message: raft::message::Message) {
        self.connect_if_missing(addr);
        if let Some(conn) = self.peers.get_mut(addr) {
            conn.send(&Envelope {
                group: key.clone(),
                from: self.self_addr.clone(),
                message,
            });
        }
    }

    fn connect_if_missing(&mut self, addr: &str) {
        if addr == self.self_addr || self.peers.contains_key(addr) {
            return;
        }

        match PeerConn::connect(addr) {
            Ok(conn) => {
                self.peers.insert(addr.to_string(), conn);
            }
            Err(err) => log::debug!("could not connect to raft peer {}: {}", addr, err),
        }
    }
}
