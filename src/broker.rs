//! Top-level broker process wiring (C1–C6): assembles the transport poll
//! loop, transaction processor, manager link and RPC surface into one
//! running broker.
//!
//! Grounded on `server::mod::Server`'s `ServerState` lifecycle: an
//! `mpb::MPB`-backed state bus plus a `change_state` helper that posts a
//! state change and blocks until its post-state is observed, generalized
//! from a single-threaded Redis listener to a tonic server running on a
//! dedicated tokio runtime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use mpb::MPB;

use crate::config::Config;
use crate::manager_link::{self, ManagerLinkConfig};
use crate::rpc::BrokerRpc;
use crate::transaction::TransactionProcessor;
use crate::transport::PollLoop;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum ServerState {
    Start,
    Started,
    Stop,
    Stopped,
    Timeout,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub broker_id: String,
    pub host: String,
    pub port: u16,
    pub raft_port: u16,
    pub manager_addr: String,
    pub token: String,
}

impl BrokerOptions {
    pub fn from_config(config: &Config, port: u16, raft_port: u16) -> Self {
        BrokerOptions {
            broker_id: config.host.clone(),
            host: config.host.clone(),
            port,
            raft_port,
            manager_addr: format!("http://{}:{}", config.server_host, config.server_port),
            token: config.token.clone(),
        }
    }
}

pub struct Broker {
    state_bus: MPB<ServerState>,
    options: BrokerOptions,
}

impl Broker {
    pub fn new(options: BrokerOptions) -> Self {
        let broker = Broker {
            state_bus: MPB::new(),
            options,
        };
        broker.init_configuration();
        broker
    }

    fn init_configuration(&self) {
        let state_recv = self.state_bus.receiver();
        let state_send = self.state_bus.sender();
        let options = self.options.clone();

        let _ = thread::spawn(move || loop {
            if let Ok(ServerState::Start) = state_recv.recv() {
                run_broker(&options, &state_send, &state_recv);
            }
        });
    }

    fn change_state(&self, change_to: ServerState) -> Option<ServerState> {
        let send_state_ch = self.state_bus.sender();

        let post_change_to_state = match change_to {
            ServerState::Start => ServerState::Started,
            ServerState::Stop => ServerState::Stopped,
            ServerState::Started
            | ServerState::Stopped
            | ServerState::Timeout
            | ServerState::Error(_) => return None,
        };

        let _ = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let _ = send_state_ch.send(change_to);
        });

        let receiver = self.state_bus.receiver();
        while let Ok(server_state) = receiver.recv_timeout(Duration::from_secs(5)) {
            if server_state == post_change_to_state {
                return Some(server_state);
            }
        }

        Some(ServerState::Timeout)
    }

    pub fn start(&self) -> Option<ServerState> {
        self.change_state(ServerState::Start)
    }

    pub fn stop(&self) -> Option<ServerState> {
        self.change_state(ServerState::Stop)
    }
}

fn run_broker(
    options: &BrokerOptions,
    state_send: &Sender<ServerState>,
    state_recv: &Receiver<ServerState>,
) {
    let (poll_loop, transport, _raft_shutdown) = match PollLoop::bind(
        format!("{}:{}", options.host, options.raft_port),
        options.raft_port,
    ) {
        Ok(parts) => parts,
        Err(err) => {
            let _ = state_send.send(ServerState::Error(err.to_string()));
            return;
        }
    };
    let _poll_handle = poll_loop.spawn();

    let processor = Arc::new(TransactionProcessor::new(transport));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("broker rpc")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = state_send.send(ServerState::Error(err.to_string()));
            return;
        }
    };

    let _manager_handle = manager_link::spawn(
        runtime.handle().clone(),
        ManagerLinkConfig {
            manager_addr: options.manager_addr.clone(),
            broker_id: options.broker_id.clone(),
            host: options.host.clone(),
            port: options.port,
            token: options.token.clone(),
            raft_port: options.raft_port,
        },
    );

    let addr: SocketAddr = match format!("0.0.0.0:{}", options.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            let _ = state_send.send(ServerState::Error(err.to_string()));
            return;
        }
    };

    let rpc = BrokerRpc::new(processor).into_server();
    let _ = state_send.send(ServerState::Started);

    // Non-blocking poll for the `Stop` signal, same shape as
    // `server::util::stop_sig_received`'s `try_recv` check, just run from
    // an async task instead of a loop iteration.
    let state_recv_for_shutdown = state_recv.clone();
    let state_send_for_shutdown = state_send.clone();

    runtime.block_on(async move {
        let serving = tonic::transport::Server::builder()
            .add_service(rpc)
            .serve_with_shutdown(addr, async move {
                loop {
                    if let Ok(ServerState::Stop) = state_recv_for_shutdown.try_recv() {
                        let _ = state_send_for_shutdown.send(ServerState::Stopped);
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });

        if let Err(err) = serving.await {
            log::error!("broker rpc server error: {}", err);
        }
    });
}
