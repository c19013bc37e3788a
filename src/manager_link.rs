//! Manager Link (C4, spec.md §4.4): keeps this broker registered with the
//! cluster manager, re-registering on every reconnect.
//!
//! Grounded on `original_source/src/broker/broker.py`'s `ManagerConnection`
//! (`health_check` / `register_broker_if_required`), translated into the
//! teacher's thread-plus-channel idiom (`cluster::mod::Cluster::init`'s
//! background thread looping on a fixed cadence).

use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::proto::manager::manager_service_client::ManagerServiceClient;
use crate::proto::manager::{BrokerDetails, HeartBeat};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ManagerLinkConfig {
    pub manager_addr: String,
    pub broker_id: String,
    pub host: String,
    pub port: u16,
    pub token: String,
    pub raft_port: u16,
}

/// Spawns the heartbeat/registration thread. Runs until the process exits —
/// there is no graceful shutdown path, matching spec.md §4.4's "process
/// lifetime" scope.
pub fn spawn(rt: Handle, config: ManagerLinkConfig) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Edge-triggered: only log on the transitions, not every tick.
        let mut connected = false;
        let mut registered = false;

        loop {
            let healthy = rt.block_on(health_check(&config.manager_addr, &config.broker_id));

            if healthy {
                if !connected {
                    log::info!("Manager connected.");
                }
                connected = true;
            } else {
                if connected {
                    log::warn!("Manager disconnected, retrying...");
                }
                connected = false;
                registered = false;
            }

            if connected && !registered {
                registered = rt.block_on(register_broker(&config));
                if registered {
                    log::info!("registered with manager as broker {}", config.broker_id);
                }
            }

            thread::sleep(HEARTBEAT_INTERVAL);
        }
    })
}

async fn health_check(manager_addr: &str, broker_id: &str) -> bool {
    let client = ManagerServiceClient::connect(manager_addr.to_string()).await;
    match client {
        Ok(mut client) => client
            .health_check(HeartBeat {
                broker_id: broker_id.to_string(),
            })
            .await
            .is_ok(),
        Err(err) => {
            log::debug!("manager health check connect failed: {}", err);
            false
        }
    }
}

async fn register_broker(config: &ManagerLinkConfig) -> bool {
    let client = ManagerServiceClient::connect(config.manager_addr.clone()).await;
    let mut client = match client {
        Ok(client) => client,
        Err(err) => {
            log::debug!("manager register connect failed: {}", err);
            return false;
        }
    };

    let request = BrokerDetails {
        host: config.host.clone(),
        port: config.port as u32,
        token: config.token.clone(),
        raft_port: config.raft_port as u32,
    };

    match client.register_broker(request).await {
        Ok(response) => response.into_inner().status,
        Err(err) => {
            log::warn!("register_broker rpc failed: {}", err);
            false
        }
    }
}
