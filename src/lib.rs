pub mod broker;
pub mod config;
pub mod error;
pub mod manager_link;
pub mod model;
pub mod proto;
pub mod publish_lock;
pub mod replication;
pub mod rpc;
pub mod transaction;
pub mod transport;
