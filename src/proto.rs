//! Generated `tonic`/`prost` message and service types, compiled by
//! `build.rs` from `proto/broker.proto` and `proto/manager.proto`.

pub mod broker {
    tonic::include_proto!("partbroker.broker");
}

pub mod manager {
    tonic::include_proto!("partbroker.manager");
}
