//! Broker RPC Surface (C5, spec.md §4.5): the tonic service implementation
//! that fronts the Transaction Processor (C3) for both broker-to-broker and
//! controller-to-broker calls.
//!
//! Grounded on `examples/AhmedSoliman-restate/crates/node-admin/src/handler.rs`'s
//! `impl Trait for Handler` shape. `GetUpdates` streaming is adapted from the
//! same crate's transport wiring to a bounded `tokio::sync::mpsc` +
//! `ReceiverStream`, since C3 exposes only a blocking `drain`, not a native
//! stream.

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::proto::broker::broker_service_server::{BrokerService, BrokerServiceServer};
use crate::proto::broker::{Query, TransactionRequest, TransactionResponse, UpdatesRequest};
use crate::transaction::TransactionProcessor;

/// Size of the per-call update stream buffer. A handful of in-flight queries
/// is plenty — the producer side (`spawn_blocking`) stops as soon as the
/// receiver is dropped.
const UPDATES_CHANNEL_CAPACITY: usize = 32;

pub struct BrokerRpc {
    processor: Arc<TransactionProcessor>,
}

impl BrokerRpc {
    pub fn new(processor: Arc<TransactionProcessor>) -> Self {
        BrokerRpc { processor }
    }

    pub fn into_server(self) -> BrokerServiceServer<Self> {
        BrokerServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl BrokerService for BrokerRpc {
    async fn send_transaction(
        &self,
        request: Request<TransactionRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        let data = request.into_inner().data;
        let processor = self.processor.clone();

        let result = tokio::task::spawn_blocking(move || processor.apply_wire(&data))
            .await
            .map_err(|err| Status::internal(format!("transaction task panicked: {}", err)))?;

        let body = serde_json::to_vec(&result).map_err(|err| {
            Status::internal(format!("failed to encode transaction result: {}", err))
        })?;

        Ok(Response::new(TransactionResponse { data: body }))
    }

    type GetUpdatesStream = ReceiverStream<Result<Query, Status>>;

    async fn get_updates(
        &self,
        request: Request<UpdatesRequest>,
    ) -> Result<Response<Self::GetUpdatesStream>, Status> {
        let UpdatesRequest { topic, partition } = request.into_inner();
        let processor = self.processor.clone();

        let (tx, rx) = tokio::sync::mpsc::channel(UPDATES_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || {
            match processor.drain(topic, partition) {
                Ok(queries) => {
                    for query in queries {
                        if tx.blocking_send(Ok(Query { query })).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(Status::failed_precondition(err.message())));
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
