//! The node session interface: how the engine talks to one server node.

use sluice_types::{BinProjection, NodeId, QueryDescriptor, Record};

use crate::error::SessionError;

/// What a node is asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    /// The query as issued by the caller.
    pub descriptor: QueryDescriptor,
    /// Bins the node should return, already narrowed by the policy.
    pub projection: BinProjection,
}

/// A lazy, finite sequence of records from one node.
#[async_trait::async_trait]
pub trait RecordStream: Send {
    /// Return the next record, `Ok(None)` at end of stream.
    ///
    /// After an error the stream must not be polled again.
    async fn next_record(&mut self) -> Result<Option<Record>, SessionError>;
}

/// Opens query sessions against individual nodes.
///
/// Transports implement this trait; the engine never depends on a concrete
/// one. This also lets tests substitute in-memory or scripted sessions.
#[async_trait::async_trait]
pub trait NodeSession: Send + Sync {
    /// Start the query on `node` and return its record stream.
    async fn open(
        &self,
        node: NodeId,
        request: &SessionRequest,
    ) -> Result<Box<dyn RecordStream>, SessionError>;
}
