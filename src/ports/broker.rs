//! Message broker capability port.
//!
//! The initiator and worker depend on this trait, never on a concrete
//! client, so both can be driven by test doubles. The worker's decision
//! logic is expressed as a [`Disposition`] which the transport applies.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is not connected; call connect() first")]
    NotConnected,

    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// How a consumed delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with this message; the broker drops it.
    Ack,
    /// Transient failure; negative-ack with requeue for a later retry.
    Requeue,
    /// Poison or protocol-violating message; negative-ack without requeue
    /// so it dead-letters if a dead-letter exchange is configured.
    Reject,
}

/// Settlement half of a delivery, implemented per transport.
#[async_trait]
pub trait MessageSettler: Send {
    async fn settle(self: Box<Self>, outcome: Disposition) -> BrokerResult<()>;
}

/// One delivered message: an opaque payload plus the capability to settle it
/// exactly once.
pub struct InboundMessage {
    payload: Vec<u8>,
    settler: Box<dyn MessageSettler>,
}

impl InboundMessage {
    pub fn new(payload: Vec<u8>, settler: Box<dyn MessageSettler>) -> Self {
        Self { payload, settler }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn settle(self, outcome: Disposition) -> BrokerResult<()> {
        self.settler.settle(outcome).await
    }
}

pub type DeliveryStream = BoxStream<'static, BrokerResult<InboundMessage>>;

/// Broker capability set: connect/close lifecycle, publish, and a consume
/// stream with manual settlement.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Establish the connection and channel. Calling while already
    /// connected is a no-op.
    async fn connect(&self) -> BrokerResult<()>;

    /// Release channel and connection, tolerating either being already
    /// closed.
    async fn close(&self) -> BrokerResult<()>;

    /// Publish a payload under a routing key. Implementations declare their
    /// target idempotently first, so publish never fails merely because
    /// setup ran out of order.
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> BrokerResult<()>;

    /// Open a manual-ack consumer on a queue with a prefetch of one
    /// unacknowledged delivery.
    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream>;
}
