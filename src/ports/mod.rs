//! Capability contracts the core depends on. Concrete adapters live in
//! `crate::adapters` (Postgres) and `crate::messaging` (RabbitMQ); tests
//! substitute in-memory doubles.

pub mod broker;
pub mod repositories;

pub use broker::{
    BrokerError, BrokerPort, BrokerResult, DeliveryStream, Disposition, InboundMessage,
    MessageSettler,
};
pub use repositories::{
    AccountRepository, RepositoryError, RepositoryResult, TransactionRepository,
};
