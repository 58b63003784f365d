pub mod payload;
pub mod rabbit;
pub mod topology;

pub use payload::TopUpMessage;
pub use rabbit::RabbitBroker;
pub use topology::TopologyConfig;
