pub mod consumer;

pub use consumer::TopUpWorker;
