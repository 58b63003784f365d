pub mod create_topup;

pub use create_topup::{CreateTopUp, TopUpError, TopUpInput, TopUpOutput};
