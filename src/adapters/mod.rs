pub mod postgres_account_repository;
pub mod postgres_transaction_repository;

pub use postgres_account_repository::PostgresAccountRepository;
pub use postgres_transaction_repository::PostgresTransactionRepository;
