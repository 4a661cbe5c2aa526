pub mod gateway;
pub mod schema;
pub mod types;

pub use gateway::StoreGateway;
pub use types::{AttemptStatus, CollectionMapping, MappingStatus, TransactionAttempt, WalEntry, WalStatus};
