pub mod achclient;
pub mod database;
pub mod depositories;
pub mod metrics;
pub mod transfers;

pub use achclient::AchClient;
pub use database::Database;
pub use depositories::DepositoryRepository;
pub use transfers::{group_transfers, GroupableTransfer, TransferCursor, TransferRepository};
