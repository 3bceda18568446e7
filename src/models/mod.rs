mod amount;
mod depository;
mod transfer;

pub use amount::Amount;
pub use depository::{
    aba8, aba_check_digit, AccountType, Depository, DepositoryId, DepositoryStatus, HolderType,
};
pub use transfer::{
    create_trace_number, Transfer, TransferId, TransferRequest, TransferStatus, TransferType,
};
