//! Domain module
//!
//! Plain data types and the invariants that hold on them, independent of
//! storage and locking.

pub mod account;
pub mod amount;
pub mod balance;
pub mod context;
pub mod error;
pub mod fee;
pub mod journal;
pub mod order;
pub mod payment;

pub use account::{Account, AccountKind, AccountStatus};
pub use amount::{Amount, AmountError};
pub use balance::{AssetRef, AssetType, Balance, BalanceDelta};
pub use context::OperationContext;
pub use error::DomainError;
pub use fee::{FeeKind, FeePolicy, SettlementAmounts};
pub use journal::{JournalEntry, LedgerTransaction, LegRole, TransactionKind};
pub use order::{DepositOrder, WithdrawalAction, WithdrawalOrder, WithdrawalStatus};
pub use payment::{Payment, PaymentStatus};
