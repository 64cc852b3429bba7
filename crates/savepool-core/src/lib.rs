//! Accounting engine for SavePool.
//!
//! The crate tracks two kinds of savings and the gate in front of them:
//!
//! * [`goals`]: one owner's locked, target-bounded savings goal.
//! * [`pools`]: multi-member group pools with a membership cap and a
//!   referral bonus carved out of each referred contribution.
//! * [`registry`]: one-time paid registration, profile counters and
//!   aggregate statistics; the single entry point callers use.
//!
//! Funds never move inside this crate. Every pull and payout goes through
//! a [`token::TokenLedger`] supplied by the embedding application, and each
//! mutating call either commits completely (ledger state, profile counters,
//! stats, events) or leaves everything untouched.

pub mod clock;
pub mod config;
pub mod events;
pub mod goals;
pub mod invariants;
pub mod pools;
pub mod profile;
pub mod referral;
pub mod registry;
pub mod stats;
pub mod token;
pub mod treasury;
pub mod types;

mod context;
mod error;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, Result, SavingsError};
pub use registry::{Command, Outcome, Registry, Request};
pub use types::{Address, Amount, GoalId, PoolId, RequestId, Timestamp, UNIT};
