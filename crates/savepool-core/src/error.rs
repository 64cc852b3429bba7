use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::TokenError;
use crate::types::{Address, Amount, GoalId, PoolId, RequestId};

pub type Result<T> = std::result::Result<T, SavingsError>;

/// Canonical error type for every engine operation.
///
/// A returned error always means nothing was committed: no profile, goal,
/// pool, counter, event or token balance changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SavingsError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("invalid token amount {0:?}")]
    InvalidAmount(String),

    #[error("amount overflow")]
    AmountOverflow,

    #[error("{field} must not be empty")]
    MissingField { field: &'static str },

    #[error("{field} is longer than {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("a pool needs room for at least {min} members, got {requested}")]
    MemberLimitTooLow { requested: u32, min: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} is closed to new contributions")]
    PoolClosed(PoolId),

    #[error("{0} is already completed")]
    GoalInactive(GoalId),

    #[error("{0} is not registered")]
    NotRegistered(Address),

    #[error("registration fee {paid} is below the required {required}")]
    InsufficientFee { paid: Amount, required: Amount },

    #[error("{pool_id} is full ({max_members} members)")]
    PoolFull { pool_id: PoolId, max_members: u32 },

    #[error("deposit of {amount} would exceed goal target ({current}/{target})")]
    ExceedsTarget {
        amount: Amount,
        current: Amount,
        target: Amount,
    },

    #[error("contribution of {amount} would exceed {pool_id} target ({current}/{target})")]
    PoolOverTarget {
        pool_id: PoolId,
        amount: Amount,
        current: Amount,
        target: Amount,
    },

    #[error("{0} is already registered")]
    AlreadyRegistered(Address),

    #[error("{member} already joined {pool_id}")]
    AlreadyMember { pool_id: PoolId, member: Address },

    #[error("{owner} already has {active} active goal(s)")]
    ActiveGoalExists { owner: Address, active: usize },

    #[error("request {0} is still being processed")]
    RequestInFlight(RequestId),

    #[error("request {0} was already used for a different command")]
    RequestKeyReused(RequestId),

    #[error("no savings goal found for {0}")]
    GoalNotFound(Address),

    #[error("{goal_id} not found for {owner}")]
    UnknownGoal { owner: Address, goal_id: GoalId },

    #[error("{0} not found")]
    PoolNotFound(PoolId),

    #[error("no profile for {0}")]
    ProfileNotFound(Address),

    #[error("token transfer failed: {0}")]
    Token(#[from] TokenError),

    #[error("token transfer failed ({cause}) and refunding {refund_to} also failed ({refund})")]
    CompensationFailed {
        refund_to: Address,
        cause: TokenError,
        refund: TokenError,
    },
}

/// Coarse classification callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    Capacity,
    OverTarget,
    Duplicate,
    NotFound,
    External,
}

impl SavingsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SavingsError::ZeroAmount
            | SavingsError::InvalidAmount(_)
            | SavingsError::AmountOverflow
            | SavingsError::MissingField { .. }
            | SavingsError::FieldTooLong { .. }
            | SavingsError::MemberLimitTooLow { .. }
            | SavingsError::InvalidConfig(_)
            | SavingsError::PoolClosed(_)
            | SavingsError::GoalInactive(_) => ErrorKind::Validation,
            SavingsError::NotRegistered(_) | SavingsError::InsufficientFee { .. } => {
                ErrorKind::Authorization
            }
            SavingsError::PoolFull { .. } => ErrorKind::Capacity,
            SavingsError::ExceedsTarget { .. } | SavingsError::PoolOverTarget { .. } => {
                ErrorKind::OverTarget
            }
            SavingsError::AlreadyRegistered(_)
            | SavingsError::AlreadyMember { .. }
            | SavingsError::ActiveGoalExists { .. }
            | SavingsError::RequestInFlight(_)
            | SavingsError::RequestKeyReused(_) => ErrorKind::Duplicate,
            SavingsError::GoalNotFound(_)
            | SavingsError::UnknownGoal { .. }
            | SavingsError::PoolNotFound(_)
            | SavingsError::ProfileNotFound(_) => ErrorKind::NotFound,
            SavingsError::Token(_) | SavingsError::CompensationFailed { .. } => {
                ErrorKind::External
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(SavingsError::ZeroAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            SavingsError::NotRegistered("bob".into()).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            SavingsError::PoolFull {
                pool_id: PoolId(1),
                max_members: 2
            }
            .kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            SavingsError::AlreadyRegistered("bob".into()).kind(),
            ErrorKind::Duplicate
        );
        assert_eq!(
            SavingsError::Token(TokenError::Rejected("down".into())).kind(),
            ErrorKind::External
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::OverTarget).unwrap();
        assert_eq!(json, "\"over_target\"");
    }
}
