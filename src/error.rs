use crate::domain::group::{GroupId, GroupStatus};
use crate::domain::order::OrderStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GroupBuyError>;

/// A business rule said no. The `Display` text is what the caller shows the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Group not found")]
    GroupNotFound,
    #[error("{}", not_active_reason(.0))]
    GroupNotActive(GroupStatus),
    #[error("The group's deadline has passed")]
    DeadlinePassed,
    #[error("You are already a member of this group")]
    AlreadyMember,
    #[error("The group is full")]
    GroupFull,
    #[error("Product not found")]
    ProductNotFound,
    #[error("The product is not available for ordering")]
    ProductInactive,
    #[error("The product is out of stock")]
    OutOfStock,
    #[error("There is already an active group for this product (group {0}). Join it instead!")]
    ActiveGroupExists(GroupId),
    #[error("User not found")]
    UserNotFound,
    #[error("The creator cannot leave their own group; cancel it instead")]
    CreatorCannotLeave,
    #[error("You are not a member of this group")]
    NotAMember,
    #[error("You already have an order in this group")]
    OrderAlreadyExists,
    #[error("An order in status '{0}' cannot be changed")]
    OrderNotChangeable(OrderStatus),
}

fn not_active_reason(status: &GroupStatus) -> &'static str {
    match status {
        GroupStatus::Completed => "The group has already completed",
        GroupStatus::Failed => "The group did not reach its minimum",
        GroupStatus::Cancelled => "The group was cancelled",
        GroupStatus::Active => "The group is not available",
    }
}

/// Failures reported by the payment gateway boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway call timed out")]
    Timeout,
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment declined: {0}")]
    Declined(String),
    #[error("Unknown hold reference {0}")]
    UnknownHold(String),
    #[error("Hold {hold} is {state}, operation not allowed")]
    InvalidHoldState { hold: String, state: String },
    #[error("Capture of {requested} exceeds the authorized {authorized}")]
    AmountExceedsHold { requested: String, authorized: String },
}

impl GatewayError {
    /// Timeouts and outages may succeed on the next run. Everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum GroupBuyError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl GroupBuyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GroupBuyError::Gateway(e) => e.is_retryable(),
            GroupBuyError::StorageError(_) | GroupBuyError::IoError(_) => true,
            _ => false,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            GroupBuyError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages_are_actionable() {
        assert_eq!(Rejection::GroupFull.to_string(), "The group is full");
        assert_eq!(
            Rejection::GroupNotActive(GroupStatus::Failed).to_string(),
            "The group did not reach its minimum"
        );
        assert!(Rejection::ActiveGroupExists(7).to_string().contains("group 7"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GroupBuyError::Gateway(GatewayError::Timeout).is_retryable());
        assert!(!GroupBuyError::Gateway(GatewayError::Declined("card".into())).is_retryable());
        assert!(!GroupBuyError::Rejected(Rejection::GroupFull).is_retryable());
    }
}
