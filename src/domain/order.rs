use crate::domain::group::GroupId;
use crate::domain::money::Money;
use crate::domain::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Frozen,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Orders that still hold (or are about to hold) a seat in their group.
    pub fn is_live(self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Frozen => "frozen",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Courier,
    Pickup,
    Post,
}

/// One entry of an order's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
}

impl StatusChange {
    pub fn new(status: OrderStatus, timestamp: DateTime<Utc>, comment: impl Into<String>) -> Self {
        Self {
            status,
            timestamp,
            comment: comment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub group_id: GroupId,
    pub user_id: UserId,
    /// Price snapshot at the moment of ordering.
    pub final_price: Money,
    pub delivery: DeliveryType,
    pub delivery_cost: Money,
    pub invited_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            group_id: self.group_id,
            user_id: self.user_id,
            final_price: self.final_price,
            delivery: self.delivery,
            delivery_cost: self.delivery_cost,
            total_amount: self.final_price + self.delivery_cost,
            status: OrderStatus::Pending,
            invited_by: self.invited_by,
            history: vec![StatusChange::new(
                OrderStatus::Pending,
                self.created_at,
                "Order created",
            )],
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub group_id: GroupId,
    pub user_id: UserId,
    /// A snapshot, not a live view of the group's price. Settlement corrects it.
    pub final_price: Money,
    pub delivery: DeliveryType,
    pub delivery_cost: Money,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub invited_by: Option<UserId>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Delivery is whatever the authorization covered beyond the product price.
    pub fn authorized_delivery(&self) -> Money {
        self.total_amount - self.final_price
    }

    /// Moves to `to` and records it. Returns `false` if the order was not in `from`.
    pub fn advance(&mut self, from: OrderStatus, change: StatusChange) -> bool {
        if self.status != from {
            return false;
        }
        self.status = change.status;
        self.history.push(change);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Frozen,
    Charged,
    Refunded,
    Cancelled,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Frozen => "frozen",
            PaymentStatus::Charged => "charged",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The hold backing an order. One per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: OrderId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Issued by the gateway once the hold is authorized.
    pub external_ref: Option<String>,
    pub captured_amount: Option<Money>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(order_id: OrderId, amount: Money, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            amount,
            status: PaymentStatus::Pending,
            external_ref: None,
            captured_amount: None,
            updated_at: at,
        }
    }

    /// The hold reference, but only while the hold can still be captured or released.
    pub fn capturable_ref(&self) -> Option<&str> {
        match self.status {
            PaymentStatus::Frozen => self.external_ref.as_deref(),
            _ => None,
        }
    }
}

/// Everything written when a capture succeeds. Stores apply it in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub order_id: OrderId,
    pub buyer: UserId,
    pub final_price: Money,
    pub captured: Money,
    pub savings: Money,
    pub change: StatusChange,
}

/// Everything written when a hold is released or refunded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub payment_status: PaymentStatus,
    pub change: StatusChange,
}
