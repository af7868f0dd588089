use super::group::{AdmissionRequest, Admitted, Group, GroupId, GroupStatus, Membership, NewGroup, Transition};
use super::money::Money;
use super::order::{CaptureRecord, NewOrder, Order, OrderId, OrderStatus, Payment, ReleaseRecord, StatusChange};
use super::product::{Product, ProductId};
use super::user::{UserId, UserStats};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn upsert_product(&self, product: Product) -> Result<()>;
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn upsert_user(&self, user: UserStats) -> Result<()>;
    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>>;
    /// Adds `amount` to the user's `total_savings` in one step. `None` if the user is unknown.
    async fn credit_savings(&self, id: UserId, amount: Money) -> Result<Option<UserStats>>;
}

/// Group persistence. Every method that changes state is atomic on its own: no caller
/// ever composes a read and a write to change a group.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Persists the group and the creator's membership, and bumps the creator's
    /// `groups_organized`. Rejects with `ActiveGroupExists` if the product already has
    /// an active group.
    async fn create_group(&self, new: NewGroup) -> Result<Group>;
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;
    async fn groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>>;
    /// Active groups whose deadline is strictly before `now`.
    async fn expired_active_groups(&self, now: DateTime<Utc>) -> Result<Vec<Group>>;
    /// Checks and applies a join as one conditional update: status, deadline, duplicate
    /// membership and capacity are checked against the current row, then the membership
    /// is inserted, the count incremented, the referrer credited and, if requested, a
    /// group that just became full is completed.
    async fn admit_member(&self, request: AdmissionRequest) -> Result<Admitted>;
    /// Removes a non-creator member from an active group, decrementing the count.
    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<Group>;
    /// Compare-and-swap from `Active` to `to`. Rejects unknown groups with `GroupNotFound`.
    async fn transition_group(
        &self,
        group_id: GroupId,
        to: GroupStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition>;
    /// Closes a group whose deadline passed before `at`: `Completed` if the headcount at
    /// the moment of the swap meets the minimum, `Failed` otherwise. `Unchanged` if the
    /// group is terminal or not yet due.
    async fn close_expired(&self, group_id: GroupId, at: DateTime<Utc>) -> Result<Transition>;
    async fn members(&self, group_id: GroupId) -> Result<Vec<Membership>>;
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool>;
    async fn member_groups(&self, user_id: UserId) -> Result<Vec<Group>>;
    async fn organized_groups(&self, user_id: UserId) -> Result<Vec<Group>>;
    async fn invitations_by(&self, user_id: UserId) -> Result<u32>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order together with its pending payment. Rejects with
    /// `OrderAlreadyExists` if the user already has a live order in the group.
    async fn insert_order(&self, new: NewOrder) -> Result<Order>;
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn orders_for_group(
        &self,
        group_id: GroupId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>>;
    /// The user's order in the group that is neither cancelled nor refunded.
    async fn live_order_for(&self, group_id: GroupId, user_id: UserId) -> Result<Option<Order>>;
    async fn all_orders(&self) -> Result<Vec<Order>>;
    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>>;
    /// Marks the payment frozen under `hold_ref`. `false` if it was not pending.
    async fn attach_hold(&self, order_id: OrderId, hold_ref: String, at: DateTime<Utc>) -> Result<bool>;
    /// Compare-and-swap on the order status with a history append.
    async fn advance_order(&self, order_id: OrderId, from: OrderStatus, change: StatusChange) -> Result<bool>;
    /// Order to paid with corrected prices, payment to charged, buyer stats bumped.
    /// `false`, with nothing written, if the order was no longer frozen.
    async fn record_capture(&self, capture: CaptureRecord) -> Result<bool>;
    /// Order and payment moved together. `false` if the order was not in `release.from`.
    async fn record_release(&self, release: ReleaseRecord) -> Result<bool>;
}

pub trait Store: ProductStore + UserStore + GroupStore + OrderStore {}

impl<T> Store for T where T: ProductStore + UserStore + GroupStore + OrderStore {}

pub type StoreHandle = Arc<dyn Store>;

/// Reference the gateway issues for an authorized hold.
pub type HoldRef = String;

/// Two-phase card payments: hold now, capture or release later.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, amount: Money, order_ref: OrderId) -> std::result::Result<HoldRef, GatewayError>;
    /// Captures up to the authorized amount. Capturing an already captured hold is an error.
    async fn capture(&self, hold: &str, amount: Money) -> std::result::Result<(), GatewayError>;
    /// Voids a hold that was never captured.
    async fn cancel(&self, hold: &str) -> std::result::Result<(), GatewayError>;
    async fn refund(&self, charge: &str, amount: Money) -> std::result::Result<(), GatewayError>;
}

pub type GatewayHandle = Arc<dyn PaymentGateway>;
