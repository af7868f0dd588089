use crate::domain::group::{
    AdmissionRequest, Admitted, Group, GroupId, GroupStatus, Membership, NewGroup, Transition,
};
use crate::domain::money::Money;
use crate::domain::order::{
    CaptureRecord, NewOrder, Order, OrderId, OrderStatus, Payment, PaymentStatus, ReleaseRecord,
    StatusChange,
};
use crate::domain::ports::{GroupStore, OrderStore, ProductStore, UserStore};
use crate::domain::product::{Product, ProductId};
use crate::domain::user::{UserId, UserStats};
use crate::error::{Rejection, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    users: HashMap<UserId, UserStats>,
    groups: BTreeMap<GroupId, Group>,
    members: HashMap<GroupId, BTreeMap<UserId, Membership>>,
    orders: BTreeMap<OrderId, Order>,
    payments: HashMap<OrderId, Payment>,
    last_group_id: GroupId,
    last_order_id: OrderId,
}

/// A thread-safe in-memory implementation of every store port.
///
/// All entities live behind one `Arc<RwLock<..>>`, so each conditional update runs
/// under the write lock and is trivially atomic across groups, orders and users.
/// Clones share the same state.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_lockstep(group: &Group, members: Option<&BTreeMap<UserId, Membership>>) {
    let rows = members.map(|m| m.len()).unwrap_or_default();
    if rows != group.current_count as usize {
        error!(
            "🧮 Group #{} count is {} but it has {rows} membership rows",
            group.id, group.current_count
        );
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn upsert_product(&self, product: Product) -> Result<()> {
        let mut state = self.state.write().await;
        state.products.insert(product.id, product);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(&id).cloned())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn upsert_user(&self, user: UserStats) -> Result<()> {
        let mut state = self.state.write().await;
        state.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn credit_savings(&self, id: UserId, amount: Money) -> Result<Option<UserStats>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.total_savings += amount;
            user.clone()
        }))
    }
}

#[async_trait]
impl GroupStore for InMemoryStore {
    async fn create_group(&self, new: NewGroup) -> Result<Group> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if let Some(existing) = state
            .groups
            .values()
            .find(|g| g.product_id == new.product_id && g.is_active())
        {
            return Err(Rejection::ActiveGroupExists(existing.id).into());
        }

        state.last_group_id += 1;
        let group = new.into_group(state.last_group_id);
        let creator = Membership {
            group_id: group.id,
            user_id: group.creator_id,
            invited_by: None,
            joined_at: group.created_at,
        };
        state
            .members
            .entry(group.id)
            .or_default()
            .insert(creator.user_id, creator);
        if let Some(user) = state.users.get_mut(&group.creator_id) {
            user.groups_organized += 1;
        }
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.get(&id).cloned())
    }

    async fn groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| g.status == status)
            .cloned()
            .collect())
    }

    async fn expired_active_groups(&self, now: DateTime<Utc>) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| g.is_active() && g.is_expired(now))
            .cloned()
            .collect())
    }

    async fn admit_member(&self, request: AdmissionRequest) -> Result<Admitted> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let group = state
            .groups
            .get_mut(&request.group_id)
            .ok_or(Rejection::GroupNotFound)?;
        let members = state.members.entry(request.group_id).or_default();

        let previous_count = group.current_count;
        let already_member = members.contains_key(&request.user_id);
        let closed = group.admit(already_member, request.at, request.close_when_full)?;
        members.insert(
            request.user_id,
            Membership {
                group_id: request.group_id,
                user_id: request.user_id,
                invited_by: request.invited_by,
                joined_at: request.at,
            },
        );
        check_lockstep(group, Some(members));

        let admitted = Admitted {
            group: group.clone(),
            previous_count,
            closed,
        };
        if let Some(referrer) = request.referrer().and_then(|id| state.users.get_mut(&id)) {
            referrer.invited_count += 1;
        }
        Ok(admitted)
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<Group> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(Rejection::GroupNotFound)?;
        let members = state.members.entry(group_id).or_default();

        group.release(user_id, members.contains_key(&user_id))?;
        members.remove(&user_id);
        check_lockstep(group, Some(members));
        Ok(group.clone())
    }

    async fn transition_group(
        &self,
        group_id: GroupId,
        to: GroupStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut state = self.state.write().await;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(Rejection::GroupNotFound)?;
        if group.transition(to, at) {
            Ok(Transition::Applied(group.clone()))
        } else {
            Ok(Transition::Unchanged(group.clone()))
        }
    }

    async fn close_expired(&self, group_id: GroupId, at: DateTime<Utc>) -> Result<Transition> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(Rejection::GroupNotFound)?;
        if !group.close_expired(at) {
            return Ok(Transition::Unchanged(group.clone()));
        }
        check_lockstep(group, state.members.get(&group_id));
        Ok(Transition::Applied(group.clone()))
    }

    async fn members(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(&group_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(&group_id)
            .is_some_and(|m| m.contains_key(&user_id)))
    }

    async fn member_groups(&self, user_id: UserId) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| {
                state
                    .members
                    .get(&g.id)
                    .is_some_and(|m| m.contains_key(&user_id))
            })
            .cloned()
            .collect())
    }

    async fn organized_groups(&self, user_id: UserId) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .values()
            .filter(|g| g.creator_id == user_id)
            .cloned()
            .collect())
    }

    async fn invitations_by(&self, user_id: UserId) -> Result<u32> {
        let state = self.state.read().await;
        let count = state
            .members
            .values()
            .flat_map(|m| m.values())
            .filter(|m| m.invited_by == Some(user_id) && m.user_id != user_id)
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, new: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|o| o.group_id == new.group_id && o.user_id == new.user_id && o.status.is_live())
        {
            return Err(Rejection::OrderAlreadyExists.into());
        }
        state.last_order_id += 1;
        let order = new.into_order(state.last_order_id);
        let payment = Payment::pending(order.id, order.total_amount, order.created_at);
        state.payments.insert(order.id, payment);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn orders_for_group(
        &self,
        group_id: GroupId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.group_id == group_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect())
    }

    async fn live_order_for(&self, group_id: GroupId, user_id: UserId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.group_id == group_id && o.user_id == user_id && o.status.is_live())
            .cloned())
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.values().cloned().collect())
    }

    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state.payments.get(&order_id).cloned())
    }

    async fn attach_hold(&self, order_id: OrderId, hold_ref: String, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(&order_id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Frozen;
                payment.external_ref = Some(hold_ref);
                payment.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn advance_order(&self, order_id: OrderId, from: OrderStatus, change: StatusChange) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .orders
            .get_mut(&order_id)
            .is_some_and(|order| order.advance(from, change)))
    }

    async fn record_capture(&self, capture: CaptureRecord) -> Result<bool> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(order) = state.orders.get_mut(&capture.order_id) else {
            return Ok(false);
        };
        if order.status != OrderStatus::Frozen {
            return Ok(false);
        }
        let at = capture.change.timestamp;
        order.final_price = capture.final_price;
        order.total_amount = capture.captured;
        order.advance(OrderStatus::Frozen, capture.change);

        if let Some(payment) = state.payments.get_mut(&capture.order_id) {
            payment.status = PaymentStatus::Charged;
            payment.captured_amount = Some(capture.captured);
            payment.updated_at = at;
        }
        if let Some(buyer) = state.users.get_mut(&capture.buyer) {
            buyer.record_purchase(capture.savings);
        }
        Ok(true)
    }

    async fn record_release(&self, release: ReleaseRecord) -> Result<bool> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let at = release.change.timestamp;
        let moved = state
            .orders
            .get_mut(&release.order_id)
            .is_some_and(|order| order.advance(release.from, release.change));
        if moved && let Some(payment) = state.payments.get_mut(&release.order_id) {
            payment.status = release.payment_status;
            payment.updated_at = at;
        }
        Ok(moved)
    }
}
