use crate::application::lifecycle::GroupLifecycleManager;
use crate::config::EngineConfig;
use crate::domain::clock::ClockHandle;
use crate::domain::group::GroupId;
use crate::domain::order::{
    DeliveryType, NewOrder, Order, OrderId, OrderStatus, PaymentStatus, ReleaseRecord, StatusChange,
};
use crate::domain::ports::{GatewayHandle, GroupStore, OrderStore, ProductStore, StoreHandle};
use crate::domain::user::UserId;
use crate::error::{GroupBuyError, Rejection, Result};
use log::*;
use std::sync::Arc;

/// Turns a join into a paid-for seat: snapshot the price, hold the funds, take the seat.
#[derive(Clone)]
pub struct CheckoutService {
    lifecycle: GroupLifecycleManager,
    store: StoreHandle,
    gateway: GatewayHandle,
    clock: ClockHandle,
    config: Arc<EngineConfig>,
}

impl CheckoutService {
    pub fn new(
        lifecycle: GroupLifecycleManager,
        gateway: GatewayHandle,
        clock: ClockHandle,
        config: Arc<EngineConfig>,
    ) -> Self {
        let store = lifecycle.store().clone();
        Self {
            lifecycle,
            store,
            gateway,
            clock,
            config,
        }
    }

    async fn order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| GroupBuyError::NotFound(format!("Order #{id}")))
    }

    /// Places an order and, if the buyer is not yet a member, joins them to the group.
    ///
    /// The price snapshot is taken at the headcount the buyer will make the group reach.
    /// On success the order is `frozen` with an authorized hold for its total.
    pub async fn place_order(
        &self,
        group_id: GroupId,
        user_id: UserId,
        delivery: DeliveryType,
        invited_by: Option<UserId>,
    ) -> Result<Order> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(Rejection::GroupNotFound)?;
        if !group.is_active() {
            return Err(Rejection::GroupNotActive(group.status).into());
        }
        let product = self
            .store
            .get_product(group.product_id)
            .await?
            .ok_or(Rejection::ProductNotFound)?;

        let now = self.clock.now();
        let is_member = self.store.is_member(group_id, user_id).await?;
        if !is_member {
            group.check_admission(false, now)?;
        }
        let seat = if is_member {
            group.current_count
        } else {
            group.current_count + 1
        };
        let order = self
            .store
            .insert_order(NewOrder {
                group_id,
                user_id,
                final_price: product.schedule.current_price(seat),
                delivery,
                delivery_cost: self.config.delivery.cost(delivery),
                invited_by,
                created_at: now,
            })
            .await?;

        let hold = match self.gateway.authorize(order.total_amount, order.id).await {
            Ok(hold) => hold,
            Err(e) => {
                warn!("💳️ Authorization of {} for order #{} failed: {e}", order.total_amount, order.id);
                self.store
                    .record_release(ReleaseRecord {
                        order_id: order.id,
                        from: OrderStatus::Pending,
                        payment_status: PaymentStatus::Failed,
                        change: StatusChange::new(
                            OrderStatus::Cancelled,
                            self.clock.now(),
                            format!("Payment authorization failed: {e}"),
                        ),
                    })
                    .await?;
                return Err(e.into());
            }
        };
        self.store.attach_hold(order.id, hold.clone(), self.clock.now()).await?;

        if !is_member && let Err(e) = self.lifecycle.join(group_id, user_id, invited_by).await {
            debug!("🧾️ Order #{} lost its seat in group #{group_id}: {e}", order.id);
            if let Err(release_err) = self.gateway.cancel(&hold).await {
                error!("💳️ Could not release hold {hold} of order #{}: {release_err}", order.id);
            }
            self.store
                .record_release(ReleaseRecord {
                    order_id: order.id,
                    from: OrderStatus::Pending,
                    payment_status: PaymentStatus::Cancelled,
                    change: StatusChange::new(
                        OrderStatus::Cancelled,
                        self.clock.now(),
                        format!("Could not join the group: {e}"),
                    ),
                })
                .await?;
            return Err(e);
        }

        self.store
            .advance_order(
                order.id,
                OrderStatus::Pending,
                StatusChange::new(OrderStatus::Frozen, self.clock.now(), "Payment held"),
            )
            .await?;
        info!(
            "🧾️ Order #{} placed by user {user_id} in group #{group_id}: {} held",
            order.id, order.total_amount
        );
        self.order(order.id).await
    }

    /// Buyer-initiated cancellation while the group is still collecting.
    pub async fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self.order(order_id).await?;
        if order.user_id != user_id {
            return Err(GroupBuyError::PermissionDenied(
                "Only the buyer can cancel an order".to_string(),
            ));
        }
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Frozen) {
            return Err(Rejection::OrderNotChangeable(order.status).into());
        }
        let group = self
            .store
            .get_group(order.group_id)
            .await?
            .ok_or(Rejection::GroupNotFound)?;
        if !group.is_active() {
            return Err(Rejection::GroupNotActive(group.status).into());
        }

        let payment = self.store.get_payment(order_id).await?;
        if let Some(hold) = payment.as_ref().and_then(|p| p.capturable_ref()) {
            self.gateway.cancel(hold).await?;
        }
        let moved = self
            .store
            .record_release(ReleaseRecord {
                order_id,
                from: order.status,
                payment_status: PaymentStatus::Cancelled,
                change: StatusChange::new(OrderStatus::Cancelled, self.clock.now(), "Cancelled by the buyer"),
            })
            .await?;
        if !moved {
            let current = self.order(order_id).await?;
            return Err(Rejection::OrderNotChangeable(current.status).into());
        }

        if user_id != group.creator_id {
            match self.lifecycle.leave(group.id, user_id).await {
                Ok(_) => {}
                Err(GroupBuyError::Rejected(reason)) => {
                    debug!("🧾️ User {user_id} kept no seat in group #{} after cancelling: {reason}", group.id);
                }
                Err(e) => return Err(e),
            }
        }
        info!("🧾️ Order #{order_id} cancelled by user {user_id}");
        self.order(order_id).await
    }

    /// Refunds the captured amount of a paid order.
    pub async fn refund_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.order(order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(Rejection::OrderNotChangeable(order.status).into());
        }
        let payment = self
            .store
            .get_payment(order_id)
            .await?
            .ok_or_else(|| GroupBuyError::NotFound(format!("Payment for order #{order_id}")))?;
        let charge = payment.external_ref.as_deref().ok_or_else(|| {
            GroupBuyError::InvariantViolation(format!("paid order #{order_id} has no charge reference"))
        })?;
        let amount = payment.captured_amount.unwrap_or(order.total_amount);

        self.gateway.refund(charge, amount).await?;
        self.store
            .record_release(ReleaseRecord {
                order_id,
                from: OrderStatus::Paid,
                payment_status: PaymentStatus::Refunded,
                change: StatusChange::new(OrderStatus::Refunded, self.clock.now(), format!("Refunded {amount}")),
            })
            .await?;
        info!("🧾️ Order #{order_id} refunded {amount}");
        self.order(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::lifecycle::CreateGroup;
    use crate::domain::clock::ManualClock;
    use crate::domain::money::{Amount, Money};
    use crate::domain::ports::UserStore;
    use crate::domain::pricing::{PriceSchedule, PriceTier};
    use crate::domain::product::Product;
    use crate::domain::user::UserStats;
    use crate::error::GatewayError;
    use crate::infrastructure::gateway::{HoldState, SimulatedGateway};
    use crate::infrastructure::in_memory::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixture {
        checkout: CheckoutService,
        lifecycle: GroupLifecycleManager,
        store: InMemoryStore,
        gateway: SimulatedGateway,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        store
            .upsert_product(Product {
                id: 1,
                name: "Headphones".to_string(),
                schedule: PriceSchedule::new(
                    Amount::new(dec!(25000)).unwrap(),
                    vec![PriceTier::new(3, dec!(22000)).unwrap()],
                )
                .unwrap(),
                active: true,
                stock: 10,
            })
            .await
            .unwrap();
        for id in 1..=5 {
            store.upsert_user(UserStats::new(id)).await.unwrap();
        }
        let clock: ClockHandle = Arc::new(ManualClock::new(Utc::now()));
        let config = Arc::new(EngineConfig::default());
        let gateway = SimulatedGateway::new();
        let lifecycle = GroupLifecycleManager::new(Arc::new(store.clone()), clock.clone(), config.clone());
        let checkout = CheckoutService::new(lifecycle.clone(), Arc::new(gateway.clone()), clock, config);
        Fixture {
            checkout,
            lifecycle,
            store,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_place_order_snapshots_price_and_holds_funds() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1)).await.unwrap();
        f.lifecycle.join(group.id, 2, None).await.unwrap();

        // User 3 becomes the third member, so the 3+ tier applies
        let order = f
            .checkout
            .place_order(group.id, 3, DeliveryType::Courier, Some(1))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Frozen);
        assert_eq!(order.final_price, Money::new(dec!(22000)));
        assert_eq!(order.total_amount, Money::new(dec!(22490)));
        assert_eq!(order.history.len(), 2);
        assert!(f.store.is_member(group.id, 3).await.unwrap());

        let payment = f.store.get_payment(order.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Frozen);
        let hold = f.gateway.hold(payment.capturable_ref().unwrap()).await.unwrap();
        assert_eq!(hold.authorized, Money::new(dec!(22490)));

        // A member ordering prices at the current count
        let creator_order = f
            .checkout
            .place_order(group.id, 1, DeliveryType::Pickup, None)
            .await
            .unwrap();
        assert_eq!(creator_order.final_price, Money::new(dec!(22000)));

        let err = f
            .checkout
            .place_order(group.id, 3, DeliveryType::Post, None)
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::OrderAlreadyExists));
    }

    #[tokio::test]
    async fn test_failed_authorization_cancels_order() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1)).await.unwrap();
        f.gateway.fail_next(GatewayError::Declined("insufficient funds".into())).await;

        let err = f
            .checkout
            .place_order(group.id, 2, DeliveryType::Pickup, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupBuyError::Gateway(GatewayError::Declined(_))));
        assert!(!f.store.is_member(group.id, 2).await.unwrap());

        let orders = f.store.orders_for_group(group.id, None).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        let payment = f.store.get_payment(orders[0].id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_rejected_join_releases_hold() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1)).await.unwrap();

        let err = f
            .checkout
            .place_order(group.id, 42, DeliveryType::Pickup, None)
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::UserNotFound));

        let orders = f.store.orders_for_group(group.id, None).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        let payment = f.store.get_payment(orders[0].id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        let hold = f.gateway.hold(payment.external_ref.as_deref().unwrap()).await.unwrap();
        assert_eq!(hold.state, HoldState::Cancelled);
    }

    #[tokio::test]
    async fn test_full_group_is_rejected_before_authorizing() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1).with_limits(2, 2)).await.unwrap();
        f.checkout.place_order(group.id, 2, DeliveryType::Pickup, None).await.unwrap();

        let err = f
            .checkout
            .place_order(group.id, 3, DeliveryType::Pickup, None)
            .await
            .unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::GroupNotActive(crate::domain::group::GroupStatus::Completed))
        );
        assert_eq!(f.store.orders_for_group(group.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_order_releases_hold_and_seat() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1)).await.unwrap();
        let order = f
            .checkout
            .place_order(group.id, 2, DeliveryType::Courier, None)
            .await
            .unwrap();

        assert!(matches!(
            f.checkout.cancel_order(order.id, 3).await,
            Err(GroupBuyError::PermissionDenied(_))
        ));

        let cancelled = f.checkout.cancel_order(order.id, 2).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(!f.store.is_member(group.id, 2).await.unwrap());
        assert_eq!(f.store.get_group(group.id).await.unwrap().unwrap().current_count, 1);

        let err = f.checkout.cancel_order(order.id, 2).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::OrderNotChangeable(OrderStatus::Cancelled))
        );

        // The cancelled order no longer blocks a new one
        assert!(f.checkout.place_order(group.id, 2, DeliveryType::Post, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_requires_paid_order() {
        let f = fixture().await;
        let group = f.lifecycle.create(CreateGroup::new(1, 1)).await.unwrap();
        let order = f
            .checkout
            .place_order(group.id, 2, DeliveryType::Courier, None)
            .await
            .unwrap();
        let err = f.checkout.refund_order(order.id).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&Rejection::OrderNotChangeable(OrderStatus::Frozen))
        );
    }
}
