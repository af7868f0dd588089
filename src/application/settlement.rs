use crate::domain::clock::ClockHandle;
use crate::domain::group::{Group, GroupStatus};
use crate::domain::money::Money;
use crate::domain::order::{
    CaptureRecord, Order, OrderId, OrderStatus, PaymentStatus, ReleaseRecord, StatusChange,
};
use crate::domain::ports::{GatewayHandle, GroupStore, OrderStore, ProductStore, StoreHandle};
use crate::error::{GroupBuyError, Result};
use log::*;
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub captured: u32,
    pub released: u32,
    /// Frozen orders without a usable hold. They need a human.
    pub skipped: u32,
    /// Orders left untouched because the gateway or the store failed. Retried next run.
    pub failures: Vec<(OrderId, String)>,
    pub total_captured: Money,
    /// Another run was in progress, so this one did nothing.
    pub already_running: bool,
}

enum Outcome {
    Captured(Money),
    Released,
    Skipped,
}

/// Reconciles held payments with the outcome of their group.
///
/// Completed groups have their frozen orders captured at the final price, never above
/// the original authorization. Failed and cancelled groups have their holds released.
/// Every pass filters on `frozen`, so re-running after a crash is the recovery path.
pub struct SettlementCoordinator {
    store: StoreHandle,
    gateway: GatewayHandle,
    clock: ClockHandle,
    running: Mutex<()>,
}

impl SettlementCoordinator {
    pub fn new(store: StoreHandle, gateway: GatewayHandle, clock: ClockHandle) -> Self {
        Self {
            store,
            gateway,
            clock,
            running: Mutex::new(()),
        }
    }

    pub async fn run(&self) -> Result<SettlementReport> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("💰️ Settlement is already running, skipping this run");
            return Ok(SettlementReport {
                already_running: true,
                ..Default::default()
            });
        };
        let mut report = SettlementReport::default();
        self.capture_completed(&mut report).await?;
        self.release_unsuccessful(&mut report).await?;
        if report.captured + report.released + report.skipped > 0 || !report.failures.is_empty() {
            info!(
                "💰️ Settlement: {} captured ({}), {} released, {} skipped, {} failed",
                report.captured,
                report.total_captured,
                report.released,
                report.skipped,
                report.failures.len()
            );
        }
        Ok(report)
    }

    async fn capture_completed(&self, report: &mut SettlementReport) -> Result<()> {
        for group in self.store.groups_by_status(GroupStatus::Completed).await? {
            let orders = self
                .store
                .orders_for_group(group.id, Some(OrderStatus::Frozen))
                .await?;
            if orders.is_empty() {
                continue;
            }
            let Some(product) = self.store.get_product(group.product_id).await? else {
                error!("🚨️ Product {} of completed group #{} is missing", group.product_id, group.id);
                report.skipped += orders.len() as u32;
                continue;
            };
            let final_price = product.schedule.current_price(group.current_count);
            let base_price = product.schedule.base_price();
            debug!(
                "💰️ Capturing {} orders of group #{} at {final_price}",
                orders.len(),
                group.id
            );
            for order in orders {
                let outcome = self.capture(&order, final_price, base_price).await;
                tally(report, order.id, outcome);
            }
        }
        Ok(())
    }

    async fn release_unsuccessful(&self, report: &mut SettlementReport) -> Result<()> {
        let mut groups = self.store.groups_by_status(GroupStatus::Failed).await?;
        groups.extend(self.store.groups_by_status(GroupStatus::Cancelled).await?);
        for group in groups {
            for order in self
                .store
                .orders_for_group(group.id, Some(OrderStatus::Frozen))
                .await?
            {
                let outcome = self.release(&group, &order).await;
                tally(report, order.id, outcome);
            }
        }
        Ok(())
    }

    async fn hold_for(&self, order: &Order) -> Result<Option<String>> {
        let payment = self.store.get_payment(order.id).await?;
        let hold = payment.as_ref().and_then(|p| p.capturable_ref()).map(str::to_string);
        if hold.is_none() {
            warn!(
                "💰️ Order #{} is frozen but its payment is {}, skipping",
                order.id,
                payment.map_or_else(|| "missing".to_string(), |p| p.status.to_string())
            );
        }
        Ok(hold)
    }

    async fn capture(&self, order: &Order, final_price: Money, base_price: Money) -> Result<Outcome> {
        let Some(hold) = self.hold_for(order).await? else {
            return Ok(Outcome::Skipped);
        };
        let delivery = order.authorized_delivery();
        let amount = order.total_amount.min(final_price + delivery);
        let charged_price = amount - delivery;

        self.gateway.capture(&hold, amount).await?;
        let recorded = self
            .store
            .record_capture(CaptureRecord {
                order_id: order.id,
                buyer: order.user_id,
                final_price: charged_price,
                captured: amount,
                savings: base_price - charged_price,
                change: StatusChange::new(
                    OrderStatus::Paid,
                    self.clock.now(),
                    format!("Captured {amount} at final price {charged_price}"),
                ),
            })
            .await?;
        if !recorded {
            return Err(GroupBuyError::InvariantViolation(format!(
                "captured {amount} on {hold} but order #{} was no longer frozen",
                order.id
            )));
        }
        debug!("💰️ Order #{} captured {amount} (authorized {})", order.id, order.total_amount);
        Ok(Outcome::Captured(amount))
    }

    async fn release(&self, group: &Group, order: &Order) -> Result<Outcome> {
        let Some(hold) = self.hold_for(order).await? else {
            return Ok(Outcome::Skipped);
        };
        self.gateway.cancel(&hold).await?;
        let recorded = self
            .store
            .record_release(ReleaseRecord {
                order_id: order.id,
                from: OrderStatus::Frozen,
                payment_status: PaymentStatus::Cancelled,
                change: StatusChange::new(
                    OrderStatus::Refunded,
                    self.clock.now(),
                    format!("Hold released: group {}", group.status),
                ),
            })
            .await?;
        if !recorded {
            return Err(GroupBuyError::InvariantViolation(format!(
                "released {hold} but order #{} was no longer frozen",
                order.id
            )));
        }
        debug!("💰️ Order #{} released", order.id);
        Ok(Outcome::Released)
    }
}

fn tally(report: &mut SettlementReport, order_id: OrderId, outcome: Result<Outcome>) {
    match outcome {
        Ok(Outcome::Captured(amount)) => {
            report.captured += 1;
            report.total_captured += amount;
        }
        Ok(Outcome::Released) => report.released += 1,
        Ok(Outcome::Skipped) => report.skipped += 1,
        Err(e @ GroupBuyError::InvariantViolation(_)) => {
            error!("🚨️ {e}");
            report.failures.push((order_id, e.to_string()));
        }
        Err(e) => {
            warn!("💰️ Order #{order_id} not settled, will retry: {e}");
            report.failures.push((order_id, e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::domain::group::{AdmissionRequest, GroupLimits, NewGroup};
    use crate::domain::money::Amount;
    use crate::domain::order::{DeliveryType, NewOrder};
    use crate::domain::ports::{PaymentGateway, UserStore};
    use crate::domain::pricing::{PriceSchedule, PriceTier};
    use crate::domain::product::Product;
    use crate::domain::user::UserStats;
    use crate::infrastructure::gateway::SimulatedGateway;
    use crate::infrastructure::in_memory::InMemoryStore;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    /// A completed group of `count` members where user 2 holds a frozen order priced at `snapshot`.
    async fn completed_group_with_order(count: u32, snapshot: Money) -> (InMemoryStore, SimulatedGateway, OrderId) {
        let store = InMemoryStore::new();
        let gateway = SimulatedGateway::new();
        store
            .upsert_product(Product {
                id: 1,
                name: "Headphones".to_string(),
                schedule: PriceSchedule::new(
                    Amount::new(dec!(25000)).unwrap(),
                    vec![
                        PriceTier::new(3, dec!(22000)).unwrap(),
                        PriceTier::new(10, dec!(19000)).unwrap(),
                    ],
                )
                .unwrap(),
                active: true,
                stock: 10,
            })
            .await
            .unwrap();
        for id in 1..=count as u64 {
            store.upsert_user(UserStats::new(id)).await.unwrap();
        }
        let now = Utc::now();
        let group = store
            .create_group(NewGroup {
                product_id: 1,
                creator_id: 1,
                limits: GroupLimits::new(2, 20).unwrap(),
                created_at: now,
                deadline: now + Duration::days(1),
            })
            .await
            .unwrap();
        for user_id in 2..=count as u64 {
            store
                .admit_member(AdmissionRequest {
                    group_id: group.id,
                    user_id,
                    invited_by: None,
                    at: now,
                    close_when_full: false,
                })
                .await
                .unwrap();
        }
        let order = store
            .insert_order(NewOrder {
                group_id: group.id,
                user_id: 2,
                final_price: snapshot,
                delivery: DeliveryType::Courier,
                delivery_cost: Money::new(dec!(490)),
                invited_by: None,
                created_at: now,
            })
            .await
            .unwrap();
        let hold = gateway.authorize(order.total_amount, order.id).await.unwrap();
        store.attach_hold(order.id, hold, now).await.unwrap();
        store
            .advance_order(order.id, OrderStatus::Pending, StatusChange::new(OrderStatus::Frozen, now, "held"))
            .await
            .unwrap();
        store
            .transition_group(group.id, GroupStatus::Completed, now)
            .await
            .unwrap();
        (store, gateway, order.id)
    }

    fn coordinator(store: &InMemoryStore, gateway: &SimulatedGateway) -> SettlementCoordinator {
        SettlementCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_capture_follows_price_drop() {
        let (store, gateway, order_id) = completed_group_with_order(10, Money::new(dec!(22000))).await;
        let report = coordinator(&store, &gateway).run().await.unwrap();
        assert_eq!(report.captured, 1);
        assert_eq!(report.total_captured, Money::new(dec!(19490)));

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.final_price, Money::new(dec!(19000)));
        let buyer = store.get_user(2).await.unwrap().unwrap();
        assert_eq!(buyer.total_orders, 1);
        assert_eq!(buyer.total_savings, Money::new(dec!(6000)));
    }

    #[tokio::test]
    async fn test_capture_never_exceeds_authorization() {
        // Snapshot below what the final headcount yields
        let (store, gateway, order_id) = completed_group_with_order(4, Money::new(dec!(19000))).await;
        let report = coordinator(&store, &gateway).run().await.unwrap();
        assert_eq!(report.total_captured, Money::new(dec!(19490)));
        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.final_price, Money::new(dec!(19000)));
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_order_frozen() {
        let (store, gateway, order_id) = completed_group_with_order(4, Money::new(dec!(22000))).await;
        gateway.fail_next(crate::error::GatewayError::Timeout).await;
        let coordinator = coordinator(&store, &gateway);

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.captured, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, order_id);
        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Frozen);

        let retry = coordinator.run().await.unwrap();
        assert_eq!(retry.captured, 1);
        assert!(retry.failures.is_empty());
        assert_eq!(coordinator.run().await.unwrap(), SettlementReport::default());
    }
}
