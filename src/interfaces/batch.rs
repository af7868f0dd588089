use crate::application::checkout::CheckoutService;
use crate::application::lifecycle::{CreateGroup, GroupLifecycleManager};
use crate::application::settlement::SettlementCoordinator;
use crate::application::sweep::ExpirySweep;
use crate::config::EngineConfig;
use crate::domain::clock::ManualClock;
use crate::domain::group::{Group, GroupStatus};
use crate::domain::ports::{GatewayHandle, GroupStore, OrderStore, ProductStore, StoreHandle, UserStore};
use crate::domain::product::Product;
use crate::domain::user::UserStats;
use crate::error::{GroupBuyError, Result};
use crate::interfaces::csv::command_reader::{Command, CommandOp};
use crate::interfaces::csv::report_writer::{GroupRow, OrderRow};
use chrono::Duration;
use serde::Deserialize;
use std::sync::Arc;

/// Products and users to seed a run with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub users: Vec<UserStats>,
}

/// Replays a command script against the engine on a simulated clock.
pub struct BatchRunner {
    store: StoreHandle,
    clock: ManualClock,
    lifecycle: GroupLifecycleManager,
    checkout: CheckoutService,
    sweep: ExpirySweep,
    settlement: SettlementCoordinator,
}

impl BatchRunner {
    pub fn new(store: StoreHandle, gateway: GatewayHandle, clock: ManualClock, config: Arc<EngineConfig>) -> Self {
        let clock_handle = Arc::new(clock.clone());
        let lifecycle = GroupLifecycleManager::new(store.clone(), clock_handle.clone(), config.clone());
        let checkout = CheckoutService::new(lifecycle.clone(), gateway.clone(), clock_handle.clone(), config);
        let sweep = ExpirySweep::new(lifecycle.clone(), clock_handle.clone());
        let settlement = SettlementCoordinator::new(store.clone(), gateway, clock_handle);
        Self {
            store,
            clock,
            lifecycle,
            checkout,
            sweep,
            settlement,
        }
    }

    pub async fn load_catalog(&self, catalog: Catalog) -> Result<()> {
        for product in catalog.products {
            self.store.upsert_product(product).await?;
        }
        for user in catalog.users {
            self.store.upsert_user(user).await?;
        }
        Ok(())
    }

    /// Runs one command and returns a one-line summary of what happened.
    pub async fn execute(&self, command: &Command) -> Result<String> {
        match command.op {
            CommandOp::Create => {
                let group = self
                    .lifecycle
                    .create(CreateGroup::new(command.product()?, command.user()?))
                    .await?;
                Ok(format!("group {} created for product {}", group.id, group.product_id))
            }
            CommandOp::Join => {
                let receipt = self
                    .lifecycle
                    .join(command.group()?, command.user()?, command.invited_by)
                    .await?;
                Ok(format!(
                    "user {} joined group {}: {}",
                    receipt.user_id, receipt.group_id, receipt.message
                ))
            }
            CommandOp::Order => {
                let order = self
                    .checkout
                    .place_order(command.group()?, command.user()?, command.delivery(), command.invited_by)
                    .await?;
                Ok(format!("order {} holds {}", order.id, order.total_amount))
            }
            CommandOp::Leave => {
                let group = self.lifecycle.leave(command.group()?, command.user()?).await?;
                Ok(format!("group {} now has {} members", group.id, group.current_count))
            }
            CommandOp::Cancel => {
                let change = self.lifecycle.cancel(command.group()?, command.user()?).await?;
                Ok(format!("group {} is {}", change.group_id, change.new_status))
            }
            CommandOp::CancelOrder => {
                let (group_id, user_id) = (command.group()?, command.user()?);
                let order = self
                    .store
                    .live_order_for(group_id, user_id)
                    .await?
                    .ok_or_else(|| {
                        GroupBuyError::NotFound(format!("Order of user {user_id} in group #{group_id}"))
                    })?;
                let order = self.checkout.cancel_order(order.id, user_id).await?;
                Ok(format!("order {} is {}", order.id, order.status))
            }
            CommandOp::Advance => {
                let hours = command.hours()?;
                self.clock.advance(Duration::hours(hours));
                Ok(format!("clock moved {hours}h"))
            }
            CommandOp::Sweep => {
                let report = self.sweep.run().await?;
                Ok(format!(
                    "sweep: {} completed, {} failed, {} errors",
                    report.completed.len(),
                    report.failed.len(),
                    report.errors.len()
                ))
            }
            CommandOp::Settle => {
                let report = self.settlement.run().await?;
                Ok(format!(
                    "settle: {} captured, {} released, {} skipped, {} failed",
                    report.captured,
                    report.released,
                    report.skipped,
                    report.failures.len()
                ))
            }
        }
    }

    pub async fn order_rows(&self) -> Result<Vec<OrderRow>> {
        let mut rows = Vec::new();
        for order in self.store.all_orders().await? {
            let payment = self.store.get_payment(order.id).await?;
            rows.push(OrderRow::new(&order, payment.as_ref()));
        }
        rows.sort_by_key(|r| r.order);
        Ok(rows)
    }

    pub async fn group_rows(&self) -> Result<Vec<GroupRow>> {
        let mut groups: Vec<Group> = Vec::new();
        for status in [
            GroupStatus::Active,
            GroupStatus::Completed,
            GroupStatus::Failed,
            GroupStatus::Cancelled,
        ] {
            groups.extend(self.store.groups_by_status(status).await?);
        }
        groups.sort_by_key(|g| g.id);

        let mut rows = Vec::with_capacity(groups.len());
        for group in &groups {
            let price = self
                .store
                .get_product(group.product_id)
                .await?
                .map(|p| p.schedule.current_price(group.current_count))
                .unwrap_or_default();
            rows.push(GroupRow::new(group, price));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gateway::SimulatedGateway;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::interfaces::csv::command_reader::CommandReader;
    use chrono::Utc;

    const CATALOG: &str = r#"{
        "products": [{"id": 1, "name": "Headphones", "base_price": "25000",
                      "tiers": [{"min_participants": 3, "price": "22000"}], "stock": 5}],
        "users": [{"id": 1}, {"id": 2}, {"id": 3}]
    }"#;

    #[tokio::test]
    async fn test_script_runs_to_settlement() {
        let runner = BatchRunner::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedGateway::new()),
            ManualClock::new(Utc::now()),
            Arc::new(EngineConfig::default()),
        );
        runner
            .load_catalog(serde_json::from_str(CATALOG).unwrap())
            .await
            .unwrap();

        let script = "op,user,group,product,invited_by,delivery,hours\n\
                      create,1,,1,,,\n\
                      order,2,1,,1,courier,\n\
                      order,3,1,,,post,\n\
                      advance,,,,,,200\n\
                      sweep,,,,,,\n\
                      settle,,,,,,\n";
        for command in CommandReader::new(script.as_bytes()).commands() {
            runner.execute(&command.unwrap()).await.unwrap();
        }

        let groups = runner.group_rows().await.unwrap();
        assert_eq!(groups[0].status, GroupStatus::Completed);
        assert_eq!(groups[0].participants, 3);

        let orders = runner.order_rows().await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.status == crate::domain::order::OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_cancel_order_needs_a_live_order() {
        let runner = BatchRunner::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedGateway::new()),
            ManualClock::new(Utc::now()),
            Arc::new(EngineConfig::default()),
        );
        let command = Command {
            op: CommandOp::CancelOrder,
            user: Some(2),
            group: Some(1),
            product: None,
            invited_by: None,
            delivery: None,
            hours: None,
        };
        assert!(matches!(
            runner.execute(&command).await,
            Err(GroupBuyError::NotFound(_))
        ));
    }
}
