#![allow(dead_code)]

use chrono::Utc;
use groupbuy::application::checkout::CheckoutService;
use groupbuy::application::lifecycle::{CreateGroup, GroupLifecycleManager};
use groupbuy::application::settlement::SettlementCoordinator;
use groupbuy::application::sweep::ExpirySweep;
use groupbuy::config::EngineConfig;
use groupbuy::domain::clock::{ClockHandle, ManualClock};
use groupbuy::domain::group::Group;
use groupbuy::domain::money::Amount;
use groupbuy::domain::ports::{ProductStore, UserStore};
use groupbuy::domain::pricing::{PriceSchedule, PriceTier};
use groupbuy::domain::product::{Product, ProductId};
use groupbuy::domain::user::UserStats;
use groupbuy::infrastructure::gateway::SimulatedGateway;
use groupbuy::infrastructure::in_memory::InMemoryStore;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const HEADPHONES: ProductId = 1;
pub const USERS: u64 = 40;

/// Every service wired over one in-memory store, a simulated gateway and a manual clock.
pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: SimulatedGateway,
    pub clock: ManualClock,
    pub lifecycle: GroupLifecycleManager,
    pub checkout: CheckoutService,
    pub sweep: ExpirySweep,
    pub settlement: SettlementCoordinator,
}

/// Headphones: base 25000, 22000 from 3 members, 19000 from 10. Users 1..=40.
pub async fn harness() -> Harness {
    harness_with(SimulatedGateway::new()).await
}

pub async fn harness_with(gateway: SimulatedGateway) -> Harness {
    let store = InMemoryStore::new();
    store
        .upsert_product(Product {
            id: HEADPHONES,
            name: "Headphones".to_string(),
            schedule: PriceSchedule::new(
                Amount::new(dec!(25000)).unwrap(),
                vec![
                    PriceTier::new(10, dec!(19000)).unwrap(),
                    PriceTier::new(3, dec!(22000)).unwrap(),
                ],
            )
            .unwrap(),
            active: true,
            stock: 100,
        })
        .await
        .unwrap();
    for id in 1..=USERS {
        store.upsert_user(UserStats::new(id)).await.unwrap();
    }

    let clock = ManualClock::new(Utc::now());
    let clock_handle: ClockHandle = Arc::new(clock.clone());
    let config = Arc::new(EngineConfig::default());
    let lifecycle = GroupLifecycleManager::new(Arc::new(store.clone()), clock_handle.clone(), config.clone());
    let checkout = CheckoutService::new(
        lifecycle.clone(),
        Arc::new(gateway.clone()),
        clock_handle.clone(),
        config,
    );
    let sweep = ExpirySweep::new(lifecycle.clone(), clock_handle.clone());
    let settlement = SettlementCoordinator::new(Arc::new(store.clone()), Arc::new(gateway.clone()), clock_handle);

    Harness {
        store,
        gateway,
        clock,
        lifecycle,
        checkout,
        sweep,
        settlement,
    }
}

impl Harness {
    /// A headphones group run by user 1 with the given limits and a seven day deadline.
    pub async fn group(&self, min: u32, max: u32) -> Group {
        self.lifecycle
            .create(CreateGroup::new(HEADPHONES, 1).with_limits(min, max).with_deadline_days(7))
            .await
            .unwrap()
    }
}
