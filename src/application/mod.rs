//! Application layer: the services that drive the domain through the store and
//! gateway ports.
//!
//! `GroupLifecycleManager` owns group transitions, `CheckoutService` ties orders and
//! payment holds to them, and `ExpirySweep` plus `SettlementCoordinator` are the
//! periodic jobs the scheduler runs in that order.

pub mod checkout;
pub mod lifecycle;
pub mod scheduler;
pub mod settlement;
pub mod sweep;
