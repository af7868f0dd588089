use crate::domain::money::Money;
use crate::domain::order::OrderId;
use crate::domain::ports::{HoldRef, PaymentGateway};
use crate::error::GatewayError;
use async_trait::async_trait;
use log::*;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    /// Funds reserved, awaiting capture.
    Authorized,
    Captured(Money),
    Cancelled,
    Refunded(Money),
}

impl HoldState {
    fn name(&self) -> &'static str {
        match self {
            HoldState::Authorized => "authorized",
            HoldState::Captured(_) => "captured",
            HoldState::Cancelled => "cancelled",
            HoldState::Refunded(_) => "refunded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub order_ref: OrderId,
    pub authorized: Money,
    pub state: HoldState,
}

#[derive(Default)]
struct Ledger {
    holds: HashMap<HoldRef, Hold>,
    last_ref: u64,
    failures: VecDeque<GatewayError>,
}

/// An in-process gateway that keeps its own hold ledger and enforces the
/// authorize → capture/cancel protocol. Failures can be queued to exercise error paths.
#[derive(Clone, Default)]
pub struct SimulatedGateway {
    ledger: Arc<Mutex<Ledger>>,
    latency: Option<Duration>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next call, whatever it is, fails with `error`. Queued failures are consumed in order.
    pub async fn fail_next(&self, error: GatewayError) {
        self.ledger.lock().await.failures.push_back(error);
    }

    pub async fn hold(&self, hold: &str) -> Option<Hold> {
        self.ledger.lock().await.holds.get(hold).cloned()
    }

    /// Total ever captured, including charges later refunded.
    pub async fn captured_total(&self) -> Money {
        self.ledger
            .lock()
            .await
            .holds
            .values()
            .filter_map(|h| match h.state {
                HoldState::Captured(amount) | HoldState::Refunded(amount) => Some(amount),
                _ => None,
            })
            .sum()
    }

    async fn enter(&self) -> GatewayResult<tokio::sync::MutexGuard<'_, Ledger>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut ledger = self.ledger.lock().await;
        let injected = ledger.failures.pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(ledger),
        }
    }
}

fn invalid_state(hold: &str, state: HoldState) -> GatewayError {
    GatewayError::InvalidHoldState {
        hold: hold.to_string(),
        state: state.name().to_string(),
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(&self, amount: Money, order_ref: OrderId) -> GatewayResult<HoldRef> {
        let mut ledger = self.enter().await?;
        if !amount.is_positive() {
            return Err(GatewayError::Declined(format!("invalid amount {amount}")));
        }
        ledger.last_ref += 1;
        let hold_ref = format!("hold-{:06}", ledger.last_ref);
        ledger.holds.insert(
            hold_ref.clone(),
            Hold {
                order_ref,
                authorized: amount,
                state: HoldState::Authorized,
            },
        );
        trace!("💳️ Authorized {amount} for order #{order_ref} as {hold_ref}");
        Ok(hold_ref)
    }

    async fn capture(&self, hold: &str, amount: Money) -> GatewayResult<()> {
        let mut ledger = self.enter().await?;
        let entry = ledger
            .holds
            .get_mut(hold)
            .ok_or_else(|| GatewayError::UnknownHold(hold.to_string()))?;
        if entry.state != HoldState::Authorized {
            return Err(invalid_state(hold, entry.state));
        }
        if amount > entry.authorized {
            return Err(GatewayError::AmountExceedsHold {
                requested: amount.to_string(),
                authorized: entry.authorized.to_string(),
            });
        }
        entry.state = HoldState::Captured(amount);
        trace!("💳️ Captured {amount} on {hold}");
        Ok(())
    }

    async fn cancel(&self, hold: &str) -> GatewayResult<()> {
        let mut ledger = self.enter().await?;
        let entry = ledger
            .holds
            .get_mut(hold)
            .ok_or_else(|| GatewayError::UnknownHold(hold.to_string()))?;
        if entry.state != HoldState::Authorized {
            return Err(invalid_state(hold, entry.state));
        }
        entry.state = HoldState::Cancelled;
        trace!("💳️ Released {hold}");
        Ok(())
    }

    async fn refund(&self, charge: &str, amount: Money) -> GatewayResult<()> {
        let mut ledger = self.enter().await?;
        let entry = ledger
            .holds
            .get_mut(charge)
            .ok_or_else(|| GatewayError::UnknownHold(charge.to_string()))?;
        let HoldState::Captured(captured) = entry.state else {
            return Err(invalid_state(charge, entry.state));
        };
        if amount > captured {
            return Err(GatewayError::AmountExceedsHold {
                requested: amount.to_string(),
                authorized: captured.to_string(),
            });
        }
        entry.state = HoldState::Refunded(amount);
        trace!("💳️ Refunded {amount} on {charge}");
        Ok(())
    }
}

/// Bounds every call to the wrapped gateway. An elapsed deadline is reported as
/// `GatewayError::Timeout`, which callers treat as retryable, never as success.
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G: PaymentGateway> TimeoutGateway<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &str, call: impl Future<Output = GatewayResult<T>>) -> GatewayResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("💳️ Gateway {op} did not answer within {:?}", self.timeout);
                Err(GatewayError::Timeout)
            }
        }
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for TimeoutGateway<G> {
    async fn authorize(&self, amount: Money, order_ref: OrderId) -> GatewayResult<HoldRef> {
        self.bounded("authorize", self.inner.authorize(amount, order_ref)).await
    }

    async fn capture(&self, hold: &str, amount: Money) -> GatewayResult<()> {
        self.bounded("capture", self.inner.capture(hold, amount)).await
    }

    async fn cancel(&self, hold: &str) -> GatewayResult<()> {
        self.bounded("cancel", self.inner.cancel(hold)).await
    }

    async fn refund(&self, charge: &str, amount: Money) -> GatewayResult<()> {
        self.bounded("refund", self.inner.refund(charge, amount)).await
    }
}
