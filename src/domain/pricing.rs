//! Tiered group pricing.
//!
//! A tier `(min_participants, price)` reads "once the group has at least `min_participants`
//! members, everyone pays `price`". Tier lists may arrive in any order and are never
//! assumed to be monotonic, so every function here sorts its own copy.
//!
//! All functions are pure and accept an empty tier list.

use crate::domain::money::{Amount, Money};
use crate::error::GroupBuyError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    pub min_participants: u32,
    pub price: Amount,
}

impl PriceTier {
    pub fn new(min_participants: u32, price: Decimal) -> Result<Self, GroupBuyError> {
        if min_participants == 0 {
            return Err(GroupBuyError::ValidationError(
                "Tier threshold must be at least 1 participant".to_string(),
            ));
        }
        Ok(Self {
            min_participants,
            price: Amount::new(price)?,
        })
    }

    pub fn price(&self) -> Money {
        self.price.into()
    }
}

/// The tier the group would reach next and what it is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextTier {
    pub price: Money,
    pub min_participants: u32,
    pub people_needed: u32,
    /// Drop from the currently reached tier's price. Zero when no tier is reached yet.
    pub savings_per_person: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Savings {
    pub amount: Money,
    /// Percentage of the base price, rounded to one decimal place.
    pub percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierProgress {
    pub price: Money,
    pub min_participants: u32,
    pub reached: bool,
    pub is_current_tier: bool,
    /// 0–100, rounded to one decimal place.
    pub progress_percent: Decimal,
}

/// Everything the UI needs to describe a group's price at a given headcount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceInfo {
    pub current_price: Money,
    pub base_price: Money,
    pub best_price: Money,
    pub savings: Savings,
    pub participants: u32,
    pub next_tier: Option<NextTier>,
}

fn sorted_ascending(tiers: &[PriceTier]) -> Vec<PriceTier> {
    let mut sorted = tiers.to_vec();
    sorted.sort_by_key(|t| t.min_participants);
    sorted
}

/// Price of the highest-threshold tier reached by `count`.
///
/// Falls back to `base_price` when no tier is reached. Without a base price the
/// lowest-threshold tier's price is used, and zero for an empty schedule.
pub fn current_price(tiers: &[PriceTier], count: u32, base_price: Option<Money>) -> Money {
    let sorted = sorted_ascending(tiers);
    if let Some(tier) = sorted.iter().rev().find(|t| t.min_participants <= count) {
        return tier.price();
    }
    match base_price {
        Some(base) => base,
        None => sorted.first().map(PriceTier::price).unwrap_or(Money::ZERO),
    }
}

/// Price at the largest threshold, which is not necessarily the numerically lowest price.
pub fn best_price(tiers: &[PriceTier], base_price: Money) -> Money {
    tiers
        .iter()
        .max_by_key(|t| t.min_participants)
        .map(PriceTier::price)
        .unwrap_or(base_price)
}

/// The lowest-threshold tier still above `count`.
pub fn next_tier(tiers: &[PriceTier], count: u32) -> Option<NextTier> {
    let sorted = sorted_ascending(tiers);
    let reached = sorted.iter().rev().find(|t| t.min_participants <= count);
    let next = sorted.iter().find(|t| t.min_participants > count)?;
    let savings_per_person = reached
        .map(|r| r.price() - next.price())
        .unwrap_or(Money::ZERO);
    Some(NextTier {
        price: next.price(),
        min_participants: next.min_participants,
        people_needed: next.min_participants - count,
        savings_per_person,
    })
}

pub fn savings(base: Money, current: Money) -> Savings {
    let amount = base - current;
    let percent = if base.is_positive() {
        (amount.value() / base.value() * Decimal::ONE_HUNDRED).round_dp(1)
    } else {
        Decimal::ZERO
    };
    Savings { amount, percent }
}

/// Per-tier progress, ascending by threshold.
///
/// Within an unreached tier, progress interpolates linearly between the previous
/// tier's threshold (zero for the first tier) and this tier's threshold.
pub fn tier_progress(tiers: &[PriceTier], count: u32) -> Vec<TierProgress> {
    let sorted = sorted_ascending(tiers);
    let current_threshold = sorted
        .iter()
        .rev()
        .find(|t| t.min_participants <= count)
        .map(|t| t.min_participants);

    let mut previous = 0u32;
    let mut current_marked = false;
    let mut result = Vec::with_capacity(sorted.len());
    for tier in &sorted {
        let reached = count >= tier.min_participants;
        let is_current_tier =
            !current_marked && reached && Some(tier.min_participants) == current_threshold;
        current_marked |= is_current_tier;

        let progress_percent = if reached {
            Decimal::ONE_HUNDRED
        } else {
            let span = Decimal::from(tier.min_participants - previous);
            let done = Decimal::from(count) - Decimal::from(previous);
            (done / span * Decimal::ONE_HUNDRED)
                .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
                .round_dp(1)
        };

        result.push(TierProgress {
            price: tier.price(),
            min_participants: tier.min_participants,
            reached,
            is_current_tier,
            progress_percent,
        });
        previous = tier.min_participants;
    }
    result
}

pub fn price_info(tiers: &[PriceTier], base_price: Money, count: u32) -> PriceInfo {
    let current = current_price(tiers, count, Some(base_price));
    PriceInfo {
        current_price: current,
        base_price,
        best_price: best_price(tiers, base_price),
        savings: savings(base_price, current),
        participants: count,
        next_tier: next_tier(tiers, count),
    }
}

/// Short status line about the price, used in join confirmations and reminders.
pub fn price_message(tiers: &[PriceTier], base_price: Money, count: u32) -> String {
    let info = price_info(tiers, base_price, count);
    let mut lines = Vec::with_capacity(2);
    if info.savings.percent > Decimal::ZERO {
        lines.push(format!(
            "💰 Current price: {} (save {}%)",
            info.current_price.display_whole(),
            info.savings.percent.round().to_i64().unwrap_or_default()
        ));
    } else {
        lines.push(format!(
            "💰 Current price: {}",
            info.current_price.display_whole()
        ));
    }
    if let Some(next) = info.next_tier {
        lines.push(format!(
            "👥 {} more and the price becomes {}!",
            next.people_needed,
            next.price.display_whole()
        ));
    }
    lines.join("\n")
}

pub fn share_text(product_name: &str, tiers: &[PriceTier], base_price: Money, count: u32) -> String {
    let info = price_info(tiers, base_price, count);
    format!(
        "🛍 Group buy: {product_name}!\n\n💰 Now: {}\n🎯 Could be: {}\n👥 Already {count} people\n\nJoin in 👇",
        info.current_price.display_whole(),
        info.best_price.display_whole(),
    )
}

/// A product's base price together with its tier table, sorted on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule")]
pub struct PriceSchedule {
    base_price: Amount,
    tiers: Vec<PriceTier>,
}

#[derive(Deserialize)]
struct RawSchedule {
    base_price: Amount,
    #[serde(default)]
    tiers: Vec<PriceTier>,
}

impl TryFrom<RawSchedule> for PriceSchedule {
    type Error = GroupBuyError;

    fn try_from(raw: RawSchedule) -> Result<Self, Self::Error> {
        Self::new(raw.base_price, raw.tiers)
    }
}

impl PriceSchedule {
    pub fn new(base_price: Amount, tiers: Vec<PriceTier>) -> Result<Self, GroupBuyError> {
        if let Some(bad) = tiers.iter().find(|t| t.min_participants == 0) {
            return Err(GroupBuyError::ValidationError(format!(
                "Tier priced {} has a zero participant threshold",
                bad.price()
            )));
        }
        Ok(Self {
            base_price,
            tiers: sorted_ascending(&tiers),
        })
    }

    pub fn base_price(&self) -> Money {
        self.base_price.into()
    }

    pub fn tiers(&self) -> &[PriceTier] {
        &self.tiers
    }

    pub fn current_price(&self, count: u32) -> Money {
        current_price(&self.tiers, count, Some(self.base_price()))
    }

    pub fn best_price(&self) -> Money {
        best_price(&self.tiers, self.base_price())
    }

    pub fn next_tier(&self, count: u32) -> Option<NextTier> {
        next_tier(&self.tiers, count)
    }

    pub fn tier_progress(&self, count: u32) -> Vec<TierProgress> {
        tier_progress(&self.tiers, count)
    }

    pub fn info(&self, count: u32) -> PriceInfo {
        price_info(&self.tiers, self.base_price(), count)
    }
}
