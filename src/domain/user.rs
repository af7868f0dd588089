use crate::domain::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = u64;

/// Loyalty levels, lowest first. The order matters: promotions only ever move right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyLevel {
    #[default]
    Newcomer,
    Buyer,
    Activist,
    Expert,
    Ambassador,
}

/// Thresholds a user must meet, all at once, to hold a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRequirement {
    pub orders: u32,
    pub invited: u32,
    pub groups_organized: u32,
}

impl LoyaltyLevel {
    pub const ALL: [LoyaltyLevel; 5] = [
        LoyaltyLevel::Newcomer,
        LoyaltyLevel::Buyer,
        LoyaltyLevel::Activist,
        LoyaltyLevel::Expert,
        LoyaltyLevel::Ambassador,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn requirement(self) -> LevelRequirement {
        let (orders, invited, groups_organized) = match self {
            LoyaltyLevel::Newcomer => (0, 0, 0),
            LoyaltyLevel::Buyer => (3, 0, 0),
            LoyaltyLevel::Activist => (10, 20, 0),
            LoyaltyLevel::Expert => (25, 0, 5),
            LoyaltyLevel::Ambassador => (50, 0, 15),
        };
        LevelRequirement {
            orders,
            invited,
            groups_organized,
        }
    }

    /// Highest level whose requirements `stats` satisfy.
    pub fn qualified_for(stats: &UserStats) -> LoyaltyLevel {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|level| {
                let req = level.requirement();
                stats.total_orders >= req.orders
                    && stats.invited_count >= req.invited
                    && stats.groups_organized >= req.groups_organized
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for LoyaltyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoyaltyLevel::Newcomer => "newcomer",
            LoyaltyLevel::Buyer => "buyer",
            LoyaltyLevel::Activist => "activist",
            LoyaltyLevel::Expert => "expert",
            LoyaltyLevel::Ambassador => "ambassador",
        };
        f.write_str(name)
    }
}

/// Per-user aggregates mutated by group and settlement outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub id: UserId,
    #[serde(default)]
    pub level: LoyaltyLevel,
    #[serde(default)]
    pub total_orders: u32,
    #[serde(default)]
    pub total_savings: Money,
    #[serde(default)]
    pub invited_count: u32,
    #[serde(default)]
    pub groups_organized: u32,
}

impl UserStats {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            level: LoyaltyLevel::Newcomer,
            total_orders: 0,
            total_savings: Money::ZERO,
            invited_count: 0,
            groups_organized: 0,
        }
    }

    pub fn with_level(mut self, level: LoyaltyLevel) -> Self {
        self.level = level;
        self
    }

    /// Records a settled purchase and promotes the user if they now qualify.
    pub fn record_purchase(&mut self, savings: Money) {
        self.total_orders += 1;
        self.total_savings += savings;
        self.promote();
    }

    /// Never demotes: a level granted by an admin or earlier stats is kept.
    pub fn promote(&mut self) -> bool {
        let qualified = LoyaltyLevel::qualified_for(self);
        if qualified > self.level {
            self.level = qualified;
            true
        } else {
            false
        }
    }
}
