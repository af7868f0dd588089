use crate::domain::money::Money;
use crate::domain::order::DeliveryType;
use crate::domain::user::LoyaltyLevel;
use log::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MIN_PARTICIPANTS: u32 = 3;
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 100;
pub const DEFAULT_DEADLINE_DAYS: u32 = 7;
pub const DEFAULT_BONUS_PERCENT: Decimal = dec!(2.0);
pub const DEFAULT_LEVEL_MULTIPLIERS: [Decimal; 5] = [dec!(1.0), dec!(1.0), dec!(1.5), dec!(2.0), dec!(2.5)];
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SETTLEMENT_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_BOT_USERNAME: &str = "groupbuy_bot";

/// Organizer bonus: `final_price × participants × base_percent% × multiplier(level)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusPolicy {
    pub base_percent: Decimal,
    /// Indexed by `LoyaltyLevel::index()`.
    pub multipliers: [Decimal; 5],
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            base_percent: DEFAULT_BONUS_PERCENT,
            multipliers: DEFAULT_LEVEL_MULTIPLIERS,
        }
    }
}

impl BonusPolicy {
    pub fn multiplier(&self, level: LoyaltyLevel) -> Decimal {
        self.multipliers[level.index()]
    }

    pub fn bonus(&self, final_price: Money, participants: u32, level: LoyaltyLevel) -> Money {
        let rate = self.base_percent / dec!(100) * self.multiplier(level);
        (final_price * Decimal::from(participants) * rate).round_cents()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCosts {
    pub courier: Money,
    pub pickup: Money,
    pub post: Money,
}

impl Default for DeliveryCosts {
    fn default() -> Self {
        Self {
            courier: Money::new(dec!(490)),
            pickup: Money::new(dec!(290)),
            post: Money::new(dec!(350)),
        }
    }
}

impl DeliveryCosts {
    pub fn cost(&self, delivery: DeliveryType) -> Money {
        match delivery {
            DeliveryType::Courier => self.courier,
            DeliveryType::Pickup => self.pickup,
            DeliveryType::Post => self.post,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub default_min_participants: u32,
    pub default_max_participants: u32,
    pub default_deadline_days: u32,
    pub bonus: BonusPolicy,
    pub gateway_timeout: Duration,
    pub sweep_interval: Duration,
    pub settlement_interval: Duration,
    pub bot_username: String,
    pub delivery: DeliveryCosts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_min_participants: DEFAULT_MIN_PARTICIPANTS,
            default_max_participants: DEFAULT_MAX_PARTICIPANTS,
            default_deadline_days: DEFAULT_DEADLINE_DAYS,
            bonus: BonusPolicy::default(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            settlement_interval: DEFAULT_SETTLEMENT_INTERVAL,
            bot_username: DEFAULT_BOT_USERNAME.to_string(),
            delivery: DeliveryCosts::default(),
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {key}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

fn secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(key, default.as_secs()))
}

fn money_or(key: &str, default: Money) -> Money {
    Money::new(parse_or(key, default.value()))
}

fn multipliers_or(key: &str, default: [Decimal; 5]) -> [Decimal; 5] {
    let Ok(s) = env::var(key) else {
        return default;
    };
    let parsed = s
        .split(',')
        .map(|part| Decimal::from_str(part.trim()))
        .collect::<Result<Vec<_>, _>>();
    match parsed.map(<[Decimal; 5]>::try_from) {
        Ok(Ok(values)) => values,
        _ => {
            error!("🪛️ {key} must be five comma-separated decimals, one per loyalty level. Using the defaults.");
            default
        }
    }
}

impl EngineConfig {
    /// Reads `GROUPBUY_*` variables. Anything missing or unparseable keeps its default.
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let default_min_participants = parse_or("GROUPBUY_MIN_PARTICIPANTS", defaults.default_min_participants);
        let default_max_participants = parse_or("GROUPBUY_MAX_PARTICIPANTS", defaults.default_max_participants);
        let default_deadline_days = parse_or("GROUPBUY_DEADLINE_DAYS", defaults.default_deadline_days);
        let bonus = BonusPolicy {
            base_percent: parse_or("GROUPBUY_BONUS_PERCENT", defaults.bonus.base_percent),
            multipliers: multipliers_or("GROUPBUY_LEVEL_MULTIPLIERS", defaults.bonus.multipliers),
        };
        let gateway_timeout = secs_or("GROUPBUY_GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout);
        let sweep_interval = secs_or("GROUPBUY_SWEEP_INTERVAL_SECS", defaults.sweep_interval);
        let settlement_interval = secs_or("GROUPBUY_SETTLEMENT_INTERVAL_SECS", defaults.settlement_interval);
        let bot_username = env::var("GROUPBUY_BOT_USERNAME").unwrap_or_else(|_| {
            debug!("🪛️ GROUPBUY_BOT_USERNAME is not set. Share links will use {DEFAULT_BOT_USERNAME}.");
            defaults.bot_username.clone()
        });
        let delivery = DeliveryCosts {
            courier: money_or("GROUPBUY_DELIVERY_COURIER", defaults.delivery.courier),
            pickup: money_or("GROUPBUY_DELIVERY_PICKUP", defaults.delivery.pickup),
            post: money_or("GROUPBUY_DELIVERY_POST", defaults.delivery.post),
        };
        if default_min_participants > default_max_participants {
            warn!(
                "🪛️ GROUPBUY_MIN_PARTICIPANTS ({default_min_participants}) exceeds GROUPBUY_MAX_PARTICIPANTS \
                 ({default_max_participants}). Groups created with defaults will be rejected."
            );
        }
        Self {
            default_min_participants,
            default_max_participants,
            default_deadline_days,
            bonus,
            gateway_timeout,
            sweep_interval,
            settlement_interval,
            bot_username,
            delivery,
        }
    }
}
