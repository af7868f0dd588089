use crate::domain::pricing::PriceSchedule;
use serde::{Deserialize, Serialize};

pub type ProductId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(flatten)]
    pub schedule: PriceSchedule,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub stock: u32,
}

fn default_active() -> bool {
    true
}

impl Product {
    pub fn is_orderable(&self) -> bool {
        self.active && self.stock > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use rust_decimal_macros::dec;

    #[test]
    fn test_product_deserialization() {
        let json = r#"{
            "id": 1,
            "name": "Headphones",
            "base_price": "25000",
            "tiers": [{"min_participants": 3, "price": "22000"}],
            "stock": 10
        }"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert!(product.active);
        assert!(product.is_orderable());
        assert_eq!(product.schedule.base_price(), Money::new(dec!(25000)));
        assert_eq!(product.schedule.current_price(3), Money::new(dec!(22000)));
    }
}
