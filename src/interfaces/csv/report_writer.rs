use crate::domain::group::{Group, GroupId, GroupStatus};
use crate::domain::money::Money;
use crate::domain::order::{Order, OrderId, OrderStatus, Payment, PaymentStatus};
use crate::domain::product::ProductId;
use crate::domain::user::UserId;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRow {
    pub order: OrderId,
    pub group: GroupId,
    pub user: UserId,
    pub status: OrderStatus,
    pub final_price: Money,
    pub total: Money,
    pub payment: Option<PaymentStatus>,
    pub captured: Option<Money>,
}

impl OrderRow {
    pub fn new(order: &Order, payment: Option<&Payment>) -> Self {
        Self {
            order: order.id,
            group: order.group_id,
            user: order.user_id,
            status: order.status,
            final_price: order.final_price,
            total: order.total_amount,
            payment: payment.map(|p| p.status),
            captured: payment.and_then(|p| p.captured_amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    pub group: GroupId,
    pub product: ProductId,
    pub creator: UserId,
    pub status: GroupStatus,
    pub participants: u32,
    pub min: u32,
    pub max: u32,
    pub price: Money,
}

impl GroupRow {
    pub fn new(group: &Group, price: Money) -> Self {
        Self {
            group: group.id,
            product: group.product_id,
            creator: group.creator_id,
            status: group.status,
            participants: group.current_count,
            min: group.min_participants,
            max: group.max_participants,
            price,
        }
    }
}

/// Writes report rows as CSV with a header line.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows<T: Serialize>(&mut self, rows: impl IntoIterator<Item = T>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{DeliveryType, NewOrder};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_rows() {
        let order = NewOrder {
            group_id: 4,
            user_id: 9,
            final_price: Money::new(dec!(22000)),
            delivery: DeliveryType::Courier,
            delivery_cost: Money::new(dec!(490)),
            invited_by: None,
            created_at: Utc::now(),
        }
        .into_order(1);
        let mut payment = Payment::pending(1, order.total_amount, Utc::now());
        payment.status = PaymentStatus::Charged;
        payment.captured_amount = Some(Money::new(dec!(19490)));

        let mut out = Vec::new();
        let mut writer = ReportWriter::new(&mut out);
        writer
            .write_rows([
                OrderRow::new(&order, Some(&payment)),
                OrderRow::new(&order, None),
            ])
            .unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "order,group,user,status,final_price,total,payment,captured");
        assert_eq!(lines[1], "1,4,9,pending,22000,22490,charged,19490");
        assert_eq!(lines[2], "1,4,9,pending,22000,22490,,");
    }
}
