use crate::domain::group::GroupId;
use crate::domain::order::DeliveryType;
use crate::domain::product::ProductId;
use crate::domain::user::UserId;
use crate::error::{GroupBuyError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    Create,
    Join,
    Order,
    Leave,
    Cancel,
    CancelOrder,
    /// Moves the simulated clock forward by `hours`.
    Advance,
    Sweep,
    Settle,
}

/// One line of a command script. Which columns are required depends on `op`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Command {
    pub op: CommandOp,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub product: Option<ProductId>,
    #[serde(default)]
    pub invited_by: Option<UserId>,
    #[serde(default)]
    pub delivery: Option<DeliveryType>,
    #[serde(default)]
    pub hours: Option<i64>,
}

fn missing(op: CommandOp, column: &str) -> GroupBuyError {
    GroupBuyError::ValidationError(format!("'{column}' is required for {op:?}"))
}

impl Command {
    pub fn user(&self) -> Result<UserId> {
        self.user.ok_or_else(|| missing(self.op, "user"))
    }

    pub fn group(&self) -> Result<GroupId> {
        self.group.ok_or_else(|| missing(self.op, "group"))
    }

    pub fn product(&self) -> Result<ProductId> {
        self.product.ok_or_else(|| missing(self.op, "product"))
    }

    pub fn hours(&self) -> Result<i64> {
        match self.hours {
            Some(h) if h >= 0 => Ok(h),
            Some(h) => Err(GroupBuyError::ValidationError(format!(
                "Cannot move the clock back by {} hours",
                -h
            ))),
            None => Err(missing(self.op, "hours")),
        }
    }

    /// Defaults to pickup.
    pub fn delivery(&self) -> DeliveryType {
        self.delivery.unwrap_or(DeliveryType::Pickup)
    }
}

/// Reads commands from a CSV source with an `op,user,group,product,invited_by,delivery,hours` header.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands; a malformed line yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(GroupBuyError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "op,user,group,product,invited_by,delivery,hours\n";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{HEADER}create, 1, , 10, , ,\njoin, 2, 1, , 1, courier,\nadvance, , , , , , 48\nsettle,,,,,,"
        );
        let results: Vec<Result<Command>> = CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(results.len(), 4);

        let create = results[0].as_ref().unwrap();
        assert_eq!(create.op, CommandOp::Create);
        assert_eq!(create.product().unwrap(), 10);
        assert!(create.group().is_err());

        let join = results[1].as_ref().unwrap();
        assert_eq!(join.invited_by, Some(1));
        assert_eq!(join.delivery(), DeliveryType::Courier);

        assert_eq!(results[2].as_ref().unwrap().hours().unwrap(), 48);
        assert_eq!(results[3].as_ref().unwrap().op, CommandOp::Settle);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("{HEADER}explode, 1, , , , ,\njoin, x, 1, , , ,\nsweep,,,,,,");
        let results: Vec<Result<Command>> = CommandReader::new(data.as_bytes()).commands().collect();
        assert!(results[0].is_err());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_negative_hours_rejected() {
        let data = format!("{HEADER}advance,,,,,,-2");
        let command = CommandReader::new(data.as_bytes()).commands().next().unwrap().unwrap();
        assert!(matches!(command.hours(), Err(GroupBuyError::ValidationError(_))));
    }
}
