//! Domain layer: value objects, entities and the rules that govern them, plus the
//! ports the application layer drives. Nothing in here performs I/O.

pub mod clock;
pub mod group;
pub mod money;
pub mod order;
pub mod ports;
pub mod pricing;
pub mod product;
pub mod user;
