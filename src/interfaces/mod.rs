//! Batch-mode entry points: command scripts in, CSV reports out.

pub mod batch;
pub mod csv;
