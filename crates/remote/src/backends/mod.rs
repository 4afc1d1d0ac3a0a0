//! Remote store backends.

pub mod glacier;
pub mod memory;
