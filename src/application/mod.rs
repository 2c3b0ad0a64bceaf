//! Release lifecycle and error mapping on top of the strategy engine.

pub mod error;
pub mod worker;
