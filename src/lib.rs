pub mod common;
pub mod server;

pub use common::error::{MarketError, MarketResult};
