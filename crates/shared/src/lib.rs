pub mod domain;
pub mod error;
pub mod protocol;

pub use alloy_primitives::{Address, U256};
