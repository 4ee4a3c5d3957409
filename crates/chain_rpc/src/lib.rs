//! JSON-RPC adapters for the vault controller: a wallet that signs through
//! the node and a backend that talks to the deployed vault contract.

pub mod abi;
pub mod backend;
pub mod client;
pub mod wallet;

pub use backend::{PollSettings, RpcVaultBackend};
pub use client::{RpcClient, RpcError};
pub use wallet::RpcWallet;

#[cfg(test)]
#[path = "tests/fake_node.rs"]
pub(crate) mod fake_node;
