//! Oracle Sweep Library
//!
//! Broadcasts oracle price queries across a tick-based ledger and verifies
//! the resulting answers over the node's raw TCP protocol.

pub mod client;
pub mod config;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod rpc;
pub mod sweep;
pub mod types;
pub mod verify;

pub use error::{OracleError, Result};
