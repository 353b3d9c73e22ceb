//! neon-gateway: an Ethereum JSON-RPC gateway over a Solana-resident EVM
//! program.
//!
//! Signed Ethereum transactions enter the [`mempool`], are picked up by
//! [`executor`] workers, bound to [`resources`] and driven by the
//! [`strategy`] engine, which emits settlement transactions through the
//! [`sender`] against the [`chain`] adapter. The [`indexer`] independently
//! tails settlement blocks, reconstructs Ethereum semantics from the
//! [`loader`] instruction set and persists them through [`db`].

pub mod chain;
pub mod config;
pub mod db;
pub mod evm;
pub mod executor;
pub mod indexer;
pub mod loader;
pub mod mempool;
pub mod resources;
pub mod rpc;
pub mod sender;
pub mod sig_down;
pub mod strategy;
pub mod telemetry;
pub mod types;
