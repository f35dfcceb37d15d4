//! The _pemscout_ library crate.
//!
//! Finds private keys, public keys and certificates scattered across a
//! filesystem and pairs them into identities. A [`scanner::Scanner`]
//! runs a single pass and streams its results, an [`cache::IndexCache`]
//! keeps the results of repeated passes queryable while they are still
//! coming in.

pub mod cache;
pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod keys;
pub mod matcher;
pub mod scanner;
pub mod source;
