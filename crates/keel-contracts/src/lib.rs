//! # keel-contracts
//!
//! Shared types, wire contracts, and configuration for the keel runtime.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod agent;
pub mod config;
pub mod demo;
pub mod document;
pub mod error;
pub mod execution;
pub mod operation;
pub mod oracle;
pub mod plan;
pub mod rating;
