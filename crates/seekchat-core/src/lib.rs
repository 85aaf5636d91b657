//! Domain types and service traits for the SeekChat client.
//!
//! This crate has no I/O of its own; storage, HTTP and orchestration live in
//! the infrastructure, interaction and application crates.

pub mod api;
pub mod config;
pub mod conversation;
pub mod credential;
pub mod error;
pub mod keys;
pub mod repository;

pub use error::{ChatError, Result};
