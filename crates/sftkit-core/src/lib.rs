//! Core types and configuration for sftkit.
//!
//! This crate provides the foundational pieces shared by the data and CLI
//! crates:
//!
//! - Error handling, separating per-example failures from fatal ones
//! - Configuration types for tokenization, special tokens and datasets
//! - The `TokenRecord` training record and the ignore-label constant

#![warn(missing_docs)]

mod config;
mod error;
mod types;

pub use config::*;
pub use error::*;
pub use types::*;

