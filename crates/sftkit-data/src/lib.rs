//! Prompt tokenization for supervised fine-tuning.
//!
//! This crate provides:
//! - Alpaca and GPTeacher single-turn prompters
//! - A conversation model with ShareGPT turn validation
//! - Tokenizing strategies producing `-100`-masked training records
//! - Tokenizer integration
//! - Dataset loading, collation and JSON to JSONL conversion

#![warn(missing_docs)]

pub mod collator;
pub mod conversation;
pub mod convert;
pub mod dataset;
pub mod prompters;
pub mod strategy;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use collator::*;
pub use conversation::*;
pub use convert::*;
pub use dataset::*;
pub use prompters::*;
pub use strategy::*;
pub use tokenizer::*;
