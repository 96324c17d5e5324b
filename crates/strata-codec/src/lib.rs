//! Binary stream codec for Strata.
//!
//! Flattens a tree, a single delta layer, or a whole delta chain to a
//! compact, CRC-checked byte stream and reads it back. Streams are scoped to
//! a subtree and may be depth-bounded.
//!
//! # Architecture
//!
//! - **Stream layout** ([`format`]): magic, version, kind, scope, depth, body,
//!   CRC32 trailer
//! - **TreeWriter**: writes trees, deltas and chains
//! - **TreeReader**: rebuilds frozen trees and reports the [`Frontier`] a
//!   depth bound cut off
//! - **DataFlattener**: caller-supplied payload encoding;
//!   [`BincodeFlattener`] covers serde types

pub mod config;
pub mod error;
pub mod flattener;
pub mod format;
pub mod reader;
pub mod writer;

pub use config::CodecConfig;
pub use error::{CodecError, CodecResult};
pub use flattener::{BincodeFlattener, DataFlattener};
pub use format::StreamKind;
pub use reader::{Frontier, TreeReader};
pub use writer::TreeWriter;
