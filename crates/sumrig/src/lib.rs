//! This crate contains an arena-backed red-black tree whose nodes carry
//! a monoidal summary, letting one container serve intrinsic-key,
//! positional, and weighted-position lookup through a single key scheme.
//!
//! To use it, pick (or implement) a key scheme (a [scheme::Summed] head
//! type plus key types bound by [scheme::SearchKey] and friends) and
//! use [tree::SumTree]. Ready-made schemes live in [keys].

#![warn(missing_docs)]

/// Contains the key-scheme traits the user implements to use the tree.
pub mod scheme;

/// The tree implementation.
pub mod tree;

/// In-order sequence generation.
pub mod cursor;

/// Ready-made key schemes: intrinsic, positional, weighted.
pub mod keys;

/// Handles and dense node storage.
mod arena;

pub use arena::{Handle, LEFT, RIGHT};
pub use cursor::Pairs;
pub use scheme::{DerivedKey, InsertionKey, SearchKey, Summary, Summed};
pub use tree::{Slot, SumTree};
