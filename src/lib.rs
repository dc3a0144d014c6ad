//! # ssrle-tree
//!
//! A balanced, multi-stream indexed tree over succinct binary sequences.
//!
//! Leaves hold symbol streams packed as sub-symbol run-length encoded
//! (SSRLE) runs, plus optional key streams. Branch nodes keep a per-child
//! aggregate row for every stream so find, skip, rank and select walk a
//! single root-to-leaf path.
//!
//! ## Example
//!
//! ```rust
//! use ssrle_tree::{IndexedTree, StreamKind, TreeConfig};
//!
//! let mut tree = IndexedTree::new(vec![StreamKind::Symbols], TreeConfig::default()).unwrap();
//! tree.insert_symbols(0, 0, 8, 0).unwrap();
//! tree.insert_symbols(0, 4, 3, 1).unwrap();
//!
//! assert_eq!(tree.size(0).unwrap(), 11);
//! assert_eq!(tree.rank(0, 6, 1).unwrap(), 2);
//! let second_one = tree.select_forward(0, 1, 1).unwrap().unwrap();
//! assert_eq!(second_one.pos(), 5);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bits;
pub mod block;
pub mod branch;
pub mod config;
pub mod error;
pub mod keys;
pub mod node;
pub mod path;
pub mod run;
pub mod shuttle;
pub mod tree;

pub use block::PackedSequenceBlock;
pub use branch::{AggregateOrdering, AggregateRow, BranchAggregateNode};
pub use config::{StreamKind, TreeConfig};
pub use error::{CapacityExceeded, Error, Result};
pub use keys::KeyBlock;
pub use node::{BranchNode, LeafNode, LeafStream, Node, NodeArena, NodeId, NodeStore};
pub use path::{Cursor, Direction, PathMode, TreePath};
pub use run::SymbolRun;
pub use tree::{IndexedTree, KeyMatch, Symbols};

#[cfg(test)]
mod proptests;
