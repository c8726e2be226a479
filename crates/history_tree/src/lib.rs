//! Branching conversation/execution history for the ailua console.
//!
//! The tree records one node per turn (human code, model code, model
//! message, model error) under a root sentinel. A movable cursor marks the
//! active branch; appending always happens under the cursor, and the
//! root-first cursor lineage is what backends receive as model context.
//!
//! Nodes are arena-allocated and addressed by [`NodeId`]; parents are plain
//! indices, so there are no ownership cycles and no interior mutability.

mod node;
mod tree;

pub use node::{HistoryNode, NodeData, NodeId};
pub use tree::HistoryTree;
