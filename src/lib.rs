// Core modules
pub mod digest;
pub mod error;
pub mod miner_config;
pub mod pattern_tree;
pub mod portable_tree;
pub mod tokenizer;

// Orchestration and persistence
pub mod miner;
mod persistence;
pub mod snapshot_cache;
pub mod tree_store;

pub use error::{MinerError, MinerResult};
pub use miner::{MinedTemplate, Miner};
pub use miner_config::{MinerConfig, TokenRule};
pub use pattern_tree::{PatternTree, TreeMatch, WILDCARD};
pub use portable_tree::{PortableNode, PortableTree};
pub use tree_store::{FileTreeStore, MemoryTreeStore, TreeStore};
