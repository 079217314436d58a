/// Storage-boundary mirror of the pattern tree.
///
/// Plain nested `BTreeMap`s, no concurrency. The binary encoding (bincode)
/// is what every `TreeStore` and the file helpers read and write; the JSON
/// form is for inspection.
use crate::error::MinerResult;
use crate::pattern_tree::{Node, PatternTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableNode {
    pub children: BTreeMap<String, PortableNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableTree {
    pub root: PortableNode,
}

impl PortableNode {
    /// A `<*>` edge that shares its target with a sibling is copied, not shared.
    fn from_node(node: &Node) -> Self {
        let mut children = BTreeMap::new();
        node.range(|key, child| {
            children.insert(key.to_string(), PortableNode::from_node(child));
            true
        });
        Self { children }
    }

    fn to_node(&self) -> Node {
        let node = Node::new();
        for (key, child) in &self.children {
            node.store(key.clone(), Arc::new(child.to_node()));
        }
        node
    }

    pub fn count(&self) -> usize {
        1 + self.children.values().map(PortableNode::count).sum::<usize>()
    }
}

impl PortableTree {
    pub fn from_tree(tree: &PatternTree) -> Self {
        Self {
            root: PortableNode::from_node(tree.root()),
        }
    }

    pub fn to_tree(&self, unmatched_ratio: f64) -> PatternTree {
        PatternTree::from_root(Arc::new(self.root.to_node()), unmatched_ratio)
    }

    /// Nodes in the portable form. Shared wildcard targets count once per edge.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    pub fn encode(&self) -> MinerResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> MinerResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_json_pretty(&self) -> MinerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> MinerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl PatternTree {
    pub fn to_portable(&self) -> PortableTree {
        PortableTree::from_tree(self)
    }

    pub fn from_portable(portable: &PortableTree, unmatched_ratio: f64) -> Self {
        portable.to_tree(unmatched_ratio)
    }

    /// Binary encoding of this tree, as handed to storage backends.
    pub fn encode(&self) -> MinerResult<Vec<u8>> {
        self.to_portable().encode()
    }

    pub fn decode(bytes: &[u8], unmatched_ratio: f64) -> MinerResult<Self> {
        Ok(Self::from_portable(&PortableTree::decode(bytes)?, unmatched_ratio))
    }
}

/// Write the binary encoding of `tree` to `path`.
pub fn save_tree_to_file(tree: &PatternTree, path: impl AsRef<Path>) -> MinerResult<()> {
    let bytes = tree.encode()?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read a tree written by `save_tree_to_file`.
pub fn load_tree_from_file(path: impl AsRef<Path>, unmatched_ratio: f64) -> MinerResult<PatternTree> {
    let bytes = std::fs::read(path)?;
    PatternTree::decode(&bytes, unmatched_ratio)
}

/// One staged snapshot as written by `save_snapshot_entries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub tree: PortableTree,
}

pub fn save_snapshot_entries(entries: &[SnapshotEntry], path: impl AsRef<Path>) -> MinerResult<()> {
    let bytes = bincode::serialize(entries)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_snapshot_entries(path: impl AsRef<Path>) -> MinerResult<Vec<SnapshotEntry>> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern_tree::WILDCARD;

    fn toks(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    fn trained_tree() -> PatternTree {
        let tree = PatternTree::new();
        for line in [
            "user 123 login",
            "user 123 login",
            "user 456 login",
            "user 789 logout",
            "disk sda1 full",
            "disk sda1 full",
        ] {
            tree.add_or_match(&toks(line));
        }
        tree
    }

    #[test]
    fn test_mirrors_every_key() {
        let tree = trained_tree();
        let portable = tree.to_portable();

        let user = &portable.root.children["user"];
        assert!(user.children.contains_key(WILDCARD));
        assert!(user.children.contains_key("123"));
        assert!(user.children[WILDCARD].children.contains_key("logout"));
        assert!(portable.root.children.contains_key("disk"));
    }

    #[test]
    fn test_shared_wildcard_target_is_copied() {
        let tree = trained_tree();
        let portable = tree.to_portable();
        // The wildcard edge adds a second copy of the "123" subtree.
        assert!(portable.node_count() > tree.node_count());

        let user = &portable.root.children["user"];
        assert_eq!(user.children[WILDCARD], user.children["123"]);
    }

    #[test]
    fn test_binary_round_trip_preserves_lookups() {
        let tree = trained_tree();
        let bytes = tree.encode().unwrap();
        let reloaded = PatternTree::decode(&bytes, tree.unmatched_ratio()).unwrap();

        for line in [
            "user 999 login",
            "user 1 logout",
            "disk sdb2 full",
            "never seen before",
            "",
        ] {
            let tokens = toks(line);
            assert_eq!(tree.get_pattern(&tokens), reloaded.get_pattern(&tokens), "{line}");
        }
        assert_eq!(reloaded.to_portable(), tree.to_portable());
    }

    #[test]
    fn test_json_round_trip() {
        let portable = trained_tree().to_portable();
        let json = portable.to_json_pretty().unwrap();
        assert!(json.contains("\"children\""));
        let parsed = PortableTree::from_json(&json).unwrap();
        assert_eq!(parsed, portable);

        let rebuilt = PatternTree::from_portable(&parsed, 0.4);
        assert_eq!(rebuilt.to_portable(), portable);
        assert_eq!(
            rebuilt.get_pattern(&toks("user 5 login")).template,
            toks("user <*> login")
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(PortableTree::decode(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.bin");
        let tree = trained_tree();

        save_tree_to_file(&tree, &path).unwrap();
        let loaded = load_tree_from_file(&path, 0.4).unwrap();
        assert_eq!(loaded.to_portable(), tree.to_portable());

        assert!(load_tree_from_file(dir.path().join("missing.bin"), 0.4).is_err());
    }

    #[test]
    fn test_empty_tree_round_trip() {
        let tree = PatternTree::new();
        let reloaded = PatternTree::decode(&tree.encode().unwrap(), 0.4).unwrap();
        assert_eq!(reloaded.node_count(), 1);
    }
}
