//! Concurrent Prefix Tree over Log Tokens
//!
//! Each node maps a token to a child node. The reserved key `<*>` is a
//! wildcard edge: once a node has one, every later traversal through that
//! node takes it, whatever the current token is. Literal edges next to a
//! wildcard stay in the map but are no longer reached by matching.
//!
//! Training (`add_or_match`) grows the tree and promotes positions to
//! wildcards when a sibling already continues with the next token. Lookup
//! (`get_pattern`) walks the same way but never writes.
//!
//! Children live in a `DashMap` per node, so concurrent trainers and readers
//! only contend on the shard they touch. Insert-if-absent goes through the
//! entry API and is atomic; the lookahead-then-promote sequence is not, which
//! at worst causes a redundant promotion attempt.
//!
//! The learned shape depends on training order. Tests fix line order.

use crate::digest::digest_tokens;
use crate::miner_config::DEFAULT_UNMATCHED_RATIO;
use dashmap::DashMap;
use rustc_hash::{FxHashSet, FxHasher};
use smallvec::SmallVec;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

/// Reserved edge key marking a parameter position.
pub const WILDCARD: &str = "<*>";

type ChildMap = DashMap<String, Arc<Node>, BuildHasherDefault<FxHasher>>;

// Most lines carry only a handful of parameters
type MarkedPositions = SmallVec<[usize; 8]>;

#[derive(Debug, Default)]
pub struct Node {
    children: ChildMap,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, key: &str) -> Option<Arc<Node>> {
        self.children.get(key).map(|child| Arc::clone(child.value()))
    }

    pub fn store(&self, key: impl Into<String>, child: Arc<Node>) {
        self.children.insert(key.into(), child);
    }

    /// Atomic insert-if-absent. Returns the child now held under `key`.
    pub fn load_or_store(&self, key: &str, child: Arc<Node>) -> Arc<Node> {
        if let Some(existing) = self.load(key) {
            return existing;
        }
        let entry = self.children.entry(key.to_string()).or_insert(child);
        Arc::clone(entry.value())
    }

    /// Visit children until `f` returns false. The map must not be written from inside `f`.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<Node>) -> bool,
    {
        for entry in self.children.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.children.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Sibling whose children continue with `next_token`.
    ///
    /// The smallest qualifying key wins so a fixed training order always
    /// produces the same tree. The iterator is dropped before the caller
    /// writes to this node.
    fn find_promotable(&self, next_token: &str) -> Option<Arc<Node>> {
        let mut best: Option<(String, Arc<Node>)> = None;

        self.range(|key, child| {
            if key != WILDCARD
                && child.contains(next_token)
                && best.as_ref().map_or(true, |(best_key, _)| key < best_key.as_str())
            {
                best = Some((key.to_string(), Arc::clone(child)));
            }
            true
        });

        best.map(|(_, node)| node)
    }
}

/// Output of a tree walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMatch {
    pub template: Vec<String>,
    pub parameters: Vec<String>,
    pub template_id: String,
}

impl TreeMatch {
    /// The whole line is its own template and every token is a parameter.
    fn unparseable(tokens: &[String]) -> Self {
        Self {
            template: tokens.to_vec(),
            parameters: tokens.to_vec(),
            template_id: digest_tokens(tokens),
        }
    }

    fn from_marked(tokens: &[String], marked: &[usize]) -> Self {
        let mut template = tokens.to_vec();
        let mut parameters = Vec::with_capacity(marked.len());

        for &idx in marked {
            parameters.push(tokens[idx].clone());
            template[idx] = WILDCARD.to_string();
        }

        let template_id = digest_tokens(&template);
        Self {
            template,
            parameters,
            template_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkMode {
    Train,
    Lookup,
}

#[derive(Debug)]
pub struct PatternTree {
    root: Arc<Node>,
    unmatched_ratio: f64,
}

impl PatternTree {
    pub fn new() -> Self {
        Self::with_unmatched_ratio(DEFAULT_UNMATCHED_RATIO)
    }

    pub fn with_unmatched_ratio(unmatched_ratio: f64) -> Self {
        Self::from_root(Arc::new(Node::new()), unmatched_ratio)
    }

    pub(crate) fn from_root(root: Arc<Node>, unmatched_ratio: f64) -> Self {
        Self {
            root,
            unmatched_ratio,
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn unmatched_ratio(&self) -> f64 {
        self.unmatched_ratio
    }

    /// Train on `tokens`, growing the tree, and return the resulting template.
    pub fn add_or_match(&self, tokens: &[String]) -> TreeMatch {
        self.walk(tokens, WalkMode::Train)
    }

    /// Match `tokens` against the learned templates without modifying the tree.
    pub fn get_pattern(&self, tokens: &[String]) -> TreeMatch {
        self.walk(tokens, WalkMode::Lookup)
    }

    /// Unmatched counts strictly above this make a line unparseable.
    fn unmatched_threshold(&self, token_count: usize) -> usize {
        (self.unmatched_ratio * token_count as f64) as usize
    }

    fn walk(&self, tokens: &[String], mode: WalkMode) -> TreeMatch {
        if tokens.is_empty() {
            return TreeMatch::unparseable(tokens);
        }

        let threshold = self.unmatched_threshold(tokens.len());
        let last = tokens.len() - 1;

        let mut current = Arc::clone(&self.root);
        let mut marked = MarkedPositions::new();
        let mut unmatched = 0usize;

        for (idx, token) in tokens.iter().enumerate() {
            if let Some(wildcard) = current.load(WILDCARD) {
                marked.push(idx);
                current = wildcard;
                continue;
            }

            if let Some(child) = current.load(token) {
                current = child;
                continue;
            }

            unmatched += 1;

            if idx < last {
                if let Some(sibling) = current.find_promotable(&tokens[idx + 1]) {
                    if mode == WalkMode::Train {
                        current.load_or_store(WILDCARD, Arc::clone(&sibling));
                    }
                    marked.push(idx);
                    current = sibling;
                    continue;
                }
            }

            if idx == last && unmatched > threshold {
                marked.push(idx);
                break;
            }

            match mode {
                WalkMode::Train => {
                    current = current.load_or_store(token, Arc::new(Node::new()));
                }
                WalkMode::Lookup => return TreeMatch::unparseable(tokens),
            }
        }

        if unmatched > threshold {
            return TreeMatch::unparseable(tokens);
        }

        TreeMatch::from_marked(tokens, &marked)
    }

    /// Follow literal keys (including `<*>`) from the root.
    pub fn descend(&self, path: &[&str]) -> Option<Arc<Node>> {
        let mut current = Arc::clone(&self.root);
        for key in path {
            current = current.load(key)?;
        }
        Some(current)
    }

    /// Distinct nodes, counting a wildcard target shared with a sibling once.
    pub fn node_count(&self) -> usize {
        let mut seen: FxHashSet<*const Node> = FxHashSet::default();
        let mut stack = vec![Arc::clone(&self.root)];

        while let Some(node) = stack.pop() {
            if !seen.insert(Arc::as_ptr(&node)) {
                continue;
            }
            node.range(|_, child| {
                stack.push(Arc::clone(child));
                true
            });
        }

        seen.len()
    }
}

impl Default for PatternTree {
    fn default() -> Self {
        Self::new()
    }
}
