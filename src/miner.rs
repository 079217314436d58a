//! Template Miner
//!
//! Owns one pattern tree and drives it:
//! 1. `train` tokenizes lines, grows the tree and stages a snapshot
//! 2. `parse` matches lines against the tree without changing it
//! 3. A background task saves the tree to a `TreeStore` whenever it changed
//!
//! The tree sits behind an `ArcSwapOption` so a reload can replace it
//! wholesale while readers keep using the previous one.

use crate::digest::param_id;
use crate::error::{MinerError, MinerResult};
use crate::miner_config::MinerConfig;
use crate::pattern_tree::{PatternTree, TreeMatch};
use crate::persistence::spawn_save_loop;
use crate::portable_tree::{
    load_snapshot_entries, load_tree_from_file, save_snapshot_entries, save_tree_to_file,
    SnapshotEntry,
};
use crate::snapshot_cache::SnapshotCache;
use crate::tokenizer::Tokenizer;
use crate::tree_store::TreeStore;
use arc_swap::ArcSwapOption;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of mining one log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedTemplate {
    pub original_log: String,
    /// Space-joined tokens with parameter slots as `<*>`.
    pub template: String,
    pub template_id: String,
    pub parameters: Vec<String>,
    pub param_id: String,
    pub tokens: Vec<String>,
}

impl MinedTemplate {
    fn new(original_log: &str, tokens: Vec<String>, matched: TreeMatch) -> Self {
        let param_id = param_id(&matched.parameters, &matched.template_id);
        Self {
            original_log: original_log.to_string(),
            template: matched.template.join(" "),
            template_id: matched.template_id,
            parameters: matched.parameters,
            param_id,
            tokens,
        }
    }
}

pub struct Miner {
    config: MinerConfig,
    tokenizer: Tokenizer,
    tree: ArcSwapOption<PatternTree>,
    dirty: AtomicBool,
    cache: Mutex<SnapshotCache>,
    store: Option<Arc<dyn TreeStore>>,
    shutdown: watch::Sender<bool>,
    saver: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    /// In-memory miner starting from an empty tree. No persistence.
    pub fn new(config: MinerConfig) -> MinerResult<Self> {
        let miner = Self::build(config, None)?;
        let tree = Arc::new(miner.empty_tree());
        miner.install(tree);
        Ok(miner)
    }

    /// Miner with no tree yet. `parse` fails until a `train` or a load.
    pub fn unloaded(config: MinerConfig) -> MinerResult<Self> {
        Self::build(config, None)
    }

    /// Miner backed by `store`.
    ///
    /// The tree is rebuilt from the store when possible, otherwise it starts
    /// empty. A background task saves the tree every `save_interval` while it
    /// is dirty; call `close` to stop it with a final save.
    pub async fn with_store(config: MinerConfig, store: Arc<dyn TreeStore>) -> MinerResult<Arc<Self>> {
        let miner = Self::build(config, Some(Arc::clone(&store)))?;

        let tree = match fetch_tree(store.as_ref(), &miner.config).await {
            Ok(Some(tree)) => {
                info!(
                    "Loaded pattern tree '{}' from {} store ({} nodes)",
                    miner.config.storage_key,
                    store.name(),
                    tree.node_count()
                );
                tree
            }
            Ok(None) => {
                info!(
                    "No stored pattern tree under '{}', starting empty",
                    miner.config.storage_key
                );
                miner.empty_tree()
            }
            Err(e) => {
                warn!("Failed to load pattern tree, starting empty: {}", e);
                miner.empty_tree()
            }
        };
        miner.install(Arc::new(tree));

        let miner = Arc::new(miner);
        let handle = spawn_save_loop(
            Arc::downgrade(&miner),
            miner.config.save_interval(),
            miner.shutdown.subscribe(),
        );
        *lock(&miner.saver) = Some(handle);

        Ok(miner)
    }

    fn build(config: MinerConfig, store: Option<Arc<dyn TreeStore>>) -> MinerResult<Self> {
        config.validate()?;
        let tokenizer = Tokenizer::from_config(&config)?;
        let cache = SnapshotCache::new(config.cache_capacity, config.cache_ttl());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            tokenizer,
            tree: ArcSwapOption::empty(),
            dirty: AtomicBool::new(false),
            cache: Mutex::new(cache),
            store,
            shutdown,
            saver: Mutex::new(None),
        })
    }

    fn empty_tree(&self) -> PatternTree {
        PatternTree::with_unmatched_ratio(self.config.unmatched_ratio)
    }

    /// Replace the current tree and stage it.
    fn install(&self, tree: Arc<PatternTree>) {
        self.tree.store(Some(Arc::clone(&tree)));
        self.stage(tree);
    }

    fn stage(&self, tree: Arc<PatternTree>) {
        lock(&self.cache).put(self.config.storage_key.clone(), tree);
    }

    /// Stage `tree` unless a reload or load replaced it in the meantime.
    fn stage_if_current(&self, tree: Arc<PatternTree>) -> bool {
        let guard = self.tree.load();
        let current = Option::as_ref(&guard)
            .is_some_and(|current| Arc::ptr_eq(current, &tree));
        drop(guard);
        if current {
            self.stage(tree);
        }
        current
    }

    fn tree_or_init(&self) -> Arc<PatternTree> {
        if let Some(tree) = self.tree.load_full() {
            return tree;
        }
        let fresh = Arc::new(self.empty_tree());
        let previous = self
            .tree
            .compare_and_swap(&None::<Arc<PatternTree>>, Some(Arc::clone(&fresh)));
        match &*previous {
            Some(existing) => Arc::clone(existing),
            None => fresh,
        }
    }

    /// Train on `lines` in order. Every line produces a result.
    pub fn train<S: AsRef<str>>(&self, lines: &[S]) -> Vec<MinedTemplate> {
        let tree = self.tree_or_init();

        let results: Vec<MinedTemplate> = lines
            .iter()
            .map(|line| {
                let line = line.as_ref();
                let tokens = self.tokenizer.tokenize(line);
                let matched = tree.add_or_match(&tokens);
                self.dirty.store(true, Ordering::Release);
                MinedTemplate::new(line, tokens, matched)
            })
            .collect();

        if !self.stage_if_current(tree) {
            debug!("Tree replaced during training, not staging the old one");
        }
        debug!("Trained {} lines", results.len());
        results
    }

    /// Match one line against the learned templates. Never changes the tree.
    pub fn parse(&self, line: &str) -> MinerResult<MinedTemplate> {
        let tree = self.tree.load_full().ok_or(MinerError::NotInitialized)?;
        Ok(self.parse_with(&tree, line))
    }

    /// Parallel `parse` over a batch, results in input order.
    pub fn parse_batch<S: AsRef<str> + Sync>(&self, lines: &[S]) -> MinerResult<Vec<MinedTemplate>> {
        let tree = self.tree.load_full().ok_or(MinerError::NotInitialized)?;
        Ok(lines
            .par_iter()
            .map(|line| self.parse_with(&tree, line.as_ref()))
            .collect())
    }

    fn parse_with(&self, tree: &PatternTree, line: &str) -> MinedTemplate {
        let tokens = self.tokenizer.tokenize(line);
        let matched = tree.get_pattern(&tokens);
        MinedTemplate::new(line, tokens, matched)
    }

    /// Save the tree to the store if it changed since the last save.
    ///
    /// Returns `Ok(false)` when there is no store, no tree or nothing to
    /// save. On failure the tree stays dirty.
    pub async fn flush(&self) -> MinerResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let Some(tree) = self.tree.load_full() else {
            return Ok(false);
        };

        let result = match tree.encode() {
            Ok(bytes) => store
                .set(&self.config.storage_key, bytes, self.config.store_ttl())
                .await
                .map_err(MinerError::Store),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }

    /// Re-read the tree from the store and replace the current one.
    ///
    /// Returns `Ok(false)` when nothing is stored. The current tree is kept
    /// on absence and on error.
    pub async fn reload(&self) -> MinerResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match fetch_tree(store.as_ref(), &self.config).await? {
            Some(tree) => {
                info!("Reloaded pattern tree '{}'", self.config.storage_key);
                self.install(Arc::new(tree));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the background saver after one last save. Safe to call twice.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let handle = lock(&self.saver).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Background tree saver ended abnormally: {}", e);
                }
            }
            None => {
                if let Err(e) = self.flush().await {
                    error!("Failed to save pattern tree on close: {}", e);
                }
            }
        }
    }

    /// Write the current tree to `path` (binary encoding).
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> MinerResult<()> {
        let tree = self.tree.load_full().ok_or(MinerError::NotInitialized)?;
        save_tree_to_file(&tree, path)
    }

    /// Replace the current tree with one read from `path`.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> MinerResult<()> {
        let tree = load_tree_from_file(path, self.config.unmatched_ratio)?;
        self.install(Arc::new(tree));
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Write every live staged snapshot to `path`.
    pub fn save_snapshots_to_file(&self, path: impl AsRef<Path>) -> MinerResult<usize> {
        let entries: Vec<SnapshotEntry> = lock(&self.cache)
            .live_entries()
            .into_iter()
            .map(|(key, tree)| SnapshotEntry {
                key,
                tree: tree.to_portable(),
            })
            .collect();
        save_snapshot_entries(&entries, path)?;
        Ok(entries.len())
    }

    /// Install the snapshot stored under this miner's key in a file written by
    /// `save_snapshots_to_file`. Returns false if the file has no such entry.
    pub fn load_snapshot_from_file(&self, path: impl AsRef<Path>) -> MinerResult<bool> {
        let entry = load_snapshot_entries(path)?
            .into_iter()
            .find(|entry| entry.key == self.config.storage_key);

        match entry {
            Some(entry) => {
                let tree = PatternTree::from_portable(&entry.tree, self.config.unmatched_ratio);
                self.install(Arc::new(tree));
                self.dirty.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The snapshot staged by the last `train`, if it has not expired.
    pub fn staged_snapshot(&self) -> Option<Arc<PatternTree>> {
        lock(&self.cache).get(&self.config.storage_key)
    }

    pub fn tree(&self) -> Option<Arc<PatternTree>> {
        self.tree.load_full()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn store_name(&self) -> Option<&str> {
        self.store.as_deref().map(|store| store.name())
    }
}

/// Read and decode the tree stored under the configured key.
async fn fetch_tree(store: &dyn TreeStore, config: &MinerConfig) -> MinerResult<Option<PatternTree>> {
    let bytes = store
        .get(&config.storage_key)
        .await
        .map_err(MinerError::Store)?;

    match bytes {
        Some(bytes) => Ok(Some(PatternTree::decode(&bytes, config.unmatched_ratio)?)),
        None => Ok(None),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miner() -> Miner {
        Miner::new(MinerConfig::default()).unwrap()
    }

    #[test]
    fn test_train_returns_one_result_per_line() {
        let miner = miner();
        let results = miner.train(&["user 123 login", "", "user 123 login"]);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].original_log, "user 123 login");
        assert_eq!(results[0].tokens, vec!["user", "123", "login"]);
        assert!(results[1].tokens.is_empty());
        assert_eq!(results[1].template, "");
        assert_eq!(results[0].template_id, results[2].template_id);
    }

    #[test]
    fn test_param_id_covers_parameters_and_template() {
        let miner = miner();
        let results = miner.train(&[
            "user 123 login",
            "user 123 login",
            "user 456 login",
            "user 457 login",
        ]);

        assert_eq!(results[2].template, "user <*> login");
        assert_eq!(results[2].template_id, results[3].template_id);
        assert_ne!(results[2].param_id, results[3].param_id);
        assert_eq!(
            results[2].param_id,
            crate::digest::param_id(&["456"], &results[2].template_id)
        );
    }

    #[test]
    fn test_train_marks_dirty_and_stages_snapshot() {
        let miner = miner();
        assert!(!miner.is_dirty());

        miner.train(&["disk sda1 full"]);
        assert!(miner.is_dirty());

        let staged = miner.staged_snapshot().unwrap();
        assert!(Arc::ptr_eq(&staged, &miner.tree().unwrap()));
    }

    #[test]
    fn test_parse_uninitialized() {
        let miner = Miner::unloaded(MinerConfig::default()).unwrap();
        assert!(matches!(
            miner.parse("anything"),
            Err(MinerError::NotInitialized)
        ));
        assert!(matches!(
            miner.parse_batch(&["anything"]),
            Err(MinerError::NotInitialized)
        ));

        // Training creates the tree.
        miner.train(&["anything at all"]);
        assert!(miner.parse("anything").is_ok());
    }

    #[test]
    fn test_parse_does_not_mutate() {
        let miner = miner();
        miner.train(&["user 123 login", "user 123 login"]);
        let dirty_before = miner.is_dirty();
        let nodes_before = miner.tree().unwrap().node_count();

        let parsed = miner.parse("user 999 login").unwrap();
        assert_eq!(parsed.template, "user <*> login");
        assert_eq!(parsed.parameters, vec!["999"]);
        assert_eq!(miner.tree().unwrap().node_count(), nodes_before);
        assert_eq!(miner.is_dirty(), dirty_before);
    }

    #[test]
    fn test_parse_batch_matches_parse() {
        let miner = miner();
        miner.train(&["user 123 login", "user 123 login", "user 9 login"]);

        let lines = ["user 1 login", "user 2 login", "unknown line here"];
        let batch = miner.parse_batch(&lines).unwrap();
        for (line, result) in lines.iter().zip(&batch) {
            assert_eq!(&miner.parse(line).unwrap(), result);
        }
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let config = MinerConfig::new().with_rule("[", "x");
        assert!(matches!(
            Miner::new(config),
            Err(MinerError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.bin");

        let miner = miner();
        miner.train(&["user 123 login", "user 123 login", "user 4 login"]);
        assert_eq!(miner.save_snapshots_to_file(&path).unwrap(), 1);

        let other = Miner::unloaded(MinerConfig::default()).unwrap();
        assert!(other.load_snapshot_from_file(&path).unwrap());
        assert_eq!(
            other.parse("user 77 login").unwrap(),
            miner.parse("user 77 login").unwrap()
        );
    }

    #[test]
    fn test_replaced_tree_is_not_staged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.bin");

        let miner = miner();
        miner.train(&["user 123 login", "user 123 login"]);
        let old = miner.tree().unwrap();
        miner.save_to_file(&path).unwrap();

        // A load lands while a trainer still holds the old tree.
        miner.load_from_file(&path).unwrap();
        let installed = miner.tree().unwrap();
        assert!(!Arc::ptr_eq(&old, &installed));

        assert!(!miner.stage_if_current(Arc::clone(&old)));
        let staged = miner.staged_snapshot().unwrap();
        assert!(Arc::ptr_eq(&staged, &installed));

        assert!(miner.stage_if_current(installed));
    }

    #[test]
    fn test_cold_tree_login_logout_lines_stay_unparseable() {
        // No warm-up: each line's shape has not been completed yet.
        let miner = miner();
        let results = miner.train(&["user 123 login", "user 456 login", "user 789 logout"]);

        for result in &results {
            assert_eq!(result.template, result.original_log);
            assert_eq!(result.parameters, result.tokens);
            assert_eq!(result.template_id, crate::digest::digest_tokens(&result.tokens));
        }
        assert_eq!(results[0].parameters, vec!["user", "123", "login"]);
    }

    #[tokio::test]
    async fn test_close_without_store_is_noop() {
        let miner = miner();
        miner.train(&["a b c"]);
        miner.close().await;
        miner.close().await;
        assert!(miner.is_dirty());
    }
}
