/// Tests for pattern tree serialization/deserialization
///
/// Saving and reloading must not change how later lines are matched:
/// - binary files written through the file helpers
/// - JSON dumps of the portable form
/// - miners saving to and loading from files
use template_miner::portable_tree::{load_tree_from_file, save_tree_to_file};
use template_miner::{Miner, MinerConfig, PatternTree, PortableTree, WILDCARD};

fn toks(line: &str) -> Vec<String> {
    line.split_whitespace().map(String::from).collect()
}

fn access_log_lines() -> Vec<String> {
    let methods = ["GET", "POST", "PUT", "DELETE"];
    let paths = ["/login", "/home", "/cart", "/api/data"];
    let statuses = [200, 201, 404, 500];

    let mut lines = Vec::new();
    for i in 0..60 {
        lines.push(format!(
            "10.0.{}.{} - - \"{} {} HTTP/1.1\" {} {}",
            i % 5,
            i,
            methods[i % methods.len()],
            paths[(i / 2) % paths.len()],
            statuses[(i / 3) % statuses.len()],
            100 + i * 7
        ));
    }
    lines
}

#[test]
fn test_save_and_load_binary() {
    let tree = PatternTree::new();
    for line in access_log_lines() {
        tree.add_or_match(&toks(&line));
    }

    let probes: Vec<Vec<String>> = access_log_lines()
        .iter()
        .map(|l| toks(l))
        .chain([toks("completely different shape"), toks("")])
        .collect();
    let results_before: Vec<_> = probes.iter().map(|t| tree.get_pattern(t)).collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.bin");
    save_tree_to_file(&tree, &path).expect("Failed to save");
    let loaded = load_tree_from_file(&path, tree.unmatched_ratio()).expect("Failed to load");

    let results_after: Vec<_> = probes.iter().map(|t| loaded.get_pattern(t)).collect();
    assert_eq!(results_before, results_after, "Lookups should be identical");
}

#[test]
fn test_training_after_reload_matches_original() {
    let lines = access_log_lines();
    let (warmup, rest) = lines.split_at(30);

    let original = PatternTree::new();
    for line in warmup {
        original.add_or_match(&toks(line));
    }
    let reloaded =
        PatternTree::decode(&original.encode().unwrap(), original.unmatched_ratio()).unwrap();

    for line in rest {
        let tokens = toks(line);
        assert_eq!(
            original.add_or_match(&tokens).template_id,
            reloaded.add_or_match(&tokens).template_id,
            "Template IDs diverged on '{}'",
            line
        );
    }
}

#[test]
fn test_save_and_load_json() {
    let tree = PatternTree::new();
    for line in ["user 123 login", "user 123 login", "user 456 login"] {
        tree.add_or_match(&toks(line));
    }

    let json = tree.to_portable().to_json_pretty().unwrap();
    assert!(json.contains(WILDCARD), "JSON should contain the wildcard edge");

    let loaded = PortableTree::from_json(&json).unwrap().to_tree(0.4);
    assert_eq!(
        loaded.get_pattern(&toks("user 42 login")).template,
        toks("user <*> login")
    );
}

#[test]
fn test_miner_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("miner.bin");

    let miner = Miner::new(MinerConfig::default()).unwrap();
    miner.train(&access_log_lines());
    miner.save_to_file(&path).unwrap();

    let restored = Miner::unloaded(MinerConfig::default()).unwrap();
    restored.load_from_file(&path).unwrap();

    for line in access_log_lines() {
        assert_eq!(miner.parse(&line).unwrap(), restored.parse(&line).unwrap());
    }
}

#[test]
fn test_unloaded_miner_cannot_save() {
    let dir = tempfile::tempdir().unwrap();
    let miner = Miner::unloaded(MinerConfig::default()).unwrap();
    assert!(miner.save_to_file(dir.path().join("x.bin")).is_err());
}
