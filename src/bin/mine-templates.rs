/// Mine templates from log lines on stdin (or a file given as the first argument)
///
/// Prints one JSON `MinedTemplate` per input line.
///
/// Environment:
/// - MINER_CONFIG_PATH: JSON miner configuration (optional)
/// - MINER_STORAGE_KEY: overrides the configured storage key (optional)
/// - MINER_STORE_DIR: persist the tree under this directory (optional)
/// - MINER_MODE: "train" (default) or "parse"

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use template_miner::{FileTreeStore, Miner, MinerConfig, TreeStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = MinerConfig::from_env().context("loading miner configuration")?;
    config.log_config();

    let lines = read_lines(std::env::args().nth(1))?;
    info!("Read {} log lines", lines.len());

    let miner = match std::env::var("MINER_STORE_DIR") {
        Ok(dir) => {
            info!("Persisting pattern tree under {}", dir);
            let store: Arc<dyn TreeStore> = Arc::new(FileTreeStore::new(dir));
            Miner::with_store(config, store).await?
        }
        Err(_) => Arc::new(Miner::new(config)?),
    };

    let mode = std::env::var("MINER_MODE").unwrap_or_else(|_| "train".to_string());
    let results = match mode.as_str() {
        "train" => miner.train(lines.as_slice()),
        "parse" => miner.parse_batch(lines.as_slice())?,
        other => anyhow::bail!("Unknown MINER_MODE '{}', expected 'train' or 'parse'", other),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in &results {
        serde_json::to_writer(&mut out, result)?;
        writeln!(out)?;
    }
    out.flush()?;

    let distinct: std::collections::HashSet<&str> =
        results.iter().map(|r| r.template_id.as_str()).collect();
    info!(
        "Mined {} lines into {} distinct templates",
        results.len(),
        distinct.len()
    );

    miner.close().await;
    Ok(())
}

fn read_lines(path: Option<String>) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match path {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(&path).with_context(|| format!("opening {}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}
