mod cli;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;

use flowgate_core::FlowgateConfig;
use flowgate_dispatch::{WriteDispatchConfig, WriteFsStrategy, WriteLane};
use flowgate_queue::{BackpressureQueue, QueueOptions, ReserveRequest};

use crate::cli::{CliArgs, Command};

/// Artifact names and sizes cycled through by `simulate`.
const SIMULATED_WRITES: &[(&str, u64)] = &[
    ("manifest.json", 512),
    ("chunk_meta.json", 48 * 1024),
    ("repo_map.jsonl", 2 * 1024 * 1024),
    ("token_postings.packed.bin", 24 * 1024 * 1024),
    ("dense_vectors.bin", 160 * 1024 * 1024),
    ("file_relations.json", 300 * 1024),
];

#[tokio::main]
async fn main() -> Result<()> {
    flowgate_core::load_dotenv();
    flowgate_core::init_tracing();

    let args = CliArgs::parse();
    let config = load_config(args.config.as_deref())?;
    config.log_summary();

    match args.command {
        Command::Resolve { strict } => {
            let dispatch = resolve_dispatch(&config, strict)?;
            println!("{}", serde_json::to_string_pretty(&dispatch)?);
        }
        Command::Classify { label, bytes } => {
            let dispatch = resolve_dispatch(&config, false)?;
            let lane = dispatch.classify(&label, bytes);
            let tokens = dispatch.write_tokens(lane, bytes, false);
            let out = json!({
                "label": label,
                "lane": lane.as_str(),
                "workClass": lane.work_class(),
                "tokens": tokens,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Simulate {
            producers,
            writes,
            hold_ms,
        } => {
            let dispatch = Arc::new(resolve_dispatch(&config, false)?);
            let queue = BackpressureQueue::new(QueueOptions::from_config(&config.queue));
            let lanes = simulate(&queue, dispatch, producers.max(1), writes, Duration::from_millis(hold_ms)).await?;
            let out = json!({ "lanes": lanes, "queue": queue.stats() });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FlowgateConfig> {
    match path {
        Some(path) => FlowgateConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => FlowgateConfig::from_env().context("invalid environment configuration"),
    }
}

fn resolve_dispatch(config: &FlowgateConfig, strict: bool) -> Result<WriteDispatchConfig> {
    let strategy = WriteFsStrategy::from(&config.write_fs);
    if strict {
        return WriteDispatchConfig::resolve_strict(&config.artifacts, &strategy)
            .context("invalid write dispatch config");
    }
    Ok(WriteDispatchConfig::resolve(&config.artifacts, &strategy))
}

/// Spread `writes` across `producers` tasks. Each write reserves its
/// payload, holds it for `hold` (scaled by lane), then releases.
async fn simulate(
    queue: &BackpressureQueue,
    dispatch: Arc<WriteDispatchConfig>,
    producers: usize,
    writes: usize,
    hold: Duration,
) -> Result<BTreeMap<&'static str, u64>> {
    info!(producers, writes, "starting simulation");
    let mut handles = Vec::with_capacity(producers);
    for producer in 0..producers {
        let queue = queue.clone();
        let dispatch = Arc::clone(&dispatch);
        handles.push(tokio::spawn(async move {
            let mut lanes: BTreeMap<&'static str, u64> = BTreeMap::new();
            for index in (producer..writes).step_by(producers) {
                let (label, bytes) = SIMULATED_WRITES[index % SIMULATED_WRITES.len()];
                let lane = dispatch.classify(label, Some(bytes));
                let rows = (bytes / 1024).max(1);
                let reservation = queue.reserve(ReserveRequest::new(rows, bytes)).await;
                let factor = match lane {
                    WriteLane::UltraLight => 0,
                    WriteLane::Light => 1,
                    WriteLane::Heavy => 2,
                    WriteLane::Massive => 4,
                };
                tokio::time::sleep(hold * factor).await;
                drop(reservation);
                *lanes.entry(lane.as_str()).or_default() += 1;
            }
            lanes
        }));
    }

    let mut totals = BTreeMap::new();
    for handle in handles {
        for (lane, count) in handle.await.context("producer task failed")? {
            *totals.entry(lane).or_default() += count;
        }
    }
    info!(lanes = ?totals, "simulation finished");
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_queue::FixedHeapProbe;

    #[tokio::test(start_paused = true)]
    async fn simulate_accounts_every_write() {
        let config = FlowgateConfig::default();
        let dispatch = Arc::new(resolve_dispatch(&config, false).unwrap());
        let queue = BackpressureQueue::new(
            QueueOptions::new()
                .max_pending(2)
                .heap_probe(Arc::new(FixedHeapProbe::unlimited())),
        );
        let lanes = simulate(&queue, dispatch, 3, 13, Duration::from_millis(1)).await.unwrap();

        assert_eq!(lanes.values().sum::<u64>(), 13);
        assert!(lanes["massive"] >= 2);
        let stats = queue.stats();
        assert_eq!(stats.pending.count, 0);
        assert!(stats.high_water.pending <= 2);
    }
}
