//! swapindex CLI: run the Osmosis swap scanner and query its index.
//!
//! Usage:
//! ```bash
//! # Catch up from the configured start height, then follow the tip
//! swapindex run --config swapindex.json
//!
//! # Index a fixed range
//! swapindex run --from 17777000 --to 17777050
//!
//! # Inspect the index
//! swapindex status
//! swapindex events --from 17777000 --to 17777010
//! swapindex proof --key 17777010:0:7 > proof.json
//! swapindex verify --proof proof.json
//! ```

mod config;
mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::sync::watch;

use swapindex_core::{
    backfill_usd, ChainScanner, IndexStore, MerkleProof, NaturalKey, PriceOracle, QueryService,
    ResumeFrom, ScanCursor, ScanMode, SwapStore,
};
use swapindex_cosmos::{CometBftFetcher, SqsPriceSource};
use swapindex_storage::SqliteStore;

use crate::config::CliConfig;
use crate::logging::init_tracing;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let rest = &args[2..];
    let result = match args[1].as_str() {
        "run" => cmd_run(rest).await,
        "status" => cmd_status(rest).await,
        "events" => cmd_events(rest).await,
        "proof" => cmd_proof(rest).await,
        "verify" => cmd_verify(rest),
        "audit" => cmd_audit(rest).await,
        "reset" => cmd_reset(rest).await,
        "backfill-prices" => cmd_backfill(rest).await,
        "version" | "--version" | "-V" => {
            println!("swapindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("swapindex {}", env!("CARGO_PKG_VERSION"));
    println!("Resumable Osmosis swap indexer with USD pricing and merkle proofs\n");
    println!("USAGE:");
    println!("    swapindex <COMMAND> [--config <FILE>] [FLAGS]\n");
    println!("COMMANDS:");
    println!("    run              Index swaps (catch up, then follow the tip)");
    println!("    status           Show the cursor and latest sealed window");
    println!("    events           Print indexed swaps in a height range as JSON lines");
    println!("    proof            Print the inclusion proof of one swap");
    println!("    verify           Check a proof file offline");
    println!("    audit            Rebuild a sealed window and compare its root");
    println!("    reset            Move the cursor back so heights are re-scanned");
    println!("    backfill-prices  Fill USD values that were unresolved at scan time");
    println!("    version          Print version");
    println!("    help             Print this help\n");
    println!("FLAGS:");
    println!("    run              [--from <HEIGHT>] [--to <HEIGHT>]");
    println!("    events           --from <HEIGHT> --to <HEIGHT>");
    println!("    proof            --key <HEIGHT:TX:EVENT>");
    println!("    verify           --proof <FILE>");
    println!("    audit            --window <ID>");
    println!("    reset            --height <HEIGHT>");
    println!("    backfill-prices  [--batch <N>]\n");
    println!("ENVIRONMENT:");
    println!("    SWAPINDEX_RPC_URL, SWAPINDEX_PRICES_URL, SWAPINDEX_DB, RUST_LOG");
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

fn load_config(args: &[String]) -> anyhow::Result<CliConfig> {
    let path = parse_flag(args, "--config");
    CliConfig::load(path.as_deref())
}

async fn open_store(config: &CliConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database))?;
    Ok(Arc::new(store))
}

fn build_oracle(config: &CliConfig) -> anyhow::Result<Arc<PriceOracle>> {
    let source = SqsPriceSource::new(config.sqs())?;
    Ok(Arc::new(PriceOracle::new(
        Arc::new(source),
        config.indexer.denom_registry(),
        config.indexer.price.bucket_secs,
    )))
}

async fn query_service(config: &CliConfig) -> anyhow::Result<QueryService> {
    let store: Arc<dyn IndexStore> = open_store(config).await?;
    Ok(QueryService::new(store, config.indexer.window_spec()))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let mut config = load_config(args)?;
    if let Some(to) = parse_height_flag(args, "--to")? {
        config.indexer.mode = ScanMode::BoundedRange { end_height: to };
    }
    config.indexer.validate()?;
    let resume = match parse_height_flag(args, "--from")? {
        Some(h) => ResumeFrom::Override(h),
        None => ResumeFrom::Persisted,
    };
    init_tracing(&config.log);

    let store = open_store(&config).await?;
    let fetcher = Arc::new(CometBftFetcher::new(config.cometbft())?);
    let oracle = build_oracle(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let refresh = if matches!(config.indexer.mode, ScanMode::CatchUpThenFollow) {
        Some(Arc::clone(&oracle).spawn_refresh(
            config.indexer.price.refresh_denoms.clone(),
            Duration::from_millis(config.indexer.price.refresh_interval_ms),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    tracing::info!(
        id = %config.indexer.id,
        chain = %config.indexer.chain,
        rpc = %config.rpc_url,
        database = %config.database,
        "starting swapindex"
    );

    let mut scanner = ChainScanner::new(
        config.indexer.clone(),
        fetcher,
        oracle,
        store,
        shutdown_rx,
    )?;
    let outcome = scanner.run(resume).await;
    if let Some(handle) = refresh {
        handle.abort();
    }
    let report = outcome?;

    println!("Scan finished ({})", scanner.state());
    println!("  Resumed after:    {}", report.resumed_after);
    println!("  Last completed:   {}", report.last_completed_height);
    println!("  Heights:          {}", report.heights_processed);
    println!("  Swaps committed:  {}", report.events_committed);
    println!("  Swaps unpriced:   {}", report.events_unpriced);
    println!("  Windows sealed:   {}", report.windows_built);
    Ok(())
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let store = open_store(&config).await?;
    let cursor = store.read_cursor(config.indexer.start_height).await?;
    let query = QueryService::new(store.clone(), config.indexer.window_spec());

    println!("swapindex status ({})", config.database);
    println!("  Chain:            {}", config.indexer.chain);
    println!("  Start height:     {}", cursor.start_height);
    if cursor.has_progress() {
        println!("  Last completed:   {}", cursor.last_completed_height);
    } else {
        println!("  Last completed:   none");
    }
    println!("  Swaps stored:     {}", store.event_count().await?);
    match query.latest_window().await? {
        Some(w) => println!(
            "  Latest window:    #{} [{}..={}] {} leaves, root {}",
            w.window_id,
            w.start_height,
            w.end_height,
            w.leaf_count(),
            w.root
        ),
        None => println!("  Latest window:    none"),
    }
    Ok(())
}

async fn cmd_events(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let from = parse_height_flag(args, "--from")?.ok_or_else(|| anyhow!("--from is required"))?;
    let to = parse_height_flag(args, "--to")?.ok_or_else(|| anyhow!("--to is required"))?;

    let query = query_service(&config).await?;
    for ev in query.events(from, to).await? {
        println!("{}", serde_json::to_string(&ev)?);
    }
    Ok(())
}

async fn cmd_proof(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let key: NaturalKey = parse_flag(args, "--key")
        .ok_or_else(|| anyhow!("--key is required"))?
        .parse()
        .map_err(|e| anyhow!("invalid --key: {e}"))?;

    let query = query_service(&config).await?;
    let proof = query.proof(key).await?;
    println!("{}", serde_json::to_string_pretty(&proof)?);
    Ok(())
}

fn cmd_verify(args: &[String]) -> anyhow::Result<()> {
    let path = parse_flag(args, "--proof").ok_or_else(|| anyhow!("--proof is required"))?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let proof: MerkleProof =
        serde_json::from_str(&raw).with_context(|| format!("parsing proof {path}"))?;

    if !proof.verify() {
        bail!("proof for {} does not match root {}", proof.key, proof.root);
    }
    println!(
        "OK: {} is leaf {} of window #{} (root {})",
        proof.key, proof.leaf_index, proof.window_id, proof.root
    );
    Ok(())
}

async fn cmd_audit(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let id = parse_height_flag(args, "--window")?.ok_or_else(|| anyhow!("--window is required"))?;

    let query = query_service(&config).await?;
    let window = query.audit_window(id).await?;
    println!(
        "OK: window #{} [{}..={}] {} leaves, root {}",
        window.window_id,
        window.start_height,
        window.end_height,
        window.leaf_count(),
        window.root
    );
    Ok(())
}

async fn cmd_reset(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let height =
        parse_height_flag(args, "--height")?.ok_or_else(|| anyhow!("--height is required"))?;
    init_tracing(&config.log);

    let store = open_store(&config).await?;
    let start = config.indexer.start_height;
    let current = store.read_cursor(start).await?;
    if height < start || height > current.next_height() {
        bail!(
            "--height must be within [{start}, {}]",
            current.next_height()
        );
    }

    let cursor = ScanCursor::at(start, height - 1);
    store.reset_cursor(&cursor).await?;
    tracing::warn!(
        from = current.last_completed_height,
        to = cursor.last_completed_height,
        "cursor reset"
    );
    println!("Cursor reset: next height is {height}");
    Ok(())
}

async fn cmd_backfill(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let batch = match parse_flag(args, "--batch") {
        Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid --batch '{raw}'"))?,
        None => 1_000,
    };
    init_tracing(&config.log);

    let store = open_store(&config).await?;
    let oracle = build_oracle(&config)?;
    let report = backfill_usd(store.as_ref(), &oracle, batch).await?;

    println!("Backfill finished");
    println!("  Examined:         {}", report.examined);
    println!("  Filled:           {}", report.filled);
    println!("  Still unpriced:   {}", report.still_unpriced);
    Ok(())
}

// ─── Flags ───────────────────────────────────────────────────────────────────

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_height_flag(args: &[String], flag: &str) -> anyhow::Result<Option<u64>> {
    parse_flag(args, flag)
        .map(|raw| {
            raw.replace('_', "")
                .parse::<u64>()
                .with_context(|| format!("invalid {flag} '{raw}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags() {
        let a = args(&["--from", "17_777_000", "--to", "17777050", "--limit"]);
        assert_eq!(parse_flag(&a, "--to").as_deref(), Some("17777050"));
        assert_eq!(parse_flag(&a, "--limit"), None);
        assert_eq!(parse_height_flag(&a, "--from").unwrap(), Some(17_777_000));
        assert_eq!(parse_height_flag(&a, "--height").unwrap(), None);
        assert!(parse_height_flag(&args(&["--to", "abc"]), "--to").is_err());
    }

    #[test]
    fn verify_rejects_missing_flag() {
        assert!(cmd_verify(&[]).is_err());
    }
}
