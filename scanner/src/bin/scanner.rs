use std::sync::Arc;
use std::time::Duration;

use alloy::providers::RootProvider;
use alloy::transports::http::{Client, Http};
use anyhow::{anyhow, bail, Result};
use clap::Parser;
use cli::{Command, OutputFormat};
use contract_scanner::block_interval::BlockInterval;
use contract_scanner::config::{load_dotenvy_vars_if_present, resolve_endpoint, ScannerConfig};
use contract_scanner::metrics::{ScanReport, Termination};
use contract_scanner::provider::{ChainClient, RpcProvider};
use contract_scanner::scan::ScanLoop;
use contract_scanner::session::{ScanSession, Shutdown};
use contract_scanner::storage::{CsvSink, JsonLinesSink, MemorySink, StorageSink};
use serde_json::json;
use tracing::{info, warn};

use self::scanner::*;
mod scanner {
    pub mod cli;
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenvy_vars_if_present();
    contract_scanner::tracing::init();

    let args = cli::Cli::parse();
    let output = args.output_path();

    let mut config: ScannerConfig = args.scanner_config.into();
    if let Command::Follow {
        duration_secs: Some(secs),
        ..
    } = args.command
    {
        config.session_timeout = Some(Duration::from_secs(secs));
    }
    config.validate()?;

    let endpoint = resolve_endpoint(args.rpc_url, args.alchemy_api_key.as_deref())?;
    info!(
        "using RPC endpoint at {}",
        endpoint.host_str().unwrap_or("<unknown host>")
    );
    let provider = RpcProvider::<_, Http<Client>>::new(
        RootProvider::new_http(endpoint),
        config.max_parallel_requests,
    );
    let session = Arc::new(ScanSession::new(provider, config));

    if let Command::Probe = args.command {
        return probe(&session).await;
    }

    let (trigger, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing in-flight blocks");
                trigger.trigger();
            }
            Err(e) => warn!("could not listen for interrupts: {e}"),
        }
    });

    let report = if args.dry_run {
        let sink = Arc::new(MemorySink::new());
        let report = scan(session, sink.clone(), shutdown, args.command).await?;
        info!("dry run kept {} records in memory", sink.len().await);
        report
    } else {
        match args.format {
            OutputFormat::Jsonl => {
                let sink = Arc::new(JsonLinesSink::open(&output).await?);
                scan(session, sink, shutdown, args.command).await?
            }
            OutputFormat::Csv => {
                let sink = Arc::new(CsvSink::open(&output).await?);
                scan(session, sink, shutdown, args.command).await?
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.termination {
        Some(Termination::Failed(e)) => Err(anyhow!("scan failed: {e}")),
        _ => Ok(()),
    }
}

async fn scan<C, S>(
    session: Arc<ScanSession<C>>,
    sink: Arc<S>,
    shutdown: Shutdown,
    command: Command,
) -> Result<ScanReport>
where
    C: ChainClient + 'static,
    S: StorageSink,
{
    let mut scan_loop = ScanLoop::new(session, sink, shutdown);
    let report = match command {
        Command::Range { interval, recent } => {
            let interval = match (interval, recent) {
                (Some(interval), _) => BlockInterval::new(&interval)?,
                (None, Some(count)) => BlockInterval::Recent(count),
                (None, None) => bail!("either an interval or --recent is required"),
            };
            info!("scanning interval {interval}");
            match interval {
                BlockInterval::FollowFrom { start_block } => {
                    scan_loop.run_follow(start_block).await
                }
                bounded => scan_loop.run_range(bounded).await,
            }
        }
        Command::Follow { from, .. } => scan_loop.run_follow(from).await,
        Command::Probe => bail!("probe does not scan"),
    };
    Ok(report)
}

async fn probe<C: ChainClient>(session: &ScanSession<C>) -> Result<()> {
    let head = session.client.get_chain_head().await?;
    let block = session.client.get_block(head).await?;
    let summary = json!({
        "chain_head": head,
        "block_hash": block.hash,
        "timestamp": block.iso_timestamp(),
        "transactions": block.transactions.len(),
        "gas_used": block.gas_used,
        "gas_limit": block.gas_limit,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
