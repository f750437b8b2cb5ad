mod config;
mod error;
mod interpreter;
mod models;
mod orchestrator;
mod output;
mod rate_limit;
mod scanner;
mod selector;
mod session;
mod target;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Command, Config, EngineSettings};
use error::ScanError;
use interpreter::{palette, ScanSummary, StreamInterpreter};
use models::{PhaseKind, Port, PortState, Protocol};
use orchestrator::Orchestrator;
use output::{JsonWriter, MarkdownWriter, ScanMetadata, StreamWriter};
use scanner::{InvokeTarget, NmapEngine, PhaseParams};
use selector::ScriptSelector;
use session::{EventEmitter, SessionInfo};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    setup_logging(config.verbose);
    palette::configure(!config.no_color);

    let settings = config.engine_settings();

    match &config.command {
        Command::Select {
            service,
            port,
            limit,
            target,
            json,
        } => run_select(&config, settings, service, *port, *limit, target.as_deref(), *json),
        Command::Interpret { file } => run_interpret(file.as_deref()),
        Command::Discover { target } => run_discover(&config, settings, target.as_deref()).await,
        Command::Ports { host } => run_ports(&config, settings, host).await,
        Command::Actions { host, port, service } => {
            run_actions(&config, settings, host, *port, service.clone()).await
        }
        Command::Scan {
            target,
            output,
            no_report,
            stream_only,
        } => {
            run_scan(
                &config,
                settings,
                target.as_deref(),
                output.clone(),
                *no_report,
                *stream_only,
            )
            .await
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stdout carries the event stream and report
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

fn run_select(
    config: &Config,
    settings: EngineSettings,
    service: &str,
    port: u32,
    limit: usize,
    target: Option<&str>,
    json: bool,
) -> Result<()> {
    let selector = ScriptSelector::new();
    let actions = selector.select(service, port, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else {
        println!(
            "Actions for {} on port {} (table v{}):",
            service,
            port,
            selector.table_version()
        );
        for (rank, action) in actions.iter().enumerate() {
            println!(
                "  {}. {:<24} {:.2}  [{}]  {}",
                rank + 1,
                action.name,
                action.score,
                action.source,
                action.description
            );
        }
    }

    if let Some(target) = target {
        let host = target::parse_host(target)?;
        let port = u16::try_from(port).map_err(|_| ScanError::invalid("port out of range"))?;
        let engine = NmapEngine::new(config.nmap.clone(), settings);
        let params = PhaseParams::actions(actions.into_iter().map(|a| a.name).collect());
        let invoke_target = InvokeTarget::Service {
            host,
            port,
            protocol: Protocol::Tcp,
        };
        match engine.build_args(PhaseKind::Action, &invoke_target, &params) {
            Ok(args) => println!("\nSuggested: {} {}", config.nmap.display(), args.join(" ")),
            Err(e) => warn!("No command to suggest: {}", e),
        }
    }

    Ok(())
}

fn run_interpret(file: Option<&Path>) -> Result<()> {
    let reader: Box<dyn BufRead> = match file {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    let stdout = io::stdout();
    let mut interpreter = StreamInterpreter::new(stdout.lock());
    interpreter.run(reader)?;
    interpreter.finish()?;
    Ok(())
}

/// Orchestrator for a single standalone phase: no event consumer and no
/// interrupt handling.
async fn standalone(config: &Config, settings: EngineSettings) -> Result<(Orchestrator, watch::Sender<bool>)> {
    let engine = NmapEngine::locate(&config.nmap, settings.clone()).await?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(Arc::new(engine), settings, EventEmitter::detached(), stop_rx);
    Ok((orchestrator, stop_tx))
}

async fn run_discover(config: &Config, settings: EngineSettings, target: Option<&str>) -> Result<()> {
    let network = target::resolve(target)?;
    let (mut orchestrator, _stop) = standalone(config, settings).await?;

    orchestrator.discover(network).await?;
    print_json(&orchestrator.aggregator().hosts())
}

async fn run_ports(config: &Config, settings: EngineSettings, host: &str) -> Result<()> {
    let host: IpAddr = target::parse_host(host)?;
    let (mut orchestrator, _stop) = standalone(config, settings).await?;
    let aggregator = orchestrator.aggregator();

    aggregator.seed_host(host);
    orchestrator.scan_ports(&[host]).await?;
    print_json(&aggregator.ports_for(host))
}

async fn run_actions(
    config: &Config,
    settings: EngineSettings,
    host: &str,
    port: u32,
    service: Option<String>,
) -> Result<()> {
    let host = target::parse_host(host)?;
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ScanError::invalid(format!("port {} outside 1-65535", port)))?;

    let (mut orchestrator, _stop) = standalone(config, settings).await?;
    let aggregator = orchestrator.aggregator();

    aggregator.seed_port(Port::new(host, port, Protocol::Tcp, PortState::Open).with_service(service));
    orchestrator.execute_actions(aggregator.action_targets()).await?;

    print_json(&serde_json::json!({
        "port": aggregator.ports_for(host),
        "results": aggregator.action_results(),
    }))
}

async fn run_scan(
    config: &Config,
    settings: EngineSettings,
    target: Option<&str>,
    output: Option<PathBuf>,
    no_report: bool,
    stream_only: bool,
) -> Result<()> {
    // Bad targets fail before anything is spawned.
    let network = target::resolve(target)?;
    if let Some(dir) = &output {
        output::ensure_dir(dir).await?;
    }

    let engine = NmapEngine::locate(&config.nmap, settings.clone()).await?;
    let session = SessionInfo::new(network, config.profile);
    info!("Session ID: {}", session.id);

    let (emitter, mut events) = EventEmitter::new();
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight scans finish");
            let _ = stop_tx.send(true);
        }
    });

    // Single consumer: transcript file, then raw stream or live report.
    let mut stream_writer = output.clone().map(StreamWriter::new);
    let consumer = tokio::spawn(async move {
        let sink: Box<dyn Write + Send> = if stream_only {
            Box::new(io::sink())
        } else {
            Box::new(io::stdout())
        };
        let mut interpreter = StreamInterpreter::new(sink);

        while let Some(record) = events.recv().await {
            let line = record.to_line()?;
            if let Some(writer) = stream_writer.as_mut() {
                if let Err(e) = writer.write_line(&line).await {
                    error!("Failed to write event: {}", e);
                }
            }
            if stream_only {
                println!("{}", line);
            }
            interpreter.process_line(&line)?;
        }

        Ok::<ScanSummary, anyhow::Error>(interpreter.finish()?)
    });

    let mut orchestrator = Orchestrator::new(Arc::new(engine), settings, emitter, stop_rx);
    let aggregator = orchestrator.aggregator();
    let result = orchestrator.run(&session).await;

    // Closing the channel lets the consumer render the final report.
    drop(orchestrator);
    let summary = consumer.await.context("event consumer stopped")??;
    let outcome = result?;

    if let Some(dir) = output {
        let metadata = ScanMetadata::new(&session, outcome.cancelled);
        JsonWriter::new(dir.clone())
            .write_results(&aggregator.snapshot(), &metadata)
            .await?;
        if !no_report {
            MarkdownWriter::new(dir.clone())
                .write_report(&summary, &metadata)
                .await?;
        }
        info!("Results written to {}", dir.display());
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
