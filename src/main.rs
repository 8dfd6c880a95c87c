mod capture;
mod cli;
mod selector;
mod session;
mod sink;
mod transport;
mod tui;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use selector::GateKind;
use session::{CameraConfig, CameraSession, GateSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use transport::http::HttpPost;
use transport::{Destination, Status};

use capture::source::SourceSpec;

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=gatelink=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Chips { gate, json } => {
            list_chips(parse_gate(&gate)?, json)?;
        }
        Commands::Chip { gate, addr, code, name } => {
            send_chip(parse_gate(&gate)?, &addr, code, name.as_deref()).await?;
        }
        Commands::Gate { gate, addr } => {
            run_gate(parse_gate(&gate)?, &addr).await?;
        }
        Commands::Camera {
            addr,
            protocol,
            source,
            capture_width,
            autostart,
            send_timeout_ms,
        } => {
            let config = CameraConfig {
                protocol,
                capture_width,
                send_timeout: send_timeout_ms.map(Duration::from_millis),
                ..CameraConfig::default()
            };
            let spec: SourceSpec = source.parse()?;
            run_camera(config, &addr, spec, autostart).await?;
        }
        Commands::Sink { http, ws, dump } => {
            sink::Sink::new(http, ws, dump).run().await?;
        }
    }

    Ok(())
}

fn parse_gate(gate: &str) -> Result<GateKind> {
    gate.parse()
        .with_context(|| format!("Unknown gate '{}' (expected bcg, pcg or blg)", gate))
}

fn list_chips(gate: GateKind, json: bool) -> Result<()> {
    let table = gate.table();
    let entries = table.entries();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("🎴 {} ({} chips in {} slots)", gate, entries.len(), table.len());
    for entry in entries {
        println!("{:>5}  {}", entry.code, entry.name);
    }
    Ok(())
}

async fn send_chip(gate: GateKind, addr: &str, code: Option<u32>, name: Option<&str>) -> Result<()> {
    let entry = selector::resolve(gate, code, name)?;
    let destination = Destination::http(addr).context("Invalid server address")?;

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let mut session = GateSession::new(gate, destination, Arc::new(HttpPost), status_tx);

    println!("🎴 Sending {} ({}) to {}", entry.name, entry.code, session.destination());
    session.on_selection_made(entry.code)?;

    match status_rx.recv().await {
        Some(Status::Good) => println!("✅ {}", Status::Good),
        Some(status) => anyhow::bail!("{}", status),
        None => anyhow::bail!("Send task ended without a status"),
    }
    Ok(())
}

async fn run_gate(gate: GateKind, addr: &str) -> Result<()> {
    let destination = Destination::http(addr).context("Invalid server address")?;
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let mut session = GateSession::new(gate, destination, Arc::new(HttpPost), status_tx);

    let mut ui = tui::GateUI::new(&session);
    ui.run(&mut session, status_rx).await
}

async fn run_camera(config: CameraConfig, addr: &str, spec: SourceSpec, autostart: bool) -> Result<()> {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let mut session = CameraSession::new(config, addr, Arc::new(HttpPost), status_tx)?;

    println!("📷 Gatelink camera ({}, {})", config.protocol.wire_format(), session.destination());
    if let Err(e) = session.request_camera(&spec) {
        println!("{}", session.camera_state());
        return Err(e).context("Could not open the frame source");
    }

    let geometry = session.wait_ready().await?;
    println!("{} ({}x{} capture)", session.camera_state(), geometry.width, geometry.height);

    if autostart {
        session.on_stream_toggle()?;
        println!("{}", session.camera_state());
    }

    println!("Commands: s = start/stop stream · addr HOST:PORT = change server · q = quit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_status: Option<Status> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
                    ("s" | "toggle", _) => match session.on_stream_toggle() {
                        Ok(_) => println!("{}", session.camera_state()),
                        Err(e) => println!("⚠️  {}", e),
                    },
                    ("addr", address) if !address.is_empty() => match session.on_destination_changed(address) {
                        Ok(()) => {
                            last_status = None;
                            println!("Destination : {}", session.destination());
                        }
                        Err(e) => println!("⚠️  Bad address: {}", e),
                    },
                    ("stats", _) => println!("{}", session.stats()),
                    ("q" | "quit", _) => break,
                    ("", _) => {}
                    _ => println!("Unknown command: {}", line),
                }
            }
            Some(status) = status_rx.recv() => {
                // Five ticks a second; only print changes
                if last_status.as_ref() != Some(&status) {
                    println!("{}", status);
                    last_status = Some(status);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if session.is_streaming() {
        session.on_stream_toggle()?;
    }
    println!("{}", session.stats());
    Ok(())
}
