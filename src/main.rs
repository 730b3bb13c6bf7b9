use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use time::OffsetDateTime;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scan_console::backend::{HttpBackend, ScanBackend, ScanRequest, StartResponse};
use scan_console::channel::{self, EventChannel};
use scan_console::config::ConsoleConfig;
use scan_console::engine::{self, Console};
use scan_console::error::ConsoleError;
use scan_console::events::Event;
use scan_console::history::{FileBackend, History, MemoryBackend};
use scan_console::render::{self, ResultView};
use scan_console::server::{self, AppState};
use scan_console::types::{ScanSession, ScanType};
use scan_console::logging;

/// scan-console: client console for a remote network scanning service.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scan-console",
    version,
    about = "Client console for a remote network scanning service: start scans, follow progress, browse results and history.",
    long_about = None
)]
struct Cli {
    /// JSON config file. Without one, SCAN_CONSOLE_* environment variables apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the scanning service.
    #[arg(long = "backend-url")]
    backend_url: Option<String>,

    /// host:port of the event channel.
    #[arg(long)]
    events: Option<String>,

    /// port_scan, vulnerability_scan, network_scan or snmp_scan.
    #[arg(long = "scan-type", default_value = "port_scan")]
    scan_type: ScanType,

    /// IP, hostname or CIDR to scan. Starts a one-shot scan when given.
    #[arg(long)]
    target: Option<String>,

    /// Port list or range (ignored for SNMP scans).
    #[arg(long)]
    ports: Option<String>,

    /// Session id to adopt before replaying a recorded event log.
    #[arg(long = "scan-id")]
    scan_id: Option<String>,

    /// Write the final session as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the embedded HTTP console.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the embedded HTTP console.
    #[arg(long)]
    bind: Option<String>,

    /// Print recent scans and dashboard counters, then exit.
    #[arg(long, default_value_t = false)]
    history: bool,

    /// Feed a recorded JSON-lines event log through the console, then exit.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, cfg: &mut ConsoleConfig) {
        if let Some(url) = &self.backend_url {
            cfg.backend_url = url.clone();
        }
        if let Some(addr) = &self.events {
            cfg.events_addr = Some(addr.clone());
        }
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
    }

    fn request(&self, target: &str) -> ScanRequest {
        ScanRequest {
            scan_type: self.scan_type,
            target: target.to_string(),
            ports: self.ports.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConsoleConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    logging::init(&config.log_level, cli.verbose);

    println!("scan-console configuration:");
    println!("  backend      : {}", config.backend_url);
    println!(
        "  events       : {}",
        config.events_addr.as_deref().unwrap_or("<none>")
    );
    println!("  history_dir  : {}", config.history_dir.display());
    println!("  scan_type    : {}", cli.scan_type.label());
    println!("  target       : {}", cli.target.as_deref().unwrap_or("<none>"));
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    let backend = HttpBackend::new(
        &config.backend_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    if let Some(path) = cli.replay.as_deref() {
        // Replays never touch the on-disk history.
        let history = History::with_limit(MemoryBackend::new(), config.history_limit);
        let mut console = Console::with_activity_limit(history, config.activity_limit);
        replay(&mut console, &cli, path).await?;
        return report(&console, &backend, cli.output.as_deref());
    }

    let history = History::with_limit(FileBackend::new(&config.history_dir), config.history_limit);
    let mut console = Console::with_activity_limit(history, config.activity_limit);

    if cli.history {
        print_history(&console);
        return Ok(());
    }

    if cli.serve_ui {
        let state = AppState::new(console, backend);
        let cancel = CancellationToken::new();
        server::spawn_background(
            state.clone(),
            config.events_addr.clone(),
            Duration::from_secs(config.refresh_interval_secs),
            cancel.clone(),
        );
        let bind = config.bind.clone();
        let ui_dir = config.ui_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, &ui_dir, state).await {
                eprintln!("HTTP UI server error: {e}");
            }
        });
        println!("UI server starting at http://{} (Ctrl+C to stop)", config.bind);
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
        return Ok(());
    }

    match cli.target.as_deref() {
        Some(target) => {
            one_shot(&mut console, &backend, cli.request(target), config.events_addr.as_deref())
                .await?;
            report(&console, &backend, cli.output.as_deref())
        }
        None => {
            println!("\nNothing to do: pass --target, --history, --replay or --serve-ui.");
            Ok(())
        }
    }
}

/// Start a scan and follow its events until it finishes.
async fn one_shot<B: ScanBackend>(
    console: &mut Console,
    backend: &B,
    request: ScanRequest,
    events_addr: Option<&str>,
) -> Result<()> {
    // Connect first so the earliest progress frames are not missed.
    let feed = match events_addr {
        Some(addr) => Some(channel::connect_tcp(addr).await?),
        None => None,
    };

    let Some(id) = engine::start_scan(console, backend, request).await? else {
        bail!("scanning service did not start the scan");
    };
    println!("\nStarted scan {id}");

    let Some(feed) = feed else {
        println!("No event channel configured (--events); not following progress.");
        return Ok(());
    };

    let (tx, mut rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    let forwarder = tokio::spawn(channel::forward(feed, tx, cancel.clone()));

    let mut shown = None;
    while let Some(event) = rx.recv().await {
        match console.handle(event) {
            Ok(()) | Err(ConsoleError::BackendReported { .. }) => {}
            Err(e) => warn!(kind = e.kind(), error = %e, "event not applied cleanly"),
        }
        let Some(session) = console.sessions().get(&id) else {
            break;
        };
        if shown != Some(session.progress) {
            shown = Some(session.progress);
            println!(
                "  {:>3}%  {}",
                session.progress,
                session.current_task.as_deref().unwrap_or("")
            );
        }
        if session.status.is_terminal() {
            break;
        }
    }
    cancel.cancel();
    let _ = forwarder.await;
    Ok(())
}

async fn replay(console: &mut Console, cli: &Cli, path: &Path) -> Result<()> {
    if let (Some(id), Some(target)) = (cli.scan_id.as_deref(), cli.target.as_deref()) {
        let adopt = Event::ScanStarted {
            request: cli.request(target),
            response: StartResponse {
                status: "started".into(),
                scan_id: Some(id.to_string()),
            },
        };
        match console.handle(adopt) {
            Ok(()) | Err(ConsoleError::StorageDegraded(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open event log: {}", path.display()))?;
    let mut feed = EventChannel::new(BufReader::new(file));
    let mut applied = 0usize;
    while let Some(event) = feed.next_event().await {
        if let Err(e) = console.handle(event) {
            debug!(error = %e, "replayed event not applied cleanly");
        }
        applied += 1;
    }
    println!("\nReplayed {applied} events from {}", path.display());
    Ok(())
}

/// Print the active session and its results; optionally save it as JSON.
fn report<B: ScanBackend>(console: &Console, backend: &B, output: Option<&Path>) -> Result<()> {
    let Some(session) = console.active() else {
        println!("No active scan.");
        return Ok(());
    };
    println!(
        "\n{} on {}: {} ({}%)",
        session.scan_type.label(),
        session.target,
        session.status,
        session.progress
    );
    if let Some(err) = &session.error {
        println!("Error: {err}");
    }
    print_view(&render::render(session.scan_type, session.results.as_ref()));
    if session.report_path.is_some() {
        println!("\nReport: {}", backend.report_url(&session.id));
    }
    if let Some(path) = output {
        match write_session_json(path, session) {
            Ok(()) => println!("Wrote JSON results to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {}", path.display(), e),
        }
    }
    Ok(())
}

fn print_history(console: &Console) {
    let now = OffsetDateTime::now_utc();
    println!("\nRecent scans: {}", console.history().len());
    let rows: Vec<Vec<String>> = console
        .history()
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.scan_type.label().to_string(),
                e.target.clone(),
                e.status.to_string(),
                render::time_ago(e.start_time, now),
            ]
        })
        .collect();
    print_table(&["id", "type", "target", "status", "started"], &rows);

    let s = console.stats();
    println!("\nScans by type:");
    for t in ScanType::ALL {
        println!("  {:<20} {}", t.label(), s.counts.get(t));
    }
    println!("Unique hosts         {}", s.unique_hosts);
    println!("Open ports           {}", s.open_ports);
    println!(
        "Vulnerabilities      {} (critical {}, high {}, medium {}, low {})",
        s.total_vulnerabilities,
        s.severities.critical,
        s.severities.high,
        s.severities.medium,
        s.severities.low
    );
}

fn print_view(view: &ResultView) {
    match view {
        ResultView::Empty { message } => println!("{message}"),
        ResultView::Ports { rows } => print_ports(rows),
        ResultView::Vulnerabilities { ports, findings, note } => {
            print_ports(ports);
            if let Some(note) = note {
                println!("{note}");
            }
            let rows: Vec<Vec<String>> = findings
                .iter()
                .map(|f| vec![f.severity.clone(), f.name.clone(), f.description.clone()])
                .collect();
            if !rows.is_empty() {
                println!("\nFindings: {}", rows.len());
                print_table(&["severity", "name", "description"], &rows);
            }
        }
        ResultView::Network { hosts } => {
            println!("\nHosts: {}", hosts.len());
            let rows: Vec<Vec<String>> = hosts
                .iter()
                .map(|h| {
                    vec![
                        h.ip.clone(),
                        h.mac.clone(),
                        h.vendor.clone(),
                        h.status.clone(),
                        h.open_ports.to_string(),
                    ]
                })
                .collect();
            print_table(&["ip", "mac", "vendor", "status", "open"], &rows);
        }
        ResultView::Snmp(snmp) => {
            for (title, pairs) in [
                ("Community strings", &snmp.community_strings),
                ("System information", &snmp.system_info),
            ] {
                println!("\n{title}:");
                for (k, v) in pairs {
                    println!("  {k}: {v}");
                }
            }
            let rows: Vec<Vec<String>> = snmp
                .interfaces
                .iter()
                .map(|i| {
                    vec![
                        i.index.clone(),
                        i.description.clone(),
                        i.speed.clone(),
                        i.oper_status.clone(),
                    ]
                })
                .collect();
            println!("\nInterfaces: {}", rows.len());
            print_table(&["index", "description", "speed", "status"], &rows);
        }
    }
}

fn print_ports(rows: &[render::PortRow]) {
    println!("\nPorts: {}", rows.len());
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|p| {
            vec![
                p.port.to_string(),
                p.protocol.clone(),
                p.status.clone(),
                p.service.clone(),
                format!("{} {}", p.product, p.version).trim().to_string(),
            ]
        })
        .collect();
    print_table(&["port", "proto", "state", "service", "version"], &rows);
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    const MAX_CELL: usize = 60;
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count().min(MAX_CELL));
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    line(headers.iter().map(|h| h.to_string()).collect());
    line(widths.iter().map(|w| "-".repeat(*w)).collect());
    for row in rows {
        line(
            row.iter()
                .map(|c| c.chars().take(MAX_CELL).collect())
                .collect(),
        );
    }
}

fn write_session_json(path: &Path, session: &ScanSession) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;
    Ok(())
}
