use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modbus_scan_rs::scanner::{ScanCoordinator, DEFAULT_TIMEOUT};
use modbus_scan_rs::server;
use modbus_scan_rs::types::{JobStatus, JobSummary, ScanParams};

/// modbus-scan-rs — sweep a Modbus-RTU address range on an RS-485 bus.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "modbus-scan-rs",
    version,
    about = "Sweep a Modbus-RTU address range on an RS-485 bus and report responding devices.",
    long_about = None
)]
struct Cli {
    /// Serial port path (e.g., /dev/ttyUSB0). Required unless --serve is used alone.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for the sweep.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// First device address of the sweep (1-247).
    #[arg(long, default_value_t = 1)]
    start: u8,

    /// Last device address of the sweep (1-247).
    #[arg(long, default_value_t = 247)]
    end: u8,

    /// Register address to read from each probed device.
    #[arg(long, default_value_t = 0)]
    register: u16,

    /// Modbus function code (1-4).
    #[arg(long, default_value_t = 3)]
    function: u8,

    /// Registers read per probe (1-4).
    #[arg(long, default_value_t = 1)]
    count: u16,

    /// Per-transaction read timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Write the finished job as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the HTTP API on this address instead of (or alongside) a one-shot sweep.
    #[arg(long, value_name = "ADDR")]
    serve: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let coordinator = Arc::new(ScanCoordinator::with_serial());

    if let Some(bind) = cli.serve.clone() {
        let coord = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(&bind, coord).await {
                eprintln!("HTTP server error: {e}");
            }
        });
    }

    if let Some(port) = cli.port.clone() {
        let summary = run_sweep(&coordinator, &cli, port).await?;
        print_results_table(&summary);
        if let Some(path) = cli.output.as_deref() {
            write_summary_json(path, &summary)?;
            println!("Wrote JSON results to {}", path.display());
        }
    } else if cli.serve.is_none() {
        bail!("nothing to do: pass --port for a one-shot sweep or --serve for the HTTP API");
    }

    if cli.serve.is_some() {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Start one sweep and poll it to a terminal status.
async fn run_sweep(coordinator: &ScanCoordinator, cli: &Cli, port: String) -> Result<JobSummary> {
    let params = ScanParams {
        port,
        baud_rate: cli.baud,
        start_address: cli.start,
        end_address: cli.end,
        register: cli.register,
        function: cli.function,
        count: cli.count,
        timeout: cli.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT),
        device_id: None,
        device_name: None,
    };
    let queued = coordinator.start_scan(params);
    println!(
        "Scanning {} at {} baud, addresses {}-{} (register {}, function {}, count {})...",
        queued.port, cli.baud, cli.start, cli.end, cli.register, cli.function, cli.count
    );

    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let Some(summary) = coordinator.get_job(&queued.id) else {
            bail!("scan job disappeared");
        };
        if summary.status.is_terminal() {
            return Ok(summary);
        }
        print!("\r  probed {}/{} addresses", summary.progress, summary.total);
        use std::io::Write as _;
        let _ = std::io::stdout().flush();
    }
}

fn print_results_table(summary: &JobSummary) {
    println!(
        "\nScan {}: {} ({} of {} addresses probed)",
        summary.id,
        match summary.status {
            JobStatus::Completed => "completed",
            JobStatus::Error => "failed",
            JobStatus::Cancelled => "cancelled",
            _ => "unfinished",
        },
        summary.progress,
        summary.total
    );
    if let Some(err) = &summary.error {
        println!("  error: {err}");
    }
    if summary.results.is_empty() {
        println!("  no devices responded");
        return;
    }

    let mut raw_w = "raw".len();
    for r in &summary.results {
        raw_w = raw_w.max(r.raw.len());
    }
    println!(
        "{:>7}  {:>8}  {:>8}  {:>10}  {:<raw_w$}",
        "address", "register", "function", "value", "raw",
    );
    println!(
        "{:->7}  {:->8}  {:->8}  {:->10}  {:-<raw_w$}",
        "", "", "", "", "",
    );
    for r in &summary.results {
        println!(
            "{:>7}  {:>8}  {:>8}  {:>10}  {:<raw_w$}",
            r.address, r.register, r.function, r.value, r.raw,
        );
    }
}

fn write_summary_json(path: &std::path::Path, summary: &JobSummary) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
