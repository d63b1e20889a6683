use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use azure_price_scanner::clients::retail_prices::RetailPricesClient;
use azure_price_scanner::config::{self, AppConfig, OsChoice};
use azure_price_scanner::error::ScanResult;
use azure_price_scanner::ops;
use azure_price_scanner::scanner::{PriceScanner, ScanReport, ScanStats};
use azure_price_scanner::time::now_utc;
use clap::Parser;

/// Refreshes the dashboard's VM price dataset from the Azure Retail Prices API.
///
/// Every flag overrides the layered config (defaults, `AZPS_CONFIG_PATH` file,
/// `AZPS_*` environment).
#[derive(Debug, Parser)]
#[command(name = "azure-price-scanner", version)]
struct Cli {
    /// Dataset file to merge into.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    #[arg(long, value_enum)]
    os: Option<OsChoice>,

    /// Keep spot and low-priority meters.
    #[arg(long)]
    include_spot: bool,

    /// Comma-separated ARM region names, e.g. `eastus,westeurope`.
    #[arg(long, value_delimiter = ',', value_name = "REGION,...")]
    regions: Vec<String>,

    /// Page cap per filter set; 0 follows every continuation link.
    #[arg(long)]
    max_pages: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    #[arg(long, value_name = "CODE")]
    currency: Option<String>,

    /// Drop records not refreshed within this many days.
    #[arg(long, value_name = "DAYS")]
    prune_after_days: Option<u32>,
}

impl Cli {
    fn apply(self, cfg: &mut AppConfig) {
        if let Some(out) = self.out {
            cfg.store.output_path = out;
        }
        if let Some(os) = self.os {
            cfg.scanner.os = os;
        }
        if self.include_spot {
            cfg.scanner.include_spot = true;
        }
        let regions: Vec<String> = self
            .regions
            .iter()
            .map(|r| r.trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        if !regions.is_empty() {
            cfg.scanner.regions = regions;
        }
        if let Some(max_pages) = self.max_pages {
            cfg.scanner.max_pages = max_pages;
        }
        if let Some(timeout) = self.timeout {
            cfg.scanner.timeout_s = timeout;
        }
        if let Some(currency) = self.currency {
            cfg.scanner.currency_code = currency.trim().to_ascii_uppercase();
        }
        if let Some(days) = self.prune_after_days {
            cfg.store.prune_after_days = Some(days);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match config::load_config_with(|cfg| cli.apply(cfg)) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("azure-price-scanner: {err}");
            return ExitCode::FAILURE;
        }
    };
    ops::logging::init_with_default(&cfg.infra.log_level);

    tracing::info!(
        target: "boot",
        api_url = %cfg.scanner.api_url,
        currency = %cfg.scanner.currency_code,
        os = ?cfg.scanner.os,
        include_spot = cfg.scanner.include_spot,
        regions = cfg.scanner.regions.len(),
        out = %cfg.store.output_path.display(),
        "azure-price-scanner starting"
    );

    let started = Instant::now();
    let mut stats = ScanStats::default();
    match run(&cfg, &mut stats).await {
        Ok(report) => {
            println!("{stats}");
            println!(
                "Dataset: {} records ({} inserted, {} replaced, {} retained, {} pruned)",
                report.records,
                report.reconcile.inserted,
                report.reconcile.replaced,
                report.reconcile.retained,
                report.pruned
            );
            println!("Generated at: {}", report.generated_at);
            println!("Written to: {}", cfg.store.output_path.display());
            println!();
            println!("{}", report.summary);
            println!("Duration: {:.2} seconds", started.elapsed().as_secs_f64());
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(target: "boot", error = %err, "scan failed");
            eprintln!("{stats}");
            eprintln!("azure-price-scanner failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &AppConfig, stats: &mut ScanStats) -> ScanResult<ScanReport> {
    let client = RetailPricesClient::from_config(cfg)?;
    let scanner = PriceScanner::new(client, cfg);
    scanner.run(stats, now_utc()).await
}
