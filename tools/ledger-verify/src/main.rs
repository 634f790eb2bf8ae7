//! Audit ledger verification tool
//!
//! Recomputes the checksum of every record (optionally inside a date window)
//! and exits non-zero when any record no longer matches.
//!
//! # Usage
//! ```bash
//! DATABASE_URL=postgres://... ledger-verify \
//!   --from 2026-01-01T00:00:00Z \
//!   --to 2026-03-31T23:59:59Z \
//!   --report evidence/ledger-q1.json
//! ```

use anyhow::{bail, Context, Result};
use audit::db::{init_pool, run_migrations};
use audit::{AuditLedger, DateRange, DbConfig, LedgerConfig, PgAuditStore};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use ledger_verify::{verify_ledger, VerifyOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Verify audit ledger checksums
#[derive(Parser, Debug)]
#[command(name = "ledger-verify")]
#[command(about = "Recompute and compare audit record checksums", long_about = None)]
struct Cli {
    /// Only records that occurred at or after this instant (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Only records that occurred at or before this instant (RFC 3339)
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Records fetched per page
    #[arg(long, default_value_t = 100)]
    page_size: u32,

    /// Stop at the first mismatch
    #[arg(long)]
    fail_fast: bool,

    /// Write the JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Apply pending migrations before verifying
    #[arg(long)]
    migrate: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn date_range(cli: &Cli) -> Result<Option<DateRange>> {
    let range = match (cli.from, cli.to) {
        (None, None) => return Ok(None),
        (from, to) => DateRange::new(
            from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            to.unwrap_or_else(Utc::now),
        )?,
    };
    Ok(Some(range))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let db_config = DbConfig::from_env()?;
    let mut ledger_config = LedgerConfig::from_env()?;
    ledger_config.max_page_size = ledger_config.max_page_size.max(cli.page_size);

    let pool = init_pool(&db_config)
        .await
        .context("failed to connect to the audit database")?;
    if cli.migrate {
        run_migrations(&pool).await?;
    }
    let ledger = AuditLedger::with_config(PgAuditStore::new(pool), ledger_config);

    let options = VerifyOptions {
        range: date_range(&cli)?,
        page_size: cli.page_size,
        fail_fast: cli.fail_fast,
    };
    tracing::info!(?options, "Verifying audit ledger");

    let report = verify_ledger(&ledger, &options).await?;
    if let Some(path) = &cli.report {
        report.write_json(path)?;
        tracing::info!(path = %path.display(), "Report written");
    }

    tracing::info!(
        records_checked = report.records_checked,
        first_sequence = ?report.first_sequence,
        last_sequence = ?report.last_sequence,
        sequence_gaps = report.sequence_gaps,
        mismatches = report.mismatches.len(),
        "Verification finished"
    );

    if !report.is_clean() {
        bail!(
            "{} of {} records failed checksum verification",
            report.mismatches.len(),
            report.records_checked
        );
    }
    Ok(())
}
