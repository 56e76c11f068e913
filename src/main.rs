use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_stocks_valuation::database_sqlx::DatabaseManagerSqlx;
use rust_stocks_valuation::feature_materializer::{imputed_fields, materialize_as_of, value_code};
use rust_stocks_valuation::models::{Config, ValuationFeature};
use rust_stocks_valuation::tools::csv_importer;

#[derive(Parser)]
#[command(
    name = "rust-stocks-valuation",
    about = "🧮 Point-in-time FY reconciliation and valuation features (PER, forward PER, PBR)"
)]
struct Cli {
    /// Path to SQLite database (overrides DATABASE_PATH)
    #[arg(long = "db", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize the feature snapshot for one date, or every price date in a range
    Materialize {
        #[arg(long, conflicts_with_all = ["from", "to"], required_unless_present_all = ["from", "to"])]
        as_of: Option<NaiveDate>,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },
    /// Load a statements CSV export into the disclosures table
    ImportDisclosures {
        #[arg(long)]
        csv: String,
    },
    /// Load a daily quotes CSV export into the price table
    ImportPrices {
        #[arg(long)]
        csv: String,
    },
    /// Show the canonical FY record and share reconciliation for one code
    Inspect {
        #[arg(long)]
        code: String,
        #[arg(long)]
        as_of: NaiveDate,
    },
    /// Print the stored feature rows for one date
    Report {
        #[arg(long)]
        as_of: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rust_stocks_valuation=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.database {
        config.database_path = db;
    }

    let db = DatabaseManagerSqlx::new(&config.database_path).await?;
    info!("💾 Database: {}", config.database_path);

    let result = match cli.command {
        Commands::Materialize { as_of, from, to } => match (as_of, from, to) {
            (Some(as_of), _, _) => materialize_one(&db, as_of, &config).await,
            (None, Some(from), Some(to)) => materialize_range(&db, from, to, &config).await,
            _ => Err(anyhow!("either --as-of or both --from and --to are required")),
        },
        Commands::ImportDisclosures { csv } => {
            let stats = csv_importer::import_disclosures(&db, &csv).await?;
            println!(
                "✅ {} disclosures imported, {} rows skipped",
                stats.rows_imported, stats.rows_skipped
            );
            Ok(())
        }
        Commands::ImportPrices { csv } => {
            let stats = csv_importer::import_prices(&db, &csv).await?;
            println!(
                "✅ {} prices imported, {} rows skipped",
                stats.rows_imported, stats.rows_skipped
            );
            Ok(())
        }
        Commands::Inspect { code, as_of } => inspect(&db, &code, as_of, &config).await,
        Commands::Report { as_of } => report(&db, as_of).await,
    };

    db.close().await;
    result
}

async fn materialize_one(db: &DatabaseManagerSqlx, as_of: NaiveDate, config: &Config) -> Result<()> {
    let start_time = Instant::now();
    let stats = materialize_as_of(db, db, as_of, config).await?;

    println!("🧮 FEATURE SNAPSHOT {}", as_of);
    println!("{}", "=".repeat(60));
    println!("📊 Codes considered:     {}", stats.codes_considered);
    println!("✅ Rows written:         {}", stats.rows_written);
    println!("⏭️  Rows omitted:         {}", stats.rows_omitted);
    println!("⚠️  No share basis:       {}", stats.share_basis_failures);
    println!("🔁 Imputed fields:       {}", stats.imputed_fields);
    println!("❓ Exhausted fields:     {}", stats.exhausted_fields);
    println!("🔍 Oracle mismatches:    {}", stats.oracle_mismatches);
    println!("⏱️  Elapsed:              {:.2?}", start_time.elapsed());
    Ok(())
}

async fn materialize_range(
    db: &DatabaseManagerSqlx,
    from: NaiveDate,
    to: NaiveDate,
    config: &Config,
) -> Result<()> {
    if from > to {
        return Err(anyhow!("--from {} is after --to {}", from, to));
    }

    let dates = db.price_dates_between(from, to).await?;
    if dates.is_empty() {
        println!("❌ No price dates between {} and {}", from, to);
        return Ok(());
    }

    let pb = ProgressBar::new(dates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")?
            .progress_chars("#>-"),
    );

    let mut total_rows = 0;
    let mut total_omitted = 0;
    for as_of in dates {
        pb.set_message(as_of.to_string());
        // each date commits on its own; a failure stops the range but keeps earlier dates
        let stats = materialize_as_of(db, db, as_of, config).await?;
        total_rows += stats.rows_written;
        total_omitted += stats.rows_omitted;
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!(
        "✅ Materialized {} rows ({} omitted) from {} to {}",
        total_rows, total_omitted, from, to
    );
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}

async fn inspect(db: &DatabaseManagerSqlx, code: &str, as_of: NaiveDate, config: &Config) -> Result<()> {
    let valuation = value_code(db, code, as_of, config).await?;
    let record = &valuation.record;

    println!("🔍 {} as of {}", code, as_of);
    println!("📄 Canonical FY: {}", record.disclosure.key());
    println!("{}", "-".repeat(60));
    for (field, provenance) in &record.fields {
        let from = provenance
            .source_disclosure
            .as_ref()
            .map(|k| format!(" <- {}", k))
            .unwrap_or_default();
        println!(
            "{:28} {:>20} {}{}",
            field.name(),
            fmt_opt(provenance.value),
            provenance.source,
            from
        );
    }
    println!("🔁 Imputed: {:?}", imputed_fields(record));

    println!("{}", "-".repeat(60));
    match (&valuation.shares, &valuation.share_basis_error) {
        (Some(shares), _) => {
            println!("🧾 Net shares at {}: {:.0}", shares.snapshot.reference_date, shares.snapshot.net_shares);
            println!("📐 Cumulative adjustment factor: {}", shares.cumulative_adjustment_factor);
            println!("📈 Latest-basis shares: {:.0}", shares.latest_basis_shares);
        }
        (None, Some(e)) => println!("⚠️  No share basis: {}", e),
        (None, None) => println!("⚠️  No share basis"),
    }

    print_feature(&valuation.feature);
    println!("🔍 Consistency: {:?}", valuation.consistency);
    Ok(())
}

async fn report(db: &DatabaseManagerSqlx, as_of: NaiveDate) -> Result<()> {
    let features = db.features_for_date(as_of).await?;
    let run = db.feature_run(as_of).await?;

    match run {
        Some(run) => println!(
            "📊 Snapshot {}: {} rows, {} omitted, completed {}",
            as_of,
            run.rows_written,
            run.rows_omitted,
            run.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => {
            println!("❌ No snapshot materialized for {}", as_of);
            return Ok(());
        }
    }

    println!(
        "{:8} {:>12} {:>18} {:>10} {:>10} {:>10} {:>12}",
        "code", "price", "market_cap", "per", "fwd_per", "pbr", "fy_end"
    );
    for f in &features {
        println!(
            "{:8} {:>12} {:>18} {:>10} {:>10} {:>10} {:>12}",
            f.code,
            fmt_opt(f.adjusted_price),
            fmt_opt(f.market_cap),
            fmt_opt(f.per),
            fmt_opt(f.forward_per),
            fmt_opt(f.pbr),
            f.fy_period_end
        );
    }
    Ok(())
}

fn print_feature(f: &ValuationFeature) {
    println!("{}", "-".repeat(60));
    println!("💰 Adjusted price: {}", fmt_opt(f.adjusted_price));
    println!("🏦 Market cap:     {}", fmt_opt(f.market_cap));
    println!("📊 PER:            {}", fmt_opt(f.per));
    println!(
        "📊 Forward PER:    {} ({})",
        fmt_opt(f.forward_per),
        f.forecast_source.map(|s| s.as_str()).unwrap_or("none")
    );
    println!("📊 PBR:            {}", fmt_opt(f.pbr));
}
