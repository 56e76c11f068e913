use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::errors::{Result, ValuationError};
use crate::models::{
    Disclosure, FeatureRun, FieldProvenance, ForecastSource, MetricField, PeriodType,
    PriceObservation, ValuationFeature,
};
use crate::store::{FeatureSink, StatementStore};

/// SQLX-based store holding disclosures, prices and the feature table
#[derive(Clone)]
pub struct DatabaseManagerSqlx {
    pool: SqlitePool,
}

impl DatabaseManagerSqlx {
    /// Open (or create) the SQLite file and make sure the schema exists
    pub async fn new(database_path: &str) -> Result<Self> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ValuationError::StoreUnavailable(e.to_string()))?;
            }
        }

        debug!("Connecting to database: {}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await?;

        // Enable WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let db = Self { pool };
        db.create_schema().await?;
        info!("Database ready at {}", path);
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables directly instead of using migrations
    pub async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS disclosures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                disclosed_date DATE NOT NULL,
                disclosed_time TEXT,
                period_type TEXT NOT NULL,
                current_period_end DATE NOT NULL,
                operating_profit REAL,
                profit REAL,
                equity REAL,
                eps REAL,
                bvps REAL,
                forecast_operating_profit REAL,
                forecast_profit REAL,
                forecast_eps REAL,
                next_year_forecast_operating_profit REAL,
                next_year_forecast_profit REAL,
                next_year_forecast_eps REAL,
                shares_outstanding REAL,
                treasury_shares REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(disclosed_date, code, period_type, current_period_end)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_observations (
                code TEXT NOT NULL,
                date DATE NOT NULL,
                adjusted_close REAL,
                adjustment_factor REAL,
                PRIMARY KEY (code, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS valuation_features (
                as_of_date DATE NOT NULL,
                code TEXT NOT NULL,
                adjusted_price REAL,
                latest_basis_shares REAL,
                cumulative_adjustment_factor REAL,
                market_cap REAL,
                per REAL,
                forward_per REAL,
                pbr REAL,
                fy_period_end DATE NOT NULL,
                fy_disclosed_date DATE NOT NULL,
                forecast_source TEXT,
                provenance TEXT NOT NULL,
                PRIMARY KEY (as_of_date, code)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feature_runs (
                as_of_date DATE PRIMARY KEY,
                rows_written INTEGER NOT NULL,
                rows_omitted INTEGER NOT NULL,
                completed_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_disclosures_code_date ON disclosures(code, disclosed_date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace disclosures keyed by (disclosed_date, code, period_type, current_period_end).
    /// An existing row with a later disclosed_time is kept.
    pub async fn upsert_disclosures(&self, disclosures: &[Disclosure]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for d in disclosures {
            sqlx::query(
                r#"
                INSERT INTO disclosures (
                    code, disclosed_date, disclosed_time, period_type, current_period_end,
                    operating_profit, profit, equity, eps, bvps,
                    forecast_operating_profit, forecast_profit, forecast_eps,
                    next_year_forecast_operating_profit, next_year_forecast_profit, next_year_forecast_eps,
                    shares_outstanding, treasury_shares
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(disclosed_date, code, period_type, current_period_end) DO UPDATE SET
                    disclosed_time = excluded.disclosed_time,
                    operating_profit = excluded.operating_profit,
                    profit = excluded.profit,
                    equity = excluded.equity,
                    eps = excluded.eps,
                    bvps = excluded.bvps,
                    forecast_operating_profit = excluded.forecast_operating_profit,
                    forecast_profit = excluded.forecast_profit,
                    forecast_eps = excluded.forecast_eps,
                    next_year_forecast_operating_profit = excluded.next_year_forecast_operating_profit,
                    next_year_forecast_profit = excluded.next_year_forecast_profit,
                    next_year_forecast_eps = excluded.next_year_forecast_eps,
                    shares_outstanding = excluded.shares_outstanding,
                    treasury_shares = excluded.treasury_shares
                WHERE excluded.disclosed_time IS NULL
                    OR disclosures.disclosed_time IS NULL
                    OR excluded.disclosed_time >= disclosures.disclosed_time
                "#,
            )
            .bind(&d.code)
            .bind(d.disclosed_date)
            .bind(d.disclosed_time)
            .bind(d.period_type.as_str())
            .bind(d.current_period_end)
            .bind(d.operating_profit)
            .bind(d.profit)
            .bind(d.equity)
            .bind(d.eps)
            .bind(d.bvps)
            .bind(d.forecast_operating_profit)
            .bind(d.forecast_profit)
            .bind(d.forecast_eps)
            .bind(d.next_year_forecast_operating_profit)
            .bind(d.next_year_forecast_profit)
            .bind(d.next_year_forecast_eps)
            .bind(d.shares_outstanding)
            .bind(d.treasury_shares)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(disclosures.len())
    }

    /// Insert or replace price observations keyed by (code, date)
    pub async fn upsert_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for p in prices {
            sqlx::query(
                r#"
                INSERT INTO price_observations (code, date, adjusted_close, adjustment_factor)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(code, date) DO UPDATE SET
                    adjusted_close = excluded.adjusted_close,
                    adjustment_factor = excluded.adjustment_factor
                "#,
            )
            .bind(&p.code)
            .bind(p.date)
            .bind(p.adjusted_close)
            .bind(p.adjustment_factor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(prices.len())
    }

    /// Distinct price dates in [from, to], ascending
    pub async fn price_dates_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT date FROM price_observations WHERE date >= ? AND date <= ? ORDER BY date",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }

    /// Stored feature rows for one as-of date, ordered by code
    pub async fn features_for_date(&self, as_of: NaiveDate) -> Result<Vec<ValuationFeature>> {
        let rows = sqlx::query(
            r#"
            SELECT as_of_date, code, adjusted_price, latest_basis_shares, cumulative_adjustment_factor,
                   market_cap, per, forward_per, pbr, fy_period_end, fy_disclosed_date,
                   forecast_source, provenance
            FROM valuation_features
            WHERE as_of_date = ?
            ORDER BY code
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(feature_from_row).collect()
    }

    pub async fn feature_run(&self, as_of: NaiveDate) -> Result<Option<FeatureRun>> {
        let row = sqlx::query(
            "SELECT as_of_date, rows_written, rows_omitted, completed_at FROM feature_runs WHERE as_of_date = ?",
        )
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FeatureRun {
            as_of_date: r.get("as_of_date"),
            rows_written: r.get("rows_written"),
            rows_omitted: r.get("rows_omitted"),
            completed_at: r.get("completed_at"),
        }))
    }
}

fn disclosure_from_row(r: &SqliteRow) -> Result<Disclosure> {
    let period: String = r.get("period_type");
    let period_type = PeriodType::parse(&period).ok_or_else(|| {
        ValuationError::StoreUnavailable(format!("unknown period_type '{}' in disclosures", period))
    })?;

    Ok(Disclosure {
        code: r.get("code"),
        disclosed_date: r.get("disclosed_date"),
        disclosed_time: r.get::<Option<NaiveTime>, _>("disclosed_time"),
        period_type,
        current_period_end: r.get("current_period_end"),
        operating_profit: r.get("operating_profit"),
        profit: r.get("profit"),
        equity: r.get("equity"),
        eps: r.get("eps"),
        bvps: r.get("bvps"),
        forecast_operating_profit: r.get("forecast_operating_profit"),
        forecast_profit: r.get("forecast_profit"),
        forecast_eps: r.get("forecast_eps"),
        next_year_forecast_operating_profit: r.get("next_year_forecast_operating_profit"),
        next_year_forecast_profit: r.get("next_year_forecast_profit"),
        next_year_forecast_eps: r.get("next_year_forecast_eps"),
        shares_outstanding: r.get("shares_outstanding"),
        treasury_shares: r.get("treasury_shares"),
    })
}

fn feature_from_row(r: &SqliteRow) -> Result<ValuationFeature> {
    let provenance_json: String = r.get("provenance");
    let provenance: BTreeMap<MetricField, FieldProvenance> = serde_json::from_str(&provenance_json)?;

    Ok(ValuationFeature {
        code: r.get("code"),
        as_of_date: r.get("as_of_date"),
        adjusted_price: r.get("adjusted_price"),
        latest_basis_shares: r.get("latest_basis_shares"),
        cumulative_adjustment_factor: r.get("cumulative_adjustment_factor"),
        market_cap: r.get("market_cap"),
        per: r.get("per"),
        forward_per: r.get("forward_per"),
        pbr: r.get("pbr"),
        fy_period_end: r.get("fy_period_end"),
        fy_disclosed_date: r.get("fy_disclosed_date"),
        forecast_source: r
            .get::<Option<String>, _>("forecast_source")
            .as_deref()
            .and_then(ForecastSource::parse),
        provenance,
    })
}

#[async_trait]
impl StatementStore for DatabaseManagerSqlx {
    async fn codes_as_of(&self, as_of: NaiveDate) -> Result<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT code FROM disclosures WHERE disclosed_date <= ? ORDER BY code",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn disclosures_as_of(&self, code: &str, as_of: NaiveDate) -> Result<Vec<Disclosure>> {
        let rows = sqlx::query(
            r#"
            SELECT code, disclosed_date, disclosed_time, period_type, current_period_end,
                   operating_profit, profit, equity, eps, bvps,
                   forecast_operating_profit, forecast_profit, forecast_eps,
                   next_year_forecast_operating_profit, next_year_forecast_profit, next_year_forecast_eps,
                   shares_outstanding, treasury_shares
            FROM disclosures
            WHERE code = ? AND disclosed_date <= ?
            ORDER BY disclosed_date, disclosed_time
            "#,
        )
        .bind(code)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(disclosure_from_row).collect()
    }

    async fn prices_as_of(&self, code: &str, as_of: NaiveDate) -> Result<Vec<PriceObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT code, date, adjusted_close, adjustment_factor
            FROM price_observations
            WHERE code = ? AND date <= ?
            ORDER BY date
            "#,
        )
        .bind(code)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PriceObservation {
                code: r.get("code"),
                date: r.get("date"),
                adjusted_close: r.get("adjusted_close"),
                adjustment_factor: r.get("adjustment_factor"),
            })
            .collect())
    }
}

#[async_trait]
impl FeatureSink for DatabaseManagerSqlx {
    async fn replace_features(
        &self,
        as_of: NaiveDate,
        rows: &[ValuationFeature],
        rows_omitted: usize,
    ) -> Result<()> {
        // Dropping the transaction on any `?` below rolls everything back
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM valuation_features WHERE as_of_date = ?")
            .bind(as_of)
            .execute(&mut *tx)
            .await?;

        for f in rows {
            let provenance = serde_json::to_string(&f.provenance)?;
            sqlx::query(
                r#"
                INSERT INTO valuation_features (
                    as_of_date, code, adjusted_price, latest_basis_shares, cumulative_adjustment_factor,
                    market_cap, per, forward_per, pbr, fy_period_end, fy_disclosed_date,
                    forecast_source, provenance
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(as_of)
            .bind(&f.code)
            .bind(f.adjusted_price)
            .bind(f.latest_basis_shares)
            .bind(f.cumulative_adjustment_factor)
            .bind(f.market_cap)
            .bind(f.per)
            .bind(f.forward_per)
            .bind(f.pbr)
            .bind(f.fy_period_end)
            .bind(f.fy_disclosed_date)
            .bind(f.forecast_source.map(|s| s.as_str()))
            .bind(provenance)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO feature_runs (as_of_date, rows_written, rows_omitted, completed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(as_of_date) DO UPDATE SET
                rows_written = excluded.rows_written,
                rows_omitted = excluded.rows_omitted,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(as_of)
        .bind(rows.len() as i64)
        .bind(rows_omitted as i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Committed {} feature rows for {}", rows.len(), as_of);
        Ok(())
    }
}
