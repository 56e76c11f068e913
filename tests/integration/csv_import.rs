//! CSV exports loaded through the importer and valued from the store

use chrono::NaiveTime;
use pretty_assertions::assert_eq;
use std::io::Write;

use rust_stocks_valuation::feature_materializer::materialize_as_of;
use rust_stocks_valuation::models::{Config, PeriodType};
use rust_stocks_valuation::store::StatementStore;
use rust_stocks_valuation::tools::csv_importer::{import_disclosures, import_prices};

use crate::common::create_test_database;
use crate::common::test_data::date;

const STATEMENTS: &str = "\
DisclosedDate,DisclosedTime,LocalCode,TypeOfCurrentPeriod,CurrentPeriodEndDate,OperatingProfit,Profit,Equity,EarningsPerShare,BookValuePerShare,ForecastOperatingProfit,ForecastProfit,ForecastEarningsPerShare,NumberOfIssuedAndOutstandingSharesAtTheEndOfFiscalYearIncludingTreasuryStock,NumberOfTreasuryStockAtTheEndOfFiscalYear
2020-02-07,15:00:00,13010,3Q,2019-12-31,900,600,,,,1200,800,,,
2020-05-08,15:00:00,13010,FY,2020-03-31,1100,750,9000,7.5,90,1300,850,8.5,110,10
2020-05-08,15:00:00,13010,EarnForecastRevision,2020-03-31,,,,,,1300,850,,,
";

const QUOTES: &str = "\
Date,Code,AdjustmentClose,AdjustmentFactor
2020-05-29,13010,60,1.0
2020-06-01,13010,61,1.0
";

const SAME_DAY_FILINGS: &str = "\
DisclosedDate,DisclosedTime,LocalCode,TypeOfCurrentPeriod,CurrentPeriodEndDate,Profit,Equity
2020-05-08,15:00:00,13010,FY,2020-03-31,750,9000
2020-05-08,09:00:00,13010,FY,2020-03-31,700,100
";

fn write_temp_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn test_import_then_materialize() {
    let tdb = create_test_database().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let statements = write_temp_csv(&dir, "statements.csv", STATEMENTS);
    let quotes = write_temp_csv(&dir, "quotes.csv", QUOTES);

    let stats = import_disclosures(&tdb.db, &statements).await.unwrap();
    assert_eq!(stats.rows_imported, 2);
    assert_eq!(stats.rows_skipped, 1);
    import_prices(&tdb.db, &quotes).await.unwrap();

    let stored = tdb.db.disclosures_as_of("13010", date(2020, 6, 1)).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].period_type, PeriodType::Q3);

    materialize_as_of(&tdb.db, &tdb.db, date(2020, 6, 1), &Config::default())
        .await
        .unwrap();
    let rows = tdb.db.features_for_date(date(2020, 6, 1)).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].latest_basis_shares, Some(100.0));
    assert_eq!(rows[0].market_cap, Some(6_100.0));
}

#[tokio::test]
async fn test_reimport_upserts_instead_of_duplicating() {
    let tdb = create_test_database().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let statements = write_temp_csv(&dir, "statements.csv", STATEMENTS);

    import_disclosures(&tdb.db, &statements).await.unwrap();
    import_disclosures(&tdb.db, &statements).await.unwrap();

    let stored = tdb.db.disclosures_as_of("13010", date(2020, 6, 1)).await.unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let tdb = create_test_database().await.unwrap();
    assert!(import_prices(&tdb.db, "/nonexistent/quotes.csv").await.is_err());
}

#[tokio::test]
async fn test_later_filing_time_wins_regardless_of_file_order() {
    let tdb = create_test_database().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let statements = write_temp_csv(&dir, "statements.csv", SAME_DAY_FILINGS);

    import_disclosures(&tdb.db, &statements).await.unwrap();

    let stored = tdb.db.disclosures_as_of("13010", date(2020, 6, 1)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].disclosed_time, NaiveTime::from_hms_opt(15, 0, 0));
    assert_eq!(stored[0].equity, Some(9_000.0));
}
