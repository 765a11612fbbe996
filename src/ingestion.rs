//! Mapping loosely-typed sheet rows into the typed extract.
//!
//! The spreadsheet adapter hands over each sheet as generic rows of
//! column-name → JSON value. This seam is where required columns are
//! enforced: a required column that is absent or null aborts with
//! `MissingColumn` naming the table and column, while optional columns
//! simply come through as `None`. Column names follow the source extract.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::schema::{CategoryLinkage, CountryMapping, ExchangeRate, RawTransaction};

pub type SheetRow = BTreeMap<String, Value>;

const TRANSACTIONS: &str = "transactions";

fn missing(table: &str, column: &str) -> PipelineError {
    PipelineError::MissingColumn {
        table: table.to_string(),
        column: column.to_string(),
    }
}

fn opt_str(row: &SheetRow, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn opt_f64(row: &SheetRow, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}

fn req_str(row: &SheetRow, table: &str, column: &str) -> Result<String> {
    opt_str(row, column).ok_or_else(|| missing(table, column))
}

fn req_f64(row: &SheetRow, table: &str, column: &str) -> Result<f64> {
    opt_f64(row, column).ok_or_else(|| missing(table, column))
}

fn req_date(row: &SheetRow, table: &str, column: &str) -> Result<NaiveDate> {
    let text = req_str(row, table, column)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| PipelineError::ParseError {
        table: table.to_string(),
        column: column.to_string(),
        reason: format!("'{}': {}", text, e),
    })
}

pub fn transactions_from_rows(rows: &[SheetRow]) -> Result<Vec<RawTransaction>> {
    rows.iter()
        .map(|row| {
            Ok(RawTransaction {
                entity: req_str(row, TRANSACTIONS, "Name")?,
                document_no: opt_str(row, "DocumentNo"),
                posting_date: req_date(row, TRANSACTIONS, "Pstng Date")?,
                category: req_str(row, TRANSACTIONS, "Category")?,
                amount_doc_currency: req_f64(row, TRANSACTIONS, "Amount in doc. curr.")?,
                amount_usd: opt_f64(row, "Amount in USD"),
                currency_code: req_str(row, TRANSACTIONS, "Curr.")?,
                rate_usd: opt_f64(row, "Rate (USD)"),
                country: opt_str(row, "Country"),
            })
        })
        .collect()
}

pub fn category_linkage_from_rows(rows: &[SheetRow]) -> Result<Vec<CategoryLinkage>> {
    rows.iter()
        .map(|row| {
            Ok(CategoryLinkage {
                category: req_str(row, "category_linkage", "Category")?,
                activity: opt_str(row, "Activity"),
            })
        })
        .collect()
}

pub fn country_mapping_from_rows(rows: &[SheetRow]) -> Result<Vec<CountryMapping>> {
    rows.iter()
        .map(|row| {
            Ok(CountryMapping {
                code: req_str(row, "country_mapping", "Code")?,
                country: req_str(row, "country_mapping", "Country")?,
            })
        })
        .collect()
}

pub fn exchange_rates_from_rows(rows: &[SheetRow]) -> Result<Vec<ExchangeRate>> {
    rows.iter()
        .map(|row| {
            Ok(ExchangeRate {
                currency_code: req_str(row, "exchange_rates", "Code")?,
                rate_usd: req_f64(row, "exchange_rates", "Rate (USD)")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> SheetRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn full_row() -> SheetRow {
        row(&[
            ("Name", json!("DE01")),
            ("DocumentNo", json!("1000001")),
            ("Pstng Date", json!("2024-03-04")),
            ("Category", json!("Customer Receipts")),
            ("Amount in doc. curr.", json!(1500.0)),
            ("Amount in USD", json!(1620.0)),
            ("Curr.", json!("EUR")),
            ("Rate (USD)", json!(1.08)),
        ])
    }

    #[test]
    fn test_full_row_maps_cleanly() {
        let txs = transactions_from_rows(&[full_row()]).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].entity, "DE01");
        assert_eq!(txs[0].amount_usd, Some(1620.0));
        assert_eq!(txs[0].country, None);
        assert_eq!(
            txs[0].posting_date,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
    }

    #[test]
    fn test_missing_required_column_names_the_column() {
        let mut bad = full_row();
        bad.remove("Category");
        let err = transactions_from_rows(&[bad]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn { table, column }
                if table == "transactions" && column == "Category"
        ));
    }

    #[test]
    fn test_null_required_column_is_missing() {
        let mut bad = full_row();
        bad.insert("Name".to_string(), Value::Null);
        let err = transactions_from_rows(&[bad]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn test_optional_columns_default_to_none() {
        let mut minimal = full_row();
        minimal.remove("Amount in USD");
        minimal.remove("Rate (USD)");
        minimal.remove("DocumentNo");
        let txs = transactions_from_rows(&[minimal]).unwrap();
        assert_eq!(txs[0].amount_usd, None);
        assert_eq!(txs[0].rate_usd, None);
        assert_eq!(txs[0].document_no, None);
    }

    #[test]
    fn test_unparseable_date_is_a_parse_error() {
        let mut bad = full_row();
        bad.insert("Pstng Date".to_string(), json!("04.03.2024"));
        let err = transactions_from_rows(&[bad]).unwrap_err();
        assert!(matches!(err, PipelineError::ParseError { column, .. } if column == "Pstng Date"));
    }

    #[test]
    fn test_exchange_rate_rows() {
        let rates = exchange_rates_from_rows(&[row(&[
            ("Code", json!("EUR")),
            ("Rate (USD)", json!(1.08)),
        ])])
        .unwrap();
        assert_eq!(rates[0].currency_code, "EUR");
        assert_eq!(rates[0].rate_usd, 1.08);
    }
}
