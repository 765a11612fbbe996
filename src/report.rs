//! Flat export rows for the three output artifacts.
//!
//! Field order and serde names follow the downstream consumers' expected
//! column layout, so serializing a row slice with a CSV writer reproduces
//! the published schemas verbatim.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::schema::{AnomalyRecord, EnrichedTransaction, ForecastPoint};

/// One row of the cleaned/enriched transaction table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "DocumentNo")]
    pub document_no: Option<String>,
    pub posting_date: NaiveDate,
    pub week: NaiveDate,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Quarter")]
    pub quarter: u32,
    #[serde(rename = "Month")]
    pub month: u32,
    #[serde(rename = "Fiscal_Week")]
    pub fiscal_week: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Activity")]
    pub activity: String,
    #[serde(rename = "Amount in doc. curr.")]
    pub amount_doc_currency: f64,
    #[serde(rename = "Amount in USD")]
    pub amount_usd: Option<f64>,
    #[serde(rename = "Net_Amount_USD")]
    pub net_amount_usd: Option<f64>,
    pub cash_flow_direction: String,
    pub is_weekend: bool,
    pub is_potential_duplicate: bool,
    #[serde(rename = "Curr.")]
    pub currency_code: String,
    pub implied_fx_rate: f64,
    #[serde(rename = "Sheet_Rate_USD")]
    pub reference_fx_rate: Option<f64>,
    pub fx_rate_variance: Option<f64>,
}

/// One row of the forecast table (history and forecast points alike).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRow {
    pub week: NaiveDate,
    #[serde(rename = "Inflow")]
    pub inflow: f64,
    #[serde(rename = "Outflow")]
    pub outflow: f64,
    #[serde(rename = "Net_Cash_Flow")]
    pub net_cash_flow: f64,
    #[serde(rename = "Ending_Balance")]
    pub ending_balance: f64,
    #[serde(rename = "Type")]
    pub series_type: String,
}

/// One row of the anomaly risk report; only flagged transactions appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub week: NaiveDate,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Amount in USD")]
    pub amount_usd: Option<f64>,
}

pub fn transaction_rows(transactions: &[EnrichedTransaction]) -> Vec<TransactionRow> {
    transactions
        .iter()
        .map(|tx| TransactionRow {
            name: tx.reconciled.entity.clone(),
            country: tx.reconciled.country.clone(),
            document_no: tx.reconciled.document_no.clone(),
            posting_date: tx.reconciled.posting_date,
            week: tx.calendar.week_start,
            year: tx.calendar.year,
            quarter: tx.calendar.quarter,
            month: tx.calendar.month,
            fiscal_week: tx.calendar.fiscal_week.clone(),
            category: tx.reconciled.category.clone(),
            activity: tx.activity.to_string(),
            amount_doc_currency: tx.reconciled.amount_doc_currency,
            amount_usd: tx.reconciled.amount_usd,
            net_amount_usd: tx.reconciled.net_amount_usd,
            cash_flow_direction: tx.reconciled.cash_flow_direction.to_string(),
            is_weekend: tx.is_weekend,
            is_potential_duplicate: tx.is_potential_duplicate,
            currency_code: tx.reconciled.currency_code.clone(),
            implied_fx_rate: tx.reconciled.implied_fx_rate,
            reference_fx_rate: tx.reconciled.reference_fx_rate,
            fx_rate_variance: tx.reconciled.fx_rate_variance,
        })
        .collect()
}

pub fn forecast_rows(points: &[ForecastPoint]) -> Vec<ForecastRow> {
    points
        .iter()
        .map(|p| ForecastRow {
            week: p.week_start,
            inflow: p.inflow,
            outflow: p.outflow,
            net_cash_flow: p.net_cash_flow,
            ending_balance: p.ending_balance,
            series_type: p.series_type.to_string(),
        })
        .collect()
}

pub fn anomaly_rows(records: &[AnomalyRecord]) -> Vec<AnomalyRow> {
    records
        .iter()
        .map(|r| AnomalyRow {
            week: r.week_start,
            name: r.entity.clone(),
            category: r.category.clone(),
            amount_usd: r.amount_usd,
        })
        .collect()
}
