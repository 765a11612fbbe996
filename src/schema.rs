use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::RuleSet;
use crate::error::{PipelineError, Result};

/// Cash-flow activity classification. Every transaction carries exactly one
/// of these after the classifier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Activity {
    Operating,
    Investing,
    Financing,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Operating => write!(f, "Operating"),
            Activity::Investing => write!(f, "Investing"),
            Activity::Financing => write!(f, "Financing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CashFlowDirection {
    Inflow,
    Outflow,
}

impl CashFlowDirection {
    /// Inflow iff the documentary currency amount is strictly positive.
    pub fn from_doc_amount(amount_doc_currency: f64) -> Self {
        if amount_doc_currency > 0.0 {
            CashFlowDirection::Inflow
        } else {
            CashFlowDirection::Outflow
        }
    }
}

impl fmt::Display for CashFlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CashFlowDirection::Inflow => write!(f, "Inflow"),
            CashFlowDirection::Outflow => write!(f, "Outflow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum SeriesType {
    History,
    Forecast,
}

impl fmt::Display for SeriesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesType::History => write!(f, "History"),
            SeriesType::Forecast => write!(f, "Forecast"),
        }
    }
}

/// One row of the mandatory transaction table, as handed over by the
/// extraction adapter. Parsing spreadsheets/PDFs into these records is the
/// adapter's job, not this crate's.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawTransaction {
    #[schemars(description = "Entity/company code identifying the posting unit")]
    pub entity: String,

    pub document_no: Option<String>,

    pub posting_date: NaiveDate,

    #[schemars(description = "Raw category string, untrimmed, as extracted")]
    pub category: String,

    #[schemars(description = "Signed amount in the document currency")]
    pub amount_doc_currency: f64,

    #[schemars(description = "Signed amount in USD; may be absent in the extract")]
    pub amount_usd: Option<f64>,

    pub currency_code: String,

    #[schemars(description = "Per-row USD conversion rate used for backfill, when provided")]
    pub rate_usd: Option<f64>,

    pub country: Option<String>,
}

/// Category → reference activity linkage row (optional input, hint only;
/// the classifier's rule table is authoritative).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CategoryLinkage {
    pub category: String,
    pub activity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CountryMapping {
    pub code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExchangeRate {
    pub currency_code: String,
    pub rate_usd: f64,
}

/// The multi-sheet extract the pipeline consumes. The transaction table is
/// mandatory; each reference table independently degrades its enrichment
/// when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WorkbookExtract {
    pub transactions: Option<Vec<RawTransaction>>,
    pub category_linkage: Option<Vec<CategoryLinkage>>,
    pub country_mapping: Option<Vec<CountryMapping>>,
    pub exchange_rates: Option<Vec<ExchangeRate>>,
}

/// Output of the reconciler: one record per input row, no row ever dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledTransaction {
    pub entity: String,
    pub document_no: Option<String>,
    pub posting_date: NaiveDate,
    /// Untrimmed raw category; keyword rules match against this.
    pub category: String,
    /// Whitespace-trimmed, case-preserved join key.
    pub category_clean: String,
    /// Activity label from the linkage table, when the join matched.
    pub linkage_activity: Option<String>,
    pub country: Option<String>,
    pub currency_code: String,
    pub amount_doc_currency: f64,
    /// USD amount after backfill; still absent when neither the extract nor
    /// a per-row rate supplied one.
    pub amount_usd: Option<f64>,
    /// Sign forced to match the documentary amount.
    pub net_amount_usd: Option<f64>,
    pub cash_flow_direction: CashFlowDirection,
    /// abs(amount_usd / amount_doc_currency); 0.0 sentinel when the divisor
    /// is zero or the USD amount is absent.
    pub implied_fx_rate: f64,
    pub reference_fx_rate: Option<f64>,
    pub fx_rate_variance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedTransaction {
    pub reconciled: ReconciledTransaction,
    pub activity: Activity,
}

/// Calendar features stamped during quality flagging, used by the weekly
/// aggregation and the export schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarStamp {
    pub week_start: NaiveDate,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub fiscal_week: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTransaction {
    pub reconciled: ReconciledTransaction,
    pub activity: Activity,
    pub is_weekend: bool,
    pub is_potential_duplicate: bool,
    pub calendar: CalendarStamp,
}

/// Summed USD amounts for one week, split by direction. Inflow sums are
/// non-negative, outflow sums non-positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyTotals {
    pub inflow: f64,
    pub outflow: f64,
}

impl WeeklyTotals {
    pub fn net(&self) -> f64 {
        self.inflow + self.outflow
    }
}

/// Dense weekly series keyed by week start (Monday); contiguous between the
/// first and last observed week.
pub type WeeklySeries = BTreeMap<NaiveDate, WeeklyTotals>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub week_start: NaiveDate,
    pub inflow: f64,
    pub outflow: f64,
    pub net_cash_flow: f64,
    pub ending_balance: f64,
    pub series_type: SeriesType,
}

/// One transaction the outlier model flagged. Derived, read-only; never
/// written back onto the transaction records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub week_start: NaiveDate,
    pub entity: String,
    pub category: String,
    pub amount_usd: Option<f64>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[schemars(description = "Number of future weekly points to forecast")]
    pub forecast_horizon: usize,

    #[schemars(description = "Expected fraction of transactions treated as anomalous (0, 1]")]
    pub contamination: f64,

    #[schemars(description = "Seed for the anomaly model; fixes run-to-run output")]
    pub seed: u64,

    #[schemars(description = "Minimum observations before the trend model is fit")]
    pub min_fit_observations: usize,

    #[schemars(description = "Minimum feature rows before anomaly detection runs")]
    pub min_anomaly_rows: usize,

    #[schemars(description = "Number of isolation trees in the outlier model")]
    pub tree_count: usize,

    #[schemars(description = "Ordered activity classification rules; later rules override earlier ones")]
    pub rules: RuleSet,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forecast_horizon: 26,
            contamination: 0.01,
            seed: 42,
            min_fit_observations: 10,
            min_anomaly_rows: 10,
            tree_count: 100,
            rules: RuleSet::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 {
            return Err(PipelineError::InvalidConfig(
                "forecast_horizon must be at least 1".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "contamination must be in (0, 1], got {}",
                self.contamination
            )));
        }
        if self.tree_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "tree_count must be at least 1".to_string(),
            ));
        }
        if self.rules.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "rule set must contain at least one rule".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = PipelineConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("forecast_horizon"));
        assert!(schema_json.contains("contamination"));
        assert!(schema_json.contains("rules"));
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::default().validate().is_ok());

        let bad = PipelineConfig {
            contamination: 0.0,
            ..PipelineConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = PipelineConfig {
            forecast_horizon: 0,
            ..PipelineConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_direction_from_doc_amount() {
        assert_eq!(
            CashFlowDirection::from_doc_amount(12.5),
            CashFlowDirection::Inflow
        );
        assert_eq!(
            CashFlowDirection::from_doc_amount(-3.0),
            CashFlowDirection::Outflow
        );
        // Zero is not an inflow
        assert_eq!(
            CashFlowDirection::from_doc_amount(0.0),
            CashFlowDirection::Outflow
        );
    }

    #[test]
    fn test_extract_serialization_round_trip() {
        let extract = WorkbookExtract {
            transactions: Some(vec![RawTransaction {
                entity: "DE01".to_string(),
                document_no: Some("1000001".to_string()),
                posting_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                category: " Non Netting AP ".to_string(),
                amount_doc_currency: -1500.0,
                amount_usd: None,
                currency_code: "EUR".to_string(),
                rate_usd: Some(1.08),
                country: None,
            }]),
            category_linkage: None,
            country_mapping: None,
            exchange_rates: Some(vec![ExchangeRate {
                currency_code: "EUR".to_string(),
                rate_usd: 1.08,
            }]),
        };

        let json = serde_json::to_string_pretty(&extract).unwrap();
        let back: WorkbookExtract = serde_json::from_str(&json).unwrap();
        let rows = back.transactions.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity, "DE01");
        assert_eq!(rows[0].amount_usd, None);
    }
}
