//! # Cashflow Pipeline
//!
//! A library for turning raw multi-sheet financial transaction extracts into
//! classified, quality-flagged cash-flow records, a 26-week inflow/outflow
//! forecast, and a transaction-level anomaly report.
//!
//! ## Core Concepts
//!
//! - **Reconciliation**: backfilling missing USD amounts, left-joining
//!   reference tables, and deriving signed net amounts and implied FX rates
//! - **Activity**: every transaction ends in exactly one of
//!   Operating/Investing/Financing, resolved by an ordered keyword rule table
//! - **Dense weekly series**: transactions bucketed by ISO week with gap
//!   weeks zero-filled, so the trend model sees evenly spaced observations
//! - **Degraded output**: optional enrichments that cannot run (missing
//!   reference table, failed model fit, too little data) are skipped or
//!   substituted and recorded on the run report; only the transaction table
//!   itself is mandatory
//!
//! ## Example
//!
//! ```rust,ignore
//! use cashflow_pipeline::*;
//!
//! let extract = WorkbookExtract {
//!     transactions: Some(rows),
//!     category_linkage: Some(linkage),
//!     country_mapping: None,
//!     exchange_rates: Some(rates),
//! };
//!
//! let run = run_pipeline(&extract, &PipelineConfig::default())?;
//! println!("{} transactions, {} forecast points, {} anomalies",
//!     run.transactions.len(), run.forecast.len(), run.anomalies.len());
//! ```

pub mod aggregator;
pub mod anomaly;
pub mod classifier;
pub mod error;
pub mod forecast;
pub mod ingestion;
pub mod quality;
pub mod reconciler;
pub mod report;
pub mod schema;
pub mod utils;

pub use aggregator::aggregate_weekly;
pub use anomaly::AnomalyDetector;
pub use classifier::{ActivityClassifier, Rule, RulePredicate, RuleSet};
pub use error::{PipelineError, Result};
pub use forecast::{ForecastEngine, HoltModel, SeriesKind};
pub use ingestion::SheetRow;
pub use quality::flag_quality;
pub use reconciler::{Reconciler, ReferenceTables};
pub use report::{anomaly_rows, forecast_rows, transaction_rows};
pub use schema::*;

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// One optional enrichment that was skipped or substituted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degradation {
    MissingOptionalTable { table: String },
    ForecastFallback { series: String },
    AnomalySkipped { rows: usize, required: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::MissingOptionalTable { table } => {
                write!(f, "optional table '{}' missing; enrichment skipped", table)
            }
            Degradation::ForecastFallback { series } => {
                write!(f, "{} forecast substituted by flat historical mean", series)
            }
            Degradation::AnomalySkipped { rows, required } => write!(
                f,
                "anomaly detection skipped ({} rows, {} required)",
                rows, required
            ),
        }
    }
}

/// Per-run record of which optional enrichments degraded. An empty report
/// means every stage ran with its full inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    degradations: Vec<Degradation>,
}

impl RunReport {
    fn record(&mut self, degradation: Degradation) {
        warn!("Degraded: {}", degradation);
        self.degradations.push(degradation);
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }
}

/// Everything one pipeline run produces. The three output artifacts
/// (`transactions`, `forecast`, `anomalies`) are wholly derived per run;
/// `weekly` is the intermediate dense series the forecast was built from.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub transactions: Vec<EnrichedTransaction>,
    pub weekly: WeeklySeries,
    pub forecast: Vec<ForecastPoint>,
    pub anomalies: Vec<AnomalyRecord>,
    pub report: RunReport,
}

pub struct CashFlowPipeline {
    config: PipelineConfig,
}

impl CashFlowPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the full batch pipeline: reconcile, classify, flag, aggregate,
    /// forecast, detect. Strictly sequential, one pass per stage over the
    /// in-memory dataset. Only the transaction table is mandatory; every
    /// other failure degrades its own stage and the run continues.
    pub fn run(&self, extract: &WorkbookExtract) -> Result<PipelineRun> {
        let rows = extract
            .transactions
            .clone()
            .ok_or_else(|| PipelineError::MissingRequiredTable {
                table: "transactions".to_string(),
            })?;

        info!("Pipeline start: {} raw transactions", rows.len());
        let mut report = RunReport::default();

        for (table, present) in [
            ("category_linkage", extract.category_linkage.is_some()),
            ("country_mapping", extract.country_mapping.is_some()),
            ("exchange_rates", extract.exchange_rates.is_some()),
        ] {
            if !present {
                report.record(Degradation::MissingOptionalTable {
                    table: table.to_string(),
                });
            }
        }

        let reconciler = Reconciler::new(ReferenceTables {
            category_linkage: extract.category_linkage.as_deref(),
            country_mapping: extract.country_mapping.as_deref(),
            exchange_rates: extract.exchange_rates.as_deref(),
        });
        let reconciled = reconciler.reconcile(rows);

        let classifier = ActivityClassifier::new(&self.config.rules);
        let classified = classifier.classify(reconciled);

        let transactions = flag_quality(classified);

        let weekly = aggregate_weekly(&transactions);
        debug!("Dense weekly series spans {} weeks", weekly.len());

        let engine = ForecastEngine::new(
            self.config.forecast_horizon,
            self.config.min_fit_observations,
        );
        let outcome = engine.project(&weekly)?;
        for series in &outcome.fallbacks {
            report.record(Degradation::ForecastFallback {
                series: series.to_string(),
            });
        }

        let detector = AnomalyDetector::new(
            self.config.contamination,
            self.config.seed,
            self.config.tree_count,
            self.config.min_anomaly_rows,
        );
        let anomalies = match detector.detect(&transactions) {
            Ok(records) => records,
            Err(PipelineError::InsufficientAnomalyData { rows, required }) => {
                report.record(Degradation::AnomalySkipped { rows, required });
                Vec::new()
            }
            Err(other) => return Err(other),
        };

        info!(
            "Pipeline done: {} transactions, {} forecast points, {} anomalies{}",
            transactions.len(),
            outcome.points.len(),
            anomalies.len(),
            if report.is_degraded() {
                " (degraded)"
            } else {
                ""
            }
        );

        Ok(PipelineRun {
            transactions,
            weekly,
            forecast: outcome.points,
            anomalies,
            report,
        })
    }
}

/// Convenience wrapper around [`CashFlowPipeline`].
pub fn run_pipeline(extract: &WorkbookExtract, config: &PipelineConfig) -> Result<PipelineRun> {
    CashFlowPipeline::new(config.clone())?.run(extract)
}
