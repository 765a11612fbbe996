//! Trend-based weekly cash-flow projection.
//!
//! Each direction series is fit independently with Holt's additive-trend
//! exponential smoothing. Smoothing weights come from a deterministic grid
//! search minimizing one-step-ahead squared error, so identical input always
//! yields identical forecasts. When a fit fails (too few points, degenerate
//! input) the engine falls back to a flat forecast at the historical mean and
//! marks the series degraded — the fallback is explicit, never silent.

use std::fmt;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::schema::{ForecastPoint, SeriesType, WeeklySeries};
use crate::utils::next_week;

const GRID_STEPS: usize = 19; // 0.05 .. 0.95 in 0.05 steps
const DEGENERATE_SPREAD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Inflow,
    Outflow,
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Inflow => write!(f, "Inflow"),
            SeriesKind::Outflow => write!(f, "Outflow"),
        }
    }
}

/// Holt's linear-trend exponential smoothing, fit by grid search.
#[derive(Debug, Clone, Copy)]
pub struct HoltModel {
    level: f64,
    trend: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl HoltModel {
    pub fn fit(kind: SeriesKind, values: &[f64], min_observations: usize) -> Result<Self> {
        // The recursion needs two points to seed the trend, whatever the
        // configured minimum.
        let required = min_observations.max(2);
        if values.len() < required {
            return Err(PipelineError::ModelFitFailure {
                series: kind.to_string(),
                reason: format!(
                    "{} observations, need at least {}",
                    values.len(),
                    required
                ),
            });
        }

        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if (max - min).abs() < DEGENERATE_SPREAD {
            return Err(PipelineError::ModelFitFailure {
                series: kind.to_string(),
                reason: "degenerate (constant) input series".to_string(),
            });
        }

        let mut best: Option<(f64, f64, f64)> = None; // (sse, alpha, beta)
        for a in 1..=GRID_STEPS {
            for b in 1..=GRID_STEPS {
                let alpha = a as f64 * 0.05;
                let beta = b as f64 * 0.05;
                let (sse, _, _) = Self::run(values, alpha, beta);
                // Strict less-than: the first minimum wins, keeping the
                // search order-deterministic.
                if best.map_or(true, |(best_sse, _, _)| sse < best_sse) {
                    best = Some((sse, alpha, beta));
                }
            }
        }

        let (sse, alpha, beta) = best.expect("grid search always visits at least one cell");
        let (_, level, trend) = Self::run(values, alpha, beta);
        debug!(
            "Fit {} series: alpha={:.2} beta={:.2} sse={:.4}",
            kind, alpha, beta, sse
        );
        Ok(Self {
            level,
            trend,
            alpha,
            beta,
        })
    }

    /// One pass of the smoothing recursion; returns the one-step-ahead SSE
    /// and the final level/trend state.
    fn run(values: &[f64], alpha: f64, beta: f64) -> (f64, f64, f64) {
        let mut level = values[0];
        let mut trend = values[1] - values[0];
        let mut sse = 0.0;

        for &observed in &values[1..] {
            let predicted = level + trend;
            let error = observed - predicted;
            sse += error * error;

            let prev_level = level;
            level = alpha * observed + (1.0 - alpha) * (level + trend);
            trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        }

        (sse, level, trend)
    }

    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|h| self.level + h as f64 * self.trend)
            .collect()
    }
}

/// Un-assembled point; net cash flow and ending balance are derived during
/// assembly, after the chronological ordering has been established.
#[derive(Debug, Clone, Copy)]
pub struct RawPoint {
    pub week_start: NaiveDate,
    pub inflow: f64,
    pub outflow: f64,
    pub series_type: SeriesType,
}

#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub points: Vec<ForecastPoint>,
    /// Series that fell back to the flat historical-mean forecast.
    pub fallbacks: Vec<SeriesKind>,
}

pub struct ForecastEngine {
    horizon: usize,
    min_fit_observations: usize,
}

impl ForecastEngine {
    pub fn new(horizon: usize, min_fit_observations: usize) -> Self {
        Self {
            horizon,
            min_fit_observations,
        }
    }

    pub fn project(&self, weekly: &WeeklySeries) -> Result<ForecastOutcome> {
        if weekly.is_empty() {
            warn!("Weekly series is empty; skipping forecast for both series");
            return Ok(ForecastOutcome {
                points: Vec::new(),
                fallbacks: vec![SeriesKind::Inflow, SeriesKind::Outflow],
            });
        }

        let weeks: Vec<NaiveDate> = weekly.keys().copied().collect();
        let inflow_hist: Vec<f64> = weekly.values().map(|t| t.inflow).collect();
        let outflow_hist: Vec<f64> = weekly.values().map(|t| t.outflow).collect();

        let mut fallbacks = Vec::new();
        let inflow_future = self.forecast_series(SeriesKind::Inflow, &inflow_hist, &mut fallbacks);
        let outflow_future =
            self.forecast_series(SeriesKind::Outflow, &outflow_hist, &mut fallbacks);

        let mut raw: Vec<RawPoint> = weeks
            .iter()
            .zip(inflow_hist.iter().zip(outflow_hist.iter()))
            .map(|(&week_start, (&inflow, &outflow))| RawPoint {
                week_start,
                inflow,
                outflow,
                series_type: SeriesType::History,
            })
            .collect();

        let last_week = *weeks.last().expect("non-empty series");
        let mut week = last_week;
        for h in 0..self.horizon {
            week = next_week(week);
            raw.push(RawPoint {
                week_start: week,
                inflow: inflow_future[h],
                outflow: outflow_future[h],
                series_type: SeriesType::Forecast,
            });
        }

        let points = assemble(raw)?;
        debug!(
            "Forecast assembled: {} history + {} forecast points",
            weeks.len(),
            self.horizon
        );
        Ok(ForecastOutcome { points, fallbacks })
    }

    fn forecast_series(
        &self,
        kind: SeriesKind,
        history: &[f64],
        fallbacks: &mut Vec<SeriesKind>,
    ) -> Vec<f64> {
        match HoltModel::fit(kind, history, self.min_fit_observations) {
            Ok(model) => model.forecast(self.horizon),
            Err(err) => {
                warn!("{}; falling back to flat historical mean", err);
                fallbacks.push(kind);
                let mean = history.iter().sum::<f64>() / history.len() as f64;
                vec![mean; self.horizon]
            }
        }
    }
}

/// Sorts points by week, rejects duplicate weeks, then derives net cash flow
/// and the running ending balance. Summing out of chronological order would
/// corrupt the balance series, so ordering is enforced here rather than
/// assumed.
pub fn assemble(mut raw: Vec<RawPoint>) -> Result<Vec<ForecastPoint>> {
    raw.sort_by_key(|p| p.week_start);
    for pair in raw.windows(2) {
        if pair[0].week_start == pair[1].week_start {
            return Err(PipelineError::NonChronologicalSeries {
                week: pair[1].week_start,
            });
        }
    }

    let mut balance = 0.0;
    let points = raw
        .into_iter()
        .map(|p| {
            let net_cash_flow = p.inflow + p.outflow;
            balance += net_cash_flow;
            ForecastPoint {
                week_start: p.week_start,
                inflow: p.inflow,
                outflow: p.outflow,
                net_cash_flow,
                ending_balance: balance,
                series_type: p.series_type,
            }
        })
        .collect();
    Ok(points)
}
