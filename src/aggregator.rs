//! Weekly bucketing and gap filling.
//!
//! Buckets transactions by (week start, direction), summing USD amounts, and
//! resamples to every calendar week between the first and last observed week
//! with zero-filled gaps. The forecast model assumes an evenly spaced series;
//! a sparse one silently biases the trend estimate.

use log::debug;

use crate::schema::{CashFlowDirection, EnrichedTransaction, WeeklySeries, WeeklyTotals};
use crate::utils::weeks_between;

/// Records without a USD amount contribute nothing to the sums, matching
/// null-skipping aggregation semantics.
pub fn aggregate_weekly(transactions: &[EnrichedTransaction]) -> WeeklySeries {
    let mut series = WeeklySeries::new();

    for tx in transactions {
        let Some(amount) = tx.reconciled.amount_usd else {
            continue;
        };
        let totals = series.entry(tx.calendar.week_start).or_default();
        match tx.reconciled.cash_flow_direction {
            CashFlowDirection::Inflow => totals.inflow += amount,
            CashFlowDirection::Outflow => totals.outflow += amount,
        }
    }

    let Some((&first, _)) = series.first_key_value() else {
        debug!("Weekly aggregation produced an empty series");
        return series;
    };
    let (&last, _) = series.last_key_value().expect("non-empty series");

    let observed = series.len();
    for week in weeks_between(first, last) {
        series.entry(week).or_insert(WeeklyTotals::default());
    }

    debug!(
        "Aggregated {} observed weeks into a dense series of {} ({} gap weeks filled)",
        observed,
        series.len(),
        series.len() - observed
    );
    series
}
