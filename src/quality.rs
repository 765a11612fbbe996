//! Data-quality flagging and calendar stamping.
//!
//! Flags weekend postings and potential duplicates, and stamps each record
//! with its week start and calendar features. Duplicates are flagged, never
//! removed; every member of a duplicate group carries the flag, including
//! the first chronological occurrence, so downstream review sees the whole
//! group.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use log::debug;

use crate::schema::{CalendarStamp, ClassifiedTransaction, EnrichedTransaction};
use crate::utils::{fiscal_week_label, is_weekend, quarter_of, week_start};

/// Exact-equality duplicate key: USD amount (by bit pattern), posting date,
/// raw category.
type DuplicateKey = (Option<u64>, NaiveDate, String);

fn duplicate_key(tx: &ClassifiedTransaction) -> DuplicateKey {
    (
        tx.reconciled.amount_usd.map(f64::to_bits),
        tx.reconciled.posting_date,
        tx.reconciled.category.clone(),
    )
}

pub fn flag_quality(transactions: Vec<ClassifiedTransaction>) -> Vec<EnrichedTransaction> {
    let mut group_sizes: HashMap<DuplicateKey, usize> = HashMap::new();
    for tx in &transactions {
        *group_sizes.entry(duplicate_key(tx)).or_insert(0) += 1;
    }

    let mut weekend = 0usize;
    let mut duplicates = 0usize;

    let enriched: Vec<EnrichedTransaction> = transactions
        .into_iter()
        .map(|tx| {
            let posting_date = tx.reconciled.posting_date;
            let is_weekend_posting = is_weekend(posting_date);
            let is_potential_duplicate = group_sizes[&duplicate_key(&tx)] > 1;

            if is_weekend_posting {
                weekend += 1;
            }
            if is_potential_duplicate {
                duplicates += 1;
            }

            let calendar = CalendarStamp {
                week_start: week_start(posting_date),
                year: posting_date.year(),
                quarter: quarter_of(posting_date),
                month: posting_date.month(),
                fiscal_week: fiscal_week_label(posting_date),
            };

            EnrichedTransaction {
                reconciled: tx.reconciled,
                activity: tx.activity,
                is_weekend: is_weekend_posting,
                is_potential_duplicate,
                calendar,
            }
        })
        .collect();

    debug!(
        "Quality flags: {} weekend postings, {} potential duplicates across {} transactions",
        weekend,
        duplicates,
        enriched.len()
    );
    enriched
}
