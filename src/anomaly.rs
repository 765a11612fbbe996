//! Unsupervised outlier scoring of individual transactions.
//!
//! An isolation forest over the two-feature vector (USD amount, category
//! code) isolates points with unusually short average path lengths. The
//! forest is grown from an explicitly seeded RNG, so a given input, seed,
//! and configuration always produce byte-identical output. Category codes
//! are indices into the sorted set of distinct raw category strings.

use std::collections::BTreeMap;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};
use crate::schema::{AnomalyRecord, EnrichedTransaction};

const MAX_SAMPLE_SIZE: usize = 256;
const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

pub struct AnomalyDetector {
    contamination: f64,
    seed: u64,
    tree_count: usize,
    min_rows: usize,
}

enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// Average path length of an unsuccessful BST search in a tree of `n`
/// points; normalizes path lengths across subsample sizes.
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
}

fn build_tree(points: &[[f64; 2]], depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }

    let feature = rng.gen_range(0..2usize);
    let min = points
        .iter()
        .map(|p| p[feature])
        .fold(f64::INFINITY, f64::min);
    let max = points
        .iter()
        .map(|p| p[feature])
        .fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        return Node::Leaf { size: points.len() };
    }

    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<[f64; 2]>, Vec<[f64; 2]>) =
        points.iter().copied().partition(|p| p[feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(&left, depth + 1, limit, rng)),
        right: Box::new(build_tree(&right, depth + 1, limit, rng)),
    }
}

fn path_length(point: &[f64; 2], node: &Node, depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + c_factor(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if point[*feature] < *threshold {
                path_length(point, left, depth + 1.0)
            } else {
                path_length(point, right, depth + 1.0)
            }
        }
    }
}

/// Partial Fisher-Yates draw of `count` distinct indices from `0..n`.
fn sample_indices(n: usize, count: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..count {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(count);
    indices
}

impl AnomalyDetector {
    pub fn new(contamination: f64, seed: u64, tree_count: usize, min_rows: usize) -> Self {
        Self {
            contamination,
            seed,
            tree_count,
            min_rows,
        }
    }

    /// Scores every transaction and returns the anomalous subset projected
    /// to its identifying columns, in input order. Never mutates or
    /// annotates the transaction records themselves.
    pub fn detect(&self, transactions: &[EnrichedTransaction]) -> Result<Vec<AnomalyRecord>> {
        let n = transactions.len();
        if n < self.min_rows {
            return Err(PipelineError::InsufficientAnomalyData {
                rows: n,
                required: self.min_rows,
            });
        }

        let codes = category_codes(transactions);
        let features: Vec<[f64; 2]> = transactions
            .iter()
            .map(|tx| {
                [
                    tx.reconciled.amount_usd.unwrap_or(0.0),
                    codes[tx.reconciled.category.as_str()] as f64,
                ]
            })
            .collect();

        let scores = self.score(&features);

        let k = ((self.contamination * n as f64).ceil() as usize).min(n);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut flagged: Vec<usize> = order.into_iter().take(k).collect();
        flagged.sort_unstable();

        debug!(
            "Anomaly detection: flagged {} of {} transactions (contamination {})",
            flagged.len(),
            n,
            self.contamination
        );

        Ok(flagged
            .into_iter()
            .map(|i| {
                let tx = &transactions[i];
                AnomalyRecord {
                    week_start: tx.calendar.week_start,
                    entity: tx.reconciled.entity.clone(),
                    category: tx.reconciled.category.clone(),
                    amount_usd: tx.reconciled.amount_usd,
                    score: scores[i],
                }
            })
            .collect())
    }

    fn score(&self, features: &[[f64; 2]]) -> Vec<f64> {
        let n = features.len();
        let sample_size = n.min(MAX_SAMPLE_SIZE);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees: Vec<Node> = (0..self.tree_count)
            .map(|_| {
                let sample: Vec<[f64; 2]> = sample_indices(n, sample_size, &mut rng)
                    .into_iter()
                    .map(|i| features[i])
                    .collect();
                build_tree(&sample, 0, height_limit, &mut rng)
            })
            .collect();

        let norm = c_factor(sample_size);
        features
            .iter()
            .map(|point| {
                let avg_path: f64 = trees
                    .iter()
                    .map(|tree| path_length(point, tree, 0.0))
                    .sum::<f64>()
                    / trees.len() as f64;
                if norm > 0.0 {
                    2f64.powf(-avg_path / norm)
                } else {
                    0.5
                }
            })
            .collect()
    }
}

/// pandas-style categorical codes: distinct category strings sorted, then
/// indexed.
fn category_codes(transactions: &[EnrichedTransaction]) -> BTreeMap<&str, usize> {
    let mut codes: BTreeMap<&str, usize> = transactions
        .iter()
        .map(|tx| (tx.reconciled.category.as_str(), 0))
        .collect();
    for (i, (_, code)) in codes.iter_mut().enumerate() {
        *code = i;
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::flag_quality;
    use crate::schema::{
        Activity, CashFlowDirection, ClassifiedTransaction, ReconciledTransaction,
    };
    use chrono::NaiveDate;

    fn enriched(entity: &str, category: &str, amount: f64) -> EnrichedTransaction {
        let classified = ClassifiedTransaction {
            reconciled: ReconciledTransaction {
                entity: entity.to_string(),
                document_no: None,
                posting_date: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
                category: category.to_string(),
                category_clean: category.to_string(),
                linkage_activity: None,
                country: None,
                currency_code: "USD".to_string(),
                amount_doc_currency: amount,
                amount_usd: Some(amount),
                net_amount_usd: Some(amount),
                cash_flow_direction: CashFlowDirection::from_doc_amount(amount),
                implied_fx_rate: 1.0,
                reference_fx_rate: None,
                fx_rate_variance: None,
            },
            activity: Activity::Operating,
        };
        flag_quality(vec![classified]).pop().unwrap()
    }

    fn population_with_outlier() -> Vec<EnrichedTransaction> {
        let mut txs: Vec<EnrichedTransaction> = (0..49)
            .map(|i| enriched("E1", "Payroll", 100.0 + (i % 7) as f64))
            .collect();
        txs.push(enriched("E9", "Payroll", 1_000_000.0));
        txs
    }

    #[test]
    fn test_extreme_amount_is_flagged() {
        let txs = population_with_outlier();
        let detector = AnomalyDetector::new(0.02, 42, 100, 10);
        let anomalies = detector.detect(&txs).unwrap();

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].entity, "E9");
        assert_eq!(anomalies[0].amount_usd, Some(1_000_000.0));
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let txs = population_with_outlier();
        let detector = AnomalyDetector::new(0.05, 42, 100, 10);
        let first = detector.detect(&txs).unwrap();
        let second = detector.detect(&txs).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.entity, b.entity);
            assert_eq!(a.category, b.category);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_contamination_controls_flag_count() {
        let txs = population_with_outlier();
        let detector = AnomalyDetector::new(0.10, 42, 100, 10);
        let anomalies = detector.detect(&txs).unwrap();
        // ceil(0.10 * 50) = 5
        assert_eq!(anomalies.len(), 5);
    }

    #[test]
    fn test_too_few_rows_is_an_error() {
        let txs: Vec<EnrichedTransaction> =
            (0..3).map(|_| enriched("E1", "Payroll", 10.0)).collect();
        let detector = AnomalyDetector::new(0.01, 42, 100, 10);
        let err = detector.detect(&txs).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientAnomalyData { rows: 3, required: 10 }
        ));
    }

    #[test]
    fn test_category_codes_are_sorted_and_dense() {
        let txs = vec![
            enriched("E1", "Rent", 1.0),
            enriched("E1", "Capex", 1.0),
            enriched("E1", "Rent", 1.0),
            enriched("E1", "Payroll", 1.0),
        ];
        let codes = category_codes(&txs);
        assert_eq!(codes["Capex"], 0);
        assert_eq!(codes["Payroll"], 1);
        assert_eq!(codes["Rent"], 2);
    }

    #[test]
    fn test_missing_usd_amount_scores_as_zero_feature() {
        let mut txs = population_with_outlier();
        let mut no_usd = enriched("E2", "Payroll", 0.0);
        no_usd.reconciled.amount_usd = None;
        txs.push(no_usd);

        let detector = AnomalyDetector::new(0.02, 7, 100, 10);
        // Must not panic; the missing amount becomes feature value 0.0.
        let anomalies = detector.detect(&txs).unwrap();
        assert!(!anomalies.is_empty());
    }
}
