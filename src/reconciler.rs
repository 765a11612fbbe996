//! Currency/reference reconciliation.
//!
//! Backfills missing USD amounts from per-row rates, left-joins the optional
//! reference tables (category linkage, country mapping, exchange rates), and
//! derives the signed net amount, direction, and implied FX rate for every
//! row. Joins never drop a row; an unmatched lookup leaves the derived field
//! absent.

use std::collections::BTreeMap;

use log::debug;

use crate::schema::{
    CashFlowDirection, CategoryLinkage, CountryMapping, ExchangeRate, RawTransaction,
    ReconciledTransaction,
};

/// The optional reference inputs the reconciler can use. Each absent table
/// degrades exactly one enrichment; none of them is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceTables<'a> {
    pub category_linkage: Option<&'a [CategoryLinkage]>,
    pub country_mapping: Option<&'a [CountryMapping]>,
    pub exchange_rates: Option<&'a [ExchangeRate]>,
}

pub struct Reconciler {
    linkage: BTreeMap<String, Option<String>>,
    countries: BTreeMap<String, String>,
    rates: BTreeMap<String, f64>,
}

impl Reconciler {
    pub fn new(tables: ReferenceTables<'_>) -> Self {
        let linkage: BTreeMap<String, Option<String>> = tables
            .category_linkage
            .unwrap_or_default()
            .iter()
            .map(|row| (row.category.trim().to_string(), row.activity.clone()))
            .collect();

        let countries: BTreeMap<String, String> = tables
            .country_mapping
            .unwrap_or_default()
            .iter()
            .map(|row| (row.code.clone(), row.country.clone()))
            .collect();

        let rates: BTreeMap<String, f64> = tables
            .exchange_rates
            .unwrap_or_default()
            .iter()
            .map(|row| (row.currency_code.clone(), row.rate_usd))
            .collect();

        debug!(
            "Reconciler references: {} linkage categories, {} countries, {} rates",
            linkage.len(),
            countries.len(),
            rates.len()
        );

        Self {
            linkage,
            countries,
            rates,
        }
    }

    pub fn reconcile(&self, rows: Vec<RawTransaction>) -> Vec<ReconciledTransaction> {
        let reconciled: Vec<ReconciledTransaction> = rows
            .into_iter()
            .map(|row| self.reconcile_row(row))
            .collect();

        let with_usd = reconciled.iter().filter(|r| r.amount_usd.is_some()).count();
        debug!(
            "Reconciled {} transactions ({} with a USD amount after backfill)",
            reconciled.len(),
            with_usd
        );
        reconciled
    }

    fn reconcile_row(&self, row: RawTransaction) -> ReconciledTransaction {
        let category_clean = row.category.trim().to_string();
        let linkage_activity = self
            .linkage
            .get(&category_clean)
            .and_then(|hint| hint.clone());

        // Left join: a raw country wins over the mapping, and an unmatched
        // entity keeps None.
        let country = row
            .country
            .clone()
            .or_else(|| self.countries.get(&row.entity).cloned());

        // Never overwrite a USD amount the extract already carries.
        let amount_usd = row
            .amount_usd
            .or_else(|| row.rate_usd.map(|rate| row.amount_doc_currency * rate));

        // The documentary amount is the trusted sign source.
        let net_amount_usd = amount_usd.map(|usd| {
            if row.amount_doc_currency < 0.0 {
                -usd.abs()
            } else {
                usd.abs()
            }
        });

        let cash_flow_direction = CashFlowDirection::from_doc_amount(row.amount_doc_currency);

        // Zero documentary amount resolves to the 0.0 sentinel, not an error.
        let implied_fx_rate = match amount_usd {
            Some(usd) if row.amount_doc_currency != 0.0 => {
                (usd / row.amount_doc_currency).abs()
            }
            _ => 0.0,
        };

        let reference_fx_rate = self.rates.get(&row.currency_code).copied();
        let fx_rate_variance = match (amount_usd, reference_fx_rate) {
            (Some(_), Some(reference)) => Some(implied_fx_rate - reference),
            _ => None,
        };

        ReconciledTransaction {
            entity: row.entity,
            document_no: row.document_no,
            posting_date: row.posting_date,
            category: row.category,
            category_clean,
            linkage_activity,
            country,
            currency_code: row.currency_code,
            amount_doc_currency: row.amount_doc_currency,
            amount_usd,
            net_amount_usd,
            cash_flow_direction,
            implied_fx_rate,
            reference_fx_rate,
            fx_rate_variance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(category: &str, doc: f64, usd: Option<f64>, rate: Option<f64>) -> RawTransaction {
        RawTransaction {
            entity: "DE01".to_string(),
            document_no: None,
            posting_date: NaiveDate::from_ymd_opt(2024, 2, 5).unwrap(),
            category: category.to_string(),
            amount_doc_currency: doc,
            amount_usd: usd,
            currency_code: "EUR".to_string(),
            rate_usd: rate,
            country: None,
        }
    }

    fn bare_reconciler() -> Reconciler {
        Reconciler::new(ReferenceTables::default())
    }

    #[test]
    fn test_backfill_fills_only_missing_usd() {
        let rec = bare_reconciler();
        let rows = rec.reconcile(vec![
            raw("A", 100.0, None, Some(1.1)),
            raw("B", 100.0, Some(115.0), Some(1.1)),
            raw("C", 100.0, None, None),
        ]);

        assert_eq!(rows[0].amount_usd, Some(110.0));
        // A present USD amount is never overwritten by the rate.
        assert_eq!(rows[1].amount_usd, Some(115.0));
        // No rate, no backfill.
        assert_eq!(rows[2].amount_usd, None);
    }

    #[test]
    fn test_category_join_trims_but_preserves_case() {
        let linkage = vec![CategoryLinkage {
            category: "Supplier Payments".to_string(),
            activity: Some("Operating".to_string()),
        }];
        let rec = Reconciler::new(ReferenceTables {
            category_linkage: Some(&linkage),
            ..ReferenceTables::default()
        });

        let rows = rec.reconcile(vec![
            raw("  Supplier Payments  ", -10.0, Some(-11.0), None),
            raw("supplier payments", -10.0, Some(-11.0), None),
        ]);

        assert_eq!(rows[0].category_clean, "Supplier Payments");
        assert_eq!(rows[0].linkage_activity.as_deref(), Some("Operating"));
        // Case-sensitive join key: no match, row kept with a null hint.
        assert_eq!(rows[1].linkage_activity, None);
    }

    #[test]
    fn test_net_amount_sign_follows_doc_currency() {
        let rec = bare_reconciler();
        let rows = rec.reconcile(vec![
            // USD carries the wrong sign; the documentary sign wins.
            raw("A", -100.0, Some(108.0), None),
            raw("B", 100.0, Some(-108.0), None),
        ]);
        assert_eq!(rows[0].net_amount_usd, Some(-108.0));
        assert_eq!(rows[0].cash_flow_direction, CashFlowDirection::Outflow);
        assert_eq!(rows[1].net_amount_usd, Some(108.0));
        assert_eq!(rows[1].cash_flow_direction, CashFlowDirection::Inflow);
    }

    #[test]
    fn test_zero_doc_amount_yields_zero_implied_rate() {
        let rec = bare_reconciler();
        let rows = rec.reconcile(vec![raw("A", 0.0, Some(0.0), None)]);
        assert_eq!(rows[0].implied_fx_rate, 0.0);
    }

    #[test]
    fn test_fx_variance_requires_reference_rate() {
        let fx = vec![ExchangeRate {
            currency_code: "EUR".to_string(),
            rate_usd: 1.10,
        }];
        let rec = Reconciler::new(ReferenceTables {
            exchange_rates: Some(&fx),
            ..ReferenceTables::default()
        });

        let mut unmatched = raw("A", 100.0, Some(108.0), None);
        unmatched.currency_code = "KRW".to_string();

        let rows = rec.reconcile(vec![raw("A", 100.0, Some(108.0), None), unmatched]);

        assert_eq!(rows[0].reference_fx_rate, Some(1.10));
        let variance = rows[0].fx_rate_variance.unwrap();
        assert!((variance - (1.08 - 1.10)).abs() < 1e-12);

        assert_eq!(rows[1].reference_fx_rate, None);
        assert_eq!(rows[1].fx_rate_variance, None);
    }

    #[test]
    fn test_fx_variance_absent_without_usd_amount() {
        let fx = vec![ExchangeRate {
            currency_code: "EUR".to_string(),
            rate_usd: 1.10,
        }];
        let rec = Reconciler::new(ReferenceTables {
            exchange_rates: Some(&fx),
            ..ReferenceTables::default()
        });
        let rows = rec.reconcile(vec![raw("A", 100.0, None, None)]);
        assert_eq!(rows[0].fx_rate_variance, None);
    }

    #[test]
    fn test_country_join_fills_only_missing() {
        let countries = vec![CountryMapping {
            code: "DE01".to_string(),
            country: "Germany".to_string(),
        }];
        let rec = Reconciler::new(ReferenceTables {
            country_mapping: Some(&countries),
            ..ReferenceTables::default()
        });

        let mut preset = raw("A", 1.0, Some(1.0), None);
        preset.country = Some("Sweden".to_string());
        let mut unknown = raw("A", 1.0, Some(1.0), None);
        unknown.entity = "ZZ99".to_string();

        let rows = rec.reconcile(vec![raw("A", 1.0, Some(1.0), None), preset, unknown]);
        assert_eq!(rows[0].country.as_deref(), Some("Germany"));
        assert_eq!(rows[1].country.as_deref(), Some("Sweden"));
        assert_eq!(rows[2].country, None);
    }

    #[test]
    fn test_missing_reference_tables_degrade_not_drop() {
        let rec = bare_reconciler();
        let rows = rec.reconcile(vec![raw("Capex", -50.0, Some(-55.0), None)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].linkage_activity, None);
        assert_eq!(rows[0].country, None);
        assert_eq!(rows[0].reference_fx_rate, None);
    }
}
