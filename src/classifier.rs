//! Rule-based activity classification.
//!
//! Precedence is data, not control flow: the classifier walks an ordered
//! rule table once per transaction and the LAST matching rule wins. The
//! default table reproduces the documented keyword logic: investing keywords,
//! then financing keywords (which override investing), then the
//! "Non Netting AP" manual override, then the "Other" default. Matching is a
//! case-insensitive substring test against the UNTRIMMED raw category, never
//! the cleaned join key.

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::{Activity, ClassifiedTransaction, ReconciledTransaction};

/// Substring the manual override rule looks for.
pub const MANUAL_OVERRIDE_SUBSTRING: &str = "Non Netting AP";

/// Substring the unset-default rule looks for.
pub const OTHER_SUBSTRING: &str = "Other";

pub const INVESTING_KEYWORDS: &[&str] = &["Capex", "Asset", "Invest", "Acquisition"];

pub const FINANCING_KEYWORDS: &[&str] = &[
    "Intercompany",
    "Dividend",
    "Equity",
    "Loan",
    "Interest",
    "Financing",
    "Treasury",
];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    /// Fires when ANY keyword appears in the raw category. Keywords are an
    /// ordered list; order is preserved for audit even though every match
    /// yields the same activity.
    KeywordAny { keywords: Vec<String> },

    /// Fires when the substring appears in the raw category, unconditionally.
    Contains { substring: String },

    /// Fires only when the substring appears, no earlier rule has assigned
    /// an activity, and the linkage join produced no activity hint.
    ContainsIfUnset { substring: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub name: String,
    pub predicate: RulePredicate,
    pub activity: Activity,
}

impl Rule {
    /// Whether this rule fires for the given raw category, linkage hint, and
    /// the activity assigned by earlier rules (if any).
    pub fn fires(
        &self,
        category: &str,
        linkage_activity: Option<&str>,
        current: Option<Activity>,
    ) -> bool {
        match &self.predicate {
            RulePredicate::KeywordAny { keywords } => keywords
                .iter()
                .any(|kw| contains_case_insensitive(category, kw)),
            RulePredicate::Contains { substring } => {
                contains_case_insensitive(category, substring)
            }
            RulePredicate::ContainsIfUnset { substring } => {
                current.is_none()
                    && linkage_activity.is_none()
                    && contains_case_insensitive(category, substring)
            }
        }
    }
}

/// Ordered rule table. Rules are evaluated top to bottom and every firing
/// rule overwrites the working assignment, so position encodes precedence.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        let owned = |kws: &[&str]| kws.iter().map(|s| s.to_string()).collect();
        Self {
            rules: vec![
                Rule {
                    name: "investing-keywords".to_string(),
                    predicate: RulePredicate::KeywordAny {
                        keywords: owned(INVESTING_KEYWORDS),
                    },
                    activity: Activity::Investing,
                },
                Rule {
                    name: "financing-keywords".to_string(),
                    predicate: RulePredicate::KeywordAny {
                        keywords: owned(FINANCING_KEYWORDS),
                    },
                    activity: Activity::Financing,
                },
                Rule {
                    name: "non-netting-ap-override".to_string(),
                    predicate: RulePredicate::Contains {
                        substring: MANUAL_OVERRIDE_SUBSTRING.to_string(),
                    },
                    activity: Activity::Operating,
                },
                Rule {
                    name: "other-default".to_string(),
                    predicate: RulePredicate::ContainsIfUnset {
                        substring: OTHER_SUBSTRING.to_string(),
                    },
                    activity: Activity::Operating,
                },
            ],
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Resolve the activity for one transaction. The terminal state is
    /// always one of the three activities; transactions no rule touches
    /// fall back to Operating.
    pub fn resolve(&self, category: &str, linkage_activity: Option<&str>) -> Activity {
        let mut current: Option<Activity> = None;
        for rule in &self.rules {
            if rule.fires(category, linkage_activity, current) {
                current = Some(rule.activity);
            }
        }
        current.unwrap_or(Activity::Operating)
    }
}

fn contains_case_insensitive(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub struct ActivityClassifier<'a> {
    rules: &'a RuleSet,
}

impl<'a> ActivityClassifier<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn classify(
        &self,
        transactions: Vec<ReconciledTransaction>,
    ) -> Vec<ClassifiedTransaction> {
        let mut counts = [0usize; 3];
        let classified: Vec<ClassifiedTransaction> = transactions
            .into_iter()
            .map(|reconciled| {
                let activity = self
                    .rules
                    .resolve(&reconciled.category, reconciled.linkage_activity.as_deref());
                counts[match activity {
                    Activity::Operating => 0,
                    Activity::Investing => 1,
                    Activity::Financing => 2,
                }] += 1;
                ClassifiedTransaction {
                    reconciled,
                    activity,
                }
            })
            .collect();

        debug!(
            "Classified {} transactions: {} operating, {} investing, {} financing",
            classified.len(),
            counts[0],
            counts[1],
            counts[2]
        );
        classified
    }
}
