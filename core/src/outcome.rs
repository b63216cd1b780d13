//! Outcome classifier: terminal disposition of a disposed case.
//!
//! A case carries an unordered bag of (Activity, Reason) records. The
//! classification is layered:
//!
//!   1. Trial check. Any record with Activity == "Trial" makes the case a
//!      trial case, whatever else it carries.
//!   2a. Trial cases: Guilty if any Reason == "Guilty", else Not Guilty.
//!   2b. Other cases: the first matching rule of NON_TRIAL_RULES, else Other.
//!
//! RULE: the order of NON_TRIAL_RULES is a business rule. A case with both
//! a guilty plea and a dismissal is a guilty plea. Never reorder it.
//!
//! Matching is case-sensitive. `Equals` compares the whole field,
//! `Contains` is a substring test.

use crate::{
    cohort::rows_by_case,
    record::{non_blank, CaseRow},
    reference::ReferenceData,
    types::CaseId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One activity/reason pair of a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity: String,
    pub reason: String,
}

impl ActivityRecord {
    pub fn new(activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    TrialCase,
    NonTrialCase,
}

impl TrialStatus {
    pub fn label(self) -> &'static str {
        match self {
            TrialStatus::TrialCase    => "Trial Case",
            TrialStatus::NonTrialCase => "Not Trial Case",
        }
    }
}

/// Terminal label. The first two belong to trial cases only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Guilty,
    NotGuilty,
    GuiltyPlea,
    DrugCourt,
    EntireCaseDismissed,
    ReferredToOtherAgency,
    NoProsecution,
    Other,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Guilty                => "Guilty",
            Outcome::NotGuilty             => "Not Guilty",
            Outcome::GuiltyPlea            => "Guilty Plea",
            Outcome::DrugCourt             => "Drug Court",
            Outcome::EntireCaseDismissed   => "Entire Case Dismissed",
            Outcome::ReferredToOtherAgency => "Referred to Other Agency",
            Outcome::NoProsecution         => "No Prosecution",
            Outcome::Other                 => "Other",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub trial: TrialStatus,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Activity,
    Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Equals(&'static str),
    Contains(&'static str),
}

/// A predicate over one record field, and the label it assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub field: Field,
    pub pattern: Pattern,
    pub outcome: Outcome,
}

impl Rule {
    const fn new(field: Field, pattern: Pattern, outcome: Outcome) -> Self {
        Self { field, pattern, outcome }
    }

    pub fn matches_record(&self, record: &ActivityRecord) -> bool {
        let value = match self.field {
            Field::Activity => record.activity.as_str(),
            Field::Reason   => record.reason.as_str(),
        };
        match self.pattern {
            Pattern::Equals(needle)   => value == needle,
            Pattern::Contains(needle) => value.contains(needle),
        }
    }

    /// True if any record of the case satisfies the rule.
    pub fn matches(&self, records: &[ActivityRecord]) -> bool {
        records.iter().any(|r| self.matches_record(r))
    }
}

/// Step 1. Its `outcome` is unused; a match only sets the trial flag.
pub const TRIAL_RULE: Rule = Rule::new(Field::Activity, Pattern::Equals("Trial"), Outcome::Other);

/// Step 2a, evaluated for trial cases only.
pub const VERDICT_RULES: [Rule; 1] = [
    Rule::new(Field::Reason, Pattern::Equals("Guilty"), Outcome::Guilty),
];
pub const VERDICT_FALLBACK: Outcome = Outcome::NotGuilty;

/// Step 2b, evaluated in order for non-trial cases.
pub const NON_TRIAL_RULES: [Rule; 5] = [
    Rule::new(Field::Activity, Pattern::Contains("Guilty Plea"),      Outcome::GuiltyPlea),
    Rule::new(Field::Activity, Pattern::Contains("Drug Court"),       Outcome::DrugCourt),
    Rule::new(Field::Reason,   Pattern::Contains("Entire Dismissal"), Outcome::EntireCaseDismissed),
    Rule::new(Field::Activity, Pattern::Contains("Outside Referral"), Outcome::ReferredToOtherAgency),
    Rule::new(Field::Activity, Pattern::Contains("No Prosecution"),   Outcome::NoProsecution),
];
pub const NON_TRIAL_FALLBACK: Outcome = Outcome::Other;

/// Outcome of the first rule that matches, else `fallback`.
pub fn first_match(rules: &[Rule], records: &[ActivityRecord], fallback: Outcome) -> Outcome {
    rules
        .iter()
        .find(|rule| rule.matches(records))
        .map_or(fallback, |rule| rule.outcome)
}

/// Classify one case. Pure: same records, same answer.
pub fn classify(records: &[ActivityRecord]) -> Classification {
    if TRIAL_RULE.matches(records) {
        Classification {
            trial: TrialStatus::TrialCase,
            outcome: first_match(&VERDICT_RULES, records, VERDICT_FALLBACK),
        }
    } else {
        Classification {
            trial: TrialStatus::NonTrialCase,
            outcome: first_match(&NON_TRIAL_RULES, records, NON_TRIAL_FALLBACK),
        }
    }
}

/// Activity records of one case's disposed rows.
///
/// The reason comes from the disposition-code map. When the code is
/// missing or unmapped, the row's own Reason column is used, and an empty
/// reason otherwise (which can only fall through to later rules).
pub fn activity_records(rows: &[&CaseRow], refs: &ReferenceData) -> Vec<ActivityRecord> {
    rows.iter()
        .map(|row| {
            let mapped = row
                .disposition()
                .and_then(|code| refs.disposition_reason(&code).map(str::to_string));
            let reason = mapped
                .or_else(|| non_blank(&row.reason).map(str::to_string))
                .unwrap_or_default();
            ActivityRecord {
                activity: non_blank(&row.activity).unwrap_or_default().to_string(),
                reason,
            }
        })
        .collect()
}

/// Classify every case in a disposed table, keyed by `File #`.
pub fn classify_cases(
    disposed: &[CaseRow],
    refs: &ReferenceData,
) -> BTreeMap<CaseId, Classification> {
    rows_by_case(disposed)
        .into_iter()
        .map(|(file, rows)| (file.to_string(), classify(&activity_records(&rows, refs))))
        .collect()
}

/// Per-label counts across a cohort of classified cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    /// "Trial Case" / "Not Trial Case" → cases.
    pub trial_split: BTreeMap<String, u64>,
    /// Verdicts of trial cases.
    pub trial_outcomes: BTreeMap<String, u64>,
    /// Terminal labels of non-trial cases.
    pub non_trial_outcomes: BTreeMap<String, u64>,
}

impl OutcomeSummary {
    pub fn from_classifications<'a, I>(classifications: I) -> Self
    where
        I: IntoIterator<Item = &'a Classification>,
    {
        let mut summary = Self::default();
        for c in classifications {
            *summary
                .trial_split
                .entry(c.trial.label().to_string())
                .or_insert(0) += 1;
            let bucket = match c.trial {
                TrialStatus::TrialCase    => &mut summary.trial_outcomes,
                TrialStatus::NonTrialCase => &mut summary.non_trial_outcomes,
            };
            *bucket.entry(c.outcome.label().to_string()).or_insert(0) += 1;
        }
        summary
    }

    /// Counts by terminal label regardless of trial status, sorted by label.
    pub fn by_terminal_label(&self) -> BTreeMap<String, u64> {
        let mut merged = self.trial_outcomes.clone();
        for (label, n) in &self.non_trial_outcomes {
            *merged.entry(label.clone()).or_insert(0) += n;
        }
        merged
    }
}
