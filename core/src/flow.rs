//! Flow reconciler: how a received cohort moved through the office.
//!
//! Set algebra over `File #`s drawn from four independently maintained
//! stage tables:
//!
//!   filed        = filed_all ∩ received
//!   declined     = (not_filed_all ∩ received) − filed
//!   under_review = received − filed − declined
//!   disposed     = disposed_all ∩ filed
//!   active       = filed − disposed
//!
//! RULE: never assume one table contains another. Every bucket is built
//! by intersection or difference, so by construction
//!   |declined| + |under_review| + |filed| == |received|
//!   |active| + |disposed|               == |filed|
//!
//! A case in both the filed and not-filed tables (extract latency) is
//! always resolved as filed.

use crate::{
    cohort::{rows_by_case, StageTables},
    error::{DataIssue, IssueTally},
    outcome::{activity_records, classify},
    record::CaseRow,
    reference::ReferenceData,
    types::{CaseId, Stage},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bucket membership for one received cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortFlow {
    pub received: BTreeSet<CaseId>,
    pub declined: BTreeSet<CaseId>,
    pub under_review: BTreeSet<CaseId>,
    pub filed: BTreeSet<CaseId>,
    pub active: BTreeSet<CaseId>,
    pub disposed: BTreeSet<CaseId>,
    /// Received and disposed but never seen in the filed table. These
    /// appear in no bucket below `filed`; kept so the gap is visible.
    pub disposed_unfiled: BTreeSet<CaseId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowBucket {
    Declined,
    UnderReview,
    Filed,
    Active,
    Disposed,
}

impl CohortFlow {
    pub fn count(&self, bucket: FlowBucket) -> usize {
        match bucket {
            FlowBucket::Declined    => self.declined.len(),
            FlowBucket::UnderReview => self.under_review.len(),
            FlowBucket::Filed       => self.filed.len(),
            FlowBucket::Active      => self.active.len(),
            FlowBucket::Disposed    => self.disposed.len(),
        }
    }

    /// Fraction of the received cohort in `bucket`; 0 for an empty cohort.
    pub fn share_of_received(&self, bucket: FlowBucket) -> f64 {
        if self.received.is_empty() {
            return 0.0;
        }
        self.count(bucket) as f64 / self.received.len() as f64
    }

    /// Both conservation identities hold.
    pub fn is_balanced(&self) -> bool {
        self.declined.len() + self.under_review.len() + self.filed.len() == self.received.len()
            && self.active.len() + self.disposed.len() == self.filed.len()
    }
}

/// Pure set reconciliation of one cohort.
pub fn reconcile(
    received: &BTreeSet<CaseId>,
    filed_all: &BTreeSet<CaseId>,
    not_filed_all: &BTreeSet<CaseId>,
    disposed_all: &BTreeSet<CaseId>,
) -> CohortFlow {
    let filed: BTreeSet<CaseId> = filed_all.intersection(received).cloned().collect();
    let declined: BTreeSet<CaseId> = not_filed_all
        .intersection(received)
        .filter(|id| !filed.contains(*id))
        .cloned()
        .collect();
    let under_review: BTreeSet<CaseId> = received
        .iter()
        .filter(|id| !filed.contains(*id) && !declined.contains(*id))
        .cloned()
        .collect();
    let disposed: BTreeSet<CaseId> = disposed_all.intersection(&filed).cloned().collect();
    let active: BTreeSet<CaseId> = filed.difference(&disposed).cloned().collect();
    let disposed_unfiled: BTreeSet<CaseId> = disposed_all
        .intersection(received)
        .filter(|id| !filed.contains(*id))
        .cloned()
        .collect();

    CohortFlow {
        received: received.clone(),
        declined,
        under_review,
        filed,
        active,
        disposed,
        disposed_unfiled,
    }
}

/// A node of the flow diagram. `column` orders nodes left to right.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "node", content = "label", rename_all = "snake_case")]
pub enum FlowNode {
    Received,
    Declined,
    UnderReview,
    Filed,
    Active,
    Disposed,
    DisposalReason(String),
    DeclineReason(String),
}

impl FlowNode {
    pub fn label(&self) -> &str {
        match self {
            FlowNode::Received    => "Received by Office",
            FlowNode::Declined    => "Declined",
            FlowNode::UnderReview => "Under Review",
            FlowNode::Filed       => "Cases Filed",
            FlowNode::Active      => "Case Active",
            FlowNode::Disposed    => "Cases Disposed",
            FlowNode::DisposalReason(label) | FlowNode::DeclineReason(label) => label,
        }
    }

    pub fn column(&self) -> u8 {
        match self {
            FlowNode::Received => 0,
            FlowNode::Declined | FlowNode::UnderReview | FlowNode::Filed => 1,
            FlowNode::Active | FlowNode::Disposed | FlowNode::DeclineReason(_) => 2,
            FlowNode::DisposalReason(_) => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub source: FlowNode,
    pub target: FlowNode,
    pub value: u64,
}

impl FlowEdge {
    fn new(source: FlowNode, target: FlowNode, value: usize) -> Self {
        Self {
            source,
            target,
            value: value as u64,
        }
    }
}

/// Everything the diagram and the dashboard need for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub flow: CohortFlow,
    /// Terminal outcome label → disposed cases.
    pub disposal_reasons: BTreeMap<String, u64>,
    /// Refusal reason label → declined cases.
    pub decline_reasons: BTreeMap<String, u64>,
    /// Edges in a stable order: the five stage edges, then disposal and
    /// decline reason edges each sorted by label.
    pub edges: Vec<FlowEdge>,
    #[serde(skip)]
    pub issues: IssueTally,
}

/// Reconciles many cohorts against one consolidated history.
///
/// The whole-history identifier sets and per-case row groups are built
/// once; `run` is then a pure function of the received cohort.
pub struct FlowReconciler<'a> {
    refs: &'a ReferenceData,
    filed_all: BTreeSet<CaseId>,
    not_filed_all: BTreeSet<CaseId>,
    disposed_all: BTreeSet<CaseId>,
    disposed_rows: BTreeMap<&'a str, Vec<&'a CaseRow>>,
    not_filed_rows: BTreeMap<&'a str, Vec<&'a CaseRow>>,
}

impl<'a> FlowReconciler<'a> {
    pub fn new(history: &'a StageTables, refs: &'a ReferenceData) -> Self {
        Self {
            refs,
            filed_all: history.file_ids(Stage::Filed),
            not_filed_all: history.file_ids(Stage::NotFiled),
            disposed_all: history.file_ids(Stage::Disposed),
            disposed_rows: rows_by_case(history.stage(Stage::Disposed)),
            not_filed_rows: rows_by_case(history.stage(Stage::NotFiled)),
        }
    }

    pub fn run(&self, received: &BTreeSet<CaseId>) -> FlowResult {
        let flow = reconcile(received, &self.filed_all, &self.not_filed_all, &self.disposed_all);
        let mut issues = IssueTally::default();
        let disposal_reasons = self.disposal_reasons(&flow.disposed);
        let decline_reasons = self.decline_reasons(&flow.declined, &mut issues);

        let mut edges = vec![
            FlowEdge::new(FlowNode::Received, FlowNode::Declined, flow.declined.len()),
            FlowEdge::new(FlowNode::Received, FlowNode::UnderReview, flow.under_review.len()),
            FlowEdge::new(FlowNode::Received, FlowNode::Filed, flow.filed.len()),
            FlowEdge::new(FlowNode::Filed, FlowNode::Active, flow.active.len()),
            FlowEdge::new(FlowNode::Filed, FlowNode::Disposed, flow.disposed.len()),
        ];
        edges.extend(disposal_reasons.iter().map(|(label, n)| FlowEdge {
            source: FlowNode::Disposed,
            target: FlowNode::DisposalReason(label.clone()),
            value: *n,
        }));
        edges.extend(decline_reasons.iter().map(|(label, n)| FlowEdge {
            source: FlowNode::Declined,
            target: FlowNode::DeclineReason(label.clone()),
            value: *n,
        }));

        FlowResult {
            flow,
            disposal_reasons,
            decline_reasons,
            edges,
            issues,
        }
    }

    /// Classify each disposed case and count terminal labels.
    fn disposal_reasons(&self, disposed: &BTreeSet<CaseId>) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for id in disposed {
            let rows = self
                .disposed_rows
                .get(id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let outcome = classify(&activity_records(rows, self.refs)).outcome;
            *counts.entry(outcome.label().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Refusal reason of each declined case: the first of its rows whose
    /// code maps. Cases with no mapped code are left out of the breakdown.
    fn decline_reasons(
        &self,
        declined: &BTreeSet<CaseId>,
        issues: &mut IssueTally,
    ) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for id in declined {
            let rows = self
                .not_filed_rows
                .get(id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let reason = rows
                .iter()
                .filter_map(|row| row.disposition())
                .find_map(|code| self.refs.refusal_reason(&code).map(str::to_string));
            match reason {
                Some(label) => *counts.entry(label).or_insert(0) += 1,
                None => issues.record(DataIssue::UnmatchedReferenceKey("refusal_reason")),
            }
        }
        counts
    }
}
