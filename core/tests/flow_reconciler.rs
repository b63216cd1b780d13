//! Integration tests for the flow reconciler.
//!
//! 1. Bucket counts for a hand-built cohort
//! 2. Conservation identities over overlapping, inconsistent tables
//! 3. Reason sub-edges from the classifier and the refusal map
//! 4. Zero-size cohorts

use docket_core::{
    cohort::StageTables,
    error::DataIssue,
    flow::{reconcile, FlowBucket, FlowEdge, FlowNode, FlowReconciler},
    record::CaseRow,
    reference::ReferenceData,
    types::Stage,
};
use std::collections::BTreeSet;

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn rows(list: &[&str]) -> Vec<CaseRow> {
    list.iter().map(|id| CaseRow::new(*id)).collect()
}

fn edge_value(edges: &[FlowEdge], source: FlowNode, target: FlowNode) -> Option<u64> {
    edges
        .iter()
        .find(|e| e.source == source && e.target == target)
        .map(|e| e.value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Set algebra
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn five_case_cohort_splits_into_buckets() {
    let flow = reconcile(
        &ids(&["A", "B", "C", "D", "E"]),
        &ids(&["A", "B", "C"]),
        &ids(&["D"]),
        &ids(&["A", "B"]),
    );

    assert_eq!(flow.count(FlowBucket::Filed), 3);
    assert_eq!(flow.count(FlowBucket::Declined), 1);
    assert_eq!(flow.count(FlowBucket::UnderReview), 1);
    assert_eq!(flow.count(FlowBucket::Active), 1);
    assert_eq!(flow.count(FlowBucket::Disposed), 2);
    assert_eq!(flow.under_review, ids(&["E"]));
    assert_eq!(flow.active, ids(&["C"]));
    assert!(flow.is_balanced());
}

#[test]
fn filed_wins_over_declined() {
    // B sits in both tables (extract latency); it must count once, as filed.
    let flow = reconcile(&ids(&["A", "B"]), &ids(&["B"]), &ids(&["A", "B"]), &ids(&[]));
    assert_eq!(flow.filed, ids(&["B"]));
    assert_eq!(flow.declined, ids(&["A"]));
    assert!(flow.is_balanced());
}

#[test]
fn cases_outside_the_cohort_are_ignored() {
    let flow = reconcile(
        &ids(&["A", "B"]),
        &ids(&["A", "X", "Y"]),
        &ids(&["Z"]),
        &ids(&["A", "X"]),
    );
    assert_eq!(flow.filed, ids(&["A"]));
    assert!(flow.declined.is_empty());
    assert_eq!(flow.under_review, ids(&["B"]));
    assert_eq!(flow.disposed, ids(&["A"]));
}

#[test]
fn disposed_without_filing_is_reported_but_not_bucketed() {
    let flow = reconcile(&ids(&["A", "B"]), &ids(&["A"]), &ids(&[]), &ids(&["A", "B"]));
    assert_eq!(flow.disposed, ids(&["A"]));
    assert_eq!(flow.disposed_unfiled, ids(&["B"]));
    assert_eq!(flow.under_review, ids(&["B"]));
    assert!(flow.is_balanced());
}

#[test]
fn identities_hold_for_every_overlap_pattern() {
    // Every assignment of 6 cases to the three downstream tables.
    let universe = ["A", "B", "C", "D", "E", "F"];
    let received = ids(&universe[..4]);
    for mask in 0u32..(1 << 18) {
        let pick = |offset: u32| -> BTreeSet<String> {
            universe
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << (offset + *i as u32)) != 0)
                .map(|(_, id)| id.to_string())
                .collect()
        };
        let flow = reconcile(&received, &pick(0), &pick(6), &pick(12));
        assert!(flow.is_balanced(), "unbalanced for mask {mask:#x}: {flow:?}");
        assert!(flow.declined.is_disjoint(&flow.filed));
    }
}

#[test]
fn empty_cohort_has_zero_shares() {
    let flow = reconcile(&ids(&[]), &ids(&["A"]), &ids(&["B"]), &ids(&["A"]));
    assert!(flow.is_balanced());
    assert_eq!(flow.share_of_received(FlowBucket::Filed), 0.0);
    assert_eq!(flow.share_of_received(FlowBucket::Declined), 0.0);
}

#[test]
fn shares_are_fractions_of_received() {
    let flow = reconcile(&ids(&["A", "B", "C", "D"]), &ids(&["A"]), &ids(&["B"]), &ids(&[]));
    assert_eq!(flow.share_of_received(FlowBucket::Filed), 0.25);
    assert_eq!(flow.share_of_received(FlowBucket::UnderReview), 0.5);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reason sub-edges
// ─────────────────────────────────────────────────────────────────────────────

fn history() -> (StageTables, ReferenceData) {
    let mut refs = ReferenceData::default();
    refs.refusal_reasons.insert("7".into(), "Insufficient Evidence".into());
    refs.refusal_reasons.insert("8".into(), "Victim Declined".into());

    let not_filed = vec![
        CaseRow { disposition_code: Some("7".into()), ..CaseRow::new("D") },
        CaseRow { disposition_code: Some("8.0".into()), ..CaseRow::new("E") },
        CaseRow { disposition_code: Some("7".into()), ..CaseRow::new("F") },
        CaseRow { disposition_code: Some("55".into()), ..CaseRow::new("G") },
    ];
    let disposed = vec![
        CaseRow { activity: Some("Guilty Plea".into()), ..CaseRow::new("A") },
        CaseRow { activity: Some("Trial".into()), reason: Some("Guilty".into()), ..CaseRow::new("B") },
        CaseRow { activity: Some("Sentencing".into()), ..CaseRow::new("B") },
        CaseRow { activity: Some("Guilty Plea".into()), ..CaseRow::new("C") },
    ];
    let tables = StageTables::new(
        rows(&["A", "B", "C", "D", "E", "F", "G", "H"]),
        not_filed,
        rows(&["A", "B", "C", "H"]),
        disposed,
    );
    (tables, refs)
}

#[test]
fn stage_edges_come_first_in_fixed_order() {
    let (tables, refs) = history();
    let result = FlowReconciler::new(&tables, &refs).run(&tables.file_ids(Stage::Received));

    let heads: Vec<(FlowNode, FlowNode, u64)> = result.edges[..5]
        .iter()
        .map(|e| (e.source.clone(), e.target.clone(), e.value))
        .collect();
    assert_eq!(heads, vec![
        (FlowNode::Received, FlowNode::Declined, 4),
        (FlowNode::Received, FlowNode::UnderReview, 0),
        (FlowNode::Received, FlowNode::Filed, 4),
        (FlowNode::Filed, FlowNode::Active, 1),
        (FlowNode::Filed, FlowNode::Disposed, 3),
    ]);
}

#[test]
fn disposal_reasons_follow_the_classifier() {
    let (tables, refs) = history();
    let result = FlowReconciler::new(&tables, &refs).run(&ids(&["A", "B", "C", "H"]));

    assert_eq!(result.disposal_reasons["Guilty Plea"], 2);
    assert_eq!(result.disposal_reasons["Guilty"], 1);
    assert_eq!(
        edge_value(&result.edges, FlowNode::Disposed, FlowNode::DisposalReason("Guilty Plea".into())),
        Some(2)
    );
    let total: u64 = result.disposal_reasons.values().sum();
    assert_eq!(total as usize, result.flow.disposed.len());
}

#[test]
fn decline_reasons_are_sorted_and_unmatched_codes_tallied() {
    let (tables, refs) = history();
    let result = FlowReconciler::new(&tables, &refs).run(&ids(&["D", "E", "F", "G"]));

    assert_eq!(result.decline_reasons["Insufficient Evidence"], 2);
    assert_eq!(result.decline_reasons["Victim Declined"], 1);
    assert_eq!(result.issues.count(DataIssue::UnmatchedReferenceKey("refusal_reason")), 1);

    let labels: Vec<&str> = result
        .edges
        .iter()
        .filter(|e| e.source == FlowNode::Declined && matches!(e.target, FlowNode::DeclineReason(_)))
        .map(|e| e.target.label())
        .collect();
    assert_eq!(labels, vec!["Insufficient Evidence", "Victim Declined"]);
}

#[test]
fn reconciler_is_a_pure_function_of_the_cohort() {
    let (tables, refs) = history();
    let reconciler = FlowReconciler::new(&tables, &refs);
    let cohort = ids(&["A", "D", "H"]);
    let first = reconciler.run(&cohort);
    let second = reconciler.run(&cohort);
    assert_eq!(first.edges, second.edges);
    assert_eq!(first.flow, second.flow);
}

#[test]
fn node_columns_order_the_diagram() {
    assert_eq!(FlowNode::Received.column(), 0);
    assert_eq!(FlowNode::Filed.column(), 1);
    assert_eq!(FlowNode::Disposed.column(), 2);
    assert_eq!(FlowNode::DisposalReason("Guilty".into()).column(), 3);
    assert_eq!(FlowNode::Received.label(), "Received by Office");
}
