//! Answering machine detection performance

use serde::Serialize;
use std::collections::HashMap;

use crate::database::CallRecord;
use crate::types::AnsweredBy;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmdReport {
    pub answered: usize,
    pub human: usize,
    pub machine: usize,
    pub fax: usize,
    pub unknown: usize,
    /// (human + machine + fax) / answered
    pub classification_rate: f64,
    /// Agreement with ground truth, when any was supplied for answered records
    pub accuracy: Option<f64>,
    pub ground_truth_samples: usize,
}

/// Tally AMD results over answered records
///
/// Scores the provider-reported party, not the one dialer policy settled on,
/// so `unknown` answers stay visible. `ground_truth` maps record id to the
/// party that really answered.
pub fn analyze_amd(records: &[CallRecord], ground_truth: Option<&HashMap<String, AnsweredBy>>) -> AmdReport {
    let mut report = AmdReport::default();
    let mut correct = 0;

    for record in records {
        let Some(answered_by) = record.reported_answered_by() else {
            continue;
        };
        report.answered += 1;
        match answered_by {
            AnsweredBy::Human => report.human += 1,
            AnsweredBy::Machine => report.machine += 1,
            AnsweredBy::Fax => report.fax += 1,
            AnsweredBy::Unknown => report.unknown += 1,
        }

        if let Some(truth) = ground_truth.and_then(|gt| gt.get(&record.id)) {
            report.ground_truth_samples += 1;
            if *truth == answered_by {
                correct += 1;
            }
        }
    }

    if report.answered > 0 {
        let classified = report.human + report.machine + report.fax;
        report.classification_rate = classified as f64 / report.answered as f64;
    }
    if report.ground_truth_samples > 0 {
        report.accuracy = Some(correct as f64 / report.ground_truth_samples as f64);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactId;

    fn answered(by: Option<AnsweredBy>) -> CallRecord {
        let mut record = CallRecord::new("s1", ContactId::from("c"), "+15550001111");
        record.answered_by = by;
        record
    }

    #[test]
    fn test_tallies_and_accuracy() {
        let records = vec![
            answered(Some(AnsweredBy::Human)),
            answered(Some(AnsweredBy::Machine)),
            answered(Some(AnsweredBy::Unknown)),
            answered(Some(AnsweredBy::Fax)),
            answered(None),
        ];
        let mut truth = HashMap::new();
        truth.insert(records[0].id.clone(), AnsweredBy::Human);
        truth.insert(records[1].id.clone(), AnsweredBy::Human);

        let report = analyze_amd(&records, Some(&truth));
        assert_eq!(report.answered, 4);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.classification_rate, 0.75);
        assert_eq!(report.ground_truth_samples, 2);
        assert_eq!(report.accuracy, Some(0.5));
    }

    #[test]
    fn test_scores_provider_report_over_policy() {
        let mut resolved = answered(Some(AnsweredBy::Human));
        resolved.set_reported_answer(AnsweredBy::Unknown);
        let mut confirmed = answered(Some(AnsweredBy::Machine));
        confirmed.set_reported_answer(AnsweredBy::Machine);

        let mut truth = HashMap::new();
        truth.insert(resolved.id.clone(), AnsweredBy::Human);

        let report = analyze_amd(&[resolved, confirmed], Some(&truth));
        assert_eq!(report.answered, 2);
        assert_eq!(report.human, 0);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.machine, 1);
        assert_eq!(report.classification_rate, 0.5);
        assert_eq!(report.accuracy, Some(0.0));
    }

    #[test]
    fn test_no_ground_truth() {
        let report = analyze_amd(&[answered(Some(AnsweredBy::Human))], None);
        assert_eq!(report.accuracy, None);
        assert_eq!(report.classification_rate, 1.0);
    }
}
