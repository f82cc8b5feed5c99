//! Ordering of open complaints for the employee triage view.

use serde::Serialize;

use crate::complaint::ComplaintStatus;
use crate::types::{DbId, Timestamp};

/// The fields of a complaint that decide its place in the triage queue.
#[derive(Debug, Clone, Serialize)]
pub struct TriageCandidate {
    pub complaint_id: DbId,
    pub status: ComplaintStatus,
    /// `None` while analysis has not produced a score.
    pub priority_score: Option<f64>,
    pub created_at: Timestamp,
}

/// Sort open complaints for triage.
///
/// Closed complaints (rejected or fixed) are removed. The rest are ordered
/// by priority score descending, complaints without a score after all
/// scored ones, ties broken by oldest `created_at` first.
pub fn rank_for_triage(mut candidates: Vec<TriageCandidate>) -> Vec<TriageCandidate> {
    candidates.retain(|c| c.status.is_open());
    candidates.sort_by(|a, b| {
        let score_order = match (a.priority_score, b.priority_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        score_order.then_with(|| a.created_at.cmp(&b.created_at))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candidate(id: DbId, score: Option<f64>, minutes: i64) -> TriageCandidate {
        TriageCandidate {
            complaint_id: id,
            status: ComplaintStatus::Pending,
            priority_score: score,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    fn ids(ranked: &[TriageCandidate]) -> Vec<DbId> {
        ranked.iter().map(|c| c.complaint_id).collect()
    }

    #[test]
    fn highest_score_first() {
        let ranked = rank_for_triage(vec![
            candidate(1, Some(0.4), 0),
            candidate(2, Some(2.5), 1),
            candidate(3, Some(1.0), 2),
        ]);
        assert_eq!(ids(&ranked), vec![2, 3, 1]);
    }

    #[test]
    fn ties_prefer_older_complaints() {
        let ranked = rank_for_triage(vec![candidate(1, Some(1.0), 10), candidate(2, Some(1.0), 5)]);
        assert_eq!(ids(&ranked), vec![2, 1]);
    }

    #[test]
    fn unscored_complaints_sort_last() {
        let ranked = rank_for_triage(vec![
            candidate(1, None, 0),
            candidate(2, Some(0.0), 1),
            candidate(3, None, 2),
        ]);
        assert_eq!(ids(&ranked), vec![2, 1, 3]);
    }

    #[test]
    fn closed_complaints_are_dropped() {
        let mut fixed = candidate(1, Some(9.0), 0);
        fixed.status = ComplaintStatus::Fixed;
        let mut rejected = candidate(2, Some(8.0), 0);
        rejected.status = ComplaintStatus::Rejected;
        let ranked = rank_for_triage(vec![fixed, rejected, candidate(3, Some(0.1), 0)]);
        assert_eq!(ids(&ranked), vec![3]);
    }
}
