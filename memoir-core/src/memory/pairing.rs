//! Unit planning: deciding which turn(s) one summarization call covers and
//! which index the resulting record files under.

use serde::{Deserialize, Serialize};

use crate::transcript::Transcript;

/// How exchanges are grouped and filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPolicy {
    /// Group turns into two-message exchanges instead of summarizing each
    /// turn alone.
    pub pair_messages: bool,
    /// File a pair's record under its non-user turn rather than the user
    /// turn.
    pub link_to_non_user: bool,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            pair_messages: true,
            link_to_non_user: true,
        }
    }
}

/// A unit of summarization work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryUnit {
    /// Indices of the turns this summary covers, in order.
    pub source_indices: Vec<usize>,
    /// The index the record files under.
    pub target_index: usize,
}

impl SummaryUnit {
    /// True when this unit covers the given index.
    pub fn covers(&self, index: usize) -> bool {
        self.source_indices.contains(&index)
    }
}

/// Outcome of planning the unit for a newly arrived turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPlan {
    /// The unit is complete and can be queued.
    Ready(SummaryUnit),
    /// The exchange is half-finished; wait for the partner turn.
    Defer,
    /// A source turn is missing or blank; no record will be produced.
    Invalid,
}

/// Plan the summarization unit triggered by the arrival of `index`.
///
/// Index 0 is always summarized alone. With pairing enabled, an odd index
/// defers until its successor arrives, and an even index > 0 covers the
/// exchange `{index - 1, index}`. With pairing disabled every index is its
/// own unit.
pub fn plan_unit(index: usize, transcript: &Transcript, policy: PairingPolicy) -> UnitPlan {
    if !policy.pair_messages || index == 0 {
        return match transcript.get(index) {
            Some(turn) if !turn.is_blank() => UnitPlan::Ready(SummaryUnit {
                source_indices: vec![index],
                target_index: index,
            }),
            _ => UnitPlan::Invalid,
        };
    }

    if index % 2 == 1 {
        return UnitPlan::Defer;
    }

    let (first, second) = (index - 1, index);
    match (transcript.get(first), transcript.get(second)) {
        (Some(a), Some(b)) if !a.is_blank() && !b.is_blank() => {
            let target_index = filing_target(first, second, transcript, policy);
            UnitPlan::Ready(SummaryUnit {
                source_indices: vec![first, second],
                target_index,
            })
        }
        _ => UnitPlan::Invalid,
    }
}

/// Pick which of a pair's two indices the record files under. When both
/// turns share a classification (host anomaly), the later index wins.
fn filing_target(
    first: usize,
    second: usize,
    transcript: &Transcript,
    policy: PairingPolicy,
) -> usize {
    let want_user = !policy.link_to_non_user;
    let second_matches = transcript.get(second).is_some_and(|t| t.is_user == want_user);
    if second_matches {
        return second;
    }
    let first_matches = transcript.get(first).is_some_and(|t| t.is_user == want_user);
    if first_matches {
        first
    } else {
        second
    }
}

/// The other member of `index`'s exchange, under the given policy. Index 0
/// has no partner, and neither does anything when pairing is disabled.
pub fn pair_partner(index: usize, policy: PairingPolicy) -> Option<usize> {
    if !policy.pair_messages || index == 0 {
        return None;
    }
    if index % 2 == 1 {
        Some(index + 1)
    } else {
        Some(index - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Turn;

    fn transcript_of(turns: Vec<Turn>) -> Transcript {
        Transcript::from_turns(turns)
    }

    fn alternating(n: usize) -> Transcript {
        let mut turns = Vec::new();
        for i in 0..n {
            if i % 2 == 0 {
                turns.push(Turn::user(format!("user turn {i}")));
            } else {
                turns.push(Turn::character("Ann", format!("reply {i}")));
            }
        }
        transcript_of(turns)
    }

    #[test]
    fn test_index_zero_summarized_alone() {
        let transcript = alternating(1);
        let plan = plan_unit(0, &transcript, PairingPolicy::default());
        assert_eq!(
            plan,
            UnitPlan::Ready(SummaryUnit {
                source_indices: vec![0],
                target_index: 0,
            })
        );
    }

    #[test]
    fn test_odd_index_defers() {
        let transcript = alternating(2);
        assert_eq!(plan_unit(1, &transcript, PairingPolicy::default()), UnitPlan::Defer);
    }

    #[test]
    fn test_even_index_pairs_with_predecessor() {
        // Turns: 0 user, 1 character, 2 user. The pair is {1, 2}.
        let transcript = alternating(3);
        let plan = plan_unit(2, &transcript, PairingPolicy::default());

        let UnitPlan::Ready(unit) = plan else {
            panic!("expected a ready unit");
        };
        assert_eq!(unit.source_indices, vec![1, 2]);
        // Link-to-non-user files under the character turn, index 1.
        assert_eq!(unit.target_index, 1);
    }

    #[test]
    fn test_link_to_user_files_under_user_turn() {
        let transcript = alternating(3);
        let policy = PairingPolicy {
            pair_messages: true,
            link_to_non_user: false,
        };
        let UnitPlan::Ready(unit) = plan_unit(2, &transcript, policy) else {
            panic!("expected a ready unit");
        };
        assert_eq!(unit.target_index, 2);
    }

    #[test]
    fn test_pairing_disabled_every_index_alone() {
        let transcript = alternating(3);
        let policy = PairingPolicy {
            pair_messages: false,
            link_to_non_user: true,
        };
        for index in 0..3 {
            let UnitPlan::Ready(unit) = plan_unit(index, &transcript, policy) else {
                panic!("expected a ready unit for {index}");
            };
            assert_eq!(unit.source_indices, vec![index]);
            assert_eq!(unit.target_index, index);
        }
    }

    #[test]
    fn test_blank_source_turn_invalidates_unit() {
        let transcript = transcript_of(vec![
            Turn::user("opening"),
            Turn::character("Ann", "   "),
            Turn::user("follow-up"),
        ]);
        assert_eq!(
            plan_unit(2, &transcript, PairingPolicy::default()),
            UnitPlan::Invalid
        );
    }

    #[test]
    fn test_missing_turn_invalidates_unit() {
        let transcript = alternating(1);
        assert_eq!(
            plan_unit(2, &transcript, PairingPolicy::default()),
            UnitPlan::Invalid
        );
    }

    #[test]
    fn test_same_classification_falls_back_to_later_index() {
        // Two consecutive user turns: neither is non-user, so the later
        // index wins under link-to-non-user.
        let transcript = transcript_of(vec![
            Turn::user("zero"),
            Turn::user("one"),
            Turn::user("two"),
        ]);
        let UnitPlan::Ready(unit) = plan_unit(2, &transcript, PairingPolicy::default()) else {
            panic!("expected a ready unit");
        };
        assert_eq!(unit.target_index, 2);
    }

    #[test]
    fn test_pair_partner() {
        let policy = PairingPolicy::default();
        assert_eq!(pair_partner(0, policy), None);
        assert_eq!(pair_partner(1, policy), Some(2));
        assert_eq!(pair_partner(2, policy), Some(1));
        assert_eq!(pair_partner(5, policy), Some(6));

        let unpaired = PairingPolicy {
            pair_messages: false,
            link_to_non_user: true,
        };
        assert_eq!(pair_partner(2, unpaired), None);
    }
}
