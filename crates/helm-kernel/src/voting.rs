//! VotingEngine: thresholds, quorum and proposal resolution.
//!
//! Resolution is a pure function of the tallies, the number of eligible
//! voters who have not voted yet, and whether the deadline has passed.
//! Ties always reject.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Support required for approval, measured against cast votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// More votes for than against.
    #[default]
    SimpleMajority,
    /// Votes for must strictly exceed `numerator / denominator` of cast votes.
    Fraction { numerator: u32, denominator: u32 },
    /// At least this many votes for, and more for than against.
    Count(u32),
}

impl Threshold {
    /// Returns true if the tallies meet the threshold.
    pub fn is_met(&self, votes_for: u32, votes_against: u32) -> bool {
        let yes = u64::from(votes_for);
        let no = u64::from(votes_against);

        match *self {
            Threshold::SimpleMajority => yes > no,
            Threshold::Fraction {
                numerator,
                denominator,
            } => yes * u64::from(denominator) > (yes + no) * u64::from(numerator),
            Threshold::Count(required) => yes >= u64::from(required) && yes > no,
        }
    }

    /// Checks the threshold can ever be met.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Threshold::SimpleMajority => Ok(()),
            Threshold::Fraction {
                numerator,
                denominator,
            } => {
                if denominator == 0 {
                    Err("threshold denominator must be non-zero".to_string())
                } else if numerator >= denominator {
                    Err(format!(
                        "threshold {numerator}/{denominator} can never be exceeded"
                    ))
                } else {
                    Ok(())
                }
            }
            Threshold::Count(0) => Err("threshold count must be at least 1".to_string()),
            Threshold::Count(_) => Ok(()),
        }
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Threshold::SimpleMajority => f.write_str("simple majority"),
            Threshold::Fraction {
                numerator,
                denominator,
            } => write!(f, "more than {numerator}/{denominator}"),
            Threshold::Count(n) => write!(f, "at least {n} votes"),
        }
    }
}

impl FromStr for Threshold {
    type Err = String;

    /// Parses `majority`, `N/D` (fraction) or `count:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let threshold = if s.eq_ignore_ascii_case("majority")
            || s.eq_ignore_ascii_case("simple_majority")
            || s.eq_ignore_ascii_case("simple-majority")
        {
            Threshold::SimpleMajority
        } else if let Some((numerator, denominator)) = s.split_once('/') {
            Threshold::Fraction {
                numerator: numerator
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid threshold numerator in '{s}'"))?,
                denominator: denominator
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid threshold denominator in '{s}'"))?,
            }
        } else if let Some(count) = s.strip_prefix("count:") {
            Threshold::Count(
                count
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid threshold count in '{s}'"))?,
            )
        } else {
            return Err(format!(
                "invalid threshold '{s}': expected 'majority', 'N/D' or 'count:N'"
            ));
        };

        threshold.validate()?;
        Ok(threshold)
    }
}

/// Outcome of evaluating a proposal's votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    /// The remaining voters could still swing the result.
    Undecided,
}

/// Decides a proposal.
///
/// After the deadline the cast votes are final. Before it, a decision is
/// only returned if no combination of the `outstanding` votes can change it.
pub fn decide(
    threshold: Threshold,
    quorum: u32,
    votes_for: u32,
    votes_against: u32,
    outstanding: u32,
    deadline_passed: bool,
) -> Decision {
    let cast = votes_for.saturating_add(votes_against);

    if deadline_passed {
        return if cast >= quorum && threshold.is_met(votes_for, votes_against) {
            Decision::Approved
        } else {
            Decision::Rejected
        };
    }

    // Worst case for approval: every outstanding voter votes against.
    let against_worst = votes_against.saturating_add(outstanding);
    if cast >= quorum && threshold.is_met(votes_for, against_worst) {
        return Decision::Approved;
    }

    // Best case for approval: every outstanding voter votes for.
    let for_best = votes_for.saturating_add(outstanding);
    let quorum_reachable = cast.saturating_add(outstanding) >= quorum;
    if !quorum_reachable || !threshold.is_met(for_best, votes_against) {
        return Decision::Rejected;
    }

    Decision::Undecided
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(Threshold::SimpleMajority, 2, 1, true; "majority two to one")]
    #[test_case(Threshold::SimpleMajority, 1, 1, false; "majority tie")]
    #[test_case(Threshold::SimpleMajority, 0, 0, false; "no votes")]
    #[test_case(Threshold::Fraction { numerator: 2, denominator: 3 }, 2, 1, false; "two thirds exactly is not exceeded")]
    #[test_case(Threshold::Fraction { numerator: 2, denominator: 3 }, 3, 1, true; "three quarters exceeds two thirds")]
    #[test_case(Threshold::Count(3), 3, 0, true; "count reached")]
    #[test_case(Threshold::Count(3), 2, 0, false; "count missed")]
    #[test_case(Threshold::Count(1), 2, 2, false; "count reached but tied")]
    fn threshold_arithmetic(threshold: Threshold, yes: u32, no: u32, met: bool) {
        assert_eq!(threshold.is_met(yes, no), met);
    }

    #[test_case(Threshold::Fraction { numerator: 1, denominator: 0 }; "zero denominator")]
    #[test_case(Threshold::Fraction { numerator: 3, denominator: 3 }; "unanimous plus")]
    #[test_case(Threshold::Count(0); "zero count")]
    fn impossible_thresholds_fail_validation(threshold: Threshold) {
        assert!(threshold.validate().is_err());
    }

    #[test_case("majority", Threshold::SimpleMajority)]
    #[test_case("2/3", Threshold::Fraction { numerator: 2, denominator: 3 })]
    #[test_case("count:4", Threshold::Count(4))]
    fn thresholds_parse(input: &str, expected: Threshold) {
        assert_eq!(input.parse::<Threshold>().unwrap(), expected);
    }

    #[test]
    fn unparseable_thresholds_are_rejected() {
        assert!("most".parse::<Threshold>().is_err());
        assert!("3/2".parse::<Threshold>().is_err());
        assert!("count:0".parse::<Threshold>().is_err());
    }

    #[test]
    fn early_decision_waits_while_outstanding_votes_matter() {
        // 1 for, 0 against, 2 outstanding: 1 vs 2 possible
        assert_eq!(
            decide(Threshold::SimpleMajority, 0, 1, 0, 2, false),
            Decision::Undecided
        );
        // 2 for, 0 against, 1 outstanding: cannot lose
        assert_eq!(
            decide(Threshold::SimpleMajority, 0, 2, 0, 1, false),
            Decision::Approved
        );
        // 0 for, 2 against, 1 outstanding: cannot win
        assert_eq!(
            decide(Threshold::SimpleMajority, 0, 0, 2, 1, false),
            Decision::Rejected
        );
    }

    #[test]
    fn unreachable_quorum_rejects_early() {
        assert_eq!(
            decide(Threshold::SimpleMajority, 5, 2, 0, 1, false),
            Decision::Rejected
        );
    }

    #[test]
    fn quorum_applies_after_deadline() {
        assert_eq!(
            decide(Threshold::SimpleMajority, 3, 2, 0, 5, true),
            Decision::Rejected
        );
        assert_eq!(
            decide(Threshold::SimpleMajority, 3, 2, 1, 5, true),
            Decision::Approved
        );
    }

    proptest! {
        #[test]
        fn ties_always_reject(votes in 0u32..1000, quorum in 0u32..10) {
            prop_assert_eq!(
                decide(Threshold::SimpleMajority, quorum, votes, votes, 0, true),
                Decision::Rejected
            );
        }

        #[test]
        fn early_decisions_agree_with_every_completion(
            yes in 0u32..10,
            no in 0u32..10,
            outstanding in 0u32..6,
            quorum in 0u32..12,
        ) {
            let early = decide(Threshold::SimpleMajority, quorum, yes, no, outstanding, false);
            if early == Decision::Undecided {
                return Ok(());
            }

            // However the outstanding voters split (or abstain), the final
            // result matches the early one.
            for extra_yes in 0..=outstanding {
                for extra_no in 0..=(outstanding - extra_yes) {
                    let last = decide(
                        Threshold::SimpleMajority,
                        quorum,
                        yes + extra_yes,
                        no + extra_no,
                        0,
                        true,
                    );
                    prop_assert_eq!(last, early);
                }
            }
        }
    }
}
