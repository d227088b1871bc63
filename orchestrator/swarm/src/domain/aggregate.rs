// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Aggregation Strategies
//!
//! Deterministic reconciliation of a ballot's proposals into one
//! answer. Three strategies ship (majority vote, Borda count, and
//! weighted confidence) behind the [`Aggregator`] trait so a learned
//! aggregator can plug in without touching the coordinator.
//!
//! A strategy either decides or reports the candidates still tied
//! after its own tie-breaks; unresolved ties escalate to the arbiter
//! in the coordinator.

use std::collections::HashMap;
use std::time::Duration;

use kraken_core::domain::plan::AggregationStrategy;
use kraken_core::domain::worker::WorkerId;

use crate::domain::ballot::{AggregationOutcome, Proposal, SwarmBallot};

/// A candidate the strategy could not separate from its peers.
#[derive(Debug, Clone)]
pub struct TiedCandidate {
    pub payload: serde_json::Value,
    /// Credited proposer: the lowest-latency worker behind the payload.
    pub worker_id: WorkerId,
    pub latency: Duration,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub enum AggregationResult {
    Decided(AggregationOutcome),
    Tied(Vec<TiedCandidate>),
}

pub trait Aggregator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reconcile the ballot. `priors` carries each worker's historical
    /// accuracy (rolling success rate) from its registry record.
    fn aggregate(
        &self,
        ballot: &SwarmBallot,
        priors: &HashMap<WorkerId, f64>,
    ) -> AggregationResult;
}

/// Strategy lookup for a step's configured aggregation.
pub fn aggregator_for(strategy: AggregationStrategy) -> Box<dyn Aggregator> {
    match strategy {
        AggregationStrategy::MajorityVote => Box::new(MajorityVote),
        AggregationStrategy::BordaCount => Box::new(BordaCount),
        AggregationStrategy::WeightedConfidence => Box::new(WeightedConfidence),
    }
}

/// Prior applied to workers with no recorded history.
const DEFAULT_ACCURACY_PRIOR: f64 = 0.5;

// ============================================================================
// Shared bloc bookkeeping
// ============================================================================

/// Proposals grouped by exact payload equality.
struct Bloc<'a> {
    payload: &'a serde_json::Value,
    votes: usize,
    /// Lowest-latency proposer of this payload.
    best: &'a Proposal,
    combined_latency: Duration,
}

fn blocs(proposals: &[Proposal]) -> Vec<Bloc<'_>> {
    let mut grouped: Vec<Bloc<'_>> = Vec::new();
    for proposal in proposals {
        match grouped
            .iter_mut()
            .find(|bloc| *bloc.payload == proposal.payload)
        {
            Some(bloc) => {
                bloc.votes += 1;
                bloc.combined_latency += proposal.latency;
                if proposal.latency < bloc.best.latency {
                    bloc.best = proposal;
                }
            }
            None => grouped.push(Bloc {
                payload: &proposal.payload,
                votes: 1,
                best: proposal,
                combined_latency: proposal.latency,
            }),
        }
    }
    grouped
}

fn tied_candidate(bloc: &Bloc<'_>) -> TiedCandidate {
    TiedCandidate {
        payload: bloc.payload.clone(),
        worker_id: bloc.best.worker_id,
        latency: bloc.best.latency,
        confidence: bloc.best.confidence,
    }
}

fn decided(
    strategy: &'static str,
    bloc: &Bloc<'_>,
    confidence: f64,
) -> AggregationResult {
    AggregationResult::Decided(AggregationOutcome {
        payload: bloc.payload.clone(),
        confidence,
        strategy: strategy.to_string(),
        winner: bloc.best.worker_id,
        winner_latency: bloc.best.latency,
        tie_broken: false,
        reduced_confidence: false,
    })
}

// ============================================================================
// Majority vote
// ============================================================================

/// Exact payload equality; most frequent value wins; confidence is
/// votes over responders.
pub struct MajorityVote;

impl Aggregator for MajorityVote {
    fn name(&self) -> &'static str {
        "majority_vote"
    }

    fn aggregate(
        &self,
        ballot: &SwarmBallot,
        _priors: &HashMap<WorkerId, f64>,
    ) -> AggregationResult {
        let grouped = blocs(&ballot.proposals);
        let top_votes = grouped.iter().map(|b| b.votes).max().unwrap_or(0);
        let winners: Vec<&Bloc<'_>> =
            grouped.iter().filter(|b| b.votes == top_votes).collect();

        match winners.as_slice() {
            [single] => {
                let confidence = top_votes as f64 / ballot.responders() as f64;
                decided(self.name(), single, confidence)
            }
            several => AggregationResult::Tied(
                several.iter().map(|bloc| tied_candidate(bloc)).collect(),
            ),
        }
    }
}

// ============================================================================
// Borda count
// ============================================================================

/// Ranked-choice scoring: a ballot of `k` candidates awards `k-1-i`
/// points to rank position `i`; totals decide, with point ties broken
/// by lowest combined latency of the proposing workers.
pub struct BordaCount;

impl Aggregator for BordaCount {
    fn name(&self) -> &'static str {
        "borda_count"
    }

    fn aggregate(
        &self,
        ballot: &SwarmBallot,
        _priors: &HashMap<WorkerId, f64>,
    ) -> AggregationResult {
        struct Tally<'a> {
            payload: &'a serde_json::Value,
            points: usize,
            combined_latency: Duration,
            /// Lowest-latency proposal ranking this candidate.
            best: &'a Proposal,
        }

        let mut tallies: Vec<Tally<'_>> = Vec::new();
        for proposal in &ballot.proposals {
            // A worker without an explicit ranking casts a one-entry
            // ballot for its own payload.
            let own = std::slice::from_ref(&proposal.payload);
            let ranking: &[serde_json::Value] = proposal
                .ranking
                .as_deref()
                .unwrap_or(own);
            let k = ranking.len();
            for (position, candidate) in ranking.iter().enumerate() {
                let points = k - 1 - position;
                match tallies.iter_mut().find(|t| t.payload == candidate) {
                    Some(tally) => {
                        tally.points += points;
                        tally.combined_latency += proposal.latency;
                        if proposal.latency < tally.best.latency {
                            tally.best = proposal;
                        }
                    }
                    None => tallies.push(Tally {
                        payload: candidate,
                        points,
                        combined_latency: proposal.latency,
                        best: proposal,
                    }),
                }
            }
        }

        let top_points = tallies.iter().map(|t| t.points).max().unwrap_or(0);
        let mut leaders: Vec<&Tally<'_>> =
            tallies.iter().filter(|t| t.points == top_points).collect();

        if leaders.len() > 1 {
            // Point tie: lowest combined latency wins.
            let min_latency = leaders
                .iter()
                .map(|t| t.combined_latency)
                .min()
                .unwrap_or(Duration::ZERO);
            leaders.retain(|t| t.combined_latency == min_latency);
        }

        match leaders.as_slice() {
            [single] => {
                let total_points: usize = tallies.iter().map(|t| t.points).sum();
                let confidence = if total_points > 0 {
                    single.points as f64 / total_points as f64
                } else {
                    1.0 / ballot.responders().max(1) as f64
                };
                AggregationResult::Decided(AggregationOutcome {
                    payload: single.payload.clone(),
                    confidence,
                    strategy: self.name().to_string(),
                    winner: single.best.worker_id,
                    winner_latency: single.best.latency,
                    tie_broken: false,
                    reduced_confidence: false,
                })
            }
            several => AggregationResult::Tied(
                several
                    .iter()
                    .map(|tally| TiedCandidate {
                        payload: tally.payload.clone(),
                        worker_id: tally.best.worker_id,
                        latency: tally.best.latency,
                        confidence: tally.best.confidence,
                    })
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Weighted confidence
// ============================================================================

/// Self-reported confidence weighted by the worker's historical
/// accuracy prior; the highest weighted score wins.
pub struct WeightedConfidence;

impl Aggregator for WeightedConfidence {
    fn name(&self) -> &'static str {
        "weighted_confidence"
    }

    fn aggregate(
        &self,
        ballot: &SwarmBallot,
        priors: &HashMap<WorkerId, f64>,
    ) -> AggregationResult {
        let score = |proposal: &Proposal| {
            let prior = priors
                .get(&proposal.worker_id)
                .copied()
                .unwrap_or(DEFAULT_ACCURACY_PRIOR);
            proposal.confidence * prior
        };

        let grouped = blocs(&ballot.proposals);
        // A bloc scores as its strongest proposal; duplicates neither
        // stack nor dilute.
        let bloc_score = |bloc: &Bloc<'_>| {
            ballot
                .proposals
                .iter()
                .filter(|p| p.payload == *bloc.payload)
                .map(score)
                .fold(0.0_f64, f64::max)
        };

        let top_score = grouped.iter().map(|b| bloc_score(b)).fold(0.0_f64, f64::max);
        let winners: Vec<&Bloc<'_>> = grouped
            .iter()
            .filter(|b| (bloc_score(b) - top_score).abs() < f64::EPSILON)
            .collect();

        match winners.as_slice() {
            [single] => decided(self.name(), single, top_score.clamp(0.0, 1.0)),
            several => AggregationResult::Tied(
                several.iter().map(|bloc| tied_candidate(bloc)).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kraken_core::domain::plan::StepId;
    use kraken_core::domain::task::TaskId;
    use serde_json::json;

    fn proposal(
        payload: serde_json::Value,
        confidence: f64,
        latency_ms: u64,
    ) -> (WorkerId, Proposal) {
        let worker_id = WorkerId::new();
        (
            worker_id,
            Proposal {
                worker_id,
                payload,
                confidence,
                latency: Duration::from_millis(latency_ms),
                ranking: None,
            },
        )
    }

    fn ballot(proposals: Vec<Proposal>) -> SwarmBallot {
        let requested = proposals.len();
        let mut ballot = SwarmBallot::open(
            TaskId::new(),
            StepId::new(),
            Duration::from_secs(5),
            requested,
        );
        for p in proposals {
            ballot.record(p);
        }
        ballot
    }

    #[test]
    fn unanimous_majority_has_full_confidence() {
        let ballot = ballot(vec![
            proposal(json!("a"), 0.9, 10).1,
            proposal(json!("a"), 0.8, 20).1,
            proposal(json!("a"), 0.7, 30).1,
        ]);
        match MajorityVote.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Decided(outcome) => {
                assert_eq!(outcome.payload, json!("a"));
                assert!((outcome.confidence - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn two_of_three_majority_has_two_thirds_confidence() {
        let ballot = ballot(vec![
            proposal(json!("a"), 0.9, 10).1,
            proposal(json!("a"), 0.8, 20).1,
            proposal(json!("b"), 0.99, 5).1,
        ]);
        match MajorityVote.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Decided(outcome) => {
                assert_eq!(outcome.payload, json!("a"));
                assert!((outcome.confidence - 2.0 / 3.0).abs() < 1e-9);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn split_majority_reports_a_tie() {
        let ballot = ballot(vec![
            proposal(json!("a"), 0.9, 10).1,
            proposal(json!("b"), 0.9, 20).1,
        ]);
        match MajorityVote.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Tied(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected tie, got {other:?}"),
        }
    }

    #[test]
    fn borda_sums_rank_points() {
        // Two workers rank [a, b, c]; one ranks [b, a, c].
        // a: 2 + 2 + 1 = 5, b: 1 + 1 + 2 = 4, c: 0.
        let mut p1 = proposal(json!("a"), 0.9, 10).1;
        p1.ranking = Some(vec![json!("a"), json!("b"), json!("c")]);
        let mut p2 = proposal(json!("a"), 0.8, 20).1;
        p2.ranking = Some(vec![json!("a"), json!("b"), json!("c")]);
        let mut p3 = proposal(json!("b"), 0.7, 5).1;
        p3.ranking = Some(vec![json!("b"), json!("a"), json!("c")]);

        let ballot = ballot(vec![p1, p2, p3]);
        match BordaCount.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Decided(outcome) => {
                assert_eq!(outcome.payload, json!("a"));
                assert!((outcome.confidence - 5.0 / 9.0).abs() < 1e-9);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn borda_breaks_point_ties_by_combined_latency() {
        // Both candidates collect one point; "b"'s proposer was faster.
        let mut p1 = proposal(json!("a"), 0.9, 100).1;
        p1.ranking = Some(vec![json!("a"), json!("x")]);
        let mut p2 = proposal(json!("b"), 0.9, 10).1;
        p2.ranking = Some(vec![json!("b"), json!("y")]);

        let ballot = ballot(vec![p1, p2]);
        match BordaCount.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Decided(outcome) => {
                assert_eq!(outcome.payload, json!("b"));
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn weighted_confidence_uses_accuracy_priors() {
        let (veteran, p1) = proposal(json!("a"), 0.8, 10);
        let (rookie, p2) = proposal(json!("b"), 0.95, 10);

        let mut priors = HashMap::new();
        priors.insert(veteran, 0.95); // 0.8 * 0.95 = 0.76
        priors.insert(rookie, 0.4); // 0.95 * 0.4  = 0.38

        let ballot = ballot(vec![p1, p2]);
        match WeightedConfidence.aggregate(&ballot, &priors) {
            AggregationResult::Decided(outcome) => {
                assert_eq!(outcome.payload, json!("a"));
                assert!((outcome.confidence - 0.76).abs() < 1e-9);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn weighted_confidence_defaults_prior_for_unknown_workers() {
        let (_, p1) = proposal(json!("a"), 0.9, 10);
        let (_, p2) = proposal(json!("b"), 0.5, 10);

        let ballot = ballot(vec![p1, p2]);
        match WeightedConfidence.aggregate(&ballot, &HashMap::new()) {
            AggregationResult::Decided(outcome) => {
                // 0.9 * 0.5 beats 0.5 * 0.5.
                assert_eq!(outcome.payload, json!("a"));
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }
}
