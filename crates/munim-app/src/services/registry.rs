//! Candidate model bookkeeping: priority selection, failure accounting,
//! administrative reset.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

/// One callable model backend variant. A candidate is available while its
/// consecutive hard-failure count stays below the failure limit.
#[derive(Debug, Clone)]
pub struct ModelCandidate {
    id: String,
    display_name: String,
    rank: u8,
    failures: u32,
    failure_limit: u32,
    last_error: Option<String>,
}

impl ModelCandidate {
    fn new(id: &str, display_name: &str, rank: u8, failure_limit: u32) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            rank,
            failures: 0,
            failure_limit,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_available(&self) -> bool {
        self.failures < self.failure_limit
    }
}

/// How a dispatch failure affects candidate health. Safety blocks are
/// per-request artifacts and never count toward the failure threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Hard,
    SafetyBlock,
}

/// Identity of the candidate picked for one dispatch, detached from the
/// registry so no lock is held across the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedModel {
    pub id: String,
    pub display_name: String,
}

pub struct ModelRegistry {
    candidates: Vec<ModelCandidate>,
}

impl ModelRegistry {
    /// Builds the registry from `(id, display name)` pairs; position in the
    /// chain becomes the priority rank.
    pub fn from_chain(chain: &[(&str, &str)], failure_limit: u32) -> Self {
        let candidates = chain
            .iter()
            .enumerate()
            .map(|(rank, (id, display_name))| {
                ModelCandidate::new(id, display_name, rank as u8, failure_limit)
            })
            .collect();
        Self { candidates }
    }

    /// Registry with a single caller-pinned candidate.
    pub fn single(id: &str, failure_limit: u32) -> Self {
        Self {
            candidates: vec![ModelCandidate::new(id, id, 0, failure_limit)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn available_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|candidate| candidate.is_available())
            .count()
    }

    /// Highest-priority available candidate, ties broken by lowest failure
    /// count.
    pub fn select(&self) -> Option<SelectedModel> {
        self.select_excluding(&BTreeSet::new())
    }

    /// Like [`select`](Self::select), skipping ids already escalated past
    /// within the current logical invocation.
    pub fn select_excluding(&self, excluded: &BTreeSet<String>) -> Option<SelectedModel> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.is_available() && !excluded.contains(&candidate.id))
            .min_by_key(|candidate| (candidate.rank, candidate.failures))
            .map(|candidate| SelectedModel {
                id: candidate.id.clone(),
                display_name: candidate.display_name.clone(),
            })
    }

    pub fn record_failure(&mut self, id: &str, kind: FailureKind, reason: &str) {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) else {
            warn!(model = id, "failure reported for unknown candidate");
            return;
        };
        candidate.last_error = Some(reason.to_string());
        if kind == FailureKind::Hard {
            candidate.failures += 1;
            if !candidate.is_available() {
                warn!(
                    model = %candidate.id,
                    failures = candidate.failures,
                    limit = candidate.failure_limit,
                    "candidate taken out of rotation"
                );
            }
        }
    }

    /// Success leaves the failure counter untouched; only an explicit reset
    /// clears accumulated failures.
    pub fn record_success(&mut self, id: &str) {
        debug!(model = id, "candidate call succeeded");
    }

    /// Clears every candidate's failure state and restores availability.
    pub fn reset_all(&mut self) {
        for candidate in &mut self.candidates {
            candidate.failures = 0;
            candidate.last_error = None;
        }
        info!(candidates = self.candidates.len(), "model registry reset");
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            available: self.available_count(),
            total: self.candidates.len(),
            candidates: self
                .candidates
                .iter()
                .map(|candidate| CandidateStatus {
                    id: candidate.id.clone(),
                    display_name: candidate.display_name.clone(),
                    rank: candidate.rank,
                    available: candidate.is_available(),
                    failures: candidate.failures,
                    failure_limit: candidate.failure_limit,
                    last_error: candidate.last_error.clone(),
                })
                .collect(),
        }
    }
}

/// Read-only registry view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub available: usize,
    pub total: usize,
    pub candidates: Vec<CandidateStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateStatus {
    pub id: String,
    pub display_name: String,
    pub rank: u8,
    pub available: bool,
    pub failures: u32,
    pub failure_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_chain(&[("m-a", "Model A"), ("m-b", "Model B")], 3)
    }

    #[test]
    fn selects_highest_priority_available() {
        let registry = registry();
        let selected = registry.select().expect("candidate available");
        assert_eq!(selected.id, "m-a");
    }

    #[test]
    fn hard_failures_disable_at_threshold() {
        let mut registry = registry();
        for _ in 0..3 {
            registry.record_failure("m-a", FailureKind::Hard, "quota");
        }
        assert_eq!(registry.available_count(), 1);
        let selected = registry.select().expect("fallback candidate");
        assert_eq!(selected.id, "m-b");
    }

    #[test]
    fn ties_break_on_lowest_failure_count() {
        let mut registry = ModelRegistry::from_chain(&[("m-a", "A"), ("m-b", "B")], 3);
        // Equal rank forces the failure-count tiebreak.
        registry.candidates[1].rank = 0;
        registry.record_failure("m-a", FailureKind::Hard, "boom");
        let selected = registry.select().expect("candidate available");
        assert_eq!(selected.id, "m-b");
    }

    #[test]
    fn safety_blocks_never_reach_the_threshold() {
        let mut registry = registry();
        for _ in 0..20 {
            registry.record_failure("m-a", FailureKind::SafetyBlock, "blocked");
        }
        assert!(registry.select().is_some_and(|m| m.id == "m-a"));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.candidates[0].failures, 0);
        assert_eq!(snapshot.candidates[0].last_error.as_deref(), Some("blocked"));
    }

    #[test]
    fn success_does_not_clear_failures() {
        let mut registry = registry();
        registry.record_failure("m-a", FailureKind::Hard, "boom");
        registry.record_success("m-a");
        assert_eq!(registry.snapshot().candidates[0].failures, 1);
    }

    #[test]
    fn reset_restores_every_candidate() {
        let mut registry = registry();
        for _ in 0..3 {
            registry.record_failure("m-a", FailureKind::Hard, "boom");
            registry.record_failure("m-b", FailureKind::Hard, "boom");
        }
        assert_eq!(registry.available_count(), 0);
        registry.reset_all();
        assert_eq!(registry.available_count(), 2);
        assert!(registry.snapshot().candidates[0].last_error.is_none());
    }

    #[test]
    fn excluded_candidates_are_skipped() {
        let registry = registry();
        let excluded = BTreeSet::from(["m-a".to_string()]);
        let selected = registry.select_excluding(&excluded).expect("second candidate");
        assert_eq!(selected.id, "m-b");
        let all = BTreeSet::from(["m-a".to_string(), "m-b".to_string()]);
        assert!(registry.select_excluding(&all).is_none());
    }
}
