//! Selection of the jobs a batch actually runs.

use std::collections::{BTreeSet, HashSet};

use rssformula_core::{FormulaId, JobCandidate, JobKey};
use rssformula_infra::Membership;

/// Outcome of planning one batch.
///
/// Every list keeps candidate order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub jobs_to_run: Vec<JobCandidate>,
    /// Candidate keys without a stored result.
    pub new_jobs: Vec<JobKey>,
    /// Candidate keys that already have a stored result.
    pub existing_jobs: Vec<JobKey>,
    /// Candidates dropped because an earlier one had the same key.
    pub duplicates: usize,
    existing: BTreeSet<JobKey>,
}

impl Plan {
    pub fn membership(&self, key: &JobKey) -> Membership {
        if self.existing.contains(key) {
            Membership::Existing
        } else {
            Membership::New
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs_to_run.is_empty()
    }
}

/// Pure planning over candidates and a snapshot of stored keys.
#[derive(Debug, Clone, Copy)]
pub struct JobPlanner {
    formula_id: FormulaId,
}

impl JobPlanner {
    pub fn new(formula_id: FormulaId) -> Self {
        Self { formula_id }
    }

    /// Distinct job keys of `candidates`, in order. This is exactly the set the
    /// result store is asked about.
    pub fn candidate_keys(&self, candidates: &[JobCandidate]) -> Vec<JobKey> {
        let mut seen = HashSet::with_capacity(candidates.len());
        candidates
            .iter()
            .map(|c| c.key(self.formula_id))
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Partition `candidates` against `existing_keys`. Stored keys that are not
    /// candidates are ignored.
    pub fn plan(
        &self,
        candidates: &[JobCandidate],
        existing_keys: &BTreeSet<JobKey>,
        reprocess_existing: bool,
    ) -> Plan {
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut plan = Plan::default();

        for candidate in candidates {
            let key = candidate.key(self.formula_id);
            if !seen.insert(key.clone()) {
                plan.duplicates += 1;
                continue;
            }

            let is_existing = existing_keys.contains(&key);
            if is_existing {
                plan.existing.insert(key.clone());
                plan.existing_jobs.push(key);
            } else {
                plan.new_jobs.push(key);
            }

            if reprocess_existing || !is_existing {
                plan.jobs_to_run.push(candidate.clone());
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rssformula_core::FilingId;

    const FORMULA: FormulaId = FormulaId::new(7);

    fn candidate(id: u64) -> JobCandidate {
        JobCandidate::new(FilingId::from(id), format!("https://example.test/{id}.xml"), false)
    }

    fn key(id: u64) -> JobKey {
        JobKey::new(FilingId::from(id), FORMULA)
    }

    #[test]
    fn skips_existing_unless_reprocessing() {
        let planner = JobPlanner::new(FORMULA);
        let candidates = vec![candidate(1), candidate(2), candidate(3)];
        let existing: BTreeSet<JobKey> = [key(2), key(99)].into_iter().collect();

        let plan = planner.plan(&candidates, &existing, false);
        assert_eq!(plan.new_jobs, vec![key(1), key(3)]);
        assert_eq!(plan.existing_jobs, vec![key(2)]);
        assert_eq!(plan.jobs_to_run.len(), 2);
        assert_eq!(plan.membership(&key(2)), Membership::Existing);
        assert_eq!(plan.membership(&key(1)), Membership::New);

        let plan = planner.plan(&candidates, &existing, true);
        assert_eq!(plan.jobs_to_run, candidates);
        assert_eq!(plan.existing_jobs, vec![key(2)]);
    }

    #[test]
    fn first_duplicate_wins() {
        let planner = JobPlanner::new(FORMULA);
        let mut dup = candidate(1);
        dup.url = "https://mirror.test/1.xml".into();
        let candidates = vec![candidate(1), candidate(2), dup];

        let plan = planner.plan(&candidates, &BTreeSet::new(), false);
        assert_eq!(plan.duplicates, 1);
        assert_eq!(plan.jobs_to_run, vec![candidate(1), candidate(2)]);
        assert_eq!(planner.candidate_keys(&candidates), vec![key(1), key(2)]);
    }

    proptest! {
        #[test]
        fn partition_is_complete_and_disjoint(
            ids in proptest::collection::vec(0u64..50, 0..40),
            stored in proptest::collection::btree_set(0u64..60, 0..30),
            reprocess in any::<bool>(),
        ) {
            let planner = JobPlanner::new(FORMULA);
            let candidates: Vec<_> = ids.iter().copied().map(candidate).collect();
            let existing: BTreeSet<JobKey> = stored.iter().copied().map(key).collect();

            let plan = planner.plan(&candidates, &existing, reprocess);

            let distinct: BTreeSet<JobKey> =
                planner.candidate_keys(&candidates).into_iter().collect();
            let new: BTreeSet<JobKey> = plan.new_jobs.iter().cloned().collect();
            let old: BTreeSet<JobKey> = plan.existing_jobs.iter().cloned().collect();

            prop_assert!(new.is_disjoint(&old));
            prop_assert_eq!(new.union(&old).cloned().collect::<BTreeSet<_>>(), distinct.clone());
            prop_assert!(old.is_subset(&existing));
            prop_assert_eq!(plan.duplicates, candidates.len() - distinct.len());
            if !reprocess {
                prop_assert!(plan.jobs_to_run.iter().all(|c| new.contains(&c.key(FORMULA))));
            }
        }

        #[test]
        fn planning_after_persisting_runs_nothing(
            ids in proptest::collection::vec(0u64..50, 1..40),
        ) {
            let planner = JobPlanner::new(FORMULA);
            let candidates: Vec<_> = ids.iter().copied().map(candidate).collect();

            let first = planner.plan(&candidates, &BTreeSet::new(), false);
            let stored: BTreeSet<JobKey> =
                first.jobs_to_run.iter().map(|c| c.key(FORMULA)).collect();
            let second = planner.plan(&candidates, &stored, false);

            prop_assert!(second.jobs_to_run.is_empty());
            prop_assert!(second.new_jobs.is_empty());
        }
    }
}
