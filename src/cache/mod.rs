//! Result cache keyed by job id, indexed by submission fingerprint
//!
//! Entries are pinned while their job runs and become evictable once the
//! job completes. Least-recently-used completed entries are evicted first.
//! A poisoned lock is reported as an internal fault rather than recovered,
//! since a torn entry cannot be trusted.

use crate::config::types::{CompileOptions, HubError, Language, Result};
use crate::core::types::{CompileJob, JobId, JobMode, StageRecord};
use crate::graph::VisualizationGraph;
use crate::observability::audit::events;
use crate::observability::metrics::get_metrics;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// SHA-256 over everything that determines a job's result
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        language: Language,
        mode: JobMode,
        options: &CompileOptions,
        source: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(language.as_str());
        hasher.update([0]);
        hasher.update(mode.as_str());
        hasher.update([0]);
        hasher.update(options.optimization.as_str());
        hasher.update([options.debug as u8, 0]);
        hasher.update(source.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn for_job(job: &CompileJob) -> Self {
        Self::compute(job.language, job.mode, &job.options, &job.source_code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything retained about a finished job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletedJob {
    pub job: CompileJob,
    pub records: Vec<StageRecord>,
    pub graph: VisualizationGraph,
    /// Orchestration failure; when set the records are not trusted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Whether identical submissions may be answered with this result
    pub reusable: bool,
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<CompletedJob>),
    /// An identical job is still running
    InFlight(JobId),
    Miss,
}

#[derive(Debug)]
enum Slot {
    Running,
    Done(Arc<CompletedJob>),
}

#[derive(Debug)]
struct Entry {
    fingerprint: Fingerprint,
    slot: Slot,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<JobId, Entry>,
    by_fingerprint: HashMap<Fingerprint, JobId>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self, job_id: &JobId) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(job_id) {
            entry.last_used = tick;
        }
    }

    fn least_recent_completed(&self) -> Option<JobId> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.slot, Slot::Done(_)))
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone())
    }

    fn remove(&mut self, job_id: &JobId) {
        if let Some(entry) = self.entries.remove(job_id) {
            if self.by_fingerprint.get(&entry.fingerprint) == Some(job_id) {
                self.by_fingerprint.remove(&entry.fingerprint);
            }
        }
    }
}

#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| HubError::Internal("result cache lock poisoned".to_string()))
    }

    /// Pin a job that is about to run. The fingerprint index points at the
    /// newest submission so later duplicates coalesce onto it.
    pub fn reserve(&self, fingerprint: Fingerprint, job_id: JobId) -> Result<()> {
        let mut inner = self.lock()?;
        inner.tick += 1;
        let last_used = inner.tick;
        inner.by_fingerprint.insert(fingerprint.clone(), job_id.clone());
        inner.entries.insert(
            job_id,
            Entry {
                fingerprint,
                slot: Slot::Running,
                last_used,
            },
        );
        Ok(())
    }

    /// Complete a job's entry, then evict down to capacity
    pub fn put(&self, fingerprint: Fingerprint, completed: CompletedJob) -> Result<()> {
        let job_id = completed.job.id.clone();
        let reusable = completed.reusable && completed.fault.is_none();
        let mut inner = self.lock()?;
        inner.tick += 1;
        let last_used = inner.tick;
        inner.entries.insert(
            job_id.clone(),
            Entry {
                fingerprint: fingerprint.clone(),
                slot: Slot::Done(Arc::new(completed)),
                last_used,
            },
        );
        if reusable {
            inner.by_fingerprint.insert(fingerprint, job_id);
        } else if inner.by_fingerprint.get(&fingerprint) == Some(&job_id) {
            inner.by_fingerprint.remove(&fingerprint);
        }

        while inner.entries.len() > self.capacity {
            let Some(victim) = inner.least_recent_completed() else {
                break;
            };
            inner.remove(&victim);
            get_metrics().cache_evictions.inc();
            events::cache_eviction(&victim);
        }
        Ok(())
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Lookup> {
        let mut inner = self.lock()?;
        let Some(job_id) = inner.by_fingerprint.get(fingerprint).cloned() else {
            return Ok(Lookup::Miss);
        };
        let found = match inner.entries.get(&job_id).map(|entry| &entry.slot) {
            Some(Slot::Running) => Lookup::InFlight(job_id.clone()),
            Some(Slot::Done(done)) if done.reusable && done.fault.is_none() => {
                Lookup::Hit(Arc::clone(done))
            }
            _ => Lookup::Miss,
        };
        if !matches!(found, Lookup::Miss) {
            inner.touch(&job_id);
        }
        Ok(found)
    }

    /// Completed result for a job id; `None` while running or once evicted
    pub fn get(&self, job_id: &JobId) -> Result<Option<Arc<CompletedJob>>> {
        let mut inner = self.lock()?;
        let done = match inner.entries.get(job_id).map(|entry| &entry.slot) {
            Some(Slot::Done(done)) => Some(Arc::clone(done)),
            _ => None,
        };
        if done.is_some() {
            inner.touch(job_id);
        }
        Ok(done)
    }

    /// The job record of a completed entry
    pub fn get_job(&self, job_id: &JobId) -> Result<Option<CompileJob>> {
        Ok(self.get(job_id)?.map(|done| done.job.clone()))
    }

    pub fn is_running(&self, job_id: &JobId) -> Result<bool> {
        let inner = self.lock()?;
        Ok(matches!(
            inner.entries.get(job_id).map(|entry| &entry.slot),
            Some(Slot::Running)
        ))
    }

    /// Drop a reservation whose job never ran
    pub fn release(&self, job_id: &JobId) -> Result<()> {
        let mut inner = self.lock()?;
        if matches!(inner.entries.get(job_id).map(|e| &e.slot), Some(Slot::Running)) {
            inner.remove(job_id);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::OptimizationLevel;
    use crate::core::types::JobStatus;

    fn job(source: &str) -> CompileJob {
        CompileJob::new(
            Language::Brainfuck,
            source.to_string(),
            CompileOptions::default(),
            JobMode::Compile,
        )
    }

    fn completed(job: CompileJob, reusable: bool) -> CompletedJob {
        CompletedJob {
            job,
            records: Vec::new(),
            graph: VisualizationGraph::default(),
            fault: None,
            reusable,
        }
    }

    #[test]
    fn test_fingerprint_covers_options_and_mode() {
        let base = Fingerprint::compute(Language::C, JobMode::Compile, &CompileOptions::default(), "x");
        assert_eq!(
            base,
            Fingerprint::compute(Language::C, JobMode::Compile, &CompileOptions::default(), "x")
        );
        let optimized = CompileOptions::new(OptimizationLevel::O2, false);
        assert_ne!(base, Fingerprint::compute(Language::C, JobMode::Compile, &optimized, "x"));
        let debug = CompileOptions::new(OptimizationLevel::O0, true);
        assert_ne!(base, Fingerprint::compute(Language::C, JobMode::Compile, &debug, "x"));
        assert_ne!(
            base,
            Fingerprint::compute(Language::C, JobMode::Analyze, &CompileOptions::default(), "x")
        );
        assert_ne!(
            base,
            Fingerprint::compute(Language::Cpp, JobMode::Compile, &CompileOptions::default(), "x")
        );
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn test_running_entry_coalesces_then_hits() {
        let cache = ResultCache::new(4);
        let job = job("+.");
        let fp = Fingerprint::for_job(&job);
        assert!(matches!(cache.lookup(&fp).unwrap(), Lookup::Miss));

        cache.reserve(fp.clone(), job.id.clone()).unwrap();
        match cache.lookup(&fp).unwrap() {
            Lookup::InFlight(id) => assert_eq!(id, job.id),
            other => panic!("expected in-flight, got {:?}", other),
        }
        assert!(cache.get(&job.id).unwrap().is_none());
        assert!(cache.is_running(&job.id).unwrap());

        let id = job.id.clone();
        cache.put(fp.clone(), completed(job, true)).unwrap();
        match cache.lookup(&fp).unwrap() {
            Lookup::Hit(done) => assert_eq!(done.job.id, id),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_unreusable_results_are_kept_by_id_only() {
        let cache = ResultCache::new(4);
        let mut cancelled = job("+.");
        cancelled.transition(JobStatus::Failed).unwrap();
        let fp = Fingerprint::for_job(&cancelled);
        let id = cancelled.id.clone();
        cache.reserve(fp.clone(), id.clone()).unwrap();
        cache.put(fp.clone(), completed(cancelled, false)).unwrap();

        assert!(matches!(cache.lookup(&fp).unwrap(), Lookup::Miss));
        assert_eq!(cache.get_job(&id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_eviction_skips_running_entries() {
        let cache = ResultCache::new(2);
        let running = job("running");
        let running_fp = Fingerprint::for_job(&running);
        cache.reserve(running_fp, running.id.clone()).unwrap();

        let mut done_ids = Vec::new();
        for source in ["a", "b", "c"] {
            let job = job(source);
            done_ids.push(job.id.clone());
            let fp = Fingerprint::for_job(&job);
            cache.put(fp, completed(job, true)).unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.is_running(&running.id).unwrap());
        assert!(cache.get(&done_ids[0]).unwrap().is_none());
        assert!(cache.get(&done_ids[1]).unwrap().is_none());
        assert!(cache.get(&done_ids[2]).unwrap().is_some());
    }

    #[test]
    fn test_access_refreshes_recency() {
        let cache = ResultCache::new(2);
        let first = job("first");
        let second = job("second");
        let third = job("third");
        let (a, b, c) = (first.id.clone(), second.id.clone(), third.id.clone());
        cache.put(Fingerprint::for_job(&first), completed(first, true)).unwrap();
        cache.put(Fingerprint::for_job(&second), completed(second, true)).unwrap();
        assert!(cache.get(&a).unwrap().is_some());
        cache.put(Fingerprint::for_job(&third), completed(third, true)).unwrap();

        assert!(cache.get(&a).unwrap().is_some());
        assert!(cache.get(&b).unwrap().is_none());
        assert!(cache.get(&c).unwrap().is_some());
    }

    #[test]
    fn test_release_drops_reservation() {
        let cache = ResultCache::new(2);
        let job = job("x");
        let fp = Fingerprint::for_job(&job);
        cache.reserve(fp.clone(), job.id.clone()).unwrap();
        cache.release(&job.id).unwrap();
        assert!(cache.is_empty());
        assert!(matches!(cache.lookup(&fp).unwrap(), Lookup::Miss));
    }
}
