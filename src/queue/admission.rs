use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::queue::job::{JobId, JobPriority, JobRequest, QueuedEntry};

const DEFAULT_MAX_PENDING: usize = 1000;

/// Outcome of an enqueue attempt.
#[derive(Debug)]
pub enum Admission {
    /// The owner had a free slot; the entry holds it and work may begin
    /// immediately.
    Dispatched(QueuedEntry),
    /// The owner is at capacity; the entry was parked at the given 1-based
    /// pending position.
    Queued { position: usize },
    /// The pending collection is full.
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserQueueStats {
    pub pending: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub per_user: HashMap<String, UserQueueStats>,
}

#[derive(Debug)]
struct InFlight {
    owner_id: String,
    dispatched_at: Instant,
}

/// Per-user admission control over pending generation requests.
///
/// Pending entries are kept sorted by `(priority desc, queued_at asc)`;
/// submission retries are the one exception, re-inserted at the head of the
/// collection (see [`AdmissionQueue::requeue_retry`]). The in-flight set is
/// keyed by job id, and per-user counts are derived from it, so releasing a
/// slot twice for the same job is a no-op.
#[derive(Debug)]
pub struct AdmissionQueue {
    pending: VecDeque<QueuedEntry>,
    in_flight: HashMap<JobId, InFlight>,
    max_concurrent_per_user: usize,
    max_pending: usize,
}

impl AdmissionQueue {
    pub fn new(max_concurrent_per_user: usize) -> Self {
        Self::with_capacity(max_concurrent_per_user, DEFAULT_MAX_PENDING)
    }

    pub fn with_capacity(max_concurrent_per_user: usize, max_pending: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            max_concurrent_per_user,
            max_pending,
        }
    }

    /// Admit the request immediately if its owner has a free slot, otherwise
    /// park it in the pending collection.
    pub fn enqueue(&mut self, request: JobRequest, priority: JobPriority) -> Admission {
        if self.in_flight_for(&request.owner_id) < self.max_concurrent_per_user {
            let entry = QueuedEntry::new(request, priority);
            self.mark_in_flight(&entry);
            return Admission::Dispatched(entry);
        }
        if self.pending.len() >= self.max_pending {
            return Admission::Rejected;
        }
        let index = self.insert_sorted(QueuedEntry::new(request, priority));
        Admission::Queued { position: index + 1 }
    }

    /// Remove and return the first pending entry whose owner is below the
    /// concurrency cap, marking it in flight. Returns `None` when the queue
    /// is empty or every owner with pending work is at capacity.
    pub fn next_admissible(&mut self) -> Option<QueuedEntry> {
        let index = self
            .pending
            .iter()
            .position(|e| self.in_flight_for(e.owner_id()) < self.max_concurrent_per_user)?;
        let entry = self.pending.remove(index)?;
        self.mark_in_flight(&entry);
        Some(entry)
    }

    /// Re-insert a submission retry at the head of the pending collection.
    /// Head placement biases dispatch toward the job that just failed, ahead
    /// of older entries in the normal-priority band.
    pub fn requeue_retry(&mut self, entry: QueuedEntry) {
        self.pending.push_front(entry);
    }

    /// Free the admission slot held by `job_id`. Returns `false` if the job
    /// was not in flight, making duplicate terminal transitions no-ops.
    pub fn release(&mut self, job_id: &JobId) -> bool {
        self.in_flight.remove(job_id).is_some()
    }

    /// Remove a pending entry, if it is still pending and owned by the
    /// caller. Dispatched entries cannot be cancelled here.
    pub fn cancel(&mut self, job_id: &JobId, owner_id: &str) -> Option<QueuedEntry> {
        let index = self
            .pending
            .iter()
            .position(|e| e.job_id() == *job_id && e.owner_id() == owner_id)?;
        self.pending.remove(index)
    }

    /// 1-based pending rank, or 0 if the job is not pending (dispatched or
    /// unknown).
    pub fn position(&self, job_id: &JobId) -> usize {
        self.pending
            .iter()
            .position(|e| e.job_id() == *job_id)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> QueueStats {
        let mut per_user: HashMap<String, UserQueueStats> = HashMap::new();
        for entry in &self.pending {
            per_user.entry(entry.owner_id().to_string()).or_default().pending += 1;
        }
        for in_flight in self.in_flight.values() {
            per_user
                .entry(in_flight.owner_id.clone())
                .or_default()
                .in_flight += 1;
        }
        QueueStats {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            per_user,
        }
    }

    /// In-flight entries older than `max_age`, as `(job_id, owner_id)`
    /// pairs. Input for the stuck-entry sweep.
    pub fn stuck_in_flight(&self, max_age: Duration) -> Vec<(JobId, String)> {
        self.in_flight
            .iter()
            .filter(|(_, f)| f.dispatched_at.elapsed() >= max_age)
            .map(|(id, f)| (*id, f.owner_id.clone()))
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn in_flight_for(&self, owner_id: &str) -> usize {
        self.in_flight
            .values()
            .filter(|f| f.owner_id == owner_id)
            .count()
    }

    fn mark_in_flight(&mut self, entry: &QueuedEntry) {
        self.in_flight.insert(
            entry.job_id(),
            InFlight {
                owner_id: entry.owner_id().to_string(),
                dispatched_at: Instant::now(),
            },
        );
    }

    // New entries carry the latest queued_at, so within a priority band they
    // belong at the end.
    fn insert_sorted(&mut self, entry: QueuedEntry) -> usize {
        let index = self
            .pending
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, entry);
        index
    }
}
