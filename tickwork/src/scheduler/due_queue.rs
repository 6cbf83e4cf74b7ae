// Ordered queue of scheduled jobs, earliest due time first

use crate::job::Job;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

type QueueKey = (DateTime<Utc>, u64);

/// Jobs waiting for their next execution.
///
/// Ordered by due time; jobs due at the same instant keep insertion order.
/// A job name appears at most once.
#[derive(Default)]
pub(crate) struct DueQueue {
    entries: BTreeMap<QueueKey, Job>,
    index: HashMap<String, QueueKey>,
    next_sequence: u64,
}

impl DueQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a job due at `due_at`, replacing any entry with the same name
    pub(crate) fn insert(&mut self, due_at: DateTime<Utc>, job: Job) {
        self.remove(job.name());

        let key = (due_at, self.next_sequence);
        self.next_sequence += 1;
        self.index.insert(job.name().to_string(), key);
        self.entries.insert(key, job);
    }

    /// Earliest entry without removing it
    pub(crate) fn peek(&self) -> Option<(DateTime<Utc>, &Job)> {
        self.entries
            .first_key_value()
            .map(|((due_at, _), job)| (*due_at, job))
    }

    pub(crate) fn pop_first(&mut self) -> Option<(DateTime<Utc>, Job)> {
        let ((due_at, _), job) = self.entries.pop_first()?;
        self.index.remove(job.name());
        Some((due_at, job))
    }

    /// Remove the entry of the job named `name`
    pub(crate) fn remove(&mut self, name: &str) -> Option<Job> {
        let key = self.index.remove(name)?;
        self.entries.remove(&key)
    }

    /// Remove every entry due strictly before `instant`
    pub(crate) fn drain_due_before(&mut self, instant: DateTime<Utc>) -> Vec<(DateTime<Utc>, Job)> {
        let mut drained = Vec::new();
        while let Some((due_at, _)) = self.peek() {
            if due_at >= instant {
                break;
            }
            if let Some(entry) = self.pop_first() {
                drained.push(entry);
            }
        }
        drained
    }

    /// Remove every entry in due order
    pub(crate) fn drain(&mut self) -> Vec<(DateTime<Utc>, Job)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|((due_at, _), job)| (due_at, job))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
