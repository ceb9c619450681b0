use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{FarmError, Result};

/// Worker state tracking
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub name: String,
    pub last_contact: Instant,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerState {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            last_contact: Instant::now(),
            registered_at: now,
            last_seen: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_contact = Instant::now();
        self.last_seen = Utc::now();
    }

    /// A worker is stale once it has been silent for longer than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_contact) > timeout
    }
}

/// Tracks connected workers by name. Liveness is lease-based: every call a
/// worker makes refreshes its lease, and workers that fall silent are swept
/// out by the coordinator's reaper.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerState>,
    timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a worker. Names must be unique among active workers; a
    /// second registration under an active name is rejected even when it
    /// comes from the same process.
    pub fn register(&mut self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(FarmError::InvalidArgument(
                "worker name cannot be empty".to_string(),
            ));
        }
        if self.workers.contains_key(name) {
            return Err(FarmError::NameTaken(name.to_string()));
        }
        self.workers
            .insert(name.to_string(), WorkerState::new(name.to_string()));
        tracing::info!(worker = name, "Worker registered");
        Ok(())
    }

    /// Remove a worker. Returns false if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.workers.remove(name).is_some();
        if removed {
            tracing::info!(worker = name, "Worker unregistered");
        }
        removed
    }

    /// Refresh a worker's lease
    pub fn touch(&mut self, name: &str) -> Result<()> {
        self.workers
            .get_mut(name)
            .map(WorkerState::touch)
            .ok_or_else(|| FarmError::UnknownWorker(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&WorkerState> {
        self.workers.get(name)
    }

    /// All workers sorted by name
    pub fn all_workers(&self) -> Vec<&WorkerState> {
        let mut workers: Vec<&WorkerState> = self.workers.values().collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }

    /// Names of workers whose lease has expired at `now`
    pub fn stale_workers(&self, now: Instant) -> Vec<String> {
        self.workers
            .values()
            .filter(|w| w.is_stale(now, self.timeout))
            .map(|w| w.name.clone())
            .collect()
    }

    /// Remove every worker whose lease has expired at `now` and return
    /// their names. The caller is responsible for reclaiming their frames.
    pub fn remove_stale(&mut self, now: Instant) -> Vec<String> {
        let stale = self.stale_workers(now);
        for name in &stale {
            self.workers.remove(name);
            tracing::warn!(worker = %name, timeout_secs = self.timeout.as_secs(), "Worker timed out");
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
