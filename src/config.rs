use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Workers silent for longer than this lose their frames.
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// How often the coordinator sweeps the registry for stale workers.
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 60 * 1000;

/// Frames are allocated up front, so a job's range is capped.
pub const DEFAULT_MAX_FRAMES_PER_JOB: u32 = 100_000;

/// Input scenes and rendered frames routinely exceed tonic's 4 MiB default.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    pub worker_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub max_jobs: usize,
    pub max_frames_per_job: u32,
    pub max_message_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            worker_timeout_ms: DEFAULT_WORKER_TIMEOUT_MS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            max_jobs: 10_000,
            max_frames_per_job: DEFAULT_MAX_FRAMES_PER_JOB,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_worker_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.worker_timeout_ms = timeout_ms;
        self
    }

    pub fn with_reap_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reap_interval_ms = interval_ms;
        self
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    /// Never zero; `tokio::time::interval` rejects a zero period.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

/// Exponential backoff used by the worker agent when polling for work and
/// when the coordinator cannot be reached.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Adds up to this fraction of the delay as random jitter.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Fixed, jitter-free delays. Handy in tests.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Coordinator URL, e.g. `http://127.0.0.1:50051`
    pub coordinator_url: String,
    pub worker_name: String,
    /// Interval between progress reports while a frame renders. Reports
    /// also keep the worker's lease alive.
    pub progress_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub backoff: BackoffConfig,
    /// Blender executable used by the default render backend.
    pub blender_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:50051".to_string(),
            worker_name: default_worker_name(),
            progress_interval_ms: 2_000,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 120_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            backoff: BackoffConfig::default(),
            blender_path: PathBuf::from("blender"),
        }
    }
}

impl AgentConfig {
    pub fn new(coordinator_url: impl Into<String>, worker_name: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into(),
            worker_name: worker_name.into(),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_progress_interval_ms(mut self, interval_ms: u64) -> Self {
        self.progress_interval_ms = interval_ms;
        self
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// `worker-<8 hex chars>`, unique enough to avoid name clashes between
/// agents started without an explicit name.
pub fn default_worker_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:50051");
        assert_eq!(cfg.worker_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.reap_interval(), Duration::from_secs(60));
        assert_eq!(cfg.max_jobs, 10_000);
        assert_eq!(cfg.max_frames_per_job, 100_000);
        assert_eq!(cfg.max_message_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn coordinator_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = CoordinatorConfig::new(addr)
            .with_worker_timeout_ms(1_000)
            .with_reap_interval_ms(50);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.worker_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.reap_interval(), Duration::from_millis(50));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let cfg = CoordinatorConfig::default().with_reap_interval_ms(0);
        assert_eq!(cfg.reap_interval(), Duration::from_millis(1));

        let cfg = AgentConfig::new("http://127.0.0.1:1", "a").with_progress_interval_ms(0);
        assert_eq!(cfg.progress_interval(), Duration::from_millis(1));
    }

    #[test]
    fn backoff_config_fixed_has_no_growth() {
        let cfg = BackoffConfig::fixed(10);
        assert_eq!(cfg.initial_delay_ms, 10);
        assert_eq!(cfg.max_delay_ms, 10);
        assert_eq!(cfg.jitter, 0.0);
    }

    #[test]
    fn agent_config_new() {
        let cfg = AgentConfig::new("http://10.0.0.2:50051", "node-a");
        assert_eq!(cfg.coordinator_url, "http://10.0.0.2:50051");
        assert_eq!(cfg.worker_name, "node-a");
        assert_eq!(cfg.progress_interval(), Duration::from_secs(2));
        assert_eq!(cfg.blender_path, PathBuf::from("blender"));
    }

    #[test]
    fn default_worker_names_are_distinct() {
        let a = default_worker_name();
        let b = default_worker_name();
        assert!(a.starts_with("worker-"));
        assert_eq!(a.len(), "worker-".len() + 8);
        assert_ne!(a, b);
    }
}
