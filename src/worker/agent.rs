use std::fmt;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::{FarmError, Result};
use crate::proto::JobDescriptor;
use crate::render::{RenderBackend, RenderRequest};
use crate::worker::backoff::Backoff;
use crate::worker::client::CoordinatorClient;

/// Where the agent is in the pull protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Registered,
    /// No open jobs; polling with backoff.
    Idle,
    HoldingJob,
    HoldingFrame,
    Rendering,
    /// Frame rendered, upload pending.
    Reporting,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Unregistered => "unregistered",
            AgentState::Registered => "registered",
            AgentState::Idle => "idle",
            AgentState::HoldingJob => "holding-job",
            AgentState::HoldingFrame => "holding-frame",
            AgentState::Rendering => "rendering",
            AgentState::Reporting => "reporting",
            AgentState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Counters returned when the agent stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSummary {
    pub registrations: u64,
    pub jobs_taken: u64,
    pub frames_rendered: u64,
    /// Frames abandoned because the coordinator gave them to someone else.
    pub frames_dropped: u64,
}

/// A render worker: registers with the coordinator, pulls frames one at a
/// time, renders them through `R` and uploads the results.
pub struct WorkerAgent<R> {
    config: AgentConfig,
    client: CoordinatorClient,
    backend: R,
    state: watch::Sender<AgentState>,
    job: Option<JobDescriptor>,
    frame: Option<u32>,
    rendered: Option<Vec<u8>>,
    retry: Backoff,
    idle: Backoff,
    summary: AgentSummary,
}

impl<R: RenderBackend> WorkerAgent<R> {
    pub fn new(config: AgentConfig, backend: R) -> Result<Self> {
        let client = CoordinatorClient::new(&config)?;
        let (state, _) = watch::channel(AgentState::Unregistered);

        Ok(Self {
            retry: Backoff::new(config.backoff.clone()),
            idle: Backoff::new(config.backoff.clone()),
            config,
            client,
            backend,
            state,
            job: None,
            frame: None,
            rendered: None,
            summary: AgentSummary::default(),
        })
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Observe state transitions while the agent runs.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    ///
    /// On shutdown the agent unregisters so its frame (if any) is reclaimed
    /// right away instead of after the lease timeout. A render failure also
    /// unregisters before the error is returned. A name clash is returned
    /// without unregistering, since the name belongs to another worker.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<AgentSummary> {
        tracing::info!(
            worker = %self.config.worker_name,
            coordinator = %self.config.coordinator_url,
            "Starting worker agent"
        );

        let result = self.run_loop(&shutdown).await;

        match result {
            Ok(()) => {
                self.leave().await;
                tracing::info!(worker = %self.config.worker_name, summary = ?self.summary, "Worker agent stopped");
                Ok(self.summary)
            }
            Err(e @ FarmError::NameTaken(_)) => {
                // A retried RegisterWorker whose first response was lost
                // lands here too. That registration lapses after the lease
                // timeout, so the same name works again after that.
                tracing::error!(
                    worker = %self.config.worker_name,
                    registrations = self.summary.registrations,
                    "Worker name already in use (possibly a registration whose reply was lost; it clears after the lease timeout)"
                );
                self.set_state(AgentState::Stopped);
                Err(e)
            }
            Err(e) => {
                tracing::error!(worker = %self.config.worker_name, error = %e, "Worker agent failed");
                self.leave().await;
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                outcome = self.step() => outcome,
            };

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    let delay = self.retry.next_delay();
                    tracing::warn!(
                        worker = %self.config.worker_name,
                        state = %self.state(),
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Coordinator unreachable, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(FarmError::UnknownWorker(_)) => {
                    tracing::warn!(worker = %self.config.worker_name, "Lease expired, registering again");
                    if self.frame.take().is_some() {
                        self.summary.frames_dropped += 1;
                    }
                    self.job = None;
                    self.rendered = None;
                    self.set_state(AgentState::Unregistered);
                }
                Err(FarmError::StaleClaim { job_id, index, .. }) => {
                    tracing::warn!(
                        worker = %self.config.worker_name,
                        job_id,
                        frame = index,
                        "Frame claimed by another worker, dropping it"
                    );
                    self.frame = None;
                    self.rendered = None;
                    self.summary.frames_dropped += 1;
                    self.set_state(AgentState::HoldingJob);
                }
                Err(FarmError::InvalidJob(job_id)) => {
                    tracing::warn!(worker = %self.config.worker_name, job_id, "Job no longer known");
                    self.job = None;
                    self.frame = None;
                    self.rendered = None;
                    self.set_state(AgentState::Registered);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Perform one transition of the state machine.
    async fn step(&mut self) -> Result<()> {
        match self.state() {
            AgentState::Unregistered => {
                let timeout = self.client.register().await?;
                self.retry.reset();
                self.summary.registrations += 1;
                tracing::info!(
                    worker = %self.config.worker_name,
                    lease_ms = timeout.as_millis() as u64,
                    "Registered with coordinator"
                );
                self.set_state(AgentState::Registered);
            }
            AgentState::Registered | AgentState::Idle => match self.client.request_job().await? {
                Some(job) => {
                    self.retry.reset();
                    self.idle.reset();
                    self.summary.jobs_taken += 1;
                    tracing::info!(
                        worker = %self.config.worker_name,
                        job_id = job.id,
                        start = job.start,
                        end = job.end,
                        renderer = %job.renderer,
                        "Picked up job"
                    );
                    self.job = Some(job);
                    self.set_state(AgentState::HoldingJob);
                }
                None => {
                    self.retry.reset();
                    self.set_state(AgentState::Idle);
                    let delay = self.idle.next_delay();
                    tracing::debug!(worker = %self.config.worker_name, wait_ms = delay.as_millis() as u64, "No open jobs");
                    tokio::time::sleep(delay).await;
                }
            },
            AgentState::HoldingJob => {
                let job_id = self.current_job()?.id;
                match self.client.request_frame(job_id).await? {
                    Some(index) => {
                        self.retry.reset();
                        tracing::info!(worker = %self.config.worker_name, job_id, frame = index, "Claimed frame");
                        self.frame = Some(index);
                        self.set_state(AgentState::HoldingFrame);
                    }
                    None => {
                        self.retry.reset();
                        tracing::debug!(worker = %self.config.worker_name, job_id, "No more frames in job");
                        self.job = None;
                        self.set_state(AgentState::Registered);
                    }
                }
            }
            AgentState::HoldingFrame | AgentState::Rendering => {
                self.set_state(AgentState::Rendering);
                let data = self.render_frame().await?;
                self.rendered = Some(data);
                self.set_state(AgentState::Reporting);
            }
            AgentState::Reporting => {
                let job_id = self.current_job()?.id;
                let index = self.current_frame()?;
                let data = self
                    .rendered
                    .clone()
                    .ok_or_else(|| FarmError::InvalidArgument("no rendered output to upload".into()))?;

                let job_complete = self.client.upload_frame(job_id, index, data).await?;
                self.retry.reset();
                self.summary.frames_rendered += 1;
                tracing::info!(
                    worker = %self.config.worker_name,
                    job_id,
                    frame = index,
                    job_complete,
                    "Uploaded frame"
                );
                self.rendered = None;
                self.frame = None;
                self.set_state(AgentState::HoldingJob);
            }
            AgentState::Stopped => {
                return Err(FarmError::InvalidArgument("agent already stopped".into()));
            }
        }
        Ok(())
    }

    /// Render the held frame, reporting progress on every interval tick.
    /// Returning early drops the render future, which cancels the render.
    async fn render_frame(&mut self) -> Result<Vec<u8>> {
        let job = self.current_job()?.clone();
        let index = self.current_frame()?;

        let request = RenderRequest {
            job_id: job.id,
            renderer: job.renderer.clone(),
            start_frame: job.start,
            frame_offset: index,
            input: job.file,
        };
        let frame_number = request.frame_number();
        tracing::info!(worker = %self.config.worker_name, job_id = job.id, frame = frame_number, "Rendering");

        let (tx, mut progress) = watch::channel(0u8);
        let render = self.backend.render(request, tx);
        tokio::pin!(render);

        let mut ticker = tokio::time::interval(self.config.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut render => {
                    let output = result.map_err(|e| match e {
                        FarmError::Render(_) => e,
                        other => FarmError::Render(other.to_string()),
                    })?;
                    tracing::debug!(
                        worker = %self.config.worker_name,
                        job_id = job.id,
                        frame = frame_number,
                        bytes = output.data.len(),
                        elapsed_ms = output.elapsed.as_millis() as u64,
                        "Render complete"
                    );
                    return Ok(output.data);
                }
                _ = ticker.tick() => {
                    let value = *progress.borrow_and_update();
                    match self.client.report_progress(job.id, index, value).await {
                        Ok(()) => {}
                        // Keep rendering; the next tick tries again
                        Err(e) if e.is_transient() => {
                            tracing::warn!(worker = %self.config.worker_name, job_id = job.id, frame = index, error = %e, "Progress report failed");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Best-effort unregistration on the way out.
    async fn leave(&mut self) {
        if self.state() != AgentState::Unregistered && self.state() != AgentState::Stopped {
            match self.client.unregister().await {
                Ok(reclaimed) => tracing::info!(
                    worker = %self.config.worker_name,
                    reclaimed,
                    "Unregistered from coordinator"
                ),
                Err(e) => tracing::warn!(
                    worker = %self.config.worker_name,
                    error = %e,
                    "Failed to unregister"
                ),
            }
        }
        self.job = None;
        self.frame = None;
        self.rendered = None;
        self.set_state(AgentState::Stopped);
    }

    fn current_job(&self) -> Result<&JobDescriptor> {
        self.job
            .as_ref()
            .ok_or_else(|| FarmError::InvalidArgument("agent holds no job".into()))
    }

    fn current_frame(&self) -> Result<u32> {
        self.frame
            .ok_or_else(|| FarmError::InvalidArgument("agent holds no frame".into()))
    }

    fn set_state(&self, next: AgentState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::trace!(worker = %self.config.worker_name, from = %prev, to = %next, "State change");
        }
    }
}
