use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use framefarm::config::{
    default_worker_name, AgentConfig, BackoffConfig, CoordinatorConfig, DEFAULT_MAX_FRAMES_PER_JOB,
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_REAP_INTERVAL_MS, DEFAULT_WORKER_TIMEOUT_MS,
};
use framefarm::coordinator::Coordinator;
use framefarm::grpc::GrpcServer;
use framefarm::proto::job_service_client::JobServiceClient;
use framefarm::proto::{
    FetchFrameRequest, FrameStatus, GetJobStatusRequest, ListJobsRequest, ListWorkersRequest,
    SubmitJobRequest,
};
use framefarm::render::BlenderRenderer;
use framefarm::shutdown::install_shutdown_handler;
use framefarm::worker::WorkerAgent;

#[derive(Parser, Debug)]
#[command(name = "framefarm")]
#[command(version)]
#[command(about = "A pull-based render farm: one coordinator, many render workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordinator
    Coordinator(CoordinatorArgs),

    /// Run a render worker
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// List registered workers
    Workers {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Coordinator Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Address to listen on for gRPC
    #[arg(long, env = "FRAMEFARM_LISTEN", default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Workers silent for longer than this lose their frames
    #[arg(long, env = "FRAMEFARM_WORKER_TIMEOUT_MS", default_value_t = DEFAULT_WORKER_TIMEOUT_MS)]
    worker_timeout_ms: u64,

    /// How often to sweep for stale workers
    #[arg(
        long,
        env = "FRAMEFARM_REAP_INTERVAL_MS",
        default_value_t = DEFAULT_REAP_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    reap_interval_ms: u64,

    /// Maximum number of jobs kept in memory
    #[arg(long, env = "FRAMEFARM_MAX_JOBS", default_value_t = 10_000)]
    max_jobs: usize,

    /// Largest frame range a single job may span
    #[arg(long, env = "FRAMEFARM_MAX_FRAMES_PER_JOB", default_value_t = DEFAULT_MAX_FRAMES_PER_JOB)]
    max_frames_per_job: u32,

    /// Largest gRPC message accepted or sent (scene files, rendered frames)
    #[arg(long, env = "FRAMEFARM_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Coordinator URL
    #[arg(long, short = 'a', env = "FRAMEFARM_COORDINATOR", default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Worker name, unique among active workers (random if omitted)
    #[arg(long, env = "FRAMEFARM_WORKER_NAME")]
    name: Option<String>,

    /// Blender executable
    #[arg(long, env = "FRAMEFARM_BLENDER", default_value = "blender")]
    blender: PathBuf,

    /// Interval between progress reports while rendering
    #[arg(
        long,
        env = "FRAMEFARM_PROGRESS_INTERVAL_MS",
        default_value_t = 2_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    progress_interval_ms: u64,

    /// Initial delay when idle or retrying
    #[arg(long, env = "FRAMEFARM_BACKOFF_INITIAL_MS", default_value_t = 500)]
    backoff_initial_ms: u64,

    /// Maximum delay when idle or retrying
    #[arg(long, env = "FRAMEFARM_BACKOFF_MAX_MS", default_value_t = 30_000)]
    backoff_max_ms: u64,

    /// Largest gRPC message accepted or sent
    #[arg(long, env = "FRAMEFARM_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,
}

// =============================================================================
// Client Arguments (shared by job and workers commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator URL
    #[arg(long, short = 'a', env = "FRAMEFARM_COORDINATOR", default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a scene for rendering
    Submit {
        /// Scene file to render
        file: PathBuf,

        /// First frame number
        #[arg(long, short = 's', allow_negative_numbers = true)]
        start: i64,

        /// Last frame number (inclusive)
        #[arg(long, short = 'e', allow_negative_numbers = true)]
        end: i64,

        /// Render engine, e.g. CYCLES or BLENDER_RENDER
        #[arg(long, short = 'r', default_value = "CYCLES")]
        renderer: String,
    },
    /// Show a job and its frames
    Status {
        job_id: u64,
    },
    /// List all jobs
    List,
    /// Download a rendered frame
    Fetch {
        job_id: u64,

        /// Zero-based frame index within the job
        frame_index: u32,

        /// Where to write the image
        #[arg(long, short = 'f')]
        out: PathBuf,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: u64,
    frame_count: u32,
    created_at_ms: i64,
}

#[derive(Serialize)]
struct JobSummaryOutput {
    job_id: u64,
    start: i64,
    end: i64,
    renderer: String,
    frame_count: u32,
    completed_frames: u32,
    assigned_frames: u32,
    open: bool,
    complete: bool,
    created_at_ms: i64,
}

#[derive(Serialize)]
struct FrameOutput {
    index: u32,
    frame_number: i64,
    status: String,
    worker: Option<String>,
    progress: u32,
    output_bytes: u64,
    completed_at_ms: Option<i64>,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job: JobSummaryOutput,
    frames: Vec<FrameOutput>,
}

#[derive(Serialize)]
struct WorkerOutput {
    name: String,
    registered_at_ms: i64,
    last_seen_ms: i64,
    assigned_frames: u32,
}

#[derive(Serialize)]
struct FetchOutput {
    job_id: u64,
    frame_index: u32,
    frame_number: i64,
    bytes: usize,
    path: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn frame_status_to_string(status: i32) -> String {
    match FrameStatus::try_from(status) {
        Ok(FrameStatus::Pending) => "PENDING".to_string(),
        Ok(FrameStatus::Assigned) => "ASSIGNED".to_string(),
        Ok(FrameStatus::Completed) => "COMPLETED".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

fn job_summary(job: framefarm::proto::JobInfo) -> JobSummaryOutput {
    JobSummaryOutput {
        job_id: job.job_id,
        start: job.start,
        end: job.end,
        renderer: job.renderer,
        frame_count: job.frame_count,
        completed_frames: job.completed_frames,
        assigned_frames: job.assigned_frames,
        open: job.open,
        complete: job.complete,
        created_at_ms: job.created_at_ms,
    }
}

fn job_state_label(job: &JobSummaryOutput) -> &'static str {
    if job.complete {
        "complete"
    } else if job.open {
        "open"
    } else {
        "rendering"
    }
}

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    Ok(Channel::from_shared(args.addr.clone())?.connect().await?)
}

fn job_client(channel: Channel) -> JobServiceClient<Channel> {
    JobServiceClient::new(channel)
        .max_decoding_message_size(DEFAULT_MAX_MESSAGE_BYTES)
        .max_encoding_message_size(DEFAULT_MAX_MESSAGE_BYTES)
}

// =============================================================================
// Coordinator and Worker
// =============================================================================

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = CoordinatorConfig::new(args.listen)
        .with_worker_timeout_ms(args.worker_timeout_ms)
        .with_reap_interval_ms(args.reap_interval_ms);
    config.max_jobs = args.max_jobs;
    config.max_frames_per_job = args.max_frames_per_job;
    config.max_message_bytes = args.max_message_bytes;

    tracing::info!(
        listen_addr = %config.listen_addr,
        worker_timeout_ms = config.worker_timeout_ms,
        reap_interval_ms = config.reap_interval_ms,
        max_jobs = config.max_jobs,
        max_frames_per_job = config.max_frames_per_job,
        "Starting framefarm coordinator"
    );

    let shutdown = install_shutdown_handler();
    let coordinator = Arc::new(Coordinator::new(config));
    let reaper = coordinator.spawn_reaper(shutdown.clone());

    GrpcServer::new(coordinator).run(shutdown.clone()).await?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "Reaper task ended abnormally");
    }
    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let name = args.name.unwrap_or_else(default_worker_name);
    let backoff = BackoffConfig {
        initial_delay_ms: args.backoff_initial_ms,
        max_delay_ms: args.backoff_max_ms,
        ..BackoffConfig::default()
    };
    let mut config = AgentConfig::new(args.addr, name)
        .with_backoff(backoff)
        .with_progress_interval_ms(args.progress_interval_ms);
    config.max_message_bytes = args.max_message_bytes;
    config.blender_path = args.blender;

    let backend = BlenderRenderer::new(config.blender_path.clone());
    let agent = WorkerAgent::new(config, backend)?;

    let shutdown = install_shutdown_handler();
    let summary = agent.run(shutdown).await?;

    tracing::info!(
        frames_rendered = summary.frames_rendered,
        frames_dropped = summary.frames_dropped,
        jobs_taken = summary.jobs_taken,
        "Worker finished"
    );
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &mut JobServiceClient<Channel>,
    file: PathBuf,
    start: i64,
    end: i64,
    renderer: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = tokio::fs::read(&file).await?;

    let resp = match client
        .submit_job(SubmitJobRequest {
            start,
            end,
            renderer,
            file: data,
        })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: Job submission failed: {}", status.message());
            std::process::exit(1);
        }
    };

    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: resp.job_id,
                frame_count: resp.frame_count,
                created_at_ms: resp.created_at_ms,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", resp.job_id);
            println!("Frames: {}", resp.frame_count);
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &mut JobServiceClient<Channel>,
    job_id: u64,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_job_status(GetJobStatusRequest { job_id })
        .await?
        .into_inner();

    let job = job_summary(response.job.ok_or("Response is missing the job")?);
    let frames: Vec<FrameOutput> = response
        .frames
        .into_iter()
        .map(|f| FrameOutput {
            index: f.index,
            frame_number: f.frame_number,
            status: frame_status_to_string(f.status),
            worker: (!f.worker_name.is_empty()).then_some(f.worker_name),
            progress: f.progress,
            output_bytes: f.output_bytes,
            completed_at_ms: f.completed_at_ms,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            let output = JobStatusOutput { job, frames };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:    {}", job.job_id);
            println!("Renderer:  {}", job.renderer);
            println!("Frames:    {}..={}", job.start, job.end);
            println!("State:     {}", job_state_label(&job));
            println!(
                "Progress:  {}/{} complete, {} rendering",
                job.completed_frames, job.frame_count, job.assigned_frames
            );
            println!();
            println!(
                "{:<7} {:<8} {:<11} {:<9} {:<20} BYTES",
                "INDEX", "FRAME", "STATUS", "PROGRESS", "WORKER"
            );
            println!("{}", "-".repeat(70));
            for frame in &frames {
                println!(
                    "{:<7} {:<8} {:<11} {:<9} {:<20} {}",
                    frame.index,
                    frame.frame_number,
                    frame.status,
                    format!("{}%", frame.progress),
                    frame.worker.as_deref().unwrap_or("-"),
                    frame.output_bytes
                );
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &mut JobServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.list_jobs(ListJobsRequest {}).await?.into_inner();
    let jobs: Vec<JobSummaryOutput> = response.jobs.into_iter().map(job_summary).collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<8} {:<16} {:<16} {:<11} {:<10} DONE",
                    "JOB ID", "RENDERER", "FRAMES", "STATE", "RENDERING"
                );
                println!("{}", "-".repeat(72));
                for job in &jobs {
                    println!(
                        "{:<8} {:<16} {:<16} {:<11} {:<10} {}/{}",
                        job.job_id,
                        job.renderer,
                        format!("{}..={}", job.start, job.end),
                        job_state_label(job),
                        job.assigned_frames,
                        job.completed_frames,
                        job.frame_count
                    );
                }
                println!();
                println!("Total: {} jobs", jobs.len());
            }
        }
    }
    Ok(())
}

async fn handle_job_fetch(
    client: &mut JobServiceClient<Channel>,
    job_id: u64,
    frame_index: u32,
    out: PathBuf,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .fetch_frame(FetchFrameRequest {
            job_id,
            frame_index,
        })
        .await?
        .into_inner();

    tokio::fs::write(&out, &response.data).await?;

    match output_format {
        OutputFormat::Json => {
            let output = FetchOutput {
                job_id,
                frame_index,
                frame_number: response.frame_number,
                bytes: response.data.len(),
                path: out.display().to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "Wrote frame {} ({} bytes) to {}",
                response.frame_number,
                response.data.len(),
                out.display()
            );
        }
    }
    Ok(())
}

async fn handle_workers(
    client: &mut JobServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.list_workers(ListWorkersRequest {}).await?.into_inner();
    let workers: Vec<WorkerOutput> = response
        .workers
        .into_iter()
        .map(|w| WorkerOutput {
            name: w.name,
            registered_at_ms: w.registered_at_ms,
            last_seen_ms: w.last_seen_ms,
            assigned_frames: w.assigned_frames,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&workers)?);
        }
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers registered.");
            } else {
                let now_ms = chrono::Utc::now().timestamp_millis();
                println!("{:<24} {:<10} LAST SEEN", "NAME", "FRAMES");
                println!("{}", "-".repeat(50));
                for worker in &workers {
                    let ago = (now_ms - worker.last_seen_ms).max(0) / 1000;
                    println!(
                        "{:<24} {:<10} {}s ago",
                        worker.name, worker.assigned_frames, ago
                    );
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Coordinator(coordinator_args) => {
            run_coordinator(coordinator_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = job_client(channel);

            match command {
                JobCommands::Submit {
                    file,
                    start,
                    end,
                    renderer,
                } => {
                    handle_job_submit(&mut grpc_client, file, start, end, renderer, &client.output)
                        .await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::List => {
                    handle_job_list(&mut grpc_client, &client.output).await?;
                }
                JobCommands::Fetch {
                    job_id,
                    frame_index,
                    out,
                } => {
                    handle_job_fetch(&mut grpc_client, job_id, frame_index, out, &client.output)
                        .await?;
                }
            }
        }
        Commands::Workers { client } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = job_client(channel);
            handle_workers(&mut grpc_client, &client.output).await?;
        }
    }

    Ok(())
}
