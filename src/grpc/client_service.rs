use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::coordinator::Coordinator;
use crate::error::FarmError;
use crate::proto::job_service_server::JobService;
use crate::proto::{
    FetchFrameRequest, FetchFrameResponse, FrameInfo, FrameStatus as ProtoFrameStatus,
    GetJobStatusRequest, GetJobStatusResponse, JobInfo, ListJobsRequest, ListJobsResponse,
    ListWorkersRequest, ListWorkersResponse, SubmitJobRequest, SubmitJobResponse, WorkerInfo,
};
use crate::scheduler::{Frame, FrameStatus, Job};

/// gRPC service for operators: submitting jobs and inspecting progress
pub struct ClientService {
    coordinator: Arc<Coordinator>,
}

impl ClientService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

fn status_to_proto(status: FrameStatus) -> ProtoFrameStatus {
    match status {
        FrameStatus::Pending => ProtoFrameStatus::Pending,
        FrameStatus::Assigned => ProtoFrameStatus::Assigned,
        FrameStatus::Completed => ProtoFrameStatus::Completed,
    }
}

fn job_info(job: &Job) -> JobInfo {
    JobInfo {
        job_id: job.id,
        start: job.start,
        end: job.end,
        renderer: job.renderer.clone(),
        frame_count: job.frame_count() as u32,
        completed_frames: job.completed_count() as u32,
        assigned_frames: job.assigned_count() as u32,
        open: job.is_open(),
        complete: job.is_complete(),
        created_at_ms: job.created_at.timestamp_millis(),
    }
}

fn frame_info(job: &Job, frame: &Frame) -> FrameInfo {
    FrameInfo {
        index: frame.index,
        frame_number: job.frame_number(frame.index),
        status: status_to_proto(frame.status()) as i32,
        worker_name: frame.assigned_worker().unwrap_or_default().to_string(),
        progress: u32::from(frame.progress()),
        output_bytes: frame.output().map_or(0, |data| data.len() as u64),
        completed_at_ms: frame.completed_at().map(|dt| dt.timestamp_millis()),
    }
}

#[tonic::async_trait]
impl JobService for ClientService {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let req = request.into_inner();
        let job_id = self
            .coordinator
            .submit_job(req.start, req.end, req.renderer, req.file)
            .await?;

        let jobs = self.coordinator.jobs().read().await;
        let job = jobs
            .get_job(job_id)
            .ok_or_else(|| Status::internal("Submitted job vanished"))?;

        Ok(Response::new(SubmitJobResponse {
            job_id,
            frame_count: job.frame_count() as u32,
            created_at_ms: job.created_at.timestamp_millis(),
        }))
    }

    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<GetJobStatusResponse>, Status> {
        let req = request.into_inner();

        let jobs = self.coordinator.jobs().read().await;
        let job = jobs
            .get_job(req.job_id)
            .ok_or(FarmError::InvalidJob(req.job_id))?;

        Ok(Response::new(GetJobStatusResponse {
            job: Some(job_info(job)),
            frames: job.frames().iter().map(|f| frame_info(job, f)).collect(),
        }))
    }

    async fn list_jobs(
        &self,
        _request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let jobs = self.coordinator.jobs().read().await;
        Ok(Response::new(ListJobsResponse {
            jobs: jobs.all_jobs().map(job_info).collect(),
        }))
    }

    async fn list_workers(
        &self,
        _request: Request<ListWorkersRequest>,
    ) -> Result<Response<ListWorkersResponse>, Status> {
        // Registry before jobs, as everywhere else
        let registry = self.coordinator.registry().read().await;
        let jobs = self.coordinator.jobs().read().await;

        let workers = registry
            .all_workers()
            .into_iter()
            .map(|w| WorkerInfo {
                name: w.name.clone(),
                registered_at_ms: w.registered_at.timestamp_millis(),
                last_seen_ms: w.last_seen.timestamp_millis(),
                assigned_frames: jobs.frames_for_worker(&w.name).len() as u32,
            })
            .collect();

        Ok(Response::new(ListWorkersResponse { workers }))
    }

    async fn fetch_frame(
        &self,
        request: Request<FetchFrameRequest>,
    ) -> Result<Response<FetchFrameResponse>, Status> {
        let req = request.into_inner();
        let (frame_number, data) = self
            .coordinator
            .fetch_frame(req.job_id, req.frame_index)
            .await?;

        Ok(Response::new(FetchFrameResponse { data, frame_number }))
    }
}
