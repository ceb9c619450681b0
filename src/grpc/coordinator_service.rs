use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::coordinator::Coordinator;
use crate::proto::frame_coordinator_server::FrameCoordinator;
use crate::proto::{
    RegisterWorkerRequest, RegisterWorkerResponse, ReportProgressRequest, ReportProgressResponse,
    RequestFrameRequest, RequestFrameResponse, RequestJobRequest, RequestJobResponse,
    UnregisterWorkerRequest, UnregisterWorkerResponse, UploadFrameRequest, UploadFrameResponse,
};

/// gRPC service for the worker-facing pull protocol
pub struct CoordinatorService {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[tonic::async_trait]
impl FrameCoordinator for CoordinatorService {
    async fn register_worker(
        &self,
        request: Request<RegisterWorkerRequest>,
    ) -> Result<Response<RegisterWorkerResponse>, Status> {
        let req = request.into_inner();
        self.coordinator.register_worker(&req.name).await?;

        Ok(Response::new(RegisterWorkerResponse {
            worker_timeout_ms: self.coordinator.config().worker_timeout_ms,
        }))
    }

    async fn unregister_worker(
        &self,
        request: Request<UnregisterWorkerRequest>,
    ) -> Result<Response<UnregisterWorkerResponse>, Status> {
        let req = request.into_inner();
        let reclaimed = self.coordinator.unregister_worker(&req.name).await;

        Ok(Response::new(UnregisterWorkerResponse {
            reclaimed_frames: reclaimed as u32,
        }))
    }

    async fn request_job(
        &self,
        request: Request<RequestJobRequest>,
    ) -> Result<Response<RequestJobResponse>, Status> {
        let req = request.into_inner();
        let job = self.coordinator.request_job(&req.name).await?;
        if job.is_none() {
            tracing::trace!(worker = %req.name, "No open jobs");
        }

        Ok(Response::new(RequestJobResponse { job }))
    }

    async fn request_frame(
        &self,
        request: Request<RequestFrameRequest>,
    ) -> Result<Response<RequestFrameResponse>, Status> {
        let req = request.into_inner();
        let frame_index = self
            .coordinator
            .request_frame(req.job_id, &req.worker_name)
            .await?;

        Ok(Response::new(RequestFrameResponse { frame_index }))
    }

    async fn report_progress(
        &self,
        request: Request<ReportProgressRequest>,
    ) -> Result<Response<ReportProgressResponse>, Status> {
        let req = request.into_inner();
        self.coordinator
            .report_progress(req.job_id, req.frame_index, &req.worker_name, req.progress)
            .await?;

        Ok(Response::new(ReportProgressResponse {}))
    }

    async fn upload_frame(
        &self,
        request: Request<UploadFrameRequest>,
    ) -> Result<Response<UploadFrameResponse>, Status> {
        let req = request.into_inner();
        let job_complete = self
            .coordinator
            .upload_frame(req.job_id, req.frame_index, &req.worker_name, req.data)
            .await?;

        Ok(Response::new(UploadFrameResponse { job_complete }))
    }
}
