use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;

use crate::coordinator::Coordinator;
use crate::grpc::client_service::ClientService;
use crate::grpc::coordinator_service::CoordinatorService;
use crate::proto::frame_coordinator_server::FrameCoordinatorServer;
use crate::proto::job_service_server::JobServiceServer;

pub struct GrpcServer {
    coordinator: Arc<Coordinator>,
}

impl GrpcServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    fn router(&self) -> Router {
        let limit = self.coordinator.config().max_message_bytes;

        let coordinator_service = FrameCoordinatorServer::new(CoordinatorService::new(
            self.coordinator.clone(),
        ))
        .max_decoding_message_size(limit)
        .max_encoding_message_size(limit);

        let client_service = JobServiceServer::new(ClientService::new(self.coordinator.clone()))
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Server::builder()
            .add_service(coordinator_service)
            .add_service(client_service)
    }

    /// Serve on the configured listen address until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let addr: SocketAddr = self.coordinator.config().listen_addr;
        tracing::info!(addr = %addr, "Starting gRPC server");

        self.router()
            .serve_with_shutdown(addr, shutdown.cancelled_owned())
            .await
    }

    /// Serve on an already-bound listener. Lets callers bind port 0 and
    /// learn the real address first.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting gRPC server");
        }

        self.router()
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}
