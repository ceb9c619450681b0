pub mod client_service;
pub mod coordinator_service;
pub mod server;

pub use server::GrpcServer;
