//! Gateway front door for MockStack
//!
//! One `GatewaySession` per accepted connection: reads pipelined HTTP/1.1
//! requests, resolves the target service from the credential header, and
//! dispatches each request to its backend while writing responses back in
//! request order.

pub mod handler;
pub mod routes;
pub mod session;
pub mod wire;

pub use handler::{ServiceHandler, ServiceRequest, ServiceResponse, StubHandler};
pub use routes::RoutingTable;
pub use session::{GatewaySession, SessionConfig};
