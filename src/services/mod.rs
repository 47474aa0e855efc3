/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-room projection and its durable writes.
pub mod room_engine;
/// Room and identity operations behind the REST routes.
pub mod room_service;
/// Oracle-driven voting of simulated participants.
pub mod simulated_voters;
/// Server-Sent Events room streams.
pub mod sse_service;
/// Record store connection supervisor.
pub mod storage_supervisor;
