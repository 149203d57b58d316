/// Announcement clip catalog.
pub mod catalog_service;
/// Game room mutations and queries.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Server-Sent Events snapshot streaming.
pub mod sse_service;
