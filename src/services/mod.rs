/// Shared audio clock derivation.
pub mod audio_clock;
/// Song catalog HTTP client.
pub mod catalog;
/// OpenAPI documentation generation.
pub mod documentation;
/// Room event assembly and fan-out.
pub mod events;
/// Health check service.
pub mod health_service;
/// Host authority migration.
pub mod host_migration;
/// Connection-level presence tracking.
pub mod presence;
/// Room lifecycle and membership.
pub mod room_service;
/// Round control and buzz arbitration.
pub mod round_service;
/// WebSocket connection handling.
pub mod socket_service;
/// Storage reconnection coordinator.
pub mod storage_supervisor;
