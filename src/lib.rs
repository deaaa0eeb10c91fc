//! Client for a retrieval-augmented-generation chat backend.
//!
//! - `session` - per-scope session identifier with in-memory fallback
//! - `api` - HTTP client and decoding of the streamed reply
//! - `conversation` - transcript state machine driven by the event stream
//! - `render` - Markdown rendering and auto-follow for transcript views
pub mod api;
pub mod config;
pub mod conversation;
pub mod render;
pub mod session;
pub mod types;
