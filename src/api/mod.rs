/// Client side of the RAG chat API.
///
/// - `client` - `ChatClient` over reqwest plus the `ChatTransport` seam
/// - `events` - line reassembly and decoding of the streaming response
/// - `error` - `ChatError` and `ChatResult`
mod client;
mod error;
pub mod events;

pub use client::{
    ChatClient, ChatReply, ChatTransport, HealthStatus, HistoryEntry, IndexReport, SessionHistory,
};
pub use error::{ChatError, ChatResult};
pub use events::{EventDecoder, EventStream, StreamEvent, decode_event_stream};
