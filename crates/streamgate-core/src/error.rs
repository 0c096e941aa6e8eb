//! Shared error type across streamgate crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, GateError>;

/// Error string sent back in an envelope when a stream-open carries no
/// decodable header block.
pub const WIRE_MISSING_HEADERS: &str = "Missing headers";

/// Error string sent back in an envelope when a continuation references an
/// identity that is not in the connection's live map.
pub const WIRE_UNKNOWN_STREAM: &str = "Unknown stream";

/// Frame sent before closing a connection whose leading control record could
/// not be decoded at all.
pub const WIRE_INVALID_DATA: &str = "INVALID_DATA";

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum GateError {
    /// The leading control record (or the surrounding CBOR document) of a
    /// WebSocket message could not be decoded.
    #[error("bad envelope: {0}")]
    BadEnvelope(String),
    /// A stream-open envelope whose payload is not a decodable header block.
    #[error("missing headers")]
    MissingHeaders,
    /// A continuation envelope referenced an identity with no live stream.
    #[error("unknown stream: {0}")]
    UnknownStream(u64),

    /// `respond()` was given a content type outside the supported set.
    #[error("invalid content type: {0}")]
    InvalidContentType(String),
    /// `respond()` called a second time on the same transport.
    #[error("already responded")]
    AlreadyResponded,
    /// `send_data()`/`end()` called before `respond()`.
    #[error("response headers not sent")]
    HeadersNotSent,

    /// The resolved path does not name a registered command.
    #[error("no command registered at: {0}")]
    Routing(String),
    /// Fatal configuration problem, surfaced before the server can listen.
    #[error("config: {0}")]
    Config(String),
    /// A pipeline handler failed and no error handler consumed it.
    #[error("handler: {0}")]
    Handler(String),
    /// Data source / cursor failure.
    #[error("data source: {0}")]
    DataSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl GateError {
    /// The client-visible string carried in an error envelope, when this
    /// error class has one. Transport-usage and config errors are local
    /// programming/startup errors and never travel on the wire.
    pub fn wire_message(&self) -> Option<&'static str> {
        match self {
            GateError::MissingHeaders => Some(WIRE_MISSING_HEADERS),
            GateError::UnknownStream(_) => Some(WIRE_UNKNOWN_STREAM),
            GateError::BadEnvelope(_) => Some(WIRE_INVALID_DATA),
            _ => None,
        }
    }
}
