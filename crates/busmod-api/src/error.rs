use thiserror::Error;

/// Top-level error type for the `busmod-api` crate.
///
/// Covers connection setup, the outbound write path, and frame decoding.
/// `busmod-core` maps these into runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The bus endpoint could not be reached. Fatal at startup.
    #[error("Cannot connect to bus at {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection is gone (peer hung up, read failure, or `close()`).
    #[error("Bus connection closed")]
    Closed,

    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level I/O failure. Stream-fatal when raised by the codec.
    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// An outbound event could not be serialized.
    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// A single frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Returns `true` if the bus endpoint was unreachable.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Returns `true` if the connection has already been torn down.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Per-frame decode failure. The stream stays usable after any of these.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid event JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },
}
