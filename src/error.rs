//! Machine states and the terminal error they double as.

use std::fmt;

/// Every state a connection can be in.
///
/// The in-progress values (`Resolve`, `Connect`, ...) name the step the
/// machine is currently waiting on. Each of them has an `*Error` sibling
/// that is terminal. `Success` is the only terminal value that is not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Init,
    Resolve,
    ResolveError,
    Connect,
    ConnectError,
    Handshake,
    HandshakeError,
    Write,
    WriteError,
    ReadStatus,
    ReadStatusError,
    ReadStatusDataError,
    ReadHeaders,
    ReadHeadersError,
    ReadContentLength,
    ReadContentLengthError,
    ReadChunkHeader,
    ReadChunkHeaderError,
    ReadChunkData,
    ReadChunkDataError,
    ReadUntilEof,
    ReadUntilEofError,
    RedirectExhausted,
    RedirectError,
    Timeout,
    Expired,
    Success,
}

const ALL_CODES: [ErrorCode; 27] = [
    ErrorCode::Init,
    ErrorCode::Resolve,
    ErrorCode::ResolveError,
    ErrorCode::Connect,
    ErrorCode::ConnectError,
    ErrorCode::Handshake,
    ErrorCode::HandshakeError,
    ErrorCode::Write,
    ErrorCode::WriteError,
    ErrorCode::ReadStatus,
    ErrorCode::ReadStatusError,
    ErrorCode::ReadStatusDataError,
    ErrorCode::ReadHeaders,
    ErrorCode::ReadHeadersError,
    ErrorCode::ReadContentLength,
    ErrorCode::ReadContentLengthError,
    ErrorCode::ReadChunkHeader,
    ErrorCode::ReadChunkHeaderError,
    ErrorCode::ReadChunkData,
    ErrorCode::ReadChunkDataError,
    ErrorCode::ReadUntilEof,
    ErrorCode::ReadUntilEofError,
    ErrorCode::RedirectExhausted,
    ErrorCode::RedirectError,
    ErrorCode::Timeout,
    ErrorCode::Expired,
    ErrorCode::Success,
];

impl ErrorCode {
    /// Stable, machine-readable label (`"READ_STATUS_DATA_ERROR"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Init => "INIT",
            ErrorCode::Resolve => "RESOLVE",
            ErrorCode::ResolveError => "RESOLVE_ERROR",
            ErrorCode::Connect => "CONNECT",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::Handshake => "HANDSHAKE",
            ErrorCode::HandshakeError => "HANDSHAKE_ERROR",
            ErrorCode::Write => "WRITE",
            ErrorCode::WriteError => "WRITE_ERROR",
            ErrorCode::ReadStatus => "READ_STATUS",
            ErrorCode::ReadStatusError => "READ_STATUS_ERROR",
            ErrorCode::ReadStatusDataError => "READ_STATUS_DATA_ERROR",
            ErrorCode::ReadHeaders => "READ_HEADERS",
            ErrorCode::ReadHeadersError => "READ_HEADERS_ERROR",
            ErrorCode::ReadContentLength => "READ_CONTENT_LENGTH",
            ErrorCode::ReadContentLengthError => "READ_CONTENT_LENGTH_ERROR",
            ErrorCode::ReadChunkHeader => "READ_CHUNK_HEADER",
            ErrorCode::ReadChunkHeaderError => "READ_CHUNK_HEADER_ERROR",
            ErrorCode::ReadChunkData => "READ_CHUNK_DATA",
            ErrorCode::ReadChunkDataError => "READ_CHUNK_DATA_ERROR",
            ErrorCode::ReadUntilEof => "READ_UNTIL_EOF",
            ErrorCode::ReadUntilEofError => "READ_UNTIL_EOF_ERROR",
            ErrorCode::RedirectExhausted => "REDIRECT_EXHAUSTED",
            ErrorCode::RedirectError => "REDIRECT_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Expired => "EXPIRED",
            ErrorCode::Success => "SUCCESS",
        }
    }

    /// Whether the machine can no longer leave this state (short of expiry).
    pub fn is_final(&self) -> bool {
        match self {
            ErrorCode::ResolveError
            | ErrorCode::ConnectError
            | ErrorCode::HandshakeError
            | ErrorCode::WriteError
            | ErrorCode::ReadStatusError
            | ErrorCode::ReadStatusDataError
            | ErrorCode::ReadHeadersError
            | ErrorCode::ReadContentLengthError
            | ErrorCode::ReadChunkHeaderError
            | ErrorCode::ReadChunkDataError
            | ErrorCode::ReadUntilEofError
            | ErrorCode::RedirectExhausted
            | ErrorCode::RedirectError
            | ErrorCode::Timeout
            | ErrorCode::Expired
            | ErrorCode::Success => true,
            _ => false,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        ALL_CODES.get(value as usize).copied()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a connection: a code plus the peer's (or our own) text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(ErrorCode::Success, "success")
    }

    /// True for everything except `SUCCESS`.
    pub fn is_error(&self) -> bool {
        self.code != ErrorCode::Success
    }

    pub fn code_to_string(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Default for Error {
    fn default() -> Self {
        Self::new(ErrorCode::Init, "in progress")
    }
}
