//! Error codes and error types.

use core::fmt;
use std::sync::Arc;

use crate::rpc::ResponseStatus;

/// RPC status codes.
///
/// Numbering matches the connect/gRPC status space; non-zero codes cross
/// the wire in `ResponseStatus.code` and must round-trip with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Canceled),
            2 => Some(Self::Unknown),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::DeadlineExceeded),
            5 => Some(Self::NotFound),
            6 => Some(Self::AlreadyExists),
            7 => Some(Self::PermissionDenied),
            8 => Some(Self::ResourceExhausted),
            9 => Some(Self::FailedPrecondition),
            10 => Some(Self::Aborted),
            11 => Some(Self::OutOfRange),
            12 => Some(Self::Unimplemented),
            13 => Some(Self::Internal),
            14 => Some(Self::Unavailable),
            15 => Some(Self::DataLoss),
            16 => Some(Self::Unauthenticated),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unknown => write!(f, "unknown"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::ResourceExhausted => write!(f, "resource exhausted"),
            Self::FailedPrecondition => write!(f, "failed precondition"),
            Self::Aborted => write!(f, "aborted"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::Unimplemented => write!(f, "unimplemented"),
            Self::Internal => write!(f, "internal error"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::DataLoss => write!(f, "data loss"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Channel-level failures produced by [`ChannelIo`](crate::ChannelIo)
/// implementations. Unrecoverable: the transport latches the first read
/// failure and fails every call until `reset` supplies a fresh channel.
#[derive(Debug)]
pub enum ChannelError {
    Closed,
    Io(std::io::Error),
    Decode(prost::DecodeError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "channel closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<prost::DecodeError> for ChannelError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Call-level errors.
///
/// `Clone` so that one latched channel failure can fan out to every
/// outstanding call; the non-clone [`ChannelError`] rides behind an `Arc`.
#[derive(Debug, Clone)]
pub enum GoatError {
    /// The shared channel failed.
    Channel(Arc<ChannelError>),
    /// The peer returned a non-zero status code.
    Status {
        code: Code,
        message: String,
        details: Vec<prost_types::Any>,
    },
    /// The call was aborted (caller signal, or owner-driven reset).
    Aborted(String),
    /// The call's deadline elapsed.
    DeadlineExceeded,
    /// A unary response envelope carried neither body, status, nor trailer.
    InvalidResponse,
    /// The streaming upload failed (input error or mid-stream write failure).
    Upload(String),
    /// A serialized message body exceeded the byte cap.
    PayloadTooLarge { len: usize, max: usize },
    /// A message body failed to deserialize.
    Decode(String),
}

impl GoatError {
    pub(crate) fn channel(e: ChannelError) -> Self {
        Self::Channel(Arc::new(e))
    }

    /// Map a wire status to an error, preserving code, message, and details.
    pub fn from_status(status: &ResponseStatus) -> Self {
        Self::Status {
            code: Code::from_i32(status.code).unwrap_or(Code::Unknown),
            message: status.message.clone(),
            details: status.details.clone(),
        }
    }
}

impl fmt::Display for GoatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "channel error: {e}"),
            Self::Status { code, message, .. } => write!(f, "{code}: {message}"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::InvalidResponse => write!(f, "invalid response"),
            Self::Upload(cause) => write!(f, "upload error: {cause}"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload {len} bytes exceeds max {max}")
            }
            Self::Decode(msg) => write!(f, "deserialize error: {msg}"),
        }
    }
}

impl std::error::Error for GoatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
