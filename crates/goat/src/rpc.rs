//! Wire envelope types.
//!
//! One [`Rpc`] is one framed message on the shared channel. Any subset of
//! the optional fields may be present; their combination encodes the call
//! lifecycle:
//!
//! - `header` carries the method path on every envelope of a call, and the
//!   full user header list on the first one only.
//! - `body` carries one serialized message payload.
//! - A non-zero `status.code` terminates the call with an error.
//! - The mere presence of `trailer` signals end-of-stream on the sending
//!   side.
//! - `reset` instructs the peer to treat the stream as abnormally closed.
//!
//! These types cross the wire as protobuf; field tags must not change.

use bytes::Bytes;

/// Reset type instructing the peer to abandon the stream.
pub const RST_STREAM: &str = "RST_STREAM";

/// One framed message on the shared channel.
///
/// `id` pairs a request with its response envelopes and is unique per
/// outstanding call on the sending side.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rpc {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, optional, tag = "2")]
    pub header: Option<RequestHeader>,
    #[prost(message, optional, tag = "3")]
    pub body: Option<Body>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<ResponseStatus>,
    #[prost(message, optional, tag = "5")]
    pub trailer: Option<Trailer>,
    #[prost(message, optional, tag = "6")]
    pub reset: Option<Reset>,
}

/// A single header entry. Order within a list is preserved on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Call header. `method` has the form `/<service>/<method>`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestHeader {
    #[prost(string, tag = "1")]
    pub method: String,
    /// User headers; populated on the first envelope of a call only.
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<KeyValue>,
    #[prost(string, optional, tag = "3")]
    pub destination: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub source: Option<String>,
}

/// One serialized message payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Body {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
}

/// Terminal status. A non-zero `code` ends the call with an error.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

/// End-of-stream marker; `metadata` carries trailing metadata entries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trailer {
    #[prost(message, repeated, tag = "1")]
    pub metadata: Vec<KeyValue>,
}

/// Abnormal-close notification, e.g. [`RST_STREAM`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reset {
    #[prost(string, tag = "1")]
    pub r#type: String,
}
