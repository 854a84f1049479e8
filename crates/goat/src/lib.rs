//! goat: connect-style RPCs over a caller-supplied message channel.
//!
//! The caller brings a [`ChannelIo`] — an in-order, bidirectional,
//! message-oriented byte channel (a WebSocket, a pipe, a multiplexed
//! session) carrying framed [`Rpc`] envelopes. [`GoatTransport`] turns one
//! such channel into a multiplexed RPC transport that any number of
//! concurrent calls may share:
//!
//! - Envelope types and wire constants ([`Rpc`], [`KeyValue`], [`RST_STREAM`])
//! - Status codes and errors ([`Code`], [`ChannelError`], [`GoatError`])
//! - Header bag and codec glue ([`Headers`], [`headers_to_kv`], [`kv_to_headers`])
//! - Method descriptors and body codecs ([`MethodDescriptor`])
//! - Cancellation ([`AbortHandle`], [`AbortSignal`])
//! - The transport itself ([`GoatTransport`]: `unary`, `stream`, `reset`)
//! - A waitable FIFO used by channel implementations and test mocks
//!   ([`AwaitableQueue`])
//!
//! # Key invariant
//!
//! Each channel has exactly one reader task, owned by the transport. All
//! response routing happens through the transport's outstanding-call map;
//! no other code reads from the channel.

#![forbid(unsafe_code)]

mod abort;
mod channel;
mod error;
mod headers;
mod method;
mod queue;
mod rpc;
mod stream;
mod transport;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use channel::ChannelIo;
pub use error::{ChannelError, Code, GoatError};
pub use headers::{headers_to_kv, kv_to_headers, method_path, Headers};
pub use method::{decode_body, encode_body, MethodDescriptor, MAX_RECV_BYTES, MAX_SEND_BYTES};
pub use queue::AwaitableQueue;
pub use rpc::{
    Body, KeyValue, RequestHeader, Reset, ResponseStatus, Rpc, Trailer, RST_STREAM,
};
pub use stream::{StreamResponse, Streaming};
pub use transport::{CallOptions, GoatConfig, GoatTransport, Interceptor, UnaryResponse};

// Re-export StreamExt for consumers iterating streaming responses.
pub use futures::StreamExt;
