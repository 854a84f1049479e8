//! Channel contract.

use std::future::Future;

use crate::error::ChannelError;
use crate::rpc::Rpc;

/// A caller-supplied channel carrying framed [`Rpc`] envelopes.
///
/// The channel must be in-order, bidirectional, and message-oriented: it
/// never splits or merges envelopes. `write` may be invoked concurrently
/// from multiple call drivers; each envelope must be written atomically
/// (WebSocket message boundaries suffice, otherwise the implementation
/// serializes internally).
pub trait ChannelIo: Send + Sync + 'static {
    /// Produce the next envelope. Fails only on unrecoverable channel
    /// failure.
    fn read(&self) -> impl Future<Output = Result<Rpc, ChannelError>> + Send;

    /// Enqueue one envelope.
    fn write(&self, rpc: Rpc) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Teardown notification. Invoked by the transport exactly once per
    /// channel, after the channel has been replaced or discarded.
    fn done(&self) -> impl Future<Output = ()> + Send;
}
