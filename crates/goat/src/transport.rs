//! GoatTransport: multiplexes concurrent RPC calls over one channel.
//!
//! # Architecture
//!
//! ```text
//!             ┌───────────────────────────────────┐
//!             │           GoatTransport           │
//!             ├───────────────────────────────────┤
//!             │  channel: Mutex<Arc<C>>           │
//!             │  outstanding: HashMap<id,         │
//!             │      Unary(oneshot) |             │
//!             │      Stream(mpsc)>                │
//!             │  next_id: AtomicU64               │
//!             │  read_error: Option<GoatError>    │
//!             └───────────────┬───────────────────┘
//!                             │
//!                        reader task
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          │                  │                  │
//!    unary waiter      streaming call       unknown id
//!          │                  │                  │
//!  ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//!  │ resolve once, │  │ push into the │  │ drop silently │
//!  │ remove entry  │  │ call's output │  │ (call ended)  │
//!  └───────────────┘  └───────────────┘  └───────────────┘
//! ```
//!
//! # Key invariant
//!
//! Each channel generation has exactly one reader task. The reader captures
//! the channel it was started against; a failure observed after the channel
//! has been swapped by [`GoatTransport::reset`] belongs to the previous
//! generation and is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::abort::AbortSignal;
use crate::channel::ChannelIo;
use crate::error::GoatError;
use crate::headers::{headers_to_kv, kv_to_headers, Headers};
use crate::method::{decode_body, encode_body, MethodDescriptor};
use crate::rpc::{Body, KeyValue, RequestHeader, Rpc, Trailer};

/// Per-call options handed to [`GoatTransport::unary`] and
/// [`GoatTransport::stream`].
#[derive(Debug, Default, Clone)]
pub struct CallOptions {
    /// User headers for the opening envelope.
    pub headers: Headers,
    /// Call deadline, measured from the start of the call.
    pub timeout: Option<Duration>,
    /// Cancellation signal.
    pub signal: Option<AbortSignal>,
}

/// Sees the method path and may amend the outgoing header bag before the
/// opening envelope is written.
pub trait Interceptor: Send + Sync {
    fn on_request(&self, method: &str, headers: &mut Headers);
}

/// Transport configuration.
#[derive(Clone, Default)]
pub struct GoatConfig {
    /// Stamped into every envelope's `header.destination`.
    pub destination: Option<String>,
    /// Stamped into every envelope's `header.source`.
    pub source: Option<String>,
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

/// A completed unary call.
#[derive(Debug, Clone)]
pub struct UnaryResponse<O> {
    pub headers: Headers,
    pub trailers: Headers,
    pub message: O,
}

/// Routing slot for one outstanding call.
///
/// Unary slots are consumed on delivery; streaming slots stay registered
/// until the call's cleanup removes them.
pub(crate) enum CallSlot {
    Unary(oneshot::Sender<Result<Rpc, GoatError>>),
    Stream(mpsc::UnboundedSender<Result<Rpc, GoatError>>),
}

impl CallSlot {
    fn reject(self, reason: GoatError) {
        match self {
            CallSlot::Unary(tx) => {
                let _ = tx.send(Err(reason));
            }
            CallSlot::Stream(tx) => {
                let _ = tx.send(Err(reason));
            }
        }
    }
}

/// A multiplexed RPC transport over one [`ChannelIo`].
///
/// Cloning is cheap and shares the underlying state; all clones speak
/// through the same channel and outstanding-call map.
pub struct GoatTransport<C: ChannelIo> {
    pub(crate) inner: Arc<Shared<C>>,
}

impl<C: ChannelIo> Clone for GoatTransport<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct Shared<C> {
    /// Channel currently carrying envelopes; replaced wholesale by `reset`.
    channel: Mutex<Arc<C>>,
    /// Outstanding calls: id -> routing slot. One entry per live call.
    outstanding: Mutex<HashMap<u64, CallSlot>>,
    /// Next call id. Never recycled.
    next_id: AtomicU64,
    /// Fatal reader error; once set, new calls fail immediately until
    /// `reset` clears it.
    read_error: Mutex<Option<GoatError>>,
    destination: Option<String>,
    source: Option<String>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl<C: ChannelIo> Shared<C> {
    pub(crate) fn current_channel(&self) -> Arc<C> {
        self.channel.lock().clone()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn latched_error(&self) -> Option<GoatError> {
        self.read_error.lock().clone()
    }

    pub(crate) fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub(crate) fn register(&self, id: u64, slot: CallSlot) {
        let prev = self.outstanding.lock().insert(id, slot);
        assert!(prev.is_none(), "call id {id} registered twice");
    }

    pub(crate) fn remove(&self, id: u64) -> Option<CallSlot> {
        self.outstanding.lock().remove(&id)
    }

    /// Header template for outgoing envelopes. Pass the full key-value list
    /// for the opening envelope, an empty one for everything after it.
    pub(crate) fn header(&self, method: String, headers: Vec<KeyValue>) -> RequestHeader {
        RequestHeader {
            method,
            headers,
            destination: self.destination.clone(),
            source: self.source.clone(),
        }
    }

    pub(crate) async fn write(&self, rpc: Rpc) -> Result<(), GoatError> {
        let channel = self.current_channel();
        channel.write(rpc).await.map_err(GoatError::channel)
    }

    /// Deliver an incoming envelope to the call awaiting its id.
    fn route(&self, rpc: Rpc) {
        let id = rpc.id;
        let mut map = self.outstanding.lock();
        let Some(slot) = map.get(&id) else {
            drop(map);
            // The call has already been resolved or reset.
            tracing::trace!(id, "dropping envelope for unknown call id");
            return;
        };
        match slot {
            CallSlot::Unary(_) => {
                let slot = map.remove(&id);
                drop(map);
                if let Some(CallSlot::Unary(tx)) = slot {
                    let _ = tx.send(Ok(rpc));
                }
            }
            CallSlot::Stream(tx) => {
                let tx = tx.clone();
                drop(map);
                // The consumer may already have stopped pulling; discard.
                let _ = tx.send(Ok(rpc));
            }
        }
    }

    /// Latch `reason` and fail every outstanding call with it, unless
    /// `channel` has already been replaced (the failure then belongs to a
    /// stale reader). The identity check and the latch happen under the
    /// channel lock so a concurrent `reset` cannot interleave.
    fn fail_if_current(&self, channel: &Arc<C>, reason: GoatError) -> bool {
        let drained: Vec<CallSlot> = {
            let current = self.channel.lock();
            if !Arc::ptr_eq(channel, &current) {
                return false;
            }
            *self.read_error.lock() = Some(reason.clone());
            let mut map = self.outstanding.lock();
            map.drain().map(|(_, slot)| slot).collect()
        };
        tracing::warn!(
            error = %reason,
            rejected = drained.len(),
            "channel failed; rejecting outstanding calls"
        );
        for slot in drained {
            slot.reject(reason.clone());
        }
        true
    }
}

fn spawn_reader<C: ChannelIo>(shared: &Arc<Shared<C>>, channel: Arc<C>) {
    let shared = shared.clone();
    tokio::spawn(async move {
        loop {
            match channel.read().await {
                Ok(rpc) => shared.route(rpc),
                Err(err) => {
                    // A failure on a channel that has been replaced belongs
                    // to a previous generation; this reader is stale.
                    if !shared.fail_if_current(&channel, GoatError::channel(err)) {
                        tracing::trace!("stale reader exiting after channel swap");
                    }
                    return;
                }
            }
        }
    });
}

/// Removes the call's routing slot when the driver unwinds, whether the
/// call resolved, failed, or was abandoned mid-await.
struct OutstandingGuard<'a, C: ChannelIo> {
    shared: &'a Shared<C>,
    id: u64,
}

impl<C: ChannelIo> Drop for OutstandingGuard<'_, C> {
    fn drop(&mut self) {
        if self.shared.remove(self.id).is_some() {
            tracing::debug!(id = self.id, "removed outstanding call on unwind");
        }
    }
}

impl<C: ChannelIo> GoatTransport<C> {
    /// Wrap a channel and start its reader.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, GoatConfig::default())
    }

    pub fn with_config(channel: C, config: GoatConfig) -> Self {
        let channel = Arc::new(channel);
        let inner = Arc::new(Shared {
            channel: Mutex::new(channel.clone()),
            outstanding: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            read_error: Mutex::new(None),
            destination: config.destination,
            source: config.source,
            interceptors: config.interceptors,
        });
        spawn_reader(&inner, channel);
        Self { inner }
    }

    /// Number of calls currently awaiting peer envelopes (diagnostics).
    pub fn outstanding_len(&self) -> usize {
        self.inner.outstanding.lock().len()
    }

    /// Replace the channel.
    ///
    /// Every in-flight call is rejected with `reason` (default:
    /// aborted/"reset"), the read-error latch is cleared, a fresh reader is
    /// started against `new_channel`, and the old channel is notified via
    /// `done()`.
    pub async fn reset(&self, new_channel: C, reason: Option<GoatError>) {
        let reason = reason.unwrap_or_else(|| GoatError::Aborted("reset".into()));
        let new_channel = Arc::new(new_channel);

        // Swap first: readers still parked on the old channel compare
        // identities on failure and exit without touching shared state.
        let old = {
            let mut current = self.inner.channel.lock();
            std::mem::replace(&mut *current, new_channel.clone())
        };

        let drained: Vec<CallSlot> = {
            let mut map = self.inner.outstanding.lock();
            map.drain().map(|(_, slot)| slot).collect()
        };
        tracing::debug!(rejected = drained.len(), "channel reset");
        for slot in drained {
            slot.reject(reason.clone());
        }

        *self.inner.read_error.lock() = None;
        spawn_reader(&self.inner, new_channel);
        old.done().await;
    }

    /// Issue a unary call: one request envelope out, one response envelope
    /// back.
    pub async fn unary<I, O>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: I,
        options: CallOptions,
    ) -> Result<UnaryResponse<O>, GoatError>
    where
        I: prost::Message,
        O: prost::Message + Default,
    {
        if let Some(err) = self.inner.latched_error() {
            return Err(err);
        }

        let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);
        let path = method.path();
        let data = encode_body(&input)?;

        let mut headers = options.headers;
        for interceptor in &self.inner.interceptors {
            interceptor.on_request(&path, &mut headers);
        }

        if let Some(signal) = &options.signal {
            if let Some(reason) = signal.reason() {
                return Err(reason);
            }
        }

        let id = self.inner.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.register(id, CallSlot::Unary(tx));
        let _guard = OutstandingGuard {
            shared: &self.inner,
            id,
        };

        tracing::debug!(id, method = %path, "unary call");

        // The empty trailer doubles as end-of-client-stream for unary.
        let request = Rpc {
            id,
            header: Some(self.inner.header(path, headers_to_kv(&headers))),
            body: Some(Body { data }),
            trailer: Some(Trailer::default()),
            ..Default::default()
        };
        self.inner.write(request).await?;

        let response = await_response(rx, options.signal.as_ref(), deadline).await?;

        if let Some(status) = &response.status {
            if status.code != 0 {
                return Err(GoatError::from_status(status));
            }
        }
        let Some(body) = &response.body else {
            return Err(GoatError::InvalidResponse);
        };
        let message = decode_body(&body.data)?;
        Ok(UnaryResponse {
            headers: kv_to_headers(response.header.as_ref().map(|h| h.headers.as_slice())),
            trailers: kv_to_headers(response.trailer.as_ref().map(|t| t.metadata.as_slice())),
            message,
        })
    }
}

async fn await_response(
    rx: oneshot::Receiver<Result<Rpc, GoatError>>,
    signal: Option<&AbortSignal>,
    deadline: Option<tokio::time::Instant>,
) -> Result<Rpc, GoatError> {
    let aborted = async {
        match signal {
            Some(signal) => signal.aborted().await,
            None => std::future::pending().await,
        }
    };
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        outcome = rx => match outcome {
            Ok(result) => result,
            Err(_) => Err(GoatError::Aborted("transport dropped".into())),
        },
        reason = aborted => Err(reason),
        _ = expired => Err(GoatError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod outstanding_cleanup_tests {
    use super::*;
    use crate::error::ChannelError;

    /// Accepts writes, never produces a read.
    struct SinkChannel;

    impl ChannelIo for SinkChannel {
        async fn read(&self) -> Result<Rpc, ChannelError> {
            std::future::pending().await
        }

        async fn write(&self, _rpc: Rpc) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn done(&self) {}
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Empty {}

    const METHOD: MethodDescriptor<Empty, Empty> =
        MethodDescriptor::new("test.v1.Sink", "Swallow");

    #[tokio::test]
    async fn cancelled_call_cleans_outstanding() {
        let transport = GoatTransport::new(SinkChannel);

        let task = tokio::spawn({
            let transport = transport.clone();
            async move {
                let _ = transport
                    .unary(&METHOD, Empty::default(), CallOptions::default())
                    .await;
            }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while transport.outstanding_len() == 0 {
            if tokio::time::Instant::now() >= deadline {
                panic!("call did not register in time");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        task.abort();
        let _ = task.await;

        assert_eq!(transport.outstanding_len(), 0);
    }

    #[tokio::test]
    async fn ids_are_sequential_from_zero() {
        let transport = GoatTransport::new(SinkChannel);
        assert_eq!(transport.inner.next_id(), 0);
        assert_eq!(transport.inner.next_id(), 1);
        assert_eq!(transport.inner.next_id(), 2);
    }
}

// Note: end-to-end transport scenarios live in goat-testkit to keep the
// mock channel machinery out of this crate.
