//! Streaming call driver.
//!
//! One streaming call is a small state machine over the shared channel:
//!
//! ```text
//!           start ──opening envelope──▶ active
//!  active  ──body/trailer from peer──▶ active / server_closed
//!  active  ──input exhausted, trailer sent──▶ client_closed
//!  both sides closed                 ──▶ terminal (no RST on cleanup)
//!  abort / peer error / read error   ──▶ terminal (RST on cleanup)
//! ```
//!
//! The upload loop and the response consumer run concurrently; the
//! demultiplexer feeds incoming envelopes into the call's output queue, and
//! cleanup runs exactly once when the consumer unwinds.

use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::abort::AbortSignal;
use crate::channel::ChannelIo;
use crate::error::{Code, GoatError};
use crate::headers::headers_to_kv;
use crate::method::{decode_body, encode_body, MethodDescriptor};
use crate::rpc::{Body, RequestHeader, Reset, ResponseStatus, Rpc, Trailer, RST_STREAM};
use crate::transport::{CallOptions, CallSlot, GoatTransport, Shared};

/// Response side of a streaming call: each item is one decoded message.
///
/// The sequence ends when the peer sends its trailer; a peer status, abort,
/// upload failure, or channel failure surfaces as the final `Err` item.
pub type Streaming<T> = Pin<Box<dyn Stream<Item = Result<T, GoatError>> + Send>>;

/// An open streaming call.
///
/// Dropping `messages` before the stream has terminated cleanly counts as
/// abandoning the call; the peer is informed with a reset envelope.
pub struct StreamResponse<O> {
    pub messages: Streaming<O>,
}

impl<C: ChannelIo> GoatTransport<C> {
    /// Open a streaming call (client, server, or bidirectional: the shape
    /// is decided by how many items each side sends).
    ///
    /// `input` is the upload sequence; it is drained concurrently with the
    /// response consumer, and its end triggers the client trailer envelope.
    pub async fn stream<I, O, S>(
        &self,
        method: &MethodDescriptor<I, O>,
        input: S,
        options: CallOptions,
    ) -> Result<StreamResponse<O>, GoatError>
    where
        I: prost::Message,
        O: prost::Message + Default + 'static,
        S: Stream<Item = Result<I, GoatError>> + Send + 'static,
    {
        if let Some(err) = self.inner.latched_error() {
            return Err(err);
        }

        let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);
        let path = method.path();

        let mut headers = options.headers;
        for interceptor in self.inner.interceptors() {
            interceptor.on_request(&path, &mut headers);
        }

        if let Some(signal) = &options.signal {
            if let Some(reason) = signal.reason() {
                return Err(reason);
            }
        }

        let id = self.inner.next_id();
        // Full headers ride on the opening envelope only; every envelope
        // after it carries the bare template.
        let initial = self.inner.header(path.clone(), headers_to_kv(&headers));
        let mid = self.inner.header(path.clone(), Vec::new());

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.inner.register(id, CallSlot::Stream(out_tx.clone()));

        tracing::debug!(id, method = %path, "streaming call");

        let opening = Rpc {
            id,
            header: Some(initial),
            ..Default::default()
        };
        if let Err(err) = self.inner.write(opening).await {
            // The call never started; nothing to reset.
            self.inner.remove(id);
            return Err(err);
        }

        let server_closed = Arc::new(AtomicBool::new(false));
        let client_closed = Arc::new(AtomicBool::new(false));

        spawn_upload(
            self.inner.clone(),
            id,
            mid.clone(),
            input,
            out_tx,
            client_closed.clone(),
        );

        let messages = response_sequence(
            self.inner.clone(),
            id,
            mid,
            out_rx,
            options.signal.clone(),
            deadline,
            server_closed,
            client_closed,
        );

        Ok(StreamResponse { messages })
    }
}

/// Drain the input sequence into the channel, then send the client trailer.
///
/// Failures never tear down the call directly; they are injected into the
/// output queue so the consumer surfaces them, and the send itself is
/// discarded if the consumer has already stopped pulling.
fn spawn_upload<C, I, S>(
    shared: Arc<Shared<C>>,
    id: u64,
    mid: RequestHeader,
    input: S,
    out: mpsc::UnboundedSender<Result<Rpc, GoatError>>,
    client_closed: Arc<AtomicBool>,
) where
    C: ChannelIo,
    I: prost::Message,
    S: Stream<Item = Result<I, GoatError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut input = pin!(input);
        loop {
            let item = match input.next().await {
                Some(Ok(item)) => item,
                Some(Err(err)) => {
                    let _ = out.send(Err(GoatError::Upload(err.to_string())));
                    return;
                }
                None => break,
            };
            let data = match encode_body(&item) {
                Ok(data) => data,
                Err(err) => {
                    let _ = out.send(Err(GoatError::Upload(err.to_string())));
                    return;
                }
            };
            let envelope = Rpc {
                id,
                header: Some(mid.clone()),
                body: Some(Body { data }),
                ..Default::default()
            };
            if let Err(err) = shared.write(envelope).await {
                let _ = out.send(Err(GoatError::Upload(err.to_string())));
                return;
            }
        }

        let trailer = Rpc {
            id,
            header: Some(mid),
            trailer: Some(Trailer::default()),
            ..Default::default()
        };
        if let Err(err) = shared.write(trailer).await {
            let _ = out.send(Err(GoatError::Upload(err.to_string())));
            return;
        }
        client_closed.store(true, Ordering::Release);
        tracing::trace!(id, "upload complete");
    });
}

/// Per-call cleanup; runs exactly once, on every exit path of the response
/// sequence (normal end, error, or the consumer dropping it mid-stream).
struct StreamCleanup<C: ChannelIo> {
    shared: Arc<Shared<C>>,
    id: u64,
    mid: RequestHeader,
    server_closed: Arc<AtomicBool>,
    client_closed: Arc<AtomicBool>,
}

impl<C: ChannelIo> Drop for StreamCleanup<C> {
    fn drop(&mut self) {
        self.shared.remove(self.id);
        let clean = self.server_closed.load(Ordering::Acquire)
            && self.client_closed.load(Ordering::Acquire);
        if clean {
            return;
        }
        // One side did not close cleanly: tell the peer the stream framing
        // may be inconsistent. Best effort; write errors are ignored.
        tracing::debug!(id = self.id, "stream ended abnormally; sending reset");
        let channel = self.shared.current_channel();
        let envelope = Rpc {
            id: self.id,
            header: Some(self.mid.clone()),
            status: Some(ResponseStatus {
                code: Code::Aborted as i32,
                message: "stream reset".into(),
                details: Vec::new(),
            }),
            trailer: Some(Trailer::default()),
            reset: Some(Reset {
                r#type: RST_STREAM.into(),
            }),
            ..Default::default()
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = channel.write(envelope).await;
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn response_sequence<C, O>(
    shared: Arc<Shared<C>>,
    id: u64,
    mid: RequestHeader,
    mut out_rx: mpsc::UnboundedReceiver<Result<Rpc, GoatError>>,
    signal: Option<AbortSignal>,
    deadline: Option<tokio::time::Instant>,
    server_closed: Arc<AtomicBool>,
    client_closed: Arc<AtomicBool>,
) -> Streaming<O>
where
    C: ChannelIo,
    O: prost::Message + Default + 'static,
{
    Box::pin(try_stream! {
        let _cleanup = StreamCleanup {
            shared,
            id,
            mid,
            server_closed: server_closed.clone(),
            client_closed,
        };
        loop {
            let event = next_event(&mut out_rx, signal.as_ref(), deadline).await?;
            let Some(rpc) = event else {
                // Output closed without a terminal envelope.
                break;
            };
            if let Some(status) = &rpc.status {
                if status.code != 0 {
                    server_closed.store(true, Ordering::Release);
                    Err(GoatError::from_status(status))?;
                }
            }
            if let Some(body) = &rpc.body {
                let message = decode_body(&body.data)?;
                yield message;
            }
            if rpc.trailer.is_some() {
                server_closed.store(true, Ordering::Release);
                break;
            }
        }
    })
}

/// Next item from the output queue, raced against abort and deadline.
async fn next_event(
    out_rx: &mut mpsc::UnboundedReceiver<Result<Rpc, GoatError>>,
    signal: Option<&AbortSignal>,
    deadline: Option<tokio::time::Instant>,
) -> Result<Option<Rpc>, GoatError> {
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
        biased;
        reason = aborted => Err(reason),
        _ = expired => Err(GoatError::DeadlineExceeded),
        item = out_rx.recv() => match item {
            Some(Ok(rpc)) => Ok(Some(rpc)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        },
    }
}
