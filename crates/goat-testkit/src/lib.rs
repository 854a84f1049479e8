//! goat-testkit: scripted mock channels for exercising the goat transport.
//!
//! The end-to-end scenario suite lives in this crate's `tests/` directory,
//! keeping the mock machinery out of `goat` itself.
//!
//! # Usage
//!
//! ```ignore
//! let channel = MockChannel::echo();
//! let log = channel.written();
//! let transport = GoatTransport::new(channel);
//!
//! let response = transport.unary(&TEST_METHOD, TestValue { value: 7 }, CallOptions::default()).await?;
//! assert_eq!(response.message.value, 7);
//! assert_eq!(log.snapshot().len(), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use parking_lot::Mutex;

use goat::{AwaitableQueue, Body, ChannelError, ChannelIo, MethodDescriptor, Rpc};

/// Single-value message used across the scenario suite.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TestValue {
    #[prost(int32, tag = "1")]
    pub value: i32,
}

/// The method every scenario speaks.
pub const TEST_METHOD: MethodDescriptor<TestValue, TestValue> =
    MethodDescriptor::new("testkit.v1.ValueService", "Exchange");

/// Decode the [`TestValue`] carried by an envelope's body.
///
/// # Panics
///
/// Panics if the envelope has no body or the body is not a `TestValue`.
pub fn body_value(rpc: &Rpc) -> i32 {
    let body = rpc.body.as_ref().expect("envelope has no body");
    goat::decode_body::<TestValue>(&body.data)
        .expect("body is not a TestValue")
        .value
}

/// Build a body carrying a [`TestValue`].
pub fn value_body(value: i32) -> Body {
    Body {
        data: goat::encode_body(&TestValue { value }).expect("TestValue encodes"),
    }
}

/// Handle handed to mock responders for answering recorded writes, and to
/// tests for scripting reads directly.
#[derive(Clone)]
pub struct MockPeer {
    incoming: Arc<AwaitableQueue<Result<Rpc, ChannelError>>>,
}

impl MockPeer {
    /// Queue an envelope for the transport's reader.
    pub fn send(&self, rpc: Rpc) {
        self.incoming.push(Ok(rpc));
    }

    /// Queue a read failure for the transport's reader.
    pub fn fail(&self, err: ChannelError) {
        self.incoming.push(Err(err));
    }
}

/// Snapshot handle over a mock channel's recorded writes.
#[derive(Clone)]
pub struct WrittenLog {
    written: Arc<Mutex<Vec<Rpc>>>,
}

impl WrittenLog {
    pub fn snapshot(&self) -> Vec<Rpc> {
        self.written.lock().clone()
    }

    /// Number of recorded envelopes carrying a `reset` field.
    pub fn reset_count(&self) -> usize {
        self.written
            .lock()
            .iter()
            .filter(|rpc| rpc.reset.is_some())
            .count()
    }
}

type Responder = Box<dyn Fn(&Rpc, &MockPeer) + Send + Sync>;

/// Scripted [`ChannelIo`] for tests.
///
/// Reads pop from an [`AwaitableQueue`]; an empty queue pends forever,
/// which is exactly the "read never resolves" mock. Writes are recorded
/// and optionally answered by a responder closure.
pub struct MockChannel {
    incoming: Arc<AwaitableQueue<Result<Rpc, ChannelError>>>,
    written: Arc<Mutex<Vec<Rpc>>>,
    responder: Option<Responder>,
    /// Applied to body-carrying writes only, modeling per-message
    /// processing time on the peer.
    write_delay: Option<Duration>,
    /// When set, body-carrying writes fail with an I/O error.
    fail_body_writes: bool,
    done: Arc<AtomicBool>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// A channel whose reads pend forever and whose writes are recorded.
    pub fn new() -> Self {
        Self {
            incoming: Arc::new(AwaitableQueue::new()),
            written: Arc::new(Mutex::new(Vec::new())),
            responder: None,
            write_delay: None,
            fail_body_writes: false,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A channel that answers every written envelope via `responder`.
    pub fn with_responder(
        responder: impl Fn(&Rpc, &MockPeer) + Send + Sync + 'static,
    ) -> Self {
        let mut channel = Self::new();
        channel.responder = Some(Box::new(responder));
        channel
    }

    /// A channel that echoes every written envelope back verbatim.
    pub fn echo() -> Self {
        Self::with_responder(|rpc, peer| peer.send(rpc.clone()))
    }

    /// Delay body-carrying writes by `delay`.
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Fail body-carrying writes with an I/O error.
    pub fn failing_body_writes(mut self) -> Self {
        self.fail_body_writes = true;
        self
    }

    /// Handle for scripting reads; take it before handing the channel to
    /// the transport.
    pub fn peer(&self) -> MockPeer {
        MockPeer {
            incoming: self.incoming.clone(),
        }
    }

    /// Handle over recorded writes; take it before handing the channel to
    /// the transport.
    pub fn written(&self) -> WrittenLog {
        WrittenLog {
            written: self.written.clone(),
        }
    }

    /// Flag set once the transport calls `done()`; take it before handing
    /// the channel to the transport.
    pub fn done_flag(&self) -> Arc<AtomicBool> {
        self.done.clone()
    }
}

impl ChannelIo for MockChannel {
    async fn read(&self) -> Result<Rpc, ChannelError> {
        self.incoming.pop().await
    }

    async fn write(&self, rpc: Rpc) -> Result<(), ChannelError> {
        if rpc.body.is_some() {
            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_body_writes {
                return Err(ChannelError::Io(std::io::Error::other("mock write failure")));
            }
        }
        self.written.lock().push(rpc.clone());
        if let Some(responder) = &self.responder {
            responder(
                &rpc,
                &MockPeer {
                    incoming: self.incoming.clone(),
                },
            );
        }
        Ok(())
    }

    async fn done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// Install a test tracing subscriber once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into()),
            )
            .with_test_writer()
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_answers_writes() {
        let channel = MockChannel::echo();
        let envelope = Rpc {
            id: 3,
            body: Some(value_body(9)),
            ..Default::default()
        };
        channel.write(envelope.clone()).await.unwrap();
        assert_eq!(channel.read().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let channel = MockChannel::new();
        let log = channel.written();
        channel
            .write(Rpc {
                id: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(log.snapshot().len(), 1);
        assert_eq!(log.reset_count(), 0);
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_on_read() {
        let channel = MockChannel::new();
        channel
            .peer()
            .fail(ChannelError::Io(std::io::Error::other("scripted")));
        assert!(matches!(channel.read().await, Err(ChannelError::Io(_))));
    }

    #[test]
    fn body_value_round_trip() {
        let rpc = Rpc {
            id: 0,
            body: Some(value_body(41)),
            ..Default::default()
        };
        assert_eq!(body_value(&rpc), 41);
    }
}
