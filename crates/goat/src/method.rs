//! Method descriptors and message body codecs.

use std::marker::PhantomData;

use bytes::Bytes;
use prost::Message;

use crate::error::GoatError;
use crate::headers::method_path;

/// Byte cap for a serialized message body, applied on write.
pub const MAX_SEND_BYTES: usize = 10_000_000;
/// Byte cap for a serialized message body, applied on read.
pub const MAX_RECV_BYTES: usize = 10_000_000;

/// Identifies one RPC method and the message types on each side.
///
/// `I` is the request message, `O` the response message; both are protobuf.
/// Typically declared as a `const` next to the generated message types.
pub struct MethodDescriptor<I, O> {
    service: &'static str,
    method: &'static str,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> MethodDescriptor<I, O> {
    pub const fn new(service: &'static str, method: &'static str) -> Self {
        Self {
            service,
            method,
            _marker: PhantomData,
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// `/<service>/<method>`
    pub fn path(&self) -> String {
        method_path(self.service, self.method)
    }
}

/// Serialize a message body, enforcing the write cap.
pub fn encode_body<M: Message>(message: &M) -> Result<Bytes, GoatError> {
    let len = message.encoded_len();
    if len > MAX_SEND_BYTES {
        return Err(GoatError::PayloadTooLarge {
            len,
            max: MAX_SEND_BYTES,
        });
    }
    Ok(Bytes::from(message.encode_to_vec()))
}

/// Deserialize a message body, enforcing the read cap.
pub fn decode_body<M: Message + Default>(data: &[u8]) -> Result<M, GoatError> {
    if data.len() > MAX_RECV_BYTES {
        return Err(GoatError::PayloadTooLarge {
            len: data.len(),
            max: MAX_RECV_BYTES,
        });
    }
    M::decode(data).map_err(|e| GoatError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Empty {}

    const METHOD: MethodDescriptor<Empty, Empty> = MethodDescriptor::new("test.v1.Echo", "Ping");

    #[test]
    fn path_shape() {
        assert_eq!(METHOD.path(), "/test.v1.Echo/Ping");
        assert_eq!(METHOD.service(), "test.v1.Echo");
        assert_eq!(METHOD.method(), "Ping");
    }

    #[test]
    fn oversized_read_is_rejected() {
        let data = vec![0u8; MAX_RECV_BYTES + 1];
        let err = decode_body::<Empty>(&data).unwrap_err();
        assert!(matches!(err, GoatError::PayloadTooLarge { .. }));
    }
}
