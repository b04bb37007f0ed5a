//! Framed codec for the worker stream.
//!
//! Uses LengthDelimitedCodec (4-byte big-endian length) for framing and
//! serde_json for payloads. Works over any AsyncRead/AsyncWrite.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// A decoded frame. A zero-length frame carries no payload and marks the
/// end of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    Data(T),
    Empty,
}

/// Codec that frames messages with a length prefix and serializes with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = Frame<T>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(bytes) = self.inner.decode(src)? else {
            return Ok(None);
        };
        if bytes.is_empty() {
            return Ok(Some(Frame::Empty));
        }
        let item = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(Frame::Data(item)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream ended inside a frame ({} bytes left)", src.len()),
            )),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{SubmitBatch, TaskResult, TaskSubmission};

    #[test]
    fn batch_frame_is_length_prefixed_json() {
        let mut codec = JsonCodec::<SubmitBatch>::new();
        let mut buf = BytesMut::new();
        let batch = vec![TaskSubmission {
            id: 0,
            command: "a".to_string(),
            input: None,
        }];
        codec.encode(batch, &mut buf).unwrap();

        let body = br#"[{"id":0,"command":"a"}]"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], &body[..]);
    }

    #[test]
    fn empty_batch_still_has_a_payload() {
        let mut codec = JsonCodec::<SubmitBatch>::new();
        let mut buf = BytesMut::new();
        codec.encode(Vec::new(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 2, b'[', b']']);
    }

    #[test]
    fn decodes_result_frames_and_end_marker() {
        let mut codec = JsonCodec::<TaskResult>::new();
        let body = br#"{"id":1,"return_code":0,"place_id":2,"start_at":3,"finish_at":4,"output":[]}"#;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0, 0, 0]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Frame::Data(TaskResult { id: 1, place_id: 2, .. })));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Empty));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = JsonCodec::<TaskResult>::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 10, b'{'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_at_eof_is_invalid_data() {
        let mut codec = JsonCodec::<TaskResult>::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 10, b'{'][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn undecodable_payload_is_invalid_data() {
        let mut codec = JsonCodec::<TaskResult>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 3]);
        buf.extend_from_slice(b"{x}");
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
