//! Postcard codec for length-delimited framing with serde serialization

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Largest frame accepted by default (1 MiB). Acceptor messages are small.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Length-delimited frames carrying postcard-encoded `T`.
///
/// Reads and writes use separate codec instances:
///
/// ```ignore
/// use tokio_util::codec::{FramedRead, FramedWrite};
///
/// let reader = FramedRead::new(read_half, PostcardCodec::<AcceptorRequest>::new());
/// let writer = FramedWrite::new(write_half, PostcardCodec::<AcceptorResponse>::new());
/// ```
#[derive(Debug)]
pub struct PostcardCodec<T> {
    inner: LengthDelimitedCodec,
    max_frame: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PostcardCodec<T> {
    fn clone(&self) -> Self {
        Self::with_max_frame(self.max_frame)
    }
}

impl<T> Default for PostcardCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PostcardCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame)
                .new_codec(),
            max_frame,
            _marker: PhantomData,
        }
    }
}

impl<T> Decoder for PostcardCodec<T>
where
    T: for<'de> Deserialize<'de>,
{
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, io::Error> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        postcard::from_bytes(&frame)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T> Encoder<T> for PostcardCodec<T>
where
    T: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), io::Error> {
        let frame = postcard::to_allocvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(frame), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = PostcardCodec::<String>::new();
        let mut buf = BytesMut::new();
        codec.encode("hello".to_string(), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = PostcardCodec::<Vec<u8>>::with_max_frame(16);
        let mut buf = BytesMut::new();
        assert!(codec.encode(vec![0u8; 64], &mut buf).is_err());
    }
}
