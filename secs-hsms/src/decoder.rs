//! HSMS frame reader

use crate::header::HEADER_LENGTH;
use crate::message::HsmsMessage;
use crate::settings::DEFAULT_MAX_MESSAGE_LENGTH;
use bytes::{Buf, BytesMut};
use secs_core::{SecsError, SecsResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

const LENGTH_PREFIX: usize = 4;

/// Splits a byte stream into HSMS messages
///
/// Waiting for the first byte of a frame is unbounded. Once a frame has
/// started, every further read must complete within T8, otherwise the frame
/// is reported invalid. Frames announcing more than the maximum message
/// length are rejected before any of their payload is buffered.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    t8: Duration,
    max_length: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, t8: Duration) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4096),
            t8,
            max_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    /// Limit the length announced in a frame's length prefix
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Read the next complete message
    ///
    /// Returns `None` when the peer closed the connection between frames.
    pub async fn read_frame(&mut self) -> SecsResult<Option<HsmsMessage>> {
        loop {
            if let Some(message) = self.parse_frame()? {
                return Ok(Some(message));
            }

            let read = if self.buffer.is_empty() {
                self.reader.read_buf(&mut self.buffer).await?
            } else {
                match timeout(self.t8, self.reader.read_buf(&mut self.buffer)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(SecsError::FrameInvalid(format!(
                            "T8 expired with {} bytes of an incomplete frame",
                            self.buffer.len()
                        )));
                    }
                }
            };

            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(SecsError::FrameInvalid(format!(
                    "connection closed inside a frame ({} bytes pending)",
                    self.buffer.len()
                )));
            }
        }
    }

    fn parse_frame(&mut self) -> SecsResult<Option<HsmsMessage>> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if length < HEADER_LENGTH {
            return Err(SecsError::FrameInvalid(format!(
                "frame length {} shorter than header",
                length
            )));
        }
        if length > self.max_length {
            return Err(SecsError::FrameInvalid(format!(
                "frame length {} exceeds the maximum of {}",
                length, self.max_length
            )));
        }
        if self.buffer.len() < LENGTH_PREFIX + length {
            self.buffer.reserve(LENGTH_PREFIX + length - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX);
        let payload = self.buffer.split_to(length).freeze();
        HsmsMessage::from_payload(payload).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SType;
    use secs_core::Item;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_split_reads() {
        let item = Item::ascii("hello").unwrap();
        let data = HsmsMessage::data(1, 0, 1, 1, true, Some(&item)).unwrap().encode();
        let linktest = HsmsMessage::linktest_req(2).encode();

        let mut combined = data[7..].to_vec();
        combined.extend_from_slice(&linktest[..2]);
        let mock = tokio_test::io::Builder::new()
            .read(&data[..3])
            .read(&data[3..7])
            .read(&combined)
            .read(&linktest[2..])
            .build();

        let mut reader = FrameReader::new(mock, Duration::from_secs(1));
        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first.item().unwrap(), Some(item));
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second.s_type(), Some(SType::LinktestReq));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_length_is_invalid() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 5, 1, 2, 3, 4, 5])
            .build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(1));
        assert!(matches!(reader.read_frame().await, Err(SecsError::FrameInvalid(_))));
    }

    #[tokio::test]
    async fn test_oversized_length_is_invalid() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0xFF, 0xFF, 0xFF, 0xFF, 0, 0])
            .build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(1));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, SecsError::FrameInvalid(_)));
        assert!(reader.buffer.capacity() < 1024 * 1024);
    }

    #[tokio::test]
    async fn test_configured_max_length() {
        let item = Item::Binary(vec![0; 64]);
        let frame = HsmsMessage::data(1, 0, 1, 1, true, Some(&item)).unwrap().encode();
        let mock = tokio_test::io::Builder::new().read(&frame).build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(1)).with_max_length(32);
        assert!(matches!(reader.read_frame().await, Err(SecsError::FrameInvalid(_))));

        let mock = tokio_test::io::Builder::new().read(&frame).build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(1)).with_max_length(frame.len());
        assert_eq!(reader.read_frame().await.unwrap().unwrap().item().unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_t8_expires_inside_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let frame = HsmsMessage::select_req(1).encode();
        client.write_all(&frame[..6]).await.unwrap();

        let mut reader = FrameReader::new(server, Duration::from_millis(50));
        let result = reader.read_frame().await;
        assert!(matches!(result, Err(SecsError::FrameInvalid(_))));
        drop(client);
    }

    #[tokio::test]
    async fn test_eof_inside_frame() {
        let frame = HsmsMessage::select_req(1).encode();
        let mock = tokio_test::io::Builder::new().read(&frame[..5]).build();
        let mut reader = FrameReader::new(mock, Duration::from_secs(1));
        assert!(reader.read_frame().await.is_err());
    }
}
