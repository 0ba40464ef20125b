//! Bolt chunk codec
//!
//! 메시지는 2바이트 길이 접두사가 붙은 청크들로 나뉘고 `0x0000`으로 끝난다.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Request, Response};
use crate::driver::DriverError;

/// 최대 청크 크기 (16KB)
pub const MAX_CHUNK_SIZE: usize = 16384;

/// 기본 최대 메시지 크기 (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const END_MARKER: [u8; 2] = [0x00, 0x00];

/// 클라이언트 측 Bolt 코덱: 요청을 인코딩하고 응답을 디코딩한다
#[derive(Debug)]
pub struct BoltCodec {
    max_message_size: usize,
    message: BytesMut,
    scratch: BytesMut,
    /// Bolt 5 이상이면 DateTime 파라미터를 UTC 초로 보낸다
    utc_datetime: bool,
}

impl BoltCodec {
    /// 새 코덱 생성
    pub fn new(utc_datetime: bool) -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            message: BytesMut::with_capacity(4096),
            scratch: BytesMut::with_capacity(4096),
            utc_datetime,
        }
    }

    /// 최대 메시지 크기 설정
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    fn write_chunks(data: &[u8], dst: &mut BytesMut) {
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }
}

impl Decoder for BoltCodec {
    type Item = Response;
    type Error = DriverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }
            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);
                if self.message.is_empty() {
                    // NOOP
                    continue;
                }
                let message = self.message.split();
                return Response::decode(&message).map(Some);
            }

            if src.len() < 2 + chunk_size {
                return Ok(None);
            }
            if self.message.len() + chunk_size > self.max_message_size {
                return Err(DriverError::protocol(format!(
                    "Message of {} bytes exceeds limit of {}",
                    self.message.len() + chunk_size,
                    self.max_message_size
                )));
            }

            src.advance(2);
            self.message.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Encoder<&Request> for BoltCodec {
    type Error = DriverError;

    fn encode(&mut self, item: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.scratch.clear();
        item.encode(&mut self.scratch, self.utc_datetime)?;
        Self::write_chunks(&self.scratch, dst);
        Ok(())
    }
}
