// GELF framing: NUL-terminated frames over TCP, gzip + chunked datagrams over UDP.
use super::TransportError;
use super::config::TransportMode;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::{Compression, write::GzEncoder};
use std::io::Write;

pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
pub const CHUNK_HEADER_LEN: usize = 12;
pub const MAX_CHUNKS: usize = 128;

#[derive(Debug, Clone)]
pub struct FrameEncoder {
    mode: TransportMode,
    compression: bool,
    chunk_size: usize,
}

impl FrameEncoder {
    pub fn new(mode: TransportMode, compression: bool, chunk_size: usize) -> Self {
        Self {
            mode,
            compression,
            chunk_size,
        }
    }

    /// Turn one serialized GELF document into the frames that carry it.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<Bytes>, TransportError> {
        match self.mode {
            TransportMode::Tcp => {
                let mut frame = BytesMut::with_capacity(payload.len() + 1);
                frame.put_slice(payload);
                frame.put_u8(0);
                Ok(vec![frame.freeze()])
            }
            TransportMode::Udp => {
                let body = if self.compression {
                    gzip(payload)?
                } else {
                    Bytes::copy_from_slice(payload)
                };
                if body.len() <= self.chunk_size {
                    Ok(vec![body])
                } else {
                    chunk(&body, self.chunk_size, rand::random::<u64>())
                }
            }
        }
    }
}

fn gzip(payload: &[u8]) -> Result<Bytes, TransportError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::fast());
    encoder.write_all(payload)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Split `body` into GELF chunks of at most `chunk_size` bytes each.
pub fn chunk(body: &[u8], chunk_size: usize, message_id: u64) -> Result<Vec<Bytes>, TransportError> {
    let data_len = chunk_size.saturating_sub(CHUNK_HEADER_LEN).max(1);
    let count = body.len().div_ceil(data_len);
    if count > MAX_CHUNKS {
        return Err(TransportError::TooLarge {
            size: body.len(),
            chunks: count,
            max: MAX_CHUNKS,
        });
    }

    let id = message_id.to_be_bytes();
    Ok(body
        .chunks(data_len)
        .enumerate()
        .map(|(seq, data)| {
            let mut frame = BytesMut::with_capacity(CHUNK_HEADER_LEN + data.len());
            frame.put_slice(&CHUNK_MAGIC);
            frame.put_slice(&id);
            frame.put_u8(seq as u8);
            frame.put_u8(count as u8);
            frame.put_slice(data);
            frame.freeze()
        })
        .collect())
}
