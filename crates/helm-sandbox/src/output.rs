//! Bounded output capture

use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Keeps the last `limit` bytes of a stream
#[derive(Debug)]
pub(crate) struct TailBuffer {
    limit: usize,
    bytes: VecDeque<u8>,
    truncated: bool,
}

impl TailBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            bytes: VecDeque::with_capacity(limit.min(8192)),
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        if self.limit == 0 {
            self.truncated |= !chunk.is_empty();
            return;
        }
        let chunk = if chunk.len() > self.limit {
            self.truncated = true;
            self.bytes.clear();
            &chunk[chunk.len() - self.limit..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.truncated = true;
            self.bytes.drain(..overflow);
        }
        self.bytes.extend(chunk);
    }

    pub(crate) fn finish(self) -> (String, bool) {
        let bytes: Vec<u8> = self.bytes.into();
        (String::from_utf8_lossy(&bytes).into_owned(), self.truncated)
    }
}

/// Drain a pipe into a tail buffer until EOF
pub(crate) async fn capture<R>(mut reader: R, limit: usize) -> (String, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = TailBuffer::new(limit);
    let mut chunk = [0_u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "sandbox output stream closed with error");
                break;
            }
        }
    }
    buffer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_tail() {
        let mut buffer = TailBuffer::new(4);
        buffer.push(b"abc");
        buffer.push(b"def");
        assert_eq!(buffer.finish(), ("cdef".to_string(), true));
    }

    #[test]
    fn oversized_chunk() {
        let mut buffer = TailBuffer::new(3);
        buffer.push(b"0123456");
        assert_eq!(buffer.finish(), ("456".to_string(), true));
    }

    #[test]
    fn under_limit_is_not_truncated() {
        let mut buffer = TailBuffer::new(16);
        buffer.push(b"ok");
        assert_eq!(buffer.finish(), ("ok".to_string(), false));
    }

    #[tokio::test]
    async fn capture_reads_to_eof() {
        let data: &[u8] = b"hello world";
        assert_eq!(capture(data, 5).await, ("world".to_string(), true));
    }
}
