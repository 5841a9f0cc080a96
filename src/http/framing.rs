use super::parser::{parse_head, Head, ParseError};

/// Bytes received on one connection that do not form a complete request yet.
#[derive(Debug, Default)]
pub struct PendingRequest {
    buf: Vec<u8>,
}

impl PendingRequest {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The head of the first buffered request, once its terminator arrived.
    pub fn head(&self) -> Result<Option<Head>, ParseError> {
        parse_head(&self.buf)
    }

    /// Removes and returns the first complete request. Bytes after it stay
    /// buffered, so back-to-back requests come out in arrival order.
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>, ParseError> {
        let Some(head) = self.head()? else {
            return Ok(None);
        };
        let len = head.frame_len();
        if self.buf.len() < len {
            return Ok(None);
        }
        let rest = self.buf.split_off(len);
        Ok(Some(std::mem::replace(&mut self.buf, rest)))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
