use bytes::{Bytes, BytesMut};

/// Accumulates inbound carrier audio until a byte threshold is reached.
///
/// When the threshold is crossed the largest whole multiple of the
/// threshold is emitted as one chunk and the remainder is retained.
#[derive(Debug)]
pub struct InputAccumulator {
    buf: BytesMut,
    threshold: usize,
}

impl InputAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(threshold * 2),
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(data);
        if self.threshold == 0 {
            if self.buf.is_empty() {
                return None;
            }
            return Some(self.buf.split().freeze());
        }
        if self.buf.len() < self.threshold {
            return None;
        }
        let take = self.buf.len() - self.buf.len() % self.threshold;
        Some(self.buf.split_to(take).freeze())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Splits outbound audio into fixed-size frames.
#[derive(Debug)]
pub struct OutputFramer {
    buf: BytesMut,
    frame_size: usize,
}

impl OutputFramer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(frame_size * 4),
            frame_size,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append audio and drain every complete frame.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        self.drain_frames()
    }

    /// Drain complete frames without appending.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        if self.frame_size == 0 {
            if self.buf.is_empty() {
                return Vec::new();
            }
            return vec![self.buf.split().freeze()];
        }
        let mut frames = Vec::with_capacity(self.buf.len() / self.frame_size);
        while self.buf.len() >= self.frame_size {
            frames.push(self.buf.split_to(self.frame_size).freeze());
        }
        frames
    }

    /// Take whatever is left, even if shorter than a frame.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
