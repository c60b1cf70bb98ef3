//! Frame buffer for the upstream handshake window.
//!
//! Holds frames the client sends while the upstream connection is still
//! dialing, in arrival order. Draining is a one-way door: a drained buffer
//! refuses further enqueues, matching the session invariant that the queue
//! is only filled while the upstream is connecting.

use parley_core::{Frame, RelayError, RelayResult};

/// An ordered, single-use frame queue.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
    sealed: bool,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame in arrival order. Fails once the buffer has been
    /// drained.
    pub fn enqueue(&mut self, frame: Frame) -> RelayResult<()> {
        if self.sealed {
            return Err(RelayError::Buffer(
                "enqueue after drain".to_string(),
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Take every buffered frame in original arrival order and permanently
    /// empty the buffer.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.sealed = true;
        std::mem::take(&mut self.frames)
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
