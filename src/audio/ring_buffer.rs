//! Fixed pre-allocated circular buffer for PCM samples. The capture callback
//! writes into it; the tick loop only ever wants the latest window, so reads
//! are trailing-window copies rather than cursor-based consumption.

/// Fixed-size ring buffer for PCM i16 samples. Pre-allocated, never grows.
pub struct RingBuffer {
    buffer: Box<[i16]>,
    write_pos: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Create a ring buffer holding `capacity` samples, zero-filled.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0i16; capacity].into_boxed_slice(),
            write_pos: 0,
            capacity,
        }
    }

    /// Write samples, overwriting the oldest data when full.
    /// Called from the audio callback: no allocation, no blocking.
    #[inline]
    pub fn write(&mut self, samples: &[i16]) {
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
    }

    /// Copy the most recent `out.len()` samples into `out`, oldest first.
    /// Positions not yet written read as zero. Returns the count copied.
    pub fn latest_into(&self, out: &mut [i16]) -> usize {
        let n = out.len().min(self.capacity);
        let start = (self.write_pos + self.capacity - n) % self.capacity;
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = self.buffer[(start + i) % self.capacity];
        }
        n
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
