// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Fixed-capacity circular buffer of PCM samples.
///
/// Tracks the total number of samples ever written so the VAD consumer can
/// read fixed-size frames from a global sample offset. When the buffer
/// wraps, older samples are silently discarded.
#[derive(Debug)]
pub struct SampleRing {
    buf: Vec<i16>,
    capacity: usize,
    write_pos: usize,
    total_written: u64,
}

impl SampleRing {
    /// Create a new ring with the given capacity in samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0i16; capacity],
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    /// Append samples into the circular buffer.
    pub fn write(&mut self, samples: &[i16]) {
        for chunk in samples.chunks(self.capacity) {
            let start = self.write_pos;
            let end = start + chunk.len();

            if end <= self.capacity {
                self.buf[start..end].copy_from_slice(chunk);
            } else {
                let first = self.capacity - start;
                self.buf[start..self.capacity].copy_from_slice(&chunk[..first]);
                self.buf[..chunk.len() - first].copy_from_slice(&chunk[first..]);
            }

            self.write_pos = end % self.capacity;
            self.total_written += chunk.len() as u64;
        }
    }

    /// Read one frame starting at the given global sample offset.
    ///
    /// Returns `false` when the offset has been overwritten (too old) or the
    /// frame is not yet complete (too new); `out` is untouched in that case.
    pub fn read_frame(&self, offset: u64, out: &mut [i16]) -> bool {
        let len = out.len() as u64;
        if offset + len > self.total_written {
            return false;
        }
        if offset < self.oldest() {
            return false;
        }

        let behind = (self.total_written - offset) as usize;
        let start = if self.write_pos >= behind {
            self.write_pos - behind
        } else {
            self.capacity - (behind - self.write_pos)
        };

        let len = out.len();
        if start + len <= self.capacity {
            out.copy_from_slice(&self.buf[start..start + len]);
        } else {
            let first = self.capacity - start;
            out[..first].copy_from_slice(&self.buf[start..self.capacity]);
            out[first..].copy_from_slice(&self.buf[..len - first]);
        }
        true
    }

    /// Oldest sample offset still present in the ring.
    pub fn oldest(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity as u64)
    }

    /// Total samples ever written through this ring.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
