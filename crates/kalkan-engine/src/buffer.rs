// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output buffers the engine writes into.
//
// Every engine call that produces data takes a caller-allocated buffer plus an
// in/out length. The buffer is zero-filled before the call and the reported
// length is read back afterwards. A reported length larger than the capacity
// is kept as-is so the caller can reject it instead of reading past the end.

use std::os::raw::{c_char, c_int};

/// Zero-filled, fixed-capacity buffer with an engine-reported length.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    reported: usize,
}

impl OutputBuffer {
    pub fn zeroed(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            reported: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Capacity as the C length argument. Clamped to `c_int::MAX`.
    pub fn c_capacity(&self) -> c_int {
        c_int::try_from(self.bytes.len()).unwrap_or(c_int::MAX)
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    pub fn as_mut_c_ptr(&mut self) -> *mut c_char {
        self.bytes.as_mut_ptr().cast()
    }

    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Copy `data` in and report its length. When `data` does not fit,
    /// nothing is copied, the required length is reported and `false` is
    /// returned, mirroring the engine's buffer-too-small behavior.
    pub fn write(&mut self, data: &[u8]) -> bool {
        self.reported = data.len();
        if data.len() > self.bytes.len() {
            return false;
        }
        self.bytes[..data.len()].copy_from_slice(data);
        true
    }

    pub fn set_reported_len(&mut self, len: usize) {
        self.reported = len;
    }

    /// Record a length written back through a C `int*`. A negative length
    /// cannot be valid and is recorded as an overflow.
    pub fn set_reported_c_len(&mut self, len: c_int) {
        self.reported = usize::try_from(len).unwrap_or(usize::MAX);
    }

    pub fn reported_len(&self) -> usize {
        self.reported
    }

    /// The written bytes, or `None` when the reported length exceeds the
    /// capacity.
    pub fn filled(&self) -> Option<&[u8]> {
        self.bytes.get(..self.reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed_and_empty() {
        let buf = OutputBuffer::zeroed(16);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.reported_len(), 0);
        assert_eq!(buf.filled(), Some(&[][..]));
    }

    #[test]
    fn write_within_capacity() {
        let mut buf = OutputBuffer::zeroed(8);
        assert!(buf.write(b"abc"));
        assert_eq!(buf.filled(), Some(&b"abc"[..]));
    }

    #[test]
    fn oversized_write_reports_without_copying() {
        let mut buf = OutputBuffer::zeroed(4);
        assert!(!buf.write(b"too long"));
        assert_eq!(buf.reported_len(), 8);
        assert!(buf.filled().is_none());
        assert!(buf.spare_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn negative_c_length_is_overflow() {
        let mut buf = OutputBuffer::zeroed(4);
        buf.set_reported_c_len(-1);
        assert!(buf.filled().is_none());
        buf.set_reported_c_len(2);
        assert_eq!(buf.filled(), Some(&[0, 0][..]));
    }
}
