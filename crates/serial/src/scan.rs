//! Incremental delimiter matching
//!
//! The transport has no inherent framing, so delimiter-based consumers
//! must cope with delimiters spanning arbitrary byte counts and arriving
//! in arbitrary chunk sizes. Scanning byte-wise against the stream's
//! suffix is the simplest algorithm that is correct regardless of how
//! the bytes were chunked underneath. `read_until` and the subscription
//! loop share this one scanner.

use std::collections::VecDeque;

/// Matches a literal byte sequence against the tail of a byte stream.
pub struct DelimiterScanner {
    delimiter: Vec<u8>,
    tail: VecDeque<u8>,
}

impl DelimiterScanner {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        let delimiter = delimiter.into();
        let tail = VecDeque::with_capacity(delimiter.len());
        Self { delimiter, tail }
    }

    /// Feed one byte; true when the stream's tail now equals the
    /// delimiter.
    ///
    /// Fast path: the full suffix is only compared once the last byte of
    /// the delimiter is seen. An empty delimiter never matches.
    pub fn push(&mut self, byte: u8) -> bool {
        let Some(&last) = self.delimiter.last() else {
            return false;
        };

        if self.tail.len() == self.delimiter.len() {
            self.tail.pop_front();
        }
        self.tail.push_back(byte);

        byte == last
            && self.tail.len() == self.delimiter.len()
            && self.tail.iter().eq(self.delimiter.iter())
    }
}
