//! Parsing and validation of `Range: bytes=<start>-<end>` headers
//!
//! Only a single closed range is understood. Suffix ranges (`bytes=-500`),
//! open ranges (`bytes=100-`) and multi-range lists are malformed here.

use std::fmt;
use std::str::FromStr;

/// Why a range header was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Header is not `bytes=<start>-<end>` with two integers
    Malformed,
    /// Bounds are negative, reversed, or past the end of the file
    NotSatisfiable,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::Malformed => write!(f, "malformed range"),
            RangeError::NotSatisfiable => write!(f, "range not satisfiable"),
        }
    }
}

impl std::error::Error for RangeError {}

/// A requested byte range, inclusive on both ends, as sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: i64,
    pub end: i64,
}

impl RangeRequest {
    /// Parse a `Range` header value
    pub fn parse(header: &str) -> Result<Self, RangeError> {
        let bounds = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or(RangeError::Malformed)?;

        // The first character may be a sign, so the separator is searched after it.
        let split = bounds
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '-')
            .map(|(i, _)| i)
            .ok_or(RangeError::Malformed)?;

        let start = bounds[..split]
            .trim()
            .parse::<i64>()
            .map_err(|_| RangeError::Malformed)?;
        let end = bounds[split + 1..]
            .trim()
            .parse::<i64>()
            .map_err(|_| RangeError::Malformed)?;

        Ok(Self { start, end })
    }

    /// Check the range against a file of `file_size` bytes
    pub fn resolve(&self, file_size: u64) -> Result<ByteSpan, RangeError> {
        if self.start < 0 || self.start > self.end {
            return Err(RangeError::NotSatisfiable);
        }

        // start <= end and start >= 0, so both are non-negative here
        let (start, end) = (self.start as u64, self.end as u64);
        if end >= file_size {
            return Err(RangeError::NotSatisfiable);
        }

        Ok(ByteSpan { start, end })
    }
}

impl FromStr for RangeRequest {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A validated span of a file, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    /// Number of bytes in the span
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for the `Content-Range` header
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}
