//! Splittable index ranges
//!
//! A [`Range`] describes the half-open interval `[begin, end)` together with
//! a grain size. Ranges larger than their grain are divisible and bisect at
//! the midpoint, which bounds recursion depth at `O(log(len / grain))`.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Half-open index interval with a grain-size threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Range {
    begin: i64,
    end: i64,
    grain: i64,
}

impl Range {
    /// Create a range, rejecting `begin > end` and non-positive grains.
    pub fn new(
        begin: i64,
        end: i64,
        grain: i64,
    ) -> Result<Self> {
        if begin > end || grain <= 0 {
            return Err(Error::InvalidRange { begin, end, grain });
        }
        Ok(Self { begin, end, grain })
    }

    /// Create a range over `indices` with the given grain.
    pub fn with_grain(
        indices: std::ops::Range<i64>,
        grain: i64,
    ) -> Result<Self> {
        Self::new(indices.start, indices.end, grain)
    }

    #[inline]
    pub fn begin(&self) -> i64 {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    #[inline]
    pub fn grain(&self) -> i64 {
        self.grain
    }

    /// Number of indices covered.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.begin)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// True iff `end - begin > grain`.
    #[inline]
    pub fn is_divisible(&self) -> bool {
        self.len() > self.grain as u64
    }

    /// The covered indices as a standard range.
    #[inline]
    pub fn indices(&self) -> std::ops::Range<i64> {
        self.begin..self.end
    }

    /// Bisect into `[begin, mid)` and `[mid, end)`.
    ///
    /// Consumes the range; both halves keep the original grain.
    pub fn split(self) -> Result<(Range, Range)> {
        if !self.is_divisible() {
            return Err(Error::NotDivisible { range: self });
        }
        // len > grain >= 1, so 0 < len / 2 < len and mid lies strictly inside.
        let mid = self.begin + (self.len() / 2) as i64;
        Ok((
            Range {
                begin: self.begin,
                end: mid,
                grain: self.grain,
            },
            Range {
                begin: mid,
                end: self.end,
                grain: self.grain,
            },
        ))
    }

    /// Split recursively until no piece is divisible, in index order.
    ///
    /// This is the partition a single context would walk; the scheduler
    /// produces the same leaves in a nondeterministic order.
    pub fn leaves(self) -> Vec<Range> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(range) = stack.pop() {
            match range.split() {
                Ok((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                Err(_) => leaves.push(range),
            }
        }
        leaves
    }
}

impl fmt::Display for Range {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}, {}) grain {}", self.begin, self.end, self.grain)
    }
}
