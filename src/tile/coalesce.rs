//! Greedy merging of byte extents into contiguous network ranges.
//!
//! Extents are merged only when one starts exactly where the range under
//! construction ends. The merge is order-sensitive: callers must feed extents
//! in ascending offset order to get the fewest ranges. Out-of-order input is
//! still correct (every byte is covered exactly as declared) but can produce
//! more requests than a sorted merge would.

use crate::io::ContiguousRange;

/// Builds the list of contiguous ranges for one prepare step.
#[derive(Debug, Default)]
pub struct RangeCoalescer {
    current: Option<ContiguousRange>,
    ranges: Vec<ContiguousRange>,
    finished: bool,
}

impl RangeCoalescer {
    /// An empty coalescer; `finish` returns no ranges until an extent is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// A coalescer whose first range is already open at `start..=end`.
    pub fn seeded(start: u64, end: u64) -> Self {
        Self {
            current: Some(ContiguousRange::new(start, end)),
            ranges: Vec::new(),
            finished: false,
        }
    }

    /// Add the next extent in discovery order. Zero-length extents are ignored.
    pub fn add_extent(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        self.finished = false;
        let end = offset + (length - 1);

        match self.current.as_mut() {
            Some(current) if current.end.checked_add(1) == Some(offset) => {
                current.end = end;
            }
            Some(current) => {
                self.ranges.push(*current);
                self.current = Some(ContiguousRange::new(offset, end));
            }
            None => {
                self.current = Some(ContiguousRange::new(offset, end));
            }
        }
    }

    /// Close the open range and return every range built so far.
    ///
    /// Calling this twice does not duplicate the last range.
    pub fn finish(&mut self) -> &[ContiguousRange] {
        if !self.finished {
            if let Some(current) = self.current.take() {
                self.ranges.push(current);
            }
            self.finished = true;
        }
        &self.ranges
    }

    /// Finish and take ownership of the ranges.
    pub fn into_ranges(mut self) -> Vec<ContiguousRange> {
        self.finish();
        self.ranges
    }

    /// Number of ranges produced so far, counting the open one.
    pub fn len(&self) -> usize {
        self.ranges.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coalesce `(offset, length)` pairs in the order given.
pub fn coalesce<I>(extents: I) -> Vec<ContiguousRange>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut coalescer = RangeCoalescer::new();
    for (offset, length) in extents {
        coalescer.add_extent(offset, length);
    }
    coalescer.into_ranges()
}
