//! Masks
//!
//! A [`Mask`] is an immutable, fixed-size bit set naming a subset of the
//! elements of an output. Masks are stored as run-length encoded ranges of
//! set bits and shared behind an [`Arc`], so copying a mask is a reference
//! count increment and two masks compare equal exactly when they contain the
//! same bits.
//!
//! # Canonical Form
//!
//! Runs are sorted, non-empty, and never touch: for consecutive runs `a` and
//! `b`, `a.end < b.start`. Every constructor and operation produces this form,
//! which is what makes derived structural equality correct.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

type Runs = SmallVec<[Range<usize>; 2]>;

#[derive(Debug, PartialEq, Eq, Hash)]
struct MaskData {
    size: usize,
    runs: Runs,
}

/// An immutable bit set over `0..size`.
#[derive(Clone, Eq, Hash)]
pub struct Mask {
    data: Arc<MaskData>,
}

impl Mask {
    fn from_runs(size: usize, runs: Runs) -> Self {
        debug_assert!(is_canonical(size, &runs), "non-canonical mask runs");
        Self {
            data: Arc::new(MaskData { size, runs }),
        }
    }

    /// A mask of `size` bits with none set.
    pub fn empty(size: usize) -> Self {
        Self::from_runs(size, Runs::new())
    }

    /// A mask of `size` bits with every bit set.
    pub fn all_ones(size: usize) -> Self {
        let mut runs = Runs::new();
        if size > 0 {
            runs.push(0..size);
        }
        Self::from_runs(size, runs)
    }

    /// A mask with the bits in `range` set. Bits beyond `size` are dropped.
    pub fn from_range(size: usize, range: Range<usize>) -> Self {
        let range = range.start.min(size)..range.end.min(size);
        let mut runs = Runs::new();
        if !range.is_empty() {
            runs.push(range);
        }
        Self::from_runs(size, runs)
    }

    /// A mask with the given indices set. Duplicates are allowed and indices
    /// at or beyond `size` are ignored.
    pub fn from_indices(size: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut sorted: Vec<usize> = indices.into_iter().filter(|&i| i < size).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut runs = Runs::new();
        for index in sorted {
            match runs.last_mut() {
                Some(last) if last.end == index => last.end += 1,
                _ => runs.push(index..index + 1),
            }
        }
        Self::from_runs(size, runs)
    }

    /// A mask from a slice of booleans, one per bit.
    pub fn from_bits(bits: &[bool]) -> Self {
        Self::from_indices(
            bits.len(),
            bits.iter().enumerate().filter(|(_, b)| **b).map(|(i, _)| i),
        )
    }

    /// Number of bits in the mask.
    pub fn size(&self) -> usize {
        self.data.size
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.data.runs.iter().map(|r| r.len()).sum()
    }

    pub fn is_all_zeros(&self) -> bool {
        self.data.runs.is_empty()
    }

    pub fn is_any_set(&self) -> bool {
        !self.is_all_zeros()
    }

    pub fn is_all_ones(&self) -> bool {
        self.count() == self.size()
    }

    /// Whether bit `index` is set.
    pub fn contains(&self, index: usize) -> bool {
        let runs = &self.data.runs;
        let pos = runs.partition_point(|r| r.end <= index);
        runs.get(pos).is_some_and(|r| r.start <= index)
    }

    pub fn first_set(&self) -> Option<usize> {
        self.data.runs.first().map(|r| r.start)
    }

    pub fn last_set(&self) -> Option<usize> {
        self.data.runs.last().map(|r| r.end - 1)
    }

    /// The ranges of set bits, in order.
    pub fn runs(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.data.runs.iter().cloned()
    }

    /// The indices of set bits, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.data.runs.iter().flat_map(|r| r.clone())
    }

    /// Bitwise AND.
    pub fn and(&self, other: &Mask) -> Mask {
        let size = self.combined_size(other);
        let (a, b) = (&self.data.runs, &other.data.runs);
        let mut runs = Runs::new();
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            let start = a[i].start.max(b[j].start);
            let end = a[i].end.min(b[j].end);
            if start < end {
                runs.push(start..end);
            }
            if a[i].end < b[j].end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Mask::from_runs(size, runs)
    }

    /// Bitwise OR.
    pub fn or(&self, other: &Mask) -> Mask {
        if Arc::ptr_eq(&self.data, &other.data) {
            return self.clone();
        }
        let size = self.combined_size(other);
        let mut merged: Vec<Range<usize>> = self
            .data
            .runs
            .iter()
            .chain(other.data.runs.iter())
            .cloned()
            .collect();
        merged.sort_unstable_by_key(|r| r.start);

        let mut runs = Runs::new();
        for range in merged {
            match runs.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => runs.push(range),
            }
        }
        Mask::from_runs(size, runs)
    }

    /// The bits of `self` that are not set in `other`.
    pub fn subtract(&self, other: &Mask) -> Mask {
        if other.is_all_zeros() {
            return self.clone();
        }
        self.and(&other.complement_within(self.combined_size(other)))
    }

    /// Every bit in `0..size` not set in `self`.
    pub fn complement(&self) -> Mask {
        self.complement_within(self.size())
    }

    fn complement_within(&self, size: usize) -> Mask {
        let mut runs = Runs::new();
        let mut cursor = 0;
        for range in self.data.runs.iter() {
            if range.start > cursor {
                runs.push(cursor..range.start);
            }
            cursor = range.end;
        }
        if cursor < size {
            runs.push(cursor..size);
        }
        Mask::from_runs(size, runs)
    }

    /// Whether every bit set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.subtract(other).is_all_zeros()
    }

    /// Whether the two masks share any set bit.
    pub fn overlaps(&self, other: &Mask) -> bool {
        self.and(other).is_any_set()
    }

    fn combined_size(&self, other: &Mask) -> usize {
        debug_assert_eq!(
            self.size(),
            other.size(),
            "combining masks of different sizes"
        );
        self.size().max(other.size())
    }
}

fn is_canonical(size: usize, runs: &[Range<usize>]) -> bool {
    runs.iter().all(|r| r.start < r.end && r.end <= size)
        && runs.windows(2).all(|w| w[0].end < w[1].start)
}

impl PartialEq for Mask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data) || self.data == other.data
    }
}

impl Default for Mask {
    fn default() -> Self {
        Mask::empty(0)
    }
}

/// Run-length form: `size[runs]`, e.g. `8[0-2,5]`.
impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.size())?;
        for (i, range) in self.data.runs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if range.len() == 1 {
                write!(f, "{}", range.start)?;
            } else {
                write!(f, "{}-{}", range.start, range.end - 1)?;
            }
        }
        f.write_str("]")
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mask({self})")
    }
}
