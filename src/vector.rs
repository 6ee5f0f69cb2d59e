//! Sparse/dense hybrid vector with numerically guarded arithmetic.
//!
//! A [`NumericVector`] starts out sparse (unordered parallel arrays of positions and values)
//! and switches to a dense array once the number of nonzeros exceeds
//! `len * sparsity_ratio`. The switch back to sparse only happens explicitly, e.g. when the
//! vector is scaled by zero or cleared.
//!
//! Additions into a sparse vector go through a per-thread scratch buffer. The buffer is borrowed
//! for the duration of a single operation, so vector operations must not be re-entered on the
//! same thread while one is running (this never happens inside the crate).

use crate::helpers::SENTINEL;
use crate::numeric::Arithmetic;
use crate::sparse::ScatteredVec;
use std::cell::RefCell;
use std::fmt;

/// Default share of nonzeros above which a sparse vector becomes dense.
pub const DEFAULT_SPARSITY_RATIO: f64 = 0.05;

/// Extra capacity reserved when a sparse vector runs out of room.
const ELBOW_ROOM: usize = 5;

thread_local! {
    static SCRATCH: RefCell<ScatteredVec> = RefCell::new(ScatteredVec::empty(0));
}

/// Runs `f` with the thread's scratch buffer grown to at least `len` entries.
/// The buffer is cleared afterwards.
fn with_scratch<R>(len: usize, f: impl FnOnce(&mut ScatteredVec) -> R) -> R {
    SCRATCH.with(|cell| {
        let mut scratch = cell.borrow_mut();
        if scratch.len() < len {
            scratch.clear_and_resize(len);
        }
        let res = f(&mut scratch);
        scratch.clear();
        res
    })
}

/// Internal representation of a [`NumericVector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorType {
    /// One stored value per position.
    Dense,
    /// Unordered (position, value) pairs of the nonzeros.
    Sparse,
}

#[derive(Clone, Debug)]
enum Storage {
    Dense(Vec<f64>),
    /// `slots[i]` is the slot of position `i` in `indices`/`values`, or `SENTINEL`.
    Sparse {
        indices: Vec<usize>,
        values: Vec<f64>,
        slots: Vec<usize>,
    },
}

impl Storage {
    fn empty_sparse(len: usize) -> Storage {
        Storage::Sparse {
            indices: vec![],
            values: vec![],
            slots: vec![SENTINEL; len],
        }
    }
}

/// A vector of `f64` stored either densely or sparsely.
#[derive(Clone)]
pub struct NumericVector {
    len: usize,
    nonzeros: usize,
    storage: Storage,
    arithmetic: Arithmetic,
    sparsity_ratio: f64,
}

impl Default for NumericVector {
    /// An empty vector of length zero. This is what `std::mem::take` leaves behind.
    fn default() -> Self {
        NumericVector::sparse(0)
    }
}

impl fmt::Debug for NumericVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = self.nonzero_iter().collect::<Vec<_>>();
        entries.sort_by_key(|&(i, _)| i);
        f.debug_struct("NumericVector")
            .field("len", &self.len)
            .field("type", &self.vector_type())
            .field("nonzeros", &entries)
            .finish()
    }
}

impl PartialEq for NumericVector {
    /// Vectors are equal if they have the same length and the same value at every position,
    /// regardless of representation.
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self.nonzeros == other.nonzeros
            && self.nonzero_iter().all(|(i, v)| other.at(i) == v)
    }
}

impl NumericVector {
    /// A dense vector of zeros.
    pub fn dense(len: usize) -> NumericVector {
        NumericVector {
            len,
            nonzeros: 0,
            storage: Storage::Dense(vec![0.0; len]),
            arithmetic: Arithmetic::default(),
            sparsity_ratio: DEFAULT_SPARSITY_RATIO,
        }
    }

    /// A sparse vector of zeros.
    pub fn sparse(len: usize) -> NumericVector {
        NumericVector {
            len,
            nonzeros: 0,
            storage: Storage::empty_sparse(len),
            arithmetic: Arithmetic::default(),
            sparsity_ratio: DEFAULT_SPARSITY_RATIO,
        }
    }

    /// A dense copy of a slice.
    pub fn from_dense(values: &[f64]) -> NumericVector {
        let nonzeros = values.iter().filter(|&&v| v != 0.0).count();
        NumericVector {
            nonzeros,
            storage: Storage::Dense(values.to_vec()),
            ..NumericVector::dense(0)
        }
        .with_len(values.len())
    }

    /// A sparse vector built from (position, value) pairs. Zero values are skipped, positions
    /// must be distinct.
    pub fn from_entries(len: usize, entries: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut res = NumericVector::sparse(len);
        res.assign_entries(entries);
        res
    }

    /// A sparse vector with a single `1.0` at position `i`.
    pub fn unit(len: usize, i: usize) -> NumericVector {
        let mut res = NumericVector::sparse(len);
        res.set(i, 1.0);
        res
    }

    fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Replaces the arithmetic used by additions and dot products of this vector.
    pub fn with_arithmetic(mut self, arithmetic: Arithmetic) -> Self {
        self.arithmetic = arithmetic;
        self
    }

    /// Replaces the sparse-to-dense switch threshold.
    pub fn with_sparsity_ratio(mut self, ratio: f64) -> Self {
        self.sparsity_ratio = ratio;
        self.maybe_densify();
        self
    }

    /// Logical length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nonzero positions.
    pub fn nonzeros(&self) -> usize {
        self.nonzeros
    }

    /// Current representation.
    pub fn vector_type(&self) -> VectorType {
        match self.storage {
            Storage::Dense(_) => VectorType::Dense,
            Storage::Sparse { .. } => VectorType::Sparse,
        }
    }

    /// True if the vector is stored sparsely.
    pub fn is_sparse(&self) -> bool {
        self.vector_type() == VectorType::Sparse
    }

    /// Arithmetic used by this vector.
    pub fn arithmetic(&self) -> Arithmetic {
        self.arithmetic
    }

    #[inline]
    fn check_index(&self, i: usize) {
        assert!(
            i < self.len,
            "invalid index {} for a vector of length {}",
            i,
            self.len
        );
    }

    /// Value at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len`.
    pub fn at(&self, i: usize) -> f64 {
        self.check_index(i);
        match &self.storage {
            Storage::Dense(data) => data[i],
            Storage::Sparse { values, slots, .. } => match slots[i] {
                SENTINEL => 0.0,
                slot => values[slot],
            },
        }
    }

    /// Sets position `i` to `val`.
    ///
    /// On a sparse vector a zero removes the entry (swapping the last entry into its slot),
    /// a nonzero is appended if the position was absent. Appending can switch the vector to
    /// the dense representation.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len`.
    pub fn set(&mut self, i: usize, val: f64) {
        self.check_index(i);
        match &mut self.storage {
            Storage::Dense(data) => {
                let old = data[i];
                if old == 0.0 && val != 0.0 {
                    self.nonzeros += 1;
                } else if old != 0.0 && val == 0.0 {
                    self.nonzeros -= 1;
                }
                data[i] = val;
            }
            Storage::Sparse {
                indices,
                values,
                slots,
            } => {
                let slot = slots[i];
                match slot {
                    SENTINEL if val == 0.0 => {}
                    SENTINEL => {
                        if indices.len() == indices.capacity() {
                            indices.reserve(ELBOW_ROOM);
                            values.reserve(ELBOW_ROOM);
                        }
                        slots[i] = indices.len();
                        indices.push(i);
                        values.push(val);
                        self.nonzeros += 1;
                        self.maybe_densify();
                    }
                    slot if val == 0.0 => {
                        swap_remove_entry(indices, values, slots, slot);
                        self.nonzeros -= 1;
                    }
                    slot => values[slot] = val,
                }
            }
        }
    }

    /// Adds `val` to position `i` using the vector's arithmetic.
    pub fn add_element(&mut self, i: usize, val: f64) {
        let cur = self.at(i);
        let sum = self.arithmetic.add(cur, val);
        self.set(i, sum);
    }

    /// Sets every position to zero and switches to the sparse representation.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Sparse {
                indices,
                values,
                slots,
            } => {
                for &i in indices.iter() {
                    slots[i] = SENTINEL;
                }
                indices.clear();
                values.clear();
            }
            Storage::Dense(_) => self.storage = Storage::empty_sparse(self.len),
        }
        self.nonzeros = 0;
    }

    /// Clears the vector and fills it from (position, value) pairs. Zero values are skipped,
    /// positions must be distinct.
    pub fn assign_entries(&mut self, entries: impl IntoIterator<Item = (usize, f64)>) {
        self.clear();
        if let Storage::Sparse {
            indices,
            values,
            slots,
        } = &mut self.storage
        {
            for (i, val) in entries {
                assert!(i < self.len, "invalid index {} for a vector of length {}", i, self.len);
                if val != 0.0 {
                    debug_assert_eq!(slots[i], SENTINEL, "position {} given twice", i);
                    slots[i] = indices.len();
                    indices.push(i);
                    values.push(val);
                }
            }
            self.nonzeros = indices.len();
        }
        self.maybe_densify();
    }

    fn densify_threshold(&self) -> f64 {
        self.len as f64 * self.sparsity_ratio
    }

    fn maybe_densify(&mut self) {
        if self.is_sparse() && self.nonzeros as f64 > self.densify_threshold() {
            self.to_dense();
        }
    }

    /// Switches to the dense representation.
    pub fn to_dense(&mut self) {
        if let Storage::Sparse { indices, values, .. } = &self.storage {
            let mut data = vec![0.0; self.len];
            for (&i, &val) in indices.iter().zip(values) {
                data[i] = val;
            }
            self.storage = Storage::Dense(data);
        }
    }

    /// Switches to the sparse representation, dropping explicit zeros.
    pub fn to_sparse(&mut self) {
        if let Storage::Dense(data) = &self.storage {
            let mut indices = Vec::with_capacity(self.nonzeros + ELBOW_ROOM);
            let mut values = Vec::with_capacity(self.nonzeros + ELBOW_ROOM);
            let mut slots = vec![SENTINEL; self.len];
            for (i, &val) in data.iter().enumerate() {
                if val != 0.0 {
                    slots[i] = indices.len();
                    indices.push(i);
                    values.push(val);
                }
            }
            self.storage = Storage::Sparse {
                indices,
                values,
                slots,
            };
        }
    }

    /// Orders the entries of a sparse vector by position. No-op for dense vectors.
    pub fn sort_elements(&mut self) {
        if let Storage::Sparse {
            indices,
            values,
            slots,
        } = &mut self.storage
        {
            let mut pairs = indices
                .iter()
                .copied()
                .zip(values.iter().copied())
                .collect::<Vec<_>>();
            pairs.sort_unstable_by_key(|&(i, _)| i);
            for (slot, (i, val)) in pairs.into_iter().enumerate() {
                indices[slot] = i;
                values[slot] = val;
                slots[i] = slot;
            }
        }
    }

    /// Multiplies every element by `lambda`. Scaling by zero clears the vector and makes it
    /// sparse again.
    pub fn scale(&mut self, lambda: f64) {
        if lambda == 0.0 {
            self.clear();
            return;
        }

        match &mut self.storage {
            Storage::Dense(data) => {
                let mut nonzeros = 0;
                for val in data.iter_mut() {
                    *val *= lambda;
                    if *val != 0.0 {
                        nonzeros += 1;
                    }
                }
                self.nonzeros = nonzeros;
            }
            Storage::Sparse {
                indices,
                values,
                slots,
            } => {
                let mut slot = 0;
                while slot < values.len() {
                    values[slot] *= lambda;
                    if values[slot] == 0.0 {
                        // underflow
                        swap_remove_entry(indices, values, slots, slot);
                    } else {
                        slot += 1;
                    }
                }
                self.nonzeros = values.len();
            }
        }
    }

    /// Computes `self += lambda * other` with the arithmetic of `self`.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn add_vector(&mut self, lambda: f64, other: &NumericVector) {
        assert_eq!(self.len, other.len, "adding vectors of different lengths");
        if lambda == 0.0 || other.nonzeros == 0 {
            return;
        }

        let arithmetic = self.arithmetic;
        match &mut self.storage {
            Storage::Dense(data) => {
                let mut nonzeros = self.nonzeros;
                for (i, val) in other.nonzero_iter() {
                    let old = data[i];
                    let new = arithmetic.add_scaled(old, lambda, val);
                    if old == 0.0 && new != 0.0 {
                        nonzeros += 1;
                    } else if old != 0.0 && new == 0.0 {
                        nonzeros -= 1;
                    }
                    data[i] = new;
                }
                self.nonzeros = nonzeros;
            }
            Storage::Sparse {
                indices,
                values,
                slots,
            } => {
                let len = self.len;
                with_scratch(len, |scratch| {
                    scratch.set(indices.iter().copied().zip(values.iter().copied()));
                    for (i, val) in other.nonzero_iter() {
                        let old = scratch.get(i);
                        *scratch.get_mut(i) = arithmetic.add_scaled(old, lambda, val);
                    }

                    for &i in indices.iter() {
                        slots[i] = SENTINEL;
                    }
                    indices.clear();
                    values.clear();
                    for (i, val) in scratch.iter() {
                        if val != 0.0 {
                            slots[i] = indices.len();
                            indices.push(i);
                            values.push(val);
                        }
                    }
                });
                self.nonzeros = self.storage_nonzeros();
                self.maybe_densify();
            }
        }
    }

    fn storage_nonzeros(&self) -> usize {
        match &self.storage {
            Storage::Dense(data) => data.iter().filter(|&&v| v != 0.0).count(),
            Storage::Sparse { values, .. } => values.len(),
        }
    }

    /// Dot product with the arithmetic of `self`.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn dot_product(&self, other: &NumericVector) -> f64 {
        assert_eq!(self.len, other.len, "dot product of vectors of different lengths");
        let mut acc = self.arithmetic.dot_accumulator();
        match (&self.storage, &other.storage) {
            (Storage::Dense(a), Storage::Dense(b)) => {
                for (&x, &y) in a.iter().zip(b) {
                    if x != 0.0 && y != 0.0 {
                        acc.push(x * y);
                    }
                }
            }
            (Storage::Dense(dense), Storage::Sparse { indices, values, .. })
            | (Storage::Sparse { indices, values, .. }, Storage::Dense(dense)) => {
                for (&i, &val) in indices.iter().zip(values) {
                    acc.push(dense[i] * val);
                }
            }
            (
                Storage::Sparse { indices, values, .. },
                Storage::Sparse {
                    indices: other_indices,
                    values: other_values,
                    ..
                },
            ) => {
                // scatter the shorter one
                let (scattered, walked) = if indices.len() <= other_indices.len() {
                    ((indices, values), (other_indices, other_values))
                } else {
                    ((other_indices, other_values), (indices, values))
                };
                with_scratch(self.len, |scratch| {
                    scratch.set(scattered.0.iter().copied().zip(scattered.1.iter().copied()));
                    for (&i, &val) in walked.0.iter().zip(walked.1) {
                        let x = scratch.get(i);
                        if x != 0.0 {
                            acc.push(x * val);
                        }
                    }
                });
            }
        }
        acc.finish()
    }

    /// Iterates over the nonzero entries as (position, value) pairs.
    ///
    /// Sparse vectors yield entries in storage order, dense ones in position order.
    pub fn nonzero_iter(&self) -> NonzeroIter<'_> {
        let inner = match &self.storage {
            Storage::Dense(data) => NonzeroInner::Dense { data, pos: 0 },
            Storage::Sparse { indices, values, .. } => NonzeroInner::Sparse {
                indices,
                values,
                slot: 0,
            },
        };
        NonzeroIter { inner }
    }

    /// Iterates over every position in order, zeros included.
    pub fn iter(&self) -> ValueIter<'_> {
        match &self.storage {
            Storage::Dense(data) => ValueIter {
                len: self.len,
                pos: 0,
                source: ValueSource::Dense(data),
            },
            Storage::Sparse { indices, values, .. } => {
                let mut sorted = indices
                    .iter()
                    .copied()
                    .zip(values.iter().copied())
                    .collect::<Vec<_>>();
                sorted.sort_unstable_by_key(|&(i, _)| i);
                ValueIter {
                    len: self.len,
                    pos: 0,
                    source: ValueSource::Sorted { entries: sorted, next: 0 },
                }
            }
        }
    }

    /// Dense copy of the contents.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut res = vec![0.0; self.len];
        for (i, val) in self.nonzero_iter() {
            res[i] = val;
        }
        res
    }

    /// Sum of absolute values.
    pub fn l1_norm(&self) -> f64 {
        self.nonzero_iter().map(|(_, v)| v.abs()).sum()
    }

    /// Euclidean norm.
    pub fn euclidean_norm(&self) -> f64 {
        self.nonzero_iter().map(|(_, v)| v * v).sum::<f64>().sqrt()
    }

    /// Position and value of the entry with the largest magnitude, if any is nonzero.
    pub fn abs_max(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, val) in self.nonzero_iter() {
            match best {
                Some((best_i, best_val))
                    if best_val.abs() > val.abs()
                        || (best_val.abs() == val.abs() && best_i < i) => {}
                _ => best = Some((i, val)),
            }
        }
        best
    }

    /// True if all stored values are finite.
    pub fn is_finite(&self) -> bool {
        self.nonzero_iter().all(|(_, v)| v.is_finite())
    }
}

/// Removes `slot` from a sparse storage, moving the last entry into it.
fn swap_remove_entry(
    indices: &mut Vec<usize>,
    values: &mut Vec<f64>,
    slots: &mut [usize],
    slot: usize,
) {
    slots[indices[slot]] = SENTINEL;
    indices.swap_remove(slot);
    values.swap_remove(slot);
    if let Some(&moved) = indices.get(slot) {
        slots[moved] = slot;
    }
}

/// Lazy iterator over the nonzero entries of a [`NumericVector`].
///
/// For sparse vectors it walks the value/index arrays by physical slot number.
#[derive(Clone, Debug)]
pub struct NonzeroIter<'a> {
    inner: NonzeroInner<'a>,
}

#[derive(Clone, Debug)]
enum NonzeroInner<'a> {
    Dense {
        data: &'a [f64],
        pos: usize,
    },
    Sparse {
        indices: &'a [usize],
        values: &'a [f64],
        slot: usize,
    },
}

impl<'a> Iterator for NonzeroIter<'a> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            NonzeroInner::Dense { data, pos } => {
                while *pos < data.len() {
                    let i = *pos;
                    *pos += 1;
                    if data[i] != 0.0 {
                        return Some((i, data[i]));
                    }
                }
                None
            }
            NonzeroInner::Sparse {
                indices,
                values,
                slot,
            } => {
                if *slot < indices.len() {
                    let s = *slot;
                    *slot += 1;
                    Some((indices[s], values[s]))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
enum ValueSource<'a> {
    Dense(&'a [f64]),
    Sorted {
        entries: Vec<(usize, f64)>,
        next: usize,
    },
}

/// Iterator over every position of a [`NumericVector`], zeros included.
#[derive(Clone, Debug)]
pub struct ValueIter<'a> {
    len: usize,
    pos: usize,
    source: ValueSource<'a>,
}

impl<'a> Iterator for ValueIter<'a> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.pos >= self.len {
            return None;
        }
        let i = self.pos;
        self.pos += 1;
        match &mut self.source {
            ValueSource::Dense(data) => Some(data[i]),
            ValueSource::Sorted { entries, next } => match entries.get(*next) {
                Some(&(idx, val)) if idx == i => {
                    *next += 1;
                    Some(val)
                }
                _ => Some(0.0),
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.len - self.pos;
        (rem, Some(rem))
    }
}

impl<'a> ExactSizeIterator for ValueIter<'a> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::StabilityMode;
    use rand::prelude::*;

    fn sorted_nonzeros(vec: &NumericVector) -> Vec<(usize, f64)> {
        let mut res = vec.nonzero_iter().collect::<Vec<_>>();
        res.sort_by_key(|&(i, _)| i);
        res
    }

    #[test]
    fn sparse_set_and_remove() {
        let mut vec = NumericVector::sparse(100);
        vec.set(10, 1.0);
        vec.set(20, 2.0);
        vec.set(30, 3.0);
        assert_eq!(vec.nonzeros(), 3);
        assert!(vec.is_sparse());

        // removal swaps the last entry into the freed slot
        vec.set(10, 0.0);
        assert_eq!(vec.nonzero_iter().collect::<Vec<_>>(), vec![(30, 3.0), (20, 2.0)]);
        assert_eq!(vec.at(10), 0.0);
        assert_eq!(vec.at(30), 3.0);

        vec.set(20, -5.0);
        assert_eq!(vec.at(20), -5.0);
        assert_eq!(vec.nonzeros(), 2);

        // writing zero to an absent position is a no-op
        vec.set(99, 0.0);
        assert_eq!(vec.nonzeros(), 2);
    }

    #[test]
    fn removing_middle_entry_keeps_lookups() {
        let mut vec = NumericVector::sparse(1000);
        for &i in &[5, 50, 500, 7, 70] {
            vec.set(i, i as f64);
        }

        // 500 sits in the middle slot, 70 is moved there
        vec.set(500, 0.0);
        assert_eq!(vec.at(500), 0.0);
        assert_eq!(vec.at(70), 70.0);
        assert_eq!(
            vec.nonzero_iter().collect::<Vec<_>>(),
            vec![(5, 5.0), (50, 50.0), (70, 70.0), (7, 7.0)]
        );

        // the moved entry is updated and removed through its new slot
        vec.set(70, -1.0);
        assert_eq!(vec.at(70), -1.0);
        vec.set(70, 0.0);
        assert_eq!(vec.at(70), 0.0);
        assert_eq!(vec.at(7), 7.0);
        assert_eq!(vec.nonzeros(), 3);

        // removing the last slot moves nothing
        vec.set(7, 0.0);
        vec.set(500, 2.0);
        assert_eq!(vec.at(500), 2.0);
        assert_eq!(sorted_nonzeros(&vec), vec![(5, 5.0), (50, 50.0), (500, 2.0)]);

        vec.sort_elements();
        vec.set(5, 0.0);
        assert_eq!(vec.nonzero_iter().collect::<Vec<_>>(), vec![(500, 2.0), (50, 50.0)]);
        assert_eq!(vec.at(50), 50.0);

        vec.add_vector(1.0, &NumericVector::unit(1000, 3));
        assert_eq!(vec.at(3), 1.0);
        vec.set(3, 0.0);
        assert_eq!(sorted_nonzeros(&vec), vec![(50, 50.0), (500, 2.0)]);

        vec.clear();
        assert_eq!(vec.at(50), 0.0);
        vec.set(50, 4.0);
        assert_eq!(vec.nonzero_iter().collect::<Vec<_>>(), vec![(50, 4.0)]);
    }

    #[test]
    fn dense_tracks_nonzeros() {
        let mut vec = NumericVector::dense(5);
        vec.set(0, 1.0);
        vec.set(0, 2.0);
        vec.set(4, 3.0);
        assert_eq!(vec.nonzeros(), 2);
        vec.set(0, 0.0);
        assert_eq!(vec.nonzeros(), 1);
        assert_eq!(vec.to_vec(), vec![0.0, 0.0, 0.0, 0.0, 3.0]);
        assert_eq!(vec.iter().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn switches_to_dense_above_ratio() {
        let mut vec = NumericVector::sparse(40).with_sparsity_ratio(0.1);
        for i in 0..4 {
            vec.set(i * 3, 1.0 + i as f64);
        }
        assert!(vec.is_sparse());
        vec.set(31, 7.0);
        assert_eq!(vec.vector_type(), VectorType::Dense);
        assert_eq!(vec.nonzeros(), 5);
        assert_eq!(vec.at(31), 7.0);
        assert_eq!(vec.at(9), 4.0);
    }

    #[test]
    fn scale_by_zero_resparsifies() {
        let mut vec = NumericVector::from_dense(&[1.0, 2.0, 0.0, 4.0]);
        assert_eq!(vec.vector_type(), VectorType::Dense);
        vec.scale(-2.0);
        assert_eq!(vec.to_vec(), vec![-2.0, -4.0, 0.0, -8.0]);
        assert_eq!(vec.nonzeros(), 3);

        vec.scale(0.0);
        assert!(vec.is_sparse());
        assert_eq!(vec.nonzeros(), 0);
        assert_eq!(vec.to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn representation_round_trip_keeps_entries() {
        let mut rng = rand_pcg::Pcg64::seed_from_u64(4242);
        for _ in 0..20 {
            let len = rng.gen_range(1, 200);
            let mut vec = NumericVector::sparse(len).with_sparsity_ratio(0.2);
            let mut expected = vec![0.0; len];
            for _ in 0..rng.gen_range(0, len + 1) {
                let i = rng.gen_range(0, len);
                let val = if rng.gen_range(0, 4) == 0 {
                    0.0
                } else {
                    rng.gen_range(-10.0, 10.0)
                };
                vec.set(i, val);
                expected[i] = val;
            }
            let before = sorted_nonzeros(&vec);
            assert_eq!(vec.to_vec(), expected);

            vec.to_dense();
            assert_eq!(sorted_nonzeros(&vec), before);
            vec.to_sparse();
            assert_eq!(sorted_nonzeros(&vec), before);
            assert_eq!(vec.nonzeros(), before.len());
        }
    }

    #[test]
    fn add_vector_all_representations() {
        let a_dense = NumericVector::from_dense(&[1.0, 0.0, 2.0, 0.0, -1.0, 0.0]);
        let b_dense = NumericVector::from_dense(&[0.0, 3.0, -1.0, 0.0, 0.5, 0.0]);
        let expected = vec![1.0, 6.0, 0.0, 0.0, 0.0, 0.0];

        for &a_sparse in &[false, true] {
            for &b_sparse in &[false, true] {
                let mut a = a_dense.clone();
                let mut b = b_dense.clone();
                if a_sparse {
                    a.to_sparse();
                }
                if b_sparse {
                    b.to_sparse();
                }
                a.add_vector(2.0, &b);
                assert_eq!(a.to_vec(), expected, "sparse: {} {}", a_sparse, b_sparse);
                assert_eq!(a.nonzeros(), 2);
            }
        }
    }

    #[test]
    fn add_vector_cancels_exactly() {
        let mut a = NumericVector::from_entries(10, vec![(1, 1.0), (5, 0.3)]);
        let b = NumericVector::from_entries(10, vec![(1, 1.0 - 1e-13), (5, 0.1)]);
        a.add_vector(-1.0, &b);
        assert_eq!(a.at(1), 0.0);
        assert_eq!(a.nonzeros(), 1);
        assert!((a.at(5) - 0.2).abs() < 1e-15);

        let mut fast = NumericVector::from_entries(10, vec![(1, 1.0)])
            .with_arithmetic(Arithmetic::with_mode(StabilityMode::Fast));
        fast.add_vector(-1.0, &b);
        assert_ne!(fast.at(1), 0.0);
    }

    #[test]
    fn dot_products() {
        let a = NumericVector::from_dense(&[1.0, 2.0, 0.0, -3.0]);
        let b = NumericVector::from_entries(4, vec![(3, 2.0), (1, 0.5), (2, 9.0)]);
        assert_eq!(a.dot_product(&b), -5.0);
        assert_eq!(b.dot_product(&a), -5.0);

        let mut a_sparse = a.clone();
        a_sparse.to_sparse();
        assert_eq!(a_sparse.dot_product(&b), -5.0);
        assert_eq!(a_sparse.dot_product(&a), 14.0);

        let mut s1 = NumericVector::sparse(100);
        s1.set(7, 2.0);
        s1.set(50, -1.0);
        let mut s2 = NumericVector::sparse(100);
        s2.set(50, 4.0);
        s2.set(3, 1.0);
        s2.set(99, 8.0);
        assert!(s1.is_sparse() && s2.is_sparse());
        assert_eq!(s1.dot_product(&s2), -4.0);
        assert_eq!(s2.dot_product(&s1), -4.0);

        // positive and negative parts cancel exactly
        let x = NumericVector::from_dense(&[1e8, 1.0, 1e8, 1.0]);
        let y = NumericVector::from_dense(&[1.0, 1.0, -1.0, -1.0]);
        assert_eq!(x.dot_product(&y), 0.0);
    }

    #[test]
    fn take_leaves_empty_vector() {
        let mut vec = NumericVector::from_entries(3, vec![(0, 1.0)]);
        let moved = std::mem::take(&mut vec);
        assert_eq!(moved.len(), 3);
        assert_eq!(moved.at(0), 1.0);
        assert!(vec.is_empty());
        assert_eq!(vec.nonzeros(), 0);
    }

    #[test]
    fn clone_is_deep() {
        let orig = NumericVector::from_entries(4, vec![(2, 5.0)]);
        let mut copy = orig.clone();
        copy.set(2, 6.0);
        copy.set(0, 1.0);
        assert_eq!(orig.at(2), 5.0);
        assert_eq!(orig.nonzeros(), 1);
        assert_ne!(orig, copy);
    }

    #[test]
    fn nonzero_iteration_is_restartable() {
        let vec = NumericVector::from_dense(&[0.0, 1.0, 0.0, 2.0]);
        let iter = vec.nonzero_iter();
        let first = iter.clone().collect::<Vec<_>>();
        let second = iter.collect::<Vec<_>>();
        assert_eq!(first, vec![(1, 1.0), (3, 2.0)]);
        assert_eq!(first, second);
    }

    #[test]
    fn norms() {
        let vec = NumericVector::from_entries(5, vec![(4, -4.0), (0, 3.0)]);
        assert_eq!(vec.l1_norm(), 7.0);
        assert_eq!(vec.euclidean_norm(), 5.0);
        assert_eq!(vec.abs_max(), Some((4, -4.0)));
        assert_eq!(NumericVector::sparse(3).abs_max(), None);
    }

    #[test]
    #[should_panic(expected = "invalid index")]
    fn out_of_range_access_panics() {
        let vec = NumericVector::dense(3);
        vec.at(3);
    }
}
