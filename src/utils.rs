use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::ops::Range;

/// Rounds `count` up to whole blocks of `2^log_block_size` primitives.
#[inline]
pub(crate) fn blocks(count: usize, log_block_size: usize) -> usize {
    (count + (1 << log_block_size) - 1) >> log_block_size
}

/// Owning storage for a primitive array that is mutated from multiple
/// workers over disjoint index ranges.
///
/// The partition and temporal-split reductions hand each worker its own
/// sub-range; this wrapper only checks bounds, the range discipline is up
/// to the caller.
#[derive(Debug)]
pub struct SharedVec<T> {
    data: UnsafeCell<Box<[T]>>,
}

unsafe impl<T: Send> Send for SharedVec<T> {}
unsafe impl<T: Send> Sync for SharedVec<T> {}

impl<T> SharedVec<T> {
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: UnsafeCell::new(data.into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        unsafe { (&*self.data.get()).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> &T {
        debug_assert!(idx < self.len());
        unsafe { &(*self.data.get())[idx] }
    }

    pub fn set(&self, idx: usize, val: T) {
        debug_assert!(idx < self.len());
        unsafe {
            (*self.data.get())[idx] = val;
        }
    }

    pub fn slice(&self, begin: usize, end: usize) -> &[T] {
        debug_assert!(begin <= end && end <= self.len());
        unsafe { &(&*self.data.get())[begin..end] }
    }

    /// Mutable view of [begin, end). Concurrent callers must hold
    /// disjoint ranges.
    #[allow(clippy::mut_from_ref)]
    pub fn range(&self, begin: usize, end: usize) -> &mut [T] {
        debug_assert!(begin <= end && end <= self.len());
        unsafe { &mut (&mut *self.data.get())[begin..end] }
    }
}

/// Partitions `slice` in place by `pred`, folding every element into the
/// accumulator of the side it lands on. Returns how many elements went
/// left.
pub(crate) fn partition_fold<T, A, P, F>(
    slice: &mut [T],
    pred: &P,
    fold: &F,
    left: &mut A,
    right: &mut A,
) -> usize
where
    P: Fn(&T) -> bool,
    F: Fn(&mut A, &T),
{
    let mut pivot = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            fold(left, &slice[i]);
            slice.swap(i, pivot);
            pivot += 1;
        } else {
            fold(right, &slice[i]);
        }
    }
    pivot
}

/// Block-decomposed parallel variant of [`partition_fold`].
///
/// Each block of `block_size` elements is partitioned locally in
/// parallel; a fix-up pass on the calling thread then swaps the misplaced
/// stragglers across the global pivot. Side assignment depends only on
/// element values and block boundaries, so the result is reproducible.
pub(crate) fn parallel_partition_fold<T, A, P, F, M>(
    slice: &mut [T],
    block_size: usize,
    parallel_threshold: usize,
    identity: A,
    pred: &P,
    fold: &F,
    merge: &M,
) -> (usize, A, A)
where
    T: Send,
    A: Send + Sync + Clone,
    P: Fn(&T) -> bool + Sync,
    F: Fn(&mut A, &T) + Sync,
    M: Fn(&mut A, &A),
{
    if slice.len() < parallel_threshold {
        let mut left = identity.clone();
        let mut right = identity;
        let pivot = partition_fold(slice, pred, fold, &mut left, &mut right);
        return (pivot, left, right);
    }

    let parts: Vec<(usize, A, A)> = slice
        .par_chunks_mut(block_size)
        .map(|chunk| {
            let mut left = identity.clone();
            let mut right = identity.clone();
            let pivot = partition_fold(chunk, pred, fold, &mut left, &mut right);
            (pivot, left, right)
        })
        .collect();

    let mut left = identity.clone();
    let mut right = identity;
    let mut total_left = 0;
    for (count, l, r) in &parts {
        total_left += count;
        merge(&mut left, l);
        merge(&mut right, r);
    }

    // Every block is now [lefts][rights]; swap the right-side elements
    // stranded before the pivot with the left-side ones after it.
    let len = slice.len();
    let (mut i, mut j) = (0, total_left);
    while i < total_left && j < len {
        while i < total_left && pred(&slice[i]) {
            i += 1;
        }
        while j < len && !pred(&slice[j]) {
            j += 1;
        }
        if i < total_left && j < len {
            slice.swap(i, j);
            i += 1;
            j += 1;
        }
    }

    (total_left, left, right)
}

/// Folds `fold_range` over [range) in blocks of `block_size`, merging the
/// per-block results in block order so the outcome does not depend on
/// scheduling.
pub(crate) fn parallel_reduce<A, M, R>(
    range: Range<usize>,
    block_size: usize,
    parallel_threshold: usize,
    identity: A,
    fold_range: M,
    merge: R,
) -> A
where
    A: Send,
    M: Fn(Range<usize>) -> A + Sync,
    R: Fn(A, A) -> A,
{
    if range.len() < parallel_threshold {
        return fold_range(range);
    }

    let chunks: Vec<Range<usize>> = range
        .clone()
        .step_by(block_size)
        .map(|begin| begin..(begin + block_size).min(range.end))
        .collect();

    let parts: Vec<A> = chunks.into_par_iter().map(&fold_range).collect();
    parts.into_iter().fold(identity, merge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_fold_counts_both_sides() {
        let mut values = vec![5, 1, 8, 2, 9, 3];
        let mut evens = 0usize;
        let mut odds = 0usize;
        let pivot = partition_fold(
            &mut values,
            &|v: &i32| v % 2 == 0,
            &|acc: &mut usize, _| *acc += 1,
            &mut evens,
            &mut odds,
        );
        assert_eq!(pivot, 2);
        assert_eq!(evens, 2);
        assert_eq!(odds, 4);
        assert!(values[..pivot].iter().all(|v| v % 2 == 0));
        assert!(values[pivot..].iter().all(|v| v % 2 != 0));
    }

    #[test]
    fn parallel_partition_matches_serial() {
        let input: Vec<u32> = (0u32..10_000)
            .map(|i| i.wrapping_mul(2654435761) % 1000)
            .collect();
        let pred = |v: &u32| *v < 500;

        let mut serial = input.clone();
        let mut l = 0usize;
        let mut r = 0usize;
        let serial_pivot =
            partition_fold(&mut serial, &pred, &|acc: &mut usize, _| *acc += 1, &mut l, &mut r);

        let mut parallel = input.clone();
        let (pivot, left, right) = parallel_partition_fold(
            &mut parallel,
            128,
            1024,
            0usize,
            &pred,
            &|acc: &mut usize, _| *acc += 1,
            &|acc: &mut usize, other| *acc += *other,
        );

        assert_eq!(pivot, serial_pivot);
        assert_eq!(left, l);
        assert_eq!(right, r);
        assert!(parallel[..pivot].iter().all(|v| pred(v)));
        assert!(parallel[pivot..].iter().all(|v| !pred(v)));

        let mut a = parallel;
        let mut b = serial;
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn parallel_reduce_sums_in_block_order() {
        let sum = parallel_reduce(
            0..100_000,
            1024,
            3072,
            0u64,
            |r| r.map(|i| i as u64).sum::<u64>(),
            |a, b| a + b,
        );
        assert_eq!(sum, 100_000 * 99_999 / 2);
    }

    #[test]
    fn shared_vec_range_views() {
        let shared = SharedVec::from_vec(vec![0u32; 8]);
        shared.set(3, 7);
        assert_eq!(*shared.get(3), 7);
        shared.range(4, 8).iter_mut().for_each(|v| *v = 1);
        assert_eq!(shared.slice(0, 8), &[0, 0, 0, 7, 1, 1, 1, 1]);
    }
}
