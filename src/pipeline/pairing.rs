//! Pair enumeration within one page of search results.

/// Every unordered pair `(i, j)` with `i < j < n`, in row-major order.
pub fn unordered_pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
}

/// `n * (n - 1) / 2`, the number of pairs [`unordered_pairs`] yields.
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}
