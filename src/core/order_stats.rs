//! Descending ranking of scored collections by index permutation.
//!
//! Only the index array moves; genome payloads stay where they are. Missing and
//! NaN scores rank as negative infinity, i.e. last.

use crate::genome::Genome;

/// Partitions at or below this length are finished with insertion sort.
pub const INSERTION_CUTOFF: usize = 16;

#[inline]
pub fn score_key(score: Option<f64>) -> f64 {
    match score {
        Some(v) if !v.is_nan() => v,
        _ => f64::NEG_INFINITY,
    }
}

/// Reusable buffers for ranking. Not reentrant: one owner per run.
#[derive(Debug, Default, Clone)]
pub struct RankBuffers {
    pub keys: Vec<f64>,
    pub order: Vec<usize>,
    stack: Vec<(usize, usize)>,
}

impl RankBuffers {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            keys: Vec::with_capacity(n),
            order: Vec::with_capacity(n),
            stack: Vec::with_capacity(64),
        }
    }

    /// Rank arbitrary optional scores; result is left in `self.order`.
    pub fn rank_scores(&mut self, scores: impl IntoIterator<Item = Option<f64>>) -> &[usize] {
        self.keys.clear();
        self.keys.extend(scores.into_iter().map(score_key));
        sort_desc(&self.keys, &mut self.order, &mut self.stack);
        &self.order
    }

    pub fn rank_genomes(&mut self, population: &[Genome]) -> &[usize] {
        self.rank_scores(population.iter().map(|g| g.score))
    }
}

/// Convenience wrapper that allocates its own buffers.
pub fn ranked_desc(scores: &[Option<f64>]) -> Vec<usize> {
    let mut buf = RankBuffers::with_capacity(scores.len());
    buf.rank_scores(scores.iter().copied());
    buf.order
}

/// Index-array quicksort, descending by `keys`.
///
/// Median-of-three pivot, insertion sort below [`INSERTION_CUTOFF`], explicit stack.
/// The larger partition is pushed first so the smaller one is processed next,
/// bounding the stack at O(log n).
pub fn sort_desc(keys: &[f64], order: &mut Vec<usize>, stack: &mut Vec<(usize, usize)>) {
    let n = keys.len();
    order.clear();
    order.extend(0..n);
    stack.clear();
    if n < 2 {
        return;
    }
    stack.push((0, n - 1));

    while let Some((lo, hi)) = stack.pop() {
        if hi - lo + 1 <= INSERTION_CUTOFF {
            insertion_desc(keys, &mut order[lo..=hi]);
            continue;
        }

        let mid = lo + (hi - lo) / 2;
        if keys[order[mid]] > keys[order[lo]] {
            order.swap(mid, lo);
        }
        if keys[order[hi]] > keys[order[lo]] {
            order.swap(hi, lo);
        }
        if keys[order[hi]] > keys[order[mid]] {
            order.swap(hi, mid);
        }
        // Now keys[lo] >= keys[mid] >= keys[hi]; lo and hi act as sentinels.
        let pivot = keys[order[mid]];
        order.swap(mid, hi - 1);

        let mut i = lo;
        let mut j = hi - 1;
        loop {
            i += 1;
            while keys[order[i]] > pivot {
                i += 1;
            }
            j -= 1;
            while keys[order[j]] < pivot {
                j -= 1;
            }
            if i >= j {
                break;
            }
            order.swap(i, j);
        }
        order.swap(i, hi - 1);

        let left = (lo, i.saturating_sub(1));
        let right = (i + 1, hi);
        let left_len = if i > lo { i - lo } else { 0 };
        let right_len = hi - i;

        let (big, big_len, small, small_len) = if left_len >= right_len {
            (left, left_len, right, right_len)
        } else {
            (right, right_len, left, left_len)
        };
        if big_len > 1 {
            stack.push(big);
        }
        if small_len > 1 {
            stack.push(small);
        }
    }
}

fn insertion_desc(keys: &[f64], seg: &mut [usize]) {
    for i in 1..seg.len() {
        let cur = seg[i];
        let k = keys[cur];
        let mut j = i;
        while j > 0 && keys[seg[j - 1]] < k {
            seg[j] = seg[j - 1];
            j -= 1;
        }
        seg[j] = cur;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::Prng;

    fn is_descending(keys: &[f64], order: &[usize]) -> bool {
        order.windows(2).all(|w| keys[w[0]] >= keys[w[1]])
    }

    #[test]
    fn missing_and_nan_scores_rank_last() {
        let scores = [Some(5.0), Some(f64::NAN), Some(3.0), Some(9.0), None];
        let order = ranked_desc(&scores);
        assert_eq!(&order[..3], &[3, 0, 2]);
        let mut tail = order[3..].to_vec();
        tail.sort_unstable();
        assert_eq!(tail, vec![1, 4]);
    }

    #[test]
    fn large_random_input_matches_reference_sort() {
        let mut rng = Prng::new(17);
        let scores: Vec<Option<f64>> = (0..5000)
            .map(|i| match i % 37 {
                0 => None,
                1 => Some(f64::NAN),
                _ => Some(rng.gen_range_f64(-100.0, 100.0)),
            })
            .collect();

        let mut buf = RankBuffers::default();
        buf.rank_scores(scores.iter().copied());
        assert!(is_descending(&buf.keys, &buf.order));

        let mut seen = buf.order.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..scores.len()).collect::<Vec<_>>());
    }

    #[test]
    fn heavy_ties_and_presorted_inputs() {
        let ties: Vec<Option<f64>> = (0..1000).map(|i| Some((i % 3) as f64)).collect();
        let mut buf = RankBuffers::default();
        buf.rank_scores(ties.iter().copied());
        assert!(is_descending(&buf.keys, &buf.order));

        let ascending: Vec<Option<f64>> = (0..777).map(|i| Some(i as f64)).collect();
        let order = ranked_desc(&ascending);
        assert_eq!(order[0], 776);
        assert_eq!(order[776], 0);

        let same = vec![Some(1.0); 64];
        assert_eq!(ranked_desc(&same).len(), 64);
    }

    #[test]
    fn trivial_sizes() {
        assert!(ranked_desc(&[]).is_empty());
        assert_eq!(ranked_desc(&[None]), vec![0]);
        assert_eq!(ranked_desc(&[Some(1.0), Some(2.0)]), vec![1, 0]);
    }
}
