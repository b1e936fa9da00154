use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of a deterministic shuffled split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrainTestSplit {
    pub(crate) train: Vec<usize>,
    /// Held-out rows in their original order.
    pub(crate) test: Vec<usize>,
}

/// Number of held-out rows: `ceil(rows × ratio)`.
pub(crate) fn test_size(rows: usize, ratio: f64) -> usize {
    // Absorb float noise so 10 × 0.3 stays 3 rather than rounding up to 4.
    (rows as f64 * ratio - 1e-9).ceil().max(0.0) as usize
}

/// `None` when either side of the split would be empty.
pub(crate) fn train_test_split(rows: usize, ratio: f64, seed: u64) -> Option<TrainTestSplit> {
    let test_rows = test_size(rows, ratio);
    if test_rows == 0 || test_rows >= rows {
        return None;
    }

    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut test = order[..test_rows].to_vec();
    test.sort_unstable();
    let train = order[test_rows..].to_vec();
    Some(TrainTestSplit { train, test })
}
