use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::error::LearningError;

/// Shuffled K-fold splitter. Indices are shuffled once with a seeded RNG and
/// cut into `n_splits` contiguous folds; the first `n % n_splits` folds get
/// one extra sample.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    n_splits: usize,
    random_state: u64,
}

/// Train and held-out row indices for one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    /// Rows to fit on.
    pub train: Vec<usize>,
    /// Rows to score.
    pub test: Vec<usize>,
}

impl KFold {
    /// Creates a splitter.
    #[must_use]
    pub const fn new(n_splits: usize, random_state: u64) -> Self {
        Self {
            n_splits,
            random_state,
        }
    }

    /// Splits `n_samples` rows. Requires `2 <= n_splits <= n_samples`.
    pub fn split(&self, n_samples: usize) -> Result<Vec<FoldSplit>, LearningError> {
        if self.n_splits < 2 || self.n_splits > n_samples {
            return Err(LearningError::InvalidFolds {
                folds: self.n_splits,
                rows: n_samples,
            });
        }
        let mut indices: Vec<usize> = (0..n_samples).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(self.random_state));

        let fold_size = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let end = start + fold_size + usize::from(fold < remainder);
            let test = indices[start..end].to_vec();
            let train = indices[..start]
                .iter()
                .chain(&indices[end..])
                .copied()
                .collect();
            folds.push(FoldSplit { train, test });
            start = end;
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_every_row_once() {
        let folds = KFold::new(3, 42).split(10).unwrap();
        assert_eq!(
            folds.iter().map(|f| f.test.len()).collect::<Vec<_>>(),
            [4, 3, 3]
        );
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 10);
            assert!(fold.test.iter().all(|row| !fold.train.contains(row)));
        }
    }

    #[test]
    fn same_seed_same_folds() {
        assert_eq!(KFold::new(4, 7).split(20).unwrap(), KFold::new(4, 7).split(20).unwrap());
    }

    #[test]
    fn rejects_impossible_fold_counts() {
        assert!(matches!(
            KFold::new(1, 0).split(10),
            Err(LearningError::InvalidFolds { folds: 1, rows: 10 })
        ));
        assert!(KFold::new(6, 0).split(5).is_err());
    }
}
