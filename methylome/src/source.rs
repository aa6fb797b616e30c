use anyhow::Result;

use crate::smoothed::SmoothedProfile;
use crate::sparse::SparseChromMatrix;

/// Where per-chromosome methylation data comes from.
///
/// `load_matrix` returns `Ok(None)` when a chromosome has no data; callers skip
/// such chromosomes. Any `Err` aborts the chromosome.
pub trait ChromDataSource {
    /// Chromosomes with a loadable matrix.
    fn chromosomes(&self) -> Result<Vec<String>>;

    /// Relative amount of data for `chrom`, used to order chromosomes by size.
    fn size_hint(&self, chrom: &str) -> Result<u64>;

    fn load_matrix(&self, chrom: &str) -> Result<Option<SparseChromMatrix>>;

    fn load_smoothed(&self, chrom: &str, chrom_len: usize) -> Result<SmoothedProfile>;
}
