use ahash::AHashMap;
use anyhow::{bail, Result};
use log::debug;
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use crate::region::{interval_bounds, Region};
use crate::smoothed::SmoothedProfile;
use crate::sparse::{MethylationCall, SparseChromMatrix};

/// Default number of regions handed to one worker at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Running sum of residuals from the smoothed baseline.
///
/// `None` until the first observation arrives, so "no data" never reads as a
/// residual of exactly zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShrinkageSum(Option<f64>);

impl ShrinkageSum {
    #[inline]
    pub fn add(&mut self, residual: f64) {
        self.0 = Some(self.0.unwrap_or(0.0) + residual);
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    /// Mean residual shrunken toward zero by one pseudo-observation.
    pub fn shrink(&self, n_total: u32) -> Option<f64> {
        self.0.map(|sum| sum / (n_total as f64 + 1.0))
    }
}

/// Counts and residual sum of one cell inside one region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellTally {
    pub n_meth: u32,
    pub n_total: u32,
    pub shrinkage: ShrinkageSum,
}

impl CellTally {
    /// Adds one call at a CpG whose smoothed methylation level is `baseline`.
    #[inline]
    pub fn observe(&mut self, call: MethylationCall, baseline: f64) {
        self.n_total += 1;
        match call {
            MethylationCall::Methylated => {
                self.n_meth += 1;
                self.shrinkage.add(1.0 - baseline);
            }
            MethylationCall::Unmethylated => self.shrinkage.add(-baseline),
        }
    }

    pub fn shrunken_residual(&self) -> Option<f64> {
        self.shrinkage.shrink(self.n_total)
    }

    pub fn methylation_fraction(&self) -> Option<f64> {
        if self.n_total == 0 {
            None
        } else {
            Some(self.n_meth as f64 / self.n_total as f64)
        }
    }
}

/// Tallies of the cells observed in one region, sorted by cell index.
pub type RegionTally = Vec<(usize, CellTally)>;

/// Tallies every cell observed in positions `start..end` (end exclusive).
/// The result is sorted by cell index.
pub fn tally_interval(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    start: usize,
    end: usize,
) -> RegionTally {
    let mut tallies: AHashMap<usize, CellTally> = AHashMap::new();

    for obs in matrix.observations(start, end) {
        tallies
            .entry(obs.cell)
            .or_default()
            .observe(obs.call, smoothed.get(obs.position));
    }

    let mut tallies: RegionTally = tallies.into_iter().collect();
    tallies.sort_unstable_by_key(|(cell, _)| *cell);
    tallies
}

/// Tallies one region, clamped to the chromosome. Regions outside the
/// chromosome yield no tallies.
pub fn tally_region(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    region: &Region,
) -> RegionTally {
    match region.bounds(matrix.chrom_len()) {
        Some((start, end)) => tally_interval(matrix, smoothed, start, end),
        None => Vec::new(),
    }
}

/// Shrunken residual of every cell over the inclusive interval `start..=end`.
pub fn region_residuals(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    start: usize,
    end: usize,
) -> Vec<Option<f64>> {
    let mut residuals = vec![None; matrix.n_cells()];

    if let Some((start, end)) = interval_bounds(start, end, matrix.chrom_len()) {
        for (cell, tally) in tally_interval(matrix, smoothed, start, end) {
            residuals[cell] = tally.shrunken_residual();
        }
    }
    residuals
}

/// Cells × regions matrices of one chromosome.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseAggregate {
    pub n_meth: Array2<u32>,
    pub n_total: Array2<u32>,
    pub shrunken_residuals: Array2<Option<f64>>,
}

impl DenseAggregate {
    pub fn n_cells(&self) -> usize {
        self.n_total.nrows()
    }

    pub fn n_regions(&self) -> usize {
        self.n_total.ncols()
    }

    /// `n_meth / n_total`, `None` where a cell has no calls in a region.
    pub fn methylation_fractions(&self) -> Array2<Option<f64>> {
        Zip::from(&self.n_meth)
            .and(&self.n_total)
            .map_collect(|&meth, &total| {
                if total == 0 {
                    None
                } else {
                    Some(meth as f64 / total as f64)
                }
            })
    }
}

fn tally_regions(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    regions: &[Region],
    chunk_size: usize,
) -> Result<Vec<RegionTally>> {
    if chunk_size == 0 {
        bail!("Region chunk size must be at least 1");
    }
    debug!(
        "Tallying {} regions over {} cells in chunks of {}",
        regions.len(),
        matrix.n_cells(),
        chunk_size
    );

    Ok(regions
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| {
            chunk
                .iter()
                .map(|region| tally_region(matrix, smoothed, region))
        })
        .collect())
}

/// Aggregates methylation per cell and region into dense matrices.
///
/// Regions are processed in parallel chunks of `chunk_size`; every region owns
/// its own column, so the result does not depend on the number of workers.
///
/// # Errors
/// Returns an error if `chunk_size` is 0.
pub fn aggregate_dense(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    regions: &[Region],
    chunk_size: usize,
) -> Result<DenseAggregate> {
    let tallies = tally_regions(matrix, smoothed, regions, chunk_size)?;

    let shape = (matrix.n_cells(), regions.len());
    let mut n_meth = Array2::<u32>::zeros(shape);
    let mut n_total = Array2::<u32>::zeros(shape);
    let mut shrunken_residuals = Array2::<Option<f64>>::from_elem(shape, None);

    for (region_i, region_tallies) in tallies.iter().enumerate() {
        for (cell, tally) in region_tallies {
            n_meth[[*cell, region_i]] = tally.n_meth;
            n_total[[*cell, region_i]] = tally.n_total;
            shrunken_residuals[[*cell, region_i]] = tally.shrunken_residual();
        }
    }

    Ok(DenseAggregate {
        n_meth,
        n_total,
        shrunken_residuals,
    })
}

/// One defined entry of the sparse cells × regions output.
///
/// `cell` and `region` are 1-based; `region` counts from the first region of
/// the chromosome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseEntry {
    pub cell: usize,
    pub region: usize,
    pub shrunken_residual: f64,
    pub methylation_fraction: f64,
}

/// Sparse counterpart of [`aggregate_dense`]: only (cell, region) pairs with a
/// defined methylation fraction are returned, ordered by region then cell.
///
/// # Errors
/// Returns an error if `chunk_size` is 0.
pub fn aggregate_sparse(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    regions: &[Region],
    chunk_size: usize,
) -> Result<Vec<SparseEntry>> {
    let tallies = tally_regions(matrix, smoothed, regions, chunk_size)?;

    let entries = tallies
        .into_par_iter()
        .enumerate()
        .flat_map_iter(|(region_i, region_tallies)| {
            region_tallies.into_iter().filter_map(move |(cell, tally)| {
                match (tally.methylation_fraction(), tally.shrunken_residual()) {
                    (Some(fraction), Some(residual)) => Some(SparseEntry {
                        cell: cell + 1,
                        region: region_i + 1,
                        shrunken_residual: residual,
                        methylation_fraction: fraction,
                    }),
                    _ => None,
                }
            })
        })
        .collect();

    Ok(entries)
}
