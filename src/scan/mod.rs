use anyhow::{bail, Context, Result};
use humantime::format_duration;
use indicatif::ParallelProgressIterator;
use log::{debug, info, warn};
use methylome::{
    find_peaks, region_residuals, stats, ChromDataSource, Peaks, SmoothedProfile,
    SparseChromMatrix,
};
use rayon::prelude::*;
use std::{io::Write, time::Instant};

use crate::{
    data_load::DataDir,
    utils::{output_writer, progress_bar, thread_pool},
};

pub mod args;

pub use args::ScanArgs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    pub bandwidth: u64,
    pub stepsize: u64,
    pub var_threshold: f64,
    pub threads: usize,
}

impl ScanParams {
    pub fn new(bandwidth: u64, stepsize: u64, var_threshold: f64) -> Result<Self> {
        if bandwidth == 0 {
            bail!("Bandwidth must be at least 1");
        }
        if stepsize == 0 {
            bail!("Step size must be at least 1");
        }
        if !(var_threshold > 0.0 && var_threshold < 1.0) {
            bail!(
                "Variance threshold must lie between 0 and 1, got {}",
                var_threshold
            );
        }
        Ok(Self {
            bandwidth,
            stepsize,
            var_threshold,
            threads: 1,
        })
    }

    pub fn with_threads(self, threads: usize) -> Self {
        Self { threads, ..self }
    }

    pub fn half_bw(&self) -> u64 {
        self.bandwidth / 2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanSummary {
    pub var_cutoff: Option<f64>,
    pub n_peaks: usize,
}

/// Centers of all windows whose footprint lies strictly inside the covered
/// part of the chromosome.
pub fn window_centers(covered: &[usize], half_bw: u64, stepsize: u64) -> Vec<u64> {
    let (Some(&first), Some(&last)) = (covered.first(), covered.last()) else {
        return Vec::new();
    };

    let start = first as u64 + half_bw + 1;
    let end = (last as u64).saturating_sub(half_bw + 1);
    (start..end).step_by(stepsize as usize).collect()
}

/// Variance across cells of the shrunken residuals in each window
/// `[center - half_bw, center + half_bw]`. Computed in parallel, returned in
/// window order.
pub fn window_variances(
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
    centers: &[u64],
    half_bw: u64,
) -> Result<Vec<f64>> {
    let pb = progress_bar(centers.len() as u64)?;
    let variances = centers
        .par_iter()
        .progress_with(pb.clone())
        .map(|&center| {
            let residuals = region_residuals(
                matrix,
                smoothed,
                center.saturating_sub(half_bw) as usize,
                (center + half_bw) as usize,
            );
            stats::variance_of_defined(&residuals)
        })
        .collect();
    pb.finish_and_clear();
    Ok(variances)
}

fn write_peaks<W: Write>(
    out: &mut W,
    chrom: &str,
    peaks: &Peaks,
    matrix: &SparseChromMatrix,
    smoothed: &SmoothedProfile,
) -> Result<()> {
    for (start, end) in peaks.iter() {
        let residuals = region_residuals(matrix, smoothed, start as usize, end as usize);
        let peak_var = stats::variance_of_defined(&residuals);
        writeln!(out, "{}\t{}\t{}\t{}", chrom, start, end, peak_var)?;
    }
    Ok(())
}

/// Slides a window along every chromosome, largest first, and writes the
/// merged high-variance regions as BED lines to `out`.
///
/// The variance cutoff is the `1 - var_threshold` quantile of the window
/// variances of the largest chromosome and is reused for all others.
pub fn scan_chromosomes<S: ChromDataSource, W: Write>(
    source: &S,
    params: &ScanParams,
    out: &mut W,
) -> Result<ScanSummary> {
    let mut chroms = source
        .chromosomes()?
        .into_iter()
        .map(|chrom| source.size_hint(&chrom).map(|size| (chrom, size)))
        .collect::<Result<Vec<_>>>()?;
    chroms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let pool = thread_pool(params.threads)?;
    let half_bw = params.half_bw();
    let mut summary = ScanSummary::default();

    for (chrom, _) in chroms {
        let Some(matrix) = source
            .load_matrix(&chrom)
            .with_context(|| format!("Failed to load chromosome {}", chrom))?
        else {
            warn!("Skipping chromosome {}: no methylation data found", chrom);
            continue;
        };
        let smoothed = source.load_smoothed(&chrom, matrix.chrom_len())?;

        info!("Scanning chromosome {} ...", chrom);
        let centers = window_centers(&matrix.covered_positions(), half_bw, params.stepsize);
        let variances =
            pool.install(|| window_variances(&matrix, &smoothed, &centers, half_bw))?;
        debug!("Scanned {} windows on chromosome {}", centers.len(), chrom);

        let var_cutoff = match summary.var_cutoff {
            Some(cutoff) => cutoff,
            None => {
                let cutoff = stats::nanquantile(&variances, 1.0 - params.var_threshold);
                if cutoff.is_nan() {
                    warn!(
                        "No window variance on chromosome {}, cannot determine the variance threshold yet",
                        chrom
                    );
                    continue;
                }
                info!("Determined the variance threshold of {}.", cutoff);
                summary.var_cutoff = Some(cutoff);
                cutoff
            }
        };

        let peaks = find_peaks(&variances, &centers, var_cutoff, half_bw)?;
        write_peaks(out, &chrom, &peaks, &matrix, &smoothed)?;

        if peaks.is_empty() {
            info!("Found no variable regions on chromosome {}.", chrom);
        } else {
            info!(
                "Found {} variable regions on chromosome {}.",
                peaks.len(),
                chrom
            );
        }
        summary.n_peaks += peaks.len();
    }

    out.flush()?;
    Ok(summary)
}

pub fn scan(args: ScanArgs, threads: usize) -> Result<()> {
    info!("Running scbs 'scan' with {} threads", threads);
    let start = Instant::now();

    let params =
        ScanParams::new(args.bandwidth, args.stepsize, args.var_threshold)?.with_threads(threads);
    let data = DataDir::open(&args.input)
        .with_context(|| format!("Error loading data directory: '{}'", args.input))?;

    let mut out = output_writer(&args.output)?;
    let summary = scan_chromosomes(&data, &params, &mut out)?;

    if summary.n_peaks == 0 {
        warn!("Found no variably methylated regions");
    }
    info!(
        "Found {} variable regions in {}",
        summary.n_peaks,
        format_duration(start.elapsed())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_load::memory::MemorySource;
    use assert_approx_eq::assert_approx_eq;

    // 200 positions and 10 cells, all covered. Inside 80..=119 half of the
    // cells are methylated around a baseline of 0.5; elsewhere every cell
    // matches a baseline of 1.
    fn variable_chromosome() -> Result<(SparseChromMatrix, SmoothedProfile)> {
        let mut triplets = Vec::new();
        let mut smoothed = Vec::new();
        for position in 0..200 {
            let variable = (80..120).contains(&position);
            for cell in 0..10u32 {
                let call = if variable && cell >= 5 { -1 } else { 1 };
                triplets.push((position, cell, call));
            }
            smoothed.push(if variable { 0.5 } else { 1.0 });
        }
        Ok((
            SparseChromMatrix::from_triplets(200, 10, triplets)?,
            SmoothedProfile::new(smoothed),
        ))
    }

    fn uniform_chromosome(len: usize) -> Result<(SparseChromMatrix, SmoothedProfile)> {
        let triplets = (0..len)
            .flat_map(|position| (0..10u32).map(move |cell| (position, cell, 1)))
            .collect();
        Ok((
            SparseChromMatrix::from_triplets(len, 10, triplets)?,
            SmoothedProfile::new(vec![1.0; len]),
        ))
    }

    #[test]
    fn test_scan_params_validation() {
        assert!(ScanParams::new(2000, 100, 0.02).is_ok());
        assert!(ScanParams::new(2000, 0, 0.02).is_err());
        assert!(ScanParams::new(0, 100, 0.02).is_err());
        assert!(ScanParams::new(2000, 100, 0.0).is_err());
        assert!(ScanParams::new(2000, 100, 1.5).is_err());
    }

    #[test]
    fn test_window_centers() {
        let covered = vec![3, 10, 50];
        assert_eq!(window_centers(&covered, 5, 10), vec![9, 19, 29, 39]);
        assert!(window_centers(&[3, 10], 5, 10).is_empty());
        assert!(window_centers(&[], 5, 10).is_empty());
    }

    #[test]
    fn test_window_variances() -> Result<()> {
        let (matrix, smoothed) = variable_chromosome()?;

        let variances = window_variances(&matrix, &smoothed, &[30, 100, 75], 10)?;
        assert_eq!(variances.len(), 3);
        assert_approx_eq!(variances[0], 0.0);
        // fully inside the variable block: residuals of +-10.5 / 22
        assert_approx_eq!(variances[1], (10.5f64 / 22.0).powi(2));
        // 6 of 21 positions inside the block
        assert_approx_eq!(variances[2], (3.0f64 / 22.0).powi(2));
        Ok(())
    }

    #[test]
    fn test_scan_finds_variable_region() -> Result<()> {
        let mut source = MemorySource::default();
        let (matrix, smoothed) = variable_chromosome()?;
        source.insert("chr1", matrix, smoothed);
        let (matrix, smoothed) = uniform_chromosome(100)?;
        source.insert("chr2", matrix, smoothed);

        let params = ScanParams::new(20, 5, 0.02)?;
        let mut out = Vec::new();
        let summary = scan_chromosomes(&source, &params, &mut out)?;

        assert_eq!(summary.n_peaks, 1);
        assert_approx_eq!(summary.var_cutoff.unwrap(), (10.5f64 / 22.0).powi(2));

        let out = String::from_utf8(out)?;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);

        let fields: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(&fields[..3], &["chr1", "81", "116"]);
        let peak_var: f64 = fields[3].parse()?;
        assert_approx_eq!(peak_var, (18.0f64 / 37.0).powi(2));
        Ok(())
    }

    #[test]
    fn test_scan_is_independent_of_thread_count() -> Result<()> {
        let mut source = MemorySource::default();
        let (matrix, smoothed) = variable_chromosome()?;
        source.insert("chr1", matrix, smoothed);
        let params = ScanParams::new(20, 5, 0.02)?;

        let mut single = Vec::new();
        scan_chromosomes(&source, &params, &mut single)?;
        let mut multi = Vec::new();
        scan_chromosomes(&source, &params.with_threads(4), &mut multi)?;
        assert_eq!(single, multi);

        let mut out = Vec::new();
        assert!(scan_chromosomes(&source, &params.with_threads(0), &mut out).is_err());
        Ok(())
    }

    #[test]
    fn test_scan_without_windows() -> Result<()> {
        let mut source = MemorySource::default();
        let (matrix, smoothed) = uniform_chromosome(15)?;
        source.insert("chr1", matrix, smoothed);

        let params = ScanParams::new(20, 5, 0.02)?;
        let mut out = Vec::new();
        let summary = scan_chromosomes(&source, &params, &mut out)?;

        assert_eq!(summary, ScanSummary::default());
        assert!(out.is_empty());
        Ok(())
    }
}
