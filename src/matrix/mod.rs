use anyhow::{bail, Context, Result};
use humantime::format_duration;
use log::{debug, info, warn};
use methylome::{aggregate_dense, aggregate_sparse, ChromDataSource, RegionSet};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use crate::{
    data_load::{read_bed, DataDir},
    utils::{progress_bar, report_outputs, thread_pool},
};

pub mod args;
pub mod assembler;

pub use args::MatrixArgs;
pub use assembler::{DenseAssembler, SparseMtxWriter};

/// Run-wide state handed from one chromosome to the next. Only the
/// chromosome loop writes to it, in processing order, so region labels line
/// up with matrix columns.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub cell_names: Vec<String>,
    pub region_labels: Vec<String>,
    pub threads: usize,
    pub chunk_size: usize,
}

impl PipelineContext {
    pub fn new(cell_names: Vec<String>, threads: usize, chunk_size: usize) -> Self {
        Self {
            cell_names,
            region_labels: Vec::new(),
            threads,
            chunk_size,
        }
    }
}

enum Assembler {
    Dense(DenseAssembler),
    Sparse(SparseMtxWriter),
}

/// Quantifies every region per cell, chromosome by chromosome, and writes the
/// genome-wide matrices to `out_dir`. Chromosomes without data are skipped.
pub fn build_region_matrix<S: ChromDataSource>(
    source: &S,
    regions: &RegionSet,
    ctx: &mut PipelineContext,
    out_dir: &Path,
    sparse: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Could not create output directory: {:?}", out_dir))?;
    let pool = thread_pool(ctx.threads)?;
    debug!(
        "Aggregating with {} threads in chunks of {} regions",
        ctx.threads, ctx.chunk_size
    );

    let mut assembler = if sparse {
        Assembler::Sparse(SparseMtxWriter::create(out_dir)?)
    } else {
        Assembler::Dense(DenseAssembler::new())
    };

    let pb = progress_bar(regions.chromosomes().count() as u64)?;
    for (chrom, chrom_regions) in regions.iter() {
        pb.set_message(chrom.to_string());

        let Some(matrix) = source
            .load_matrix(chrom)
            .with_context(|| format!("Failed to load chromosome {}", chrom))?
        else {
            warn!(
                "Skipping {} region(s) on chromosome {}: no methylation data found",
                chrom_regions.len(),
                chrom
            );
            pb.inc(1);
            continue;
        };

        if matrix.n_cells() != ctx.cell_names.len() {
            bail!(
                "Chromosome {} has {} cells but {} cell names were given",
                chrom,
                matrix.n_cells(),
                ctx.cell_names.len()
            );
        }
        let smoothed = source.load_smoothed(chrom, matrix.chrom_len())?;

        let region_offset = ctx.region_labels.len();
        match &mut assembler {
            Assembler::Dense(dense) => {
                dense.push(pool.install(|| {
                    aggregate_dense(&matrix, &smoothed, chrom_regions, ctx.chunk_size)
                })?);
            }
            Assembler::Sparse(writer) => {
                let entries = pool.install(|| {
                    aggregate_sparse(&matrix, &smoothed, chrom_regions, ctx.chunk_size)
                })?;
                writer.append(&entries, region_offset)?;
            }
        }
        ctx.region_labels
            .extend(chrom_regions.iter().map(|region| region.label()));

        debug!(
            "Quantified {} regions on chromosome {}",
            chrom_regions.len(),
            chrom
        );
        pb.inc(1);
    }
    pb.finish_and_clear();

    if ctx.region_labels.is_empty() {
        warn!("None of the regions lie on a chromosome with methylation data");
    }

    match assembler {
        Assembler::Dense(dense) => dense.finish(out_dir, &ctx.cell_names, &ctx.region_labels),
        Assembler::Sparse(writer) => writer.finalize(&ctx.region_labels, &ctx.cell_names),
    }
}

pub fn region_matrix(args: MatrixArgs, threads: usize) -> Result<()> {
    info!("Running scbs 'matrix' with {} threads", threads);
    let start = Instant::now();

    let data = DataDir::open(&args.input)
        .with_context(|| format!("Error loading data directory: '{}'", args.input))?;
    info!("Loaded {} cells", data.cell_names().len());

    let regions = read_bed(&args.regions)
        .with_context(|| format!("Error loading regions from path: '{}'", args.regions))?;
    if regions.is_empty() {
        bail!("No regions found in {}", args.regions);
    }
    info!(
        "Quantifying {} regions on {} chromosomes",
        regions.len(),
        regions.chromosomes().count()
    );

    let mut ctx = PipelineContext::new(data.cell_names().to_vec(), threads, args.chunk_size);
    let outputs = build_region_matrix(
        &data,
        &regions,
        &mut ctx,
        Path::new(&args.output),
        args.sparse,
    )?;

    report_outputs(&outputs);
    info!(
        "Finished {} regions in {}",
        ctx.region_labels.len(),
        format_duration(start.elapsed())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_load::memory::MemorySource;
    use crate::utils::open_text;
    use methylome::{Region, SmoothedProfile, SparseChromMatrix};
    use std::io::Read;
    use tempfile::tempdir;

    fn read_gz(path: &Path) -> Result<String> {
        let mut content = String::new();
        open_text(path)?.read_to_string(&mut content)?;
        Ok(content)
    }

    fn test_source() -> Result<MemorySource> {
        let mut source = MemorySource::default();
        source.insert(
            "chr1",
            SparseChromMatrix::from_triplets(4, 2, vec![(0, 0, 1), (1, 0, -1), (1, 1, 1), (3, 1, -1)])?,
            SmoothedProfile::new(vec![0.5; 4]),
        );
        source.insert(
            "chr2",
            SparseChromMatrix::from_triplets(3, 2, vec![(0, 1, 1), (2, 0, 1)])?,
            SmoothedProfile::new(vec![0.25; 3]),
        );
        Ok(source)
    }

    fn test_regions() -> RegionSet {
        [
            Region::new("chr2", 0, 2),
            Region::new("chr1", 0, 1),
            Region::new("chr1", 5, 9),
            Region::new("chrX", 0, 100),
        ]
        .into_iter()
        .collect()
    }

    fn test_context() -> PipelineContext {
        PipelineContext::new(vec!["c1".to_string(), "c2".to_string()], 1, 2)
    }

    #[test]
    fn test_dense_region_matrix() -> Result<()> {
        let dir = tempdir()?;
        let source = test_source()?;
        let mut ctx = test_context();

        let outputs =
            build_region_matrix(&source, &test_regions(), &mut ctx, dir.path(), false)?;
        assert_eq!(outputs.len(), 4);
        assert_eq!(ctx.region_labels, vec!["chr1:0-1", "chr1:5-9", "chr2:0-2"]);

        let header = ",chr1:0-1,chr1:5-9,chr2:0-2\n";
        assert_eq!(
            read_gz(&dir.path().join(assembler::METHYLATION_FRACTIONS))?,
            format!("{}c1,0.5,,1\nc2,1,,1\n", header)
        );
        assert_eq!(
            read_gz(&dir.path().join(assembler::MEAN_SHRUNKEN_RESIDUALS))?,
            format!("{}c1,0,,0.375\nc2,0.25,,0.375\n", header)
        );
        assert_eq!(
            read_gz(&dir.path().join(assembler::TOTAL_SITES))?,
            format!("{}c1,2,0,1\nc2,1,0,1\n", header)
        );
        assert_eq!(
            read_gz(&dir.path().join(assembler::METHYLATED_SITES))?,
            format!("{}c1,1,0,1\nc2,1,0,1\n", header)
        );
        Ok(())
    }

    #[test]
    fn test_sparse_region_matrix_offsets_regions() -> Result<()> {
        let dir = tempdir()?;
        let source = test_source()?;
        let mut ctx = test_context();

        build_region_matrix(&source, &test_regions(), &mut ctx, dir.path(), true)?;

        // chr2:0-2 is the first region of chr2, preceded by two chr1 regions.
        assert_eq!(
            read_gz(&dir.path().join(assembler::MTX))?,
            "%%MatrixMarket matrix coordinate real general\n\
             % cell region shrunken_residual methylation_fraction\n\
             2 3 4\n\
             1 1 0 0.5\n\
             2 1 0.25 1\n\
             1 3 0.375 1\n\
             2 3 0.375 1\n"
        );
        assert_eq!(
            read_gz(&dir.path().join(assembler::FEATURES))?,
            "chr1:0-1\nchr1:5-9\nchr2:0-2\n"
        );
        assert_eq!(read_gz(&dir.path().join(assembler::BARCODES))?, "c1\nc2\n");
        assert!(!dir.path().join(assembler::MTX_BODY).exists());
        Ok(())
    }

    #[test]
    fn test_zero_threads_rejected() -> Result<()> {
        let dir = tempdir()?;
        let source = test_source()?;
        let mut ctx = PipelineContext::new(vec!["c1".to_string(), "c2".to_string()], 0, 2);

        let result = build_region_matrix(&source, &test_regions(), &mut ctx, dir.path(), false);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_cell_count_mismatch() -> Result<()> {
        let dir = tempdir()?;
        let source = test_source()?;
        let mut ctx = PipelineContext::new(vec!["c1".to_string()], 1, 2);

        let result = build_region_matrix(&source, &test_regions(), &mut ctx, dir.path(), false);
        assert!(result.is_err());
        Ok(())
    }
}
