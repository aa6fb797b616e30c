use anyhow::{anyhow, bail, Context, Result};
use flate2::write::GzEncoder;
use log::debug;
use methylome::{DenseAggregate, SparseEntry};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::utils::{gz_tempfile, persist_gz, write_lines_gz};

pub const METHYLATION_FRACTIONS: &str = "methylation_fractions.csv.gz";
pub const MEAN_SHRUNKEN_RESIDUALS: &str = "mean_shrunken_residuals.csv.gz";
pub const TOTAL_SITES: &str = "total_sites.csv.gz";
pub const METHYLATED_SITES: &str = "methylated_sites.csv.gz";

pub const MTX_BODY: &str = "matrix.mtx";
pub const MTX: &str = "matrix.mtx.gz";
pub const FEATURES: &str = "features.tsv.gz";
pub const BARCODES: &str = "barcodes.tsv.gz";

/// Collects per-chromosome dense aggregates and writes genome-wide tables.
#[derive(Debug, Default)]
pub struct DenseAssembler {
    parts: Vec<DenseAggregate>,
}

fn concat_columns<T: Clone>(n_cells: usize, parts: &[ArrayView2<T>]) -> Result<Array2<T>> {
    if parts.is_empty() {
        return Ok(Array2::from_shape_vec((n_cells, 0), Vec::new())?);
    }
    concatenate(Axis(1), parts).context("Could not concatenate chromosome matrices")
}

fn format_optional(value: &Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_table<T, F>(
    out_dir: &Path,
    name: &str,
    cell_names: &[String],
    region_labels: &[String],
    table: &Array2<T>,
    format: F,
) -> Result<PathBuf>
where
    F: Fn(&T) -> String,
{
    let path = out_dir.join(name);
    let mut wtr = csv::Writer::from_writer(gz_tempfile(out_dir)?);

    let header = std::iter::once("").chain(region_labels.iter().map(|l| l.as_str()));
    wtr.write_record(header)?;

    for (cell_name, row) in cell_names.iter().zip(table.rows()) {
        let record = std::iter::once(cell_name.clone()).chain(row.iter().map(&format));
        wtr.write_record(record)
            .with_context(|| format!("Failed to write row for cell {}", cell_name))?;
    }

    let encoder = wtr
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush {:?}: {}", path, e.error()))?;
    persist_gz(encoder, &path)?;
    Ok(path)
}

impl DenseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, aggregate: DenseAggregate) {
        self.parts.push(aggregate);
    }

    pub fn n_regions(&self) -> usize {
        self.parts.iter().map(|p| p.n_regions()).sum()
    }

    /// Concatenates all chromosomes in push order and writes the four tables
    /// to `out_dir`. Rows are cells, columns are regions.
    pub fn finish(
        self,
        out_dir: &Path,
        cell_names: &[String],
        region_labels: &[String],
    ) -> Result<Vec<PathBuf>> {
        if self.n_regions() != region_labels.len() {
            bail!(
                "Assembled {} regions but got {} region labels",
                self.n_regions(),
                region_labels.len()
            );
        }
        let n_cells = cell_names.len();
        if let Some(part) = self.parts.iter().find(|p| p.n_cells() != n_cells) {
            bail!(
                "Chromosome matrix has {} cells, expected {}",
                part.n_cells(),
                n_cells
            );
        }

        let n_meth = concat_columns(
            n_cells,
            &self.parts.iter().map(|p| p.n_meth.view()).collect::<Vec<_>>(),
        )?;
        let n_total = concat_columns(
            n_cells,
            &self.parts.iter().map(|p| p.n_total.view()).collect::<Vec<_>>(),
        )?;
        let residuals = concat_columns(
            n_cells,
            &self
                .parts
                .iter()
                .map(|p| p.shrunken_residuals.view())
                .collect::<Vec<_>>(),
        )?;
        let genome = DenseAggregate {
            n_meth,
            n_total,
            shrunken_residuals: residuals,
        };
        let methylation_fractions = genome.methylation_fractions();

        debug!(
            "Writing dense matrices with {} cells and {} regions",
            n_cells,
            region_labels.len()
        );
        Ok(vec![
            write_table(
                out_dir,
                METHYLATION_FRACTIONS,
                cell_names,
                region_labels,
                &methylation_fractions,
                format_optional,
            )?,
            write_table(
                out_dir,
                MEAN_SHRUNKEN_RESIDUALS,
                cell_names,
                region_labels,
                &genome.shrunken_residuals,
                format_optional,
            )?,
            write_table(
                out_dir,
                TOTAL_SITES,
                cell_names,
                region_labels,
                &genome.n_total,
                |v| v.to_string(),
            )?,
            write_table(
                out_dir,
                METHYLATED_SITES,
                cell_names,
                region_labels,
                &genome.n_meth,
                |v| v.to_string(),
            )?,
        ])
    }
}

/// Streams sparse entries into an uncompressed MatrixMarket body while
/// chromosomes finish, then compresses it with its header in `finalize`.
pub struct SparseMtxWriter {
    out_dir: PathBuf,
    body_path: PathBuf,
    body: BufWriter<File>,
    n_entries: usize,
}

impl SparseMtxWriter {
    pub fn create(out_dir: &Path) -> Result<Self> {
        let body_path = out_dir.join(MTX_BODY);
        let file = File::create(&body_path)
            .with_context(|| format!("Failed to create file at: {:?}", body_path))?;

        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            body_path,
            body: BufWriter::new(file),
            n_entries: 0,
        })
    }

    pub fn n_entries(&self) -> usize {
        self.n_entries
    }

    /// Appends the entries of one chromosome. `region_offset` is the number of
    /// regions written by all previous chromosomes.
    pub fn append(&mut self, entries: &[SparseEntry], region_offset: usize) -> Result<()> {
        for entry in entries {
            writeln!(
                self.body,
                "{} {} {} {}",
                entry.cell,
                entry.region + region_offset,
                entry.shrunken_residual,
                entry.methylation_fraction
            )?;
        }
        self.body
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.body_path))?;
        self.n_entries += entries.len();
        Ok(())
    }

    fn write_mtx(
        &self,
        gz: &mut GzEncoder<NamedTempFile>,
        n_cells: usize,
        n_regions: usize,
    ) -> Result<()> {
        writeln!(gz, "%%MatrixMarket matrix coordinate real general")?;
        writeln!(gz, "% cell region shrunken_residual methylation_fraction")?;
        writeln!(gz, "{} {} {}", n_cells, n_regions, self.n_entries)?;

        let mut body = File::open(&self.body_path)
            .with_context(|| format!("Failed to open: {:?}", self.body_path))?;
        io::copy(&mut body, gz)?;
        Ok(())
    }

    /// Writes `matrix.mtx.gz`, `features.tsv.gz` and `barcodes.tsv.gz`, and
    /// removes the uncompressed body.
    pub fn finalize(
        mut self,
        region_labels: &[String],
        cell_names: &[String],
    ) -> Result<Vec<PathBuf>> {
        self.body.flush()?;

        let mtx_path = self.out_dir.join(MTX);
        let mut gz = gz_tempfile(&self.out_dir)?;
        self.write_mtx(&mut gz, cell_names.len(), region_labels.len())?;
        persist_gz(gz, &mtx_path)?;

        let SparseMtxWriter {
            out_dir,
            body_path,
            body,
            ..
        } = self;
        drop(body);
        fs::remove_file(&body_path)
            .with_context(|| format!("Failed to remove {:?}", body_path))?;

        let features_path = out_dir.join(FEATURES);
        write_lines_gz(&features_path, region_labels)?;
        let barcodes_path = out_dir.join(BARCODES);
        write_lines_gz(&barcodes_path, cell_names)?;

        Ok(vec![mtx_path, features_path, barcodes_path])
    }
}
