use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use methylome::{ChromDataSource, Region, RegionSet, SmoothedProfile, SparseChromMatrix};
use serde::Deserialize;
use std::{
    fs,
    io::BufRead,
    path::{Path, PathBuf},
};

use crate::utils::open_text;

const CELL_NAMES_FILE: &str = "column_header.txt";
const SMOOTHED_DIR: &str = "smoothed";
const MATRIX_EXTENSIONS: [&str; 2] = [".tsv.gz", ".tsv"];

#[derive(Debug, Deserialize)]
struct CallRecord {
    position: usize,
    cell: u32,
    call: i8,
}

#[derive(Debug, Deserialize)]
struct SmoothedRecord {
    position: usize,
    value: Option<f64>,
}

/// Per-chromosome methylation data laid out in one directory:
///
/// - `column_header.txt`: one cell identifier per line.
/// - `{chrom}.tsv.gz` or `{chrom}.tsv`: `position<TAB>cell<TAB>call` rows.
/// - `smoothed/{chrom}.csv`: `position,smoothed_value` rows.
pub struct DataDir {
    root: PathBuf,
    cell_names: Vec<String>,
}

impl DataDir {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            bail!("Data directory does not exist: {:?}", root);
        }

        let cell_names = read_cell_names(root.join(CELL_NAMES_FILE))?;
        if cell_names.is_empty() {
            bail!("No cell names found in {:?}", root.join(CELL_NAMES_FILE));
        }

        Ok(Self { root, cell_names })
    }

    pub fn cell_names(&self) -> &[String] {
        &self.cell_names
    }

    fn matrix_path(&self, chrom: &str) -> Option<PathBuf> {
        MATRIX_EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}{}", chrom, ext)))
            .find(|p| p.is_file())
    }
}

impl ChromDataSource for DataDir {
    fn chromosomes(&self) -> Result<Vec<String>> {
        let mut chroms = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list data directory: {:?}", self.root))?
        {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(chrom) = MATRIX_EXTENSIONS
                .iter()
                .find_map(|ext| name.strip_suffix(ext))
            {
                chroms.push(chrom.to_string());
            }
        }
        chroms.sort();
        chroms.dedup();
        Ok(chroms)
    }

    fn size_hint(&self, chrom: &str) -> Result<u64> {
        match self.matrix_path(chrom) {
            Some(path) => Ok(fs::metadata(path)?.len()),
            None => Ok(0),
        }
    }

    fn load_matrix(&self, chrom: &str) -> Result<Option<SparseChromMatrix>> {
        let Some(path) = self.matrix_path(chrom) else {
            return Ok(None);
        };
        debug!("Loading methylation calls from {:?}", path);

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .from_reader(open_text(&path)?);

        let mut triplets = Vec::new();
        let mut chrom_len = 0;
        for (line, row) in rdr.deserialize::<CallRecord>().enumerate() {
            let rec = row.with_context(|| {
                format!("Invalid methylation call in {:?} at line {}", path, line + 1)
            })?;
            chrom_len = chrom_len.max(rec.position + 1);
            triplets.push((rec.position, rec.cell, rec.call));
        }

        let matrix = SparseChromMatrix::from_triplets(chrom_len, self.cell_names.len(), triplets)
            .with_context(|| format!("Malformed methylation matrix for chromosome {}", chrom))?;
        Ok(Some(matrix))
    }

    fn load_smoothed(&self, chrom: &str, chrom_len: usize) -> Result<SmoothedProfile> {
        let path = self.root.join(SMOOTHED_DIR).join(format!("{}.csv", chrom));
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .from_reader(open_text(&path).with_context(|| {
                format!("No smoothed values for chromosome {}", chrom)
            })?);

        let points = rdr
            .deserialize::<SmoothedRecord>()
            .map(|row| row.map(|rec| (rec.position, rec.value.unwrap_or(f64::NAN))))
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid smoothed value in {:?}", path))?;

        SmoothedProfile::from_points(chrom_len, points)
            .with_context(|| format!("Smoothed values do not fit chromosome {}", chrom))
    }
}

pub fn read_cell_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut names = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| format!("Failed to read cell names from {:?}", path))?;
        let name = line.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// First three BED columns. Trailing columns are ignored.
#[derive(Debug, Deserialize)]
struct BedRecord {
    chrom: String,
    start: usize,
    end: usize,
}

fn is_bed_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|field| field.starts_with("track") || field.starts_with("browser"))
        .unwrap_or(false)
}

/// Reads `chrom start end ...` rows of a BED file, grouped by chromosome.
pub fn read_bed<P: AsRef<Path>>(path: P) -> Result<RegionSet> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(open_text(path)?);

    let mut regions = RegionSet::new();
    let mut record = StringRecord::new();
    let mut line = 0;
    while rdr
        .read_record(&mut record)
        .with_context(|| format!("Failed to read BED file {:?}", path))?
    {
        line += 1;
        if is_bed_header(&record) {
            continue;
        }
        let bed: BedRecord = record
            .deserialize(None)
            .with_context(|| format!("Invalid BED record in {:?} at line {}", path, line))?;
        regions.push(Region::new(&bed.chrom, bed.start, bed.end));
    }
    Ok(regions)
}
