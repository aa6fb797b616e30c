use anyhow::{bail, Result};
use std::fmt;

/// Methylation call of a single cell at a single CpG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethylationCall {
    Methylated,
    Unmethylated,
}

impl MethylationCall {
    pub fn from_code(code: i8) -> Result<Self> {
        match code {
            1 => Ok(MethylationCall::Methylated),
            -1 => Ok(MethylationCall::Unmethylated),
            _ => bail!("Unsupported methylation call code: {}", code),
        }
    }

    pub fn to_code(&self) -> i8 {
        match self {
            MethylationCall::Methylated => 1,
            MethylationCall::Unmethylated => -1,
        }
    }
}

impl fmt::Display for MethylationCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MethylationCall::Methylated => write!(f, "methylated (1)"),
            MethylationCall::Unmethylated => write!(f, "unmethylated (-1)"),
        }
    }
}

/// One methylation call, located by CpG position and cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub position: usize,
    pub cell: usize,
    pub call: MethylationCall,
}

/// Per-chromosome methylation calls in compressed sparse row layout.
///
/// Rows are genomic positions, columns are cells. The observations of
/// position `p` are `values[row_offset[p]..row_offset[p + 1]]` with the
/// matching cells in `cell_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseChromMatrix {
    values: Vec<i8>,
    cell_index: Vec<u32>,
    row_offset: Vec<usize>,
    n_cells: usize,
}

impl SparseChromMatrix {
    /// Wraps a CSR triple after checking that it is well formed.
    ///
    /// # Errors
    /// Returns an error if:
    /// - `row_offset` is empty, does not start at 0, decreases anywhere, or does
    ///   not end at the number of stored values.
    /// - `values` and `cell_index` differ in length.
    /// - a cell index is not below `n_cells`.
    /// - a value is neither `1` nor `-1`.
    pub fn new(
        values: Vec<i8>,
        cell_index: Vec<u32>,
        row_offset: Vec<usize>,
        n_cells: usize,
    ) -> Result<Self> {
        if values.len() != cell_index.len() {
            bail!(
                "Malformed sparse matrix: {} values but {} cell indices",
                values.len(),
                cell_index.len()
            );
        }

        match row_offset.first() {
            None => bail!("Malformed sparse matrix: row offsets are empty"),
            Some(&first) if first != 0 => {
                bail!("Malformed sparse matrix: row offsets start at {} instead of 0", first)
            }
            _ => {}
        }

        if let Some(p) = row_offset.windows(2).position(|w| w[1] < w[0]) {
            bail!(
                "Malformed sparse matrix: row offsets decrease at position {} ({} -> {})",
                p,
                row_offset[p],
                row_offset[p + 1]
            );
        }

        let last = row_offset[row_offset.len() - 1];
        if last != values.len() {
            bail!(
                "Malformed sparse matrix: last row offset ({}) does not match the number of values ({})",
                last,
                values.len()
            );
        }

        if let Some(&cell) = cell_index.iter().find(|&&c| c as usize >= n_cells) {
            bail!(
                "Malformed sparse matrix: cell index {} out of range for {} cells",
                cell,
                n_cells
            );
        }

        if let Some(&code) = values.iter().find(|&&v| v != 1 && v != -1) {
            bail!("Malformed sparse matrix: unsupported call code {}", code);
        }

        Ok(Self {
            values,
            cell_index,
            row_offset,
            n_cells,
        })
    }

    /// Builds the CSR layout from unordered `(position, cell, call code)` triplets.
    pub fn from_triplets(
        n_positions: usize,
        n_cells: usize,
        mut triplets: Vec<(usize, u32, i8)>,
    ) -> Result<Self> {
        if let Some(&(position, _, _)) = triplets.iter().find(|t| t.0 >= n_positions) {
            bail!(
                "Position {} out of range for a chromosome of {} positions",
                position,
                n_positions
            );
        }

        triplets.sort_unstable_by_key(|&(position, cell, _)| (position, cell));

        if let Some(w) = triplets
            .windows(2)
            .find(|w| w[0].0 == w[1].0 && w[0].1 == w[1].1)
        {
            bail!(
                "Duplicate call for cell {} at position {}",
                w[0].1,
                w[0].0
            );
        }

        let mut row_offset = vec![0usize; n_positions + 1];
        for &(position, _, _) in &triplets {
            row_offset[position + 1] += 1;
        }
        for p in 0..n_positions {
            row_offset[p + 1] += row_offset[p];
        }

        let (cell_index, values) = triplets.into_iter().map(|(_, c, v)| (c, v)).unzip();

        Self::new(values, cell_index, row_offset, n_cells)
    }

    /// Number of positions (rows) covered by the matrix.
    pub fn chrom_len(&self) -> usize {
        self.row_offset.len() - 1
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_len(&self, position: usize) -> usize {
        self.row_offset[position + 1] - self.row_offset[position]
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }

    pub fn cell_index(&self) -> &[u32] {
        &self.cell_index
    }

    pub fn row_offset(&self) -> &[usize] {
        &self.row_offset
    }

    /// Positions with at least one observation, ascending.
    pub fn covered_positions(&self) -> Vec<usize> {
        (0..self.chrom_len())
            .filter(|&p| self.row_len(p) > 0)
            .collect()
    }

    /// Iterates the observations of positions `start..end`.
    ///
    /// `end` is exclusive and is truncated to the chromosome length. An empty or
    /// out of range interval yields nothing.
    pub fn observations(&self, start: usize, end: usize) -> PositionObservations<'_> {
        let end = end.min(self.chrom_len());
        let start = start.min(end);

        PositionObservations {
            matrix: self,
            position: start,
            remaining: if start < end { self.row_len(start) } else { 0 },
            cursor: self.row_offset[start],
            stop: self.row_offset[end],
        }
    }
}

/// Walks the flattened CSR slice of an interval.
///
/// The stored values carry no position; the walker keeps a count of the
/// observations left at the current position and moves the position cursor
/// forward whenever that count reaches zero, skipping empty rows.
pub struct PositionObservations<'a> {
    matrix: &'a SparseChromMatrix,
    position: usize,
    remaining: usize,
    cursor: usize,
    stop: usize,
}

impl Iterator for PositionObservations<'_> {
    type Item = Observation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.stop {
            return None;
        }

        // cursor < stop guarantees a non-empty row before the interval end
        while self.remaining == 0 {
            self.position += 1;
            self.remaining = self.matrix.row_len(self.position);
        }
        self.remaining -= 1;

        let i = self.cursor;
        self.cursor += 1;

        let call = if self.matrix.values[i] == 1 {
            MethylationCall::Methylated
        } else {
            MethylationCall::Unmethylated
        };

        Some(Observation {
            position: self.position,
            cell: self.matrix.cell_index[i] as usize,
            call,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.stop - self.cursor;
        (n, Some(n))
    }
}

impl ExactSizeIterator for PositionObservations<'_> {}
