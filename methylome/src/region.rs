use std::collections::BTreeMap;
use std::fmt;

/// A genomic interval as listed in a BED file. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub chrom: String,
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub fn new(chrom: &str, start: usize, end: usize) -> Self {
        Self {
            chrom: chrom.to_string(),
            start,
            end,
        }
    }

    /// Label used as matrix column name, `chrom:start-end`.
    pub fn label(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.start, self.end)
    }

    /// Exclusive position range of the region on a chromosome of `chrom_len`
    /// positions.
    ///
    /// Returns `None` when the region starts beyond the chromosome or is empty.
    /// A region running past the chromosome end is truncated.
    pub fn bounds(&self, chrom_len: usize) -> Option<(usize, usize)> {
        interval_bounds(self.start, self.end, chrom_len)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

pub(crate) fn interval_bounds(start: usize, end: usize, chrom_len: usize) -> Option<(usize, usize)> {
    if start > chrom_len {
        return None;
    }
    let end = end.saturating_add(1).min(chrom_len);
    if start >= end {
        return None;
    }
    Some((start, end))
}

/// Regions grouped per chromosome.
///
/// Chromosomes iterate in lexicographic order; regions of one chromosome keep
/// their input order.
#[derive(Debug, Default, Clone)]
pub struct RegionSet {
    by_chrom: BTreeMap<String, Vec<Region>>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, region: Region) {
        self.by_chrom
            .entry(region.chrom.clone())
            .or_default()
            .push(region);
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = &str> {
        self.by_chrom.keys().map(|c| c.as_str())
    }

    pub fn get(&self, chrom: &str) -> Option<&[Region]> {
        self.by_chrom.get(chrom).map(|r| r.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Region])> {
        self.by_chrom
            .iter()
            .map(|(chrom, regions)| (chrom.as_str(), regions.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chrom.is_empty()
    }
}

impl FromIterator<Region> for RegionSet {
    fn from_iter<T: IntoIterator<Item = Region>>(iter: T) -> Self {
        let mut set = RegionSet::new();
        for region in iter {
            set.push(region);
        }
        set
    }
}
