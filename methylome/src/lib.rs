pub mod aggregate;
pub mod fdr;
pub mod peaks;
pub mod region;
pub mod smoothed;
pub mod source;
pub mod sparse;
pub mod stats;

pub use aggregate::{
    aggregate_dense, aggregate_sparse, region_residuals, tally_region, CellTally,
    DenseAggregate, RegionTally, ShrinkageSum, SparseEntry, DEFAULT_CHUNK_SIZE,
};
pub use fdr::{benjamini_hochberg, empirical_fdr};
pub use peaks::{find_peaks, Peaks};
pub use region::{Region, RegionSet};
pub use smoothed::SmoothedProfile;
pub use source::ChromDataSource;
pub use sparse::{MethylationCall, Observation, SparseChromMatrix};
