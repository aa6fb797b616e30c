use clap::Parser;
use methylome::DEFAULT_CHUNK_SIZE;

#[derive(Parser, Debug)]
pub struct MatrixArgs {
    #[arg(short, long, required = true, help = "Directory holding the per-chromosome methylation data.")]
    pub input: String,

    #[arg(short, long, required = true, help = "BED file with the regions to quantify.")]
    pub regions: String,

    #[arg(short, long, required = true, help = "Output directory for the cell x region matrices.")]
    pub output: String,

    #[arg(
        long,
        default_value_t = false,
        help = "Write a sparse MatrixMarket matrix instead of four dense tables."
    )]
    pub sparse: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_CHUNK_SIZE,
        help = "Number of regions handed to one worker at a time."
    )]
    pub chunk_size: usize,
}
