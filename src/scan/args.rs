use clap::Parser;

#[derive(Parser, Debug)]
pub struct ScanArgs {
    #[arg(short, long, required = true, help = "Directory holding the per-chromosome methylation data.")]
    pub input: String,

    #[arg(
        short,
        long,
        default_value = "-",
        help = "BED file for the variable regions. Use '-' for stdout."
    )]
    pub output: String,

    #[arg(
        long,
        default_value_t = 2000,
        help = "Width of the sliding window in base pairs."
    )]
    pub bandwidth: u64,

    #[arg(long, default_value_t = 100, help = "Distance between window centers.")]
    pub stepsize: u64,

    #[arg(
        long,
        default_value_t = 0.02,
        help = "Fraction of windows of the largest chromosome that count as variable."
    )]
    pub var_threshold: f64,
}
