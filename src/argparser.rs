use clap::{Parser, Subcommand};

use crate::{matrix::MatrixArgs, scan::ScanArgs};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        default_value_t = 1,
        help = "Number of worker threads."
    )]
    pub threads: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Quantify methylation per cell in a set of genomic regions.
    Matrix(MatrixArgs),
    /// Scan the genome for variably methylated regions.
    Scan(ScanArgs),
}
