use anyhow::Result;
use clap::Parser;
use log::info;

mod argparser;
mod data_load;
mod matrix;
mod scan;
mod utils;

use argparser::{Args, Commands};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Commands::Matrix(matrix_args) => matrix::region_matrix(matrix_args, args.threads)?,
        Commands::Scan(scan_args) => scan::scan(scan_args, args.threads)?,
    }

    info!("Done");
    Ok(())
}
