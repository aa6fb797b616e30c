use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use log::info;
use std::{
    fmt::Write as FmtWrite,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use rayon::ThreadPool;
use tempfile::NamedTempFile;

/// Worker pool with exactly `num_threads` threads.
pub fn thread_pool(num_threads: usize) -> Result<ThreadPool> {
    if num_threads == 0 {
        bail!("Number of threads must be at least 1");
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .context("Could not initialize threadpool")
}

pub fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
        )?
        .with_key("eta", |state: &ProgressState, w: &mut dyn FmtWrite| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("#>-"),
    );
    Ok(pb)
}

pub fn is_gzipped<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|ext| ext == "gz" || ext == "gzip")
        .unwrap_or(false)
}

/// Opens a plain or gzip compressed text file.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open: {:?}", path))?;

    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Writer for `path`, or stdout when `path` is `-`. Paths ending in `.gz` are
/// gzip compressed.
pub fn output_writer(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }

    let outpath = Path::new(path);
    if let Some(parent) = outpath.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create parent directory: {:?}", parent))?;
    }

    let file = File::create(outpath)
        .with_context(|| format!("Failed to create file at: {:?}", outpath))?;

    if is_gzipped(outpath) {
        Ok(Box::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        )))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Gzip stream into a temporary file next to the final output.
pub fn gz_tempfile(dir: &Path) -> Result<GzEncoder<NamedTempFile>> {
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Could not create temporary file in: {:?}", dir))?;
    Ok(GzEncoder::new(tmp, Compression::default()))
}

/// Finishes the gzip stream and moves it to `path` in one step.
pub fn persist_gz(encoder: GzEncoder<NamedTempFile>, path: &Path) -> Result<()> {
    let tmp = encoder
        .finish()
        .with_context(|| format!("Failed to finish compressed output: {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write output: {:?}", path))?;
    Ok(())
}

/// Writes one line per item to a gzip file.
pub fn write_lines_gz<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut gz = gz_tempfile(dir)?;
    for line in lines {
        writeln!(gz, "{}", line.as_ref())?;
    }
    persist_gz(gz, path)
}

pub fn report_outputs(paths: &[PathBuf]) {
    for path in paths {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        info!("Wrote {} ({})", path.display(), ByteSize::b(size));
    }
}
