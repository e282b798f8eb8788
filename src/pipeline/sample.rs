//! Reservoir sampling of a raw extract: keeps a uniform random subset of the
//! data lines while preserving the header, so exploratory work does not need
//! the multi-gigabyte national files.

use rand::Rng;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Samples `sample_size` data lines from `input` into `output`, header
/// included. Errors when the input holds fewer data lines than requested.
pub fn random_sample(input: &Path, output: &Path, sample_size: usize) -> Result<usize> {
    if sample_size == 0 {
        return Err(PipelineError::Ingest(
            "sample size must be at least 1".to_string(),
        ));
    }

    let reader = BufReader::new(File::open(input)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(PipelineError::Ingest(format!(
                "'{}' is empty",
                input.display()
            )))
        }
    };

    let mut rng = rand::thread_rng();
    let mut reservoir: Vec<String> = Vec::with_capacity(sample_size);
    let mut line_count = 0usize;

    for line in lines {
        let line = line?;
        line_count += 1;
        if line_count <= sample_size {
            reservoir.push(line);
        } else {
            let j = rng.gen_range(1..=line_count);
            if j <= sample_size {
                reservoir[j - 1] = line;
            }
        }
    }

    if line_count < sample_size {
        return Err(PipelineError::Ingest(format!(
            "cannot sample {sample_size} lines: input file has only {line_count} data lines"
        )));
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output)?);
    writeln!(writer, "{header}")?;
    for line in &reservoir {
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        sampled = reservoir.len(),
        of = line_count,
        "sample written"
    );
    Ok(reservoir.len())
}
