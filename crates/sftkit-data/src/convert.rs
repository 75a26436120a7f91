//! JSON array to JSON Lines conversion.

use serde_json::Value;
use sftkit_core::{Result, SftError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Convert a JSON array document into one compact JSON object per line.
///
/// Returns the number of records written.
pub fn convert_json_to_jsonl<R: Read, W: Write>(reader: R, mut writer: W) -> Result<usize> {
    let document: Value = serde_json::from_reader(reader)?;
    let Value::Array(items) = document else {
        return Err(SftError::Serialization(
            "expected a top-level JSON array".into(),
        ));
    };

    for item in &items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(items.len())
}

/// Convert `input` to JSON Lines, writing to `output` or stdout.
pub fn convert_file<P: AsRef<Path>>(input: P, output: Option<&Path>) -> Result<usize> {
    let reader = BufReader::new(File::open(input.as_ref())?);

    let count = match output {
        Some(path) => convert_json_to_jsonl(reader, BufWriter::new(File::create(path)?))?,
        None => convert_json_to_jsonl(reader, std::io::stdout().lock())?,
    };

    tracing::info!(
        input = %input.as_ref().display(),
        records = count,
        "Converted JSON to JSONL"
    );
    Ok(count)
}
