//! Dataset loading and tokenization.

use crate::strategy::TokenizingStrategy;
use rayon::prelude::*;
use serde_json::Value;
use sftkit_core::{PromptFormat, Result, SftError, TokenRecord};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Load raw examples from a JSON Lines file.
///
/// Blank lines are skipped; a line that is not valid JSON fails the whole
/// load with its line number.
pub fn load_jsonl_examples<P: AsRef<Path>>(path: P) -> Result<Vec<Value>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        SftError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file: {}", e),
        ))
    })?;

    let reader = BufReader::new(file);
    let mut examples = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| {
            SftError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read line {}: {}", line_num + 1, e),
            ))
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let value = serde_json::from_str(&line)
            .map_err(|e| SftError::Serialization(format!("Line {}: {}", line_num + 1, e)))?;
        examples.push(value);
    }

    Ok(examples)
}

/// Detect the prompt format of a raw example.
pub fn detect_format(example: &Value) -> Result<PromptFormat> {
    if example.get("conversations").is_some() {
        Ok(PromptFormat::ShareGpt)
    } else if example.get("instruction").is_some() {
        if example.get("response").is_some() {
            Ok(PromptFormat::GpTeacher)
        } else {
            Ok(PromptFormat::Alpaca)
        }
    } else {
        Err(SftError::InvalidArgument(
            "Could not detect dataset format. Expected 'conversations' or 'instruction' field."
                .into(),
        ))
    }
}

/// Tokenized training records.
#[derive(Debug, Clone, Default)]
pub struct TokenizedDataset {
    records: Vec<TokenRecord>,
    skipped: usize,
}

impl TokenizedDataset {
    /// Create a dataset from already tokenized records.
    pub fn from_records(records: Vec<TokenRecord>) -> Self {
        Self {
            records,
            skipped: 0,
        }
    }

    /// Tokenize raw examples in parallel.
    ///
    /// Output order follows input order. Invalid examples are logged and
    /// skipped; any other failure aborts.
    pub fn from_examples(examples: &[Value], strategy: &TokenizingStrategy) -> Result<Self> {
        let results: Vec<Result<TokenRecord>> = examples
            .par_iter()
            .map(|example| strategy.tokenize_prompt(example))
            .collect();

        let mut records = Vec::with_capacity(results.len());
        let mut skipped = 0;

        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(index, "Skipping example: {}", e);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            format = %strategy.format(),
            kept = records.len(),
            skipped,
            "Tokenized dataset"
        );

        Ok(Self { records, skipped })
    }

    /// Load and tokenize a JSON Lines file.
    pub fn from_jsonl<P: AsRef<Path>>(path: P, strategy: &TokenizingStrategy) -> Result<Self> {
        let examples = load_jsonl_examples(path)?;
        Self::from_examples(&examples, strategy)
    }

    /// Get the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of examples dropped as invalid.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Get a record by index.
    pub fn get(&self, index: usize) -> Option<&TokenRecord> {
        self.records.get(index)
    }

    /// Get all records.
    pub fn records(&self) -> &[TokenRecord] {
        &self.records
    }

    /// Shuffle the dataset.
    pub fn shuffle(&mut self, seed: u64) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        self.records.shuffle(&mut rng);
    }

    /// Split the dataset into train and validation sets.
    pub fn train_val_split(mut self, val_ratio: f32, seed: u64) -> (Self, Self) {
        self.shuffle(seed);
        let val_size = (self.records.len() as f32 * val_ratio.clamp(0.0, 1.0)).round() as usize;
        let val_records = self.records.split_off(self.records.len() - val_size);

        (self, Self::from_records(val_records))
    }

    /// Write one `{input_ids, attention_mask, labels}` object per line.
    pub fn write_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl IntoIterator for TokenizedDataset {
    type Item = TokenRecord;
    type IntoIter = std::vec::IntoIter<TokenRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a TokenizedDataset {
    type Item = &'a TokenRecord;
    type IntoIter = std::slice::Iter<'a, TokenRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
