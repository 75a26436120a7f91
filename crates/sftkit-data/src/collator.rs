//! Data collation utilities.

use sftkit_core::{TokenRecord, IGNORE_INDEX};

/// Data collator for creating batches.
pub struct DataCollator {
    /// Padding token ID.
    pub pad_token_id: u32,
    /// Maximum sequence length.
    pub max_length: usize,
}

impl DataCollator {
    /// Create a new data collator.
    pub fn new(pad_token_id: u32, max_length: usize) -> Self {
        Self {
            pad_token_id,
            max_length,
        }
    }

    /// Collate records into a right-padded batch.
    ///
    /// Every label whose attention mask is 0 ends up as [`IGNORE_INDEX`],
    /// including positions a record already marked as padding.
    pub fn collate(&self, records: &[TokenRecord]) -> CollatedBatch {
        let batch_size = records.len();
        let max_len = records
            .iter()
            .map(|r| r.input_ids.len().min(self.max_length))
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![vec![self.pad_token_id; max_len]; batch_size];
        let mut attention_mask = vec![vec![0u32; max_len]; batch_size];
        let mut labels = vec![vec![IGNORE_INDEX; max_len]; batch_size];

        for (i, record) in records.iter().enumerate() {
            let len = record.input_ids.len().min(self.max_length);
            input_ids[i][..len].copy_from_slice(&record.input_ids[..len]);
            attention_mask[i][..len].copy_from_slice(&record.attention_mask[..len]);
            labels[i][..len].copy_from_slice(&record.labels[..len]);

            for (label, &mask) in labels[i].iter_mut().zip(&attention_mask[i]) {
                if mask == 0 {
                    *label = IGNORE_INDEX;
                }
            }
        }

        CollatedBatch {
            input_ids,
            attention_mask,
            labels,
            batch_size,
            seq_len: max_len,
        }
    }
}

/// A collated batch ready for the model.
#[derive(Debug, Clone)]
pub struct CollatedBatch {
    /// Input token IDs [batch_size, seq_len].
    pub input_ids: Vec<Vec<u32>>,
    /// Attention mask [batch_size, seq_len].
    pub attention_mask: Vec<Vec<u32>>,
    /// Labels [batch_size, seq_len].
    pub labels: Vec<Vec<i64>>,
    /// Batch size.
    pub batch_size: usize,
    /// Sequence length.
    pub seq_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collate_pads_to_longest() {
        let collator = DataCollator::new(0, 16);
        let records = vec![
            TokenRecord {
                input_ids: vec![1, 5, 6],
                attention_mask: vec![1, 1, 1],
                labels: vec![IGNORE_INDEX, 5, 6],
            },
            TokenRecord::unmasked(vec![1, 7]),
        ];

        let batch = collator.collate(&records);
        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.seq_len, 3);
        assert_eq!(batch.input_ids[1], vec![1, 7, 0]);
        assert_eq!(batch.attention_mask[1], vec![1, 1, 0]);
        assert_eq!(batch.labels[1], vec![1, 7, IGNORE_INDEX]);
        assert_eq!(batch.labels[0], vec![IGNORE_INDEX, 5, 6]);
    }

    #[test]
    fn test_collate_masks_labels_under_zero_attention() {
        let collator = DataCollator::new(2, 16);
        // Trained EOS that shares the pad id.
        let records = vec![TokenRecord {
            input_ids: vec![1, 9, 2],
            attention_mask: vec![1, 1, 0],
            labels: vec![IGNORE_INDEX, 9, 2],
        }];

        let batch = collator.collate(&records);
        assert_eq!(batch.labels[0], vec![IGNORE_INDEX, 9, IGNORE_INDEX]);
    }

    #[test]
    fn test_collate_caps_length() {
        let collator = DataCollator::new(0, 2);
        let batch = collator.collate(&[TokenRecord::unmasked(vec![1, 2, 3, 4])]);
        assert_eq!(batch.seq_len, 2);
        assert_eq!(batch.input_ids[0], vec![1, 2]);
        assert_eq!(batch.labels[0].len(), 2);
    }

    #[test]
    fn test_collate_empty() {
        let batch = DataCollator::new(0, 8).collate(&[]);
        assert_eq!(batch.batch_size, 0);
        assert_eq!(batch.seq_len, 0);
    }
}
