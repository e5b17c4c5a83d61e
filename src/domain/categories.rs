// ============================================================
// Layer 3 — Anatomical Category Table
// ============================================================
// Maps a mask layer index to its human-readable label.
// The mapping ships next to the segmentation weights as
// `labels.json` in id2label form: {"0": "...", "1": "...", ...}.

use std::collections::BTreeMap;

use crate::domain::error::{ensure_invariant, PipelineError};

/// Number of anatomical structures the segmentation model predicts.
pub const NUM_CATEGORIES: usize = 159;

/// Layers combined into the cutout mask of the `jpg` export.
/// Hand-picked upstream; the grouping is kept exactly as listed.
pub const MASK_OF_INTEREST: &[usize] = &[
    134, 135, 136, 137, 138, 139, 140, 141, 142, 143,
    144, 145, 146, 147, 148, 149, 150, 151, 152, 153,
    156, 157, 158,
    121, 122, 123, 124, 125, 126, 127, 128, 129, 130, 131, 132,
    115, 116, 117, 118, 119, 120, 154, 155,
    105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 133,
    28, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54,
    55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74,
    75, 76, 77, 78, 79, 80, 81, 82, 83, 84, 85, 86, 87, 88, 89, 90, 91, 92, 93, 94,
    95, 96, 97, 98, 99, 100, 101, 102, 103, 104,
];

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTable {
    labels: Vec<String>,
}

impl CategoryTable {
    /// Generated labels `category_000 ..` for when no labels.json is available.
    pub fn numbered(count: usize) -> Self {
        Self {
            labels: (0..count).map(|i| format!("category_{i:03}")).collect(),
        }
    }

    /// Parse an id2label map. Ids must be exactly 0..n-1.
    pub fn from_id2label(map: &BTreeMap<String, String>) -> Result<Self, PipelineError> {
        let mut labels = vec![None; map.len()];
        for (id, label) in map {
            let idx: usize = id.parse().map_err(|_| {
                PipelineError::invariant(format!("category id '{id}' is not an integer"))
            })?;
            ensure_invariant(idx < labels.len(), || {
                format!("category id {idx} outside 0..{}", map.len())
            })?;
            labels[idx] = Some(label.clone());
        }
        let labels = labels
            .into_iter()
            .enumerate()
            .map(|(i, l)| l.ok_or_else(|| PipelineError::invariant(format!("category id {i} missing"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().enumerate().map(|(i, l)| (i, l.as_str()))
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::numbered(NUM_CATEGORIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_of_interest_fits_category_count() {
        assert!(MASK_OF_INTEREST.iter().all(|&i| i < NUM_CATEGORIES));
    }

    #[test]
    fn test_default_table() {
        let t = CategoryTable::default();
        assert_eq!(t.len(), NUM_CATEGORIES);
        assert_eq!(t.label(7), Some("category_007"));
    }

    #[test]
    fn test_from_id2label() {
        let mut m = BTreeMap::new();
        m.insert("1".to_string(), "left lung".to_string());
        m.insert("0".to_string(), "right lung".to_string());
        let t = CategoryTable::from_id2label(&m).unwrap();
        assert_eq!(t.label(0), Some("right lung"));

        m.insert("5".to_string(), "gap".to_string());
        assert!(CategoryTable::from_id2label(&m).is_err());
    }
}
