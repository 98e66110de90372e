//! The ASR model-size ladder and its memory budgets.
//!
//! Grounded in `original_source/src/whisper_api/decoding/decoder.py`'s
//! `vram_model_map` (large=10GB, medium=5GB, small=2GB, base=1GB), kept as
//! the byte-budget source for the worker's model-selection algorithm
//! the worker's model-selection algorithm.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sizes in descending memory order.
pub const SIZES: [ModelSize; 4] = [
    ModelSize::Large,
    ModelSize::Medium,
    ModelSize::Small,
    ModelSize::Base,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Large,
    Medium,
    Small,
    Base,
}

impl ModelSize {
    /// Approximate device memory budget in bytes.
    pub fn budget_bytes(self) -> u64 {
        match self {
            ModelSize::Large => 10 * 1_000_000_000,
            ModelSize::Medium => 5 * 1_000_000_000,
            ModelSize::Small => 2 * 1_000_000_000,
            ModelSize::Base => 1 * 1_000_000_000,
        }
    }

    /// Index into `SIZES`, used to compute `SIZES[requested:]` slices.
    pub fn rank(self) -> usize {
        SIZES.iter().position(|s| *s == self).expect("exhaustive SIZES")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelSize::Large => "large",
            ModelSize::Medium => "medium",
            ModelSize::Small => "small",
            ModelSize::Base => "base",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown model size '{0}', expected one of large|medium|small|base")]
pub struct ParseModelSizeError(String);

impl FromStr for ModelSize {
    type Err = ParseModelSizeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "large" => Ok(ModelSize::Large),
            "medium" => Ok(ModelSize::Medium),
            "small" => Ok(ModelSize::Small),
            "base" => Ok(ModelSize::Base),
            other => Err(ParseModelSizeError(other.to_string())),
        }
    }
}

/// `SIZES[requested:]`, i.e. `requested` and everything smaller.
pub fn sizes_from(requested: ModelSize) -> &'static [ModelSize] {
    &SIZES[requested.rank()..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_descend_in_memory() {
        for pair in SIZES.windows(2) {
            assert!(pair[0].budget_bytes() > pair[1].budget_bytes());
        }
    }

    #[test]
    fn sizes_from_requested_includes_smaller_only() {
        let slice = sizes_from(ModelSize::Small);
        assert_eq!(slice, &[ModelSize::Small, ModelSize::Base]);
    }

    #[test]
    fn round_trips_through_str() {
        for size in SIZES {
            assert_eq!(size.as_str().parse::<ModelSize>().unwrap(), size);
        }
    }
}
