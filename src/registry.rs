//! Model registry
//!
//! Fitted models are filed under an explicit [`ModelKey`] of family, group
//! and model name. Each entry carries the metadata its family needs to turn
//! raw model output back into forecasts: the output grid for discretized
//! families, the log-normal standardization for size distributions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::OutputGrid;
use crate::distribution::LogNormalParams;
use crate::model::{Classifier, Regressor};

/// Track-offset dimension predicted by a track model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackOffset {
    /// Error in track start time
    StartTime,
    /// Error in east-west translation
    TranslationX,
    /// Error in north-south translation
    TranslationY,
}

impl TrackOffset {
    /// Every offset, in canonical order
    pub const ALL: [Self; 3] = [Self::StartTime, Self::TranslationX, Self::TranslationY];

    /// Name used in property keys, file names and copula files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartTime => "start-time",
            Self::TranslationX => "translation-x",
            Self::TranslationY => "translation-y",
        }
    }
}

impl fmt::Display for TrackOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelFamily {
    /// Event occurrence classifier
    Condition,
    /// Discretized size classifier
    Size,
    /// Log-normal size-distribution regressor
    SizeDistribution,
    /// Discretized track-offset classifier
    Track(TrackOffset),
}

impl ModelFamily {
    /// Suffix identifying the family in persisted file names
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Size => "size",
            Self::SizeDistribution => "sizedist",
            Self::Track(_) => "track",
        }
    }

    /// Offset for track families
    #[must_use]
    pub const fn offset(self) -> Option<TrackOffset> {
        match self {
            Self::Track(offset) => Some(offset),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track(offset) => write!(f, "{offset} track"),
            other => f.write_str(other.suffix()),
        }
    }
}

/// Registry key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelKey {
    /// Model family (with offset for track models)
    pub family: ModelFamily,
    /// Group label
    pub group: String,
    /// Model name as given at fit time
    pub model_name: String,
}

/// Fitted model plus family metadata.
#[derive(Debug)]
pub enum ModelEntry {
    /// Occurrence classifier
    Condition {
        /// Fitted classifier over `{0, 1}`
        model: Box<dyn Classifier>,
    },
    /// Size classifier
    Size {
        /// Fitted classifier over grid classes
        model: Box<dyn Classifier>,
        /// Size buckets
        grid: OutputGrid,
    },
    /// Size-distribution regressor
    SizeDistribution {
        /// Fitted regressor over standardized log parameters
        model: Box<dyn Regressor>,
        /// Standardization applied to the training labels
        lognorm: LogNormalParams,
    },
    /// Track-offset classifier
    Track {
        /// Offset dimension
        offset: TrackOffset,
        /// Fitted classifier over grid classes
        model: Box<dyn Classifier>,
        /// Offset buckets
        grid: OutputGrid,
    },
}

impl ModelEntry {
    /// Family this entry belongs to
    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        match self {
            Self::Condition { .. } => ModelFamily::Condition,
            Self::Size { .. } => ModelFamily::Size,
            Self::SizeDistribution { .. } => ModelFamily::SizeDistribution,
            Self::Track { offset, .. } => ModelFamily::Track(*offset),
        }
    }

    /// Classifier of a condition, size or track entry
    #[must_use]
    pub fn classifier(&self) -> Option<&dyn Classifier> {
        match self {
            Self::Condition { model } | Self::Size { model, .. } | Self::Track { model, .. } => {
                Some(model.as_ref())
            }
            Self::SizeDistribution { .. } => None,
        }
    }

    /// Output grid of a discretized entry
    #[must_use]
    pub const fn grid(&self) -> Option<&OutputGrid> {
        match self {
            Self::Size { grid, .. } | Self::Track { grid, .. } => Some(grid),
            Self::Condition { .. } | Self::SizeDistribution { .. } => None,
        }
    }
}

/// Fitted models keyed by family, group and model name.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<ModelKey, ModelEntry>,
}

impl ModelRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File `entry` under `group` and `model_name`, returning any entry it replaces.
    pub fn insert(
        &mut self,
        group: impl Into<String>,
        model_name: impl Into<String>,
        entry: ModelEntry,
    ) -> Option<ModelEntry> {
        let key = ModelKey {
            family: entry.family(),
            group: group.into(),
            model_name: model_name.into(),
        };
        self.entries.insert(key, entry)
    }

    /// Look up one entry
    #[must_use]
    pub fn get(&self, family: ModelFamily, group: &str, model_name: &str) -> Option<&ModelEntry> {
        self.entries.get(&ModelKey {
            family,
            group: group.to_string(),
            model_name: model_name.to_string(),
        })
    }

    /// Whether any model of `family` is fitted for `group`
    #[must_use]
    pub fn has_group(&self, family: ModelFamily, group: &str) -> bool {
        self.entries
            .keys()
            .any(|k| k.family == family && k.group == group)
    }

    /// Groups with at least one `family` model, sorted
    #[must_use]
    pub fn groups(&self, family: ModelFamily) -> Vec<String> {
        let mut groups: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.family == family)
            .map(|k| k.group.clone())
            .collect();
        groups.dedup();
        groups
    }

    /// All entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&ModelKey, &ModelEntry)> {
        self.entries.iter()
    }

    /// All keys in order
    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.entries.keys()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move every entry of `other` in; `other` wins on key collisions.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}
