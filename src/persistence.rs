//! Model persistence
//!
//! A model directory holds one JSON file per registry entry plus a
//! `manifest.json` that maps each [`ModelKey`] to its file. Loading reads
//! the manifest only; file names are never parsed back into keys.
//!
//! ```text
//! models/
//! ├── manifest.json
//! ├── Thompson_Naive-Bayes_condition.json
//! ├── Thompson_Naive-Bayes_size.json
//! ├── Thompson_Ridge_sizedist.json
//! └── Thompson_Naive-Bayes_start-time_track.json
//! ```
//!
//! File names still follow `{group}_{model}_{family}` so a directory is
//! readable by eye. Group and model names are rejected if they contain `_`
//! or a path separator, which keeps every generated name unique.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::{hyphenate, OutputGrid};
use crate::distribution::LogNormalParams;
use crate::model::ModelLoader;
use crate::registry::{ModelEntry, ModelFamily, ModelKey, ModelRegistry, TrackOffset};
use crate::{Error, Result};

/// Manifest file name inside a model directory
pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FamilyTag {
    Condition,
    Size,
    Sizedist,
    Track,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestEntry {
    family: FamilyTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<TrackOffset>,
    group: String,
    model_name: String,
    file: String,
}

impl ManifestEntry {
    fn new(key: &ModelKey) -> Self {
        let family = match key.family {
            ModelFamily::Condition => FamilyTag::Condition,
            ModelFamily::Size => FamilyTag::Size,
            ModelFamily::SizeDistribution => FamilyTag::Sizedist,
            ModelFamily::Track(_) => FamilyTag::Track,
        };
        Self {
            family,
            offset: key.family.offset(),
            group: key.group.clone(),
            model_name: key.model_name.clone(),
            file: file_name(key),
        }
    }

    fn family(&self) -> Result<ModelFamily> {
        match (self.family, self.offset) {
            (FamilyTag::Condition, _) => Ok(ModelFamily::Condition),
            (FamilyTag::Size, _) => Ok(ModelFamily::Size),
            (FamilyTag::Sizedist, _) => Ok(ModelFamily::SizeDistribution),
            (FamilyTag::Track, Some(offset)) => Ok(ModelFamily::Track(offset)),
            (FamilyTag::Track, None) => Err(Error::Persistence(format!(
                "Track entry {} has no offset",
                self.file
            ))),
        }
    }

    fn same_key(&self, other: &Self) -> bool {
        self.family == other.family
            && self.offset == other.offset
            && self.group == other.group
            && self.model_name == other.model_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: Vec<ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: Vec::new(),
        }
    }
}

/// Contents of one model file
#[derive(Debug, Serialize, Deserialize)]
struct PersistedModel {
    kind: String,
    state: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grid: Option<OutputGrid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lognorm: Option<LogNormalParams>,
}

impl PersistedModel {
    fn new(entry: &ModelEntry) -> Result<Self> {
        Ok(match entry {
            ModelEntry::Condition { model } => Self {
                kind: model.kind().to_string(),
                state: model.state()?,
                grid: None,
                lognorm: None,
            },
            ModelEntry::Size { model, grid } | ModelEntry::Track { model, grid, .. } => Self {
                kind: model.kind().to_string(),
                state: model.state()?,
                grid: Some(*grid),
                lognorm: None,
            },
            ModelEntry::SizeDistribution { model, lognorm } => Self {
                kind: model.kind().to_string(),
                state: model.state()?,
                grid: None,
                lognorm: Some(lognorm.clone()),
            },
        })
    }

    fn into_entry(self, family: ModelFamily, loader: &dyn ModelLoader, file: &str) -> Result<ModelEntry> {
        let missing = |what: &str| Error::Persistence(format!("{file} has no {what}"));
        Ok(match family {
            ModelFamily::Condition => ModelEntry::Condition {
                model: loader.classifier(&self.kind, self.state)?,
            },
            ModelFamily::Size => ModelEntry::Size {
                grid: self.grid.ok_or_else(|| missing("grid"))?,
                model: loader.classifier(&self.kind, self.state)?,
            },
            ModelFamily::SizeDistribution => ModelEntry::SizeDistribution {
                lognorm: self.lognorm.ok_or_else(|| missing("lognorm"))?,
                model: loader.regressor(&self.kind, self.state)?,
            },
            ModelFamily::Track(offset) => ModelEntry::Track {
                offset,
                grid: self.grid.ok_or_else(|| missing("grid"))?,
                model: loader.classifier(&self.kind, self.state)?,
            },
        })
    }
}

/// Reject names that would make file names ambiguous.
fn check_component(value: &str) -> Result<()> {
    if value.is_empty() || value.contains(['_', '/', '\\']) {
        Err(Error::InvalidModelKey(value.to_string()))
    } else {
        Ok(())
    }
}

fn file_name(key: &ModelKey) -> String {
    let model = hyphenate(&key.model_name);
    match key.family {
        ModelFamily::Track(offset) => format!("{}_{model}_{offset}_track.json", key.group),
        family => format!("{}_{model}_{}.json", key.group, family.suffix()),
    }
}

fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
    if manifest.version != MANIFEST_VERSION {
        return Err(Error::Persistence(format!(
            "Unsupported manifest version {} in {}",
            manifest.version,
            path.display()
        )));
    }
    Ok(Some(manifest))
}

fn staging_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(format!("{file}.tmp"))
}

/// Remove staged files after a failed save.
fn discard(staged: &[PathBuf]) {
    for path in staged {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove staged model file");
        }
    }
}

/// Write every entry of `registry` under `dir`, merging with any manifest
/// already there. Returns the number of entries written.
///
/// # Errors
/// Returns [`Error::InvalidModelKey`] before writing anything if a group or
/// model name cannot be encoded, [`Error::Persistence`] if two model names
/// map to the same file, or an I/O error. Model files are staged under a
/// `.tmp` name and only moved into place once all of them are written, so a
/// failed write leaves the directory and its manifest as they were.
pub fn save_registry(registry: &ModelRegistry, dir: &Path) -> Result<usize> {
    let mut files = HashSet::new();
    let mut new_entries = Vec::with_capacity(registry.len());
    for key in registry.keys() {
        check_component(&key.group)?;
        check_component(&key.model_name)?;
        let entry = ManifestEntry::new(key);
        if !files.insert(entry.file.clone()) {
            return Err(Error::Persistence(format!(
                "Model `{}` in group {} collides with another model at {}",
                key.model_name, key.group, entry.file
            )));
        }
        new_entries.push(entry);
    }

    let payloads = registry
        .iter()
        .map(|(_, model)| Ok(serde_json::to_vec_pretty(&PersistedModel::new(model)?)?))
        .collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(dir)?;
    let mut staged = Vec::with_capacity(new_entries.len());
    for (entry, bytes) in new_entries.iter().zip(&payloads) {
        let path = staging_path(dir, &entry.file);
        if let Err(e) = fs::write(&path, bytes) {
            discard(&staged);
            return Err(e.into());
        }
        staged.push(path);
    }
    for (i, (path, entry)) in staged.iter().zip(&new_entries).enumerate() {
        if let Err(e) = fs::rename(path, dir.join(&entry.file)) {
            discard(&staged[i..]);
            return Err(e.into());
        }
    }

    let mut manifest = read_manifest(dir)?.unwrap_or_default();
    manifest
        .entries
        .retain(|old| !new_entries.iter().any(|new| new.same_key(old) || new.file == old.file));
    manifest.entries.extend(new_entries);
    let staged_manifest = staging_path(dir, MANIFEST_FILE);
    fs::write(&staged_manifest, serde_json::to_vec_pretty(&manifest)?)?;
    fs::rename(&staged_manifest, dir.join(MANIFEST_FILE))?;

    info!(dir = %dir.display(), saved = registry.len(), total = manifest.entries.len(), "saved models");
    Ok(registry.len())
}

/// Restore every entry listed in `dir`'s manifest.
///
/// A directory without a manifest yields an empty registry.
///
/// # Errors
/// Returns error if the manifest or a listed file cannot be read, or
/// `loader` cannot restore a model.
pub fn load_registry(dir: &Path, loader: &dyn ModelLoader) -> Result<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    let Some(manifest) = read_manifest(dir)? else {
        warn!(dir = %dir.display(), "no model manifest found");
        return Ok(registry);
    };
    for item in manifest.entries {
        let family = item.family()?;
        let persisted: PersistedModel = serde_json::from_slice(&fs::read(dir.join(&item.file))?)?;
        let entry = persisted.into_entry(family, loader, &item.file)?;
        registry.insert(item.group, item.model_name, entry);
    }
    info!(dir = %dir.display(), loaded = registry.len(), "loaded models");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuiltinModels, Classifier, GaussianNaiveBayes, Regressor, RidgeRegressor};
    use nalgebra::DMatrix;

    fn inputs() -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 1, &[0.0, 0.2, 5.0, 5.2])
    }

    fn classifier() -> Box<dyn Classifier> {
        let mut model = GaussianNaiveBayes::default();
        model.fit(&inputs(), &[5, 5, 10, 10]).unwrap();
        Box::new(model)
    }

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.insert("Thompson", "Naive Bayes", ModelEntry::Condition { model: classifier() });
        registry.insert(
            "Thompson",
            "Naive Bayes",
            ModelEntry::Size {
                model: classifier(),
                grid: OutputGrid::new(5, 5, 20).unwrap(),
            },
        );
        registry.insert(
            "Morrison",
            "Naive Bayes",
            ModelEntry::Track {
                offset: TrackOffset::TranslationY,
                model: classifier(),
                grid: OutputGrid::new(5, 5, 10).unwrap(),
            },
        );
        let mut ridge = RidgeRegressor::default();
        ridge.fit(&inputs(), &inputs()).unwrap();
        registry.insert(
            "Thompson",
            "Ridge",
            ModelEntry::SizeDistribution {
                model: Box::new(ridge),
                lognorm: LogNormalParams {
                    mean: vec![0.5],
                    sd: vec![2.0],
                },
            },
        );
        registry
    }

    #[test]
    fn test_file_names() {
        let key = ModelKey {
            family: ModelFamily::Track(TrackOffset::StartTime),
            group: "Thompson".into(),
            model_name: "Random Forest".into(),
        };
        assert_eq!(file_name(&key), "Thompson_Random-Forest_start-time_track.json");
        let key = ModelKey {
            family: ModelFamily::SizeDistribution,
            group: "Thompson".into(),
            model_name: "Ridge".into(),
        };
        assert_eq!(file_name(&key), "Thompson_Ridge_sizedist.json");
    }

    #[test]
    fn test_round_trip_keeps_keys_and_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let original = registry();
        assert_eq!(save_registry(&original, dir.path()).unwrap(), 4);
        assert!(dir.path().join(MANIFEST_FILE).is_file());

        let restored = load_registry(dir.path(), &BuiltinModels).unwrap();
        assert_eq!(
            restored.keys().collect::<Vec<_>>(),
            original.keys().collect::<Vec<_>>()
        );
        for (key, entry) in original.iter() {
            let other = restored.get(key.family, &key.group, &key.model_name).unwrap();
            assert_eq!(entry.grid(), other.grid());
            if let (Some(a), Some(b)) = (entry.classifier(), other.classifier()) {
                let diff = a.predict_proba(&inputs()).unwrap() - b.predict_proba(&inputs()).unwrap();
                assert!(diff.abs().max() < 1e-9);
            }
        }
    }

    #[test]
    fn test_save_merges_manifest() {
        let dir = tempfile::tempdir().unwrap();
        save_registry(&registry(), dir.path()).unwrap();

        let mut more = ModelRegistry::new();
        more.insert("Ferrier", "Naive Bayes", ModelEntry::Condition { model: classifier() });
        more.insert("Thompson", "Naive Bayes", ModelEntry::Condition { model: classifier() });
        save_registry(&more, dir.path()).unwrap();

        let restored = load_registry(dir.path(), &BuiltinModels).unwrap();
        assert_eq!(restored.len(), 5);
    }

    #[test]
    fn test_rejects_delimiter_in_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = ModelRegistry::new();
        bad.insert("WSM_6", "nb", ModelEntry::Condition { model: classifier() });
        let err = save_registry(&bad, dir.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidModelKey(name) if name == "WSM_6"));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_rejects_hyphenation_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ModelRegistry::new();
        registry.insert("A", "Naive Bayes", ModelEntry::Condition { model: classifier() });
        registry.insert("A", "Naive-Bayes", ModelEntry::Condition { model: classifier() });
        assert!(matches!(
            save_registry(&registry, dir.path()),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_missing_manifest_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let restored = load_registry(dir.path(), &BuiltinModels).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_regressor_state_restores() {
        let dir = tempfile::tempdir().unwrap();
        save_registry(&registry(), dir.path()).unwrap();
        let restored = load_registry(dir.path(), &BuiltinModels).unwrap();
        let Some(ModelEntry::SizeDistribution { model, lognorm }) =
            restored.get(ModelFamily::SizeDistribution, "Thompson", "Ridge")
        else {
            panic!("size distribution entry missing");
        };
        assert_eq!(lognorm.sd, vec![2.0]);
        assert_eq!(model.n_outputs(), 1);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_save() {
        let dir = tempfile::tempdir().unwrap();
        // a directory squatting on the staging name makes that write fail
        let blocker = dir.path().join("Thompson_Ridge_sizedist.json.tmp");
        fs::create_dir(&blocker).unwrap();

        assert!(matches!(save_registry(&registry(), dir.path()), Err(Error::Io(_))));
        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(left, vec![blocker]);
        assert!(load_registry(dir.path(), &BuiltinModels).unwrap().is_empty());
    }

    #[test]
    fn test_failed_save_keeps_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        save_registry(&registry(), dir.path()).unwrap();
        let manifest = fs::read(dir.path().join(MANIFEST_FILE)).unwrap();

        let mut more = ModelRegistry::new();
        more.insert("Ferrier", "Naive Bayes", ModelEntry::Condition { model: classifier() });
        more.insert("Ferrier", "Ridge", ModelEntry::Condition { model: classifier() });
        fs::create_dir(dir.path().join("Ferrier_Ridge_condition.json.tmp")).unwrap();

        assert!(save_registry(&more, dir.path()).is_err());
        assert_eq!(fs::read(dir.path().join(MANIFEST_FILE)).unwrap(), manifest);
        assert!(!dir.path().join("Ferrier_Naive-Bayes_condition.json").exists());
        assert!(!dir.path().join("Ferrier_Naive-Bayes_condition.json.tmp").exists());
        assert_eq!(load_registry(dir.path(), &BuiltinModels).unwrap().len(), 4);
    }
}
