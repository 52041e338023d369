use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use arbor_core::{ArborError, Result};

use crate::model::{DecisionTreeModel, MODEL_FORMAT_VERSION};

const ARTIFACT_EXTENSION: &str = "json";

/// Directory of named model artifacts, one JSON file per name.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers see either the previous model or the new one.
/// The store does not coordinate concurrent writers of the same name.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store rooted at a relative sub-path of this one; `None` returns a clone.
    pub fn scoped(&self, path: Option<&str>) -> Result<Self> {
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Ok(self.clone());
        };
        let sub = Path::new(path);
        if !sub.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ArborError::InvalidConfig(format!(
                "model path '{path}' must be relative and must not contain '..'"
            )));
        }
        Self::open(self.root.join(sub))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing artifact `name`.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}.{ARTIFACT_EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.artifact_path(name).is_ok_and(|p| p.is_file())
    }

    /// Atomically writes `model` as artifact `name`, replacing any previous one.
    pub fn save(&self, name: &str, model: &DecisionTreeModel) -> Result<PathBuf> {
        let path = self.artifact_path(name)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, model)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ArborError::Io(e.error))?;

        tracing::info!(model = name, path = %path.display(), "saved model");
        Ok(path)
    }

    /// Reads artifact `name`.
    ///
    /// # Errors
    ///
    /// - [`ArborError::ModelNotFound`] if the artifact is missing, unreadable,
    ///   corrupt, or written by an incompatible format version
    /// - [`ArborError::InvalidConfig`] if `name` is not a valid artifact name
    pub fn load(&self, name: &str) -> Result<DecisionTreeModel> {
        let path = self.artifact_path(name)?;
        let not_found = |reason: String| ArborError::ModelNotFound {
            name: name.to_owned(),
            reason,
        };

        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => not_found(format!("no artifact at {}", path.display())),
            _ => not_found(format!("cannot read {}: {e}", path.display())),
        })?;
        let model: DecisionTreeModel = serde_json::from_slice(&bytes)
            .map_err(|e| not_found(format!("corrupt artifact: {e}")))?;

        if model.format_version() != MODEL_FORMAT_VERSION {
            return Err(not_found(format!(
                "unsupported format version {} (expected {MODEL_FORMAT_VERSION})",
                model.format_version()
            )));
        }
        model
            .validate()
            .map_err(|e| not_found(format!("corrupt artifact: {e}")))?;

        tracing::debug!(model = name, nodes = model.num_nodes(), "loaded model");
        Ok(model)
    }

    /// Removes artifact `name`; returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.artifact_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all stored artifacts, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(ArborError::InvalidConfig(format!(
            "'{name}' is not a valid model name"
        )));
    }
    Ok(())
}
