//! Filesystem model registry.
//!
//! Layout: `<root>/<model-name>/<version>/meta.json` plus the flavor's
//! artifact files. A version directory without readable metadata is skipped
//! during stage resolution but is an error when requested by number.

use crate::error::ResolutionError;
use crate::models::artifact::{Classifier, LinearTextClassifier};
use crate::models::holder::ActiveModel;
use crate::models::identifier::{ModelIdentifier, Stage, VersionSelector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version metadata file name
pub const META_FILE: &str = "meta.json";
/// Linear flavor artifact file name
pub const LINEAR_MODEL_FILE: &str = "model.json";
/// Scheme used when none is configured
pub const DEFAULT_SCHEME: &str = "models";

/// Contents of `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub version: u32,
    /// Stage name (None, Staging, Production, Archived)
    #[serde(default = "default_stage_name")]
    pub stage: String,
    /// Artifact flavor (linear, onnx)
    #[serde(default = "default_flavor")]
    pub flavor: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_stage_name() -> String {
    "None".to_string()
}

fn default_flavor() -> String {
    "linear".to_string()
}

/// A registry entry matched by an identifier
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    pub version: u32,
    pub stage: Stage,
    pub flavor: String,
    pub dir: PathBuf,
}

/// Model registry rooted at a directory
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
    /// Scheme this registry answers to in model URIs
    scheme: String,
    /// Intra-op threads for ONNX sessions
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    onnx_threads: usize,
}

impl ModelRegistry {
    /// Create a registry under the default `models` scheme
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_threads(root, 1)
    }

    /// Create a registry with an ONNX intra-op thread count
    pub fn with_threads<P: AsRef<Path>>(root: P, onnx_threads: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            scheme: DEFAULT_SCHEME.to_string(),
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Answer to `scheme` instead of the default
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Registry root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scheme accepted in model URIs
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Resolve an identifier to exactly one registered version.
    ///
    /// Identifiers naming another registry never resolve here.
    pub fn resolve(&self, id: &ModelIdentifier) -> Result<ResolvedVersion, ResolutionError> {
        if id.registry != self.scheme {
            debug!(model = %id, scheme = %self.scheme, "Identifier names another registry");
            return Err(not_found(id));
        }
        let model_dir = self.root.join(&id.name);

        match id.selector {
            VersionSelector::Version(version) => {
                let dir = model_dir.join(version.to_string());
                if !dir.join(META_FILE).is_file() {
                    return Err(not_found(id));
                }
                let meta = read_meta(&dir, id)?;
                if meta.version != version {
                    return Err(ResolutionError::Metadata {
                        identifier: id.to_string(),
                        path: dir.join(META_FILE),
                        reason: format!("declares version {}", meta.version),
                    });
                }
                resolved(meta, dir, id)
            }
            VersionSelector::Stage(stage) => {
                let mut best: Option<ResolvedVersion> = None;
                for (meta, dir) in self.scan(&model_dir, id)? {
                    let candidate = match resolved(meta, dir, id) {
                        Ok(candidate) => candidate,
                        Err(e) => {
                            warn!(error = %e, "Skipping model version with unknown stage");
                            continue;
                        }
                    };
                    if !stage.admits(candidate.stage) {
                        continue;
                    }
                    if best.as_ref().map_or(true, |b| candidate.version > b.version) {
                        best = Some(candidate);
                    }
                }
                best.ok_or_else(|| not_found(id))
            }
        }
    }

    /// All readable versions of a model, ascending.
    pub fn list_versions(&self, name: &str) -> Result<Vec<ResolvedVersion>, ResolutionError> {
        let id = ModelIdentifier::new(&self.scheme, name, VersionSelector::Stage(Stage::Latest));
        let mut versions = self
            .scan(&self.root.join(name), &id)?
            .into_iter()
            .map(|(meta, dir)| resolved(meta, dir, &id))
            .collect::<Result<Vec<_>, _>>()?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// Resolve and load an identifier into a servable model.
    pub fn load(&self, id: &ModelIdentifier) -> Result<ActiveModel, ResolutionError> {
        let version = self.resolve(id)?;

        info!(
            model = %id,
            version = version.version,
            stage = version.stage.as_str(),
            flavor = %version.flavor,
            path = %version.dir.display(),
            "Loading model artifact"
        );

        let classifier = self.load_classifier(&version, id)?;

        info!(
            model = %id,
            version = version.version,
            classes = classifier.classes().len(),
            "Model loaded successfully"
        );

        Ok(ActiveModel::new(id.clone(), version.version, classifier))
    }

    fn load_classifier(
        &self,
        version: &ResolvedVersion,
        id: &ModelIdentifier,
    ) -> Result<Box<dyn Classifier>, ResolutionError> {
        match version.flavor.as_str() {
            "linear" => {
                let path = version.dir.join(LINEAR_MODEL_FILE);
                let json = fs::read_to_string(&path)
                    .map_err(|source| ResolutionError::Io { path, source })?;
                let model = LinearTextClassifier::from_json(&json).map_err(|reason| {
                    ResolutionError::InvalidArtifact {
                        identifier: id.to_string(),
                        reason,
                    }
                })?;
                Ok(Box::new(model))
            }
            #[cfg(feature = "onnx")]
            "onnx" => {
                let model = crate::models::onnx::OnnxClassifier::load(
                    &version.dir,
                    self.onnx_threads,
                )
                .map_err(|reason| ResolutionError::InvalidArtifact {
                    identifier: id.to_string(),
                    reason,
                })?;
                Ok(Box::new(model))
            }
            other => Err(ResolutionError::UnsupportedFlavor {
                identifier: id.to_string(),
                flavor: other.to_string(),
            }),
        }
    }

    fn scan(
        &self,
        model_dir: &Path,
        id: &ModelIdentifier,
    ) -> Result<Vec<(VersionMeta, PathBuf)>, ResolutionError> {
        if !model_dir.is_dir() {
            return Err(not_found(id));
        }

        let entries = fs::read_dir(model_dir).map_err(|source| ResolutionError::Io {
            path: model_dir.to_path_buf(),
            source,
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ResolutionError::Io {
                path: model_dir.to_path_buf(),
                source,
            })?;
            let dir = entry.path();
            if !dir.join(META_FILE).is_file() {
                continue;
            }
            match read_meta(&dir, id) {
                Ok(meta) => found.push((meta, dir)),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable model version");
                }
            }
        }

        debug!(model = %id.name, versions = found.len(), "Scanned registry");
        Ok(found)
    }
}

fn not_found(id: &ModelIdentifier) -> ResolutionError {
    ResolutionError::NotFound {
        identifier: id.to_string(),
    }
}

fn read_meta(dir: &Path, id: &ModelIdentifier) -> Result<VersionMeta, ResolutionError> {
    let path = dir.join(META_FILE);
    let raw = fs::read_to_string(&path).map_err(|source| ResolutionError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| ResolutionError::Metadata {
        identifier: id.to_string(),
        path,
        reason: e.to_string(),
    })
}

fn resolved(
    meta: VersionMeta,
    dir: PathBuf,
    id: &ModelIdentifier,
) -> Result<ResolvedVersion, ResolutionError> {
    let stage = meta
        .stage
        .parse::<Stage>()
        .ok()
        .filter(|s| *s != Stage::Latest)
        .ok_or_else(|| ResolutionError::Metadata {
            identifier: id.to_string(),
            path: dir.join(META_FILE),
            reason: format!("unknown stage '{}'", meta.stage),
        })?;

    Ok(ResolvedVersion {
        version: meta.version,
        stage,
        flavor: meta.flavor,
        dir,
    })
}

/// Write a linear model version into a registry directory.
///
/// Used by tests and tooling that stage artifacts produced elsewhere.
pub fn write_linear_version(
    root: &Path,
    name: &str,
    version: u32,
    stage: Stage,
    spec: &crate::models::artifact::LinearModelSpec,
) -> std::io::Result<PathBuf> {
    let dir = root.join(name).join(version.to_string());
    fs::create_dir_all(&dir)?;

    let meta = VersionMeta {
        version,
        stage: stage.as_str().to_string(),
        flavor: "linear".to_string(),
        created_at: Some(Utc::now()),
    };
    fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;
    fs::write(dir.join(LINEAR_MODEL_FILE), serde_json::to_vec_pretty(spec)?)?;
    Ok(dir)
}
