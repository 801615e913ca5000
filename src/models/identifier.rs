//! Model identifiers of the form `<registry>:/<model-name>/<version-or-stage>`.

use crate::error::ResolutionError;
use std::fmt;
use std::str::FromStr;

/// Registry stage a model version can be promoted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
    /// Highest registered version, whatever its stage
    Latest,
}

impl Stage {
    /// Canonical stage name as stored in registry metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
            Stage::Latest => "latest",
        }
    }

    /// Whether a version carrying `stage` satisfies this selector.
    pub fn admits(&self, stage: Stage) -> bool {
        *self == Stage::Latest || *self == stage
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            "latest" => Ok(Stage::Latest),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_lowercase())
    }
}

/// Either an exact version number or a symbolic stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    Version(u32),
    Stage(Stage),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Version(v) => write!(f, "{}", v),
            VersionSelector::Stage(stage) => write!(f, "{}", stage),
        }
    }
}

/// Fully qualified reference to a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelIdentifier {
    pub registry: String,
    pub name: String,
    pub selector: VersionSelector,
}

impl ModelIdentifier {
    /// Create a new identifier from its parts
    pub fn new(registry: &str, name: &str, selector: VersionSelector) -> Self {
        Self {
            registry: registry.to_string(),
            name: name.to_string(),
            selector,
        }
    }

    /// Same model, different version or stage.
    pub fn with_selector(&self, selector: VersionSelector) -> Self {
        Self {
            selector,
            ..self.clone()
        }
    }

    /// Parse `<registry>:/<model-name>/<version-or-stage>`.
    pub fn parse(uri: &str) -> Result<Self, ResolutionError> {
        let malformed = |reason: &str| ResolutionError::MalformedIdentifier {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (registry, path) = uri
            .split_once(":/")
            .ok_or_else(|| malformed("expected '<registry>:/<name>/<version-or-stage>'"))?;
        if registry.is_empty() {
            return Err(malformed("empty registry"));
        }

        let (name, selector) = path
            .trim_start_matches('/')
            .rsplit_once('/')
            .ok_or_else(|| malformed("missing version or stage"))?;
        if name.is_empty() || name.contains('/') {
            return Err(malformed("invalid model name"));
        }

        let selector = match selector.parse::<u32>() {
            Ok(version) => VersionSelector::Version(version),
            Err(_) => VersionSelector::Stage(selector.parse().map_err(|e: String| malformed(&e))?),
        };

        Ok(Self::new(registry, name, selector))
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}/{}", self.registry, self.name, self.selector)
    }
}

impl FromStr for ModelIdentifier {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
