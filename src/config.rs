use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

/// Which presentation backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Auto,
    Pptx,
    Com,
    AppleScript,
}

impl std::str::FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "pptx" => Ok(BackendChoice::Pptx),
            "com" => Ok(BackendChoice::Com),
            "applescript" => Ok(BackendChoice::AppleScript),
            other => Err(format!("unknown backend `{}`", other)),
        }
    }
}

/// What the runner does after a recoverable error (validation or lookup miss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendChoice,

    /// Directory holding `<version>.json` Bible translations.
    #[serde(default)]
    pub bible_dir: Option<PathBuf>,

    /// Directory holding plain-text lyric files.
    #[serde(default)]
    pub lyrics_dir: Option<PathBuf>,

    /// Pixel width of rasterized slides.
    #[serde(default = "default_export_width")]
    pub export_width: u32,

    /// TrueType font used when rasterizing text shapes.
    #[serde(default)]
    pub font_path: Option<PathBuf>,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Directory symbols expanded in `$(NAME)/...` paths.
    #[serde(default)]
    pub symbols: BTreeMap<String, String>,
}

fn default_export_width() -> u32 {
    1280
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::default(),
            bible_dir: None,
            lyrics_dir: None,
            export_width: default_export_width(),
            font_path: None,
            error_policy: ErrorPolicy::default(),
            symbols: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// `<config_dir>/service-ppt/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("service-ppt").join("config.yaml"))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| ServiceError::io(&path, e))?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            ServiceError::Parse {
                line,
                column,
                message,
                ..
            } => ServiceError::Parse {
                path: path.display().to_string(),
                line,
                column,
                message,
            },
            other => other,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            let (line, column) = e
                .location()
                .map(|loc| (loc.line(), loc.column()))
                .unwrap_or((0, 0));
            ServiceError::Parse {
                path: "<config>".to_string(),
                line,
                column,
                message: e.to_string(),
            }
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ServiceError::Validation(format!("cannot encode config: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ServiceError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| ServiceError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.backend, BackendChoice::Auto);
        assert_eq!(config.export_width, 1280);
        assert_eq!(config.error_policy, ErrorPolicy::Continue);
    }

    #[test]
    fn parses_backend_and_symbols() {
        let yaml = r#"
backend: pptx
export_width: 640
error_policy: stop
symbols:
  TEMPLATES: /srv/church/templates
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backend, BackendChoice::Pptx);
        assert_eq!(config.export_width, 640);
        assert_eq!(config.error_policy, ErrorPolicy::Stop);
        assert_eq!(
            config.symbols.get("TEMPLATES").map(String::as_str),
            Some("/srv/church/templates")
        );
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("nope.yaml"))).unwrap();
        assert_eq!(config.backend, BackendChoice::Auto);
    }

    #[test]
    fn backend_choice_from_str() {
        assert_eq!("AppleScript".parse::<BackendChoice>(), Ok(BackendChoice::AppleScript));
        assert!("keynote".parse::<BackendChoice>().is_err());
    }
}
