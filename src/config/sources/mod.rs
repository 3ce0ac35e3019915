//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! Rule tables are files; [`Format`] picks the deserializer from the file
//! extension, with each format behind its own cargo feature.
//! [`create_file_source`] builds the matching [`FileSource`].

pub mod file_source;

use std::path::Path;

use crate::config::model::Config;
use crate::config::ConfigSource;
use crate::error::RproxyError;
use file_source::FileSource;

type ParseError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    #[cfg(feature = "yaml")]
    Yaml,
    #[cfg(feature = "json")]
    Json,
    #[cfg(feature = "toml")]
    Toml,
}

impl Format {
    /// Format for a file extension, if that format was compiled in.
    pub fn from_extension(ext: &str) -> Result<Self, RproxyError> {
        match ext {
            #[cfg(feature = "yaml")]
            "yaml" | "yml" => Ok(Self::Yaml),
            #[cfg(feature = "json")]
            "json" => Ok(Self::Json),
            #[cfg(feature = "toml")]
            "toml" => Ok(Self::Toml),
            other => Err(RproxyError::UnsupportedFormat(other.to_string())),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "yaml")]
            Self::Yaml => "yaml",
            #[cfg(feature = "json")]
            Self::Json => "json",
            #[cfg(feature = "toml")]
            Self::Toml => "toml",
        }
    }

    pub fn parse(self, content: &str) -> Result<Config, ParseError> {
        match self {
            #[cfg(feature = "yaml")]
            Self::Yaml => Ok(serde_yml::from_str(content)?),
            #[cfg(feature = "json")]
            Self::Json => Ok(serde_json::from_str(content)?),
            #[cfg(feature = "toml")]
            Self::Toml => Ok(toml::from_str(content)?),
        }
    }
}

/// Parse a rule table from a string based on file extension. Does not
/// validate.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, RproxyError> {
    Format::from_extension(ext)?
        .parse(content)
        .map_err(|source| RproxyError::ConfigParse {
            path: path_display.to_string(),
            source,
        })
}

/// Pick the source implementation matching the file extension.
pub fn create_file_source(path: &Path) -> Result<Box<dyn ConfigSource>, RproxyError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let format = Format::from_extension(ext)?;
    Ok(Box::new(FileSource::new(path.to_path_buf(), format)))
}
