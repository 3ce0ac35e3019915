//! Async file-based config source.
//!
//! [`FileSource`] implements [`ConfigSource`] for every supported
//! [`Format`]. It reads the file via Tokio, deserializes it and validates
//! the result.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::ConfigSource;
use crate::error::RproxyError;

use super::Format;

pub struct FileSource {
    path: PathBuf,
    format: Format,
}

impl FileSource {
    #[must_use]
    pub const fn new(path: PathBuf, format: Format) -> Self {
        Self { path, format }
    }

    async fn read_content(&self) -> Result<String, RproxyError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RproxyError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                RproxyError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.format.name()
    }

    async fn load(&self) -> Result<Config, RproxyError> {
        let content = self.read_content().await?;

        let config = self.format.parse(&content).map_err(|e| RproxyError::ConfigParse {
            path: self.path.display().to_string(),
            source: e,
        })?;

        if let Err(errors) = validate(&config) {
            return Err(RproxyError::ConfigValidation { errors });
        }

        Ok(config)
    }
}
