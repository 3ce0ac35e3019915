//! Rule-table loading and validation.
//!
//! Defines the [`ConfigSource`] trait for pluggable file formats.
//! Submodules provide the data model, validation logic, and the concrete
//! source implementations. The table is read once at startup; nothing
//! here watches for changes.

pub mod model;
pub mod sources;
pub mod validation;

use async_trait::async_trait;

use crate::error::RproxyError;
use model::Config;

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read, parse and validate the rule table.
    async fn load(&self) -> Result<Config, RproxyError>;
}
