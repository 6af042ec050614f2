//! External collaborators
//!
//! The engine only talks to the outside world through these traits. Every
//! call is a suspension point; nothing else in the engine awaits.

use crate::error::{LookupError, SubmissionError, UploadError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Stored image as returned by the asset service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Storage path, submitted with the report
    pub path: String,
    /// Preview URL
    #[serde(default)]
    pub url: String,
}

impl ImageRef {
    /// JSON form stored in the form state
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({"path": self.path, "url": self.url})
    }

    /// Parse a stored image value
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Outcome of a report generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Whether a report was produced
    pub success: bool,
    /// Path of the generated report
    #[serde(default)]
    pub report_path: String,
    /// Service message, shown verbatim
    #[serde(default)]
    pub message: String,
}

/// Outcome of a template reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    /// Templates available after the reload
    pub loaded_count: usize,
}

/// Schema documents and data-source payloads
#[async_trait]
pub trait TemplateService: Send + Sync {
    /// Schema document text for a template
    async fn fetch_schema(&self, template_id: &str) -> Result<String, LookupError>;

    /// Payload of one data source
    async fn fetch_data_source(&self, template_id: &str, source_id: &str)
        -> Result<Value, LookupError>;

    /// Re-read templates from their backing store
    async fn reload(&self) -> Result<ReloadSummary, LookupError>;
}

/// Reference entities (vulnerability library, ICP records, ...)
#[async_trait]
pub trait ReferenceDataService: Send + Sync {
    /// Fetch one entity; `LookupError::NotFound` when it does not exist
    async fn lookup_entity(&self, endpoint: &str, id: &str) -> Result<Value, LookupError>;
}

/// Image storage
#[async_trait]
pub trait AssetService: Send + Sync {
    /// Store an image
    async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<ImageRef, UploadError>;
}

/// Report generation
#[async_trait]
pub trait SubmissionService: Send + Sync {
    /// Generate a report from the flattened form
    async fn generate(
        &self,
        template_id: &str,
        payload: Map<String, Value>,
    ) -> Result<SubmissionReceipt, SubmissionError>;
}

/// The four collaborators, shared
#[derive(Clone)]
pub struct Services {
    /// Template service
    pub templates: Arc<dyn TemplateService>,
    /// Reference data service
    pub reference: Arc<dyn ReferenceDataService>,
    /// Asset service
    pub assets: Arc<dyn AssetService>,
    /// Submission service
    pub submission: Arc<dyn SubmissionService>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    /// Bundle collaborators
    pub fn new(
        templates: Arc<dyn TemplateService>,
        reference: Arc<dyn ReferenceDataService>,
        assets: Arc<dyn AssetService>,
        submission: Arc<dyn SubmissionService>,
    ) -> Self {
        Self {
            templates,
            reference,
            assets,
            submission,
        }
    }
}
