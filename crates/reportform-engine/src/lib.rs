//! reportform engine
//!
//! Turns a loaded [`Schema`](reportform_schema::Schema) into a live form:
//! - Holds the form state and reinstates defaults on reset
//! - Runs computed fields, behaviors, presets and vulnerability statistics
//! - Manages repeating lists with stable item identities
//! - Validates before handing the form to report generation
//! - Renders a widget tree and patches only what a change touched
//!
//! # Example
//!
//! ```rust,ignore
//! use reportform_engine::{EngineConfig, RenderEngine, Services};
//!
//! # async fn example(services: Services) -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = RenderEngine::new(EngineConfig::new(), services);
//! engine.load_template("pentest").await?;
//!
//! engine.set_field("system_name", "OA系统".into()).await?;
//! let receipt = engine.submit().await?;
//! println!("Report at {}", receipt.report_path);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

// Core modules
pub mod aggregate;
pub mod cache;
pub mod debounce;
pub mod dependency;
pub mod error;
pub mod events;
pub mod list;
pub mod render;
pub mod services;
pub mod state;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use aggregate::RiskRating;
pub use cache::{CacheStats, DataSourceCache};
pub use debounce::Debouncer;
pub use dependency::{Cascade, DependencyEngine, PendingLookup};
pub use error::{
    EngineError, EngineResult, ListError, LookupError, SchemaError, SubmissionError, SubmitError,
    UploadError,
};
pub use events::{EventQueue, EventSender, UiEvent};
pub use list::{LibraryTicket, RepeatingItem, RepeatingList, RepeatingListController};
pub use render::{FetchTicket, RenderEngine, RenderTree, Session, Widget};
pub use services::{
    AssetService, ImageRef, ReferenceDataService, ReloadSummary, Services, SubmissionReceipt,
    SubmissionService, TemplateService,
};
pub use state::{FieldValue, FormState};
pub use types::{
    Clock, DefaultsContext, EngineConfig, FixedClock, ItemId, SchemaGeneration, SystemClock,
};
pub use validation::{ValidationEngine, ValidationReport};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a form
    pub use crate::{
        Cascade, EngineConfig, EngineError, EngineResult, FormState, ItemId, RenderEngine,
        RenderTree, Services, UiEvent, ValidationReport,
    };
    pub use reportform_schema::Schema;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
