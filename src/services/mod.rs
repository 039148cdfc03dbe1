pub mod font_registry;
pub mod orchestrator;
pub mod s3_store;
pub mod stamper;
pub mod storage;

pub use font_registry::{FontEntry, FontRegistry, FontSource, JobFonts, ResolvedFont};
pub use orchestrator::{
    compute_template_id, render_copies, render_document, EngineMetrics, JobOrchestrator,
    RenderResult, RenderedCopy,
};
pub use s3_store::S3Store;
pub use stamper::{
    substitute, OverlaySources, TemplateError, TemplateStamper, STAMP_ELEMENT_ID,
};
pub use storage::{InMemoryStore, LocalStore, ObjectStore, StoreError};
