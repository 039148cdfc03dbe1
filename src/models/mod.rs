pub mod config;
pub mod job;
pub mod serial;

pub use config::{
    AppConfig, ConfigError, FontConfig, LimitsConfig, S3Config, StorageConfig,
    DEFAULT_MAX_SERIES_COUNT,
};
pub use job::{
    CustomFont, ImageOverlay, Overlay, PlacementMm, RenderJob, SeriesSpec, SvgOverlay,
    MAX_OVERLAYS,
};
pub use serial::SerialSeries;
