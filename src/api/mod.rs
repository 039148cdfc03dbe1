pub mod fonts;
pub mod headers;
pub mod health;
pub mod render;

pub use fonts::{handle_fonts, __path_handle_fonts};
pub use headers::{HeaderMapExt, INTERNAL_KEY_HEADER};
pub use health::{handle_health, HealthResponse, __path_handle_health};
pub use render::{__path_handle_generate, __path_handle_preview, __path_handle_render};
pub use render::{
    handle_generate, handle_preview, handle_render, ErrorResponse, PreviewQuery, RenderResponse,
    MAX_PREVIEW_DPI,
};
