pub mod pdf_merge;
pub mod svg_to_pdf;
pub mod svg_to_png;

pub use pdf_merge::{merge_pages, page_count};
pub use svg_to_pdf::{PdfRenderer, SvgPdfRenderer};
pub use svg_to_png::SvgRenderer;
