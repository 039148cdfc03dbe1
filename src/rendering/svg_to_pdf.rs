use std::sync::Arc;
use svg2pdf::usvg;

use crate::error::RenderError;

/// Converts one SVG document into a single-page PDF.
pub trait PdfRenderer: Send + Sync {
    fn render(&self, svg: &[u8]) -> Result<Vec<u8>, RenderError>;
}

/// Vector PDF conversion through `svg2pdf`.
///
/// Conversion runs at 96 dpi, the CSS pixel density usvg assumes, so that a
/// template declared as `146mm` wide yields a page exactly 146 mm wide.
pub struct SvgPdfRenderer {
    fontdb: Arc<fontdb::Database>,
    required_text: Option<String>,
}

impl SvgPdfRenderer {
    pub fn new(fontdb: Arc<fontdb::Database>) -> Self {
        Self {
            fontdb,
            required_text: None,
        }
    }

    /// Fail unless the `<text>` element with this id renders glyphs.
    pub fn require_text(mut self, id: impl Into<String>) -> Self {
        self.required_text = Some(id.into());
        self
    }

    fn parse(&self, svg: &[u8]) -> Result<usvg::Tree, RenderError> {
        let options = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_data(svg, &options)
            .map_err(|e| RenderError::SvgParse(e.to_string()))?;

        let size = tree.size();
        if !(size.width() > 0.0 && size.height() > 0.0) {
            return Err(RenderError::UnsupportedDimensions {
                width: size.width() as u32,
                height: size.height() as u32,
            });
        }
        if let Some(id) = &self.required_text {
            ensure_text_rendered(&tree, id)?;
        }
        Ok(tree)
    }
}

/// usvg drops a text element when no installed face covers it.
pub(crate) fn ensure_text_rendered(tree: &usvg::Tree, id: &str) -> Result<(), RenderError> {
    match tree.node_by_id(id) {
        Some(usvg::Node::Text(text)) if text.flattened().has_children() => Ok(()),
        _ => Err(RenderError::FontUnavailable(format!(
            "no installed font face renders text #{id}"
        ))),
    }
}

impl PdfRenderer for SvgPdfRenderer {
    fn render(&self, svg: &[u8]) -> Result<Vec<u8>, RenderError> {
        let tree = self.parse(svg)?;
        let pdf = svg2pdf::to_pdf(
            &tree,
            svg2pdf::ConversionOptions::default(),
            svg2pdf::PageOptions { dpi: 96.0 },
        )
        .map_err(|e| RenderError::Pdf(e.to_string()))?;

        tracing::trace!(
            width = tree.size().width(),
            height = tree.size().height(),
            bytes = pdf.len(),
            "Converted SVG to PDF"
        );
        Ok(pdf)
    }
}
