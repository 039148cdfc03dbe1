use super::svg_to_pdf::ensure_text_rendered;
use crate::error::RenderError;
use resvg::usvg::{self, Transform};
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;

/// Upper bound on preview size, in pixels
const MAX_PIXELS: u64 = 40_000_000;

/// Renders stamped templates to PNG for previews.
///
/// The image is rasterized at the requested density on a white background
/// and re-compressed with oxipng.
pub struct SvgRenderer {
    /// Font database for text rendering
    fontdb: Arc<fontdb::Database>,
    required_text: Option<String>,
}

impl SvgRenderer {
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

    /// Render SVG to PNG at `dpi` pixels per inch.
    pub fn render_png(&self, svg_data: &[u8], dpi: f32) -> Result<Vec<u8>, RenderError> {
        let pixmap = self.rasterize_svg(svg_data, dpi)?;
        let png_bytes = encode_png(&pixmap)?;

        // Re-compress with oxipng (zopfli + adaptive filter selection)
        let optimized = oxipng::optimize_from_memory(
            &png_bytes,
            &oxipng::Options {
                strip: oxipng::StripChunks::Safe,
                ..Default::default()
            },
        )
        .unwrap_or(png_bytes);
        Ok(optimized)
    }

    /// Parse and rasterize SVG to an RGBA pixmap
    fn rasterize_svg(&self, svg_data: &[u8], dpi: f32) -> Result<Pixmap, RenderError> {
        let options = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_data(svg_data, &options)
            .map_err(|e| RenderError::SvgParse(e.to_string()))?;
        if let Some(id) = &self.required_text {
            ensure_text_rendered(&tree, id)?;
        }

        // usvg sizes are CSS px at 96 dpi
        let scale = dpi / 96.0;
        let svg_size = tree.size();
        let width = (svg_size.width() * scale).ceil() as u32;
        let height = (svg_size.height() * scale).ceil() as u32;
        if width == 0 || height == 0 || u64::from(width) * u64::from(height) > MAX_PIXELS {
            return Err(RenderError::UnsupportedDimensions { width, height });
        }

        let mut pixmap = Pixmap::new(width, height).ok_or(RenderError::PixmapAllocation)?;
        pixmap.fill(tiny_skia::Color::WHITE);

        resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

        Ok(pixmap)
    }
}

/// Encode an opaque pixmap as 8-bit RGB PNG.
fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, RenderError> {
    // Background is opaque white, so alpha carries no information
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = png::Encoder::new(&mut buf, pixmap.width(), pixmap.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder
            .write_header()
            .map_err(|e| RenderError::PngEncode(e.to_string()))?;
        writer
            .write_image_data(&rgb)
            .map_err(|e| RenderError::PngEncode(e.to_string()))?;
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> SvgRenderer {
        SvgRenderer::new(Arc::new(fontdb::Database::new()))
    }

    fn png_size(data: &[u8]) -> (u32, u32) {
        let decoder = png::Decoder::new(Cursor::new(data));
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        (info.width, info.height)
    }

    #[test]
    fn test_render_png_scales_with_dpi() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="1in" height="0.5in">
            <rect width="100%" height="100%" fill="black"/>
        </svg>"#;
        let png = renderer().render_png(svg.as_bytes(), 150.0).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(png_size(&png), (150, 75));

        let png = renderer().render_png(svg.as_bytes(), 96.0).unwrap();
        assert_eq!(png_size(&png), (96, 48));
    }

    #[test]
    fn test_render_png_rejects_huge_output() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100in" height="100in"/>"#;
        let err = renderer().render_png(svg.as_bytes(), 600.0).unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedDimensions { .. }));
    }

    #[test]
    fn test_render_png_required_text_needs_a_face() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="1in" height="0.5in">
            <text id="serial" x="4" y="30" font-family="Tuffy" font-size="20">A0001</text>
        </svg>"#;
        let err = renderer()
            .require_text("serial")
            .render_png(svg.as_bytes(), 96.0)
            .unwrap_err();
        assert!(matches!(err, RenderError::FontUnavailable(_)));

        let mut db = fontdb::Database::new();
        db.load_font_file(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/fonts/Tuffy.ttf"
        ))
        .unwrap();
        let png = SvgRenderer::new(Arc::new(db))
            .require_text("serial")
            .render_png(svg.as_bytes(), 96.0)
            .unwrap();
        assert_eq!(png_size(&png), (96, 48));
    }

    #[test]
    fn test_render_png_invalid_svg() {
        let err = renderer().render_png(b"<nope", 96.0).unwrap_err();
        assert!(matches!(err, RenderError::SvgParse(_)));
    }
}
