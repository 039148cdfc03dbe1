//! Serial stamping of SVG templates.
//!
//! The template is parsed once to learn its physical size and the mapping
//! from millimetres to user units. Each stamp then splices the job's overlays
//! and a `<text>` element in as the last children of the root element. Every
//! other byte of the template is left untouched.

use base64::Engine as _;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::{ImageOverlay, Overlay, PlacementMm, SeriesSpec, SvgOverlay};

/// CSS pixels per millimetre (96 dpi)
pub const PX_PER_MM: f64 = 96.0 / 25.4;

/// `id` of the stamped `<text>` element
pub const STAMP_ELEMENT_ID: &str = "print-engine-serial";

/// SVG overlay sources by object-store key
pub type OverlaySources = HashMap<String, Vec<u8>>;

/// Slack allowed when checking the placement rectangle against the page
const BOUNDS_TOLERANCE_MM: f64 = 0.01;

const UTF8_BOM: &str = "\u{feff}";

static LENGTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:e[+-]?[0-9]+)?)\s*(mm|cm|in|pt|pc|px|q|%)?\s*$")
        .expect("valid length pattern")
});

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not valid UTF-8")]
    Encoding,

    #[error("malformed SVG: {0}")]
    Malformed(String),

    #[error("root element is <{0}>, expected <svg>")]
    NotSvg(String),

    #[error("document size unknown: root <svg> needs width/height or a viewBox")]
    UnknownSize,

    #[error("invalid {attribute} '{value}'")]
    InvalidLength { attribute: &'static str, value: String },

    #[error(
        "placement {x}/{y} {w}x{h} mm lies outside the {doc_width:.2}x{doc_height:.2} mm document"
    )]
    OutOfBounds {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        doc_width: f64,
        doc_height: f64,
    },

    #[error("overlay {index}: {reason}")]
    Overlay { index: usize, reason: String },
}

/// Physical size of a template and its mm to user-unit mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentGeometry {
    pub width_mm: f64,
    pub height_mm: f64,
    pub units_per_mm_x: f64,
    pub units_per_mm_y: f64,
    origin_x: f64,
    origin_y: f64,
}

impl DocumentGeometry {
    /// Convert a document-space point in mm to user units.
    pub fn to_user(&self, x_mm: f64, y_mm: f64) -> (f64, f64) {
        (
            self.origin_x + x_mm * self.units_per_mm_x,
            self.origin_y + y_mm * self.units_per_mm_y,
        )
    }

    fn contains(&self, rect: &PlacementMm) -> bool {
        let t = BOUNDS_TOLERANCE_MM;
        rect.x >= -t
            && rect.y >= -t
            && rect.x + rect.w <= self.width_mm + t
            && rect.y + rect.h <= self.height_mm + t
    }
}

enum Insertion {
    /// Offset of the root's closing tag
    BeforeClosingTag(usize),
    /// `<svg .../>`: offset of the `/>` and of the byte after it
    SelfClosing { slash: usize, end: usize },
}

/// A template prepared for repeated stamping.
pub struct TemplateStamper<'a> {
    source: &'a str,
    insertion: Insertion,
    root_name: String,
    geometry: DocumentGeometry,
    anchor_mm: (f64, f64),
    placement: PlacementMm,
    series: &'a SeriesSpec,
    font_family: &'a str,
    overlays: String,
}

impl<'a> TemplateStamper<'a> {
    /// Parse the template and check the placement against it.
    ///
    /// `font_family` is the family written into the document, which is the
    /// resolved family rather than the one requested by the job.
    pub fn new(
        template: &'a [u8],
        placement: &PlacementMm,
        series: &'a SeriesSpec,
        font_family: &'a str,
    ) -> Result<Self, TemplateError> {
        let source = std::str::from_utf8(template).map_err(|_| TemplateError::Encoding)?;
        let bom = if source.starts_with(UTF8_BOM) {
            UTF8_BOM.len()
        } else {
            0
        };
        let body = &source[bom..];

        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(body, options)
            .map_err(|e| TemplateError::Malformed(e.to_string()))?;
        let root = doc.root_element();

        let range = root.range();
        let element = &body[range.start..range.end];
        let root_name: String = element
            .trim_start_matches('<')
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
            .collect();

        if root.tag_name().name() != "svg" {
            return Err(TemplateError::NotSvg(root_name));
        }

        let insertion = if element.ends_with("/>") {
            Insertion::SelfClosing {
                slash: bom + range.end - 2,
                end: bom + range.end,
            }
        } else {
            let closing = element
                .rfind("</")
                .ok_or_else(|| TemplateError::Malformed("root element is not closed".into()))?;
            Insertion::BeforeClosingTag(bom + range.start + closing)
        };

        let geometry = geometry_of(&root)?;
        if !geometry.contains(placement) {
            return Err(TemplateError::OutOfBounds {
                x: placement.x,
                y: placement.y,
                w: placement.w,
                h: placement.h,
                doc_width: geometry.width_mm,
                doc_height: geometry.height_mm,
            });
        }

        Ok(Self {
            source,
            insertion,
            root_name,
            geometry,
            anchor_mm: placement.anchor(series.x_ratio, series.y_ratio),
            placement: *placement,
            series,
            font_family,
            overlays: String::new(),
        })
    }

    /// Draw `overlays` beneath the serial on every copy.
    ///
    /// SVG overlays are looked up in `sources` by their object-store key.
    pub fn with_overlays(
        mut self,
        overlays: &[Overlay],
        sources: &OverlaySources,
    ) -> Result<Self, TemplateError> {
        let mut markup = String::new();
        for (index, overlay) in overlays.iter().enumerate() {
            let element = match overlay {
                Overlay::Image(image) => self.image_markup(image),
                Overlay::Svg(svg) => {
                    let source = sources.get(&svg.svg_s3_key).ok_or_else(|| {
                        TemplateError::Overlay {
                            index,
                            reason: format!("'{}' was not fetched", svg.svg_s3_key),
                        }
                    })?;
                    self.svg_markup(svg, source).map_err(|e| TemplateError::Overlay {
                        index,
                        reason: e.to_string(),
                    })?
                }
            };
            markup.push_str(&element);
        }
        self.overlays = markup;
        Ok(self)
    }

    pub fn geometry(&self) -> &DocumentGeometry {
        &self.geometry
    }

    /// Text anchor (baseline start) in document millimetres.
    pub fn anchor_mm(&self) -> (f64, f64) {
        self.anchor_mm
    }

    /// Text anchor in user units.
    pub fn anchor_user(&self) -> (f64, f64) {
        self.geometry.to_user(self.anchor_mm.0, self.anchor_mm.1)
    }

    /// Overlay elements inserted ahead of every stamp
    pub fn overlay_markup(&self) -> &str {
        &self.overlays
    }

    /// The template with `text` stamped onto it.
    pub fn stamp(&self, text: &str) -> Vec<u8> {
        let markup = format!("{}{}", self.overlays, self.markup(text));
        let mut out = String::with_capacity(self.source.len() + markup.len() + 16);
        match self.insertion {
            Insertion::BeforeClosingTag(at) => {
                out.push_str(&self.source[..at]);
                out.push_str(&markup);
                out.push_str(&self.source[at..]);
            }
            Insertion::SelfClosing { slash, end } => {
                out.push_str(&self.source[..slash]);
                out.push('>');
                out.push_str(&markup);
                let _ = write!(out, "</{}>", self.root_name);
                out.push_str(&self.source[end..]);
            }
        }
        out.into_bytes()
    }

    /// The `<text>` element inserted for `text`.
    pub fn markup(&self, text: &str) -> String {
        let prefix = self.prefix();
        let (ux, uy) = self.anchor_user();
        let upm_x = self.geometry.units_per_mm_x;
        let upm_y = self.geometry.units_per_mm_y;
        let series = self.series;

        let mut out = String::new();
        let _ = write!(
            out,
            r#"<{prefix}text id="{STAMP_ELEMENT_ID}" x="{}" y="{}" font-family="{}" font-size="{}" fill="{}""#,
            fmt_num(ux),
            fmt_num(uy),
            xml_escape(&css_font_family(self.font_family)),
            fmt_num(series.font_size_mm * upm_y),
            xml_escape(series.color.trim()),
        );
        if series.letter_spacing_mm != 0.0 {
            let _ = write!(
                out,
                r#" letter-spacing="{}""#,
                fmt_num(series.letter_spacing_mm * upm_x)
            );
        }
        if series.rotation_deg != 0.0 {
            // SVG rotates clockwise with y pointing down
            let _ = write!(
                out,
                r#" transform="rotate({} {} {})""#,
                fmt_num(-series.rotation_deg),
                fmt_num(ux),
                fmt_num(uy)
            );
        }
        out.push_str(r#" xml:space="preserve">"#);

        match &series.per_letter_font_size_mm {
            Some(sizes) if !sizes.is_empty() => {
                for (i, c) in text.chars().enumerate() {
                    let mut buf = [0u8; 4];
                    let _ = write!(
                        out,
                        r#"<{prefix}tspan font-size="{}">{}</{prefix}tspan>"#,
                        fmt_num(series.font_size_for(i) * upm_y),
                        xml_escape(c.encode_utf8(&mut buf)),
                    );
                }
            }
            _ => out.push_str(&xml_escape(text)),
        }

        let _ = write!(out, "</{prefix}text>");
        out
    }

    /// Namespace prefix of the root element, with its colon
    fn prefix(&self) -> String {
        match self.root_name.split_once(':') {
            Some((prefix, _)) => format!("{prefix}:"),
            None => String::new(),
        }
    }

    /// User units of a point given in mm relative to `object_mm`.
    fn object_point(&self, x_mm: f64, y_mm: f64) -> (f64, f64) {
        self.geometry
            .to_user(self.placement.x + x_mm, self.placement.y + y_mm)
    }

    fn image_markup(&self, image: &ImageOverlay) -> String {
        let (ux, uy) = self.object_point(image.x_mm, image.y_mm);
        let mut out = String::new();
        let _ = write!(
            out,
            r#"<{}image x="{}" y="{}" width="{}" height="{}" preserveAspectRatio="xMidYMid meet""#,
            self.prefix(),
            fmt_num(ux),
            fmt_num(uy),
            fmt_num(image.w_mm * self.geometry.units_per_mm_x),
            fmt_num(image.h_mm * self.geometry.units_per_mm_y),
        );
        if image.rotation_deg != 0.0 {
            let _ = write!(
                out,
                r#" transform="rotate({} {} {})""#,
                fmt_num(-image.rotation_deg),
                fmt_num(ux),
                fmt_num(uy)
            );
        }
        let _ = write!(out, r#" href="{}"/>"#, xml_escape(&image.href()));
        out
    }

    fn svg_markup(&self, overlay: &SvgOverlay, source: &[u8]) -> Result<String, TemplateError> {
        let text = std::str::from_utf8(source).map_err(|_| TemplateError::Encoding)?;
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)
            .map_err(|e| TemplateError::Malformed(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "svg" {
            return Err(TemplateError::NotSvg(root.tag_name().name().to_string()));
        }
        let intrinsic = geometry_of(&root)?;

        let width = intrinsic.width_mm * self.geometry.units_per_mm_x;
        let height = intrinsic.height_mm * self.geometry.units_per_mm_y;
        let (left, top) = self.object_point(overlay.x_mm, overlay.y_mm);
        let data = base64::engine::general_purpose::STANDARD.encode(source);

        // Scale and rotate around the centre of the unscaled box
        let mut out = String::new();
        let _ = write!(
            out,
            r#"<{}image x="0" y="0" width="{}" height="{}" preserveAspectRatio="none" transform="translate({} {}) rotate({}) scale({}) translate({} {})" href="data:image/svg+xml;base64,{data}"/>"#,
            self.prefix(),
            fmt_num(width),
            fmt_num(height),
            fmt_num(left + width / 2.0),
            fmt_num(top + height / 2.0),
            fmt_num(-overlay.rotation_deg),
            fmt_num(overlay.scale),
            fmt_num(-width / 2.0),
            fmt_num(-height / 2.0),
        );
        Ok(out)
    }
}

/// Stamp a single `text` onto `svg_template`.
pub fn substitute(
    svg_template: &[u8],
    text: &str,
    placement: &PlacementMm,
    series: &SeriesSpec,
    font_family: &str,
) -> Result<Vec<u8>, TemplateError> {
    Ok(TemplateStamper::new(svg_template, placement, series, font_family)?.stamp(text))
}

fn geometry_of(root: &roxmltree::Node) -> Result<DocumentGeometry, TemplateError> {
    let width = length_attr(root, "width")?;
    let height = length_attr(root, "height")?;
    let view_box = match root.attribute("viewBox") {
        Some(raw) => Some(parse_view_box(raw)?),
        None => None,
    };

    // Viewport size in CSS px
    let (vw, vh) = match (width, height, view_box) {
        (Some(w), Some(h), _) => (w, h),
        (Some(w), None, Some(vb)) => (w, w * vb.3 / vb.2),
        (None, Some(h), Some(vb)) => (h * vb.2 / vb.3, h),
        (None, None, Some(vb)) => (vb.2, vb.3),
        _ => return Err(TemplateError::UnknownSize),
    };

    // Viewport px to user units
    let (scale_x, scale_y, origin_x, origin_y) = match view_box {
        None => (1.0, 1.0, 0.0, 0.0),
        Some((min_x, min_y, vb_w, vb_h)) => {
            let sx = vw / vb_w;
            let sy = vh / vb_h;
            let aspect = root.attribute("preserveAspectRatio").unwrap_or("");
            let mut parts = aspect.split_whitespace();
            let align = parts.next().unwrap_or("xMidYMid");
            if align == "none" {
                (sx, sy, min_x, min_y)
            } else {
                let slice = parts.next() == Some("slice");
                let s = if slice { sx.max(sy) } else { sx.min(sy) };
                let free_x = vw - vb_w * s;
                let free_y = vh - vb_h * s;
                let tx = if align.starts_with("xMin") {
                    0.0
                } else if align.starts_with("xMax") {
                    free_x
                } else {
                    free_x / 2.0
                };
                let ty = if align.ends_with("YMin") {
                    0.0
                } else if align.ends_with("YMax") {
                    free_y
                } else {
                    free_y / 2.0
                };
                (s, s, min_x - tx / s, min_y - ty / s)
            }
        }
    };

    Ok(DocumentGeometry {
        width_mm: vw / PX_PER_MM,
        height_mm: vh / PX_PER_MM,
        units_per_mm_x: PX_PER_MM / scale_x,
        units_per_mm_y: PX_PER_MM / scale_y,
        origin_x,
        origin_y,
    })
}

fn length_attr(node: &roxmltree::Node, name: &'static str) -> Result<Option<f64>, TemplateError> {
    match node.attribute(name) {
        Some(raw) => parse_length(raw).map_err(|_| TemplateError::InvalidLength {
            attribute: name,
            value: raw.to_string(),
        }),
        None => Ok(None),
    }
}

/// Parse an SVG length into CSS px. Percentages yield `None`.
fn parse_length(raw: &str) -> Result<Option<f64>, ()> {
    let caps = LENGTH_PATTERN.captures(raw).ok_or(())?;
    let value: f64 = caps[1].parse().map_err(|_| ())?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
    let px = match unit.as_deref() {
        None | Some("px") => value,
        Some("mm") => value * PX_PER_MM,
        Some("cm") => value * PX_PER_MM * 10.0,
        Some("q") => value * PX_PER_MM / 4.0,
        Some("in") => value * 96.0,
        Some("pt") => value * 96.0 / 72.0,
        Some("pc") => value * 16.0,
        Some("%") => return Ok(None),
        Some(_) => return Err(()),
    };
    if px.is_finite() && px > 0.0 {
        Ok(Some(px))
    } else {
        Err(())
    }
}

fn parse_view_box(raw: &str) -> Result<(f64, f64, f64, f64), TemplateError> {
    let invalid = || TemplateError::InvalidLength {
        attribute: "viewBox",
        value: raw.to_string(),
    };
    let numbers = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    match numbers[..] {
        [x, y, w, h] if [x, y, w, h].iter().all(|n| n.is_finite()) && w > 0.0 && h > 0.0 => {
            Ok((x, y, w, h))
        }
        _ => Err(invalid()),
    }
}

/// Format a coordinate with at most 4 decimals and no trailing zeros.
fn fmt_num(value: f64) -> String {
    let s = format!("{value:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn css_font_family(family: &str) -> String {
    const GENERIC: &[&str] = &["serif", "sans-serif", "monospace", "cursive", "fantasy"];
    if GENERIC.contains(&family.to_ascii_lowercase().as_str()) {
        family.to_string()
    } else {
        format!("'{}'", family.replace(['\'', '"'], ""))
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
