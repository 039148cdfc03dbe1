use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use utoipa::ToSchema;

use crate::error::ValidationError;

/// Upper bound on overlays per job
pub const MAX_OVERLAYS: usize = 32;

const OVERLAY_IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

static COLOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})|[a-zA-Z]{3,32})$")
        .expect("valid color pattern")
});

/// A render job as posted to `/render`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenderJob {
    /// Caller-chosen identifier; also names the stored PDF
    pub job_id: String,
    /// Object-store key of the SVG template
    pub svg_s3_key: String,
    /// Placement rectangle in millimetres (document space, top-left origin)
    pub object_mm: PlacementMm,
    /// Serial numbers to stamp, one per copy
    pub series: SeriesSpec,
    /// Fonts shipped with the job, usable as `series.font`
    #[serde(default)]
    pub custom_fonts: Vec<CustomFont>,
    /// Artwork drawn on every copy, beneath the serial
    #[serde(default)]
    pub overlays: Vec<Overlay>,
}

/// Rectangle in millimetres. `x`/`y` locate its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlacementMm {
    #[serde(default, alias = "x_mm")]
    pub x: f64,
    #[serde(default, alias = "y_mm")]
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl PlacementMm {
    /// Anchor point for the given ratios (0,0 = top-left, 1,1 = bottom-right).
    pub fn anchor(&self, x_ratio: f64, y_ratio: f64) -> (f64, f64) {
        (self.x + x_ratio * self.w, self.y + y_ratio * self.h)
    }
}

/// The serial series and how it is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SeriesSpec {
    /// First serial; must end in decimal digits (e.g. `A0001`)
    pub start: String,
    /// Number of copies
    pub count: u32,
    #[serde(default = "default_font", alias = "font_family")]
    pub font: String,
    pub font_size_mm: f64,
    /// Horizontal anchor inside `object_mm`, 0 = left edge, 1 = right edge
    pub x_ratio: f64,
    /// Vertical baseline inside `object_mm`, 0 = top edge, 1 = bottom edge
    pub y_ratio: f64,
    #[serde(default)]
    pub letter_spacing_mm: f64,
    /// Counter-clockwise rotation around the anchor
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default = "default_color")]
    pub color: String,
    /// Optional size override for the n-th character
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_letter_font_size_mm: Option<Vec<f64>>,
}

fn default_font() -> String {
    "Helvetica".to_string()
}

fn default_color() -> String {
    "#000000".to_string()
}

/// A font shipped inline with the job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CustomFont {
    /// Name the job refers to the font by
    pub family: String,
    /// `data:` URL carrying the TrueType/OpenType file
    #[serde(skip_serializing)]
    pub data_url: String,
    #[serde(default)]
    pub mime: String,
}

/// Artwork placed on every copy. Positions are millimetres relative to the
/// top-left corner of `object_mm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Overlay {
    Svg(SvgOverlay),
    Image(ImageOverlay),
}

/// An SVG fetched from the object store, drawn at its intrinsic size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SvgOverlay {
    /// Always "svg"
    #[serde(rename = "type", default = "svg_overlay_kind")]
    pub kind: String,
    pub svg_s3_key: String,
    /// Top-left corner of the unscaled overlay
    pub x_mm: f64,
    pub y_mm: f64,
    /// Scale around the overlay's centre
    pub scale: f64,
    /// Counter-clockwise rotation around the overlay's centre
    #[serde(default)]
    pub rotation_deg: f64,
}

/// An image shipped inline, fitted into its box keeping its aspect ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ImageOverlay {
    /// `data:` URL carrying PNG, JPEG, GIF, WebP or SVG
    pub data_url: String,
    /// Overrides the media type of the data URL
    #[serde(default)]
    pub mime: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub w_mm: f64,
    pub h_mm: f64,
    /// Counter-clockwise rotation around the top-left corner
    #[serde(default)]
    pub rotation_deg: f64,
}

fn svg_overlay_kind() -> String {
    "svg".to_string()
}

impl Overlay {
    fn validate(&self, index: usize) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::new(format!("overlays[{index}]: {reason}"));
        match self {
            Overlay::Svg(svg) => {
                if !svg.kind.eq_ignore_ascii_case("svg") {
                    return Err(invalid("type must be \"svg\""));
                }
                if svg.svg_s3_key.trim().is_empty() {
                    return Err(invalid("svg_s3_key must not be empty"));
                }
                if ![svg.x_mm, svg.y_mm, svg.rotation_deg].iter().all(|v| v.is_finite()) {
                    return Err(invalid("x_mm, y_mm and rotation_deg must be finite"));
                }
                if !(svg.scale.is_finite() && svg.scale > 0.0) {
                    return Err(invalid("scale must be > 0"));
                }
            }
            Overlay::Image(image) => {
                if !image.data_url.starts_with("data:") {
                    return Err(invalid("data_url must be a data: URL"));
                }
                let mime = image.media_type();
                if !mime.is_empty() && !OVERLAY_IMAGE_MIMES.contains(&mime.as_str()) {
                    return Err(invalid(&format!("unsupported image type '{mime}'")));
                }
                if ![image.x_mm, image.y_mm, image.rotation_deg].iter().all(|v| v.is_finite()) {
                    return Err(invalid("x_mm, y_mm and rotation_deg must be finite"));
                }
                let positive = |v: f64| v.is_finite() && v > 0.0;
                if !(positive(image.w_mm) && positive(image.h_mm)) {
                    return Err(invalid("w_mm and h_mm must be > 0"));
                }
            }
        }
        Ok(())
    }
}

impl ImageOverlay {
    /// Media type from `mime`, else from the data URL header. Empty if neither names one.
    pub fn media_type(&self) -> String {
        let from_url = self
            .data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .unwrap_or("");
        let mime = if self.mime.trim().is_empty() {
            from_url
        } else {
            self.mime.trim()
        };
        mime.to_ascii_lowercase()
    }

    /// The data URL, with `mime` written into its header.
    pub fn href(&self) -> String {
        let mime = self.media_type();
        let parts = self
            .data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','));
        match parts {
            Some((header, payload)) if !mime.is_empty() => match header.split_once(';') {
                Some((_, params)) => format!("data:{mime};{params},{payload}"),
                None => format!("data:{mime},{payload}"),
            },
            _ => self.data_url.clone(),
        }
    }
}

impl RenderJob {
    /// Check value ranges before any I/O happens.
    pub fn validate(&self, max_series_count: u32) -> Result<(), ValidationError> {
        if self.job_id.trim().is_empty() {
            return Err(ValidationError::new("job_id must not be empty"));
        }
        if self.job_id.contains(['/', '\\']) || self.job_id.contains("..") {
            return Err(ValidationError::new(
                "job_id must not contain path separators",
            ));
        }
        if self.svg_s3_key.trim().is_empty() {
            return Err(ValidationError::new("svg_s3_key must not be empty"));
        }

        let rect = &self.object_mm;
        if !(rect.x.is_finite() && rect.y.is_finite()) {
            return Err(ValidationError::new("object_mm.x and object_mm.y must be finite"));
        }
        if !(rect.w.is_finite() && rect.w > 0.0 && rect.h.is_finite() && rect.h > 0.0) {
            return Err(ValidationError::new("object_mm.w and object_mm.h must be > 0"));
        }

        self.series.validate(max_series_count)?;

        for font in &self.custom_fonts {
            if font.family.trim().is_empty() {
                return Err(ValidationError::new("custom_fonts[].family must not be empty"));
            }
            if !font.data_url.starts_with("data:") {
                return Err(ValidationError::new(format!(
                    "custom font '{}' must be a data: URL",
                    font.family
                )));
            }
        }

        if self.overlays.len() > MAX_OVERLAYS {
            return Err(ValidationError::new(format!(
                "at most {MAX_OVERLAYS} overlays are allowed"
            )));
        }
        for (index, overlay) in self.overlays.iter().enumerate() {
            overlay.validate(index)?;
        }

        Ok(())
    }
}

impl SeriesSpec {
    fn validate(&self, max_series_count: u32) -> Result<(), ValidationError> {
        if self.count < 1 {
            return Err(ValidationError::new("series.count must be >= 1"));
        }
        if self.count > max_series_count {
            return Err(ValidationError::new(format!(
                "series.count must be <= {max_series_count}"
            )));
        }
        if !(self.font_size_mm.is_finite() && self.font_size_mm > 0.0) {
            return Err(ValidationError::new("series.font_size_mm must be > 0"));
        }
        for (name, ratio) in [("x_ratio", self.x_ratio), ("y_ratio", self.y_ratio)] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ValidationError::new(format!(
                    "series.{name} must be within [0, 1]"
                )));
            }
        }
        if !self.letter_spacing_mm.is_finite() || !self.rotation_deg.is_finite() {
            return Err(ValidationError::new(
                "series.letter_spacing_mm and series.rotation_deg must be finite",
            ));
        }
        if !COLOR_PATTERN.is_match(self.color.trim()) {
            return Err(ValidationError::new(format!(
                "series.color '{}' is not a hex color or color keyword",
                self.color
            )));
        }
        if self.font.trim().is_empty() {
            return Err(ValidationError::new("series.font must not be empty"));
        }
        // Parsing the start value also checks the trailing-digit rule and overflow.
        super::SerialSeries::new(&self.start, self.count)?;
        Ok(())
    }

    /// Font size for the character at `index`, honouring per-letter overrides.
    pub fn font_size_for(&self, index: usize) -> f64 {
        self.per_letter_font_size_mm
            .as_ref()
            .and_then(|sizes| sizes.get(index))
            .copied()
            .filter(|size| size.is_finite() && *size > 0.0)
            .unwrap_or(self.font_size_mm)
    }
}
