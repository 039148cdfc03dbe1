//! Font discovery and family resolution.
//!
//! One `fontdb::Database` is built at startup from the system fonts and an
//! optional `FONTS_DIR`. Jobs shipping their own fonts get a clone of it with
//! those faces added on top.

use base64::Engine as _;
use fontdb::{Database, Family, Source};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{RenderError, ValidationError};
use crate::models::{CustomFont, FontConfig};

/// The 14 standard PDF fonts, accepted as family names.
pub const PDF_CORE_FONTS: &[&str] = &[
    "Courier",
    "Courier-Bold",
    "Courier-BoldOblique",
    "Courier-Oblique",
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-BoldOblique",
    "Helvetica-Oblique",
    "Symbol",
    "Times-Bold",
    "Times-BoldItalic",
    "Times-Italic",
    "Times-Roman",
    "ZapfDingbats",
];

const SANS_CANDIDATES: &[&str] = &[
    "Liberation Sans",
    "Arimo",
    "Helvetica",
    "Arial",
    "DejaVu Sans",
    "Noto Sans",
    "FreeSans",
];
const SERIF_CANDIDATES: &[&str] = &[
    "Liberation Serif",
    "Tinos",
    "Times New Roman",
    "Times",
    "DejaVu Serif",
    "Noto Serif",
    "FreeSerif",
];
const MONO_CANDIDATES: &[&str] = &[
    "Liberation Mono",
    "Cousine",
    "Courier New",
    "Courier",
    "DejaVu Sans Mono",
    "Noto Sans Mono",
    "FreeMono",
];

/// Where a font family comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FontSource {
    /// Standard PDF font name mapped onto an installed look-alike
    PdfCore,
    System,
    FontsDir,
    /// Shipped inline with the job
    Custom,
    /// Requested family was not found; the default family was used
    Fallback,
}

/// An entry of `GET /fonts`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FontEntry {
    pub family: String,
    pub source: FontSource,
}

/// Outcome of resolving a requested family.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResolvedFont {
    /// Family name written into the stamped SVG
    pub family: String,
    pub source: FontSource,
}

/// Font database for one job, with its custom family aliases.
#[derive(Clone)]
pub struct JobFonts {
    pub db: Arc<Database>,
    aliases: HashMap<String, String>,
}

pub struct FontRegistry {
    db: Arc<Database>,
    /// Lower-cased family name to (display name, origin)
    families: BTreeMap<String, (String, FontSource)>,
    default_family: Option<String>,
    strict: bool,
}

impl FontRegistry {
    pub fn new(config: &FontConfig) -> Self {
        let mut db = Database::new();
        let mut families = BTreeMap::new();

        if config.load_system_fonts {
            db.load_system_fonts();
            for face in db.faces() {
                for (name, _) in &face.families {
                    families
                        .entry(name.to_lowercase())
                        .or_insert_with(|| (name.clone(), FontSource::System));
                }
            }
        }

        if let Some(dir) = &config.fonts_dir {
            for name in load_fonts_dir(&mut db, dir) {
                families.insert(name.to_lowercase(), (name, FontSource::FontsDir));
            }
        }

        assign_generic_families(&mut db);

        tracing::info!(
            font_count = db.len(),
            family_count = families.len(),
            sans_serif = db.family_name(&Family::SansSerif),
            "Loaded fonts"
        );

        Self {
            db: Arc::new(db),
            families,
            default_family: config.default_family.clone(),
            strict: config.strict,
        }
    }

    /// Shared database, without any job fonts
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn face_count(&self) -> usize {
        self.db.len()
    }

    /// Resolvable families: PDF core names followed by the installed ones,
    /// sorted case-insensitively.
    pub fn list(&self) -> Vec<FontEntry> {
        let mut entries: BTreeMap<String, FontEntry> = self
            .families
            .iter()
            .map(|(key, (family, source))| {
                (
                    key.clone(),
                    FontEntry {
                        family: family.clone(),
                        source: *source,
                    },
                )
            })
            .collect();
        for name in PDF_CORE_FONTS {
            entries.insert(
                name.to_lowercase(),
                FontEntry {
                    family: name.to_string(),
                    source: FontSource::PdfCore,
                },
            );
        }
        entries.into_values().collect()
    }

    /// Layer the job's custom fonts on top of the shared database.
    pub fn prepare_job_fonts(&self, custom: &[CustomFont]) -> Result<JobFonts, ValidationError> {
        if custom.is_empty() {
            return Ok(JobFonts {
                db: Arc::clone(&self.db),
                aliases: HashMap::new(),
            });
        }

        let mut db = (*self.db).clone();
        let mut aliases = HashMap::new();
        for font in custom {
            let data = decode_font(font)?;
            let ids = db.load_font_source(Source::Binary(Arc::new(data)));
            let internal = ids
                .first()
                .and_then(|id| db.face(*id))
                .and_then(|face| face.families.first())
                .map(|(name, _)| name.clone())
                .ok_or_else(|| {
                    ValidationError::new(format!(
                        "custom font '{}' contains no usable face",
                        font.family
                    ))
                })?;
            tracing::debug!(family = %font.family, internal = %internal, "Loaded custom font");
            aliases.insert(font.family.trim().to_lowercase(), internal);
        }

        Ok(JobFonts {
            db: Arc::new(db),
            aliases,
        })
    }

    /// Map a requested family onto one the renderer can use.
    pub fn resolve(&self, fonts: &JobFonts, requested: &str) -> Result<ResolvedFont, RenderError> {
        let wanted = requested.trim();
        let key = wanted.to_lowercase();

        if let Some(internal) = fonts.aliases.get(&key) {
            return Ok(ResolvedFont {
                family: internal.clone(),
                source: FontSource::Custom,
            });
        }

        if let Some((family, source)) = self.families.get(&key) {
            return Ok(ResolvedFont {
                family: family.clone(),
                source: *source,
            });
        }

        if let Some(generic) = core_alias(&key) {
            if let Some(family) = installed_generic(&fonts.db, &generic) {
                return Ok(ResolvedFont {
                    family,
                    source: FontSource::PdfCore,
                });
            }
        }

        if self.strict {
            return Err(RenderError::FontUnavailable(wanted.to_string()));
        }

        // usvg silently drops text whose family has no installed face
        let family = self
            .default_family
            .as_deref()
            .filter(|name| has_family(&fonts.db, name))
            .map(str::to_string)
            .or_else(|| installed_generic(&fonts.db, &Family::SansSerif))
            .ok_or_else(|| RenderError::FontUnavailable(wanted.to_string()))?;
        tracing::warn!(requested = %wanted, fallback = %family, "Font not found, using fallback");
        Ok(ResolvedFont {
            family,
            source: FontSource::Fallback,
        })
    }
}

fn load_fonts_dir(db: &mut Database, dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot read fonts directory");
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(ext.as_deref(), Some("ttf" | "otf" | "ttc" | "otc")) {
            continue;
        }
        match std::fs::read(&path) {
            Ok(data) => {
                tracing::trace!(font = %path.display(), "Loading font from filesystem");
                for id in db.load_font_source(Source::Binary(Arc::new(data))) {
                    if let Some(face) = db.face(id) {
                        names.extend(face.families.iter().map(|(name, _)| name.clone()));
                    }
                }
            }
            Err(e) => tracing::warn!(font = %path.display(), error = %e, "Cannot read font"),
        }
    }
    names
}

fn assign_generic_families(db: &mut Database) {
    let first_installed = |db: &Database, candidates: &[&str]| {
        candidates
            .iter()
            .find(|name| has_family(db, name))
            .map(|name| name.to_string())
    };

    // Without a known sans face, the first loaded family stands in
    let sans = first_installed(db, SANS_CANDIDATES).or_else(|| {
        db.faces()
            .find_map(|face| face.families.first().map(|(n, _)| n.clone()))
    });
    if let Some(name) = sans {
        db.set_sans_serif_family(name);
    }
    let serif = first_installed(db, SERIF_CANDIDATES);
    if let Some(name) = serif {
        db.set_serif_family(name);
    }
    let mono = first_installed(db, MONO_CANDIDATES);
    if let Some(name) = mono {
        db.set_monospace_family(name);
    }
}

fn has_family(db: &Database, name: &str) -> bool {
    db.faces().any(|face| {
        face.families
            .iter()
            .any(|(family, _)| family.eq_ignore_ascii_case(name))
    })
}

/// The generic family's configured name, if a face for it is installed.
fn installed_generic(db: &Database, generic: &Family) -> Option<String> {
    let name = db.family_name(generic);
    has_family(db, name).then(|| name.to_string())
}

fn core_alias(key: &str) -> Option<Family<'static>> {
    if key == "sans-serif" || key.starts_with("helvetica") || key.starts_with("arial") {
        Some(Family::SansSerif)
    } else if key == "serif" || key.starts_with("times") {
        Some(Family::Serif)
    } else if key == "monospace" || key.starts_with("courier") {
        Some(Family::Monospace)
    } else {
        None
    }
}

/// Decode a `data:` URL into TrueType/OpenType bytes.
fn decode_font(font: &CustomFont) -> Result<Vec<u8>, ValidationError> {
    let invalid = |reason: &str| {
        ValidationError::new(format!("custom font '{}': {reason}", font.family))
    };

    let rest = font
        .data_url
        .strip_prefix("data:")
        .ok_or_else(|| invalid("expected a data: URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("data: URL has no payload"))?;

    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(font.mime.as_str())
        .to_ascii_lowercase();
    if mime.contains("woff") || font.mime.to_ascii_lowercase().contains("woff") {
        return Err(invalid("WOFF/WOFF2 is not supported, use TTF or OTF"));
    }

    let data = if header.ends_with(";base64") {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| invalid(&format!("invalid base64 ({e})")))?
    } else {
        percent_encoding::percent_decode_str(payload).collect()
    };

    match data.get(..4) {
        Some(b"wOFF") | Some(b"wOF2") => Err(invalid("WOFF/WOFF2 is not supported, use TTF or OTF")),
        Some([0x00, 0x01, 0x00, 0x00]) | Some(b"OTTO") | Some(b"true") | Some(b"ttcf") => Ok(data),
        _ => Err(invalid("payload is not a TrueType/OpenType font")),
    }
}
