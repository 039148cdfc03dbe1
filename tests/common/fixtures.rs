//! Test fixtures and constants.

use serde_json::{json, Value};

/// Shared secret configured for the test app
pub const API_KEY: &str = "test-key";

/// Key the ticket template is stored under
pub const TEMPLATE_KEY: &str = "t.svg";

/// A 146 x 66 mm ticket with one user unit per millimetre
pub const TICKET_SVG: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="146mm" height="66mm" viewBox="0 0 146 66">
  <rect x="0" y="0" width="146" height="66" fill="#ffffff"/>
  <rect x="4" y="4" width="138" height="58" fill="none" stroke="#1a1a1a" stroke-width="0.5"/>
  <text x="10" y="20" font-family="sans-serif" font-size="8">ADMIT ONE</text>
</svg>
"##;

/// Key the badge overlay is stored under
pub const BADGE_KEY: &str = "overlays/badge.svg";

/// A 20 x 10 mm badge drawn as an SVG overlay
pub const BADGE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="20mm" height="10mm" viewBox="0 0 20 10">
  <rect width="20" height="10" rx="2" fill="#c0392b"/>
</svg>
"##;

/// A 1 x 1 PNG as a data URL
pub const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

/// Ticket job with an SVG badge and an inline image overlay
pub fn job_with_overlays(job_id: &str, count: u32) -> Value {
    let mut body = job(job_id, count);
    body["overlays"] = json!([
        {
            "type": "svg",
            "svg_s3_key": BADGE_KEY,
            "x_mm": 110, "y_mm": 8, "scale": 1.2, "rotation_deg": 15
        },
        {
            "data_url": PIXEL_PNG,
            "mime": "image/png",
            "x_mm": 8, "y_mm": 40, "w_mm": 16, "h_mm": 16
        }
    ]);
    body
}

/// Job for the ticket template, as used by the end-to-end scenario
pub fn job(job_id: &str, count: u32) -> Value {
    json!({
        "job_id": job_id,
        "svg_s3_key": TEMPLATE_KEY,
        "object_mm": { "x": 0, "y": 0, "w": 146, "h": 66 },
        "series": {
            "start": "A0001",
            "count": count,
            "font": "Helvetica",
            "font_size_mm": 4,
            "x_ratio": 0.72,
            "y_ratio": 0.61
        }
    })
}

/// Same as [`job`], serialized
pub fn job_json(job_id: &str, count: u32) -> String {
    job(job_id, count).to_string()
}
