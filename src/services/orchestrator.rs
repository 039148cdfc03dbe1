use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

use super::font_registry::{FontRegistry, ResolvedFont};
use super::stamper::{OverlaySources, TemplateStamper, STAMP_ELEMENT_ID};
use super::storage::ObjectStore;
use crate::error::{JobError, RenderError};
use crate::models::{LimitsConfig, Overlay, RenderJob, SerialSeries};
use crate::rendering::{merge_pages, page_count, PdfRenderer, SvgPdfRenderer, SvgRenderer};

/// Object-store prefix for finished documents
pub const FINAL_PREFIX: &str = "documents/final";

/// One stamped copy as a single-page PDF.
#[derive(Debug, Clone)]
pub struct RenderedCopy {
    pub serial: String,
    pub pdf: Vec<u8>,
}

/// All copies of a job, merged into one PDF with one page per copy.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub job_id: String,
    pub copies: Vec<RenderedCopy>,
    pub pdf: Vec<u8>,
    pub template_id: String,
    pub metrics: EngineMetrics,
}

impl RenderResult {
    pub fn pages(&self) -> usize {
        self.copies.len()
    }

    pub fn serials(&self) -> Vec<String> {
        self.copies.iter().map(|c| c.serial.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SizeMm {
    pub width: f64,
    pub height: f64,
}

/// Layout and timing details reported with every job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineMetrics {
    pub document_mm: SizeMm,
    /// User units per millimetre along x and y
    pub units_per_mm: Point,
    pub anchor_mm: Point,
    pub anchor_user: Point,
    pub font: ResolvedFont,
    pub copies: u32,
    pub render_ms: u64,
}

/// Drives a job through validation, template fetch, stamping, rendering and
/// packaging.
pub struct JobOrchestrator {
    store: Arc<dyn ObjectStore>,
    fonts: Arc<FontRegistry>,
    limits: LimitsConfig,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, fonts: Arc<FontRegistry>, limits: LimitsConfig) -> Self {
        Self {
            store,
            fonts,
            limits,
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Render every copy of the job.
    pub async fn handle(&self, job: RenderJob) -> Result<RenderResult, JobError> {
        job.validate(self.limits.max_series_count)?;
        tracing::info!(
            job_id = %job.job_id,
            template = %job.svg_s3_key,
            count = job.series.count,
            "Render job started"
        );

        let template = self.store.get(&job.svg_s3_key).await?;
        let overlays = self.fetch_overlays(&job).await?;
        let fonts = self.fonts.clone();
        let job_id = job.job_id.clone();
        let result = self
            .run_blocking(&job_id, move |cancel| {
                render_document(&template, &job, &overlays, &fonts, cancel)
            })
            .await?;

        tracing::info!(
            job_id = %result.job_id,
            pages = result.pages(),
            bytes = result.pdf.len(),
            render_ms = result.metrics.render_ms,
            font = %result.metrics.font.family,
            "Render job finished"
        );
        Ok(result)
    }

    /// Render the job and store the merged PDF under `documents/final/`.
    ///
    /// Returns the result together with the key it was stored under.
    pub async fn handle_and_store(
        &self,
        job: RenderJob,
    ) -> Result<(RenderResult, String), JobError> {
        let result = self.handle(job).await?;
        let key = format!("{FINAL_PREFIX}/{}.pdf", result.job_id);
        let key = self
            .store
            .put(&key, result.pdf.clone(), "application/pdf")
            .await?;
        tracing::info!(job_id = %result.job_id, key = %key, "Stored rendered document");
        Ok((result, key))
    }

    /// PNG preview of the first copy.
    pub async fn preview(&self, job: RenderJob, dpi: f32) -> Result<Vec<u8>, JobError> {
        job.validate(self.limits.max_series_count)?;
        let template = self.store.get(&job.svg_s3_key).await?;
        let overlays = self.fetch_overlays(&job).await?;
        let fonts = self.fonts.clone();
        let job_id = job.job_id.clone();
        self.run_blocking(&job_id, move |_| {
            render_preview(&template, &job, &overlays, &fonts, dpi)
        })
        .await
    }

    /// Fetch the source of every distinct SVG overlay key.
    async fn fetch_overlays(&self, job: &RenderJob) -> Result<OverlaySources, JobError> {
        let mut sources = OverlaySources::new();
        for overlay in &job.overlays {
            if let Overlay::Svg(svg) = overlay {
                if !sources.contains_key(&svg.svg_s3_key) {
                    let data = self.store.get(&svg.svg_s3_key).await?;
                    tracing::debug!(key = %svg.svg_s3_key, bytes = data.len(), "Fetched overlay");
                    sources.insert(svg.svg_s3_key.clone(), data);
                }
            }
        }
        Ok(sources)
    }

    /// Run CPU-bound work off the async runtime, bounded by the render timeout.
    ///
    /// On timeout the worker is told to stop at the next copy boundary.
    async fn run_blocking<T, F>(&self, job_id: &str, work: F) -> Result<T, JobError>
    where
        T: Send + 'static,
        F: FnOnce(&AtomicBool) -> Result<T, JobError> + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let task = tokio::task::spawn_blocking(move || work(&flag));

        let timeout = self.limits.render_timeout;
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(|e| RenderError::Task(e.to_string()))?,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!(job_id, timeout_secs = timeout.as_secs(), "Render timed out");
                Err(RenderError::Timeout(timeout.as_secs()).into())
            }
        }
    }
}

/// Stamp and render every serial of the job, then merge the copies.
///
/// `cancel` is polled between copies.
/// `overlays` holds the sources of the job's SVG overlays.
pub fn render_document(
    template: &[u8],
    job: &RenderJob,
    overlays: &OverlaySources,
    fonts: &FontRegistry,
    cancel: &AtomicBool,
) -> Result<RenderResult, JobError> {
    let started = Instant::now();

    let job_fonts = fonts.prepare_job_fonts(&job.custom_fonts)?;
    let font = fonts.resolve(&job_fonts, &job.series.font)?;
    let stamper = TemplateStamper::new(template, &job.object_mm, &job.series, &font.family)?
        .with_overlays(&job.overlays, overlays)?;
    let series = SerialSeries::new(&job.series.start, job.series.count)?;
    let renderer = SvgPdfRenderer::new(job_fonts.db.clone()).require_text(STAMP_ELEMENT_ID);

    let copies = render_copies(&stamper, &series, &renderer, cancel)?;
    let pdf = merge_pages(&copies.iter().map(|c| c.pdf.as_slice()).collect::<Vec<_>>())?;

    let pages = page_count(&pdf)?;
    if pages != copies.len() {
        return Err(RenderError::Pdf(format!(
            "merged document has {pages} pages, expected {}",
            copies.len()
        ))
        .into());
    }

    let geometry = *stamper.geometry();
    let (ax, ay) = stamper.anchor_mm();
    let (ux, uy) = stamper.anchor_user();
    let metrics = EngineMetrics {
        document_mm: SizeMm {
            width: geometry.width_mm,
            height: geometry.height_mm,
        },
        units_per_mm: Point {
            x: geometry.units_per_mm_x,
            y: geometry.units_per_mm_y,
        },
        anchor_mm: Point { x: ax, y: ay },
        anchor_user: Point { x: ux, y: uy },
        font,
        copies: job.series.count,
        render_ms: started.elapsed().as_millis() as u64,
    };

    Ok(RenderResult {
        job_id: job.job_id.clone(),
        template_id: compute_template_id(template, job, overlays),
        copies,
        pdf,
        metrics,
    })
}

/// Stamp each serial onto the template and render it to its own PDF.
pub fn render_copies(
    stamper: &TemplateStamper<'_>,
    series: &SerialSeries,
    renderer: &dyn PdfRenderer,
    cancel: &AtomicBool,
) -> Result<Vec<RenderedCopy>, RenderError> {
    let mut copies = Vec::with_capacity(series.len());
    for serial in series.iter() {
        if cancel.load(Ordering::Relaxed) {
            return Err(RenderError::Task("cancelled".to_string()));
        }
        let svg = stamper.stamp(&serial);
        let pdf = renderer.render(&svg)?;
        tracing::trace!(serial = %serial, bytes = pdf.len(), "Rendered copy");
        copies.push(RenderedCopy { serial, pdf });
    }
    Ok(copies)
}

/// PNG of the first copy at `dpi`.
pub fn render_preview(
    template: &[u8],
    job: &RenderJob,
    overlays: &OverlaySources,
    fonts: &FontRegistry,
    dpi: f32,
) -> Result<Vec<u8>, JobError> {
    let job_fonts = fonts.prepare_job_fonts(&job.custom_fonts)?;
    let font = fonts.resolve(&job_fonts, &job.series.font)?;
    let stamper = TemplateStamper::new(template, &job.object_mm, &job.series, &font.family)?
        .with_overlays(&job.overlays, overlays)?;
    let series = SerialSeries::new(&job.series.start, job.series.count)?;
    let first = series.code(0).unwrap_or_default();

    let png = SvgRenderer::new(job_fonts.db.clone())
        .require_text(STAMP_ELEMENT_ID)
        .render_png(&stamper.stamp(&first), dpi)?;
    Ok(png)
}

/// Stable identifier of a template and its layout parameters.
///
/// Overlay content enters by digest, so SVG overlays count by what was
/// fetched rather than by key.
pub fn compute_template_id(template: &[u8], job: &RenderJob, overlays: &OverlaySources) -> String {
    let mut families: Vec<&str> = job.custom_fonts.iter().map(|f| f.family.as_str()).collect();
    families.sort_unstable();

    let digest = |data: &[u8]| hex::encode(Sha256::digest(data));
    let layers: Vec<serde_json::Value> = job
        .overlays
        .iter()
        .map(|overlay| match overlay {
            Overlay::Image(image) => serde_json::json!({
                "image_hash": digest(image.href().as_bytes()),
                "x_mm": image.x_mm,
                "y_mm": image.y_mm,
                "w_mm": image.w_mm,
                "h_mm": image.h_mm,
                "rotation_deg": image.rotation_deg,
            }),
            Overlay::Svg(svg) => serde_json::json!({
                "svg_hash": overlays
                    .get(&svg.svg_s3_key)
                    .map(|data| digest(data.as_slice()))
                    .unwrap_or_default(),
                "x_mm": svg.x_mm,
                "y_mm": svg.y_mm,
                "scale": svg.scale,
                "rotation_deg": svg.rotation_deg,
            }),
        })
        .collect();

    // serde_json maps keep their keys sorted, so the text is canonical
    let canonical = serde_json::json!({
        "svg_hash": digest(template),
        "object_mm": job.object_mm,
        "series": job.series,
        "custom_fonts": families,
        "overlays": layers,
    });
    digest(canonical.to_string().as_bytes())
}
