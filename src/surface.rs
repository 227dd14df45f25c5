//! Rendering surface contract and the load/measure/resize/capture sequence
//!
//! A [`RenderSurface`] is the embedded component that lays out HTML. Its
//! primitives are asynchronous and resolve when the underlying component
//! reports back. [`SurfaceAdapter`] drives them in order for one document.

use crate::{Error, Result, ScriptResult, Size, Snapshot, SurfaceConfig};
use async_trait::async_trait;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Probe evaluated in the loaded document. Returns `[width, height]`: the
/// scroll width when the body overflows, otherwise the width of the `#tex`
/// element, and the full height of the root element.
pub const MEASUREMENT_PROBE: &str = r#"[document.body.scrollWidth > document.body.clientWidth ? document.body.scrollWidth : document.getElementById('tex').getBoundingClientRect().width,
 document.getElementsByTagName('html')[0].getBoundingClientRect().height]"#;

/// Primitive operations of an embedded rendering surface
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Resize the surface
    async fn resize(&self, size: Size) -> Result<()>;

    /// Begin loading `html`; resolves once the surface signals load-finished
    async fn load_html(&self, html: &str) -> Result<()>;

    /// Evaluate an expression inside the loaded document. A thrown exception
    /// comes back as a result with `is_error` set.
    async fn evaluate(&self, script: &str) -> Result<ScriptResult>;

    /// Capture the surface at its current size
    async fn snapshot(&self) -> Result<Snapshot>;
}

/// What a completed surface load produced
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOutput {
    /// Size reported by the measurement probe
    pub content_size: Size,
    /// Size the surface was resized to (content plus height padding)
    pub surface_size: Size,
    /// Captured bitmap; `None` when capture is disabled
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Load,
    Measure,
    Resize,
    Capture,
}

impl Step {
    fn name(self) -> &'static str {
        match self {
            Step::Load => "load",
            Step::Measure => "measure",
            Step::Resize => "resize",
            Step::Capture => "snapshot",
        }
    }

    // Keep each failure in the variant for its step.
    fn classify(self, err: Error) -> Error {
        match (self, err) {
            (_, e @ Error::Timeout(_)) => e,
            (Step::Load, e @ Error::LoadError(_)) => e,
            (Step::Measure, e @ Error::ScriptError(_)) => e,
            (Step::Resize | Step::Capture, e @ Error::RenderError(_)) => e,
            (Step::Load, e) => Error::LoadError(e.to_string()),
            (Step::Measure, e) => Error::ScriptError(e.to_string()),
            (Step::Resize | Step::Capture, e) => Error::RenderError(e.to_string()),
        }
    }
}

/// Drives one rendering surface through a full render.
///
/// The adapter holds no per-request state. A surface must only be driven by
/// one load at a time: the owner cancels a load (by dropping its future)
/// before starting the next one.
#[derive(Clone)]
pub struct SurfaceAdapter {
    surface: Arc<dyn RenderSurface>,
    config: SurfaceConfig,
}

impl SurfaceAdapter {
    pub fn new(surface: Arc<dyn RenderSurface>, config: SurfaceConfig) -> Self {
        Self { surface, config }
    }

    /// Load `html` at `width_hint`, measure the content, fit the surface to
    /// it and capture a snapshot.
    pub async fn load(&self, html: &str, width_hint: f64) -> Result<SurfaceOutput> {
        self.step(Step::Load, self.surface.resize(Size::new(width_hint, 1.0))).await?;
        self.step(Step::Load, self.surface.load_html(html)).await?;

        let probe = self.step(Step::Measure, self.surface.evaluate(MEASUREMENT_PROBE)).await?;
        let content_size = parse_measurement(&probe)?;
        debug!("measured content {}x{}", content_size.width, content_size.height);

        let surface_size = Size::new(content_size.width, content_size.height + self.config.height_padding);
        self.step(Step::Resize, self.surface.resize(surface_size)).await?;

        let snapshot = if self.config.capture_snapshot {
            Some(self.step(Step::Capture, self.surface.snapshot()).await?)
        } else {
            None
        };

        Ok(SurfaceOutput {
            content_size,
            surface_size,
            snapshot,
        })
    }

    async fn step<T, F>(&self, step: Step, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let res = if self.config.step_timeout_ms == 0 {
            fut.await
        } else {
            match tokio::time::timeout(Duration::from_millis(self.config.step_timeout_ms), fut).await {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(self.config.step_timeout_ms)),
            }
        };
        res.map_err(|e| {
            let e = step.classify(e);
            warn!("surface {} step failed: {}", step.name(), e);
            e
        })
    }
}

/// Interpret the probe result as `[width, height]`
pub fn parse_measurement(result: &ScriptResult) -> Result<Size> {
    if result.is_error {
        return Err(Error::ScriptError(format!("Measurement probe threw: {}", result.value)));
    }
    let values: Vec<f64> = serde_json::from_str(&result.value)
        .map_err(|e| Error::ScriptError(format!("Unexpected measurement result {}: {}", result.value, e)))?;
    match values.as_slice() {
        [w, h] if w.is_finite() && h.is_finite() && *w >= 0.0 && *h >= 0.0 => Ok(Size::new(*w, *h)),
        _ => Err(Error::ScriptError(format!("Unexpected measurement result {}", result.value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(value: &str, is_error: bool) -> ScriptResult {
        ScriptResult {
            value: value.to_string(),
            is_error,
        }
    }

    #[test]
    fn parses_width_and_height() {
        assert_eq!(parse_measurement(&probe("[120.5,21]", false)).unwrap(), Size::new(120.5, 21.0));
    }

    #[test]
    fn rejects_malformed_measurements() {
        for bad in ["null", "[1]", "[1,2,3]", "{\"w\":1}", "[\"a\",1]", "[-1,2]"] {
            let err = parse_measurement(&probe(bad, false)).unwrap_err();
            assert!(matches!(err, Error::ScriptError(_)), "{} gave {:?}", bad, err);
        }
        let err = parse_measurement(&probe("TypeError: null", true)).unwrap_err();
        assert!(matches!(err, Error::ScriptError(_)));
    }

    #[test]
    fn step_errors_are_classified() {
        assert!(matches!(Step::Load.classify(Error::Other("x".into())), Error::LoadError(_)));
        assert!(matches!(Step::Measure.classify(Error::LoadError("x".into())), Error::ScriptError(_)));
        assert!(matches!(Step::Capture.classify(Error::Other("x".into())), Error::RenderError(_)));
        assert!(matches!(Step::Capture.classify(Error::Timeout(5)), Error::Timeout(5)));
    }
}
