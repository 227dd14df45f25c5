//! RFox TeX
//!
//! Renders LaTeX math markup into bitmap snapshots. Typesetting is delegated
//! to a typesetting engine (KaTeX by default), the resulting fragment is
//! composed into an HTML template, and the document is laid out by an
//! embedded rendering surface which is measured, resized to fit and captured.
//!
//! # Features
//!
//! - **katex** (default): KaTeX typesetter running in an embedded JS engine
//! - **cdp**: headless Chrome rendering surface over the DevTools Protocol
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(all(feature = "katex", feature = "cdp"))]
//! # async fn run() -> rftex::Result<()> {
//! use std::sync::Arc;
//! use rftex::{Coordinator, KatexTypesetter, SurfaceConfig};
//!
//! rftex::template::init(rftex::template::TemplateSource::Bundled)?;
//! let surface = rftex::cdp::CdpSurface::launch().await?;
//! let coordinator = Coordinator::builder(Arc::new(KatexTypesetter), Arc::new(surface))
//!     .surface_config(SurfaceConfig::default())
//!     .on_snapshot(|image| println!("got image: {}", image.is_some()))
//!     .spawn()?;
//! coordinator.set_markup("a+b")?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub mod error;
pub use error::{Error, ParseError, Result};

pub mod template;
pub use template::Template;

pub mod typeset;
pub use typeset::{TypesetOptions, Typesetter};
#[cfg(feature = "katex")]
pub use typeset::KatexTypesetter;

pub mod html;
pub use html::HtmlBuilder;

pub mod snapshot;
pub use snapshot::Snapshot;

pub mod surface;
pub use surface::{RenderSurface, SurfaceAdapter, SurfaceOutput};

pub mod coordinator;
pub use coordinator::{Coordinator, CoordinatorBuilder, RenderRequest, RenderResult, RenderStatus, StatusUpdate};

// Headless Chrome surface (feature-gated)
#[cfg(feature = "cdp")]
pub mod cdp;

/// Style text applied to rendered formulas when the caller supplies none.
pub const DEFAULT_CUSTOM_CSS: &str = ".katex { color: #212121; font-size: 16px; }";

/// Options for a render request
///
/// A request captures its options by value; changing options on a
/// coordinator replaces them wholesale and starts a new request.
///
/// # Examples
///
/// ```
/// let opts = rftex::RenderOptions::default();
/// assert!(!opts.display_mode);
/// assert!(opts.macros.is_empty());
/// assert_eq!(opts.max_width, 0.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderOptions {
    /// Typeset in display (block) mode instead of inline mode
    pub display_mode: bool,
    /// Macro substitution table, name to expansion
    pub macros: BTreeMap<String, String>,
    /// Style text substituted into the template
    pub custom_css: String,
    /// Width hint handed to the surface before layout; 0 means unconstrained
    pub max_width: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            display_mode: false,
            macros: BTreeMap::new(),
            custom_css: DEFAULT_CUSTOM_CSS.to_string(),
            max_width: 0.0,
        }
    }
}

impl RenderOptions {
    /// Add (or replace) a macro definition
    pub fn with_macro(mut self, name: impl Into<String>, expansion: impl Into<String>) -> Self {
        self.macros.insert(name.into(), expansion.into());
        self
    }

    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(format!("Malformed render options: {}", e)))
    }

    /// Read options from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// The width hint as handed to the surface: negative or non-finite
    /// values are treated as unconstrained.
    pub fn width_hint(&self) -> f64 {
        if self.max_width.is_finite() && self.max_width > 0.0 {
            self.max_width
        } else {
            0.0
        }
    }

    /// The subset of options the typesetting engine sees
    pub fn typeset_options(&self) -> TypesetOptions {
        TypesetOptions {
            display_mode: self.display_mode,
            macros: self.macros.clone(),
        }
    }
}

/// Options used when none are provided.
pub fn default_options() -> RenderOptions {
    RenderOptions::default()
}

/// Surface dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Result of evaluating a script inside the loaded document
///
/// `value` is the JSON-serialized result of the evaluation. `is_error`
/// indicates whether the script threw an exception.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    /// Serialized result value
    pub value: String,
    /// Whether the script threw an error
    pub is_error: bool,
}

/// Configuration for the surface pipeline
///
/// The defaults bound each surface step to ten seconds and capture a
/// snapshot once the surface has been resized to fit its content.
///
/// # Examples
///
/// ```
/// let cfg = rftex::SurfaceConfig::default();
/// assert!(cfg.capture_snapshot);
/// assert_eq!(cfg.height_padding, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    /// Timeout for each of load, measurement, resize and snapshot in
    /// milliseconds (0 => disabled)
    pub step_timeout_ms: u64,
    /// Whether to capture a snapshot after resizing
    pub capture_snapshot: bool,
    /// Extra height added to the measured content height
    pub height_padding: f64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 10_000,
            capture_snapshot: true,
            height_padding: 1.0,
        }
    }
}
