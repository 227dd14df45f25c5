//! HTML template resource
//!
//! The template is an HTML skeleton with two named placeholders:
//! [`CSS_PLACEHOLDER`] receives the caller's style text and
//! [`FRAGMENT_PLACEHOLDER`] receives the typeset fragment. It is parsed once
//! into literal segments so substitution never rescans inserted text.
//!
//! A process-wide copy is set up by [`init`] at subsystem start; everything
//! downstream reads it through [`shared`].

use crate::{Error, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub const CSS_PLACEHOLDER: &str = "CUSTOM_CSS";
pub const FRAGMENT_PLACEHOLDER: &str = "$LATEX$";

const BUNDLED_TEMPLATE: &str = include_str!("template.html");

static SHARED: OnceLock<Arc<Template>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Css,
    Fragment,
}

/// Where the process-wide template comes from
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// The copy compiled into the crate
    Bundled,
    /// An HTML file on disk
    File(PathBuf),
    /// Template text supplied by the host
    Inline(String),
}

/// A parsed, immutable HTML template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text. Both placeholders must appear at least once.
    pub fn parse(text: &str) -> Result<Self> {
        if !text.contains(CSS_PLACEHOLDER) {
            return Err(Error::ConfigError(format!("Template is missing the {} placeholder", CSS_PLACEHOLDER)));
        }
        if !text.contains(FRAGMENT_PLACEHOLDER) {
            return Err(Error::ConfigError(format!(
                "Template is missing the {} placeholder",
                FRAGMENT_PLACEHOLDER
            )));
        }

        let mut segments = Vec::new();
        let mut rest = text;
        loop {
            let css = rest.find(CSS_PLACEHOLDER);
            let frag = rest.find(FRAGMENT_PLACEHOLDER);
            let (pos, len, seg) = match (css, frag) {
                (Some(c), Some(f)) if c <= f => (c, CSS_PLACEHOLDER.len(), Segment::Css),
                (Some(c), None) => (c, CSS_PLACEHOLDER.len(), Segment::Css),
                (_, Some(f)) => (f, FRAGMENT_PLACEHOLDER.len(), Segment::Fragment),
                (None, None) => break,
            };
            if pos > 0 {
                segments.push(Segment::Literal(rest[..pos].to_string()));
            }
            segments.push(seg);
            rest = &rest[pos + len..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Read and parse a template file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to open template {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// The template packaged with the crate
    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_TEMPLATE)
    }

    /// Substitute style text and fragment into the placeholders
    pub fn render(&self, custom_css: &str, fragment: &str) -> String {
        let mut out = String::with_capacity(self.literal_len() + custom_css.len() + fragment.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Css => out.push_str(custom_css),
                Segment::Fragment => out.push_str(fragment),
            }
        }
        out
    }

    fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(s) => s.len(),
                _ => 0,
            })
            .sum()
    }
}

impl TemplateSource {
    fn load(&self) -> Result<Template> {
        match self {
            TemplateSource::Bundled => Template::bundled(),
            TemplateSource::File(path) => Template::load(path),
            TemplateSource::Inline(text) => Template::parse(text),
        }
    }
}

/// One-time process-wide initialization of the template.
///
/// The first successful call wins; later calls return the template that is
/// already installed without reading `source`.
pub fn init(source: TemplateSource) -> Result<Arc<Template>> {
    if let Some(existing) = SHARED.get() {
        debug!("template already initialized; ignoring {:?}", source);
        return Ok(existing.clone());
    }
    let template = source.load()?;
    info!("template initialized from {:?}", source);
    Ok(SHARED.get_or_init(|| Arc::new(template)).clone())
}

/// The process-wide template, or a configuration error if [`init`] has not
/// completed.
pub fn shared() -> Result<Arc<Template>> {
    SHARED
        .get()
        .cloned()
        .ok_or_else(|| Error::ConfigError("Template has not been initialized".into()))
}
