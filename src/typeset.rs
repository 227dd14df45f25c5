//! Typesetting engine seam
//!
//! The engine turns markup into an HTML fragment. It is pure: the same
//! markup and options always give the same fragment or the same error.

use crate::ParseError;
use std::collections::BTreeMap;

/// Options forwarded to the typesetting engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypesetOptions {
    pub display_mode: bool,
    pub macros: BTreeMap<String, String>,
}

/// Converts markup into a renderable HTML fragment
pub trait Typesetter: Send + Sync {
    fn render(&self, markup: &str, options: &TypesetOptions) -> std::result::Result<String, ParseError>;
}

impl<F> Typesetter for F
where
    F: Fn(&str, &TypesetOptions) -> std::result::Result<String, ParseError> + Send + Sync,
{
    fn render(&self, markup: &str, options: &TypesetOptions) -> std::result::Result<String, ParseError> {
        self(markup, options)
    }
}

/// Message reported when the engine fails for reasons other than the markup
pub const GENERIC_FAILURE: &str = "Can not load LaTeX formula.";

/// Split a KaTeX error string into its message and reported position.
///
/// KaTeX formats parse errors as `KaTeX parse error: <msg> at position N: <excerpt>`,
/// sometimes behind a `ParseError: ` prefix added by the JS engine.
pub fn parse_katex_error(raw: &str) -> ParseError {
    let msg = match raw.find("KaTeX parse error: ") {
        Some(i) => &raw[i + "KaTeX parse error: ".len()..],
        None => raw.trim_start_matches("ParseError: "),
    };
    let msg = msg.trim();

    let position = msg.find(" at position ").and_then(|i| {
        let digits: String = msg[i + " at position ".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse::<usize>().ok()
    });

    match position {
        Some(p) => ParseError::at(msg, p),
        None => ParseError::new(msg),
    }
}

/// KaTeX typesetter (runs the KaTeX bundle inside an embedded JS engine)
#[cfg(feature = "katex")]
#[derive(Debug, Clone, Copy, Default)]
pub struct KatexTypesetter;

#[cfg(feature = "katex")]
impl Typesetter for KatexTypesetter {
    fn render(&self, markup: &str, options: &TypesetOptions) -> std::result::Result<String, ParseError> {
        let mut opts = katex::Opts::builder()
            .display_mode(options.display_mode)
            .output_type(katex::OutputType::Html)
            .throw_on_error(true)
            .build()
            .map_err(|e| {
                log::warn!("failed to build KaTeX options: {}", e);
                ParseError::new(GENERIC_FAILURE)
            })?;
        for (name, expansion) in &options.macros {
            opts.add_macro(name.clone(), expansion.clone());
        }

        katex::render_with_opts(markup, &opts).map_err(|e| match e {
            katex::Error::JsExecError(raw) => parse_katex_error(&raw),
            other => {
                log::warn!("KaTeX engine failure: {}", other);
                ParseError::new(GENERIC_FAILURE)
            }
        })
    }
}
