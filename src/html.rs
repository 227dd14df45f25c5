//! Template renderer: typeset markup and compose it into the HTML template

use crate::template::{self, Template};
use crate::typeset::Typesetter;
use crate::{ParseError, RenderOptions, Result};
use std::sync::Arc;

/// Composes typeset markup into a full HTML document.
///
/// Building is side-effect free: a failed build leaves nothing behind and
/// identical inputs give byte-identical output.
#[derive(Clone)]
pub struct HtmlBuilder {
    template: Arc<Template>,
    typesetter: Arc<dyn Typesetter>,
}

impl HtmlBuilder {
    pub fn new(template: Arc<Template>, typesetter: Arc<dyn Typesetter>) -> Self {
        Self { template, typesetter }
    }

    /// Builder over the process-wide template. Fails with a configuration
    /// error when the template has not been initialized.
    pub fn shared(typesetter: Arc<dyn Typesetter>) -> Result<Self> {
        Ok(Self::new(template::shared()?, typesetter))
    }

    /// Typeset `markup` and substitute the fragment and the custom style
    /// text into the template.
    pub fn build_html(&self, markup: &str, options: &RenderOptions) -> std::result::Result<String, ParseError> {
        let fragment = self.typesetter.render(markup, &options.typeset_options())?;
        Ok(self.template.render(&options.custom_css, &fragment))
    }
}

impl std::fmt::Debug for HtmlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlBuilder").field("template", &self.template).finish_non_exhaustive()
    }
}
