use anyhow::{anyhow, bail, Context};
use clap::Parser;
use rftex::cdp::CdpSurface;
use rftex::template::{self, TemplateSource};
use rftex::{Coordinator, KatexTypesetter, RenderOptions, RenderResult, RenderStatus, SurfaceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Render LaTeX math markup to a PNG image using headless Chrome
#[derive(Parser, Debug)]
#[command(name = "rftex", version, about)]
struct Cli {
    /// Markup to render
    markup: String,

    /// Output PNG path
    #[arg(short, long, default_value = "formula.png")]
    output: PathBuf,

    /// JSON file with render options
    #[arg(long)]
    options: Option<PathBuf>,

    /// Typeset in display mode
    #[arg(long)]
    display_mode: bool,

    /// Macro definition NAME=EXPANSION (repeatable)
    #[arg(long = "macro", value_name = "NAME=EXPANSION")]
    macros: Vec<String>,

    /// Custom style text
    #[arg(long)]
    css: Option<String>,

    /// Width hint in CSS pixels (0 = unconstrained)
    #[arg(long)]
    max_width: Option<f64>,

    /// HTML template with CUSTOM_CSS and $LATEX$ placeholders
    #[arg(long)]
    template: Option<PathBuf>,

    /// Print the image as a `data:` URL instead of writing a file
    #[arg(long)]
    data_url: bool,

    /// Give up after this many milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
}

impl Cli {
    fn render_options(&self) -> anyhow::Result<RenderOptions> {
        let mut opts = match &self.options {
            Some(path) => RenderOptions::from_json_file(path)?,
            None => RenderOptions::default(),
        };
        if self.display_mode {
            opts.display_mode = true;
        }
        for def in &self.macros {
            let (name, expansion) = def
                .split_once('=')
                .ok_or_else(|| anyhow!("Macro definition must be NAME=EXPANSION, got {:?}", def))?;
            opts.macros.insert(name.to_string(), expansion.to_string());
        }
        if let Some(css) = &self.css {
            opts.custom_css = css.clone();
        }
        if let Some(w) = self.max_width {
            opts.max_width = w;
        }
        Ok(opts)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source = match &cli.template {
        Some(path) => TemplateSource::File(path.clone()),
        None => TemplateSource::Bundled,
    };
    template::init(source).context("Failed to initialize template")?;
    let options = cli.render_options()?;

    let surface = CdpSurface::launch().await.context("Failed to launch headless Chrome")?;

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<RenderResult>();
    let coordinator = Coordinator::builder(Arc::new(KatexTypesetter), Arc::new(surface.clone()))
        .surface_config(SurfaceConfig::default())
        .on_status_change(|status| log::info!("status: {:?}", status))
        .on_result(move |result| {
            let _ = result_tx.send(result.clone());
        })
        .spawn()?;

    coordinator.set(cli.markup.clone(), options)?;
    let status = tokio::time::timeout(Duration::from_millis(cli.timeout_ms), coordinator.wait_settled())
        .await
        .map_err(|_| anyhow!("Rendering did not finish within {}ms", cli.timeout_ms))??;

    coordinator.close().await?;
    surface.close().await?;

    match status {
        RenderStatus::Finished => {}
        RenderStatus::Error(message) => bail!("Rendering failed: {}", message),
        other => bail!("Unexpected status {:?}", other),
    }

    let result = result_rx.recv().await.context("No render result delivered")?;
    let image = result.image.context("No snapshot captured")?;
    if cli.data_url {
        println!("{}", image.to_data_url());
        return Ok(());
    }

    std::fs::write(&cli.output, &image.png_data)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    let (px_w, px_h) = image.pixel_size().unwrap_or((0, 0));
    println!(
        "Wrote {} ({}x{} content, {}x{} px, sha256 {})",
        cli.output.display(),
        result.content_size.width,
        result.content_size.height,
        px_w,
        px_h,
        image.digest()
    );
    Ok(())
}
