//! Headless Chrome rendering surface over the Chrome DevTools Protocol
//!
//! `headless_chrome` is synchronous, so the browser and its tab live on a
//! dedicated worker thread. Async callers send commands over a channel and
//! await the reply on a oneshot.

use crate::surface::RenderSurface;
use crate::{Error, Result, ScriptResult, Size, Snapshot};
use async_trait::async_trait;
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Resize(Size, oneshot::Sender<Result<()>>),
    LoadHtml(String, oneshot::Sender<Result<()>>),
    Eval(String, oneshot::Sender<Result<ScriptResult>>),
    Snapshot(oneshot::Sender<Result<Snapshot>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Browser window used for layout before any width hint applies
#[derive(Debug, Clone, Copy)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

// Owned by the worker thread.
struct CdpPage {
    _browser: Browser,
    tab: Arc<Tab>,
    size: Size,
    loaded: bool,
}

impl CdpPage {
    fn launch(window: WindowSize) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((window.width, window.height)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        Ok(Self {
            _browser: browser,
            tab,
            size: Size::default(),
            loaded: false,
        })
    }

    fn resize(&mut self, size: Size) -> Result<()> {
        self.size = size;
        if self.loaded {
            self.apply_width()?;
        }
        Ok(())
    }

    // The width hint constrains the root element; 0 leaves layout to the window.
    fn apply_width(&self) -> Result<()> {
        let width = if self.size.width > 0.0 {
            format!("'{}px'", self.size.width)
        } else {
            "''".to_string()
        };
        self.tab
            .evaluate(&format!("document.documentElement.style.width = {}", width), false)
            .map_err(|e| Error::RenderError(format!("Failed to resize surface: {}", e)))?;
        Ok(())
    }

    fn load_html(&mut self, html: &str) -> Result<()> {
        self.loaded = false;
        let url = format!(
            "data:text/html;charset=utf-8;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(html)
        );

        self.tab
            .navigate_to(&url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        self.loaded = true;
        self.apply_width()
            .map_err(|e| Error::LoadError(e.to_string()))
    }

    fn evaluate(&self, script: &str) -> Result<ScriptResult> {
        let result = self
            .tab
            .evaluate(&guard_script(script), false)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;

        decode_guarded(result.value)
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let clip = if self.size.width > 0.0 && self.size.height > 0.0 {
            Some(Page::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.size.width,
                height: self.size.height,
                scale: 1.0,
            })
        } else {
            None
        };

        let png_data = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, clip, true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?;

        Ok(Snapshot::new(self.size.width, self.size.height, png_data))
    }
}

// Wraps an expression so exceptions come back as data instead of a
// CDP-level failure with no message.
fn guard_script(expr: &str) -> String {
    format!(
        "(() => {{ try {{ return JSON.stringify({{result: ({})}}); }} catch (e) {{ return JSON.stringify({{error: String(e)}}); }} }})()",
        expr
    )
}

fn decode_guarded(value: Option<serde_json::Value>) -> Result<ScriptResult> {
    let raw = value.ok_or_else(|| Error::ScriptError("No value returned from evaluation".into()))?;
    let parsed = match raw.as_str() {
        Some(s) => serde_json::from_str::<serde_json::Value>(s).unwrap_or_else(|_| raw.clone()),
        None => raw,
    };

    if let Some(err) = parsed.get("error") {
        let value = match err.as_str() {
            Some(msg) => msg.to_string(),
            None => err.to_string(),
        };
        return Ok(ScriptResult { value, is_error: true });
    }

    let value = match parsed.get("result") {
        Some(v) => v.to_string(),
        // `undefined` results are dropped by JSON.stringify
        None => "null".to_string(),
    };
    Ok(ScriptResult { value, is_error: false })
}

/// Rendering surface backed by a headless Chrome tab
#[derive(Clone)]
pub struct CdpSurface {
    cmd_tx: Sender<Command>,
}

impl CdpSurface {
    /// Launch headless Chrome with the default window size
    pub async fn launch() -> Result<Self> {
        Self::launch_with(WindowSize::default()).await
    }

    /// Launch headless Chrome (spawns a background thread that owns the browser).
    pub async fn launch_with(window: WindowSize) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let mut page = match CdpPage::launch(window) {
                Ok(p) => p,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Resize(size, resp) => {
                        let _ = resp.send(page.resize(size));
                    }
                    Command::LoadHtml(html, resp) => {
                        let _ = resp.send(page.load_html(&html));
                    }
                    Command::Eval(script, resp) => {
                        let _ = resp.send(page.evaluate(&script));
                    }
                    Command::Snapshot(resp) => {
                        let _ = resp.send(page.snapshot());
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(Ok(()));
                        break;
                    }
                }
            }
            debug!("cdp surface worker exiting");
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx })
    }

    /// Shut down the worker thread and the browser.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_err() {
            warn!("cdp surface worker already gone");
            return Ok(());
        }
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }

    async fn request<T>(&self, name: &str, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| Error::CdpError(format!("{} failed: surface worker stopped", name)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", name, e)))?
    }
}

#[async_trait]
impl RenderSurface for CdpSurface {
    async fn resize(&self, size: Size) -> Result<()> {
        self.request("Resize", |tx| Command::Resize(size, tx)).await
    }

    async fn load_html(&self, html: &str) -> Result<()> {
        let html = html.to_string();
        self.request("Load", move |tx| Command::LoadHtml(html, tx)).await
    }

    async fn evaluate(&self, script: &str) -> Result<ScriptResult> {
        let script = script.to_string();
        self.request("Eval", move |tx| Command::Eval(script, tx)).await
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        self.request("Snapshot", Command::Snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_result_is_unwrapped() {
        let res = decode_guarded(Some(serde_json::json!("{\"result\":[120.5,21]}"))).unwrap();
        assert!(!res.is_error);
        assert_eq!(res.value, "[120.5,21]");
    }

    #[test]
    fn guarded_exception_carries_its_message() {
        let raw = serde_json::json!("{\"error\":\"TypeError: Cannot read properties of null (reading 'getBoundingClientRect')\"}");
        let res = decode_guarded(Some(raw)).unwrap();
        assert!(res.is_error);
        assert!(res.value.starts_with("TypeError: Cannot read properties of null"));

        let err = crate::surface::parse_measurement(&res).unwrap_err();
        assert!(err.to_string().contains("TypeError"));
    }

    #[test]
    fn guarded_undefined_is_null() {
        let res = decode_guarded(Some(serde_json::json!("{}"))).unwrap();
        assert_eq!(res.value, "null");
        assert!(decode_guarded(None).is_err());
    }

    #[test]
    fn guard_wraps_expression() {
        let wrapped = guard_script("[1, 2]");
        assert!(wrapped.contains("try { return JSON.stringify({result: ([1, 2])}); }"));
        assert!(wrapped.contains("catch (e)"));
    }

    #[tokio::test]
    async fn test_cdp_surface_launch() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let surface = match CdpSurface::launch().await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Skipping CDP surface test because Chrome is not available or failed to launch: {}", e);
                return;
            }
        };
        surface.close().await.unwrap();
    }
}
