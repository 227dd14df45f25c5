//! Shared test doubles: a scripted rendering surface and a stub typesetter

#![allow(dead_code)]

use async_trait::async_trait;
use rftex::template::Template;
use rftex::{
    Coordinator, Error, ParseError, RenderStatus, RenderSurface, Result, ScriptResult, Size, Snapshot,
    SurfaceConfig, TypesetOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Typesetter stub: wraps markup in a span and rejects any `\name` control
/// sequence that is not in the macro table.
pub fn stub_typesetter(markup: &str, opts: &TypesetOptions) -> std::result::Result<String, ParseError> {
    let bytes = markup.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            let name = &markup[start..i];
            if name.len() > 1 && !opts.macros.contains_key(name) {
                return Err(ParseError::at(format!("Undefined control sequence: {}", name), start));
            }
        } else {
            i += 1;
        }
    }
    let mode = if opts.display_mode { "display" } else { "inline" };
    Ok(format!("<span class=\"{}\">{}</span>", mode, markup))
}

pub fn test_template() -> Arc<Template> {
    Arc::new(Template::bundled().expect("bundled template"))
}

pub fn fake_png(w: u32, h: u32) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&w.to_be_bytes());
    data.extend_from_slice(&h.to_be_bytes());
    data.extend_from_slice(&[8, 6, 0, 0, 0]);
    data
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Load,
    Probe,
    Capture,
}

#[derive(Default)]
struct Script {
    measurement: Option<ScriptResult>,
    // Per-document probe results, keyed by a substring of the document
    measurements: Vec<(String, String)>,
    current: String,
    load_error: Option<String>,
    snapshot_error: Option<String>,
    gates: Vec<(Stage, String, oneshot::Receiver<()>)>,
    loads: Vec<String>,
    resizes: Vec<Size>,
    evaluations: usize,
    snapshots: usize,
    size: Size,
}

/// In-memory surface whose behaviour is scripted by the test
#[derive(Default)]
pub struct ScriptedSurface {
    script: Mutex<Script>,
    snapshot_taken: Notify,
}

impl ScriptedSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Probe result returned by `evaluate` (default `[120,20]`)
    pub fn set_measurement(&self, value: &str, is_error: bool) {
        self.script.lock().unwrap().measurement = Some(ScriptResult {
            value: value.to_string(),
            is_error,
        });
    }

    /// Probe result for documents containing `needle`
    pub fn measure(&self, needle: &str, value: &str) {
        self.script
            .lock()
            .unwrap()
            .measurements
            .push((needle.to_string(), value.to_string()));
    }

    pub fn fail_loads(&self, message: &str) {
        self.script.lock().unwrap().load_error = Some(message.to_string());
    }

    pub fn fail_snapshots(&self, message: &str) {
        self.script.lock().unwrap().snapshot_error = Some(message.to_string());
    }

    /// Hold back the load of any document containing `needle` until the
    /// returned sender fires (or is dropped).
    pub fn hold(&self, needle: &str) -> oneshot::Sender<()> {
        self.gate(Stage::Load, needle)
    }

    /// Hold back the measurement probe of a document containing `needle`
    pub fn hold_probe(&self, needle: &str) -> oneshot::Sender<()> {
        self.gate(Stage::Probe, needle)
    }

    /// Hold back the snapshot of a document containing `needle`
    pub fn hold_capture(&self, needle: &str) -> oneshot::Sender<()> {
        self.gate(Stage::Capture, needle)
    }

    fn gate(&self, stage: Stage, needle: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().gates.push((stage, needle.to_string(), rx));
        tx
    }

    pub fn loads(&self) -> Vec<String> {
        self.script.lock().unwrap().loads.clone()
    }

    pub fn resizes(&self) -> Vec<Size> {
        self.script.lock().unwrap().resizes.clone()
    }

    pub fn evaluations(&self) -> usize {
        self.script.lock().unwrap().evaluations
    }

    pub fn snapshots(&self) -> usize {
        self.script.lock().unwrap().snapshots
    }

    /// Wait until `cond` holds for the recorded calls
    pub async fn wait_for(&self, cond: impl Fn(&ScriptedSurface) -> bool) {
        while !cond(self) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Wait until at least `n` snapshots have been taken
    pub async fn wait_snapshots(&self, n: usize) {
        loop {
            let notified = self.snapshot_taken.notified();
            if self.snapshots() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Script {
    fn take_gate(&mut self, stage: Stage) -> Option<oneshot::Receiver<()>> {
        let current = &self.current;
        let idx = self
            .gates
            .iter()
            .position(|(s, needle, _)| *s == stage && current.contains(needle.as_str()))?;
        Some(self.gates.remove(idx).2)
    }
}

#[async_trait]
impl RenderSurface for ScriptedSurface {
    async fn resize(&self, size: Size) -> Result<()> {
        let mut s = self.script.lock().unwrap();
        s.resizes.push(size);
        s.size = size;
        Ok(())
    }

    async fn load_html(&self, html: &str) -> Result<()> {
        let gate = {
            let mut s = self.script.lock().unwrap();
            s.loads.push(html.to_string());
            s.current = html.to_string();
            if let Some(msg) = &s.load_error {
                return Err(Error::LoadError(msg.clone()));
            }
            s.take_gate(Stage::Load)
        };
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<ScriptResult> {
        let (gate, result) = {
            let mut s = self.script.lock().unwrap();
            s.evaluations += 1;
            let per_doc = s
                .measurements
                .iter()
                .find(|(needle, _)| s.current.contains(needle.as_str()))
                .map(|(_, value)| ScriptResult {
                    value: value.clone(),
                    is_error: false,
                });
            let result = per_doc.or_else(|| s.measurement.clone()).unwrap_or(ScriptResult {
                value: "[120,20]".to_string(),
                is_error: false,
            });
            (s.take_gate(Stage::Probe), result)
        };
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        Ok(result)
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let gate = self.script.lock().unwrap().take_gate(Stage::Capture);
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        let res = {
            let mut s = self.script.lock().unwrap();
            s.snapshots += 1;
            match &s.snapshot_error {
                Some(msg) => Err(Error::RenderError(msg.clone())),
                None => Ok(Snapshot::new(
                    s.size.width,
                    s.size.height,
                    fake_png(s.size.width as u32, s.size.height as u32),
                )),
            }
        };
        self.snapshot_taken.notify_waiters();
        res
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(RenderStatus),
    Image(Option<Snapshot>),
}

/// Records host callbacks in the order they fire
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<RenderStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> Vec<Option<Snapshot>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Image(i) => Some(i),
                _ => None,
            })
            .collect()
    }
}

pub fn spawn_with(surface: Arc<ScriptedSurface>, config: SurfaceConfig) -> (Coordinator, Recorder) {
    let rec = Recorder::default();
    let status_rec = rec.clone();
    let image_rec = rec.clone();
    let coordinator = Coordinator::builder(Arc::new(stub_typesetter), surface)
        .template(test_template())
        .surface_config(config)
        .on_status_change(move |s| status_rec.events.lock().unwrap().push(Event::Status(s.clone())))
        .on_snapshot(move |img| image_rec.events.lock().unwrap().push(Event::Image(img.cloned())))
        .spawn()
        .expect("spawn coordinator");
    (coordinator, rec)
}

pub fn spawn(surface: Arc<ScriptedSurface>) -> (Coordinator, Recorder) {
    spawn_with(surface, SurfaceConfig::default())
}

/// Give stray tasks a chance to run to completion
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
