//! Render coordinator
//!
//! Owns the current markup and options, turns every change into a new
//! render request and reports the outcome. All state lives on a single actor
//! task: handle calls become commands on a channel, and surface loads run as
//! separate tasks that post `(generation, outcome)` back to the actor. At most
//! one load drives the surface: starting a request aborts the previous load
//! task, so a superseded request issues no further surface calls. Only the
//! outcome for the live generation is applied; anything older is dropped.
//!
//! Status transitions and host callbacks are therefore totally ordered per
//! coordinator and never run concurrently with each other.

use crate::html::HtmlBuilder;
use crate::surface::{RenderSurface, SurfaceAdapter, SurfaceOutput};
use crate::template::{self, Template};
use crate::typeset::Typesetter;
use crate::{Error, RenderOptions, Result, Size, Snapshot, SurfaceConfig};
use log::{debug, info};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type StatusHandler = Arc<dyn Fn(&RenderStatus) + Send + Sync>;
type SnapshotHandler = Arc<dyn Fn(Option<&Snapshot>) + Send + Sync>;
type ResultHandler = Arc<dyn Fn(&RenderResult) + Send + Sync>;
type SizeHandler = Arc<dyn Fn(Size) + Send + Sync>;

/// Observable state of a coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum RenderStatus {
    Idle,
    Loading,
    Finished,
    Error(String),
}

impl RenderStatus {
    /// Finished or Error
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderStatus::Finished | RenderStatus::Error(_))
    }
}

/// Status together with the generation it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub generation: u64,
    pub status: RenderStatus,
}

/// One render of a markup/options pair
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub markup: String,
    pub options: RenderOptions,
    pub generation: u64,
}

/// Outcome of a successful render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub generation: u64,
    /// Captured bitmap, `None` when capture is disabled
    pub image: Option<Snapshot>,
    /// Size reported by the measurement probe
    pub content_size: Size,
}

enum Command {
    Set {
        markup: Option<String>,
        options: Option<RenderOptions>,
        generation: u64,
    },
    Close(oneshot::Sender<()>),
}

struct Completion {
    generation: u64,
    outcome: Result<SurfaceOutput>,
}

#[derive(Default, Clone)]
struct Callbacks {
    on_status: Option<StatusHandler>,
    on_snapshot: Option<SnapshotHandler>,
    on_result: Option<ResultHandler>,
    on_content_size: Option<SizeHandler>,
}

/// Configures and spawns a [`Coordinator`]
pub struct CoordinatorBuilder {
    typesetter: Arc<dyn Typesetter>,
    surface: Arc<dyn RenderSurface>,
    template: Option<Arc<Template>>,
    surface_config: SurfaceConfig,
    markup: String,
    options: RenderOptions,
    callbacks: Callbacks,
}

impl CoordinatorBuilder {
    /// Use this template instead of the process-wide one
    pub fn template(mut self, template: Arc<Template>) -> Self {
        self.template = Some(template);
        self
    }

    pub fn surface_config(mut self, config: SurfaceConfig) -> Self {
        self.surface_config = config;
        self
    }

    /// Markup used until the first `set_markup`
    pub fn markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = markup.into();
        self
    }

    /// Options used until the first `set_options`
    pub fn options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    /// Called on every status transition
    pub fn on_status_change<F>(mut self, cb: F) -> Self
    where
        F: Fn(&RenderStatus) + Send + Sync + 'static,
    {
        self.callbacks.on_status = Some(Arc::new(cb));
        self
    }

    /// Called once per settled request with the captured image, or `None`
    /// when the request failed or capture is disabled
    pub fn on_snapshot<F>(mut self, cb: F) -> Self
    where
        F: Fn(Option<&Snapshot>) + Send + Sync + 'static,
    {
        self.callbacks.on_snapshot = Some(Arc::new(cb));
        self
    }

    /// Called with the full result of each successful request
    pub fn on_result<F>(mut self, cb: F) -> Self
    where
        F: Fn(&RenderResult) + Send + Sync + 'static,
    {
        self.callbacks.on_result = Some(Arc::new(cb));
        self
    }

    /// Called with the fitted surface size so the containing layout can follow
    pub fn on_content_size<F>(mut self, cb: F) -> Self
    where
        F: Fn(Size) + Send + Sync + 'static,
    {
        self.callbacks.on_content_size = Some(Arc::new(cb));
        self
    }

    /// Start the coordinator actor on the current tokio runtime.
    ///
    /// Fails with a configuration error if no template was given and the
    /// process-wide template is not initialized.
    pub fn spawn(self) -> Result<Coordinator> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("Coordinator requires a tokio runtime: {}", e)))?;
        let template = match self.template {
            Some(t) => t,
            None => template::shared()?,
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusUpdate {
            generation: 0,
            status: RenderStatus::Idle,
        });

        let actor = Actor {
            request: RenderRequest {
                markup: self.markup,
                options: self.options,
                generation: 0,
            },
            html: HtmlBuilder::new(template, self.typesetter),
            adapter: SurfaceAdapter::new(self.surface, self.surface_config),
            status_tx,
            done_tx,
            in_flight: None,
            callbacks: self.callbacks,
        };
        runtime.spawn(actor.run(cmd_rx, done_rx));

        Ok(Coordinator {
            inner: Arc::new(Shared {
                sender: Mutex::new(Outbox { next_generation: 0, cmd_tx }),
                status_rx,
            }),
        })
    }
}

struct Outbox {
    next_generation: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

struct Shared {
    // Generation allocation and send happen under one lock so requests reach
    // the actor in generation order.
    sender: Mutex<Outbox>,
    status_rx: watch::Receiver<StatusUpdate>,
}

/// Handle to a running render coordinator
///
/// Cheap to clone; all clones drive the same actor. The actor stops when
/// every handle is dropped or [`Coordinator::close`] is called.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Shared>,
}

impl Coordinator {
    pub fn builder(typesetter: Arc<dyn Typesetter>, surface: Arc<dyn RenderSurface>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            typesetter,
            surface,
            template: None,
            surface_config: SurfaceConfig::default(),
            markup: String::new(),
            options: RenderOptions::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Replace the markup and start a new request. Returns its generation.
    pub fn set_markup(&self, markup: impl Into<String>) -> Result<u64> {
        self.submit(Some(markup.into()), None)
    }

    /// Replace the options and start a new request. Returns its generation.
    pub fn set_options(&self, options: RenderOptions) -> Result<u64> {
        self.submit(None, Some(options))
    }

    /// Replace markup and options together as a single request
    pub fn set(&self, markup: impl Into<String>, options: RenderOptions) -> Result<u64> {
        self.submit(Some(markup.into()), Some(options))
    }

    /// Render the current markup and options again as a new request
    pub fn reload(&self) -> Result<u64> {
        self.submit(None, None)
    }

    fn submit(&self, markup: Option<String>, options: Option<RenderOptions>) -> Result<u64> {
        let mut sender = self
            .inner
            .sender
            .lock()
            .map_err(|_| Error::Other("Coordinator sender lock poisoned".into()))?;
        let generation = sender.next_generation + 1;
        sender
            .cmd_tx
            .send(Command::Set {
                markup,
                options,
                generation,
            })
            .map_err(|_| Error::Closed)?;
        sender.next_generation = generation;
        Ok(generation)
    }

    /// Current status
    pub fn status(&self) -> RenderStatus {
        self.inner.status_rx.borrow().status.clone()
    }

    /// Most recently allocated generation (0 before the first request)
    pub fn generation(&self) -> u64 {
        self.inner.sender.lock().map(|s| s.next_generation).unwrap_or(0)
    }

    /// Receiver that observes every status transition with its generation
    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.inner.status_rx.clone()
    }

    /// Wait until the latest request issued so far has settled and return
    /// its terminal status. No timeout is applied here; wrap the call in
    /// `tokio::time::timeout` for a bounded wait.
    pub async fn wait_settled(&self) -> Result<RenderStatus> {
        let target = self.generation();
        let mut rx = self.inner.status_rx.clone();
        let update = rx
            .wait_for(|u| u.generation >= target && u.status.is_terminal())
            .await
            .map_err(|_| Error::Closed)?;
        Ok(update.status.clone())
    }

    /// Stop the actor. In-flight surface loads run on but are never reported.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let sender = self
                .inner
                .sender
                .lock()
                .map_err(|_| Error::Other("Coordinator sender lock poisoned".into()))?;
            sender.cmd_tx.send(Command::Close(tx)).map_err(|_| Error::Closed)?;
        }
        rx.await.map_err(|e| Error::Other(format!("Close canceled: {}", e)))
    }
}

struct Actor {
    request: RenderRequest,
    html: HtmlBuilder,
    adapter: SurfaceAdapter,
    status_tx: watch::Sender<StatusUpdate>,
    done_tx: mpsc::UnboundedSender<Completion>,
    // Load task of the live generation, if one is running
    in_flight: Option<JoinHandle<()>>,
    callbacks: Callbacks,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Set { markup, options, generation }) => {
                        if let Some(m) = markup {
                            self.request.markup = m;
                        }
                        if let Some(o) = options {
                            self.request.options = o;
                        }
                        self.request.generation = generation;
                        self.begin();
                    }
                    Some(Command::Close(resp)) => {
                        let _ = resp.send(());
                        break;
                    }
                    None => break,
                },
                Some(done) = done_rx.recv() => self.complete(done),
            }
        }
        self.cancel_in_flight();
        debug!("coordinator stopped at generation {}", self.request.generation);
    }

    // Aborting takes effect at the task's next await, so a command already
    // handed to the surface still completes but nothing after it is issued.
    fn cancel_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            if !task.is_finished() {
                debug!("aborting surface load superseded by generation {}", self.request.generation);
                task.abort();
            }
        }
    }

    fn begin(&mut self) {
        let generation = self.request.generation;
        info!("render generation {} ({} bytes of markup)", generation, self.request.markup.len());
        self.cancel_in_flight();
        self.notify_status(&RenderStatus::Loading);
        self.publish(RenderStatus::Loading);

        let html = match self.html.build_html(&self.request.markup, &self.request.options) {
            Ok(html) => html,
            Err(e) => {
                debug!("generation {} failed to typeset: {}", generation, e);
                self.settle(RenderStatus::Error(e.message), None);
                return;
            }
        };

        let adapter = self.adapter.clone();
        let done_tx = self.done_tx.clone();
        let width_hint = self.request.options.width_hint();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = adapter.load(&html, width_hint).await;
            // Actor gone: nobody is waiting for this result.
            let _ = done_tx.send(Completion { generation, outcome });
        }));
    }

    fn complete(&mut self, done: Completion) {
        if done.generation != self.request.generation {
            debug!(
                "discarding stale result for generation {} (current {})",
                done.generation, self.request.generation
            );
            return;
        }
        self.in_flight = None;

        match done.outcome {
            Ok(output) => {
                if let Some(cb) = &self.callbacks.on_content_size {
                    cb(output.surface_size);
                }
                let result = RenderResult {
                    generation: done.generation,
                    image: output.snapshot,
                    content_size: output.content_size,
                };
                self.settle(RenderStatus::Finished, Some(&result));
            }
            Err(e) => self.settle(RenderStatus::Error(e.status_message()), None),
        }
    }

    // Terminal transition: callbacks first, then the watch, so anyone woken by
    // the watch sees every callback for this generation already delivered.
    fn settle(&self, status: RenderStatus, result: Option<&RenderResult>) {
        self.notify_status(&status);
        if let (Some(cb), Some(result)) = (&self.callbacks.on_result, result) {
            cb(result);
        }
        if let Some(cb) = &self.callbacks.on_snapshot {
            cb(result.and_then(|r| r.image.as_ref()));
        }
        self.publish(status);
    }

    fn notify_status(&self, status: &RenderStatus) {
        if let Some(cb) = &self.callbacks.on_status {
            cb(status);
        }
    }

    fn publish(&self, status: RenderStatus) {
        self.status_tx.send_replace(StatusUpdate {
            generation: self.request.generation,
            status,
        });
    }
}
