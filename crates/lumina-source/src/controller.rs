//! Pipeline controller: runs one pipeline on a dedicated worker thread.
//!
//! The worker builds the pipeline, starts it and then services a single
//! event queue (bus messages and the quit signal) until told to stop. The
//! caller of [`PipelineController::start`] blocks until the worker's loop is
//! actually servicing events, or until construction has failed.
//!
//! ```text
//!  caller                         worker thread
//!  ------                         -------------
//!  start() ── spawn ───────────▶  build pipeline ──(fail)──▶ signal Failed, exit
//!     │                           play()
//!     │                           queue Ready
//!     │  ◀──── signal Ready ────  loop: Ready | Bus(..) | Quit
//!  return                            │
//!  stop() ── Quit ─────────────▶     ▼
//!     │                           halt + drop pipeline
//!  join ◀──────────────────────── exit
//! ```
//!
//! Error and end-of-stream halt the pipeline from inside the loop but keep
//! the worker alive; only `stop` ends it. `stop` must not be called from a
//! thread that holds the host graphics scope, since halting waits for the
//! streaming thread, which may be waiting to enter that scope.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::SourceError;
use crate::host::Host;
use crate::pipeline::{
    BusMessage, BusSender, LoopEvent, MediaBackend, Pipeline, PipelineHooks, SampleCallback,
};
use crate::stats::SessionStats;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "GStreamer Source";

/// Startup progress reported by the worker.
#[derive(Debug)]
enum Startup {
    Pending,
    Ready,
    Failed(SourceError),
}

/// Condition-variable handshake between `start` and the worker.
struct Rendezvous {
    state: Mutex<Startup>,
    cond: Condvar,
}

impl Rendezvous {
    fn new() -> Self {
        Self {
            state: Mutex::new(Startup::Pending),
            cond: Condvar::new(),
        }
    }

    /// Resolves the handshake. Later calls are ignored.
    fn resolve(&self, outcome: Startup) {
        let mut state = self.state.lock();
        if matches!(*state, Startup::Pending) {
            *state = outcome;
            self.cond.notify_all();
        }
    }

    /// Blocks until the worker resolves the handshake.
    fn wait(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        while matches!(*state, Startup::Pending) {
            self.cond.wait(&mut state);
        }
        match std::mem::replace(&mut *state, Startup::Ready) {
            Startup::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Resolves the rendezvous as failed if the worker exits (or panics)
/// before signalling.
struct StartupGuard(Arc<Rendezvous>);

impl Drop for StartupGuard {
    fn drop(&mut self) {
        self.0.resolve(Startup::Failed(SourceError::Thread(
            "worker exited before its loop started".into(),
        )));
    }
}

/// A running worker thread.
struct Worker {
    handle: JoinHandle<()>,
    tx: Sender<LoopEvent>,
}

/// Owns the worker thread of one session.
///
/// Either no worker exists, or a worker exists whose pipeline was built and
/// whose loop is running. There is no state in between once `start` or
/// `stop` has returned.
pub struct PipelineController<B: MediaBackend> {
    backend: Arc<B>,
    worker: Option<Worker>,
}

impl<B: MediaBackend> PipelineController<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            worker: None,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts a worker running `description`. No-op if already running.
    ///
    /// Blocks until the worker's loop is servicing events. If the pipeline
    /// cannot be built the worker has already exited when this returns the
    /// error.
    pub fn start(
        &mut self,
        description: &str,
        on_sample: SampleCallback,
        host: Arc<dyn Host>,
        stats: Arc<SessionStats>,
    ) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let rendezvous = Arc::new(Rendezvous::new());
        let hooks = PipelineHooks {
            on_sample,
            bus: BusSender::new(tx.clone()),
            host,
        };

        let backend = Arc::clone(&self.backend);
        let description = description.to_owned();
        let worker_rendezvous = Arc::clone(&rendezvous);
        let worker_tx = tx.clone();
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                worker_main(
                    &*backend,
                    &description,
                    hooks,
                    worker_tx,
                    rx,
                    worker_rendezvous,
                    stats,
                )
            })
            .map_err(|e| SourceError::Thread(format!("Failed to spawn worker thread: {e}")))?;

        if let Err(e) = rendezvous.wait() {
            if handle.join().is_err() {
                tracing::warn!("Pipeline worker panicked during startup");
            }
            return Err(e);
        }

        tracing::debug!("Pipeline worker running");
        self.worker = Some(Worker { handle, tx });
        Ok(())
    }

    /// Quits the worker loop and joins the thread. Returns false if nothing
    /// was running.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };

        // The worker holds a sender of its own, so this only fails if the
        // loop already exited by panicking.
        let _ = worker.tx.send(LoopEvent::Quit);
        if worker.handle.join().is_err() {
            tracing::warn!("Pipeline worker panicked");
        }
        tracing::debug!("Pipeline worker joined");
        true
    }
}

impl<B: MediaBackend> Drop for PipelineController<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<B: MediaBackend> std::fmt::Debug for PipelineController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("backend", &self.backend.name())
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_main<B: MediaBackend>(
    backend: &B,
    description: &str,
    hooks: PipelineHooks,
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
    rendezvous: Arc<Rendezvous>,
    stats: Arc<SessionStats>,
) {
    let _startup = StartupGuard(Arc::clone(&rendezvous));

    tracing::debug!("Building pipeline: {}", description);
    let mut pipeline = match backend.build(description, hooks) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            rendezvous.resolve(Startup::Failed(e));
            return;
        }
    };

    stats.record_pipeline_start();
    if let Err(e) = pipeline.play() {
        // Same treatment as a runtime error: the loop stays up until stop.
        tracing::error!("{}", e);
        stats.record_pipeline_error();
        pipeline.halt();
    }

    // Ready is handled by the loop itself, so the caller is only released
    // once events are being serviced.
    let _ = tx.send(LoopEvent::Ready);
    drop(tx);

    for event in rx.iter() {
        match event {
            LoopEvent::Ready => rendezvous.resolve(Startup::Ready),
            LoopEvent::Bus(message) => handle_bus_message(&mut pipeline, message, &stats),
            LoopEvent::Quit => break,
        }
    }

    pipeline.halt();
    drop(pipeline);
    tracing::debug!("Pipeline worker exiting");
}

fn handle_bus_message<P: Pipeline>(pipeline: &mut P, message: BusMessage, stats: &SessionStats) {
    match message {
        BusMessage::Error { message, debug } => {
            tracing::error!("{}", message);
            if let Some(details) = debug {
                tracing::debug!("Debug details: {}", details);
            }
            stats.record_pipeline_error();
            pipeline.halt();
        }
        BusMessage::Warning { message, debug } => {
            tracing::warn!("{}", message);
            if let Some(details) = debug {
                tracing::debug!("Debug details: {}", details);
            }
        }
        BusMessage::Eos => {
            tracing::info!("End of stream, halting pipeline");
            pipeline.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessBackend, HeadlessHost, PipelineState};

    fn noop_sample() -> SampleCallback {
        Arc::new(|_sample| {})
    }

    fn start(
        controller: &mut PipelineController<HeadlessBackend>,
        description: &str,
    ) -> Result<(), SourceError> {
        controller.start(
            description,
            noop_sample(),
            HeadlessHost::new(),
            Arc::new(SessionStats::new()),
        )
    }

    const GOOD: &str =
        "wpevideosrc location=about:blank ! tee name=t t. ! queue ! appsink name=video-sink";

    #[test]
    fn test_start_blocks_until_running() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(Arc::clone(&backend));

        start(&mut controller, GOOD).unwrap();
        assert!(controller.is_running());
        assert_eq!(backend.alive_pipelines(), 1);
        let pipeline = backend.last_pipeline().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Playing);
        assert_ne!(pipeline.built_on(), std::thread::current().id());

        assert!(controller.stop());
        assert!(!controller.is_running());
        assert_eq!(backend.alive_pipelines(), 0);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(Arc::clone(&backend));

        start(&mut controller, GOOD).unwrap();
        start(&mut controller, GOOD).unwrap();
        assert_eq!(backend.builds(), 1);
        assert_eq!(backend.alive_pipelines(), 1);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(backend);
        assert!(!controller.stop());
        assert!(!controller.stop());
    }

    #[test]
    fn test_construction_failure_leaves_no_worker() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(Arc::clone(&backend));

        let err = start(&mut controller, "nosuchsrc ! appsink name=video-sink").unwrap_err();
        assert!(matches!(err, SourceError::PipelineConstruction(_)));
        assert!(!controller.is_running());
        assert_eq!(backend.alive_pipelines(), 0);
        assert!(!controller.stop());
    }

    #[test]
    fn test_error_halts_but_keeps_worker() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(Arc::clone(&backend));
        let stats = Arc::new(SessionStats::new());
        controller
            .start(GOOD, noop_sample(), HeadlessHost::new(), Arc::clone(&stats))
            .unwrap();

        let pipeline = backend.last_pipeline().unwrap();
        assert!(pipeline.post(BusMessage::Error {
            message: "Could not resolve host".into(),
            debug: None,
        }));
        assert!(pipeline.wait_for_state(PipelineState::Halted));

        assert!(controller.is_running());
        assert_eq!(backend.alive_pipelines(), 1);
        assert_eq!(stats.snapshot().pipeline_errors, 1);

        assert!(controller.stop());
        assert_eq!(backend.alive_pipelines(), 0);
    }

    #[test]
    fn test_eos_and_warning() {
        let backend = Arc::new(HeadlessBackend::new());
        let mut controller = PipelineController::new(Arc::clone(&backend));
        start(&mut controller, GOOD).unwrap();
        let pipeline = backend.last_pipeline().unwrap();

        pipeline.post(BusMessage::Warning {
            message: "buffering".into(),
            debug: Some("queue underrun".into()),
        });
        pipeline.post(BusMessage::Eos);
        assert!(pipeline.wait_for_state(PipelineState::Halted));
        assert!(controller.is_running());
    }

    #[test]
    fn test_drop_joins_worker() {
        let backend = Arc::new(HeadlessBackend::new());
        {
            let mut controller = PipelineController::new(Arc::clone(&backend));
            start(&mut controller, GOOD).unwrap();
        }
        assert_eq!(backend.alive_pipelines(), 0);
    }
}
