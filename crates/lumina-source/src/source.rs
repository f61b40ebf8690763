//! Source lifecycle manager.
//!
//! [`VideoSource`] is what the host holds for one source instance. It maps
//! host callbacks (create, show, hide, update, destroy, render) onto the
//! two states of the pipeline controller:
//!
//! - **Stopped**: no worker thread, no pipeline, no texture.
//! - **Running**: worker thread with a built pipeline.
//!
//! Failures never reach the host. A pipeline that cannot be built is logged
//! and the source shows nothing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::controller::PipelineController;
use crate::host::{Effect, Host};
use crate::pipeline::{MediaBackend, SampleCallback};
use crate::properties::{source_properties, Properties, APPLY_BUTTON};
use crate::session::Session;
use crate::settings::{Settings, SharedSettings, SourceConfig, KEY_STOP_ON_HIDE};
use crate::stats::SessionStatsSnapshot;

/// Display name of the source type.
pub const SOURCE_NAME: &str = "WPE Browser Source";

/// Whether the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Stopped,
    Running,
}

/// One source instance.
///
/// All methods take `&self` and may be called from any host thread, except
/// that `update`, `hide` and `destroy` must not be called while the caller
/// holds the host graphics scope (stopping waits for the streaming thread).
pub struct VideoSource<B: MediaBackend> {
    host: Arc<dyn Host>,
    session: Arc<Session>,
    controller: Mutex<PipelineController<B>>,
    /// The host's settings object. Read live by `hide` and `apply`.
    settings: Mutex<SharedSettings>,
    /// Config the running (or next started) pipeline is built from.
    config: Mutex<SourceConfig>,
}

impl<B: MediaBackend> VideoSource<B> {
    /// Creates a source over the host's `settings` object. Starts the
    /// pipeline right away unless `stop_on_hide` is set, in which case the
    /// first `show` does.
    pub fn create(settings: &SharedSettings, host: Arc<dyn Host>, backend: Arc<B>) -> Self {
        let config = settings.config();
        let source = Self {
            session: Arc::new(Session::new(Arc::clone(&host))),
            host,
            controller: Mutex::new(PipelineController::new(backend)),
            settings: Mutex::new(settings.clone()),
            config: Mutex::new(config.clone()),
        };

        tracing::info!(
            "Created {} (backend: {}, stop_on_hide: {})",
            SOURCE_NAME,
            source.controller.lock().backend().name(),
            config.stop_on_hide
        );
        if !config.stop_on_hide {
            source.start();
        }
        source
    }

    /// Stops the pipeline and frees the source.
    pub fn destroy(self) {
        drop(self);
    }

    pub fn name() -> &'static str {
        SOURCE_NAME
    }

    /// Registers the default of every setting this source reads.
    pub fn defaults(settings: &mut Settings) {
        SourceConfig::write_defaults(settings);
    }

    pub fn properties(&self) -> Properties {
        source_properties()
    }

    /// Called when the source becomes visible in any view.
    pub fn show(&self) {
        self.start();
    }

    /// Called when the source is no longer visible in any view. Reads
    /// `stop_on_hide` from the current settings, including edits not yet
    /// applied.
    pub fn hide(&self) {
        let stop_on_hide = self.settings.lock().get_bool(KEY_STOP_ON_HIDE);
        if stop_on_hide {
            self.stop();
        }
    }

    /// Stops the pipeline, takes the new settings and restarts unless the
    /// source is hidden and set to stop when hidden.
    pub fn update(&self, settings: &SharedSettings) {
        let mut controller = self.controller.lock();
        self.stop_locked(&mut controller);

        let config = settings.config();
        *self.settings.lock() = settings.clone();
        *self.config.lock() = config.clone();

        if config.stop_on_hide && !self.host.is_showing() {
            tracing::debug!("Source hidden, staying stopped after update");
            return;
        }
        self.start_locked(&mut controller, &config);
    }

    /// Runs `update` with the host's current settings, picking up edits the
    /// properties view made without triggering an update. Returns false:
    /// the properties view needs no refresh.
    pub fn apply(&self) -> bool {
        let settings = self.settings.lock().clone();
        self.update(&settings);
        false
    }

    /// Dispatches a button press from the properties view.
    pub fn on_property_clicked(&self, name: &str) -> bool {
        match name {
            APPLY_BUTTON => self.apply(),
            other => {
                tracing::debug!("Unknown property button '{}'", other);
                false
            }
        }
    }

    /// Width of the latest frame, or 0 while there is none.
    pub fn width(&self) -> u32 {
        self.session.width()
    }

    /// Height of the latest frame, or 0 while there is none.
    pub fn height(&self) -> u32 {
        self.session.height()
    }

    /// Binds the latest frame to `effect`. No-op until a frame has been
    /// published.
    pub fn render(&self, effect: &mut dyn Effect) -> bool {
        self.session.render(effect)
    }

    pub fn state(&self) -> SourceState {
        if self.controller.lock().is_running() {
            SourceState::Running
        } else {
            SourceState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SourceState::Running
    }

    pub fn config(&self) -> SourceConfig {
        self.config.lock().clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.session.stats().snapshot()
    }

    fn start(&self) {
        let config = self.config.lock().clone();
        let mut controller = self.controller.lock();
        self.start_locked(&mut controller, &config);
    }

    fn stop(&self) {
        let mut controller = self.controller.lock();
        self.stop_locked(&mut controller);
    }

    fn start_locked(&self, controller: &mut PipelineController<B>, config: &SourceConfig) {
        if controller.is_running() {
            return;
        }

        self.session.set_copy_mode(config.copy_mode);
        let session = Arc::clone(&self.session);
        let on_sample: SampleCallback = Arc::new(move |sample| session.on_new_sample(sample));

        let description = config.pipeline_description();
        match controller.start(
            &description,
            on_sample,
            Arc::clone(&self.host),
            Arc::clone(self.session.stats()),
        ) {
            Ok(()) => tracing::info!("Pipeline started: {}", config.location),
            Err(e) => {
                tracing::error!("{}", e);
                self.session.clear();
                self.host.clear_video();
            }
        }
    }

    fn stop_locked(&self, controller: &mut PipelineController<B>) {
        if !controller.stop() {
            return;
        }
        self.session.clear();
        self.host.clear_video();
        tracing::info!(
            "Pipeline stopped ({})",
            self.session.stats().snapshot().status_string()
        );
    }
}

impl<B: MediaBackend> Drop for VideoSource<B> {
    fn drop(&mut self) {
        self.stop();
        tracing::debug!("Destroyed {}", SOURCE_NAME);
    }
}

impl<B: MediaBackend> std::fmt::Debug for VideoSource<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("state", &self.state())
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessBackend, HeadlessEffect, HeadlessHost};
    use crate::settings::{KEY_LOCATION, KEY_SOURCE_ELEMENT};

    fn settings(stop_on_hide: bool) -> SharedSettings {
        let mut settings = Settings::new();
        VideoSource::<HeadlessBackend>::defaults(&mut settings);
        settings.set_bool(KEY_STOP_ON_HIDE, stop_on_hide);
        SharedSettings::new(settings)
    }

    #[test]
    fn test_name_and_defaults() {
        assert_eq!(VideoSource::<HeadlessBackend>::name(), "WPE Browser Source");
        let mut settings = Settings::new();
        VideoSource::<HeadlessBackend>::defaults(&mut settings);
        assert!(settings.get_bool(KEY_STOP_ON_HIDE));
    }

    #[test]
    fn test_hide_respects_stop_on_hide() {
        let host = HeadlessHost::new();
        let backend = Arc::new(HeadlessBackend::new());

        let keep = VideoSource::create(&settings(false), host.clone(), Arc::clone(&backend));
        assert!(keep.is_running());
        keep.hide();
        assert!(keep.is_running());

        let stopping = VideoSource::create(&settings(true), host.clone(), Arc::clone(&backend));
        stopping.show();
        assert!(stopping.is_running());
        stopping.hide();
        assert_eq!(stopping.state(), SourceState::Stopped);
    }

    #[test]
    fn test_stop_publishes_no_frame() {
        let host = HeadlessHost::new();
        let backend = Arc::new(HeadlessBackend::new());
        let source = VideoSource::create(&settings(true), host.clone(), backend);

        source.show();
        source.hide();
        assert_eq!(host.clear_video_calls(), 1);

        // Already stopped: nothing more to clear.
        source.hide();
        assert_eq!(host.clear_video_calls(), 1);
    }

    #[test]
    fn test_apply_button_reruns_update() {
        let host = HeadlessHost::new();
        host.set_showing(true);
        let backend = Arc::new(HeadlessBackend::new());
        let source = VideoSource::create(&settings(false), host.clone(), Arc::clone(&backend));
        assert_eq!(backend.builds(), 1);

        assert!(!source.on_property_clicked(APPLY_BUTTON));
        assert!(source.is_running());
        assert_eq!(backend.builds(), 2);

        assert!(!source.on_property_clicked("reload"));
        assert_eq!(backend.builds(), 2);
    }

    #[test]
    fn test_apply_button_takes_deferred_edits() {
        let host = HeadlessHost::new();
        host.set_showing(false);
        let backend = Arc::new(HeadlessBackend::new());
        let host_settings = settings(true);
        let source = VideoSource::create(&host_settings, host.clone(), Arc::clone(&backend));
        assert_eq!(source.state(), SourceState::Stopped);

        // Edits from a properties view that defers updates.
        host_settings.lock().set_bool(KEY_STOP_ON_HIDE, false);
        host_settings
            .lock()
            .set_string(KEY_LOCATION, "https://example.com/overlay.html");
        assert!(source.config().stop_on_hide);

        assert!(!source.on_property_clicked(APPLY_BUTTON));

        assert_eq!(source.state(), SourceState::Running);
        let config = source.config();
        assert!(!config.stop_on_hide);
        assert_eq!(config.location, "https://example.com/overlay.html");
        assert_eq!(backend.builds(), 1);
    }

    #[test]
    fn test_hide_reads_current_settings() {
        let host = HeadlessHost::new();
        let backend = Arc::new(HeadlessBackend::new());
        let host_settings = settings(false);
        let source = VideoSource::create(&host_settings, host.clone(), backend);
        assert!(source.is_running());

        host_settings.lock().set_bool(KEY_STOP_ON_HIDE, true);
        source.hide();

        assert_eq!(source.state(), SourceState::Stopped);
        assert_eq!(host.clear_video_calls(), 1);
    }

    #[test]
    fn test_failed_start_shows_nothing() {
        let host = HeadlessHost::new();
        let backend = Arc::new(HeadlessBackend::new());
        let settings = settings(false);
        settings.lock().set_string(KEY_SOURCE_ELEMENT, "nosuchsrc");

        let source = VideoSource::create(&settings, host.clone(), backend);
        assert!(!source.is_running());
        assert_eq!((source.width(), source.height()), (0, 0));
        assert_eq!(host.clear_video_calls(), 1);

        let mut effect = HeadlessEffect::new();
        assert!(!source.render(&mut effect));
        assert!(effect.is_empty());
    }
}
