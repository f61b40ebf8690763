//! In-process host and media backend without a GPU.
//!
//! Everything here behaves like the real collaborators where it matters for
//! the source's threading: the host's graphics scope is a real per-thread
//! lock, the GL thread is a real thread fed through a queue, and pipelines
//! are built on the worker thread and deliver frames from the caller's
//! thread the way a streaming thread would. Textures and GL names are plain
//! counters.
//!
//! ```
//! use std::sync::Arc;
//! use lumina_source::headless::{HeadlessBackend, HeadlessHost};
//! use lumina_source::{Settings, SharedSettings, VideoSource};
//!
//! let host = HeadlessHost::new();
//! let backend = Arc::new(HeadlessBackend::new());
//! let mut settings = Settings::new();
//! VideoSource::<HeadlessBackend>::defaults(&mut settings);
//!
//! let settings = SharedSettings::new(settings);
//! let source = VideoSource::create(&settings, host.clone(), Arc::clone(&backend));
//! source.show();
//! let pipeline = backend.last_pipeline().unwrap();
//! pipeline.push_frame(640, 480).unwrap();
//! assert_eq!((source.width(), source.height()), (640, 480));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::error::SourceError;
use crate::gl_bridge::{ContextBridge, GlHandleCache, GlInterop, InteropCache};
use crate::host::{Effect, Host, HostTexture, NativeHandle, TextureDesc};
use crate::pipeline::{
    BusMessage, ContextRequest, CopySource, FrameInfo, GlTask, GlTextureId, GlThread,
    MediaBackend, Pipeline, PipelineHooks, VideoSample,
};
use crate::settings::{DEFAULT_SOURCE_ELEMENT, VIDEO_SINK_NAME};

/// How long [`PipelineHandle::wait_for_state`] waits.
const STATE_WAIT: Duration = Duration::from_secs(5);

const DEFAULT_DISPLAY: usize = 0xd15a;
const DEFAULT_CONTEXT: usize = 0xc0c0;

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GraphicsScope {
    owner: Option<ThreadId>,
    depth: u32,
}

#[derive(Debug, Clone, Copy)]
struct TextureRecord {
    width: u32,
    height: u32,
    native: GlTextureId,
}

/// Host with a re-entrant, per-thread graphics scope and counted textures.
#[derive(Debug)]
pub struct HeadlessHost {
    scope: Mutex<GraphicsScope>,
    scope_free: Condvar,
    graphics_entries: AtomicU32,
    outside_graphics: AtomicU32,
    next_texture: AtomicU64,
    textures: Mutex<HashMap<HostTexture, TextureRecord>>,
    refuse_textures: AtomicBool,
    display: Mutex<Option<NativeHandle>>,
    context: Mutex<Option<NativeHandle>>,
    showing: AtomicBool,
    clear_video_calls: AtomicU32,
}

impl HeadlessHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scope: Mutex::new(GraphicsScope::default()),
            scope_free: Condvar::new(),
            graphics_entries: AtomicU32::new(0),
            outside_graphics: AtomicU32::new(0),
            next_texture: AtomicU64::new(1),
            textures: Mutex::new(HashMap::new()),
            refuse_textures: AtomicBool::new(false),
            display: Mutex::new(NativeHandle::new(DEFAULT_DISPLAY)),
            context: Mutex::new(NativeHandle::new(DEFAULT_CONTEXT)),
            showing: AtomicBool::new(false),
            clear_video_calls: AtomicU32::new(0),
        })
    }

    /// Makes `create_texture` fail.
    pub fn refuse_textures(&self, refuse: bool) {
        self.refuse_textures.store(refuse, Ordering::Relaxed);
    }

    /// Sets the native context reported while inside the graphics scope.
    pub fn set_native_context(&self, context: Option<NativeHandle>) {
        *self.context.lock() = context;
    }

    pub fn set_native_display(&self, display: Option<NativeHandle>) {
        *self.display.lock() = display;
    }

    pub fn native_display(&self) -> Option<NativeHandle> {
        *self.display.lock()
    }

    pub fn native_context(&self) -> Option<NativeHandle> {
        *self.context.lock()
    }

    pub fn set_showing(&self, showing: bool) {
        self.showing.store(showing, Ordering::Relaxed);
    }

    /// Current nesting depth of the graphics scope (0 when free).
    pub fn graphics_depth(&self) -> u32 {
        self.scope.lock().depth
    }

    /// Total number of graphics scope entries.
    pub fn graphics_entries(&self) -> u32 {
        self.graphics_entries.load(Ordering::Relaxed)
    }

    /// Graphics calls made by a thread that did not hold the scope.
    pub fn calls_outside_graphics(&self) -> u32 {
        self.outside_graphics.load(Ordering::Relaxed)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.lock().len()
    }

    pub fn is_live(&self, texture: HostTexture) -> bool {
        self.textures.lock().contains_key(&texture)
    }

    pub fn texture_size(&self, texture: HostTexture) -> Option<(u32, u32)> {
        self.textures
            .lock()
            .get(&texture)
            .map(|record| (record.width, record.height))
    }

    /// GL name of a live texture, without the graphics scope check.
    pub fn native_of(&self, texture: HostTexture) -> Option<GlTextureId> {
        self.textures.lock().get(&texture).map(|record| record.native)
    }

    pub fn clear_video_calls(&self) -> u32 {
        self.clear_video_calls.load(Ordering::Relaxed)
    }

    fn check_scope(&self, call: &str) {
        let me = std::thread::current().id();
        if self.scope.lock().owner != Some(me) {
            self.outside_graphics.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("{} called outside the graphics scope", call);
        }
    }
}

impl Host for HeadlessHost {
    fn enter_graphics(&self) {
        let me = std::thread::current().id();
        let mut scope = self.scope.lock();
        while scope.owner.is_some_and(|owner| owner != me) {
            self.scope_free.wait(&mut scope);
        }
        scope.owner = Some(me);
        scope.depth += 1;
        self.graphics_entries.fetch_add(1, Ordering::Relaxed);
    }

    fn leave_graphics(&self) {
        let me = std::thread::current().id();
        let mut scope = self.scope.lock();
        if scope.owner != Some(me) {
            self.outside_graphics.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("leave_graphics without matching enter");
            return;
        }
        scope.depth -= 1;
        if scope.depth == 0 {
            scope.owner = None;
            self.scope_free.notify_all();
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> Option<HostTexture> {
        self.check_scope("create_texture");
        if self.refuse_textures.load(Ordering::Relaxed) {
            return None;
        }
        let id = self.next_texture.fetch_add(1, Ordering::Relaxed);
        let texture = HostTexture::from_raw(id);
        let record = TextureRecord {
            width: desc.width,
            height: desc.height,
            native: 0x100 + id as GlTextureId,
        };
        self.textures.lock().insert(texture, record);
        Some(texture)
    }

    fn destroy_texture(&self, texture: HostTexture) {
        self.check_scope("destroy_texture");
        if self.textures.lock().remove(&texture).is_none() {
            tracing::warn!("Destroying unknown texture {:?}", texture);
        }
    }

    fn native_texture(&self, texture: HostTexture) -> Option<GlTextureId> {
        self.check_scope("native_texture");
        self.native_of(texture)
    }

    fn current_display(&self) -> Option<NativeHandle> {
        self.check_scope("current_display");
        self.native_display()
    }

    fn current_context(&self) -> Option<NativeHandle> {
        self.check_scope("current_context");
        self.native_context()
    }

    fn clear_video(&self) {
        self.clear_video_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn is_showing(&self) -> bool {
        self.showing.load(Ordering::Relaxed)
    }
}

/// Effect that records which texture is bound to which parameter.
#[derive(Debug, Default)]
pub struct HeadlessEffect {
    bound: HashMap<String, HostTexture>,
}

impl HeadlessEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(&self, param: &str) -> Option<HostTexture> {
        self.bound.get(param).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

impl Effect for HeadlessEffect {
    fn set_texture(&mut self, param: &str, texture: HostTexture) -> bool {
        self.bound.insert(param.to_owned(), texture);
        true
    }
}

// ---------------------------------------------------------------------------
// GL thread and frames
// ---------------------------------------------------------------------------

/// One copy performed on a [`HeadlessGlThread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub source: GlTextureId,
    pub target: GlTextureId,
    pub info: FrameInfo,
    pub thread: ThreadId,
}

/// A real thread draining a task queue, standing in for a GL context's
/// thread.
#[derive(Debug)]
pub struct HeadlessGlThread {
    tx: Option<Sender<GlTask>>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
    copies: Arc<Mutex<Vec<CopyRecord>>>,
}

impl HeadlessGlThread {
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<GlTask>();
        let handle = std::thread::Builder::new()
            .name("headless-gl".into())
            .spawn(move || {
                for task in rx.iter() {
                    task();
                }
            });
        let (tx, handle) = match handle {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                // Tasks then run inline on the dispatching thread.
                tracing::warn!("Failed to spawn headless GL thread: {}", e);
                (None, None)
            }
        };
        Arc::new(Self {
            thread_id: handle.as_ref().map(|h| h.thread().id()),
            tx,
            handle,
            copies: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Copies performed so far, in order.
    pub fn copies(&self) -> Vec<CopyRecord> {
        self.copies.lock().clone()
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    /// Waits until every task queued so far has run.
    pub fn flush(&self) {
        self.dispatch_blocking(Box::new(|| {}));
    }

    fn on_own_thread(&self) -> bool {
        self.thread_id == Some(std::thread::current().id())
    }
}

impl GlThread for HeadlessGlThread {
    fn dispatch(&self, task: GlTask) {
        match &self.tx {
            Some(tx) if !self.on_own_thread() => {
                if let Err(e) = tx.send(task) {
                    tracing::warn!("GL thread gone, running task inline");
                    (e.into_inner())();
                }
            }
            _ => task(),
        }
    }

    fn dispatch_blocking(&self, task: GlTask) {
        let Some(tx) = self.tx.as_ref().filter(|_| !self.on_own_thread()) else {
            task();
            return;
        };
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let wrapped: GlTask = Box::new(move || {
            task();
            let _ = done_tx.send(());
        });
        match tx.send(wrapped) {
            Ok(()) => {
                let _ = done_rx.recv();
            }
            Err(e) => (e.into_inner())(),
        }
    }
}

impl Drop for HeadlessGlThread {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!("Headless GL thread panicked");
            }
        }
    }
}

struct HeadlessCopySource {
    source: GlTextureId,
    fail: bool,
    copies: Arc<Mutex<Vec<CopyRecord>>>,
}

impl CopySource for HeadlessCopySource {
    fn copy_into(&self, target: GlTextureId, info: FrameInfo) -> Result<(), SourceError> {
        if self.fail {
            return Err(SourceError::Copy(format!(
                "glCopyTexImage2D from {} failed",
                self.source
            )));
        }
        self.copies.lock().push(CopyRecord {
            source: self.source,
            target,
            info,
            thread: std::thread::current().id(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    mapped: AtomicBool,
    released: AtomicBool,
    unmaps: AtomicU32,
}

/// Observes a [`HeadlessSample`] after ownership has moved on.
#[derive(Debug, Clone)]
pub struct SampleProbe {
    state: Arc<ProbeState>,
    gl: Arc<HeadlessGlThread>,
}

impl SampleProbe {
    pub fn is_mapped(&self) -> bool {
        self.state.mapped.load(Ordering::Relaxed)
    }

    /// True once the sample has been dropped.
    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Relaxed)
    }

    pub fn unmap_count(&self) -> u32 {
        self.state.unmaps.load(Ordering::Relaxed)
    }

    pub fn gl_thread(&self) -> Arc<HeadlessGlThread> {
        Arc::clone(&self.gl)
    }
}

/// A frame "decoded" into GL texture `texture` on a headless GL thread.
#[derive(Debug)]
pub struct HeadlessSample {
    info: Option<FrameInfo>,
    texture: GlTextureId,
    fail_map: bool,
    fail_copy: bool,
    gl_memory: bool,
    state: Arc<ProbeState>,
    gl: Arc<HeadlessGlThread>,
}

impl HeadlessSample {
    /// Creates a sample on its own GL thread.
    pub fn new(width: u32, height: u32, texture: GlTextureId) -> (Self, SampleProbe) {
        Self::on_thread(width, height, texture, HeadlessGlThread::spawn())
    }

    /// Creates a sample whose memory belongs to `gl`.
    pub fn on_thread(
        width: u32,
        height: u32,
        texture: GlTextureId,
        gl: Arc<HeadlessGlThread>,
    ) -> (Self, SampleProbe) {
        let state = Arc::new(ProbeState::default());
        let probe = SampleProbe {
            state: Arc::clone(&state),
            gl: Arc::clone(&gl),
        };
        let sample = Self {
            info: Some(FrameInfo::new(width, height)),
            texture,
            fail_map: false,
            fail_copy: false,
            gl_memory: true,
            state,
            gl,
        };
        (sample, probe)
    }

    pub fn with_map_failure(mut self) -> Self {
        self.fail_map = true;
        self
    }

    pub fn with_copy_failure(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    /// Sample with no format description.
    pub fn without_info(mut self) -> Self {
        self.info = None;
        self
    }

    /// Sample backed by system memory instead of a GL texture.
    pub fn without_gl_memory(mut self) -> Self {
        self.gl_memory = false;
        self
    }
}

impl VideoSample for HeadlessSample {
    fn info(&self) -> Option<FrameInfo> {
        self.info
    }

    fn map_gl(&mut self) -> Result<GlTextureId, SourceError> {
        if self.fail_map {
            return Err(SourceError::Map(format!(
                "buffer with texture {} is not readable",
                self.texture
            )));
        }
        self.state.mapped.store(true, Ordering::Relaxed);
        Ok(self.texture)
    }

    fn unmap(&mut self) {
        self.state.mapped.store(false, Ordering::Relaxed);
        self.state.unmaps.fetch_add(1, Ordering::Relaxed);
    }

    fn is_mapped(&self) -> bool {
        self.state.mapped.load(Ordering::Relaxed)
    }

    fn gl_thread(&self) -> Option<Arc<dyn GlThread>> {
        self.gl_memory
            .then(|| Arc::clone(&self.gl) as Arc<dyn GlThread>)
    }

    fn copy_source(&self) -> Option<Box<dyn CopySource>> {
        if !self.gl_memory || !self.is_mapped() {
            return None;
        }
        Some(Box::new(HeadlessCopySource {
            source: self.texture,
            fail: self.fail_copy,
            copies: Arc::clone(&self.gl.copies),
        }))
    }
}

impl Drop for HeadlessSample {
    fn drop(&mut self) {
        self.state.released.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// GL interop
// ---------------------------------------------------------------------------

/// Wrapped display handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessDisplay {
    native: NativeHandle,
}

impl HeadlessDisplay {
    pub fn native(&self) -> NativeHandle {
        self.native
    }
}

/// Wrapped context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessContext {
    pub native: NativeHandle,
    pub display: NativeHandle,
    pub active: bool,
    /// GL version filled in after activation.
    pub version: Option<(u32, u32)>,
}

/// A pipeline element that raised a context request.
#[derive(Debug, Default)]
pub struct HeadlessElement {
    display: Mutex<Option<HeadlessDisplay>>,
    context: Mutex<Option<HeadlessContext>>,
}

impl HeadlessElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display(&self) -> Option<HeadlessDisplay> {
        *self.display.lock()
    }

    pub fn context(&self) -> Option<HeadlessContext> {
        *self.context.lock()
    }
}

/// Interop producing plain handle records.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessInterop;

impl GlInterop for HeadlessInterop {
    type Display = HeadlessDisplay;
    type Context = HeadlessContext;
    type Target = HeadlessElement;

    fn wrap_display(&self, native: NativeHandle) -> Result<HeadlessDisplay, SourceError> {
        Ok(HeadlessDisplay { native })
    }

    fn wrap_context(
        &self,
        display: &HeadlessDisplay,
        native: NativeHandle,
    ) -> Result<HeadlessContext, SourceError> {
        Ok(HeadlessContext {
            native,
            display: display.native,
            active: true,
            version: Some((3, 3)),
        })
    }

    fn attach_display(&self, target: &HeadlessElement, display: &HeadlessDisplay) {
        *target.display.lock() = Some(*display);
    }

    fn attach_context(&self, target: &HeadlessElement, context: &HeadlessContext) {
        *target.context.lock() = Some(*context);
    }
}

// ---------------------------------------------------------------------------
// Media backend
// ---------------------------------------------------------------------------

/// Playback state of a headless pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Built,
    Playing,
    Halted,
    /// The pipeline object has been dropped.
    Released,
}

#[derive(Debug)]
struct PipelineStatus {
    state: Mutex<PipelineState>,
    changed: Condvar,
    built_on: ThreadId,
    play_element: Mutex<Option<Arc<HeadlessElement>>>,
}

impl PipelineStatus {
    fn set(&self, state: PipelineState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }
}

/// Backend whose pipelines are driven by the test through
/// [`PipelineHandle`].
#[derive(Debug)]
pub struct HeadlessBackend {
    elements: Mutex<Vec<String>>,
    init_calls: AtomicU32,
    fail_init: AtomicBool,
    fail_play: AtomicBool,
    contexts_on_play: AtomicBool,
    builds: AtomicU32,
    alive: Arc<AtomicUsize>,
    next_texture: Arc<AtomicU32>,
    last: Mutex<Option<PipelineHandle>>,
    gl_handles: Arc<InteropCache<HeadlessInterop>>,
    gl: Arc<HeadlessGlThread>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_gl_handles(Arc::new(GlHandleCache::new()))
    }

    /// Backend sharing `gl_handles` with other backends, the way every
    /// pipeline in a process shares the host's wrapped GL handles.
    pub fn with_gl_handles(gl_handles: Arc<InteropCache<HeadlessInterop>>) -> Self {
        Self {
            elements: Mutex::new(vec![
                DEFAULT_SOURCE_ELEMENT.to_owned(),
                "videotestsrc".to_owned(),
            ]),
            init_calls: AtomicU32::new(0),
            fail_init: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
            contexts_on_play: AtomicBool::new(false),
            builds: AtomicU32::new(0),
            alive: Arc::new(AtomicUsize::new(0)),
            next_texture: Arc::new(AtomicU32::new(1)),
            last: Mutex::new(None),
            gl_handles,
            gl: HeadlessGlThread::spawn(),
        }
    }

    /// Makes `name` a known source element.
    pub fn register_element(&self, name: &str) {
        self.elements.lock().push(name.to_owned());
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::Relaxed);
    }

    /// Makes the transition to playing fail on later builds.
    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::Relaxed);
    }

    /// Makes later pipelines raise a GL display and a GL app-context
    /// request from `play`, on the worker thread, the way GL elements do
    /// while the pipeline prerolls.
    pub fn request_contexts_on_play(&self, enabled: bool) {
        self.contexts_on_play.store(enabled, Ordering::Relaxed);
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::Relaxed)
    }

    /// Successful builds so far.
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Pipelines built and not yet dropped.
    pub fn alive_pipelines(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    /// Handle to the most recently built pipeline.
    pub fn last_pipeline(&self) -> Option<PipelineHandle> {
        self.last.lock().clone()
    }

    pub fn gl_handles(&self) -> &Arc<InteropCache<HeadlessInterop>> {
        &self.gl_handles
    }

    /// GL thread all frames of this backend live on.
    pub fn gl_thread(&self) -> &Arc<HeadlessGlThread> {
        &self.gl
    }

    fn parse(&self, description: &str) -> Result<(), SourceError> {
        let segments: Vec<&str> = description.split('!').map(str::trim).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(SourceError::PipelineConstruction(format!(
                "syntax error in \"{description}\""
            )));
        }
        let element = segments[0].split_whitespace().next().unwrap_or_default();
        if !self.elements.lock().iter().any(|known| known == element) {
            return Err(SourceError::PipelineConstruction(format!(
                "no element \"{element}\""
            )));
        }
        if !description.contains(&format!("appsink name={VIDEO_SINK_NAME}")) {
            return Err(SourceError::PipelineConstruction(format!(
                "no appsink named \"{VIDEO_SINK_NAME}\""
            )));
        }
        Ok(())
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for HeadlessBackend {
    type Pipeline = HeadlessPipeline;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn init(&self) -> Result<(), SourceError> {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_init.load(Ordering::Relaxed) {
            return Err(SourceError::BackendInit("headless init disabled".into()));
        }
        Ok(())
    }

    fn build(
        &self,
        description: &str,
        hooks: PipelineHooks,
    ) -> Result<HeadlessPipeline, SourceError> {
        self.parse(description)?;

        let status = Arc::new(PipelineStatus {
            state: Mutex::new(PipelineState::Built),
            changed: Condvar::new(),
            built_on: std::thread::current().id(),
            play_element: Mutex::new(None),
        });
        let bridge = Arc::new(ContextBridge::with_cache(
            HeadlessInterop,
            Arc::clone(&self.gl_handles),
        ));
        let play_contexts = self
            .contexts_on_play
            .load(Ordering::Relaxed)
            .then(|| (Arc::clone(&bridge), Arc::clone(&hooks.host)));

        self.alive.fetch_add(1, Ordering::SeqCst);
        self.builds.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(PipelineHandle {
            hooks,
            status: Arc::clone(&status),
            bridge,
            gl: Arc::clone(&self.gl),
            next_texture: Arc::clone(&self.next_texture),
        });

        Ok(HeadlessPipeline {
            status,
            alive: Arc::clone(&self.alive),
            fail_play: self.fail_play.load(Ordering::Relaxed),
            play_contexts,
        })
    }
}

/// Pipeline object owned by the worker thread.
pub struct HeadlessPipeline {
    status: Arc<PipelineStatus>,
    alive: Arc<AtomicUsize>,
    fail_play: bool,
    play_contexts: Option<(Arc<ContextBridge<HeadlessInterop>>, Arc<dyn Host>)>,
}

impl Pipeline for HeadlessPipeline {
    fn play(&mut self) -> Result<(), SourceError> {
        if let Some((bridge, host)) = &self.play_contexts {
            let element = Arc::new(HeadlessElement::new());
            bridge.handle_request(&**host, &ContextRequest::GlDisplay, &element);
            bridge.handle_request(&**host, &ContextRequest::GlAppContext, &element);
            *self.status.play_element.lock() = Some(element);
        }
        if self.fail_play {
            return Err(SourceError::PipelineState(
                "failed to change state to PLAYING".into(),
            ));
        }
        self.status.set(PipelineState::Playing);
        Ok(())
    }

    fn halt(&mut self) {
        self.status.set(PipelineState::Halted);
    }
}

impl std::fmt::Debug for HeadlessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessPipeline")
            .field("state", &*self.status.state.lock())
            .field("fail_play", &self.fail_play)
            .field("requests_contexts", &self.play_contexts.is_some())
            .finish()
    }
}

impl Drop for HeadlessPipeline {
    fn drop(&mut self) {
        self.status.set(PipelineState::Released);
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test-side handle to a built pipeline: plays the streaming thread and the
/// bus.
#[derive(Clone)]
pub struct PipelineHandle {
    hooks: PipelineHooks,
    status: Arc<PipelineStatus>,
    bridge: Arc<ContextBridge<HeadlessInterop>>,
    gl: Arc<HeadlessGlThread>,
    next_texture: Arc<AtomicU32>,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        *self.status.state.lock()
    }

    /// Thread the pipeline was built on.
    pub fn built_on(&self) -> ThreadId {
        self.status.built_on
    }

    /// Waits up to five seconds for `state`. Returns whether it was reached.
    pub fn wait_for_state(&self, state: PipelineState) -> bool {
        let deadline = Instant::now() + STATE_WAIT;
        let mut current = self.status.state.lock();
        while *current != state {
            if self
                .status
                .changed
                .wait_until(&mut current, deadline)
                .timed_out()
            {
                return *current == state;
            }
        }
        true
    }

    /// Element whose context requests were raised from `play`, if the
    /// backend was set to raise them.
    pub fn play_element(&self) -> Option<Arc<HeadlessElement>> {
        self.status.play_element.lock().clone()
    }

    /// Posts a bus message to the worker loop.
    pub fn post(&self, message: BusMessage) -> bool {
        self.hooks.bus.post(message)
    }

    /// Delivers a `width`x`height` frame from the calling thread. Returns
    /// `None` without delivering unless the pipeline is playing.
    pub fn push_frame(&self, width: u32, height: u32) -> Option<SampleProbe> {
        let (sample, probe) = self.sample(width, height)?;
        self.push(sample);
        Some(probe)
    }

    /// Creates the next frame of this pipeline without delivering it.
    pub fn sample(&self, width: u32, height: u32) -> Option<(HeadlessSample, SampleProbe)> {
        if self.state() != PipelineState::Playing {
            return None;
        }
        let texture = self.next_texture.fetch_add(1, Ordering::Relaxed);
        Some(HeadlessSample::on_thread(
            width,
            height,
            texture,
            Arc::clone(&self.gl),
        ))
    }

    /// Delivers an arbitrary sample from the calling thread.
    pub fn push(&self, sample: HeadlessSample) {
        (self.hooks.on_sample)(Box::new(sample));
    }

    /// Raises a context request from a fresh element, answered with the
    /// host's graphics scope entered.
    pub fn request_context(&self, request: ContextRequest) -> (bool, HeadlessElement) {
        let element = HeadlessElement::new();
        let answered = self
            .bridge
            .handle_request(&*self.hooks.host, &request, &element);
        (answered, element)
    }

    pub fn gl_thread(&self) -> &Arc<HeadlessGlThread> {
        &self.gl
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("state", &self.state())
            .field("built_on", &self.status.built_on)
            .finish()
    }
}
