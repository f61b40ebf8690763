//! GPU context bridge.
//!
//! Answers the pipeline's context requests with wrappers around the host's
//! current native GL display and context, so the pipeline's GL elements
//! share the host's device. The wrappers are created at most once and kept
//! in a [`GlHandleCache`]; backends hold one cache per process so every
//! session's pipeline reuses the same handles.
//!
//! Requests are answered synchronously on whatever thread raised them, with
//! the host graphics scope entered so the host's context is the current one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SourceError;
use crate::host::{GraphicsGuard, Host, NativeHandle};
use crate::pipeline::ContextRequest;

/// Wraps native GL handles into the pipeline's own handle types and hands
/// them to requesting elements.
pub trait GlInterop: Send + Sync + 'static {
    type Display: Clone + Send + 'static;
    type Context: Clone + Send + 'static;
    /// The pipeline element that raised the request.
    type Target;

    fn wrap_display(&self, native: NativeHandle) -> Result<Self::Display, SourceError>;

    /// Wraps `native`, marks it active and fills in its capability and
    /// version info.
    fn wrap_context(
        &self,
        display: &Self::Display,
        native: NativeHandle,
    ) -> Result<Self::Context, SourceError>;

    fn attach_display(&self, target: &Self::Target, display: &Self::Display);

    fn attach_context(&self, target: &Self::Target, context: &Self::Context);
}

/// Lazily created, never torn down wrappers around the host's GL handles.
#[derive(Debug)]
pub struct GlHandleCache<D, C> {
    display: Mutex<Option<D>>,
    context: Mutex<Option<C>>,
    displays_wrapped: AtomicU32,
    contexts_wrapped: AtomicU32,
}

impl<D: Clone, C: Clone> GlHandleCache<D, C> {
    pub fn new() -> Self {
        Self {
            display: Mutex::new(None),
            context: Mutex::new(None),
            displays_wrapped: AtomicU32::new(0),
            contexts_wrapped: AtomicU32::new(0),
        }
    }

    /// Returns the cached display, creating it with `wrap` on first use.
    /// Nothing is cached if `wrap` fails.
    pub fn display_or_try_init(
        &self,
        wrap: impl FnOnce() -> Result<D, SourceError>,
    ) -> Result<D, SourceError> {
        let mut display = self.display.lock();
        if let Some(display) = display.as_ref() {
            return Ok(display.clone());
        }
        let wrapped = wrap()?;
        self.displays_wrapped.fetch_add(1, Ordering::Relaxed);
        *display = Some(wrapped.clone());
        Ok(wrapped)
    }

    /// Returns the cached context, creating it with `wrap` on first use.
    /// Nothing is cached if `wrap` fails.
    pub fn context_or_try_init(
        &self,
        wrap: impl FnOnce() -> Result<C, SourceError>,
    ) -> Result<C, SourceError> {
        let mut context = self.context.lock();
        if let Some(context) = context.as_ref() {
            return Ok(context.clone());
        }
        let wrapped = wrap()?;
        self.contexts_wrapped.fetch_add(1, Ordering::Relaxed);
        *context = Some(wrapped.clone());
        Ok(wrapped)
    }

    pub fn display(&self) -> Option<D> {
        self.display.lock().clone()
    }

    pub fn context(&self) -> Option<C> {
        self.context.lock().clone()
    }

    /// Number of displays ever wrapped (0 or 1).
    pub fn displays_wrapped(&self) -> u32 {
        self.displays_wrapped.load(Ordering::Relaxed)
    }

    /// Number of contexts ever wrapped (0 or 1).
    pub fn contexts_wrapped(&self) -> u32 {
        self.contexts_wrapped.load(Ordering::Relaxed)
    }
}

impl<D: Clone, C: Clone> Default for GlHandleCache<D, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle cache type for an interop.
pub type InteropCache<I> = GlHandleCache<<I as GlInterop>::Display, <I as GlInterop>::Context>;

/// Answers context requests from pipeline elements.
pub struct ContextBridge<I: GlInterop> {
    interop: I,
    cache: Arc<InteropCache<I>>,
}

impl<I: GlInterop> ContextBridge<I> {
    /// Creates a bridge that shares `cache` with every other bridge built
    /// from it.
    pub fn with_cache(interop: I, cache: Arc<InteropCache<I>>) -> Self {
        Self { interop, cache }
    }

    pub fn cache(&self) -> &Arc<InteropCache<I>> {
        &self.cache
    }

    pub fn interop(&self) -> &I {
        &self.interop
    }

    /// Answers `request` raised by `target`. Returns true if a context was
    /// attached.
    ///
    /// When the host has no current native display or context nothing is
    /// wrapped, cached or attached; the element then falls back to its own
    /// context or fails and posts an error. A later request retries.
    pub fn handle_request(
        &self,
        host: &dyn Host,
        request: &ContextRequest,
        target: &I::Target,
    ) -> bool {
        if let ContextRequest::Other(context_type) = request {
            tracing::trace!("Ignoring context request '{}'", context_type);
            return false;
        }

        let _graphics = GraphicsGuard::enter(host);
        let result = match request {
            ContextRequest::GlDisplay => self.display(host).map(|display| {
                self.interop.attach_display(target, &display);
            }),
            ContextRequest::GlAppContext => self.context(host).map(|context| {
                self.interop.attach_context(target, &context);
            }),
            ContextRequest::Other(_) => return false,
        };

        match result {
            Ok(()) => {
                tracing::debug!("Answered {:?} context request", request);
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    fn display(&self, host: &dyn Host) -> Result<I::Display, SourceError> {
        self.cache.display_or_try_init(|| {
            let native = host.current_display().ok_or_else(|| {
                SourceError::ContextUnavailable("host has no current GL display".into())
            })?;
            let display = self.interop.wrap_display(native)?;
            tracing::info!("Wrapped host GL display {:#x}", native.as_raw());
            Ok(display)
        })
    }

    fn context(&self, host: &dyn Host) -> Result<I::Context, SourceError> {
        let display = self.display(host)?;
        self.cache.context_or_try_init(|| {
            let native = host.current_context().ok_or_else(|| {
                SourceError::ContextUnavailable("host has no current GL context".into())
            })?;
            let context = self.interop.wrap_context(&display, native)?;
            tracing::info!("Wrapped host GL context {:#x}", native.as_raw());
            Ok(context)
        })
    }
}
