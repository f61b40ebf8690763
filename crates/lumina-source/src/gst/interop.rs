//! EGL display and context wrapping for GStreamer GL elements.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_gl as gst_gl;
use gstreamer_gl::prelude::*;
use gstreamer_gl_egl as gst_gl_egl;

use crate::error::SourceError;
use crate::gl_bridge::GlInterop;
use crate::host::NativeHandle;
use crate::pipeline::{GL_APP_CONTEXT_TYPE, GL_DISPLAY_CONTEXT_TYPE};

/// Wraps the host's current EGL handles into `GstGLDisplay`/`GstGLContext`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GstGlInterop;

impl GlInterop for GstGlInterop {
    type Display = gst_gl::GLDisplay;
    type Context = gst_gl::GLContext;
    type Target = gst::Element;

    fn wrap_display(&self, native: NativeHandle) -> Result<gst_gl::GLDisplay, SourceError> {
        // SAFETY: `native` is the EGLDisplay current on this thread, queried
        // inside the host graphics scope. The host keeps it alive for the
        // life of the process.
        let display = unsafe { gst_gl_egl::GLDisplayEGL::with_egl_display(native.as_raw()) }
            .map_err(|e| SourceError::ContextUnavailable(format!("EGL display wrap: {e}")))?;
        Ok(display.upcast())
    }

    fn wrap_context(
        &self,
        display: &gst_gl::GLDisplay,
        native: NativeHandle,
    ) -> Result<gst_gl::GLContext, SourceError> {
        // SAFETY: `native` is the host's EGLContext current on this thread.
        // Wrapped contexts do not take ownership of the native handle.
        let context = unsafe {
            gst_gl::GLContext::new_wrapped(
                display,
                native.as_raw(),
                gst_gl::GLPlatform::EGL,
                gst_gl::GLAPI::OPENGL,
            )
        }
        .ok_or_else(|| SourceError::ContextUnavailable("EGL context wrap failed".into()))?;

        context
            .activate(true)
            .map_err(|e| SourceError::ContextUnavailable(format!("activate: {e}")))?;
        context
            .fill_info()
            .map_err(|e| SourceError::ContextUnavailable(format!("fill_info: {e}")))?;
        Ok(context)
    }

    fn attach_display(&self, target: &gst::Element, display: &gst_gl::GLDisplay) {
        let mut context = gst::Context::new(GL_DISPLAY_CONTEXT_TYPE, true);
        if let Some(context) = context.get_mut() {
            context.set_gl_display(display);
        }
        target.set_context(&context);
    }

    fn attach_context(&self, target: &gst::Element, gl_context: &gst_gl::GLContext) {
        let mut context = gst::Context::new(GL_APP_CONTEXT_TYPE, true);
        if let Some(context) = context.get_mut() {
            context.structure_mut().set("context", gl_context);
        }
        target.set_context(&context);
    }
}
