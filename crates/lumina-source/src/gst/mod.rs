//! GStreamer backend.
//!
//! Builds the pipeline with `gst::parse::launch`, pulls frames from the
//! `video-sink` appsink as GL memory, and answers `NEED_CONTEXT` bus
//! messages with the host's EGL display and context through a process-wide
//! [`GlHandleCache`].
//!
//! # Requirements
//!
//! - GStreamer 1.20+ with `gst-plugins-base` built with GL/EGL support
//! - `wpevideosrc` (gst-plugins-bad, WPE WebKit) for the default source
//! - A host whose graphics context is EGL-based

mod frame;
mod interop;

use std::sync::{Arc, LazyLock};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use crate::error::SourceError;
use crate::gl_bridge::{ContextBridge, GlHandleCache, InteropCache};
use crate::pipeline::{BusMessage, ContextRequest, MediaBackend, Pipeline, PipelineHooks};
use crate::settings::VIDEO_SINK_NAME;

pub use frame::{GstCopySource, GstGlThread, GstVideoSample};
pub use interop::GstGlInterop;

/// Wrapped host GL handles, shared by every pipeline in the process.
static GL_HANDLES: LazyLock<Arc<InteropCache<GstGlInterop>>> =
    LazyLock::new(|| Arc::new(GlHandleCache::new()));

/// Media backend running real GStreamer pipelines.
#[derive(Debug, Default)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Self {
        Self
    }

    /// The process-wide GL handle cache.
    pub fn gl_handles() -> &'static Arc<InteropCache<GstGlInterop>> {
        &GL_HANDLES
    }
}

impl MediaBackend for GstBackend {
    type Pipeline = GstPipeline;

    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn init(&self) -> Result<(), SourceError> {
        gst::init().map_err(|e| SourceError::BackendInit(format!("GStreamer init failed: {e}")))?;
        tracing::info!("GStreamer {}", gst::version_string());
        Ok(())
    }

    fn build(&self, description: &str, hooks: PipelineHooks) -> Result<GstPipeline, SourceError> {
        let element = gst::parse::launch(description)
            .map_err(|e| SourceError::PipelineConstruction(e.to_string()))?;
        let pipeline = element.downcast::<gst::Pipeline>().map_err(|_| {
            SourceError::PipelineConstruction("description did not produce a pipeline".into())
        })?;

        let appsink = pipeline
            .by_name(VIDEO_SINK_NAME)
            .and_then(|sink| sink.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| {
                SourceError::PipelineConstruction(format!(
                    "no appsink named \"{VIDEO_SINK_NAME}\""
                ))
            })?;

        let on_sample = Arc::clone(&hooks.on_sample);
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    on_sample(Box::new(GstVideoSample::new(sample)));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let bus = pipeline.bus().ok_or_else(|| {
            SourceError::PipelineConstruction("pipeline has no bus".into())
        })?;
        let bridge = ContextBridge::with_cache(GstGlInterop, Arc::clone(&GL_HANDLES));
        bus.set_sync_handler(move |_bus, msg| {
            handle_sync_message(msg, &hooks, &bridge);
            gst::BusSyncReply::Drop
        });

        Ok(GstPipeline { pipeline, bus })
    }
}

/// Runs on whichever thread posted `msg`.
fn handle_sync_message(
    msg: &gst::Message,
    hooks: &PipelineHooks,
    bridge: &ContextBridge<GstGlInterop>,
) {
    match msg.view() {
        gst::MessageView::NeedContext(need) => {
            let Some(element) = msg.src().and_then(|src| src.downcast_ref::<gst::Element>())
            else {
                return;
            };
            let request = ContextRequest::from_context_type(need.context_type());
            bridge.handle_request(&*hooks.host, &request, element);
        }
        gst::MessageView::Error(err) => {
            hooks.bus.post(BusMessage::Error {
                message: err.error().to_string(),
                debug: err.debug().map(|d| d.to_string()),
            });
        }
        gst::MessageView::Warning(warn) => {
            hooks.bus.post(BusMessage::Warning {
                message: warn.error().to_string(),
                debug: warn.debug().map(|d| d.to_string()),
            });
        }
        gst::MessageView::Eos(_) => {
            hooks.bus.post(BusMessage::Eos);
        }
        _ => {}
    }
}

/// A launched pipeline. Lives on the worker thread.
#[derive(Debug)]
pub struct GstPipeline {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
}

impl Pipeline for GstPipeline {
    fn play(&mut self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| SourceError::PipelineState(format!("Failed to start playback: {e}")))
    }

    fn halt(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!("Failed to stop pipeline: {}", e);
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.halt();
        self.bus.unset_sync_handler();
    }
}
