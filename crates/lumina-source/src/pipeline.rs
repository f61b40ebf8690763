//! Interfaces to the media pipeline.
//!
//! The pipeline is an external collaborator: a [`MediaBackend`] turns a launch
//! description into a [`Pipeline`] that the worker thread owns, and pushes
//! decoded [`VideoSample`]s from its own streaming thread through
//! [`PipelineHooks::on_sample`]. Bus messages are posted into the worker's
//! event loop through [`BusSender`].

use std::sync::Arc;

use crate::error::SourceError;
use crate::host::Host;

/// GL texture name (`GLuint`).
pub type GlTextureId = u32;

/// Context type requested when an element needs a GL display.
pub const GL_DISPLAY_CONTEXT_TYPE: &str = "gst.gl.GLDisplay";
/// Context type requested when an element wants an application GL context
/// to share with.
pub const GL_APP_CONTEXT_TYPE: &str = "gst.gl.app_context";

/// Dimensions of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
}

impl FrameInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A context the pipeline asked for while negotiating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRequest {
    GlDisplay,
    GlAppContext,
    /// Anything we do not answer.
    Other(String),
}

impl ContextRequest {
    pub fn from_context_type(context_type: &str) -> Self {
        match context_type {
            GL_DISPLAY_CONTEXT_TYPE => ContextRequest::GlDisplay,
            GL_APP_CONTEXT_TYPE => ContextRequest::GlAppContext,
            other => ContextRequest::Other(other.to_owned()),
        }
    }
}

/// Bus messages the worker loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Error {
        message: String,
        debug: Option<String>,
    },
    Warning {
        message: String,
        debug: Option<String>,
    },
    Eos,
}

/// Events serviced by the worker thread's loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// First scheduled iteration; releases the caller blocked in `start`.
    Ready,
    Bus(BusMessage),
    Quit,
}

/// Posts bus messages into a worker's event loop. Cheap to clone, usable
/// from any thread.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: crossbeam_channel::Sender<LoopEvent>,
}

impl BusSender {
    pub(crate) fn new(tx: crossbeam_channel::Sender<LoopEvent>) -> Self {
        Self { tx }
    }

    /// Queues `message` for the worker loop. Returns false if the loop has
    /// already exited.
    pub fn post(&self, message: BusMessage) -> bool {
        self.tx.send(LoopEvent::Bus(message)).is_ok()
    }
}

/// Work marshalled onto a GL thread.
pub type GlTask = Box<dyn FnOnce() + Send + 'static>;

/// The dedicated thread on which a GL context is current.
pub trait GlThread: Send + Sync {
    /// Queues `task` and returns without waiting.
    fn dispatch(&self, task: GlTask);

    /// Runs `task` on the GL thread and waits for it to finish.
    fn dispatch_blocking(&self, task: GlTask);
}

/// Handle that can copy a mapped frame's texture into another texture.
///
/// Detached from the sample so the copy can outlive the streaming thread's
/// borrow of the sample.
pub trait CopySource: Send + 'static {
    /// Copies the frame into `target`. Must run on the sample's GL thread.
    fn copy_into(&self, target: GlTextureId, info: FrameInfo) -> Result<(), SourceError>;
}

/// One decoded frame backed by GPU memory.
pub trait VideoSample: Send + 'static {
    /// Frame dimensions from the sample's format description.
    fn info(&self) -> Option<FrameInfo>;

    /// Maps the GPU memory for reading and returns the texture holding the
    /// frame.
    fn map_gl(&mut self) -> Result<GlTextureId, SourceError>;

    fn unmap(&mut self);

    fn is_mapped(&self) -> bool;

    /// GL thread of the context that owns the frame's memory.
    fn gl_thread(&self) -> Option<Arc<dyn GlThread>>;

    /// Returns a copy handle for the mapped frame.
    fn copy_source(&self) -> Option<Box<dyn CopySource>>;
}

/// Called on the pipeline's streaming thread for every decoded frame.
pub type SampleCallback = Arc<dyn Fn(Box<dyn VideoSample>) + Send + Sync>;

/// Everything a backend needs to wire a pipeline to a session.
#[derive(Clone)]
pub struct PipelineHooks {
    pub on_sample: SampleCallback,
    pub bus: BusSender,
    /// Host whose GL context is shared with the pipeline.
    pub host: Arc<dyn Host>,
}

/// A built pipeline. Owned exclusively by the worker thread.
pub trait Pipeline {
    /// Transitions to the running state.
    fn play(&mut self) -> Result<(), SourceError>;

    /// Transitions to the stopped state. Safe to call repeatedly.
    fn halt(&mut self);
}

/// Factory for pipelines.
pub trait MediaBackend: Send + Sync + 'static {
    type Pipeline: Pipeline;

    fn name(&self) -> &'static str;

    /// One-time, process-wide initialization.
    fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Builds a pipeline from a launch description. Called on the worker
    /// thread.
    fn build(&self, description: &str, hooks: PipelineHooks)
        -> Result<Self::Pipeline, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_request_from_type() {
        assert_eq!(
            ContextRequest::from_context_type("gst.gl.GLDisplay"),
            ContextRequest::GlDisplay
        );
        assert_eq!(
            ContextRequest::from_context_type("gst.gl.app_context"),
            ContextRequest::GlAppContext
        );
        assert_eq!(
            ContextRequest::from_context_type("gst.vulkan.instance"),
            ContextRequest::Other("gst.vulkan.instance".into())
        );
    }

    #[test]
    fn test_bus_sender_reports_closed_loop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let bus = BusSender::new(tx);
        assert!(bus.post(BusMessage::Eos));
        assert!(matches!(rx.try_recv(), Ok(LoopEvent::Bus(BusMessage::Eos))));

        drop(rx);
        assert!(!bus.post(BusMessage::Eos));
    }
}
