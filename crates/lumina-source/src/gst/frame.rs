//! GL-memory samples pulled from the appsink.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer_gl as gst_gl;
use gstreamer_gl::prelude::*;
use gstreamer_video as gst_video;

use crate::error::SourceError;
use crate::pipeline::{CopySource, FrameInfo, GlTask, GlTextureId, GlThread, VideoSample};

/// A sample whose buffer lives in GL memory.
pub struct GstVideoSample {
    sample: gst::Sample,
    info: Option<gst_video::VideoInfo>,
    frame: Option<gst_gl::GLVideoFrame<gst_gl::gl_video_frame::Readable>>,
    buffer: Option<gst::Buffer>,
    context: Option<gst_gl::GLContext>,
}

impl GstVideoSample {
    pub fn new(sample: gst::Sample) -> Self {
        let info = sample
            .caps()
            .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok());
        Self {
            sample,
            info,
            frame: None,
            buffer: None,
            context: None,
        }
    }
}

impl VideoSample for GstVideoSample {
    fn info(&self) -> Option<FrameInfo> {
        self.info
            .as_ref()
            .map(|info| FrameInfo::new(info.width(), info.height()))
    }

    fn map_gl(&mut self) -> Result<GlTextureId, SourceError> {
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| SourceError::Map("sample has no video caps".into()))?;
        let buffer = self
            .sample
            .buffer_owned()
            .ok_or_else(|| SourceError::Map("sample has no buffer".into()))?;

        let context = buffer
            .peek_memory(0)
            .downcast_memory_ref::<gst_gl::GLBaseMemory>()
            .map(|memory| memory.context().clone())
            .ok_or_else(|| SourceError::Map("buffer is not GL memory".into()))?;

        let frame = gst_gl::GLVideoFrame::from_buffer_readable(buffer.clone(), info)
            .map_err(|_| SourceError::Map("GL video frame map failed".into()))?;
        let texture = frame
            .texture_id(0)
            .map_err(|e| SourceError::Map(format!("no texture for plane 0: {e}")))?;

        self.frame = Some(frame);
        self.buffer = Some(buffer);
        self.context = Some(context);
        Ok(texture)
    }

    fn unmap(&mut self) {
        self.frame = None;
        self.buffer = None;
    }

    fn is_mapped(&self) -> bool {
        self.frame.is_some()
    }

    fn gl_thread(&self) -> Option<Arc<dyn GlThread>> {
        let context = self.context.clone()?;
        Some(Arc::new(GstGlThread { context }))
    }

    fn copy_source(&self) -> Option<Box<dyn CopySource>> {
        let buffer = self.buffer.clone()?;
        Some(Box::new(GstCopySource { buffer }))
    }
}

/// Copies a GL-memory buffer's first plane into another texture.
pub struct GstCopySource {
    buffer: gst::Buffer,
}

impl CopySource for GstCopySource {
    fn copy_into(&self, target: GlTextureId, info: FrameInfo) -> Result<(), SourceError> {
        let memory = self.buffer.peek_memory(0);
        let gl_memory = memory
            .downcast_memory_ref::<gst_gl::GLMemory>()
            .ok_or_else(|| SourceError::Copy("buffer is not GL memory".into()))?;

        let copied = gl_memory.copy_teximage(
            target,
            gst_gl::GLTextureTarget::_2d,
            gst_gl::GLFormat::Rgba,
            info.width as i32,
            info.height as i32,
        );
        if !copied {
            return Err(SourceError::Copy(format!(
                "copy_teximage into texture {target} failed"
            )));
        }
        Ok(())
    }
}

/// The thread of the GL context that owns a frame's memory.
///
/// `thread_add` always waits for the task, so both dispatch flavours block
/// the caller; neither waits on a GPU fence.
pub struct GstGlThread {
    context: gst_gl::GLContext,
}

impl GlThread for GstGlThread {
    fn dispatch(&self, task: GlTask) {
        self.context.thread_add(move |_context| task());
    }

    fn dispatch_blocking(&self, task: GlTask) {
        self.context.thread_add(move |_context| task());
    }
}
