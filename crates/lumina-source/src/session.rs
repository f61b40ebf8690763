//! Per-source state shared between the host thread, the worker thread and
//! the pipeline's streaming thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handoff::FrameSlot;
use crate::host::{Effect, Host, HostTexture};
use crate::pipeline::{FrameInfo, VideoSample};
use crate::publisher::{CopyJob, TexturePublisher};
use crate::settings::CopyMode;
use crate::stats::SessionStats;

/// Shared state of one source instance.
pub struct Session {
    host: Arc<dyn Host>,
    slot: Mutex<FrameSlot>,
    publisher: TexturePublisher,
    width: AtomicU32,
    height: AtomicU32,
    blocking_copy: AtomicBool,
    stats: Arc<SessionStats>,
}

impl Session {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            slot: Mutex::new(FrameSlot::new()),
            publisher: TexturePublisher::new(),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            blocking_copy: AtomicBool::new(false),
            stats: Arc::new(SessionStats::new()),
        }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    pub fn set_copy_mode(&self, mode: CopyMode) {
        self.blocking_copy
            .store(mode == CopyMode::Blocking, Ordering::Relaxed);
    }

    pub fn copy_mode(&self) -> CopyMode {
        if self.blocking_copy.load(Ordering::Relaxed) {
            CopyMode::Blocking
        } else {
            CopyMode::Detached
        }
    }

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Relaxed)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Relaxed)
    }

    /// Handles one decoded frame. Runs on the pipeline's streaming thread.
    ///
    /// The frame replaces the held sample, the host texture is (re)created
    /// if its size changed, and the copy is marshalled onto the sample's GL
    /// thread. Arrivals are serialized by the streaming thread, so creation
    /// and copy for one frame are submitted before the next frame is seen.
    pub fn on_new_sample(&self, sample: Box<dyn VideoSample>) {
        let count = self.stats.record_frame();

        let info = match sample.info() {
            Some(info) if info.width > 0 && info.height > 0 => info,
            _ => {
                self.stats.record_drop("sample has no usable video info");
                return;
            }
        };
        if count == 1 {
            tracing::info!("First frame: {}x{}", info.width, info.height);
        }

        let (source, gl_thread) = {
            let mut slot = self.slot.lock();
            if let Err(e) = slot.replace(sample) {
                self.stats.record_drop(&e.to_string());
                return;
            }
            match slot.sample() {
                Some(sample) => (sample.copy_source(), sample.gl_thread()),
                None => (None, None),
            }
        };
        let (Some(source), Some(gl_thread)) = (source, gl_thread) else {
            self.stats.record_drop("sample is not backed by GL memory");
            return;
        };

        let published = self.publisher.publish(&*self.host, info);
        // The reported size always matches the texture `render` binds. A
        // failed recreation has already destroyed the old texture.
        self.store_size(self.publisher.published().map(|p| p.info));
        let target = match published {
            Ok((target, created)) => {
                if created {
                    self.stats.record_texture_created();
                }
                target
            }
            Err(e) => {
                self.stats.record_drop(&e.to_string());
                return;
            }
        };

        CopyJob::new(source, target, Arc::clone(&self.stats))
            .submit(&*gl_thread, self.copy_mode());
    }

    /// Binds the published texture to `effect`. No-op before the first
    /// frame.
    pub fn render(&self, effect: &mut dyn Effect) -> bool {
        self.publisher.render(effect)
    }

    pub fn texture(&self) -> Option<HostTexture> {
        self.publisher.texture()
    }

    pub fn frame_info(&self) -> Option<FrameInfo> {
        self.publisher.published().map(|p| p.info)
    }

    /// Drops the held frame and the host texture and resets the size.
    ///
    /// Only call once no streaming thread can deliver frames any more.
    pub fn clear(&self) {
        self.slot.lock().release();
        self.publisher.release(&*self.host);
        self.store_size(None);
    }

    fn store_size(&self, info: Option<FrameInfo>) {
        let (width, height) = info.map_or((0, 0), |info| (info.width, info.height));
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("texture", &self.texture())
            .field("copy_mode", &self.copy_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessEffect, HeadlessHost, HeadlessSample};
    use crate::publisher::IMAGE_PARAM;

    fn session() -> (Arc<HeadlessHost>, Session) {
        let host = HeadlessHost::new();
        let session = Session::new(host.clone());
        session.set_copy_mode(CopyMode::Blocking);
        (host, session)
    }

    #[test]
    fn test_sample_publishes_and_copies() {
        let (host, session) = session();
        let (sample, probe) = HeadlessSample::new(640, 480, 42);
        let gl = probe.gl_thread();

        session.on_new_sample(Box::new(sample));

        assert_eq!((session.width(), session.height()), (640, 480));
        let texture = session.texture().expect("texture published");
        let copies = gl.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].source, 42);
        assert_eq!(Some(copies[0].target), host.native_of(texture));
        assert_eq!(copies[0].info, FrameInfo::new(640, 480));

        let mut effect = HeadlessEffect::new();
        assert!(session.render(&mut effect));
        assert_eq!(effect.bound(IMAGE_PARAM), Some(texture));
    }

    #[test]
    fn test_sample_without_info_is_dropped() {
        let (host, session) = session();
        let (sample, probe) = HeadlessSample::new(0, 0, 1);

        session.on_new_sample(Box::new(sample));

        assert_eq!(session.texture(), None);
        assert_eq!(host.live_textures(), 0);
        assert!(probe.is_released());
        assert_eq!(session.stats().snapshot().frames_dropped, 1);
    }

    #[test]
    fn test_map_failure_skips_publish() {
        let (host, session) = session();
        let (sample, probe) = HeadlessSample::new(320, 240, 1);

        session.on_new_sample(Box::new(sample.with_map_failure()));

        assert_eq!(session.texture(), None);
        assert_eq!(host.live_textures(), 0);
        assert!(probe.gl_thread().copies().is_empty());
        assert_eq!(session.stats().snapshot().frames_dropped, 1);
    }

    #[test]
    fn test_size_follows_published_texture() {
        let (host, session) = session();
        let (first, _probe) = HeadlessSample::new(640, 480, 1);
        session.on_new_sample(Box::new(first));
        let texture = session.texture().expect("texture published");

        let (larger, _) = HeadlessSample::new(1280, 720, 2);
        session.on_new_sample(Box::new(larger.with_map_failure()));
        assert_eq!((session.width(), session.height()), (640, 480));
        assert_eq!(session.texture(), Some(texture));
        assert_eq!(host.texture_size(texture), Some((640, 480)));

        // The old texture is gone once recreation has started.
        host.refuse_textures(true);
        let (refused, _) = HeadlessSample::new(1920, 1080, 3);
        session.on_new_sample(Box::new(refused));
        assert_eq!((session.width(), session.height()), (0, 0));
        assert_eq!(session.texture(), None);
        assert_eq!(session.stats().snapshot().frames_dropped, 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let (host, session) = session();
        let (sample, probe) = HeadlessSample::new(320, 240, 9);
        session.on_new_sample(Box::new(sample));
        assert_eq!(host.live_textures(), 1);

        session.clear();

        assert_eq!((session.width(), session.height()), (0, 0));
        assert_eq!(session.texture(), None);
        assert_eq!(host.live_textures(), 0);
        assert!(probe.is_released());
        assert_eq!(host.graphics_depth(), 0);
    }
}
