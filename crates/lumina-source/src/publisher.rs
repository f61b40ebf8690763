//! Host-visible texture publishing.
//!
//! The publisher keeps one host texture sized to the latest frame and
//! recreates it only when the frame dimensions change. Pixels reach it
//! through a [`CopyJob`] that runs on the pipeline's GL thread.
//!
//! # Locking
//!
//! `state` is taken before entering the host graphics scope; `visible` is
//! only ever written inside the graphics scope and is the only lock
//! [`TexturePublisher::render`] takes. The host calls `render` while it
//! holds its own graphics scope, so `render` must never wait on `state`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SourceError;
use crate::host::{Effect, GraphicsGuard, Host, HostTexture, TextureDesc};
use crate::pipeline::{CopySource, FrameInfo, GlTextureId, GlThread};
use crate::settings::CopyMode;
use crate::stats::SessionStats;

/// Effect parameter the frame texture is bound to.
pub const IMAGE_PARAM: &str = "image";

/// The texture currently published to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedTexture {
    pub texture: HostTexture,
    /// GL name backing `texture`; the copy destination.
    pub native: GlTextureId,
    pub info: FrameInfo,
}

/// Owns the host texture for one session.
#[derive(Debug, Default)]
pub struct TexturePublisher {
    state: Mutex<Option<PublishedTexture>>,
    visible: Mutex<Option<HostTexture>>,
}

impl TexturePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure a texture of `info`'s size exists and returns it.
    ///
    /// Same-size frames reuse the existing texture object. Otherwise the old
    /// texture is destroyed and a new dynamic RGBA texture is created; the
    /// bool in the result is true in that case. Enters the host graphics
    /// scope only around creation and the native handle read.
    pub fn publish(
        &self,
        host: &dyn Host,
        info: FrameInfo,
    ) -> Result<(PublishedTexture, bool), SourceError> {
        let mut state = self.state.lock();
        if let Some(current) = *state {
            if current.info == info {
                return Ok((current, false));
            }
        }

        let _graphics = GraphicsGuard::enter(host);

        if let Some(old) = state.take() {
            *self.visible.lock() = None;
            host.destroy_texture(old.texture);
            tracing::debug!(
                "Destroyed {}x{} host texture {:?}",
                old.info.width,
                old.info.height,
                old.texture
            );
        }

        let texture = host
            .create_texture(&TextureDesc::dynamic_rgba(info.width, info.height))
            .ok_or_else(|| {
                SourceError::Texture(format!(
                    "host refused a {}x{} texture",
                    info.width, info.height
                ))
            })?;

        let Some(native) = host.native_texture(texture) else {
            host.destroy_texture(texture);
            return Err(SourceError::Texture(format!(
                "texture {texture:?} has no native GL object"
            )));
        };

        let published = PublishedTexture {
            texture,
            native,
            info,
        };
        *state = Some(published);
        *self.visible.lock() = Some(texture);

        tracing::debug!(
            "Created {}x{} host texture {:?} (GL name {})",
            info.width,
            info.height,
            texture,
            native
        );
        Ok((published, true))
    }

    /// Destroys the published texture, if any.
    pub fn release(&self, host: &dyn Host) {
        let mut state = self.state.lock();
        let Some(old) = state.take() else {
            return;
        };

        let _graphics = GraphicsGuard::enter(host);
        *self.visible.lock() = None;
        host.destroy_texture(old.texture);
        tracing::debug!("Released host texture {:?}", old.texture);
    }

    /// Binds the published texture to the effect's image parameter.
    ///
    /// No-op (returns false) until a texture has been published.
    pub fn render(&self, effect: &mut dyn Effect) -> bool {
        let Some(texture) = *self.visible.lock() else {
            return false;
        };
        if !effect.set_texture(IMAGE_PARAM, texture) {
            tracing::trace!("Effect has no '{}' parameter", IMAGE_PARAM);
            return false;
        }
        true
    }

    /// Texture the host would render right now.
    pub fn texture(&self) -> Option<HostTexture> {
        *self.visible.lock()
    }

    pub fn published(&self) -> Option<PublishedTexture> {
        *self.state.lock()
    }
}

/// A GPU-to-GPU copy of one frame into the published texture.
///
/// Owns everything it touches, so it can run on the GL thread after the
/// streaming thread has moved on to the next sample.
pub struct CopyJob {
    source: Box<dyn CopySource>,
    target: GlTextureId,
    info: FrameInfo,
    stats: Arc<SessionStats>,
}

impl CopyJob {
    pub fn new(
        source: Box<dyn CopySource>,
        target: PublishedTexture,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            source,
            target: target.native,
            info: target.info,
            stats,
        }
    }

    /// Runs the copy on the calling thread.
    pub fn run(self) {
        match self.source.copy_into(self.target, self.info) {
            Ok(()) => tracing::trace!(
                "Copied {}x{} frame into GL texture {}",
                self.info.width,
                self.info.height,
                self.target
            ),
            Err(e) => self.stats.record_copy_failure(&e.to_string()),
        }
    }

    /// Marshals the copy onto `thread`.
    ///
    /// With [`CopyMode::Detached`] there is no fence between the copy and
    /// the host's next read of the texture; a frame may be shown while it
    /// is still being written.
    pub fn submit(self, thread: &dyn GlThread, mode: CopyMode) {
        self.stats.record_copy_dispatched();
        let task = Box::new(move || self.run());
        match mode {
            CopyMode::Detached => thread.dispatch(task),
            CopyMode::Blocking => thread.dispatch_blocking(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessEffect, HeadlessHost};

    #[test]
    fn test_same_size_reuses_texture() {
        let host = HeadlessHost::new();
        let publisher = TexturePublisher::new();

        let (first, created) = publisher.publish(&*host, FrameInfo::new(640, 480)).unwrap();
        assert!(created);
        let (second, created) = publisher.publish(&*host, FrameInfo::new(640, 480)).unwrap();
        assert!(!created);
        assert_eq!(first.texture, second.texture);
        assert_eq!(host.live_textures(), 1);
        assert_eq!(host.graphics_depth(), 0);
    }

    #[test]
    fn test_resize_recreates_texture() {
        let host = HeadlessHost::new();
        let publisher = TexturePublisher::new();

        let (small, _) = publisher.publish(&*host, FrameInfo::new(640, 480)).unwrap();
        let (large, created) = publisher.publish(&*host, FrameInfo::new(1280, 720)).unwrap();
        assert!(created);
        assert_ne!(small.texture, large.texture);
        assert!(!host.is_live(small.texture));
        assert_eq!(host.texture_size(large.texture), Some((1280, 720)));
        assert_eq!(host.live_textures(), 1);
    }

    #[test]
    fn test_textures_only_touched_inside_graphics() {
        let host = HeadlessHost::new();
        let publisher = TexturePublisher::new();
        publisher.publish(&*host, FrameInfo::new(320, 240)).unwrap();
        publisher.publish(&*host, FrameInfo::new(640, 480)).unwrap();
        publisher.release(&*host);
        assert_eq!(host.calls_outside_graphics(), 0);
        assert_eq!(host.live_textures(), 0);
    }

    #[test]
    fn test_render_before_publish_is_noop() {
        let host = HeadlessHost::new();
        let publisher = TexturePublisher::new();
        let mut effect = HeadlessEffect::new();

        assert!(!publisher.render(&mut effect));
        assert_eq!(effect.bound(IMAGE_PARAM), None);

        let (published, _) = publisher.publish(&*host, FrameInfo::new(8, 8)).unwrap();
        assert!(publisher.render(&mut effect));
        assert_eq!(effect.bound(IMAGE_PARAM), Some(published.texture));
    }

    #[test]
    fn test_texture_creation_failure() {
        let host = HeadlessHost::new();
        host.refuse_textures(true);
        let publisher = TexturePublisher::new();

        let err = publisher
            .publish(&*host, FrameInfo::new(64, 64))
            .unwrap_err();
        assert!(matches!(err, SourceError::Texture(_)));
        assert_eq!(publisher.texture(), None);
        assert_eq!(host.graphics_depth(), 0);
    }
}
