//! Interfaces to the host compositor.
//!
//! The host owns a GL context that is only current inside its graphics scope
//! ([`Host::enter_graphics`] / [`Host::leave_graphics`]). Textures the host
//! renders from must be created and destroyed inside that scope. Use
//! [`GraphicsGuard`] instead of calling enter/leave by hand.

use crate::pipeline::GlTextureId;

/// Opaque, non-null native handle (EGLDisplay, EGLContext, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(usize);

impl NativeHandle {
    /// Wraps a raw handle. Returns `None` for null.
    pub fn new(raw: usize) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Identity of a host texture object.
///
/// Two handles compare equal only if they refer to the same texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTexture(u64);

impl HostTexture {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Texture color format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba,
}

/// Parameters for [`Host::create_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub levels: u32,
    /// Content is rewritten every frame.
    pub dynamic: bool,
}

impl TextureDesc {
    /// Single-level dynamic RGBA texture, the kind video frames land in.
    pub fn dynamic_rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba,
            levels: 1,
            dynamic: true,
        }
    }
}

/// The host side of one source instance.
///
/// Graphics calls (`create_texture`, `destroy_texture`, `native_texture`,
/// `current_display`, `current_context`) are only valid while the graphics
/// scope is entered on the calling thread.
pub trait Host: Send + Sync + 'static {
    /// Makes the host GL context current on this thread (re-entrant).
    fn enter_graphics(&self);

    /// Releases the context taken by [`Host::enter_graphics`].
    fn leave_graphics(&self);

    fn create_texture(&self, desc: &TextureDesc) -> Option<HostTexture>;

    fn destroy_texture(&self, texture: HostTexture);

    /// Returns the GL texture name backing a host texture.
    fn native_texture(&self, texture: HostTexture) -> Option<GlTextureId>;

    /// Native display bound to the current context, if any.
    fn current_display(&self) -> Option<NativeHandle>;

    /// Native rendering context current on this thread, if any.
    fn current_context(&self) -> Option<NativeHandle>;

    /// Tells the host this source has no frame to show.
    fn clear_video(&self);

    /// Whether the source is currently shown in any view.
    fn is_showing(&self) -> bool;
}

/// Shading effect handed to `render`.
pub trait Effect {
    /// Binds `texture` to the named image parameter. Returns false if the
    /// effect has no such parameter.
    fn set_texture(&mut self, param: &str, texture: HostTexture) -> bool;
}

/// Scoped graphics entry. Leaves the graphics scope on drop.
#[must_use = "the graphics scope is left as soon as the guard is dropped"]
pub struct GraphicsGuard<'a> {
    host: &'a dyn Host,
}

impl<'a> GraphicsGuard<'a> {
    pub fn enter(host: &'a dyn Host) -> Self {
        host.enter_graphics();
        Self { host }
    }
}

impl Drop for GraphicsGuard<'_> {
    fn drop(&mut self) {
        self.host.leave_graphics();
    }
}
