//! lumina-source: GPU texture bridge from a media pipeline into a host
//! compositor.
//!
//! A background worker runs a decode pipeline whose frames land in textures
//! owned by the pipeline's GL context. Each frame is copied GPU-to-GPU into a
//! texture the host created on its own context, and the host binds that
//! texture on its render thread. This crate contains:
//!
//! - Host source contract: [`source`] ([`VideoSource`]), [`module`]
//! - Worker thread and pipeline lifecycle: [`controller`]
//! - GL display/context sharing: [`gl_bridge`]
//! - Frame handoff and texture publishing: [`handoff`], [`publisher`], [`session`]
//! - Collaborator interfaces: [`host`], [`pipeline`]
//! - Configuration: [`settings`], [`properties`]
//! - GPU-free host and backend: `headless` (feature `test-util`)
//! - GStreamer backend: `gst` (feature `gstreamer`)
//!
//! ```text
//! streaming thread             GL thread              host render thread
//! ----------------             ---------              ------------------
//! on_new_sample
//!   FrameSlot::replace (map)
//!   TexturePublisher::publish ───────────────────────▶ (graphics scope)
//!   CopyJob::submit ───────▶  copy_into(host tex)
//!                                                     render: bind "image"
//! ```

pub mod controller;
pub mod error;
pub mod gl_bridge;
pub mod handoff;
#[cfg(any(test, feature = "test-util"))]
pub mod headless;
pub mod host;
pub mod module;
pub mod pipeline;
pub mod properties;
pub mod publisher;
pub mod session;
pub mod settings;
pub mod source;
pub mod stats;

#[cfg(feature = "gstreamer")]
pub mod gst;

pub use error::SourceError;
pub use host::{Effect, Host, HostTexture, NativeHandle, TextureDesc};
pub use module::{module_load, SourceInfo};
pub use pipeline::{BusMessage, FrameInfo, MediaBackend, Pipeline, VideoSample};
pub use settings::{CopyMode, Settings, SharedSettings, SourceConfig};
pub use source::{SourceState, VideoSource};
pub use stats::SessionStatsSnapshot;
