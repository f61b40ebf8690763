//! Error types for the source bridge.
//!
//! Nothing here crosses a thread boundary: errors are logged where they occur
//! and the source degrades to "no video" (see [`crate::source::VideoSource`]).

/// Errors that can occur while running the pipeline or publishing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The pipeline description could not be turned into a pipeline
    PipelineConstruction(String),
    /// A pipeline state change was refused
    PipelineState(String),
    /// The worker thread could not be spawned or died unexpectedly
    Thread(String),
    /// The host could not create or expose a texture
    Texture(String),
    /// No native GPU display/context is current on the calling thread
    ContextUnavailable(String),
    /// A frame's GPU memory could not be mapped
    Map(String),
    /// The GPU-to-GPU copy failed
    Copy(String),
    /// The media backend failed to initialize
    BackendInit(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::PipelineConstruction(msg) => {
                write!(f, "Cannot construct pipeline: {msg}")
            }
            SourceError::PipelineState(msg) => write!(f, "Pipeline state change failed: {msg}"),
            SourceError::Thread(msg) => write!(f, "Pipeline thread error: {msg}"),
            SourceError::Texture(msg) => write!(f, "Host texture error: {msg}"),
            SourceError::ContextUnavailable(msg) => write!(f, "GPU context unavailable: {msg}"),
            SourceError::Map(msg) => write!(f, "Failed to map frame memory: {msg}"),
            SourceError::Copy(msg) => write!(f, "Texture copy failed: {msg}"),
            SourceError::BackendInit(msg) => write!(f, "Media backend init failed: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}
