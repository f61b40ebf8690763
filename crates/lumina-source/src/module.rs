//! Source registration.

use crate::error::SourceError;
use crate::pipeline::MediaBackend;
use crate::source::SOURCE_NAME;

/// Registration id of the source type.
pub const SOURCE_ID: &str = "wpe-source";

/// Kind of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Input,
    Filter,
    Transition,
}

/// Capability flags the host reads from [`SourceInfo::output_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFlags(u32);

impl OutputFlags {
    pub const VIDEO: Self = Self(1 << 0);
    pub const AUDIO: Self = Self(1 << 1);
    pub const INTERACTION: Self = Self(1 << 5);
    pub const DO_NOT_DUPLICATE: Self = Self(1 << 7);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OutputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What the host needs to list and instantiate the source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: SourceKind,
    pub output_flags: OutputFlags,
}

impl SourceInfo {
    /// Descriptor for the WPE video source. Audio is not wired up.
    pub const fn wpe() -> Self {
        Self {
            id: SOURCE_ID,
            name: SOURCE_NAME,
            kind: SourceKind::Input,
            output_flags: OutputFlags(
                OutputFlags::VIDEO.0 | OutputFlags::DO_NOT_DUPLICATE.0 | OutputFlags::INTERACTION.0,
            ),
        }
    }
}

/// Module entry point: logs the build and initializes the media backend.
///
/// Returns the descriptor to register.
pub fn module_load<B: MediaBackend>(backend: &B) -> Result<SourceInfo, SourceError> {
    tracing::info!(
        "lumina-source build: {} ({} backend)",
        env!("CARGO_PKG_VERSION"),
        backend.name()
    );
    backend.init()?;
    Ok(SourceInfo::wpe())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;

    #[test]
    fn test_wpe_source_info() {
        let info = SourceInfo::wpe();
        assert_eq!(info.id, "wpe-source");
        assert_eq!(info.kind, SourceKind::Input);
        assert!(info.output_flags.contains(OutputFlags::VIDEO));
        assert!(info.output_flags.contains(OutputFlags::DO_NOT_DUPLICATE));
        assert!(info.output_flags.contains(OutputFlags::INTERACTION));
        assert!(!info.output_flags.contains(OutputFlags::AUDIO));
    }

    #[test]
    fn test_module_load_initializes_backend() {
        let backend = HeadlessBackend::new();
        assert_eq!(module_load(&backend).unwrap(), SourceInfo::wpe());
        assert_eq!(backend.init_calls(), 1);

        backend.fail_init(true);
        assert!(matches!(
            module_load(&backend),
            Err(SourceError::BackendInit(_))
        ));
    }
}
