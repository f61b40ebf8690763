//! Single-slot frame handoff between the pipeline's streaming thread and
//! the session.
//!
//! Latest frame wins: storing a new sample unmaps and releases the previous
//! one. Whoever holds the slot owns the unmap/release duty, so dropping the
//! slot cleans up too.

use crate::error::SourceError;
use crate::pipeline::{GlTextureId, VideoSample};

/// Holds the most recent sample and its mapped texture.
#[derive(Default)]
pub struct FrameSlot {
    current: Option<Box<dyn VideoSample>>,
    texture: Option<GlTextureId>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held sample with `sample` and maps it for GL reads.
    ///
    /// The previous sample is unmapped (if mapped) and released first. The
    /// new sample is kept even when mapping fails, so it is released on the
    /// next arrival like any other.
    pub fn replace(&mut self, sample: Box<dyn VideoSample>) -> Result<GlTextureId, SourceError> {
        self.release();

        let sample = self.current.insert(sample);
        let texture = sample.map_gl()?;
        self.texture = Some(texture);
        Ok(texture)
    }

    /// Unmaps and drops the held sample.
    pub fn release(&mut self) {
        self.texture = None;
        if let Some(mut sample) = self.current.take() {
            if sample.is_mapped() {
                sample.unmap();
            }
        }
    }

    pub fn sample(&self) -> Option<&dyn VideoSample> {
        self.current.as_deref()
    }

    /// GL texture of the mapped sample, if mapping succeeded.
    pub fn texture(&self) -> Option<GlTextureId> {
        self.texture
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("holding", &self.current.is_some())
            .field("texture", &self.texture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessSample;

    #[test]
    fn test_replace_releases_previous() {
        let mut slot = FrameSlot::new();
        let (first, first_probe) = HeadlessSample::new(640, 480, 11);
        let (second, second_probe) = HeadlessSample::new(640, 480, 12);

        assert_eq!(slot.replace(Box::new(first)).unwrap(), 11);
        assert!(first_probe.is_mapped());
        assert!(!first_probe.is_released());

        assert_eq!(slot.replace(Box::new(second)).unwrap(), 12);
        assert!(!first_probe.is_mapped());
        assert!(first_probe.is_released());
        assert_eq!(first_probe.unmap_count(), 1);
        assert!(second_probe.is_mapped());
        assert_eq!(slot.texture(), Some(12));
    }

    #[test]
    fn test_map_failure_still_owns_sample() {
        let mut slot = FrameSlot::new();
        let (broken, broken_probe) = HeadlessSample::new(320, 240, 5);
        let broken = broken.with_map_failure();

        assert!(matches!(
            slot.replace(Box::new(broken)),
            Err(SourceError::Map(_))
        ));
        assert!(!slot.is_empty());
        assert_eq!(slot.texture(), None);

        let (next, _) = HeadlessSample::new(320, 240, 6);
        slot.replace(Box::new(next)).unwrap();
        assert!(broken_probe.is_released());
        // Never mapped, so never unmapped.
        assert_eq!(broken_probe.unmap_count(), 0);
    }

    #[test]
    fn test_drop_releases_held_sample() {
        let (sample, probe) = HeadlessSample::new(16, 16, 1);
        {
            let mut slot = FrameSlot::new();
            slot.replace(Box::new(sample)).unwrap();
        }
        assert!(probe.is_released());
        assert_eq!(probe.unmap_count(), 1);
    }
}
