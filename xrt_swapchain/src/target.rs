//! Presentation target abstraction: the same renderer drives windowed,
//! direct-to-display, and headless/mock backends behind one trait object.

use anyhow::Result;
use ash::vk;

/// A phase timestamp kind fed into pacing feedback via `mark_timing_point`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPointKind {
    Wake,
    Begin,
    Submit,
}

/// The schedule computed for the next frame by `calc_frame_pacing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacing {
    pub frame_id: u64,
    pub wake_ns: i64,
    pub desired_present_ns: i64,
    pub slop_ns: i64,
    pub predicted_display_ns: i64,
}

/// Outcome of `acquire`/`present`: most failures here are recoverable by
/// rebuilding the target rather than fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// A trait so windowed, direct-to-display and headless/mock backends share
/// one call surface with the renderer.
pub trait Target: Send + Sync {
    /// Chooses a surface/display and creates an OS-level surface.
    fn init_pre_vulkan(&mut self) -> Result<()>;

    /// Creates swapchain images, picks present mode and format. Requires
    /// Vulkan to already be initialized.
    fn init_post_vulkan(&mut self, pref_width: u32, pref_height: u32) -> Result<()>;

    /// Whether image creation may proceed right now (the window might be
    /// hidden or unsized).
    fn check_ready(&self) -> bool;

    /// (Re)creates the target image set.
    fn create_images(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
        usage: vk::ImageUsageFlags,
        present_mode: vk::PresentModeKHR,
    ) -> Result<()>;

    /// True if `acquire`/`present` may be called.
    fn has_images(&self) -> bool;

    /// Blocks briefly; returns the next image index and signals `semaphore`
    /// when it is available.
    fn acquire(&mut self, semaphore: vk::Semaphore) -> Result<(u32, PresentOutcome)>;

    /// Submits a queue-present for `image_idx`, which must be the index
    /// most recently returned by `acquire`.
    fn present(
        &mut self,
        queue: vk::Queue,
        image_idx: u32,
        wait_semaphore: vk::Semaphore,
        desired_present_ns: i64,
        slop_ns: i64,
    ) -> Result<PresentOutcome>;

    /// Computes the next frame's schedule from vblank history.
    fn calc_frame_pacing(&mut self) -> FramePacing;

    /// Records a phase timestamp for pacing feedback.
    fn mark_timing_point(&mut self, kind: TimingPointKind, frame_id: u64, when_ns: i64);

    /// Absorbs any late present/vblank info asynchronously.
    fn update_timings(&mut self);

    fn extent(&self) -> (u32, u32);

    fn format(&self) -> vk::Format;
}

/// A headless target with no OS surface: `acquire`/`present` complete
/// immediately against an internal frame counter. Used by tests and the
/// demo binary's non-interactive mode.
pub struct MockTarget {
    width: u32,
    height: u32,
    format: vk::Format,
    image_count: u32,
    ready: bool,
    images_created: bool,
    next_acquire: u32,
    frame_counter: u64,
    last_wake_ns: i64,
    predicted_frame_interval_ns: i64,
}

impl MockTarget {
    pub fn new(image_count: u32) -> Self {
        Self {
            width: 0,
            height: 0,
            format: vk::Format::B8G8R8A8_SRGB,
            image_count,
            ready: true,
            images_created: false,
            next_acquire: 0,
            frame_counter: 0,
            last_wake_ns: 0,
            predicted_frame_interval_ns: 1_000_000_000 / 90,
        }
    }
}

impl Target for MockTarget {
    fn init_pre_vulkan(&mut self) -> Result<()> {
        Ok(())
    }

    fn init_post_vulkan(&mut self, pref_width: u32, pref_height: u32) -> Result<()> {
        self.width = pref_width;
        self.height = pref_height;
        self.images_created = true;
        Ok(())
    }

    fn check_ready(&self) -> bool {
        self.ready
    }

    fn create_images(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        _color_space: vk::ColorSpaceKHR,
        _usage: vk::ImageUsageFlags,
        _present_mode: vk::PresentModeKHR,
    ) -> Result<()> {
        self.width = width;
        self.height = height;
        self.format = format;
        self.images_created = true;
        Ok(())
    }

    fn has_images(&self) -> bool {
        self.images_created
    }

    fn acquire(&mut self, _semaphore: vk::Semaphore) -> Result<(u32, PresentOutcome)> {
        let idx = self.next_acquire;
        self.next_acquire = (self.next_acquire + 1) % self.image_count;
        Ok((idx, PresentOutcome::Ok))
    }

    fn present(
        &mut self,
        _queue: vk::Queue,
        _image_idx: u32,
        _wait_semaphore: vk::Semaphore,
        _desired_present_ns: i64,
        _slop_ns: i64,
    ) -> Result<PresentOutcome> {
        Ok(PresentOutcome::Ok)
    }

    fn calc_frame_pacing(&mut self) -> FramePacing {
        self.frame_counter += 1;
        let wake_ns = self.last_wake_ns + self.predicted_frame_interval_ns;
        self.last_wake_ns = wake_ns;
        FramePacing {
            frame_id: self.frame_counter,
            wake_ns,
            desired_present_ns: wake_ns + self.predicted_frame_interval_ns / 2,
            slop_ns: self.predicted_frame_interval_ns / 10,
            predicted_display_ns: wake_ns + self.predicted_frame_interval_ns,
        }
    }

    fn mark_timing_point(&mut self, _kind: TimingPointKind, _frame_id: u64, _when_ns: i64) {}

    fn update_timings(&mut self) {}

    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> vk::Format {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_target_frame_id_is_monotonic() {
        let mut target = MockTarget::new(3);
        let a = target.calc_frame_pacing();
        let b = target.calc_frame_pacing();
        let c = target.calc_frame_pacing();
        assert!(a.frame_id < b.frame_id);
        assert!(b.frame_id < c.frame_id);
    }

    #[test]
    fn mock_target_acquire_cycles_through_image_count() {
        let mut target = MockTarget::new(2);
        target.init_post_vulkan(800, 600).unwrap();
        let (first, _) = target.acquire(vk::Semaphore::null()).unwrap();
        let (second, _) = target.acquire(vk::Semaphore::null()).unwrap();
        let (third, _) = target.acquire(vk::Semaphore::null()).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(third, 0);
    }

    #[test]
    fn mock_target_requires_init_post_vulkan_for_images() {
        let target = MockTarget::new(2);
        assert!(!target.has_images());
    }
}
