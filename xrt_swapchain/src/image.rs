//! Swapchain image data model and the usage-derivation table.

use ash::vk;

/// `bits` as the client requests them, independent of any particular
/// graphics API's usage flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainUsageBits {
    pub color: bool,
    pub depth_stencil: bool,
    pub transfer_src: bool,
    pub transfer_dst: bool,
    pub sampled: bool,
    pub unordered_access: bool,
    pub input_attachment: bool,
}

impl SwapchainUsageBits {
    const EMPTY: Self = Self {
        color: false,
        depth_stencil: false,
        transfer_src: false,
        transfer_dst: false,
        sampled: false,
        unordered_access: false,
        input_attachment: false,
    };

    pub const COLOR: Self = Self {
        color: true,
        ..Self::EMPTY
    };

    pub const DEPTH_STENCIL: Self = Self {
        depth_stencil: true,
        ..Self::EMPTY
    };
}

/// Parameters a client supplies when requesting a new swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainCreateInfo {
    pub format: vk::Format,
    pub bits: SwapchainUsageBits,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
    pub create_flags: SwapchainCreateFlags,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwapchainCreateFlags {
    pub static_image: bool,
    pub protected_content: bool,
}

impl SwapchainCreateInfo {
    pub fn validate(&self) -> anyhow::Result<()> {
        use xrt_util::error::CompositorError;
        if self.face_count != 1 && self.face_count != 6 {
            return Err(CompositorError::SchemaMismatch(format!(
                "face_count must be 1 or 6, got {}",
                self.face_count
            ))
            .into());
        }
        if self.array_size == 0 {
            return Err(CompositorError::SchemaMismatch("array_size must be >= 1".into()).into());
        }
        if self.mip_count == 0 {
            return Err(CompositorError::SchemaMismatch("mip_count must be >= 1".into()).into());
        }
        Ok(())
    }
}

/// Derives the Vulkan image usage flags from the requested `bits`.
/// `SAMPLED` is always added so the compositor can sample the image
/// regardless of what the client asked for.
pub fn derive_image_usage(bits: SwapchainUsageBits) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::SAMPLED;
    if bits.color {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
    }
    if bits.depth_stencil {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
    }
    if bits.transfer_src {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if bits.transfer_dst {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if bits.sampled {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if bits.unordered_access {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if bits.input_attachment {
        usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    usage
}

/// A single swapchain image and its fixed view family: the set of views is
/// fixed at creation and lives exactly as long as the image.
pub struct SwapchainImage {
    pub raw: vk::Image,
    pub views_alpha: Vec<vk::ImageView>,
    pub views_no_alpha: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub array_size: u32,
    pub mip_count: u32,
}

impl SwapchainImage {
    pub fn dimensions_match(&self, other: &SwapchainImage) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.array_size == other.array_size
            && self.mip_count == other.mip_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_usage_always_includes_sampled() {
        let usage = derive_image_usage(SwapchainUsageBits::COLOR);
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn depth_stencil_usage_maps_correctly() {
        let usage = derive_image_usage(SwapchainUsageBits::DEPTH_STENCIL);
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[test]
    fn invalid_face_count_is_rejected() {
        let info = SwapchainCreateInfo {
            format: vk::Format::B8G8R8A8_SRGB,
            bits: SwapchainUsageBits::COLOR,
            sample_count: 1,
            width: 800,
            height: 600,
            face_count: 3,
            array_size: 1,
            mip_count: 1,
            create_flags: SwapchainCreateFlags::default(),
        };
        assert!(info.validate().is_err());
    }
}
