//! Native swapchain: allocates exportable device memory backing a strip of
//! images and produces OS handles for cross-process sharing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use xrt_util::error::{CompositorError, HandleDirection};
use xrt_vk::handle::{HandleKind, OpaqueFd};
use xrt_vk::VkBundle;

use crate::image::{derive_image_usage, SwapchainCreateInfo, SwapchainImage};

/// Per-image Free/Acquired/Waited state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Free,
    Acquired,
    Waited,
}

struct ManagedImage {
    image: SwapchainImage,
    device_memory: vk::DeviceMemory,
}

/// Tracks each image's Free/Acquired/Waited state and FIFO order among
/// acquire waiters, decoupled from the Vulkan objects so the state machine
/// can be exercised without a device.
struct AcquireQueue {
    states: Vec<ImageState>,
    fifo: std::collections::VecDeque<usize>,
}

impl AcquireQueue {
    fn new(image_count: usize) -> Self {
        Self {
            states: vec![ImageState::Free; image_count],
            fifo: (0..image_count).collect(),
        }
    }

    fn try_acquire(&mut self) -> Option<usize> {
        let pos = self.fifo.iter().position(|&idx| self.states[idx] == ImageState::Free)?;
        let idx = self.fifo.remove(pos).unwrap();
        self.states[idx] = ImageState::Acquired;
        Some(idx)
    }

    fn mark_waited(&mut self, index: usize) -> Result<()> {
        if self.states[index] != ImageState::Acquired {
            return Err(CompositorError::SchemaMismatch(format!(
                "image {index} must be Acquired before it can be Waited"
            ))
            .into());
        }
        self.states[index] = ImageState::Waited;
        Ok(())
    }

    fn release(&mut self, index: usize) {
        if self.states[index] == ImageState::Waited {
            self.states[index] = ImageState::Free;
            self.fifo.push_back(index);
        }
    }

    fn acquired_count(&self) -> usize {
        self.states.iter().filter(|&&s| s != ImageState::Free).count()
    }
}

/// Owns exportable memory and exported handles for each image; ref-counted
/// so destruction can be deferred to a garbage-collection tick.
pub struct NativeSwapchain {
    bundle: Arc<VkBundle>,
    images: Vec<ManagedImage>,
    create_info: SwapchainCreateInfo,
    refcount: AtomicUsize,
    acquire_queue: AcquireQueue,
}

impl NativeSwapchain {
    pub fn create(bundle: Arc<VkBundle>, create_info: SwapchainCreateInfo, image_count: usize) -> Result<Self> {
        create_info.validate()?;
        let usage = derive_image_usage(create_info.bits);

        if !format_supports_usage(&bundle, create_info.format, usage) {
            return Err(CompositorError::FormatUnsupported {
                format: format!("{:?}", create_info.format),
                bits: format!("{:?}", create_info.bits),
            }
            .into());
        }

        let depth = create_info.bits.depth_stencil;
        let supported = if depth {
            bundle.supports_external_depth_image(HandleKind::OpaqueFd, HandleDirection::Export)
        } else {
            bundle.supports_external_color_image(HandleKind::OpaqueFd, HandleDirection::Export)
        };
        if !supported {
            return Err(CompositorError::ImportExportUnsupported(format!(
                "({:?}, {:?}, {:?})",
                create_info.format,
                usage,
                HandleKind::OpaqueFd
            ))
            .into());
        }

        let mut images = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            let (image, device_memory) = create_exportable_image(&bundle, &create_info, usage)?;
            images.push(ManagedImage { image, device_memory });
        }

        Ok(Self {
            bundle,
            images,
            create_info,
            refcount: AtomicUsize::new(1),
            acquire_queue: AcquireQueue::new(image_count),
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> &SwapchainImage {
        &self.images[index].image
    }

    pub fn create_info(&self) -> &SwapchainCreateInfo {
        &self.create_info
    }

    /// Returns the lowest-index Free image, FIFO among waiters. Returns
    /// `None` if every image is held.
    pub fn try_acquire(&mut self) -> Option<usize> {
        self.acquire_queue.try_acquire()
    }

    pub fn mark_waited(&mut self, index: usize) -> Result<()> {
        self.acquire_queue.mark_waited(index)
    }

    /// Idempotent once per wait: releasing an image that is not Waited is a
    /// no-op, not an error.
    pub fn release(&mut self, index: usize) {
        self.acquire_queue.release(index)
    }

    pub fn acquired_count(&self) -> usize {
        self.acquire_queue.acquired_count()
    }

    /// Ownership of the fd transfers to the caller on Unix: the caller
    /// closes it.
    pub fn export_handle(&self, image_index: usize) -> Result<OpaqueFd> {
        let memory = self.images[image_index].device_memory;
        let get_fd_info = vk::MemoryGetFdInfoKHR::default()
            .memory(memory)
            .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let external_memory_fd = ash::khr::external_memory_fd::Device::new(self.bundle.instance(), self.bundle.device());
        let fd = unsafe {
            external_memory_fd
                .get_memory_fd(&get_fd_info)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("vkGetMemoryFdKHR")?
        };
        Ok(unsafe { OpaqueFd::from_raw(fd) })
    }

    pub fn acquire_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference; returns true if the refcount reached zero this
    /// call (the compositor should enqueue this swapchain for GC).
    pub fn release_ref(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl Drop for NativeSwapchain {
    fn drop(&mut self) {
        for managed in &self.images {
            unsafe {
                for view in managed.image.views_alpha.iter().chain(managed.image.views_no_alpha.iter()) {
                    self.bundle.device().destroy_image_view(*view, None);
                }
                self.bundle.device().destroy_image(managed.image.raw, None);
                self.bundle.device().free_memory(managed.device_memory, None);
            }
        }
    }
}

fn create_exportable_image(
    bundle: &Arc<VkBundle>,
    create_info: &SwapchainCreateInfo,
    usage: vk::ImageUsageFlags,
) -> Result<(SwapchainImage, vk::DeviceMemory)> {
    let mut external_info =
        vk::ExternalMemoryImageCreateInfo::default().handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(create_info.format)
        .extent(vk::Extent3D {
            width: create_info.width,
            height: create_info.height,
            depth: 1,
        })
        .mip_levels(create_info.mip_count)
        .array_layers(create_info.array_size * create_info.face_count)
        .samples(vk::SampleCountFlags::from_raw(create_info.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .push_next(&mut external_info);

    let raw = unsafe {
        bundle
            .device()
            .create_image(&image_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))
            .context("vkCreateImage (exportable)")?
    };

    let requirements = unsafe { bundle.device().get_image_memory_requirements(raw) };
    let memory_type_index = find_device_local_memory_type(bundle, requirements.memory_type_bits)
        .context("no device-local memory type supports this exportable image")?;

    let mut export_info =
        vk::ExportMemoryAllocateInfo::default().handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
    let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(raw);
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index)
        .push_next(&mut export_info)
        .push_next(&mut dedicated_info);

    let device_memory = unsafe {
        bundle
            .device()
            .allocate_memory(&alloc_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))
            .context("vkAllocateMemory (exportable)")?
    };
    unsafe {
        bundle
            .device()
            .bind_image_memory(raw, device_memory, 0)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
    }

    let (views_alpha, views_no_alpha) = build_view_family(bundle, raw, create_info)?;

    let image = SwapchainImage {
        raw,
        views_alpha,
        views_no_alpha,
        width: create_info.width,
        height: create_info.height,
        format: create_info.format,
        array_size: create_info.array_size,
        mip_count: create_info.mip_count,
    };

    Ok((image, device_memory))
}

/// Builds `views.alpha[L]` and `views.no_alpha[L]` for each array layer:
/// `no_alpha` swizzles `A` to `1.0`.
fn build_view_family(
    bundle: &Arc<VkBundle>,
    image: vk::Image,
    create_info: &SwapchainCreateInfo,
) -> Result<(Vec<vk::ImageView>, Vec<vk::ImageView>)> {
    let aspect = if xrt_vk::resource::format_has_depth(create_info.format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };

    let mut views_alpha = Vec::with_capacity(create_info.array_size as usize);
    let mut views_no_alpha = Vec::with_capacity(create_info.array_size as usize);

    for layer in 0..create_info.array_size {
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: create_info.mip_count,
            base_array_layer: layer,
            layer_count: 1,
        };

        let alpha_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(create_info.format)
            .subresource_range(range);
        let alpha_view = unsafe {
            bundle
                .device()
                .create_image_view(&alpha_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        let no_alpha_info = alpha_info.components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::ONE,
        });
        let no_alpha_view = unsafe {
            bundle
                .device()
                .create_image_view(&no_alpha_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        views_alpha.push(alpha_view);
        views_no_alpha.push(no_alpha_view);
    }

    Ok((views_alpha, views_no_alpha))
}

/// Checks the physical device's optimal-tiling format features against the
/// feature bits implied by `usage`.
fn format_supports_usage(bundle: &Arc<VkBundle>, format: vk::Format, usage: vk::ImageUsageFlags) -> bool {
    let props = unsafe {
        bundle
            .instance()
            .get_physical_device_format_properties(bundle.physical_device(), format)
    };
    let features = props.optimal_tiling_features;

    let mut required = vk::FormatFeatureFlags::empty();
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        required |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        required |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::SAMPLED) {
        required |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::STORAGE) {
        required |= vk::FormatFeatureFlags::STORAGE_IMAGE;
    }

    features.contains(required)
}

fn find_device_local_memory_type(bundle: &Arc<VkBundle>, type_bits: u32) -> Option<u32> {
    let props = unsafe { bundle.instance().get_physical_device_memory_properties(bundle.physical_device()) };
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_follow_free_acquired_waited_free() {
        let mut queue = AcquireQueue::new(2);
        assert_eq!(queue.acquired_count(), 0);

        let idx = queue.try_acquire().unwrap();
        assert_eq!(queue.states[idx], ImageState::Acquired);
        assert_eq!(queue.acquired_count(), 1);

        assert!(queue.mark_waited(idx).is_ok());
        assert_eq!(queue.states[idx], ImageState::Waited);

        queue.release(idx);
        assert_eq!(queue.states[idx], ImageState::Free);
        assert_eq!(queue.acquired_count(), 0);

        // Free again; idx is back in the FIFO and reusable.
        assert_eq!(queue.try_acquire(), Some(idx));
    }

    #[test]
    fn marking_waited_before_acquire_is_rejected() {
        let mut queue = AcquireQueue::new(1);
        assert!(queue.mark_waited(0).is_err());
    }

    #[test]
    fn releasing_an_acquired_but_not_waited_image_is_a_no_op() {
        let mut queue = AcquireQueue::new(1);
        let idx = queue.try_acquire().unwrap();
        queue.release(idx);
        assert_eq!(queue.states[idx], ImageState::Acquired, "release before wait must not free the image");
    }

    #[test]
    fn acquire_is_fifo_among_waiters() {
        let mut queue = AcquireQueue::new(2);
        let first = queue.try_acquire().unwrap();
        let second = queue.try_acquire().unwrap();
        assert!(queue.try_acquire().is_none());

        queue.mark_waited(first).unwrap();
        queue.release(first);
        queue.mark_waited(second).unwrap();
        queue.release(second);

        assert_eq!(queue.try_acquire(), Some(first));
        assert_eq!(queue.try_acquire(), Some(second));
    }
}
