//! Client-side swapchain: imports memory exported by a [`NativeSwapchain`]
//! and runs the pre-recorded acquire/release transition command buffers.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use xrt_util::error::CompositorError;
use xrt_vk::handle::OpaqueFd;
use xrt_vk::{CmdPool, VkBundle};

use crate::image::{derive_image_usage, SwapchainCreateInfo, SwapchainImage};
use crate::native::ImageState;

struct ImportedImage {
    image: SwapchainImage,
    device_memory: vk::DeviceMemory,
    acquire_cmd: vk::CommandBuffer,
    release_cmd: vk::CommandBuffer,
    state: ImageState,
}

/// A client-visible swapchain backed by imported memory. Acquire and
/// release each run one pre-recorded command buffer that performs the
/// queue-family-ownership transfer and layout transition.
pub struct ClientSwapchain {
    bundle: Arc<VkBundle>,
    cmd_pool: Arc<CmdPool>,
    images: Vec<ImportedImage>,
    create_info: SwapchainCreateInfo,
    acquire_fifo: std::collections::VecDeque<usize>,
}

impl ClientSwapchain {
    /// `handles[i]` is consumed (ownership of the fd transfers into the
    /// Vulkan import call; the driver duplicates what it needs).
    pub fn import(
        bundle: Arc<VkBundle>,
        cmd_pool: Arc<CmdPool>,
        create_info: SwapchainCreateInfo,
        handles: Vec<OpaqueFd>,
    ) -> Result<Self> {
        create_info.validate()?;
        let usage = derive_image_usage(create_info.bits);

        let mut images = Vec::with_capacity(handles.len());
        for handle in handles {
            let (image, device_memory) = import_image(&bundle, &create_info, usage, handle)?;
            let acquire_cmd = record_transition(
                &bundle,
                &cmd_pool,
                image.raw,
                vk::ImageLayout::UNDEFINED,
                acquire_layout_for(&create_info),
                true,
            )?;
            let release_cmd = record_transition(
                &bundle,
                &cmd_pool,
                image.raw,
                acquire_layout_for(&create_info),
                vk::ImageLayout::UNDEFINED,
                false,
            )?;
            images.push(ImportedImage {
                image,
                device_memory,
                acquire_cmd,
                release_cmd,
                state: ImageState::Free,
            });
        }

        let acquire_fifo = (0..images.len()).collect();

        Ok(Self {
            bundle,
            cmd_pool,
            images,
            create_info,
            acquire_fifo,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> &SwapchainImage {
        &self.images[index].image
    }

    /// Submits the pre-recorded acquire transition for the next Free image
    /// and returns its index.
    pub fn acquire(&mut self) -> Result<usize> {
        let pos = self
            .acquire_fifo
            .iter()
            .position(|&idx| self.images[idx].state == ImageState::Free)
            .ok_or_else(|| CompositorError::ShortRead("no free client swapchain image".into()))?;
        let idx = self.acquire_fifo.remove(pos).unwrap();

        let fence = self.submit_transition(self.images[idx].acquire_cmd)?;
        self.wait_and_destroy_fence(fence)?;

        self.images[idx].state = ImageState::Acquired;
        Ok(idx)
    }

    pub fn mark_waited(&mut self, index: usize) {
        self.images[index].state = ImageState::Waited;
    }

    /// Submits the pre-recorded release transition. Idempotent once per
    /// wait: releasing a non-Waited image is a no-op.
    pub fn release(&mut self, index: usize) -> Result<()> {
        if self.images[index].state != ImageState::Waited {
            return Ok(());
        }
        let fence = self.submit_transition(self.images[index].release_cmd)?;
        self.wait_and_destroy_fence(fence)?;
        self.images[index].state = ImageState::Free;
        self.acquire_fifo.push_back(index);
        Ok(())
    }

    fn submit_transition(&self, cmd: vk::CommandBuffer) -> Result<vk::Fence> {
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe {
            self.bundle
                .device()
                .create_fence(&fence_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(cmd);
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&cmd_info));
        self.bundle.submit(std::slice::from_ref(&submit_info), fence)?;
        Ok(fence)
    }

    fn wait_and_destroy_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe {
            self.bundle
                .device()
                .wait_for_fences(&[fence], true, 1_000_000_000)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("waiting on client swapchain transition fence")?;
            self.bundle.device().destroy_fence(fence, None);
        }
        Ok(())
    }
}

impl Drop for ClientSwapchain {
    fn drop(&mut self) {
        for imported in &self.images {
            unsafe {
                self.bundle
                    .device()
                    .free_command_buffers(self.cmd_pool.raw(), &[imported.acquire_cmd, imported.release_cmd]);
                for view in imported
                    .image
                    .views_alpha
                    .iter()
                    .chain(imported.image.views_no_alpha.iter())
                {
                    self.bundle.device().destroy_image_view(*view, None);
                }
                self.bundle.device().destroy_image(imported.image.raw, None);
                self.bundle.device().free_memory(imported.device_memory, None);
            }
        }
    }
}

fn acquire_layout_for(create_info: &SwapchainCreateInfo) -> vk::ImageLayout {
    if create_info.bits.depth_stencil {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    }
}

fn import_image(
    bundle: &Arc<VkBundle>,
    create_info: &SwapchainCreateInfo,
    usage: vk::ImageUsageFlags,
    handle: OpaqueFd,
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
            .context("vkCreateImage (import)")?
    };

    let requirements = unsafe { bundle.device().get_image_memory_requirements(raw) };

    // fd ownership transfers into vkAllocateMemory; the driver takes its own reference.
    let raw_fd = handle.into_raw();
    let mut import_info = vk::ImportMemoryFdInfoKHR::default()
        .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD)
        .fd(raw_fd);
    let memory_type_index = find_device_local_memory_type(bundle, requirements.memory_type_bits)
        .context("no device-local memory type supports this imported image")?;
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index)
        .push_next(&mut import_info);

    let device_memory = unsafe {
        bundle
            .device()
            .allocate_memory(&alloc_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))
            .context("vkAllocateMemory (import)")?
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

fn find_device_local_memory_type(bundle: &Arc<VkBundle>, type_bits: u32) -> Option<u32> {
    let props = unsafe { bundle.instance().get_physical_device_memory_properties(bundle.physical_device()) };
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
    })
}

/// Records an acquire or release transition. Acquire moves the image from
/// the external queue family into ours and into its attachment layout;
/// release moves it back out to the external queue family and drops the
/// layout to `UNDEFINED`/transfer so the native side can take it over.
fn record_transition(
    bundle: &Arc<VkBundle>,
    cmd_pool: &CmdPool,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    acquiring: bool,
) -> Result<vk::CommandBuffer> {
    let (src_queue_family_index, dst_queue_family_index) = if acquiring {
        (vk::QUEUE_FAMILY_EXTERNAL, bundle.queue_family_index())
    } else {
        (bundle.queue_family_index(), vk::QUEUE_FAMILY_EXTERNAL)
    };

    let cmd = cmd_pool.begin(vk::CommandBufferUsageFlags::empty())?;

    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(src_queue_family_index)
        .dst_queue_family_index(dst_queue_family_index)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        });
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));

    unsafe {
        bundle.device().cmd_pipeline_barrier2(cmd, &dependency_info);
        bundle
            .device()
            .end_command_buffer(cmd)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_layout_depends_on_usage_bits() {
        let color = SwapchainCreateInfo {
            format: vk::Format::B8G8R8A8_SRGB,
            bits: crate::image::SwapchainUsageBits::COLOR,
            sample_count: 1,
            width: 4,
            height: 4,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
            create_flags: Default::default(),
        };
        assert_eq!(acquire_layout_for(&color), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = SwapchainCreateInfo {
            bits: crate::image::SwapchainUsageBits::DEPTH_STENCIL,
            ..color
        };
        assert_eq!(
            acquire_layout_for(&depth),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }
}
