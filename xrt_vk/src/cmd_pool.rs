//! CmdPool: a command pool with its own lock.
//!
//! All operations require the pool's mutex; the convenience wrappers here
//! take-then-release it around each call, collapsed to a single pool per
//! `CmdPool`.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::Mutex;
use xrt_util::error::CompositorError;

use crate::bundle::VkBundle;

struct Inner {
    raw: vk::CommandPool,
}

/// A command pool guarded by its own mutex: a leaf lock. Never acquire this
/// lock while holding `VkBundle`'s queue mutex.
pub struct CmdPool {
    bundle: Arc<VkBundle>,
    inner: Mutex<Inner>,
}

impl CmdPool {
    pub fn new(bundle: Arc<VkBundle>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(bundle.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let raw = unsafe {
            bundle
                .device()
                .create_command_pool(&create_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("vkCreateCommandPool")?
        };
        Ok(Self {
            bundle,
            inner: Mutex::new(Inner { raw }),
        })
    }

    /// Allocates one primary command buffer. Holds the pool lock for the
    /// duration of the call.
    pub fn alloc_primary(&self) -> Result<vk::CommandBuffer> {
        let inner = self.inner.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(inner.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe {
            self.bundle
                .device()
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        Ok(buffers[0])
    }

    /// Allocates and begins a command buffer in one call.
    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> Result<vk::CommandBuffer> {
        let cb = self.alloc_primary()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.bundle
                .device()
                .begin_command_buffer(cb, &begin_info)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }
        Ok(cb)
    }

    /// Submits the given infos via the bundle's queue. Taking the pool lock
    /// here is the caller's responsibility if any `command_buffer_infos`
    /// reference a buffer allocated from this pool.
    pub fn submit(&self, infos: &[vk::SubmitInfo2], fence: vk::Fence) -> Result<()> {
        let _guard = self.inner.lock();
        self.bundle.submit(infos, fence)
    }

    /// Ends `cb`, submits it alone with a fresh fence, waits up to 1s, frees
    /// the command buffer, destroys the fence. Single-shot convenience for
    /// upload/transition work that does not need to be pipelined.
    pub fn end_submit_wait_and_free(&self, cb: vk::CommandBuffer) -> Result<()> {
        let device = self.bundle.device();
        unsafe {
            device
                .end_command_buffer(cb)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }

        let fence = unsafe {
            device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        let cb_info = [vk::CommandBufferSubmitInfo::default().command_buffer(cb)];
        let submit_info = [vk::SubmitInfo2::default().command_buffer_infos(&cb_info)];

        let result = (|| -> Result<()> {
            {
                let _guard = self.inner.lock();
                self.bundle.submit(&submit_info, fence)?;
            }
            unsafe {
                device
                    .wait_for_fences(&[fence], true, 1_000_000_000)
                    .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
            }
            Ok(())
        })();

        unsafe {
            device.destroy_fence(fence, None);
            let inner = self.inner.lock();
            device.free_command_buffers(inner.raw, &[cb]);
        }

        result
    }

    /// Resets the pool, invalidating every command buffer allocated from it.
    pub fn reset(&self) -> Result<()> {
        let inner = self.inner.lock();
        unsafe {
            self.bundle
                .device()
                .reset_command_pool(inner.raw, vk::CommandPoolResetFlags::empty())
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.inner.lock().raw
    }
}

impl Drop for CmdPool {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        unsafe {
            self.bundle.device().destroy_command_pool(inner.raw, None);
        }
    }
}
