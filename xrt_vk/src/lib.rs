/*! Vulkan instance/device/queue ownership, GPU resource allocation and a
 * pool-guarded command buffer factory, plus the resource subset that both
 * the renderer and swapchain crates build on.
 */

pub mod bundle;
pub mod cmd_pool;
pub mod handle;
pub mod resource;
pub mod types;

pub use ash::{self, vk};
pub use gpu_allocator;

pub use bundle::{CreateOptions, DeviceIdentity, ExternalCapabilities, Features, GivenOptions, VkBundle};
pub use cmd_pool::CmdPool;
pub use handle::{AHardwareBufferHandle, HandleKind, OpaqueFd, Win32Handle};
