/*! Native/client swapchain pair and the presentation-target abstraction. */

pub mod client;
pub mod image;
pub mod native;
pub mod target;

pub use client::ClientSwapchain;
pub use image::{SwapchainCreateFlags, SwapchainCreateInfo, SwapchainImage, SwapchainUsageBits};
pub use native::{ImageState, NativeSwapchain};
pub use target::{FramePacing, MockTarget, PresentOutcome, Target, TimingPointKind};
