/*! Small, dependency-light utilities shared across the compositor crates:
 * structured error kinds, pose math, a JSON builder/reader, calibration file
 * I/O and the chaperone (playspace) transform.
 *
 * Kept deliberately separate from `xrt_vk` so that none of it needs a
 * Vulkan loader to build or test.
 */

pub mod calibration;
pub mod chaperone;
pub mod error;
pub mod json;
pub mod pose;

pub use error::CompositorError;
pub use pose::Pose;
