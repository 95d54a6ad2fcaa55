/*! Static render resources, layer compositing, and the per-frame
 * distortion orchestrator.
 */

pub mod layer;
pub mod renderer;
pub mod resources;

pub use layer::{compute_view_projection, eye_viewport, Fov, Layer, LayerFlags, LayerSlot, LayerSlotFull, LayerType, SubimageRect, ViewProjection};
pub use renderer::{select_default_backend, ComputeDistortion, DistortionBackend, MeshDistortion, Renderer};
pub use resources::{ComputeDistortionResources, DistortionFunction, MeshDistortionResources, RenderResources, Shaders};
