//! Static GPU assets shared by every frame: pipelines, samplers, distortion
//! images, the compute scratch image, and the timestamp query pool (spec
//! section 4.3).

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use xrt_util::error::CompositorError;
use xrt_vk::resource::{
    Buffer, BufferDescriptor, DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutDescriptor, Image, ImageDescriptor,
    Pipeline, PipelineDescriptor, Sampler, SamplerDescriptor,
};
use xrt_vk::types::{DescriptorSetLayoutBinding, PipelineDepthStencilState, PipelineRasterizationState};
use xrt_vk::{CmdPool, VkBundle};

pub const DISTORTION_IMAGE_DIM: u32 = 128;

/// Opaque SPIR-V blobs, loaded as bytes and owned by the caller (spec
/// section 1 non-goal: "shader source code" is out of scope; this crate
/// only consumes compiled modules).
pub struct Shaders {
    pub clear_comp: Vec<u32>,
    pub distortion_comp: Vec<u32>,
    pub distortion_timewarp_comp: Vec<u32>,
    pub mesh_vert: Vec<u32>,
    pub mesh_frag: Vec<u32>,
    pub layer_vert: Vec<u32>,
    pub layer_frag: Vec<u32>,
    pub equirect1_vert: Option<Vec<u32>>,
    pub equirect1_frag: Option<Vec<u32>>,
    pub equirect2_vert: Option<Vec<u32>>,
    pub equirect2_frag: Option<Vec<u32>>,
    pub cube_vert: Option<Vec<u32>>,
    pub cube_frag: Option<Vec<u32>>,
}

/// Samples `compute_distortion(view, u, v) -> (r, g, b)` on a regular grid
/// to fill the distortion images. `r`/`g`/`b` are the
/// tangent-angle UV coordinates for each color channel, supporting
/// chromatic-aberration-aware mesh/compute distortion.
pub trait DistortionFunction {
    fn compute_distortion(&self, view_index: usize, u: f32, v: f32) -> [(f32, f32); 3];
}

/// `(vertex_rot, post_transform)` uploaded once per view per frame.
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct MeshViewUbo {
    pub vertex_rot: [[f32; 4]; 4],
    pub post_transform: [f32; 4],
}

pub struct MeshDistortionResources {
    pub descriptor_set_layout: Arc<DescriptorSetLayout>,
    pub descriptor_pool: DescriptorPool,
    pub descriptor_sets: [DescriptorSet; 2],
    pub pipeline_premultiplied: Pipeline,
    pub pipeline_unpremultiplied: Pipeline,
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
    pub view_ubos: [Buffer; 2],
}

#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ComputeViewUbo {
    pub pre_transform: [f32; 4],
    pub post_transform: [f32; 4],
    pub viewport: [f32; 4],
    pub time_warp: [[f32; 4]; 4],
}

pub struct ComputeDistortionResources {
    pub descriptor_set_layout: Arc<DescriptorSetLayout>,
    pub descriptor_pool: DescriptorPool,
    pub descriptor_set: DescriptorSet,
    pub pipeline_clear: Pipeline,
    pub pipeline_distortion: Pipeline,
    pub pipeline_distortion_timewarp: Pipeline,
    pub clear_ubo: Buffer,
    pub distortion_ubo: Buffer,
}

/// Static GPU assets allocated once at startup.
pub struct RenderResources {
    bundle: Arc<VkBundle>,
    pub cmd_pool: Arc<CmdPool>,
    pub pipeline_cache: vk::PipelineCache,
    pub timestamp_query_pool: vk::QueryPool,

    pub mesh: MeshDistortionResources,
    pub compute: ComputeDistortionResources,

    pub sampler_clamp_to_edge: Sampler,
    pub sampler_clamp_to_border_black: Sampler,
    pub sampler_repeat: Sampler,

    /// 3 channels (r,g,b) x 2 eyes, each a 128x128 R32G32_SFLOAT image of UV
    /// tangent-angle coordinates.
    pub distortion_images: [[Image; 3]; 2],
    pub pre_rotated: bool,

    pub scratch_image: Image,
    pub scratch_view_unorm: vk::ImageView,
    pub scratch_view_srgb: vk::ImageView,

    pub mock_image: Image,
}

impl RenderResources {
    pub fn new(
        bundle: Arc<VkBundle>,
        shaders: Shaders,
        distortion_fn: &dyn DistortionFunction,
        scratch_width: u32,
        scratch_height: u32,
        pre_rotated: bool,
    ) -> Result<Self> {
        let cmd_pool = Arc::new(CmdPool::new(bundle.clone())?);

        let pipeline_cache = unsafe {
            bundle
                .device()
                .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("vkCreatePipelineCache")?
        };

        let timestamp_query_pool = create_timestamp_query_pool(&bundle)?;

        let sampler_clamp_to_edge = bundle.create_sampler(SamplerDescriptor::clamp_to_edge())?;
        let sampler_clamp_to_border_black = bundle.create_sampler(SamplerDescriptor::clamp_to_border_black())?;
        let sampler_repeat = bundle.create_sampler(SamplerDescriptor::repeat())?;

        let mesh = create_mesh_resources(&bundle, &shaders)?;
        let compute = create_compute_resources(&bundle, &shaders)?;

        let distortion_images = create_distortion_images(&bundle, &cmd_pool, distortion_fn)?;

        let (scratch_image, scratch_view_unorm, scratch_view_srgb) = create_scratch_image(&bundle, scratch_width, scratch_height)?;

        let mock_image = bundle.create_image(ImageDescriptor::new_2d_single_layer_level(1, 1, vk::Format::R8G8B8A8_UNORM))?;

        Ok(Self {
            bundle,
            cmd_pool,
            pipeline_cache,
            timestamp_query_pool,
            mesh,
            compute,
            sampler_clamp_to_edge,
            sampler_clamp_to_border_black,
            sampler_repeat,
            distortion_images,
            pre_rotated,
            scratch_image,
            scratch_view_unorm,
            scratch_view_srgb,
            mock_image,
        })
    }

    /// Converts the two-entry query pool into host-clock nanoseconds using
    /// the device timestamp period. Precondition: the command buffer that
    /// wrote the timestamps has fully completed.
    pub fn get_timestamps(&self) -> Result<(i64, i64)> {
        let mut raw = [0u64; 2];
        unsafe {
            self.bundle
                .device()
                .get_query_pool_results(
                    self.timestamp_query_pool,
                    0,
                    &mut raw,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("vkGetQueryPoolResults (timestamps)")?;
        }
        let period_ns = self.bundle.features().timestamp_period_ns as f64;
        let gpu_start_ns = (raw[0] as f64 * period_ns) as i64;
        let gpu_end_ns = (raw[1] as f64 * period_ns) as i64;
        Ok((gpu_start_ns, gpu_end_ns))
    }
}

impl Drop for RenderResources {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_image_view(self.scratch_view_unorm, None);
            self.bundle.device().destroy_image_view(self.scratch_view_srgb, None);
            self.bundle.device().destroy_query_pool(self.timestamp_query_pool, None);
            self.bundle.device().destroy_pipeline_cache(self.pipeline_cache, None);
        }
    }
}

fn create_timestamp_query_pool(bundle: &Arc<VkBundle>) -> Result<vk::QueryPool> {
    let pool_info = vk::QueryPoolCreateInfo::default()
        .query_type(vk::QueryType::TIMESTAMP)
        .query_count(2);
    unsafe {
        bundle
            .device()
            .create_query_pool(&pool_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))
            .context("vkCreateQueryPool (timestamps)")
    }
}

fn create_mesh_resources(bundle: &Arc<VkBundle>, shaders: &Shaders) -> Result<MeshDistortionResources> {
    let bindings = vec![
        DescriptorSetLayoutBinding::new()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        DescriptorSetLayoutBinding::new()
            .binding(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
    ];
    let descriptor_set_layout = Arc::new(bundle.create_descriptor_set_layout(DescriptorSetLayoutDescriptor::new(bindings))?);

    let pool_sizes = [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(2),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(2),
    ];
    let descriptor_pool = DescriptorPool::new(bundle.clone(), &pool_sizes, 2, false)?;
    let descriptor_sets = [
        bundle.create_descriptor_set(&descriptor_pool, descriptor_set_layout.clone())?,
        bundle.create_descriptor_set(&descriptor_pool, descriptor_set_layout.clone())?,
    ];

    let vertex_stage_module = create_shader_module(bundle, &shaders.mesh_vert)?;
    let fragment_stage_module = create_shader_module(bundle, &shaders.mesh_frag)?;
    let entry = c"main";

    let vertex_input_bindings = vec![vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(5 * std::mem::size_of::<f32>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)];
    let vertex_input_attributes = vec![
        vk::VertexInputAttributeDescription::default()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .location(1)
            .binding(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(3 * std::mem::size_of::<f32>() as u32),
    ];

    let make_blend = |unpremultiplied: bool| {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(if unpremultiplied {
                vk::BlendFactor::SRC_ALPHA
            } else {
                vk::BlendFactor::ONE
            })
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };

    let pipeline_premultiplied = bundle.create_pipeline(PipelineDescriptor {
        descriptor_set_layouts: vec![descriptor_set_layout.clone()],
        stages: vec![
            (vk::ShaderStageFlags::VERTEX, vertex_stage_module, entry),
            (vk::ShaderStageFlags::FRAGMENT, fragment_stage_module, entry),
        ],
        vertex_input_attributes: vertex_input_attributes.clone(),
        vertex_input_bindings: vertex_input_bindings.clone(),
        primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        color_blend_attachments: vec![make_blend(false)],
        depth_stencil_state: PipelineDepthStencilState::new(),
        rasterization_state: PipelineRasterizationState::new(),
        color_attachment_formats: vec![vk::Format::B8G8R8A8_SRGB],
        depth_attachment_format: vk::Format::UNDEFINED,
    })?;

    let pipeline_unpremultiplied = bundle.create_pipeline(PipelineDescriptor {
        descriptor_set_layouts: vec![descriptor_set_layout.clone()],
        stages: vec![
            (vk::ShaderStageFlags::VERTEX, vertex_stage_module, entry),
            (vk::ShaderStageFlags::FRAGMENT, fragment_stage_module, entry),
        ],
        vertex_input_attributes,
        vertex_input_bindings,
        primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        color_blend_attachments: vec![make_blend(true)],
        depth_stencil_state: PipelineDepthStencilState::new(),
        rasterization_state: PipelineRasterizationState::new(),
        color_attachment_formats: vec![vk::Format::B8G8R8A8_SRGB],
        depth_attachment_format: vk::Format::UNDEFINED,
    })?;

    unsafe {
        bundle.device().destroy_shader_module(vertex_stage_module, None);
        bundle.device().destroy_shader_module(fragment_stage_module, None);
    }

    let (vertices, indices) = build_distortion_mesh_quad();
    let vertex_buffer = bundle.create_buffer(BufferDescriptor::new(
        (vertices.len() * std::mem::size_of::<f32>()) as u64,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        MemoryLocation::CpuToGpu,
    ))?;
    vertex_buffer.write_data(&vertices)?;

    let index_buffer = bundle.create_buffer(BufferDescriptor::new(
        (indices.len() * std::mem::size_of::<u32>()) as u64,
        vk::BufferUsageFlags::INDEX_BUFFER,
        MemoryLocation::CpuToGpu,
    ))?;
    index_buffer.write_data(&indices)?;
    let index_count = indices.len() as u32;

    let view_ubos = [
        bundle.create_buffer(BufferDescriptor::new(
            std::mem::size_of::<MeshViewUbo>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        ))?,
        bundle.create_buffer(BufferDescriptor::new(
            std::mem::size_of::<MeshViewUbo>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        ))?,
    ];

    Ok(MeshDistortionResources {
        descriptor_set_layout,
        descriptor_pool,
        descriptor_sets,
        pipeline_premultiplied,
        pipeline_unpremultiplied,
        vertex_buffer,
        index_buffer,
        index_count,
        view_ubos,
    })
}

fn create_compute_resources(bundle: &Arc<VkBundle>, shaders: &Shaders) -> Result<ComputeDistortionResources> {
    let bindings = vec![
        DescriptorSetLayoutBinding::new()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(2)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        DescriptorSetLayoutBinding::new()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(6)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        DescriptorSetLayoutBinding::new()
            .binding(2)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
        DescriptorSetLayoutBinding::new()
            .binding(3)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE),
    ];
    let descriptor_set_layout = Arc::new(bundle.create_descriptor_set_layout(DescriptorSetLayoutDescriptor::new(bindings))?);

    let pool_sizes = [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(8),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(2),
    ];
    let descriptor_pool = DescriptorPool::new(bundle.clone(), &pool_sizes, 1, false)?;
    let descriptor_set = bundle.create_descriptor_set(&descriptor_pool, descriptor_set_layout.clone())?;

    let entry = c"main";
    let clear_module = create_shader_module(bundle, &shaders.clear_comp)?;
    let distortion_module = create_shader_module(bundle, &shaders.distortion_comp)?;
    let timewarp_module = create_shader_module(bundle, &shaders.distortion_timewarp_comp)?;

    let pipeline_clear = bundle.create_compute_pipeline(xrt_vk::resource::ComputePipelineDescriptor {
        descriptor_set_layouts: vec![descriptor_set_layout.clone()],
        shader_module: clear_module,
        entry_point: entry,
    })?;
    let pipeline_distortion = bundle.create_compute_pipeline(xrt_vk::resource::ComputePipelineDescriptor {
        descriptor_set_layouts: vec![descriptor_set_layout.clone()],
        shader_module: distortion_module,
        entry_point: entry,
    })?;
    let pipeline_distortion_timewarp = bundle.create_compute_pipeline(xrt_vk::resource::ComputePipelineDescriptor {
        descriptor_set_layouts: vec![descriptor_set_layout.clone()],
        shader_module: timewarp_module,
        entry_point: entry,
    })?;

    unsafe {
        bundle.device().destroy_shader_module(clear_module, None);
        bundle.device().destroy_shader_module(distortion_module, None);
        bundle.device().destroy_shader_module(timewarp_module, None);
    }

    let clear_ubo = bundle.create_buffer(BufferDescriptor::new(
        256,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
    ))?;
    let distortion_ubo = bundle.create_buffer(BufferDescriptor::new(
        (2 * std::mem::size_of::<ComputeViewUbo>()) as u64,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
    ))?;

    Ok(ComputeDistortionResources {
        descriptor_set_layout,
        descriptor_pool,
        descriptor_set,
        pipeline_clear,
        pipeline_distortion,
        pipeline_distortion_timewarp,
        clear_ubo,
        distortion_ubo,
    })
}

fn create_shader_module(bundle: &Arc<VkBundle>, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe {
        bundle
            .device()
            .create_shader_module(&create_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))
            .context("vkCreateShaderModule")
    }
}

/// A unit quad split into 2 triangles, standing in for the real
/// `compute_distortion`-driven distortion mesh tessellation (that
/// tessellation detail is a device/driver concern, out of this core's
/// scope).
fn build_distortion_mesh_quad() -> (Vec<f32>, Vec<u32>) {
    let vertices: Vec<f32> = vec![
        -1.0, -1.0, 0.0, 0.0, 0.0, //
        1.0, -1.0, 0.0, 1.0, 0.0, //
        1.0, 1.0, 0.0, 1.0, 1.0, //
        -1.0, 1.0, 0.0, 0.0, 1.0,
    ];
    let indices: Vec<u32> = vec![0, 1, 2, 2, 3, 0];
    (vertices, indices)
}

fn create_distortion_images(bundle: &Arc<VkBundle>, cmd_pool: &Arc<CmdPool>, distortion_fn: &dyn DistortionFunction) -> Result<[[Image; 3]; 2]> {
    const GRID: u32 = DISTORTION_IMAGE_DIM;
    let mut per_eye: Vec<[Image; 3]> = Vec::with_capacity(2);

    for eye in 0..2 {
        let mut channel_data: [Vec<[f32; 2]>; 3] = [
            Vec::with_capacity((GRID * GRID) as usize),
            Vec::with_capacity((GRID * GRID) as usize),
            Vec::with_capacity((GRID * GRID) as usize),
        ];
        for y in 0..GRID {
            for x in 0..GRID {
                let u = (x as f32 + 0.5) / GRID as f32;
                let v = (y as f32 + 0.5) / GRID as f32;
                let [r, g, b] = distortion_fn.compute_distortion(eye, u, v);
                channel_data[0].push([r.0, r.1]);
                channel_data[1].push([g.0, g.1]);
                channel_data[2].push([b.0, b.1]);
            }
        }

        let images: Vec<Image> = channel_data
            .into_iter()
            .map(|data| {
                let image = bundle.create_image(ImageDescriptor::new_2d_single_layer_level(GRID, GRID, vk::Format::R32G32_SFLOAT))?;
                upload_image_data(bundle, cmd_pool, &image, bytemuck::cast_slice(&data))?;
                Ok::<_, anyhow::Error>(image)
            })
            .collect::<Result<Vec<_>>>()?;

        let [a, b, c]: [Image; 3] = images
            .try_into()
            .map_err(|_| anyhow::anyhow!("distortion image channel count must be 3"))?;
        per_eye.push([a, b, c]);
    }

    let [eye0, eye1]: [[Image; 3]; 2] = per_eye
        .try_into()
        .map_err(|_| anyhow::anyhow!("distortion image eye count must be 2"))?;
    Ok([eye0, eye1])
}

fn upload_image_data(bundle: &Arc<VkBundle>, cmd_pool: &Arc<CmdPool>, image: &Image, data: &[u8]) -> Result<()> {
    let staging = bundle.create_buffer(BufferDescriptor::new(
        data.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    ))?;
    staging.write_data(data)?;

    let cb = cmd_pool.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    unsafe {
        let to_transfer_dst = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image(image.raw())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        bundle
            .device()
            .cmd_pipeline_barrier2(cb, &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_transfer_dst)));

        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(image.extent);
        bundle
            .device()
            .cmd_copy_buffer_to_image(cb, staging.raw(), image.raw(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);

        let to_shader_read = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image(image.raw())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        bundle
            .device()
            .cmd_pipeline_barrier2(cb, &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_shader_read)));
    }
    cmd_pool.end_submit_wait_and_free(cb)
}

fn create_scratch_image(bundle: &Arc<VkBundle>, width: u32, height: u32) -> Result<(Image, vk::ImageView, vk::ImageView)> {
    let mut desc = ImageDescriptor::new_2d_single_layer_level(width, height, vk::Format::R8G8B8A8_UNORM);
    desc.usage_flags = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    let image = bundle.create_image(desc)?;

    let unorm_view = image.view();
    let srgb_view = unsafe {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.raw())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_SRGB)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        bundle
            .device()
            .create_image_view(&view_info, None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
    };

    Ok((image, unorm_view, srgb_view))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdentityDistortion;
    impl DistortionFunction for IdentityDistortion {
        fn compute_distortion(&self, _view_index: usize, u: f32, v: f32) -> [(f32, f32); 3] {
            [(u, v), (u, v), (u, v)]
        }
    }

    #[test]
    fn distortion_mesh_quad_has_two_triangles() {
        let (vertices, indices) = build_distortion_mesh_quad();
        assert_eq!(vertices.len(), 4 * 5);
        assert_eq!(indices.len(), 6);
    }

    #[test]
    fn identity_distortion_maps_uv_to_itself() {
        let f = IdentityDistortion;
        let [r, g, b] = f.compute_distortion(0, 0.25, 0.75);
        assert_eq!(r, (0.25, 0.75));
        assert_eq!(g, (0.25, 0.75));
        assert_eq!(b, (0.25, 0.75));
    }
}
