//! GPU resources: buffers, images, samplers, pipelines and descriptor sets,
//! all allocated through the owning `VkBundle`'s `gpu_allocator` instance.

use std::collections::HashMap;
use std::mem::{align_of, size_of_val};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use xrt_util::error::CompositorError;

use crate::bundle::VkBundle;
use crate::types::{DescriptorSetLayoutBinding, PipelineDepthStencilState, PipelineRasterizationState};

pub struct BufferDescriptor {
    pub size: u64,
    pub usage_flags: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage_flags: vk::BufferUsageFlags, memory_location: MemoryLocation) -> Self {
        Self {
            size,
            usage_flags,
            memory_location,
        }
    }
}

pub struct Buffer {
    pub(crate) raw: vk::Buffer,
    size: u64,
    allocation: Option<Allocation>,
    bundle: Arc<VkBundle>,
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn write_data<T: Copy>(&self, data: &[T]) -> Result<()> {
        let allocation = self
            .allocation
            .as_ref()
            .context("buffer has no host-visible allocation")?;
        let data_ptr = allocation
            .mapped_ptr()
            .context("buffer is not mapped for CPU writes")?
            .as_ptr();
        unsafe {
            let mut align = ash::util::Align::new(data_ptr, align_of::<T>() as u64, size_of_val(data) as u64);
            align.copy_from_slice(data);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.bundle.allocator().lock().free(allocation);
        }
        unsafe {
            self.bundle.device().destroy_buffer(self.raw, None);
        }
    }
}

pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    pub format: vk::Format,
    pub image_type: vk::ImageType,
    pub usage_flags: vk::ImageUsageFlags,
    pub memory_location: MemoryLocation,
    /// Set when this image will be bound to externally imported/exported
    /// memory: suppresses gpu_allocator allocation and lets the caller
    /// `vkBindImageMemory` itself.
    pub external: bool,
}

impl ImageDescriptor {
    pub fn new_2d_single_layer_level(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            depth: 1,
            array_layer_count: 1,
            mip_level_count: 1,
            format,
            image_type: vk::ImageType::TYPE_2D,
            usage_flags: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory_location: MemoryLocation::GpuOnly,
            external: false,
        }
    }
}

pub struct Image {
    pub(crate) raw: vk::Image,
    allocation: Option<Allocation>,
    pub(crate) raw_view: vk::ImageView,
    bundle: Arc<VkBundle>,
    pub extent: vk::Extent3D,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    pub format: vk::Format,
}

impl Image {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn view(&self) -> vk::ImageView {
        self.raw_view
    }

    /// Builds an additional view over this image with a custom component
    /// swizzle, e.g. the `no_alpha` view family (`views.alpha[L]` /
    /// `views.no_alpha[L]`).
    pub fn create_view_with_swizzle(&self, components: vk::ComponentMapping) -> Result<vk::ImageView> {
        let aspect = if format_has_depth(self.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(components)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: self.mip_level_count,
                base_array_layer: 0,
                layer_count: self.array_layer_count,
            });
        unsafe {
            self.bundle
                .device()
                .create_image_view(&view_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()).into())
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_image_view(self.raw_view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.bundle.allocator().lock().free(allocation);
        }
        unsafe {
            self.bundle.device().destroy_image(self.raw, None);
        }
    }
}

pub fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub struct SamplerDescriptor {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub border_color: vk::BorderColor,
}

impl SamplerDescriptor {
    pub fn clamp_to_edge() -> Self {
        Self {
            min_filter: vk::Filter::LINEAR,
            mag_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }

    pub fn clamp_to_border_black() -> Self {
        Self {
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            ..Self::clamp_to_edge()
        }
    }

    pub fn repeat() -> Self {
        Self {
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            ..Self::clamp_to_edge()
        }
    }
}

pub struct Sampler {
    bundle: Arc<VkBundle>,
    pub(crate) raw: vk::Sampler,
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_sampler(self.raw, None);
        }
    }
}

pub struct DescriptorSetLayoutDescriptor {
    pub bindings: Vec<DescriptorSetLayoutBinding>,
    pub flags: vk::DescriptorSetLayoutCreateFlags,
    pub binding_flags: Option<Vec<vk::DescriptorBindingFlags>>,
}

impl DescriptorSetLayoutDescriptor {
    pub fn new(bindings: Vec<DescriptorSetLayoutBinding>) -> Self {
        Self {
            bindings,
            flags: vk::DescriptorSetLayoutCreateFlags::empty(),
            binding_flags: None,
        }
    }

    /// Bindless/update-after-bind layout, using the
    /// `descriptor_binding_*_update_after_bind` device features.
    pub fn new_bindless(bindings: Vec<DescriptorSetLayoutBinding>) -> Self {
        let binding_flags = vec![
            vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
            bindings.len()
        ];
        Self {
            bindings,
            flags: vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
            binding_flags: Some(binding_flags),
        }
    }
}

pub struct DescriptorSetLayout {
    pub(crate) raw: vk::DescriptorSetLayout,
    bindings_map: HashMap<u32, DescriptorSetLayoutBinding>,
    bundle: Arc<VkBundle>,
}

impl DescriptorSetLayout {
    pub fn binding(&self, index: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings_map.get(&index)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_descriptor_set_layout(self.raw, None);
        }
    }
}

/// Per-subsystem descriptor pool, owned exclusively by its creating
/// thread: never shared across threads.
pub struct DescriptorPool {
    raw: vk::DescriptorPool,
    bundle: Arc<VkBundle>,
}

impl DescriptorPool {
    pub fn new(bundle: Arc<VkBundle>, pool_sizes: &[vk::DescriptorPoolSize], max_sets: u32, update_after_bind: bool) -> Result<Self> {
        let mut flags = vk::DescriptorPoolCreateFlags::empty();
        if update_after_bind {
            flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets)
            .flags(flags);
        let raw = unsafe {
            bundle
                .device()
                .create_descriptor_pool(&create_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        Ok(Self { raw, bundle })
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout.raw];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.raw)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.bundle
                .device()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        Ok(sets[0])
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_descriptor_pool(self.raw, None);
        }
    }
}

pub struct DescriptorSet {
    pub(crate) raw: vk::DescriptorSet,
    layout: Arc<DescriptorSetLayout>,
}

impl DescriptorSet {
    pub fn raw(&self) -> vk::DescriptorSet {
        self.raw
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }
}

pub struct DescriptorBindingBufferWrite<'a> {
    pub binding_index: u32,
    pub buffer: &'a Buffer,
}

pub struct DescriptorBindingImageSamplerWrite<'a> {
    pub binding_index: u32,
    pub array_element: u32,
    pub image: &'a Image,
    pub sampler: &'a Sampler,
}

pub struct PipelineDescriptor {
    pub descriptor_set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule, &'static std::ffi::CStr)>,
    pub vertex_input_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub vertex_input_bindings: Vec<vk::VertexInputBindingDescription>,
    pub primitive_topology: vk::PrimitiveTopology,
    pub color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub depth_stencil_state: PipelineDepthStencilState,
    pub rasterization_state: PipelineRasterizationState,
    /// Required for dynamic rendering: no classic render pass objects.
    pub color_attachment_formats: Vec<vk::Format>,
    pub depth_attachment_format: vk::Format,
}

pub struct Pipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) raw_layout: vk::PipelineLayout,
    _descriptor_set_layouts: Vec<Arc<DescriptorSetLayout>>,
    bundle: Arc<VkBundle>,
}

impl Pipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.raw_layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.bundle.device().destroy_pipeline(self.raw, None);
            self.bundle.device().destroy_pipeline_layout(self.raw_layout, None);
        }
    }
}

pub struct ComputePipelineDescriptor {
    pub descriptor_set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub shader_module: vk::ShaderModule,
    pub entry_point: &'static std::ffi::CStr,
}

impl VkBundle {
    pub fn create_buffer(self: &Arc<Self>, desc: BufferDescriptor) -> Result<Buffer> {
        let buffer_info = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage_flags);
        let raw = unsafe {
            self.device()
                .create_buffer(&buffer_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        let requirements = unsafe { self.device().get_buffer_memory_requirements(raw) };
        let allocation = self
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "xrt_vk::Buffer",
                requirements,
                location: desc.memory_location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("allocating buffer memory")?;
        unsafe {
            self.device()
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }
        Ok(Buffer {
            raw,
            size: desc.size,
            allocation: Some(allocation),
            bundle: self.clone(),
        })
    }

    pub fn create_image(self: &Arc<Self>, desc: ImageDescriptor) -> Result<Image> {
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe {
            self.device()
                .create_image(&image_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        let allocation = if desc.external {
            None
        } else {
            let requirements = unsafe { self.device().get_image_memory_requirements(raw) };
            let allocation = self
                .allocator()
                .lock()
                .allocate(&AllocationCreateDesc {
                    name: "xrt_vk::Image",
                    requirements,
                    location: desc.memory_location,
                    linear: false,
                    allocation_scheme: AllocationScheme::DedicatedImage(raw),
                })
                .context("allocating image memory")?;
            unsafe {
                self.device()
                    .bind_image_memory(raw, allocation.memory(), allocation.offset())
                    .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
            }
            Some(allocation)
        };

        let aspect = if format_has_depth(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_level_count,
                base_array_layer: 0,
                layer_count: desc.array_layer_count,
            });
        let raw_view = unsafe {
            self.device()
                .create_image_view(&view_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        Ok(Image {
            raw,
            allocation,
            raw_view,
            bundle: self.clone(),
            extent,
            array_layer_count: desc.array_layer_count,
            mip_level_count: desc.mip_level_count,
            format: desc.format,
        })
    }

    pub fn create_sampler(self: &Arc<Self>, desc: SamplerDescriptor) -> Result<Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .min_filter(desc.min_filter)
            .mag_filter(desc.mag_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .border_color(desc.border_color);
        let raw = unsafe {
            self.device()
                .create_sampler(&sampler_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        Ok(Sampler { bundle: self.clone(), raw })
    }

    pub fn create_descriptor_set_layout(self: &Arc<Self>, desc: DescriptorSetLayoutDescriptor) -> Result<DescriptorSetLayout> {
        let vk_bindings: Vec<_> = desc.bindings.iter().map(|b| b.to_vulkan_binding()).collect();
        let mut layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&vk_bindings)
            .flags(desc.flags);

        let mut binding_flags_info;
        if let Some(binding_flags) = &desc.binding_flags {
            binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(binding_flags);
            layout_info = layout_info.push_next(&mut binding_flags_info);
            let raw = unsafe {
                self.device()
                    .create_descriptor_set_layout(&layout_info, None)
                    .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
            };
            return Ok(DescriptorSetLayout {
                raw,
                bindings_map: desc.bindings.iter().map(|b| (b.binding, b.clone())).collect(),
                bundle: self.clone(),
            });
        }

        let raw = unsafe {
            self.device()
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        Ok(DescriptorSetLayout {
            raw,
            bindings_map: desc.bindings.iter().map(|b| (b.binding, b.clone())).collect(),
            bundle: self.clone(),
        })
    }

    pub fn create_descriptor_set(&self, pool: &DescriptorPool, layout: Arc<DescriptorSetLayout>) -> Result<DescriptorSet> {
        let raw = pool.allocate(&layout)?;
        Ok(DescriptorSet { raw, layout })
    }

    pub fn update_descriptor_set(&self, set: &DescriptorSet, buffer_writes: &[DescriptorBindingBufferWrite], image_writes: &[DescriptorBindingImageSamplerWrite]) {
        let buffer_infos: Vec<_> = buffer_writes
            .iter()
            .map(|w| [vk::DescriptorBufferInfo::default().buffer(w.buffer.raw).offset(0).range(w.buffer.size)])
            .collect();
        let image_infos: Vec<_> = image_writes
            .iter()
            .map(|w| {
                [vk::DescriptorImageInfo::default()
                    .image_view(w.image.raw_view)
                    .sampler(w.sampler.raw)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]
            })
            .collect();

        let mut writes = Vec::with_capacity(buffer_writes.len() + image_writes.len());
        for (w, infos) in buffer_writes.iter().zip(buffer_infos.iter()) {
            let binding = set.layout.binding(w.binding_index).map(|b| b.descriptor_type).unwrap_or(vk::DescriptorType::UNIFORM_BUFFER);
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set.raw)
                    .dst_binding(w.binding_index)
                    .descriptor_type(binding)
                    .buffer_info(infos),
            );
        }
        for (w, infos) in image_writes.iter().zip(image_infos.iter()) {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set.raw)
                    .dst_binding(w.binding_index)
                    .dst_array_element(w.array_element)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(infos),
            );
        }

        unsafe {
            self.device().update_descriptor_sets(&writes, &[]);
        }
    }

    /// Bindless texture array update, binding N images into a single
    /// `array_element`-indexed binding via descriptor-indexing.
    pub fn update_descriptor_set_bindless(&self, set: &DescriptorSet, writes: &[DescriptorBindingImageSamplerWrite]) {
        self.update_descriptor_set(set, &[], writes)
    }

    pub fn create_pipeline(self: &Arc<Self>, desc: PipelineDescriptor) -> Result<Pipeline> {
        let set_layouts: Vec<_> = desc.descriptor_set_layouts.iter().map(|l| l.raw).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let raw_layout = unsafe {
            self.device()
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        let stage_infos: Vec<_> = desc
            .stages
            .iter()
            .map(|(stage, module, entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(*module)
                    .name(entry)
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_attribute_descriptions(&desc.vertex_input_attributes)
            .vertex_binding_descriptions(&desc.vertex_input_bindings);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.primitive_topology);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&desc.color_blend_attachments);

        let rasterization_state = desc.rasterization_state.to_vulkan_state();
        let depth_stencil_state = desc.depth_stencil_state.to_vulkan_state();

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.color_attachment_formats)
            .depth_attachment_format(desc.depth_attachment_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(raw_layout)
            .push_next(&mut rendering_info);

        let raw = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| CompositorError::Vulkan(e.as_raw()))?[0]
        };

        Ok(Pipeline {
            raw,
            raw_layout,
            _descriptor_set_layouts: desc.descriptor_set_layouts,
            bundle: self.clone(),
        })
    }

    pub fn create_compute_pipeline(self: &Arc<Self>, desc: ComputePipelineDescriptor) -> Result<Pipeline> {
        let set_layouts: Vec<_> = desc.descriptor_set_layouts.iter().map(|l| l.raw).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let raw_layout = unsafe {
            self.device()
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.shader_module)
            .name(desc.entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(raw_layout);

        let raw = unsafe {
            self.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| CompositorError::Vulkan(e.as_raw()))?[0]
        };

        Ok(Pipeline {
            raw,
            raw_layout,
            _descriptor_set_layouts: desc.descriptor_set_layouts,
            bundle: self.clone(),
        })
    }
}
