//! VkBundle: owns the Vulkan instance/device/queue and the device's cached
//! capability matrix.

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::AllocatorDebugSettings;
use parking_lot::Mutex;
use xrt_util::error::{CompositorError, HandleDirection};

use crate::handle::HandleKind;

/// Options accepted by `VkBundle::create_from`, mirroring `vk_bundle_init`'s
/// settings struct.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub only_compute_queue: bool,
    pub selected_gpu_index: Option<usize>,
    pub client_gpu_index: Option<usize>,
    pub want_timeline_semaphore: bool,
    pub log_level: log::LevelFilter,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            only_compute_queue: false,
            selected_gpu_index: None,
            client_gpu_index: None,
            want_timeline_semaphore: false,
            log_level: log::LevelFilter::Warn,
        }
    }
}

/// Options for `create_from_given`, where the caller already owns the
/// Vulkan objects (client-side init).
#[derive(Debug, Clone, Default)]
pub struct GivenOptions {
    pub fence_fd_enabled: bool,
    pub semaphore_fd_enabled: bool,
    pub timeline_semaphore_enabled: bool,
}

/// Identity handed back by `create_from`, used by clients to verify their
/// own Vulkan device matches the compositor's (GLOSSARY: External UUID/LUID).
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub client_uuid: [u8; 16],
    pub compositor_uuid: [u8; 16],
    pub client_luid: Option<[u8; 8]>,
    pub selected_gpu_index: usize,
    pub client_gpu_index: usize,
}

/// Device feature record, cached once at init and immutable thereafter.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub timestamp_period_ns: f32,
    pub timestamp_valid_bits: u32,
    pub timeline_semaphore: bool,
    pub max_per_stage_descriptor_samplers: u32,
    pub max_per_stage_descriptor_storage_images: u32,
}

/// `{color|depth} x {import|export} x handle-kind` support matrix, plus
/// per-sync-object-type flags.
#[derive(Debug, Clone, Default)]
pub struct ExternalCapabilities {
    color_import: HashSet<HandleKind>,
    color_export: HashSet<HandleKind>,
    depth_import: HashSet<HandleKind>,
    depth_export: HashSet<HandleKind>,
    fence_handles: HashSet<HandleKind>,
    semaphore_handles_binary: HashSet<HandleKind>,
    semaphore_handles_timeline: HashSet<HandleKind>,
}

impl ExternalCapabilities {
    fn insert_image(&mut self, depth: bool, direction: HandleDirection, kind: HandleKind) {
        let set = match (depth, direction) {
            (false, HandleDirection::Import) => &mut self.color_import,
            (false, HandleDirection::Export) => &mut self.color_export,
            (true, HandleDirection::Import) => &mut self.depth_import,
            (true, HandleDirection::Export) => &mut self.depth_export,
        };
        set.insert(kind);
    }

    pub fn supports_image(&self, depth: bool, direction: HandleDirection, kind: HandleKind) -> bool {
        let set = match (depth, direction) {
            (false, HandleDirection::Import) => &self.color_import,
            (false, HandleDirection::Export) => &self.color_export,
            (true, HandleDirection::Import) => &self.depth_import,
            (true, HandleDirection::Export) => &self.depth_export,
        };
        set.contains(&kind)
    }

    pub fn fence_handle_supported(&self, kind: HandleKind) -> bool {
        self.fence_handles.contains(&kind)
    }

    pub fn semaphore_handle_supported(&self, kind: HandleKind, timeline: bool) -> bool {
        if timeline {
            self.semaphore_handles_timeline.contains(&kind)
        } else {
            self.semaphore_handles_binary.contains(&kind)
        }
    }
}

/// Handle kinds this crate knows how to query export support for on the
/// running platform. On non-Linux platforms the fd-based kinds are simply
/// never found supported, which degrades gracefully.
const CANDIDATE_MEMORY_HANDLE_KINDS: &[(HandleKind, vk::ExternalMemoryHandleTypeFlags)] = &[
    (HandleKind::OpaqueFd, vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD),
    (
        HandleKind::AndroidHardwareBuffer,
        vk::ExternalMemoryHandleTypeFlags::ANDROID_HARDWARE_BUFFER_ANDROID,
    ),
];

pub struct VkBundle {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: Mutex<vk::Queue>,
    features: Features,
    external: ExternalCapabilities,
    enabled_instance_exts: HashSet<String>,
    enabled_device_exts: HashSet<String>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl VkBundle {
    /// Enumerates physical devices, creates an instance and device, and
    /// caches the capability matrix.
    pub fn create_from(
        required_instance_exts: &[&str],
        optional_instance_exts: &[&str],
        required_device_exts: &[&str],
        optional_device_exts: &[&str],
        options: &CreateOptions,
    ) -> Result<(Self, DeviceIdentity)> {
        let entry = unsafe { ash::Entry::load().context("loading Vulkan loader")? };

        let instance_exts = resolve_instance_extensions(
            &entry,
            required_instance_exts,
            optional_instance_exts,
        )?;

        let app_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_3);
        let ext_ptrs: Vec<*const i8> = instance_exts.iter().map(|c| c.as_ptr()).collect();
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs);
        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))
                .context("vkCreateInstance")?
        };

        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
        };
        if physical_devices.is_empty() {
            return Err(CompositorError::NoDevice.into());
        }

        let selected_gpu_index = match options.selected_gpu_index {
            Some(i) => i,
            None => select_default_gpu_index(&instance, &physical_devices),
        };
        let physical_device = *physical_devices
            .get(selected_gpu_index)
            .ok_or(CompositorError::NoDevice)?;
        let client_gpu_index = options.client_gpu_index.unwrap_or(selected_gpu_index);

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = select_queue_family(&queue_families, options.only_compute_queue)
            .ok_or(CompositorError::NoDevice)?;

        let device_exts = resolve_device_extensions(
            &instance,
            physical_device,
            required_device_exts,
            optional_device_exts,
        )?;

        let (device, features) = create_logical_device(
            &instance,
            physical_device,
            queue_family_index,
            &device_exts,
            options.want_timeline_semaphore,
        )?;

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let enabled_instance_exts = instance_exts
            .iter()
            .map(|c| c.to_str().unwrap_or_default().to_owned())
            .collect();
        let enabled_device_exts: HashSet<String> = device_exts
            .iter()
            .map(|c| c.to_str().unwrap_or_default().to_owned())
            .collect();

        let external = query_external_capabilities(&instance, physical_device, &enabled_device_exts);

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let client_uuid = props.pipeline_cache_uuid;
        let identity = DeviceIdentity {
            client_uuid,
            compositor_uuid: client_uuid,
            client_luid: None,
            selected_gpu_index,
            client_gpu_index,
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("gpu_allocator::vulkan::Allocator::new")?;

        Ok((
            Self {
                entry,
                instance,
                physical_device,
                device,
                queue_family_index,
                queue: Mutex::new(queue),
                features,
                external,
                enabled_instance_exts,
                enabled_device_exts,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
            },
            identity,
        ))
    }

    /// Client-side init where the Vulkan objects are supplied by the
    /// caller.
    ///
    /// # Safety
    /// `instance`, `physical_device` and `device` must be live and mutually
    /// consistent Vulkan handles from the same loader the caller will keep
    /// alive for at least as long as the returned `VkBundle`.
    pub unsafe fn create_from_given(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        queue_index: u32,
        options: &GivenOptions,
    ) -> Result<Self> {
        let queue = device.get_device_queue(queue_family_index, queue_index);
        let device_exts: HashSet<String> = HashSet::new();
        let mut external = ExternalCapabilities::default();
        if options.fence_fd_enabled {
            external.fence_handles.insert(HandleKind::SyncFd);
        }
        if options.semaphore_fd_enabled {
            external.semaphore_handles_binary.insert(HandleKind::SyncFd);
            if options.timeline_semaphore_enabled {
                external.semaphore_handles_timeline.insert(HandleKind::SyncFd);
            }
        }

        let props = instance.get_physical_device_properties(physical_device);
        let features = Features {
            timestamp_period_ns: props.limits.timestamp_period,
            timestamp_valid_bits: 64,
            timeline_semaphore: options.timeline_semaphore_enabled,
            max_per_stage_descriptor_samplers: props.limits.max_per_stage_descriptor_samplers,
            max_per_stage_descriptor_storage_images: props.limits.max_per_stage_descriptor_storage_images,
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("gpu_allocator::vulkan::Allocator::new")?;

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            queue_family_index,
            queue: Mutex::new(queue),
            features,
            external,
            enabled_instance_exts: HashSet::new(),
            enabled_device_exts: device_exts,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        })
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    pub fn has_extension(&self, tag: &str) -> bool {
        self.enabled_instance_exts.contains(tag) || self.enabled_device_exts.contains(tag)
    }

    pub fn supports_external_color_image(&self, kind: HandleKind, direction: HandleDirection) -> bool {
        self.external.supports_image(false, direction, kind)
    }

    pub fn supports_external_depth_image(&self, kind: HandleKind, direction: HandleDirection) -> bool {
        self.external.supports_image(true, direction, kind)
    }

    pub fn fence_handle_supported(&self, kind: HandleKind) -> bool {
        self.external.fence_handle_supported(kind)
    }

    pub fn semaphore_handle_supported(&self, kind: HandleKind, timeline: bool) -> bool {
        self.external.semaphore_handle_supported(kind, timeline)
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Copies out the current queue handle for APIs that need to pass it
    /// directly (e.g. `vkQueuePresentKHR` through a window-system swapchain
    /// loader). The lock is released before this returns; callers must not
    /// use the handle to bypass `submit`/`present`'s own locking.
    pub fn queue_handle(&self) -> vk::Queue {
        *self.queue.lock()
    }

    /// Submits and takes the queue mutex for the duration of the call.
    /// Never acquire a CmdPool lock while holding this one.
    pub fn submit(&self, submit_infos: &[vk::SubmitInfo2], fence: vk::Fence) -> Result<()> {
        let queue = self.queue.lock();
        unsafe {
            self.device
                .queue_submit2(*queue, submit_infos, fence)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }
        Ok(())
    }

    pub fn present(&self, swapchain_loader: &ash::khr::swapchain::Device, present_info: &vk::PresentInfoKHR) -> Result<bool> {
        let queue = self.queue.lock();
        unsafe {
            swapchain_loader
                .queue_present(*queue, present_info)
                .map_err(|e| CompositorError::Vulkan(e.as_raw()).into())
        }
    }

    /// Drains all GPU work. Held under the queue mutex: concurrent queue
    /// submits during wait-idle are forbidden.
    pub fn device_wait_idle(&self) -> Result<()> {
        let _queue = self.queue.lock();
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| CompositorError::Vulkan(e.as_raw()))?;
        }
        Ok(())
    }
}

impl Drop for VkBundle {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        log::trace!("VkBundle dropped");
    }
}

fn resolve_instance_extensions(
    entry: &ash::Entry,
    required: &[&str],
    optional: &[&str],
) -> Result<Vec<CString>> {
    let available: HashSet<String> = unsafe {
        entry
            .enumerate_instance_extension_properties(None)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
            .iter()
            .map(|p| {
                unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
                    .to_str()
                    .unwrap_or_default()
                    .to_owned()
            })
            .collect()
    };

    let mut selected = HashSet::new();
    for ext in required {
        if !available.contains(*ext) {
            return Err(CompositorError::ExtensionMissing((*ext).to_string()).into());
        }
        selected.insert(ext.to_string());
    }
    for ext in optional {
        if available.contains(*ext) {
            selected.insert(ext.to_string());
        }
    }

    Ok(selected
        .into_iter()
        .map(|s| CString::new(s).expect("extension name has no interior nul"))
        .collect())
}

fn resolve_device_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    required: &[&str],
    optional: &[&str],
) -> Result<Vec<CString>> {
    let available: HashSet<String> = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device)
            .map_err(|e| CompositorError::Vulkan(e.as_raw()))?
            .iter()
            .map(|p| {
                unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
                    .to_str()
                    .unwrap_or_default()
                    .to_owned()
            })
            .collect()
    };

    let mut selected = HashSet::new();
    for ext in required {
        if !available.contains(*ext) {
            return Err(CompositorError::ExtensionMissing((*ext).to_string()).into());
        }
        selected.insert(ext.to_string());
    }
    // Display-timing style extensions only make sense once a display
    // extension is present, so skip them when it's absent.
    for ext in optional {
        if *ext == "VK_EXT_display_control" && !selected.contains("VK_EXT_display_surface_counter") {
            continue;
        }
        if available.contains(*ext) {
            selected.insert(ext.to_string());
        }
    }

    Ok(selected
        .into_iter()
        .map(|s| CString::new(s).expect("extension name has no interior nul"))
        .collect())
}

fn select_default_gpu_index(instance: &ash::Instance, devices: &[vk::PhysicalDevice]) -> usize {
    for (i, device) in devices.iter().enumerate() {
        let props = unsafe { instance.get_physical_device_properties(*device) };
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return i;
        }
    }
    0
}

fn select_queue_family(families: &[vk::QueueFamilyProperties], only_compute: bool) -> Option<u32> {
    if only_compute {
        // Prefer compute-without-graphics, then any compute.
        if let Some(i) = families.iter().position(|f| {
            f.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        }) {
            return Some(i as u32);
        }
        return families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map(|i| i as u32);
    }
    families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    device_exts: &[CString],
    want_timeline_semaphore: bool,
) -> Result<(ash::Device, Features)> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities)];

    let ext_ptrs: Vec<*const i8> = device_exts.iter().map(|c| c.as_ptr()).collect();

    let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .timeline_semaphore(want_timeline_semaphore)
        .shader_sampled_image_array_non_uniform_indexing(true);
    let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let mut device_features2 = vk::PhysicalDeviceFeatures2::default();
    unsafe { instance.get_physical_device_features2(physical_device, &mut device_features2) };
    let mut device_features2 = device_features2
        .push_next(&mut vulkan12_features)
        .push_next(&mut vulkan13_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&ext_ptrs)
        .push_next(&mut device_features2);

    let device = unsafe {
        instance.create_device(physical_device, &device_create_info, None).map_err(|e| {
            let raw = e.as_raw();
            // VK_ERROR_INITIALIZATION_FAILED is what drivers report when the
            // device node exists but the caller lacks permission to open it.
            if raw == vk::Result::ERROR_INITIALIZATION_FAILED.as_raw() {
                CompositorError::InsufficientPermissions
            } else {
                CompositorError::DeviceCreate(raw)
            }
        })?
    };

    let props = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = Features {
        timestamp_period_ns: props.limits.timestamp_period,
        timestamp_valid_bits: 64,
        timeline_semaphore: want_timeline_semaphore,
        max_per_stage_descriptor_samplers: props.limits.max_per_stage_descriptor_samplers,
        max_per_stage_descriptor_storage_images: props.limits.max_per_stage_descriptor_storage_images,
    };

    Ok((device, features))
}

fn query_external_capabilities(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device_exts: &HashSet<String>,
) -> ExternalCapabilities {
    let mut external = ExternalCapabilities::default();
    if !device_exts.contains("VK_KHR_external_memory_fd")
        && !device_exts.contains("VK_ANDROID_external_memory_android_hardware_buffer")
    {
        return external;
    }

    for &(kind, handle_type) in CANDIDATE_MEMORY_HANDLE_KINDS {
        for (depth, format) in [(false, vk::Format::R8G8B8A8_SRGB), (true, vk::Format::D32_SFLOAT)] {
            let mut external_info = vk::PhysicalDeviceExternalImageFormatInfo::default().handle_type(handle_type);
            let image_info = vk::PhysicalDeviceImageFormatInfo2::default()
                .format(format)
                .ty(vk::ImageType::TYPE_2D)
                .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .push_next(&mut external_info);

            let mut external_props = vk::ExternalImageFormatProperties::default();
            let mut props = vk::ImageFormatProperties2::default().push_next(&mut external_props);

            let result = unsafe {
                instance.get_physical_device_image_format_properties2(physical_device, &image_info, &mut props)
            };
            if result.is_ok() {
                let feats = external_props.external_memory_properties.external_memory_features;
                if feats.contains(vk::ExternalMemoryFeatureFlags::EXPORTABLE) {
                    external.insert_image(depth, HandleDirection::Export, kind);
                }
                if feats.contains(vk::ExternalMemoryFeatureFlags::IMPORTABLE) {
                    external.insert_image(depth, HandleDirection::Import, kind);
                }
            }
        }
    }

    if device_exts.contains("VK_KHR_external_fence_fd") {
        external.fence_handles.insert(HandleKind::SyncFd);
    }
    if device_exts.contains("VK_KHR_external_semaphore_fd") {
        external.semaphore_handles_binary.insert(HandleKind::SyncFd);
        external.semaphore_handles_timeline.insert(HandleKind::SyncFd);
    }

    external
}
