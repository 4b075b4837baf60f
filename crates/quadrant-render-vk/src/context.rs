// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use anyhow::{anyhow, Context as _};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use quadrant_render::{RenderError, RenderWindow, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

#[cfg(debug_assertions)]
type DebugState = vk::DebugUtilsMessengerEXT;
#[cfg(not(debug_assertions))]
type DebugState = ();

/// Instance, surface, logical device and the single graphics+present queue.
pub struct VkContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    debug: DebugState,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .context("create_debug_utils_messenger")?;
    Ok(messenger)
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    unsafe { loader.destroy_debug_utils_messenger(dbg, None) };
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(_entry: &Entry, _instance: &Instance, _dbg: DebugState) {}

fn has_layer(entry: &Entry, name: &CStr) -> bool {
    // SAFETY: plain enumeration on a loaded entry
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app = c"Quadrant";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let wsi = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;
    #[allow(unused_mut)]
    let mut exts = wsi.to_vec();

    let validation = c"VK_LAYER_KHRONOS_validation";
    #[allow(unused_mut)]
    let mut layers: Vec<*const std::ffi::c_char> = Vec::new();
    #[cfg(debug_assertions)]
    {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
        if has_layer(entry, validation) {
            layers.push(validation.as_ptr());
        } else {
            warn!("validation layer not installed");
        }
    }
    #[cfg(not(debug_assertions))]
    let _ = (has_layer, validation);

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;
    Ok(instance)
}

/// First graphics queue that can present, discrete GPUs first.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let mut devices =
        unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    devices.sort_by_key(|&p| {
        let props = unsafe { instance.get_physical_device_properties(p) };
        props.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
    });

    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let present = unsafe {
                surf_i
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            };
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(RenderError::Unsupported(
        "no physical device with a graphics+present queue".into(),
    ))
}

impl VkContext {
    // STRICT ORDER:
    // 1) instance (WSI + debug extensions)
    // 2) surface from THIS instance
    // 3) physical device / queue family checked against the surface
    // 4) logical device
    pub unsafe fn new(window: &dyn RenderWindow) -> Result<Self> {
        let dh = window
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;
        let instance = unsafe { create_instance(&entry, dh)? };
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
            .context("ash_window::create_surface")?;
        let debug = unsafe { create_debug_messenger(&entry, &instance)? };

        let (phys, queue_family) =
            unsafe { pick_device_and_queue(&instance, &surface_loader, surface)? };
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let mem_props = unsafe { instance.get_physical_device_memory_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "vk: device {name} (api {}.{})",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version)
        );

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device =
            unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            phys,
            props,
            mem_props,
            device,
            queue,
            queue_family,
            debug,
        })
    }

    /// Device, then surface, instance last. Everything created from the
    /// device must already be gone.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_debug_messenger(&self.entry, &self.instance, self.debug);
            self.instance.destroy_instance(None);
        }
    }
}
