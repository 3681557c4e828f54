use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use cinder_rhi::{RhiError, RhiResult};

use crate::debug::DebugMessenger;
use crate::error::vk_error;

/// 创建 [`crate::VulkanDevice`] 的参数
#[derive(Clone, Debug)]
pub struct VulkanCreateInfo {
    pub app_name: String,
    /// 开启 `VK_LAYER_KHRONOS_validation` 和 debug messenger
    pub validation: bool,
}

impl Default for VulkanCreateInfo {
    fn default() -> Self {
        Self {
            app_name: "cinder".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// instance、physical device、device、queue 和内存分配器
pub(crate) struct VulkanCore {
    /// 需要保持 entry 存活，否则动态库会被卸载
    _entry: ash::Entry,
    pub instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,

    pub properties: vk::PhysicalDeviceProperties,
    pub device_name: String,

    pub device: ash::Device,
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub queue_family_index: u32,
    pub queue: vk::Queue,

    /// 必须在 device 之前销毁
    pub allocator: Option<vk_mem::Allocator>,
}

// new & init
impl VulkanCore {
    pub fn new(info: &VulkanCreateInfo) -> RhiResult<Self> {
        let _span = cinder_rhi::profile_span!("VulkanCore::new");

        let entry = unsafe { ash::Entry::load() }.map_err(|err| RhiError::Native {
            call: "Entry::load",
            message: err.to_string(),
        })?;

        let instance = Self::init_instance(&entry, info)?;
        let debug_messenger = if info.validation {
            Some(DebugMessenger::new(&entry, &instance).map_err(vk_error("create_debug_utils_messenger"))?)
        } else {
            None
        };

        let (physical_device, queue_family_index) = Self::pick_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown gpu".to_string());
        log::info!("use gpu: {device_name}");

        let device = Self::init_device(&instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let debug_utils = info.validation.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let allocator = {
            let mut create_info = vk_mem::AllocatorCreateInfo::new(&instance, &device, physical_device);
            create_info.vulkan_api_version = vk::API_VERSION_1_3;
            unsafe { vk_mem::Allocator::new(create_info) }.map_err(vk_error("vmaCreateAllocator"))?
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,
            properties,
            device_name,
            device,
            debug_utils,
            queue_family_index,
            queue,
            allocator: Some(allocator),
        })
    }

    fn init_instance(entry: &ash::Entry, info: &VulkanCreateInfo) -> RhiResult<ash::Instance> {
        let app_name = CString::new(info.app_name.as_str()).unwrap_or_else(|_| c"cinder".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"cinder")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(vk_error("enumerate_instance_layer_properties"))?;
        let validation_layer = c"VK_LAYER_KHRONOS_validation";
        let has_validation = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == validation_layer));

        let mut layers: Vec<*const std::ffi::c_char> = Vec::new();
        let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
        if info.validation {
            if has_validation {
                layers.push(validation_layer.as_ptr());
            } else {
                log::warn!("validation layer is not available");
            }
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        log::info!(
            "instance layers: {}",
            layers.iter().map(|name| unsafe { CStr::from_ptr(*name) }.to_string_lossy()).join(", ")
        );

        let mut debug_info = DebugMessenger::create_info();
        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        if info.validation {
            instance_ci = instance_ci.push_next(&mut debug_info);
        }

        unsafe { entry.create_instance(&instance_ci, None) }.map_err(vk_error("create_instance"))
    }

    /// 优先选择独显；queue family 需要同时支持 graphics 和 compute
    fn pick_physical_device(instance: &ash::Instance) -> RhiResult<(vk::PhysicalDevice, u32)> {
        let physical_devices =
            unsafe { instance.enumerate_physical_devices() }.map_err(vk_error("enumerate_physical_devices"))?;

        let candidates = physical_devices
            .into_iter()
            .filter_map(|pdevice| {
                let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
                let family = families.iter().position(|family| {
                    family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                })?;
                let props = unsafe { instance.get_physical_device_properties(pdevice) };
                (props.api_version >= vk::API_VERSION_1_3).then_some((pdevice, family as u32, props.device_type))
            })
            .collect_vec();

        candidates
            .iter()
            .find(|(_, _, ty)| *ty == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| candidates.first())
            .map(|(pdevice, family, _)| (*pdevice, *family))
            .ok_or_else(|| RhiError::Native {
                call: "enumerate_physical_devices",
                message: "no vulkan 1.3 device with a graphics queue".to_string(),
            })
    }

    fn init_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> RhiResult<ash::Device> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)];

        let mut features_12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .host_query_reset(true);
        let mut features_13 = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true))
            .push_next(&mut features_12)
            .push_next(&mut features_13);

        let device_ci = vk::DeviceCreateInfo::default().queue_create_infos(&queue_infos).push_next(&mut features);

        unsafe { instance.create_device(physical_device, &device_ci, None) }.map_err(vk_error("create_device"))
    }
}

// getters
impl VulkanCore {
    #[inline]
    pub fn allocator(&self) -> RhiResult<&vk_mem::Allocator> {
        self.allocator.as_ref().ok_or_else(|| RhiError::Native {
            call: "allocator",
            message: "allocator has been destroyed".to_string(),
        })
    }

    /// timestamp 每秒的 tick 数
    #[inline]
    pub fn timestamp_frequency(&self) -> u64 {
        (1e9 / self.properties.limits.timestamp_period as f64) as u64
    }
}

// tools
impl VulkanCore {
    pub fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        if let Some(debug_utils) = &self.debug_utils {
            crate::debug::set_debug_name(debug_utils, handle, name);
        }
    }
}

// destroy
impl VulkanCore {
    pub fn destroy(mut self) {
        log::info!("destroying vulkan core");
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle before destroy: {err:?}");
            }
            drop(self.allocator.take());
            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
