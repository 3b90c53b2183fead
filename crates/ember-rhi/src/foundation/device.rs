use std::ffi::{CStr, CString};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::physical_device::GfxPhysicalDevice;

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及扩展的函数指针，在设备的生命周期中保持不变，可以跨线程共享。
pub struct GfxDevice {
    pub(crate) device: ash::Device,
    /// 调试工具扩展 API，instance 未开启 debug utils 时为 None
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
    /// 交换链扩展 API，显卡不支持 swapchain 时为 None（headless）
    pub(crate) swapchain: Option<ash::khr::swapchain::Device>,

    destroyed: AtomicBool,
}

// new & init
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: &GfxPhysicalDevice,
        queue_create_infos: &[vk::DeviceQueueCreateInfo],
        enable_debug_utils: bool,
    ) -> RhiResult<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        let device_exts = Self::device_exts(pdevice);
        log::info!("device exts: {}", device_exts.iter().map(|ext| format!("\n\t{:?}", ext)).join(""));
        let device_ext_ptrs = device_exts.iter().map(|ext| ext.as_ptr()).collect_vec();

        let mut all_features =
            vk::PhysicalDeviceFeatures2::default().features(Self::physical_device_basic_features(pdevice));
        let mut physical_device_ext_features = Self::physical_device_extra_features();
        unsafe {
            physical_device_ext_features.iter_mut().for_each(|f| {
                let ptr = <*mut dyn vk::ExtendsPhysicalDeviceFeatures2>::cast::<vk::BaseOutStructure>(f.as_mut());
                (*ptr).p_next = all_features.p_next as _;
                all_features.p_next = ptr as _;
            });
        }

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(queue_create_infos)
            .enabled_extension_names(&device_ext_ptrs)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice.vk_handle(), &device_create_info, None) }
            .map_err(RhiError::creation("device"))?;

        let swapchain = device_exts
            .contains(&ash::khr::swapchain::NAME)
            .then(|| ash::khr::swapchain::Device::new(instance, &device));
        let debug_utils = enable_debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        Ok(Self {
            device,
            debug_utils,
            swapchain,
            destroyed: AtomicBool::new(false),
        })
    }

    /// 必要的 physical device core features
    fn physical_device_basic_features(pdevice: &GfxPhysicalDevice) -> vk::PhysicalDeviceFeatures {
        let supported = &pdevice.features;
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
            .pipeline_statistics_query(supported.pipeline_statistics_query == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
    }

    /// 必要的 physical device extension features
    fn physical_device_extra_features() -> Vec<Box<dyn vk::ExtendsPhysicalDeviceFeatures2>> {
        vec![
            Box::new(vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true)),
            Box::new(vk::PhysicalDeviceHostQueryResetFeatures::default().host_query_reset(true)),
            Box::new(vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true)),
            Box::new(vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true)),
            Box::new(
                vk::PhysicalDeviceDescriptorIndexingFeatures::default()
                    .descriptor_binding_partially_bound(true) // 即使一些 descriptor 是 invalid
                    .runtime_descriptor_array(true)
                    .shader_sampled_image_array_non_uniform_indexing(true)
                    .descriptor_binding_sampled_image_update_after_bind(true)
                    .descriptor_binding_storage_image_update_after_bind(true)
                    .descriptor_binding_variable_descriptor_count(true),
            ),
        ]
    }

    /// 需要开启的 device extensions，swapchain 在不支持时省略
    fn device_exts(pdevice: &GfxPhysicalDevice) -> Vec<&'static CStr> {
        let mut exts = vec![];
        if pdevice.supports_extension(ash::khr::swapchain::NAME) {
            exts.push(ash::khr::swapchain::NAME);
        } else {
            log::warn!("{:?} is not supported, running headless", ash::khr::swapchain::NAME);
        }
        exts
    }
}

// destroy
impl GfxDevice {
    pub fn destroy(&self) {
        log::info!("destroying device");
        self.destroyed.store(true, Ordering::Release);
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }

    #[inline]
    pub fn swapchain(&self) -> Option<&ash::khr::swapchain::Device> {
        self.swapchain.as_ref()
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }
}

// tools
impl GfxDevice {
    /// debug name 设置失败只记录日志
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name.as_ref()) else {
            log::warn!("debug name {:?} contains a nul byte", name.as_ref());
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    #[inline]
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RhiError::vulkan("vkDeviceWaitIdle"))
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for GfxDevice {
    fn drop(&mut self) {
        debug_assert!(self.destroyed.load(Ordering::Acquire), "GfxDevice must be destroyed before being dropped.");
    }
}
