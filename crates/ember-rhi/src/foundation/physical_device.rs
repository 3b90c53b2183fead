use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};

/// 队列的种类，每种最多一个 native queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Graphics, QueueKind::Compute];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfxQueueFamily {
    pub name: &'static str,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// 在 queue family 中寻找 gfx 队列（全能）以及专用的 compute 队列
pub fn find_queue_families(props: &[vk::QueueFamilyProperties]) -> Option<(GfxQueueFamily, Option<GfxQueueFamily>)> {
    let find_queue_family = |name: &'static str, include_flags: vk::QueueFlags, exclude_flags: vk::QueueFlags| {
        props
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_count > 0
                    && props.queue_flags.contains(include_flags)
                    && (props.queue_flags & exclude_flags).is_empty()
            })
            .map(|(family_idx, props)| GfxQueueFamily {
                name,
                queue_family_index: family_idx as u32,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            })
    };

    // 全能的 Queue：graphics, compute, transfer
    let gfx = find_queue_family(
        "gfx",
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        vk::QueueFlags::empty(),
    )?;
    // Compute Only
    let compute = find_queue_family("compute-only", vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS);

    Some((gfx, compute))
}

/// 设备核心依赖的 features 是否都受支持
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredFeatures {
    pub descriptor_indexing: bool,
    pub synchronization2: bool,
    pub timeline_semaphore: bool,
    pub api_1_3: bool,
}

impl RequiredFeatures {
    #[inline]
    pub fn all_supported(&self) -> bool {
        self.descriptor_indexing && self.synchronization2 && self.timeline_semaphore && self.api_1_3
    }
}

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) features: vk::PhysicalDeviceFeatures,
    pub(crate) required: RequiredFeatures,
    pub(crate) device_extensions: Vec<vk::ExtensionProperties>,

    pub(crate) gfx_queue_family: GfxQueueFamily,
    pub(crate) compute_queue_family: Option<GfxQueueFamily>,
}

// new & init
impl GfxPhysicalDevice {
    /// 只考虑满足要求的显卡，`prefer_discrete` 时优先选择独立显卡，否则选择第一个
    pub fn select(instance: &ash::Instance, prefer_discrete: bool) -> RhiResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }
            .map_err(RhiError::vulkan("vkEnumeratePhysicalDevices"))?;

        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| Self::new(*pdevice, instance))
            .filter(|pdevice| {
                let supported = pdevice.required.all_supported();
                if !supported {
                    log::info!("skip gpu {:?}: {:?}", pdevice.name(), pdevice.required);
                }
                supported
            })
            .collect_vec();

        let chosen = if prefer_discrete {
            candidates.into_iter().find_or_first(GfxPhysicalDevice::is_descrete_gpu)
        } else {
            candidates.into_iter().next()
        };
        let chosen = chosen.ok_or(RhiError::NoSuitableDevice)?;
        log::info!("use gpu: {:?}", chosen.name());
        Ok(chosen)
    }

    /// 没有全能 queue family 的设备直接忽略
    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let mut indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
            let mut sync2 = vk::PhysicalDeviceSynchronization2Features::default();
            let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut indexing)
                .push_next(&mut sync2)
                .push_next(&mut timeline);
            instance.get_physical_device_features2(pdevice, &mut features2);
            let features = features2.features;

            let basic_props = instance.get_physical_device_properties(pdevice);
            log::info!("found gpu: {:?}", CStr::from_ptr(basic_props.device_name.as_ptr()));

            let required = RequiredFeatures {
                descriptor_indexing: indexing.descriptor_binding_partially_bound == vk::TRUE
                    && indexing.runtime_descriptor_array == vk::TRUE
                    && indexing.descriptor_binding_variable_descriptor_count == vk::TRUE
                    && indexing.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
                    && indexing.descriptor_binding_storage_image_update_after_bind == vk::TRUE,
                synchronization2: sync2.synchronization2 == vk::TRUE,
                timeline_semaphore: timeline.timeline_semaphore == vk::TRUE,
                api_1_3: basic_props.api_version >= vk::API_VERSION_1_3,
            };

            let device_extensions = instance.enumerate_device_extension_properties(pdevice).unwrap_or_default();
            log::debug!(
                "physical device supports extensions: {}",
                device_extensions.iter().filter_map(|ext| ext.extension_name_as_c_str().ok()).map(|s| s.to_string_lossy()).join("\n")
            );

            let queue_familiy_props = instance.get_physical_device_queue_family_properties(pdevice);
            log::debug!("physical device: queue family props:\n{:#?}", queue_familiy_props);
            let (gfx_queue_family, compute_queue_family) = find_queue_families(&queue_familiy_props)?;

            Some(Self {
                vk_handle: pdevice,
                basic_props,
                features,
                required,
                device_extensions,
                gfx_queue_family,
                compute_queue_family,
            })
        }
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn name(&self) -> String {
        self.basic_props.device_name_as_c_str().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    /// 一个 timestamp tick 对应的纳秒数
    #[inline]
    pub fn timestamp_period(&self) -> f32 {
        self.basic_props.limits.timestamp_period
    }

    #[inline]
    pub fn gfx_queue_family(&self) -> &GfxQueueFamily {
        &self.gfx_queue_family
    }

    #[inline]
    pub fn compute_queue_family(&self) -> Option<&GfxQueueFamily> {
        self.compute_queue_family.as_ref()
    }

    #[inline]
    pub fn supports_extension(&self, ext: &CStr) -> bool {
        self.device_extensions.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties::default().queue_flags(flags).queue_count(count)
    }

    #[test]
    fn test_dedicated_compute_family() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
        ];
        let (gfx, compute) = find_queue_families(&props).unwrap();
        assert_eq!(gfx.queue_family_index, 0);
        assert_eq!(compute.unwrap().queue_family_index, 2);
    }

    #[test]
    fn test_universal_family_only() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 1)];
        let (gfx, compute) = find_queue_families(&props).unwrap();
        assert_eq!(gfx.name, "gfx");
        assert!(compute.is_none());
    }

    #[test]
    fn test_no_universal_family() {
        let props = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4)];
        assert!(find_queue_families(&props).is_none());
    }
}
