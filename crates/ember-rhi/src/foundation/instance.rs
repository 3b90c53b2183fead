use std::collections::HashSet;
use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::debug_messenger::GfxDebugMsger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
}

// new & init
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `extra_exts` 通常是窗口系统需要的 surface extensions
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        enable_validation: bool,
        extra_exts: &[&'static CStr],
    ) -> RhiResult<Self> {
        let _span = tracy_client::span!("GfxInstance::new");

        let app_name = CString::new(app_name).map_err(|e| RhiError::Config(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3)
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"ember")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_exts)?;
        log::info!(
            "instance extensions: {}",
            enabled_extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let enabled_layers = Self::get_layers(vk_entry, enable_validation)?;
        log::info!(
            "instance layers: {}",
            enabled_layers.iter().map(|layer| format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) })).join("")
        );

        // instance 创建和销毁期间的消息也需要输出
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers)
            .push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.map_err(RhiError::creation("instance"))?;

        Ok(Self { ash_instance })
    }

    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_exts: &[&'static CStr]) -> RhiResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .map_err(RhiError::vulkan("vkEnumerateInstanceExtensionProperties"))?;
        let supported = all_ext_props.iter().map(|props| props.extension_name_as_c_str().unwrap_or_default()).collect_vec();

        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();
        for ext in extra_exts.iter().copied().chain(Self::basic_instance_exts()) {
            if !supported.contains(&ext) {
                return Err(RhiError::MissingExtension(ext.to_string_lossy().into_owned()));
            }
            enabled_extensions.insert(ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// validation layer 不存在时只给出警告，可以通过 vulkan configurator 开启
    fn get_layers(vk_entry: &ash::Entry, enable_validation: bool) -> RhiResult<Vec<*const c_char>> {
        if !enable_validation {
            return Ok(Vec::new());
        }

        let all_layer_props = unsafe { vk_entry.enumerate_instance_layer_properties() }
            .map_err(RhiError::vulkan("vkEnumerateInstanceLayerProperties"))?;
        let supported =
            all_layer_props.iter().any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if !supported {
            log::warn!("{:?} is not installed, validation disabled", VALIDATION_LAYER);
            return Ok(Vec::new());
        }

        Ok(vec![VALIDATION_LAYER.as_ptr()])
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        // debug utils 提供 debug messenger、object name 以及 command buffer 中的 label
        vec![vk::EXT_DEBUG_UTILS_NAME]
    }
}

// destroy
impl GfxInstance {
    pub fn destroy(&self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}
