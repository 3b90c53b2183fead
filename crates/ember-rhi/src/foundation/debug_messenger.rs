use std::ffi::CStr;

use ash::vk;

use crate::error::{RhiError, RhiResult};

pub struct GfxDebugMsger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

// new & init
impl GfxDebugMsger {
    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> RhiResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&Self::debug_utils_messenger_ci(), None) }
            .map_err(RhiError::creation("debug messenger"))?;

        Ok(Self { loader, messenger })
    }

    /// 用于创建 debug messenger 的结构体，也会挂在 instance 的创建参数上
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

// destroy
impl GfxDebugMsger {
    pub fn destroy(&self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// 将 validation 消息拆成两部分：
/// - 其余字段整理为格式化的 json
/// - `MainMessage` 字段中带有换行，单独输出
fn split_validation_message(msg: &str) -> (String, String) {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg).ok();
    let Some(obj) = json_value.as_mut().and_then(|v| v.as_object_mut()) else {
        return (msg.to_string(), String::new());
    };

    let main_msg = obj.remove("MainMessage").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
    let rest = serde_json::to_string_pretty(obj).unwrap_or_else(|_| msg.to_string());
    (rest, main_msg)
}

fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Debug,
        _ => log::Level::Info,
    }
}

/// debug messenger 的回调函数
/// # Safety
/// 由驱动调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = match unsafe { p_callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe { CStr::from_ptr(data.p_message).to_string_lossy() },
        _ => std::borrow::Cow::from(""),
    };

    let (rest, main_msg) = split_validation_message(msg.as_ref());
    log::log!(log_level(message_severity), "[{:?}]\n{}\n{}\n", message_type, rest, main_msg);

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_message_is_split_out() {
        let msg = r#"{"MessageID":"0x1234","MainMessage":"line 1\nline 2"}"#;
        let (rest, main_msg) = split_validation_message(msg);
        assert_eq!(main_msg, "line 1\nline 2");
        assert!(rest.contains("MessageID"));
        assert!(!rest.contains("MainMessage"));
    }

    #[test]
    fn test_plain_message_passes_through() {
        let (rest, main_msg) = split_validation_message("vkCreateDevice: something odd");
        assert_eq!(rest, "vkCreateDevice: something odd");
        assert!(main_msg.is_empty());
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), log::Level::Error);
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), log::Level::Warn);
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), log::Level::Info);
    }
}
