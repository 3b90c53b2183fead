use ash::vk;

use crate::handles::ResourceKind;

/// RHI 层统一的错误类型
///
/// 编程错误（句柄失效、binding 越界、录制状态不对）不走这里，而是在 debug 下直接断言
#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("failed to load vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("no physical device satisfies the requirements")]
    NoSuitableDevice,

    #[error("required extension or layer is missing: {0}")]
    MissingExtension(String),

    /// 驱动拒绝创建 native 对象，携带 native 的错误码
    #[error("failed to create {what}: {result}")]
    ResourceCreation { what: &'static str, result: vk::Result },

    /// vma 分配失败
    #[error("failed to allocate memory for {what}: {result}")]
    Allocation { what: &'static str, result: vk::Result },

    #[error("vulkan call {call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },

    #[error("bindless table exhausted (capacity {capacity})")]
    BindlessExhausted { capacity: u32 },

    #[error("all {capacity} command recorders of the frame are in use")]
    RecorderPoolExhausted { capacity: usize },

    /// 同一次提交同时包含 graphics 和 compute，且调用方提供了 semaphore 或 fence
    #[error("submission mixes graphics and compute lists while carrying sync objects")]
    MixedQueueSubmission,

    #[error("device lost")]
    DeviceLost,

    #[error("stale or invalid {kind:?} handle")]
    InvalidHandle { kind: ResourceKind },

    #[error("shader reflection failed: {0}")]
    ShaderReflection(String),

    #[error("pipeline layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("invalid config: {0}")]
    Config(String),

    /// 读写 buffer 或 texture 时超出了资源的范围
    #[error("out of range access: {0}")]
    OutOfRange(String),

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,
}

pub type RhiResult<T> = Result<T, RhiError>;

impl RhiError {
    /// 将创建类 API 的错误码转换为 `ResourceCreation`，device lost 单独处理
    #[inline]
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> RhiError {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            result => RhiError::ResourceCreation { what, result },
        }
    }

    /// vma 的错误码转换
    #[inline]
    pub fn allocation(what: &'static str) -> impl FnOnce(vk::Result) -> RhiError {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            result => RhiError::Allocation { what, result },
        }
    }

    /// 非创建类 API 的错误码转换
    #[inline]
    pub fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> RhiError {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            result => RhiError::Vulkan { call, result },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_mapped() {
        let err = RhiError::creation("buffer")(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RhiError::DeviceLost));

        let err = RhiError::vulkan("vkQueueSubmit2")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(
            err,
            RhiError::Vulkan {
                call: "vkQueueSubmit2",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            }
        ));
    }

    #[test]
    fn test_creation_error_keeps_native_code() {
        let err = RhiError::creation("texture")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        match err {
            RhiError::ResourceCreation { what, result } => {
                assert_eq!(what, "texture");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
