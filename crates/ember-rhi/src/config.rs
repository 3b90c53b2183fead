use ash::vk;
use serde::Deserialize;

use crate::error::{RhiError, RhiResult};

/// bindless 表中存放的 descriptor 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindlessDescriptorKind {
    SampledImage,
    StorageImage,
    CombinedImageSampler,
}
impl BindlessDescriptorKind {
    #[inline]
    pub fn vk_descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// Device 的创建参数
///
/// 所有字段都有默认值，可以从 toml 中只覆盖一部分：
/// ```toml
/// app_name = "demo"
/// frames_in_flight = 2
/// fence_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub app_name: String,

    /// 同时在 GPU 上执行的帧数量，也是 graveyard 的数量
    pub frames_in_flight: usize,
    /// 每一帧可以同时录制的 CommandList 数量
    pub recorders_per_frame: usize,

    pub bindless_capacity: u32,
    pub bindless_descriptor_type: BindlessDescriptorKind,

    /// 每个 recorder 的 transient buffer 初始大小，溢出时翻倍
    pub transient_block_size: u64,
    /// recorder 的每个 descriptor pool 能分配的 set 数量
    pub descriptor_pool_sets: u32,
    /// Binding 资源使用的常驻 descriptor pool 大小
    pub persistent_binding_sets: u32,

    /// 等待 fence / timeline 的超时，超时视为 device lost；None 表示无限等待
    pub fence_timeout_ms: Option<u64>,

    pub enable_validation: bool,
    pub prefer_discrete_gpu: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "ember".to_string(),
            frames_in_flight: 3,
            recorders_per_frame: 8,
            bindless_capacity: 4096,
            bindless_descriptor_type: BindlessDescriptorKind::SampledImage,
            transient_block_size: 1024 * 1024,
            descriptor_pool_sets: 256,
            persistent_binding_sets: 1024,
            fence_timeout_ms: Some(10_000),
            enable_validation: cfg!(debug_assertions),
            prefer_discrete_gpu: true,
        }
    }
}

impl DeviceConfig {
    pub fn from_toml_str(s: &str) -> RhiResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| RhiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RhiResult<()> {
        if self.frames_in_flight == 0 {
            return Err(RhiError::Config("frames_in_flight must be at least 1".to_string()));
        }
        if self.recorders_per_frame == 0 {
            return Err(RhiError::Config("recorders_per_frame must be at least 1".to_string()));
        }
        if self.bindless_capacity == 0 {
            return Err(RhiError::Config("bindless_capacity must be at least 1".to_string()));
        }
        if self.transient_block_size == 0 {
            return Err(RhiError::Config("transient_block_size must be non-zero".to_string()));
        }
        if self.descriptor_pool_sets == 0 || self.persistent_binding_sets == 0 {
            return Err(RhiError::Config("descriptor pool sizes must be non-zero".to_string()));
        }
        Ok(())
    }

    /// 以纳秒表示的等待超时
    #[inline]
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DeviceConfig::from_toml_str(
            r#"
            app_name = "demo"
            frames_in_flight = 2
            bindless_descriptor_type = "storage_image"
            "#,
        )
        .unwrap();

        assert_eq!(config.app_name, "demo");
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.bindless_descriptor_type, BindlessDescriptorKind::StorageImage);
        assert_eq!(config.recorders_per_frame, 8);
        assert_eq!(config.transient_block_size, 1024 * 1024);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let err = DeviceConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, RhiError::Config(_)));
    }

    #[test]
    fn test_fence_timeout() {
        let mut config = DeviceConfig::default();
        assert_eq!(config.fence_timeout_ns(), 10_000_000_000);
        config.fence_timeout_ms = None;
        assert_eq!(config.fence_timeout_ns(), u64::MAX);
    }
}
