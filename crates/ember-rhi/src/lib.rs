//! Vulkan RHI 设备核心
//!
//! 资源通过带代数的句柄访问，销毁延迟到 GPU 确认完成之后；
//! command list 按帧从 recorder 池中取出，提交时按队列种类分组。

pub mod basic;
pub mod commands;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod foundation;
pub mod frame;
pub mod handles;
pub mod pipelines;
pub mod resources;
pub mod swapchain;

pub use commands::barrier::{Barrier, GfxBarrierMask};
pub use commands::command_list::CommandList;
pub use commands::submit::{SemaphoreSubmit, SubmitDesc};
pub use config::{BindlessDescriptorKind, DeviceConfig};
pub use device::{AcquiredImage, Device};
pub use error::{RhiError, RhiResult};
pub use foundation::physical_device::QueueKind;
pub use handles::*;
pub use resources::descs::*;
pub use resources::resource_tables::ResourceCounts;
pub use swapchain::render_swapchain::SwapchainDesc;

// 调用方需要直接使用 vk 的枚举和结构体
pub use ash::vk;
