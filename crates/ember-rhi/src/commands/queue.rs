use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::GfxQueueFamily;

/// 一个 native queue 以及它所属的 queue family
pub struct GfxQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: GfxQueueFamily,
}

impl GfxQueue {
    pub fn new(device: &GfxDevice, queue_family: GfxQueueFamily, name: &str) -> Self {
        let vk_queue = unsafe { device.get_device_queue(queue_family.queue_family_index, 0) };
        device.set_object_debug_name(vk_queue, format!("queue-{}", name));
        log::info!("{} queue's queue family:\n{:#?}", name, queue_family);
        Self { vk_queue, queue_family }
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.queue_family.queue_family_index
    }

    /// - 同步方式：fence 可以为 null
    pub fn submit(&self, device: &GfxDevice, submit_infos: &[vk::SubmitInfo2], fence: vk::Fence) -> RhiResult<()> {
        unsafe { device.queue_submit2(self.vk_queue, submit_infos, fence) }.map_err(RhiError::vulkan("vkQueueSubmit2"))
    }

    pub fn wait_idle(&self, device: &GfxDevice) -> RhiResult<()> {
        unsafe { device.queue_wait_idle(self.vk_queue) }.map_err(RhiError::vulkan("vkQueueWaitIdle"))
    }
}
