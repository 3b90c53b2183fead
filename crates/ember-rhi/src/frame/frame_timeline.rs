use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::QueueKind;

/// 每种队列一个 timeline semaphore
///
/// 每次 native 提交都 signal 下一个 timeline 值，并记在当前 frame slot 上；
/// 下一次进入这个 slot 时等待这些值，之后该 slot 的资源就可以安全复用。
pub struct FrameTimeline {
    semaphores: [vk::Semaphore; 2],
    /// 每种队列最近一次 signal 的值
    last_values: [u64; 2],
    /// 每个 frame slot 需要等待的值
    slot_values: Vec<[u64; 2]>,
    active_slot: usize,
}

// new & init
impl FrameTimeline {
    pub fn new(device: &GfxDevice, fif_count: usize) -> RhiResult<Self> {
        let mut semaphores = [vk::Semaphore::null(); 2];
        for kind in QueueKind::ALL {
            let mut timeline_type_ci =
                vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE).initial_value(0);
            let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
            let semaphore = match unsafe { device.create_semaphore(&timeline_semaphore_ci, None) } {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    for created in semaphores.iter().filter(|s| **s != vk::Semaphore::null()) {
                        unsafe { device.destroy_semaphore(*created, None) };
                    }
                    return Err(RhiError::creation("frame timeline semaphore")(e));
                }
            };
            device.set_object_debug_name(semaphore, format!("frame-timeline-{:?}", kind));
            semaphores[kind.index()] = semaphore;
        }

        let mut timeline = Self::new_detached(fif_count);
        timeline.semaphores = semaphores;
        Ok(timeline)
    }

    /// 不持有 native semaphore，只维护计数
    pub fn new_detached(fif_count: usize) -> Self {
        Self {
            semaphores: [vk::Semaphore::null(); 2],
            last_values: [0; 2],
            slot_values: vec![[0; 2]; fif_count],
            active_slot: 0,
        }
    }
}

// destroy
impl FrameTimeline {
    pub fn destroy(&mut self, device: &GfxDevice) {
        for semaphore in &mut self.semaphores {
            if *semaphore != vk::Semaphore::null() {
                unsafe { device.destroy_semaphore(*semaphore, None) };
                *semaphore = vk::Semaphore::null();
            }
        }
    }
}

// getters
impl FrameTimeline {
    #[inline]
    pub fn semaphore(&self, kind: QueueKind) -> vk::Semaphore {
        self.semaphores[kind.index()]
    }

    #[inline]
    pub fn last_value(&self, kind: QueueKind) -> u64 {
        self.last_values[kind.index()]
    }

    #[inline]
    pub fn slot_values(&self, slot: usize) -> [u64; 2] {
        self.slot_values[slot]
    }
}

// tools
impl FrameTimeline {
    /// 为一次提交分配新的 timeline 值，并记录到当前 slot
    pub fn next_signal_value(&mut self, kind: QueueKind) -> u64 {
        let value = self.last_values[kind.index()] + 1;
        self.last_values[kind.index()] = value;
        self.slot_values[self.active_slot][kind.index()] = value;
        value
    }

    /// 切换到新的 slot 之前调用，等待该 slot 上一次使用时的所有提交
    ///
    /// 超时视为 device lost
    pub fn wait_slot(&mut self, device: &GfxDevice, slot: usize, timeout_ns: u64) -> RhiResult<()> {
        let values = self.slot_values[slot];
        let (semaphores, values): (Vec<_>, Vec<_>) = QueueKind::ALL
            .iter()
            .filter(|kind| values[kind.index()] > 0)
            .map(|kind| (self.semaphores[kind.index()], values[kind.index()]))
            .unzip();

        if !semaphores.is_empty() {
            let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
            match unsafe { device.wait_semaphores(&wait_info, timeout_ns) } {
                Ok(()) => {}
                Err(vk::Result::TIMEOUT) => {
                    log::error!(
                        "waiting for frame slot {} timed out (values {:?}), treating the device as lost",
                        slot,
                        values.iter().join(", ")
                    );
                    return Err(RhiError::DeviceLost);
                }
                Err(e) => return Err(RhiError::vulkan("vkWaitSemaphores")(e)),
            }
        }

        self.active_slot = slot;
        Ok(())
    }

    /// 不等待，直接切换 slot；只用于已经 wait idle 的情况
    #[inline]
    pub fn set_active_slot(&mut self, slot: usize) {
        self.active_slot = slot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_recorded_per_slot() {
        let mut timeline = FrameTimeline::new_detached(3);
        assert_eq!(timeline.next_signal_value(QueueKind::Graphics), 1);
        assert_eq!(timeline.next_signal_value(QueueKind::Graphics), 2);
        assert_eq!(timeline.slot_values(0), [2, 0]);

        timeline.set_active_slot(1);
        assert_eq!(timeline.next_signal_value(QueueKind::Compute), 1);
        assert_eq!(timeline.next_signal_value(QueueKind::Graphics), 3);
        assert_eq!(timeline.slot_values(1), [3, 1]);
        // slot 0 保持上一次的值
        assert_eq!(timeline.slot_values(0), [2, 0]);
        assert_eq!(timeline.last_value(QueueKind::Graphics), 3);
    }
}
