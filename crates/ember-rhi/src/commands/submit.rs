use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::physical_device::QueueKind;
use crate::handles::{FenceHandle, SemaphoreHandle};

/// 对 `vk::SubmitInfo2` 的封装，持有所有数组
#[derive(Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: commands
                .iter()
                .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
                .collect_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(&self.command_buffers)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }

    /// binary semaphore 的 value 会被忽略
    #[inline]
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }
}

/// 提交时等待或 signal 的 semaphore
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSubmit {
    pub semaphore: SemaphoreHandle,
    pub stage: vk::PipelineStageFlags2,
    /// timeline semaphore 的值，binary semaphore 为 None
    pub value: Option<u64>,
}

impl SemaphoreSubmit {
    pub fn binary(semaphore: SemaphoreHandle, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage,
            value: None,
        }
    }

    pub fn timeline(semaphore: SemaphoreHandle, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage,
            value: Some(value),
        }
    }
}

/// `submit_command_lists` 的参数
#[derive(Debug, Clone, Default)]
pub struct SubmitDesc {
    pub waits: Vec<SemaphoreSubmit>,
    pub signals: Vec<SemaphoreSubmit>,
    pub fence: Option<FenceHandle>,
}

impl SubmitDesc {
    #[inline]
    pub fn has_sync_objects(&self) -> bool {
        !self.waits.is_empty() || !self.signals.is_empty() || self.fence.is_some()
    }

    /// builder
    #[inline]
    pub fn wait(mut self, wait: SemaphoreSubmit) -> Self {
        self.waits.push(wait);
        self
    }

    /// builder
    #[inline]
    pub fn signal(mut self, signal: SemaphoreSubmit) -> Self {
        self.signals.push(signal);
        self
    }

    /// builder
    #[inline]
    pub fn fence(mut self, fence: FenceHandle) -> Self {
        self.fence = Some(fence);
        self
    }
}

/// 按队列种类分组后的 command buffer，组内保持录制结束的顺序
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub batches: [Vec<vk::CommandBuffer>; 2],
}

impl SubmissionPlan {
    /// 调用方的 semaphore / fence 只能挂在一次 native 提交上，因此同时包含两种队列时报错
    pub fn new(lists: &[(QueueKind, vk::CommandBuffer)], has_sync_objects: bool) -> RhiResult<Self> {
        let mut plan = Self::default();
        for (kind, cmd) in lists {
            plan.batches[kind.index()].push(*cmd);
        }
        if has_sync_objects && plan.kinds().count() > 1 {
            return Err(RhiError::MixedQueueSubmission);
        }
        Ok(plan)
    }

    /// 有 command buffer 的队列种类
    pub fn kinds(&self) -> impl Iterator<Item = QueueKind> + '_ {
        QueueKind::ALL.into_iter().filter(|kind| !self.batches[kind.index()].is_empty())
    }

    #[inline]
    pub fn batch(&self, kind: QueueKind) -> &[vk::CommandBuffer] {
        &self.batches[kind.index()]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn cmd(raw: u64) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(raw)
    }

    #[test]
    fn test_partition_keeps_order() {
        let lists = [
            (QueueKind::Graphics, cmd(1)),
            (QueueKind::Compute, cmd(2)),
            (QueueKind::Graphics, cmd(3)),
        ];
        let plan = SubmissionPlan::new(&lists, false).unwrap();
        assert_eq!(plan.batch(QueueKind::Graphics), &[cmd(1), cmd(3)]);
        assert_eq!(plan.batch(QueueKind::Compute), &[cmd(2)]);
        assert_eq!(plan.kinds().count(), 2);
    }

    #[test]
    fn test_mixed_with_sync_objects_is_rejected() {
        let lists = [(QueueKind::Graphics, cmd(1)), (QueueKind::Compute, cmd(2))];
        assert!(matches!(SubmissionPlan::new(&lists, true), Err(RhiError::MixedQueueSubmission)));

        let lists = [(QueueKind::Compute, cmd(1)), (QueueKind::Compute, cmd(2))];
        let plan = SubmissionPlan::new(&lists, true).unwrap();
        assert_eq!(plan.kinds().collect_vec(), vec![QueueKind::Compute]);
    }

    #[test]
    fn test_submit_info_arrays() {
        let info = GfxSubmitInfo::new(&[cmd(1), cmd(2)])
            .wait(vk::Semaphore::from_raw(5), vk::PipelineStageFlags2::ALL_COMMANDS, None)
            .signal(vk::Semaphore::from_raw(6), vk::PipelineStageFlags2::ALL_COMMANDS, Some(9));
        let vk_info = info.submit_info();
        assert_eq!(vk_info.command_buffer_info_count, 2);
        assert_eq!(vk_info.wait_semaphore_info_count, 1);
        assert_eq!(vk_info.signal_semaphore_info_count, 1);
        assert!(SubmitDesc::default().fence(FenceHandle::default()).has_sync_objects());
    }
}
