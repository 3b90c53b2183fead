use std::sync::atomic::Ordering;

use ash::vk;
use itertools::Itertools;

use crate::commands::command_list::CommandList;
use crate::commands::recorder::RecorderState;
use crate::commands::submit::{GfxSubmitInfo, SemaphoreSubmit, SubmissionPlan, SubmitDesc};
use crate::device::{Device, NativeReleaser};
use crate::error::{RhiError, RhiResult};
use crate::foundation::physical_device::QueueKind;

// command list
impl Device {
    /// 从当前 frame slot 的 recorder 池中取出一个，开始录制
    ///
    /// 只需要 `&self`，多个线程可以并行录制；池中的 recorder 用完时返回 `RecorderPoolExhausted`
    pub fn begin_command_list(&self, kind: QueueKind) -> RhiResult<CommandList<'_>> {
        let frame = &self.frames[self.frame_counter.frame_slot()];
        let capacity = frame.recorders.len();

        let idx = frame.claimed.fetch_add(1, Ordering::AcqRel);
        if idx >= capacity {
            log::error!("frame {} has no free command recorder", self.frame_counter.frame_name());
            return Err(RhiError::RecorderPoolExhausted { capacity });
        }

        let mut recorder = frame.recorders[idx].lock();
        let label = format!("{}-{:?}-{}", self.frame_counter.frame_name(), kind, idx);
        recorder.begin(&self.gfx_device, kind, &label)?;
        Ok(CommandList::new(self, recorder))
    }

    /// 提交上一次提交之后所有已经结束录制的 command list
    ///
    /// 每种队列最多一次 native 提交，每次提交都会 signal 该队列的 frame timeline。
    /// 调用方的 semaphore 与 fence 只能挂在一次提交上，同时包含两种队列时返回 `MixedQueueSubmission`，
    /// 这些 command list 保持未提交状态。
    pub fn submit_command_lists(&mut self, desc: &SubmitDesc) -> RhiResult<()> {
        let _span = tracy_client::span!("Device::submit_command_lists");

        let slot = self.frame_counter.frame_slot();
        let frame = &mut self.frames[slot];
        let end = frame.claimed.load(Ordering::Acquire).min(frame.recorders.len());
        let start = frame.submitted.min(end);

        let lists = frame.recorders[start..end]
            .iter_mut()
            .map(|r| r.get_mut())
            .filter(|r| r.state() == RecorderState::Ended)
            .map(|r| (r.queue_kind(), r.command_buffer()))
            .collect_vec();
        if (start..end).len() != lists.len() {
            log::warn!("{} command lists were never ended and are skipped", (start..end).len() - lists.len());
        }

        let has_sync = desc.has_sync_objects();
        let plan = SubmissionPlan::new(&lists, has_sync).inspect_err(|_| {
            log::error!("graphics and compute lists cannot share the caller's semaphores and fence");
        })?;

        let waits = self.resolve_semaphores(&desc.waits)?;
        let signals = self.resolve_semaphores(&desc.signals)?;
        let fence = match desc.fence {
            Some(fence) => self.resources.fences.try_get(fence)?.fence,
            None => vk::Fence::null(),
        };

        let kinds = if plan.is_empty() && has_sync {
            // 没有 command list，也要让 semaphore 与 fence 得到处理
            vec![QueueKind::Graphics]
        } else {
            plan.kinds().collect_vec()
        };

        for kind in kinds {
            let timeline_value = self.frame_timeline.next_signal_value(kind);
            let mut submit_info = GfxSubmitInfo::new(plan.batch(kind)).signal(
                self.frame_timeline.semaphore(kind),
                vk::PipelineStageFlags2::ALL_COMMANDS,
                Some(timeline_value),
            );
            for (semaphore, stage, value) in &waits {
                submit_info = submit_info.wait(*semaphore, *stage, *value);
            }
            for (semaphore, stage, value) in &signals {
                submit_info = submit_info.signal(*semaphore, *stage, *value);
            }

            self.queue(kind).submit(&self.gfx_device, &[submit_info.submit_info()], fence)?;
            log::trace!(
                "submitted {} lists to {:?} queue, timeline value {}",
                plan.batch(kind).len(),
                kind,
                timeline_value
            );
        }

        let frame = &mut self.frames[slot];
        for recorder in &mut frame.recorders[start..end] {
            let recorder = recorder.get_mut();
            if recorder.state() == RecorderState::Ended {
                recorder.mark_submitted();
            }
        }
        frame.submitted = end;
        Ok(())
    }

    fn resolve_semaphores(
        &self,
        submits: &[SemaphoreSubmit],
    ) -> RhiResult<Vec<(vk::Semaphore, vk::PipelineStageFlags2, Option<u64>)>> {
        submits
            .iter()
            .map(|s| self.resources.semaphores.try_get(s.semaphore).map(|r| (r.semaphore, s.stage, s.value)))
            .collect()
    }
}

// frame
impl Device {
    /// 进入下一帧
    ///
    /// 等待新 slot 上一次使用时的所有提交完成，然后回收该 slot 的 graveyard。
    /// 等待超时视为 device lost。
    pub fn next_frame(&mut self) -> RhiResult<()> {
        let _span = tracy_client::span!("Device::next_frame");

        let frame = &mut self.frames[self.frame_counter.frame_slot()];
        for recorder in &mut frame.recorders {
            let recorder = recorder.get_mut();
            if recorder.state() != RecorderState::Idle {
                log::warn!("discarding command list recorded by {}", recorder.name());
                recorder.discard();
            }
        }

        // 等待成功之后再推进计数，失败时 frame id 仍然对应当前 slot
        let slot = self.frame_counter.next_slot();
        self.frame_timeline.wait_slot(&self.gfx_device, slot, self.config.fence_timeout_ns())?;
        self.frame_counter.next_frame();

        let mut releaser = NativeReleaser {
            device: &self.gfx_device,
            allocator: &self.allocator,
            bindless: &mut self.bindless,
            binding_pool: &mut self.binding_pool,
        };
        let resources = &mut self.resources;
        self.graveyard.finalize_frame(slot, |item| releaser.reclaim(resources, item));

        let frame = &mut self.frames[slot];
        *frame.claimed.get_mut() = 0;
        frame.submitted = 0;

        log::trace!("entering frame {}", self.frame_counter.frame_name());
        Ok(())
    }
}
