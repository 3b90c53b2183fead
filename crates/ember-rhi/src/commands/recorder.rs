use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::basic::color::LabelColor;
use crate::commands::barrier::PendingBarriers;
use crate::config::DeviceConfig;
use crate::descriptors::binding_cache::DescriptorBindingCache;
use crate::descriptors::descriptor_info::{DescriptorBackend, DescriptorWrite, DescriptorWriter, write_descriptor_set};
use crate::descriptors::descriptor_pool::DescriptorPoolChain;
use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::mem_allocator::GfxMemAllocator;
use crate::foundation::physical_device::QueueKind;
use crate::resources::transient_allocator::{TransientAllocator, VmaTransientMemory};

/// recorder 的状态
///
/// Idle --begin--> Recording --end--> Ended --submit--> Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Ended,
}

impl RecorderState {
    /// Ended 但没有提交的 recorder 也可以重新开始，之前录制的内容被丢弃
    #[inline]
    pub fn can_begin(self) -> bool {
        self != Self::Recording
    }
}

/// 一种队列对应的 command pool 以及其中唯一的 command buffer
struct QueuePool {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl QueuePool {
    fn new(device: &GfxDevice, queue_family_index: u32, name: &str) -> RhiResult<Self> {
        let pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT),
                None,
            )
        }
        .map_err(RhiError::creation("command pool"))?;
        device.set_object_debug_name(pool, name);

        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { device.allocate_command_buffers(&info) } {
            Ok(cmds) => cmds[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(RhiError::creation("command buffer")(e));
            }
        };
        device.set_object_debug_name(cmd, name);

        Ok(Self { pool, cmd })
    }
}

/// recorder 访问 descriptor 的 native 实现
struct RecorderDescriptorBackend<'a> {
    device: &'a GfxDevice,
    pool: &'a mut DescriptorPoolChain,
    cmd: vk::CommandBuffer,
}

impl DescriptorWriter for RecorderDescriptorBackend<'_> {
    #[inline]
    fn update_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        write_descriptor_set(self.device, set, writes);
    }
}

impl DescriptorBackend for RecorderDescriptorBackend<'_> {
    #[inline]
    fn allocate_set(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.pool.allocate(self.device, layout)
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    fn bind_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(self.cmd, bind_point, layout, first_set, sets, &[]);
        }
    }
}

/// 每个 frame slot 中的一个录制单元
///
/// 持有 command pool、descriptor pool、binding cache 以及 transient buffer，
/// 所有状态在 `begin` 时重置（此时该 slot 上一轮的 GPU 工作已经完成）。
pub struct CommandRecorder {
    state: RecorderState,
    queue_kind: QueueKind,
    pools: [QueuePool; 2],

    pub(crate) descriptor_pool: DescriptorPoolChain,
    pub(crate) binding_cache: DescriptorBindingCache,
    pub(crate) transient: TransientAllocator<VmaTransientMemory>,
    pub(crate) barriers: PendingBarriers,
    pub(crate) in_render_pass: bool,
    /// 打开的 debug label 数量，end 时补齐
    open_labels: u32,

    name: String,
}

// new & init
impl CommandRecorder {
    /// `queue_families` 按 `QueueKind` 的顺序给出
    pub fn new(
        device: &Arc<GfxDevice>,
        allocator: &Arc<GfxMemAllocator>,
        queue_families: [u32; 2],
        config: &DeviceConfig,
        name: String,
    ) -> RhiResult<Self> {
        let gfx_pool = QueuePool::new(device, queue_families[0], &format!("{}-gfx", name))?;
        let compute_pool = match QueuePool::new(device, queue_families[1], &format!("{}-compute", name)) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_command_pool(gfx_pool.pool, None) };
                return Err(e);
            }
        };
        let transient = match TransientAllocator::new(
            VmaTransientMemory::new(allocator.clone(), device.clone(), format!("{}-transient", name)),
            config.transient_block_size,
        ) {
            Ok(transient) => transient,
            Err(e) => {
                unsafe {
                    device.destroy_command_pool(gfx_pool.pool, None);
                    device.destroy_command_pool(compute_pool.pool, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            state: RecorderState::Idle,
            queue_kind: QueueKind::Graphics,
            pools: [gfx_pool, compute_pool],
            descriptor_pool: DescriptorPoolChain::new(
                config.descriptor_pool_sets,
                vk::DescriptorPoolCreateFlags::empty(),
                format!("{}-descriptors", name),
            ),
            binding_cache: DescriptorBindingCache::new(),
            transient,
            barriers: PendingBarriers::default(),
            in_render_pass: false,
            open_labels: 0,
            name,
        })
    }
}

// destroy
impl CommandRecorder {
    pub fn destroy(self, device: &GfxDevice) {
        let Self {
            pools,
            mut descriptor_pool,
            transient,
            ..
        } = self;
        descriptor_pool.destroy(device);
        transient.destroy();
        for pool in pools {
            unsafe { device.destroy_command_pool(pool.pool, None) };
        }
    }
}

// getters
impl CommandRecorder {
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    #[inline]
    pub fn queue_kind(&self) -> QueueKind {
        self.queue_kind
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.pools[self.queue_kind.index()].cmd
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// 状态切换
impl CommandRecorder {
    /// 重置所有状态并开始录制
    pub fn begin(&mut self, device: &GfxDevice, queue_kind: QueueKind, label: &str) -> RhiResult<()> {
        if !self.state.can_begin() {
            debug_assert!(false, "recorder {} is already recording", self.name);
            log::error!("recorder {} is already recording", self.name);
            return Err(RhiError::Vulkan {
                call: "vkBeginCommandBuffer",
                result: vk::Result::ERROR_UNKNOWN,
            });
        }

        self.queue_kind = queue_kind;
        let pool = &self.pools[queue_kind.index()];
        unsafe { device.reset_command_pool(pool.pool, vk::CommandPoolResetFlags::empty()) }
            .map_err(RhiError::vulkan("vkResetCommandPool"))?;
        self.descriptor_pool.reset(device)?;
        self.binding_cache.reset();
        self.transient.reset();
        self.barriers.clear();
        self.in_render_pass = false;
        self.open_labels = 0;

        unsafe {
            device.begin_command_buffer(
                pool.cmd,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }
        .map_err(RhiError::vulkan("vkBeginCommandBuffer"))?;
        self.state = RecorderState::Recording;

        self.begin_label(device, label, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制：补齐 render pass 与 label，flush barrier 和 transient 内存
    pub fn end(&mut self, device: &GfxDevice) -> RhiResult<()> {
        if self.state != RecorderState::Recording {
            debug_assert!(false, "recorder {} is not recording", self.name);
            log::error!("recorder {} is not recording", self.name);
            return Ok(());
        }

        let cmd = self.command_buffer();
        if self.in_render_pass {
            log::warn!("recorder {} ended inside a render pass", self.name);
            unsafe { device.cmd_end_render_pass(cmd) };
            self.in_render_pass = false;
        }
        self.barriers.flush(device, cmd);
        while self.open_labels > 0 {
            self.end_label(device);
        }

        // 先把状态置为 Ended，之后的失败不会让 recorder 停留在 Recording
        self.state = RecorderState::Ended;
        self.transient.flush_all()?;
        unsafe { device.end_command_buffer(cmd) }.map_err(RhiError::vulkan("vkEndCommandBuffer"))
    }

    /// 提交之后回到 Idle
    #[inline]
    pub fn mark_submitted(&mut self) {
        debug_assert_eq!(self.state, RecorderState::Ended);
        self.state = RecorderState::Idle;
    }

    /// 未提交的录制内容被丢弃
    #[inline]
    pub fn discard(&mut self) {
        if self.state == RecorderState::Ended {
            log::warn!("recorder {} was ended but never submitted", self.name);
        }
        self.state = RecorderState::Idle;
    }
}

// tools
impl CommandRecorder {
    /// draw / dispatch 之前调用：先 flush barrier，再写入并 bind 脏的 descriptor set
    pub fn flush_bindings(&mut self, device: &GfxDevice, bindless_set: vk::DescriptorSet) -> RhiResult<()> {
        let cmd = self.command_buffer();
        let mut backend = RecorderDescriptorBackend {
            device,
            pool: &mut self.descriptor_pool,
            cmd,
        };
        self.binding_cache.flush(&mut backend, bindless_set)
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    pub fn begin_label(&mut self, device: &GfxDevice, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = device.debug_utils() else { return };
        let Ok(name) = CString::new(label_name) else { return };
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.command_buffer(),
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
        self.open_labels += 1;
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    pub fn end_label(&mut self, device: &GfxDevice) {
        let Some(debug_utils) = device.debug_utils() else { return };
        if self.open_labels == 0 {
            log::warn!("end_label without a matching begin_label in {}", self.name);
            return;
        }
        unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer()) };
        self.open_labels -= 1;
    }

    /// - command type: action
    /// - supported queue type: graphics, compute
    pub fn insert_label(&mut self, device: &GfxDevice, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = device.debug_utils() else { return };
        let Ok(name) = CString::new(label_name) else { return };
        unsafe {
            debug_utils.cmd_insert_debug_utils_label(
                self.command_buffer(),
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(RecorderState::Idle.can_begin());
        assert!(RecorderState::Ended.can_begin());
        assert!(!RecorderState::Recording.can_begin());
    }
}
