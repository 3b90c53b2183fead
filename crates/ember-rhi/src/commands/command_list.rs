use ash::vk;
use parking_lot::MutexGuard;

use crate::commands::barrier::{Barrier, GfxBufferBarrier, GfxImageBarrier};
use crate::commands::recorder::{CommandRecorder, RecorderState};
use crate::descriptors::binding_cache::BindingCacheStats;
use crate::descriptors::descriptor_info::DescriptorInfo;
use crate::device::Device;
use crate::error::RhiResult;
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::QueueKind;
use crate::handles::{
    BindingHandle, BufferHandle, ComputePipelineHandle, FramebufferHandle, GraphicsPipelineHandle, QueryPoolHandle,
    RenderPassHandle, ResourceHandle, SamplerHandle, TextureHandle,
};
use crate::resources::descs::BindingResource;
use crate::resources::handle_table::HandleTable;
use crate::resources::records::{PipelineRecord, format_aspects};
use crate::resources::transient_allocator::TransientAllocation;

/// transient 顶点数据的对齐
const TRANSIENT_VERTEX_ALIGN: u64 = 16;
/// `vkCmdCopyBuffer` 和 index buffer 需要的最小对齐
const TRANSIENT_COPY_ALIGN: u64 = 4;

/// 录制期间使用失效的句柄是编程错误：debug 下直接断言，release 下跳过这条命令
fn lookup<K: ResourceHandle, R>(table: &HandleTable<K, R>, handle: K) -> Option<&R> {
    let record = table.get(handle);
    if record.is_none() {
        log::error!("stale {:?} handle used while recording", K::KIND);
        debug_assert!(false, "stale {:?} handle used while recording", K::KIND);
    }
    record
}

/// 从 `Device::begin_command_list` 得到的录制接口
///
/// 持有该帧某个 recorder 的独占访问权，不同线程可以同时录制不同的 CommandList。
/// 录制结束调用 `end`，之后由 `Device::submit_command_lists` 统一提交。
pub struct CommandList<'a> {
    device: &'a Device,
    recorder: MutexGuard<'a, CommandRecorder>,
}

// new & init
impl<'a> CommandList<'a> {
    pub(crate) fn new(device: &'a Device, recorder: MutexGuard<'a, CommandRecorder>) -> Self {
        Self { device, recorder }
    }
}

// getters
impl CommandList<'_> {
    #[inline]
    pub fn queue_kind(&self) -> QueueKind {
        self.recorder.queue_kind()
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.recorder.command_buffer()
    }

    #[inline]
    pub fn binding_stats(&self) -> BindingCacheStats {
        self.recorder.binding_cache.stats()
    }

    /// 当前 recorder 的 transient buffer 扩容次数
    #[inline]
    pub fn transient_grow_count(&self) -> u32 {
        self.recorder.transient.grow_count()
    }

    #[inline]
    fn gfx_device(&self) -> &GfxDevice {
        &self.device.gfx_device
    }
}

// pipeline & descriptor
impl CommandList<'_> {
    fn bind_pipeline_record(&mut self, record: &PipelineRecord) {
        let device = self.device;
        if self.recorder.binding_cache.bind_pipeline(record.pipeline, record.bind_point, record.layout.clone()) {
            unsafe {
                device.gfx_device.cmd_bind_pipeline(self.recorder.command_buffer(), record.bind_point, record.pipeline);
            }
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) {
        debug_assert_eq!(self.queue_kind(), QueueKind::Graphics);
        let device = self.device;
        if let Some(record) = lookup(&device.resources.graphics_pipelines, pipeline) {
            self.bind_pipeline_record(record);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    pub fn bind_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        let device = self.device;
        if let Some(record) = lookup(&device.resources.compute_pipelines, pipeline) {
            self.bind_pipeline_record(record);
        }
    }

    /// 只记录，不产生 native 调用；下一次 draw / dispatch 时统一写入
    pub fn bind_resource(&mut self, set: u32, binding: u32, resource: BindingResource) {
        match self.device.resources.resolve_descriptor(resource) {
            Ok(info) => self.recorder.binding_cache.update_binding(set, binding, info),
            Err(e) => {
                log::error!("bind_resource(set {}, binding {}): {}", set, binding, e);
                debug_assert!(false, "bind_resource with a stale handle: {}", e);
            }
        }
    }

    #[inline]
    pub fn bind_uniform_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.bind_resource(set, binding, BindingResource::UniformBuffer { buffer, offset, range });
    }

    #[inline]
    pub fn bind_storage_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.bind_resource(set, binding, BindingResource::StorageBuffer { buffer, offset, range });
    }

    #[inline]
    pub fn bind_sampled_texture(&mut self, set: u32, binding: u32, texture: TextureHandle) {
        self.bind_resource(set, binding, BindingResource::SampledTexture(texture));
    }

    #[inline]
    pub fn bind_storage_texture(&mut self, set: u32, binding: u32, texture: TextureHandle) {
        self.bind_resource(set, binding, BindingResource::StorageTexture(texture));
    }

    #[inline]
    pub fn bind_sampler(&mut self, set: u32, binding: u32, sampler: SamplerHandle) {
        self.bind_resource(set, binding, BindingResource::Sampler(sampler));
    }

    #[inline]
    pub fn bind_combined_texture(&mut self, set: u32, binding: u32, texture: TextureHandle, sampler: SamplerHandle) {
        self.bind_resource(set, binding, BindingResource::CombinedTexture(texture, sampler));
    }

    /// 整个 set 使用预先创建的 Binding 资源
    pub fn bind_binding(&mut self, set: u32, binding: BindingHandle) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.bindings, binding) else { return };
        debug_assert_eq!(record.set, set, "binding {} was created for set {}", record.name, record.set);
        self.recorder.binding_cache.update_external_set(set, record.descriptor_set);
    }

    /// 数据写入 transient buffer，作为 uniform buffer 绑定
    pub fn bind_transient_uniform(&mut self, set: u32, binding: u32, data: &[u8]) -> RhiResult<()> {
        let align = self.device.pdevice.limits().min_uniform_buffer_offset_alignment;
        let allocation = self.recorder.transient.upload(data, align)?;
        self.recorder.binding_cache.update_binding(
            set,
            binding,
            DescriptorInfo::UniformBuffer {
                buffer: allocation.buffer,
                offset: allocation.offset,
                range: allocation.size,
            },
        );
        Ok(())
    }

    pub fn bind_transient_storage(&mut self, set: u32, binding: u32, data: &[u8]) -> RhiResult<()> {
        let align = self.device.pdevice.limits().min_storage_buffer_offset_alignment;
        let allocation = self.recorder.transient.upload(data, align)?;
        self.recorder.binding_cache.update_binding(
            set,
            binding,
            DescriptorInfo::StorageBuffer {
                buffer: allocation.buffer,
                offset: allocation.offset,
                range: allocation.size,
            },
        );
        Ok(())
    }

    /// 在 transient buffer 中分配并写入，返回的区域在本帧提交完成前有效
    #[inline]
    pub fn transient_upload(&mut self, data: &[u8], align: u64) -> RhiResult<TransientAllocation> {
        self.recorder.transient.upload(data, align)
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    pub fn push_constants(&mut self, offset: u32, data: &[u8]) {
        let Some(layout) = self.recorder.binding_cache.bound_layout() else {
            log::error!("push_constants without a bound pipeline");
            debug_assert!(false, "push_constants without a bound pipeline");
            return;
        };
        let stages = layout.push_constant_stages(offset, data.len() as u32);
        if stages.is_empty() {
            log::error!("push_constants [{}, +{}) is outside every push constant range", offset, data.len());
            debug_assert!(false, "push_constants outside every push constant range");
            return;
        }
        unsafe {
            self.device.gfx_device.cmd_push_constants(
                self.recorder.command_buffer(),
                layout.pipeline_layout,
                stages,
                offset,
                data,
            );
        }
    }
}

// vertex & index
impl CommandList<'_> {
    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(BufferHandle, vk::DeviceSize)]) {
        let device = self.device;
        let mut vk_buffers = Vec::with_capacity(buffers.len());
        let mut offsets = Vec::with_capacity(buffers.len());
        for (buffer, offset) in buffers {
            let Some(record) = lookup(&device.resources.buffers, *buffer) else { return };
            vk_buffers.push(record.buffer);
            offsets.push(*offset);
        }
        unsafe {
            device.gfx_device.cmd_bind_vertex_buffers(self.recorder.command_buffer(), first_binding, &vk_buffers, &offsets);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: vk::DeviceSize, index_type: vk::IndexType) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.buffers, buffer) else { return };
        unsafe {
            device.gfx_device.cmd_bind_index_buffer(self.recorder.command_buffer(), record.buffer, offset, index_type);
        }
    }

    pub fn bind_transient_vertex_buffer(&mut self, binding: u32, data: &[u8]) -> RhiResult<()> {
        let allocation = self.recorder.transient.upload(data, TRANSIENT_VERTEX_ALIGN)?;
        unsafe {
            self.device.gfx_device.cmd_bind_vertex_buffers(
                self.recorder.command_buffer(),
                binding,
                &[allocation.buffer],
                &[allocation.offset],
            );
        }
        Ok(())
    }

    pub fn bind_transient_index_buffer(&mut self, data: &[u8], index_type: vk::IndexType) -> RhiResult<()> {
        let allocation = self.recorder.transient.upload(data, TRANSIENT_COPY_ALIGN)?;
        unsafe {
            self.device.gfx_device.cmd_bind_index_buffer(
                self.recorder.command_buffer(),
                allocation.buffer,
                allocation.offset,
                index_type,
            );
        }
        Ok(())
    }
}

// draw & dispatch
impl CommandList<'_> {
    /// draw / dispatch 之前：flush barrier，写入并 bind 脏的 descriptor set
    fn prepare(&mut self, bind_point: vk::PipelineBindPoint) -> RhiResult<()> {
        let device = self.device;
        let recorder = &mut *self.recorder;
        debug_assert!(
            recorder.binding_cache.bound_pipeline().is_some_and(|(_, bp)| bp == bind_point),
            "no {:?} pipeline is bound",
            bind_point
        );

        if !recorder.in_render_pass {
            let cmd = recorder.command_buffer();
            recorder.barriers.flush(&device.gfx_device, cmd);
        }
        recorder.flush_bindings(&device.gfx_device, device.bindless.set())
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> RhiResult<()> {
        debug_assert!(self.recorder.in_render_pass, "draw outside of a render pass");
        self.prepare(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.gfx_device().cmd_draw(
                self.recorder.command_buffer(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()> {
        debug_assert!(self.recorder.in_render_pass, "draw outside of a render pass");
        self.prepare(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.gfx_device().cmd_draw_indexed(
                self.recorder.command_buffer(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn draw_indirect(
        &mut self,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> RhiResult<()> {
        let device = self.device;
        let Some(record) = lookup(&device.resources.buffers, buffer) else { return Ok(()) };
        self.prepare(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            device.gfx_device.cmd_draw_indirect(self.recorder.command_buffer(), record.buffer, offset, draw_count, stride);
        }
        Ok(())
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn draw_indexed_indirect(
        &mut self,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> RhiResult<()> {
        let device = self.device;
        let Some(record) = lookup(&device.resources.buffers, buffer) else { return Ok(()) };
        self.prepare(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            device.gfx_device.cmd_draw_indexed_indirect(
                self.recorder.command_buffer(),
                record.buffer,
                offset,
                draw_count,
                stride,
            );
        }
        Ok(())
    }

    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn dispatch(&mut self, group_cnt: glam::UVec3) -> RhiResult<()> {
        debug_assert!(!self.recorder.in_render_pass, "dispatch inside a render pass");
        self.prepare(vk::PipelineBindPoint::COMPUTE)?;
        unsafe {
            self.gfx_device().cmd_dispatch(self.recorder.command_buffer(), group_cnt.x, group_cnt.y, group_cnt.z);
        }
        Ok(())
    }

    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn dispatch_indirect(&mut self, buffer: BufferHandle, offset: vk::DeviceSize) -> RhiResult<()> {
        let device = self.device;
        let Some(record) = lookup(&device.resources.buffers, buffer) else { return Ok(()) };
        self.prepare(vk::PipelineBindPoint::COMPUTE)?;
        unsafe {
            device.gfx_device.cmd_dispatch_indirect(self.recorder.command_buffer(), record.buffer, offset);
        }
        Ok(())
    }
}

// render pass & dynamic state
impl CommandList<'_> {
    /// 同时把 viewport 和 scissor 设置为 framebuffer 的大小
    ///
    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        clear_values: &[vk::ClearValue],
    ) {
        debug_assert!(!self.recorder.in_render_pass, "render pass is already active");
        let device = self.device;
        let Some(rp) = lookup(&device.resources.render_passes, render_pass) else { return };
        let Some(fb) = lookup(&device.resources.framebuffers, framebuffer) else { return };

        let recorder = &mut *self.recorder;
        let cmd = recorder.command_buffer();
        recorder.barriers.flush(&device.gfx_device, cmd);

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: fb.desc.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(rp.render_pass)
            .framebuffer(fb.framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe {
            device.gfx_device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.gfx_device.cmd_set_viewport(
                cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: fb.desc.extent.width as f32,
                    height: fb.desc.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.gfx_device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        recorder.in_render_pass = true;
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn end_render_pass(&mut self) {
        if !self.recorder.in_render_pass {
            log::error!("end_render_pass without an active render pass");
            debug_assert!(false, "end_render_pass without an active render pass");
            return;
        }
        unsafe { self.gfx_device().cmd_end_render_pass(self.recorder.command_buffer()) };
        self.recorder.in_render_pass = false;
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.gfx_device().cmd_set_viewport(self.recorder.command_buffer(), 0, &[viewport]) };
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.gfx_device().cmd_set_scissor(self.recorder.command_buffer(), 0, &[scissor]) };
    }
}

// barrier
impl CommandList<'_> {
    /// barrier 先暂存，在下一个 action 命令之前一次性提交
    pub fn barrier(&mut self, barrier: Barrier) {
        if self.recorder.in_render_pass {
            log::error!("barrier inside a render pass is ignored: {:?}", barrier);
            debug_assert!(false, "barrier inside a render pass");
            return;
        }

        let device = self.device;
        match barrier {
            Barrier::Memory(mask) => self.recorder.barriers.push_memory(mask),
            Barrier::Image {
                texture,
                aspect,
                old_layout,
                new_layout,
                mask,
            } => {
                let Some(record) = lookup(&device.resources.textures, texture) else { return };
                let aspect = if aspect.is_empty() { format_aspects(record.desc.format) } else { aspect };
                self.recorder.barriers.push_image(
                    GfxImageBarrier::new()
                        .image(record.image)
                        .image_aspect_flag(aspect)
                        .layout_transfer(old_layout, new_layout)
                        .mask(mask),
                );
            }
            Barrier::Buffer {
                buffer,
                offset,
                size,
                mask,
            } => {
                let Some(record) = lookup(&device.resources.buffers, buffer) else { return };
                self.recorder.barriers.push_buffer(
                    GfxBufferBarrier::new().buffer(record.buffer, offset, size).mask(mask),
                );
            }
        }
    }

    /// 立即提交所有暂存的 barrier
    pub fn flush_barriers(&mut self) {
        let device = self.device;
        let recorder = &mut *self.recorder;
        let cmd = recorder.command_buffer();
        recorder.barriers.flush(&device.gfx_device, cmd);
    }
}

// transfer
impl CommandList<'_> {
    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[vk::BufferCopy]) {
        let device = self.device;
        let Some(src) = lookup(&device.resources.buffers, src) else { return };
        let Some(dst) = lookup(&device.resources.buffers, dst) else { return };
        self.flush_barriers();
        unsafe { device.gfx_device.cmd_copy_buffer(self.recorder.command_buffer(), src.buffer, dst.buffer, regions) };
    }

    /// texture 需要已经处于 `TRANSFER_DST_OPTIMAL`
    ///
    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    pub fn copy_buffer_to_texture(&mut self, src: BufferHandle, dst: TextureHandle, regions: &[vk::BufferImageCopy]) {
        let device = self.device;
        let Some(src) = lookup(&device.resources.buffers, src) else { return };
        let Some(dst) = lookup(&device.resources.textures, dst) else { return };
        self.flush_barriers();
        unsafe {
            device.gfx_device.cmd_copy_buffer_to_image(
                self.recorder.command_buffer(),
                src.buffer,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    pub fn fill_buffer(&mut self, dst: BufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        let device = self.device;
        let Some(dst) = lookup(&device.resources.buffers, dst) else { return };
        self.flush_barriers();
        unsafe { device.gfx_device.cmd_fill_buffer(self.recorder.command_buffer(), dst.buffer, offset, size, data) };
    }

    /// 数据先写入 transient buffer，再 copy 到目标位置，大小不受 `vkCmdUpdateBuffer` 的限制
    ///
    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    pub fn update_buffer(&mut self, dst: BufferHandle, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let device = self.device;
        let Some(dst) = lookup(&device.resources.buffers, dst) else { return Ok(()) };
        let staging = self.recorder.transient.upload(data, TRANSIENT_COPY_ALIGN)?;
        self.flush_barriers();
        let region = vk::BufferCopy {
            src_offset: staging.offset,
            dst_offset: offset,
            size: staging.size,
        };
        unsafe {
            device.gfx_device.cmd_copy_buffer(self.recorder.command_buffer(), staging.buffer, dst.buffer, &[region]);
        }
        Ok(())
    }
}

// query
impl CommandList<'_> {
    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn reset_query_pool(&mut self, pool: QueryPoolHandle, first_query: u32, query_count: u32) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.query_pools, pool) else { return };
        unsafe {
            device.gfx_device.cmd_reset_query_pool(self.recorder.command_buffer(), record.pool, first_query, query_count);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    pub fn write_timestamp(&mut self, pool: QueryPoolHandle, stage: vk::PipelineStageFlags2, query: u32) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.query_pools, pool) else { return };
        unsafe { device.gfx_device.cmd_write_timestamp2(self.recorder.command_buffer(), stage, record.pool, query) };
    }

    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn begin_query(&mut self, pool: QueryPoolHandle, query: u32, flags: vk::QueryControlFlags) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.query_pools, pool) else { return };
        unsafe { device.gfx_device.cmd_begin_query(self.recorder.command_buffer(), record.pool, query, flags) };
    }

    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn end_query(&mut self, pool: QueryPoolHandle, query: u32) {
        let device = self.device;
        let Some(record) = lookup(&device.resources.query_pools, pool) else { return };
        unsafe { device.gfx_device.cmd_end_query(self.recorder.command_buffer(), record.pool, query) };
    }
}

// debug label
impl CommandList<'_> {
    #[inline]
    pub fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4) {
        let device = self.device;
        self.recorder.begin_label(&device.gfx_device, label_name, label_color);
    }

    #[inline]
    pub fn end_label(&mut self) {
        let device = self.device;
        self.recorder.end_label(&device.gfx_device);
    }

    #[inline]
    pub fn insert_label(&mut self, label_name: &str, label_color: glam::Vec4) {
        let device = self.device;
        self.recorder.insert_label(&device.gfx_device, label_name, label_color);
    }
}

// end
impl CommandList<'_> {
    /// 结束录制，之后该 list 等待 `submit_command_lists`
    pub fn end(mut self) -> RhiResult<()> {
        let device = self.device;
        self.recorder.end(&device.gfx_device)
    }
}

impl Drop for CommandList<'_> {
    fn drop(&mut self) {
        if self.recorder.state() == RecorderState::Recording {
            log::warn!("command list {} dropped without end(), ending it implicitly", self.recorder.name());
            let device = self.device;
            if let Err(e) = self.recorder.end(&device.gfx_device) {
                log::error!("failed to end command list {}: {}", self.recorder.name(), e);
            }
        }
    }
}
