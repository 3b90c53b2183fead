use ash::vk;
use vk_mem::Alloc;

use crate::commands::barrier::{GfxBarrierMask, GfxImageBarrier};
use crate::commands::submit::GfxSubmitInfo;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::mem_allocator::GfxMemAllocator;
use crate::foundation::physical_device::QueueKind;
use crate::handles::{BufferHandle, FenceHandle, QueryPoolHandle, SemaphoreHandle, TextureHandle};
use crate::resources::descs::TextureDesc;
use crate::resources::records::copy_texel_size;

/// 一次性上传使用的 command buffer 和 fence
///
/// 上传会阻塞到 GPU 执行完成，只适合初始化阶段
pub(super) struct UploadContext {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl UploadContext {
    pub fn detached() -> Self {
        Self {
            pool: vk::CommandPool::null(),
            cmd: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
        }
    }

    pub fn new(device: &GfxDevice, queue_family_index: u32) -> RhiResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool =
            unsafe { device.create_command_pool(&pool_ci, None) }.map_err(RhiError::creation("upload command pool"))?;
        let mut ctx = Self::detached();
        ctx.pool = pool;

        let cmd_ai = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        match unsafe { device.allocate_command_buffers(&cmd_ai) } {
            Ok(cmds) => ctx.cmd = cmds[0],
            Err(e) => {
                ctx.destroy(device);
                return Err(RhiError::creation("upload command buffer")(e));
            }
        }
        match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => ctx.fence = fence,
            Err(e) => {
                ctx.destroy(device);
                return Err(RhiError::creation("upload fence")(e));
            }
        }

        device.set_object_debug_name(pool, "upload-pool");
        device.set_object_debug_name(ctx.cmd, "upload-cmd");
        Ok(ctx)
    }

    pub fn destroy(&mut self, device: &GfxDevice) {
        unsafe {
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
            // command buffer 随 pool 一起释放
            if self.pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.pool, None);
            }
        }
        *self = Self::detached();
    }
}

/// 上传过程中使用的临时 buffer
struct StagingBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
}

impl StagingBuffer {
    fn new(allocator: &GfxMemAllocator, data: &[u8]) -> RhiResult<Self> {
        if data.is_empty() {
            return Err(RhiError::OutOfRange("staging data is empty".to_string()));
        }
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        let (buffer, mut allocation) =
            unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }.map_err(RhiError::allocation("staging buffer"))?;

        let write = unsafe { allocator.map_memory(&mut allocation) }.and_then(|ptr| {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
                allocator.unmap_memory(&mut allocation);
            }
            allocator.flush_allocation(&allocation, 0, vk::WHOLE_SIZE)
        });
        let mut staging = Self { buffer, allocation };
        if let Err(e) = write {
            staging.destroy(allocator);
            return Err(RhiError::allocation("staging buffer mapping")(e));
        }
        Ok(staging)
    }

    fn destroy(&mut self, allocator: &GfxMemAllocator) {
        unsafe { allocator.destroy_buffer(self.buffer, &mut self.allocation) };
    }
}

fn check_range(what: &str, offset: u64, len: u64, size: u64) -> RhiResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::OutOfRange(format!("{}: [{}, +{}) exceeds size {}", what, offset, len, size))),
    }
}

/// mip 0 中一个 aspect 的全部 layer 紧密排列时的字节数
fn texture_upload_size(desc: &TextureDesc, aspect: vk::ImageAspectFlags) -> RhiResult<u64> {
    let texel = copy_texel_size(desc.format, aspect).ok_or_else(|| {
        RhiError::OutOfRange(format!("{}: {:?} ({:?}) cannot be uploaded from a buffer", desc.name, desc.format, aspect))
    })?;
    let extent = desc.extent;
    [extent.height, extent.depth, desc.array_layers]
        .into_iter()
        .try_fold(extent.width as u64 * texel, |acc, n| acc.checked_mul(n as u64))
        .ok_or_else(|| RhiError::OutOfRange(format!("{}: texture size overflows", desc.name)))
}

// upload
impl Device {
    /// 在 gfx queue 上执行一段命令并阻塞到完成
    fn submit_one_shot(&mut self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> RhiResult<()> {
        let _span = tracy_client::span!("Device::submit_one_shot");
        let cmd = self.upload.cmd;

        unsafe {
            self.gfx_device
                .reset_command_pool(self.upload.pool, vk::CommandPoolResetFlags::empty())
                .map_err(RhiError::vulkan("vkResetCommandPool"))?;
            self.gfx_device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(RhiError::vulkan("vkBeginCommandBuffer"))?;
        }
        record(&self.gfx_device.device, cmd);
        unsafe { self.gfx_device.end_command_buffer(cmd) }.map_err(RhiError::vulkan("vkEndCommandBuffer"))?;

        let submit_info = GfxSubmitInfo::new(std::slice::from_ref(&cmd));
        self.queue(QueueKind::Graphics).submit(&self.gfx_device, &[submit_info.submit_info()], self.upload.fence)?;

        let timeout = self.config.fence_timeout_ns();
        let wait = unsafe { self.gfx_device.wait_for_fences(std::slice::from_ref(&self.upload.fence), true, timeout) };
        match wait {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                log::error!("one-shot upload timed out, treating the device as lost");
                return Err(RhiError::DeviceLost);
            }
            Err(e) => return Err(RhiError::vulkan("vkWaitForFences")(e)),
        }
        unsafe { self.gfx_device.reset_fences(std::slice::from_ref(&self.upload.fence)) }
            .map_err(RhiError::vulkan("vkResetFences"))
    }

    /// 写入 buffer 的一段内容
    ///
    /// host 可见的 buffer 直接写入映射的内存；其他 buffer 经由 staging buffer 复制，并阻塞到复制完成。
    /// 调用方需要保证 GPU 没有同时访问这段内容
    pub fn upload_buffer(&mut self, buffer: BufferHandle, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let record = self.resources.buffers.try_get(buffer)?;
        check_range(&record.desc.name, offset, data.len() as u64, record.desc.size)?;

        if let Some(mapped) = record.mapped {
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len()) };
            return self
                .allocator
                .flush_allocation(&record.allocation, offset, data.len() as u64)
                .map_err(RhiError::vulkan("vmaFlushAllocation"));
        }

        let dst = record.buffer;
        let mut staging = StagingBuffer::new(&self.allocator, data)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        let src = staging.buffer;
        let result = self.submit_one_shot(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        });
        staging.destroy(&self.allocator);
        result
    }

    /// 写入 texture 的 mip 0，之后 texture 处于 `final_layout`
    ///
    /// data 需要紧密排列，覆盖第一个 aspect 的全部 layer
    pub fn upload_texture(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        final_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let record = self.resources.textures.try_get(texture)?;
        let image = record.image;
        let extent = record.desc.extent;
        let layers = record.desc.array_layers;
        let aspect = record.aspect_views.first().map_or(vk::ImageAspectFlags::COLOR, |v| v.aspect);
        let required = texture_upload_size(&record.desc, aspect)?;
        if (data.len() as u64) < required {
            return Err(RhiError::OutOfRange(format!(
                "{}: upload needs {} bytes, got {}",
                record.desc.name,
                required,
                data.len()
            )));
        }

        let mut staging = StagingBuffer::new(&self.allocator, data)?;
        let src = staging.buffer;
        let result = self.submit_one_shot(|device, cmd| {
            let to_transfer = GfxImageBarrier::new()
                .image(image)
                .image_aspect_flag(aspect)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .mask(GfxBarrierMask {
                    src_stage: vk::PipelineStageFlags2::NONE,
                    dst_stage: vk::PipelineStageFlags2::TRANSFER,
                    src_access: vk::AccessFlags2::NONE,
                    dst_access: vk::AccessFlags2::TRANSFER_WRITE,
                });
            let to_final = GfxImageBarrier::new()
                .image(image)
                .image_aspect_flag(aspect)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, final_layout)
                .mask(GfxBarrierMask::TRANSFER_TO_SHADER_READ);
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: layers,
                })
                .image_extent(extent);

            unsafe {
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(to_transfer.inner())),
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(to_final.inner())),
                );
            }
        });
        staging.destroy(&self.allocator);
        result
    }

    /// 从 host 可见的 buffer 中读取，调用方需要先等待写入它的提交完成
    pub fn read_buffer(&self, buffer: BufferHandle, offset: vk::DeviceSize, out: &mut [u8]) -> RhiResult<()> {
        let record = self.resources.buffers.try_get(buffer)?;
        check_range(&record.desc.name, offset, out.len() as u64, record.desc.size)?;
        let Some(mapped) = record.mapped else {
            return Err(RhiError::OutOfRange(format!("{} is not host visible", record.desc.name)));
        };

        self.allocator
            .invalidate_allocation(&record.allocation, offset, out.len() as u64)
            .map_err(RhiError::vulkan("vmaInvalidateAllocation"))?;
        unsafe { std::ptr::copy_nonoverlapping(mapped.as_ptr().add(offset as usize), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

// query & sync
impl Device {
    /// 读取 query 的结果，还没有全部可用时返回 None
    ///
    /// pipeline statistics 每个 query 包含多个值，按顺序展开
    pub fn query_pool_results(
        &self,
        pool: QueryPoolHandle,
        first_query: u32,
        query_count: u32,
    ) -> RhiResult<Option<Vec<u64>>> {
        let record = self.resources.query_pools.try_get(pool)?;
        check_range(&record.desc.name, first_query as u64, query_count as u64, record.desc.count as u64)?;

        let values_per_query = match record.desc.query_type {
            vk::QueryType::PIPELINE_STATISTICS => record.desc.pipeline_statistics.as_raw().count_ones() as usize,
            _ => 1,
        };
        let mut results = vec![0_u64; query_count as usize * values_per_query];
        if results.is_empty() {
            return Ok(Some(results));
        }

        // 统计类型每个 query 占多个 u64，需要指定 stride，直接调用函数指针
        let stride = (values_per_query * std::mem::size_of::<u64>()) as vk::DeviceSize;
        let result = unsafe {
            (self.gfx_device.fp_v1_0().get_query_pool_results)(
                self.gfx_device.handle(),
                record.pool,
                first_query,
                query_count,
                std::mem::size_of_val(results.as_slice()),
                results.as_mut_ptr().cast(),
                stride,
                vk::QueryResultFlags::TYPE_64,
            )
        };
        match result {
            vk::Result::SUCCESS => Ok(Some(results)),
            vk::Result::NOT_READY => Ok(None),
            e => Err(RhiError::vulkan("vkGetQueryPoolResults")(e)),
        }
    }

    /// 把 timestamp 的差值转换为纳秒
    #[inline]
    pub fn timestamp_to_ns(&self, ticks: u64) -> f64 {
        ticks as f64 * self.pdevice.timestamp_period() as f64
    }

    /// 等待 fence，超时返回 `DeviceLost`
    pub fn wait_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        let fence = self.resources.fences.try_get(fence)?.fence;
        match unsafe {
            self.gfx_device.wait_for_fences(std::slice::from_ref(&fence), true, self.config.fence_timeout_ns())
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::error!("fence wait timed out, treating the device as lost");
                Err(RhiError::DeviceLost)
            }
            Err(e) => Err(RhiError::vulkan("vkWaitForFences")(e)),
        }
    }

    pub fn reset_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        let fence = self.resources.fences.try_get(fence)?.fence;
        unsafe { self.gfx_device.reset_fences(std::slice::from_ref(&fence)) }.map_err(RhiError::vulkan("vkResetFences"))
    }

    /// fence 是否已经 signal
    pub fn fence_status(&self, fence: FenceHandle) -> RhiResult<bool> {
        let fence = self.resources.fences.try_get(fence)?.fence;
        unsafe { self.gfx_device.get_fence_status(fence) }.map_err(RhiError::vulkan("vkGetFenceStatus"))
    }

    /// timeline semaphore 当前的值
    pub fn semaphore_value(&self, semaphore: SemaphoreHandle) -> RhiResult<u64> {
        let semaphore = self.resources.semaphores.try_get(semaphore)?.semaphore;
        unsafe { self.gfx_device.get_semaphore_counter_value(semaphore) }
            .map_err(RhiError::vulkan("vkGetSemaphoreCounterValue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range("b", 0, 16, 16).is_ok());
        assert!(check_range("b", 8, 8, 16).is_ok());
        assert!(matches!(check_range("b", 8, 9, 16), Err(RhiError::OutOfRange(_))));
        assert!(matches!(check_range("b", u64::MAX, 1, 16), Err(RhiError::OutOfRange(_))));
    }

    #[test]
    fn test_texture_upload_size() {
        let mut desc = TextureDesc::new_2d(
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D { width: 16, height: 8 },
            vk::ImageUsageFlags::SAMPLED,
            "albedo",
        );
        assert_eq!(texture_upload_size(&desc, vk::ImageAspectFlags::COLOR).unwrap(), 16 * 8 * 4);

        desc.array_layers = 6;
        assert_eq!(texture_upload_size(&desc, vk::ImageAspectFlags::COLOR).unwrap(), 16 * 8 * 4 * 6);

        desc.format = vk::Format::BC1_RGB_UNORM_BLOCK;
        assert!(matches!(texture_upload_size(&desc, vk::ImageAspectFlags::COLOR), Err(RhiError::OutOfRange(_))));

        desc.format = vk::Format::R32G32B32A32_SFLOAT;
        desc.extent = vk::Extent3D { width: u32::MAX, height: u32::MAX, depth: u32::MAX };
        assert!(matches!(texture_upload_size(&desc, vk::ImageAspectFlags::COLOR), Err(RhiError::OutOfRange(_))));
    }
}
