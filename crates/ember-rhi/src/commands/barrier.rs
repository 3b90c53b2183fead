use ash::vk;

use crate::handles::{BufferHandle, TextureHandle};

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl GfxBarrierMask {
    /// transfer 写入之后在 shader 中读取
    pub const TRANSFER_TO_SHADER_READ: Self = Self {
        src_stage: vk::PipelineStageFlags2::TRANSFER,
        dst_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
        src_access: vk::AccessFlags2::TRANSFER_WRITE,
        dst_access: vk::AccessFlags2::SHADER_READ,
    };

    /// compute 写入之后再次读写
    pub const COMPUTE_TO_COMPUTE: Self = Self {
        src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        src_access: vk::AccessFlags2::SHADER_WRITE,
        dst_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_READ.as_raw() | vk::AccessFlags2::SHADER_WRITE.as_raw(),
        ),
    };
}

/// recorder 接受的 barrier，资源以 handle 的形式给出
#[derive(Debug, Clone, Copy)]
pub enum Barrier {
    Memory(GfxBarrierMask),
    Image {
        texture: TextureHandle,
        /// 为空时使用 format 的全部 aspect
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mask: GfxBarrierMask,
    },
    Buffer {
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        mask: GfxBarrierMask,
    },
}

impl Barrier {
    /// 整个 texture 的 layout 转换
    pub fn image_layout(
        texture: TextureHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mask: GfxBarrierMask,
    ) -> Self {
        Self::Image {
            texture,
            aspect: vk::ImageAspectFlags::empty(),
            old_layout,
            new_layout,
            mask,
        }
    }

    /// 整个 buffer
    pub fn whole_buffer(buffer: BufferHandle, mask: GfxBarrierMask) -> Self {
        Self::Buffer {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            mask,
        }
    }
}

/// 便捷创建 image memory barrier 的结构体
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    /// builder
    /// layer 和 miplevel 覆盖全部
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'static> {
        &self.inner
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

/// 暂存的 barrier，flush 时合并为一次 `vkCmdPipelineBarrier2`
#[derive(Default)]
pub struct PendingBarriers {
    memory: Vec<vk::MemoryBarrier2<'static>>,
    image: Vec<vk::ImageMemoryBarrier2<'static>>,
    buffer: Vec<vk::BufferMemoryBarrier2<'static>>,
}

impl PendingBarriers {
    pub fn push_memory(&mut self, mask: GfxBarrierMask) {
        self.memory.push(
            vk::MemoryBarrier2::default()
                .src_stage_mask(mask.src_stage)
                .src_access_mask(mask.src_access)
                .dst_stage_mask(mask.dst_stage)
                .dst_access_mask(mask.dst_access),
        );
    }

    #[inline]
    pub fn push_image(&mut self, barrier: GfxImageBarrier) {
        self.image.push(*barrier.inner());
    }

    #[inline]
    pub fn push_buffer(&mut self, barrier: GfxBufferBarrier) {
        self.buffer.push(*barrier.inner());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.image.is_empty() && self.buffer.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len() + self.image.len() + self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.image.clear();
        self.buffer.clear();
    }

    /// 录制一次 barrier 并清空；没有暂存的 barrier 时不录制，返回 false
    pub fn flush(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) -> bool {
        if self.is_empty() {
            return false;
        }
        let dependency_info = vk::DependencyInfo::default()
            .memory_barriers(&self.memory)
            .image_memory_barriers(&self.image)
            .buffer_memory_barriers(&self.buffer);
        unsafe {
            device.cmd_pipeline_barrier2(cmd, &dependency_info);
        }
        self.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_pending_barriers_batch() {
        let mut pending = PendingBarriers::default();
        assert!(pending.is_empty());

        pending.push_memory(GfxBarrierMask::COMPUTE_TO_COMPUTE);
        pending.push_image(
            GfxImageBarrier::new()
                .image(vk::Image::from_raw(1))
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
                .mask(GfxBarrierMask::TRANSFER_TO_SHADER_READ),
        );
        pending.push_buffer(GfxBufferBarrier::new().buffer(vk::Buffer::from_raw(2), 0, 64));
        assert_eq!(pending.len(), 3);

        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_image_barrier_defaults_cover_all_subresources() {
        let barrier = GfxImageBarrier::new();
        let range = barrier.inner().subresource_range;
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(barrier.inner().src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
