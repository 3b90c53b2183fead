//! Device 持有的全部 HandleTable，以及延迟销毁时使用的句柄

use ash::vk;

use crate::descriptors::descriptor_info::DescriptorInfo;
use crate::error::RhiResult;
use crate::frame::frame_lifecycle::FrameLifecycleManager;
use crate::handles::{
    BindingHandle, BufferHandle, ComputePipelineHandle, FenceHandle, FramebufferHandle, GraphicsPipelineHandle,
    QueryPoolHandle, RenderPassHandle, ResourceKind, SamplerHandle, SemaphoreHandle, TextureHandle,
};
use crate::resources::descs::BindingResource;
use crate::resources::handle_table::HandleTable;
use crate::resources::records::{
    BindingRecord, BufferRecord, FenceRecord, FramebufferRecord, PipelineRecord, QueryPoolRecord, RenderPassRecord,
    SamplerRecord, SemaphoreRecord, TextureRecord, sampled_layout,
};

#[derive(Default)]
pub struct ResourceTables {
    pub buffers: HandleTable<BufferHandle, BufferRecord>,
    pub textures: HandleTable<TextureHandle, TextureRecord>,
    pub samplers: HandleTable<SamplerHandle, SamplerRecord>,
    pub render_passes: HandleTable<RenderPassHandle, RenderPassRecord>,
    pub framebuffers: HandleTable<FramebufferHandle, FramebufferRecord>,
    pub graphics_pipelines: HandleTable<GraphicsPipelineHandle, PipelineRecord>,
    pub compute_pipelines: HandleTable<ComputePipelineHandle, PipelineRecord>,
    pub semaphores: HandleTable<SemaphoreHandle, SemaphoreRecord>,
    pub fences: HandleTable<FenceHandle, FenceRecord>,
    pub bindings: HandleTable<BindingHandle, BindingRecord>,
    pub query_pools: HandleTable<QueryPoolHandle, QueryPoolRecord>,
}

/// 已经调用 destroy，等待 GPU 完成后回收的资源
///
/// 记录仍然留在 HandleTable 中，回收时才 erase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetiredResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerHandle),
    RenderPass(RenderPassHandle),
    Framebuffer(FramebufferHandle),
    GraphicsPipeline(GraphicsPipelineHandle),
    ComputePipeline(ComputePipelineHandle),
    Semaphore(SemaphoreHandle),
    Fence(FenceHandle),
    Binding(BindingHandle),
    QueryPool(QueryPoolHandle),
}

impl RetiredResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Texture(_) => ResourceKind::Texture,
            Self::Sampler(_) => ResourceKind::Sampler,
            Self::RenderPass(_) => ResourceKind::RenderPass,
            Self::Framebuffer(_) => ResourceKind::Framebuffer,
            Self::GraphicsPipeline(_) => ResourceKind::GraphicsPipeline,
            Self::ComputePipeline(_) => ResourceKind::ComputePipeline,
            Self::Semaphore(_) => ResourceKind::Semaphore,
            Self::Fence(_) => ResourceKind::Fence,
            Self::Binding(_) => ResourceKind::Binding,
            Self::QueryPool(_) => ResourceKind::QueryPool,
        }
    }
}

/// 各类资源的存活数量，用于统计和泄漏检查
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCounts {
    pub buffers: usize,
    pub textures: usize,
    pub samplers: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub graphics_pipelines: usize,
    pub compute_pipelines: usize,
    pub semaphores: usize,
    pub fences: usize,
    pub bindings: usize,
    pub query_pools: usize,
    /// 已经 destroy 但还没有回收的数量
    pub pending_destroy: usize,
}

impl ResourceCounts {
    #[inline]
    pub fn total(&self) -> usize {
        self.buffers
            + self.textures
            + self.samplers
            + self.render_passes
            + self.framebuffers
            + self.graphics_pipelines
            + self.compute_pipelines
            + self.semaphores
            + self.fences
            + self.bindings
            + self.query_pools
    }
}

impl ResourceTables {
    pub fn counts(&self, pending_destroy: usize) -> ResourceCounts {
        ResourceCounts {
            buffers: self.buffers.len(),
            textures: self.textures.len(),
            samplers: self.samplers.len(),
            render_passes: self.render_passes.len(),
            framebuffers: self.framebuffers.len(),
            graphics_pipelines: self.graphics_pipelines.len(),
            compute_pipelines: self.compute_pipelines.len(),
            semaphores: self.semaphores.len(),
            fences: self.fences.len(),
            bindings: self.bindings.len(),
            query_pools: self.query_pools.len(),
            pending_destroy,
        }
    }

    /// 句柄是否仍然指向存活的记录
    pub fn contains(&self, resource: RetiredResource) -> bool {
        match resource {
            RetiredResource::Buffer(h) => self.buffers.contains(h),
            RetiredResource::Texture(h) => self.textures.contains(h),
            RetiredResource::Sampler(h) => self.samplers.contains(h),
            RetiredResource::RenderPass(h) => self.render_passes.contains(h),
            RetiredResource::Framebuffer(h) => self.framebuffers.contains(h),
            RetiredResource::GraphicsPipeline(h) => self.graphics_pipelines.contains(h),
            RetiredResource::ComputePipeline(h) => self.compute_pipelines.contains(h),
            RetiredResource::Semaphore(h) => self.semaphores.contains(h),
            RetiredResource::Fence(h) => self.fences.contains(h),
            RetiredResource::Binding(h) => self.bindings.contains(h),
            RetiredResource::QueryPool(h) => self.query_pools.contains(h),
        }
    }

    /// swapchain 的 image 和 semaphore 由 swapchain 自己销毁
    pub fn is_swapchain_owned(&self, resource: RetiredResource) -> bool {
        match resource {
            RetiredResource::Texture(h) => self.textures.get(h).is_some_and(|r| r.is_external()),
            RetiredResource::Semaphore(h) => self.semaphores.get(h).is_some_and(|r| r.swapchain_owned),
            _ => false,
        }
    }

    /// 所有 destroy_* 的入口：检查之后放入当前帧的 graveyard
    ///
    /// 失效的句柄、swapchain 持有的资源、已经在 graveyard 中的句柄都会被拒绝，返回 false
    pub fn retire(&self, graveyard: &mut FrameLifecycleManager<RetiredResource>, item: RetiredResource) -> bool {
        if !self.contains(item) {
            log::error!("destroying a stale {:?} handle", item.kind());
            debug_assert!(false, "destroying a stale {:?} handle", item.kind());
            return false;
        }
        if self.is_swapchain_owned(item) {
            log::error!("{:?} is owned by the swapchain and cannot be destroyed directly", item.kind());
            return false;
        }
        if !graveyard.retire(item) {
            log::warn!("{:?} handle destroyed twice, ignoring the second destroy", item.kind());
            return false;
        }
        true
    }

    /// 将 handle 形式的 binding 资源解析为 native descriptor
    pub fn resolve_descriptor(&self, resource: BindingResource) -> RhiResult<DescriptorInfo> {
        let info = match resource {
            BindingResource::UniformBuffer { buffer, offset, range } => DescriptorInfo::UniformBuffer {
                buffer: self.buffers.try_get(buffer)?.buffer,
                offset,
                range,
            },
            BindingResource::StorageBuffer { buffer, offset, range } => DescriptorInfo::StorageBuffer {
                buffer: self.buffers.try_get(buffer)?.buffer,
                offset,
                range,
            },
            BindingResource::SampledTexture(texture) => {
                let (view, layout) = self.sampled_view(texture)?;
                DescriptorInfo::SampledImage { view, layout }
            }
            BindingResource::StorageTexture(texture) => DescriptorInfo::StorageImage {
                view: self.textures.try_get(texture)?.default_view(),
                layout: vk::ImageLayout::GENERAL,
            },
            BindingResource::Sampler(sampler) => DescriptorInfo::Sampler {
                sampler: self.samplers.try_get(sampler)?.sampler,
            },
            BindingResource::CombinedTexture(texture, sampler) => {
                let (view, layout) = self.sampled_view(texture)?;
                DescriptorInfo::CombinedImageSampler {
                    view,
                    layout,
                    sampler: self.samplers.try_get(sampler)?.sampler,
                }
            }
        };
        Ok(info)
    }

    fn sampled_view(&self, texture: TextureHandle) -> RhiResult<(vk::ImageView, vk::ImageLayout)> {
        let record = self.textures.try_get(texture)?;
        let aspect = record.aspect_views.first().map_or(vk::ImageAspectFlags::COLOR, |v| v.aspect);
        Ok((record.view(aspect), sampled_layout(aspect)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RhiError;
    use crate::resources::descs::{SamplerDesc, SemaphoreDesc, TextureDesc};
    use crate::resources::records::AspectView;
    use ash::vk::Handle;

    fn sampler_record(raw: u64) -> SamplerRecord {
        SamplerRecord {
            sampler: vk::Sampler::from_raw(raw),
            desc: SamplerDesc::default(),
        }
    }

    fn semaphore_record(raw: u64, swapchain_owned: bool) -> SemaphoreRecord {
        SemaphoreRecord {
            semaphore: vk::Semaphore::from_raw(raw),
            desc: SemaphoreDesc::Binary,
            swapchain_owned,
        }
    }

    /// 回收时才从表中 erase，与 Device 的 graveyard 回收一致
    fn reclaim(tables: &mut ResourceTables, item: RetiredResource) {
        match item {
            RetiredResource::Sampler(h) => assert!(tables.samplers.erase(h).is_some()),
            RetiredResource::Semaphore(h) => assert!(tables.semaphores.erase(h).is_some()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_destroyed_handle_valid_until_slot_reused() {
        let mut tables = ResourceTables::default();
        let mut graveyard = FrameLifecycleManager::new(3);
        let sampler = tables.samplers.emplace(sampler_record(1));

        assert!(tables.retire(&mut graveyard, RetiredResource::Sampler(sampler)));
        for _ in 0..2 {
            graveyard.advance(|item| reclaim(&mut tables, item));
            assert!(tables.samplers.get(sampler).is_some());
        }
        graveyard.advance(|item| reclaim(&mut tables, item));
        assert!(tables.samplers.get(sampler).is_none());
        assert_eq!(graveyard.pending_count(), 0);
    }

    #[test]
    fn test_repeated_destroy_is_queued_once() {
        let mut tables = ResourceTables::default();
        let mut graveyard = FrameLifecycleManager::new(2);
        let sampler = tables.samplers.emplace(sampler_record(1));
        let item = RetiredResource::Sampler(sampler);

        assert!(tables.retire(&mut graveyard, item));
        assert!(!tables.retire(&mut graveyard, item));
        graveyard.advance(|item| reclaim(&mut tables, item));
        assert!(!tables.retire(&mut graveyard, item));
        assert_eq!(graveyard.pending_count(), 1);

        // 只回收一次，reclaim 中的 erase 不会遇到已经失效的句柄
        graveyard.advance(|item| reclaim(&mut tables, item));
        assert!(tables.samplers.get(sampler).is_none());
        assert_eq!(graveyard.pending_count(), 0);
    }

    #[test]
    fn test_swapchain_resources_cannot_be_destroyed() {
        let mut tables = ResourceTables::default();
        let mut graveyard = FrameLifecycleManager::new(2);

        let acquire = tables.semaphores.emplace(semaphore_record(1, true));
        let user = tables.semaphores.emplace(semaphore_record(2, false));
        let image = tables.textures.emplace(TextureRecord {
            image: vk::Image::from_raw(3),
            allocation: None,
            attachment_view: vk::ImageView::from_raw(4),
            aspect_views: vec![AspectView {
                aspect: vk::ImageAspectFlags::COLOR,
                view: vk::ImageView::from_raw(4),
                bindless_index: None,
            }],
            desc: TextureDesc::new_2d(
                vk::Format::B8G8R8A8_UNORM,
                vk::Extent2D { width: 4, height: 4 },
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                "swapchain-image-0",
            ),
        });

        assert!(!tables.retire(&mut graveyard, RetiredResource::Semaphore(acquire)));
        assert!(!tables.retire(&mut graveyard, RetiredResource::Texture(image)));
        assert_eq!(graveyard.pending_count(), 0);

        assert!(tables.retire(&mut graveyard, RetiredResource::Semaphore(user)));
        assert_eq!(graveyard.pending_count(), 1);
    }

    #[test]
    fn test_resolve_stale_handle() {
        let mut tables = ResourceTables::default();
        let sampler = tables.samplers.emplace(sampler_record(5));
        let info = tables.resolve_descriptor(BindingResource::Sampler(sampler)).unwrap();
        assert_eq!(info, DescriptorInfo::Sampler { sampler: vk::Sampler::from_raw(5) });

        tables.samplers.erase(sampler);
        let err = tables.resolve_descriptor(BindingResource::Sampler(sampler)).unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle { kind: ResourceKind::Sampler }));
        assert!(!tables.contains(RetiredResource::Sampler(sampler)));
    }

    #[test]
    fn test_counts() {
        let mut tables = ResourceTables::default();
        tables.samplers.emplace(sampler_record(1));
        let counts = tables.counts(2);
        assert_eq!(counts.samplers, 1);
        assert_eq!(counts.total(), 1);
        assert_eq!(counts.pending_destroy, 2);
    }
}
