use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::descriptors::descriptor_info::{DescriptorBackend, DescriptorInfo, DescriptorWrite};
use crate::error::RhiResult;
use crate::pipelines::pipeline_layout::{MAX_BINDINGS, MAX_DATASETS, PipelineLayoutInfo};

/// 一个 set index 上暂存的 binding 状态
#[derive(Clone, Copy)]
struct Dataset {
    /// binding 发生过变化，下次 draw 前需要写入
    dirty: bool,
    cached_set: vk::DescriptorSet,
    /// 已经被 bind 到 command buffer 上，之后的修改必须写到新的 set 里
    sealed: bool,
    needs_bind: bool,
    /// 上一次写入 cached set 时使用的 layout
    layout: vk::DescriptorSetLayout,
    infos: [Option<DescriptorInfo>; MAX_BINDINGS],
    bindings_used: u32,
    /// 直接使用外部的常驻 set（Binding 资源）
    external: Option<vk::DescriptorSet>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            dirty: false,
            cached_set: vk::DescriptorSet::null(),
            sealed: false,
            needs_bind: true,
            layout: vk::DescriptorSetLayout::null(),
            infos: [None; MAX_BINDINGS],
            bindings_used: 0,
            external: None,
        }
    }
}

struct BoundPipeline {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    layout: Arc<PipelineLayoutInfo>,
}

/// 用于观察 cache 行为的计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindingCacheStats {
    pub sets_allocated: u32,
    /// native update 调用次数，每个脏的 dataset 一次
    pub set_updates: u32,
    pub descriptor_writes: u32,
    pub bind_calls: u32,
}

/// 每个 recorder 独有的 descriptor 状态缓存
///
/// - `update_*` 只记录，不触发任何 native 调用；与已有的值相同时直接返回
/// - `flush` 在 draw / dispatch 之前调用：为脏的 dataset 分配 set、一次性写入、再 bind
/// - 切换 pipeline 会清空所有 dataset，因为 layout 可能不同
pub struct DescriptorBindingCache {
    datasets: [Dataset; MAX_DATASETS],
    bound: Option<BoundPipeline>,
    stats: BindingCacheStats,
}

impl Default for DescriptorBindingCache {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl DescriptorBindingCache {
    pub fn new() -> Self {
        Self {
            datasets: [Dataset::default(); MAX_DATASETS],
            bound: None,
            stats: BindingCacheStats::default(),
        }
    }

    /// recorder begin 时调用，之前分配的 set 随 pool 一起失效
    pub fn reset(&mut self) {
        self.datasets = [Dataset::default(); MAX_DATASETS];
        self.bound = None;
        self.stats = BindingCacheStats::default();
    }
}

// getters
impl DescriptorBindingCache {
    #[inline]
    pub fn stats(&self) -> BindingCacheStats {
        self.stats
    }

    #[inline]
    pub fn bound_layout(&self) -> Option<&Arc<PipelineLayoutInfo>> {
        self.bound.as_ref().map(|b| &b.layout)
    }

    #[inline]
    pub fn bound_pipeline(&self) -> Option<(vk::Pipeline, vk::PipelineBindPoint)> {
        self.bound.as_ref().map(|b| (b.pipeline, b.bind_point))
    }
}

// 状态更新
impl DescriptorBindingCache {
    /// 返回 pipeline 是否发生了变化，变化时调用方需要录制 `vkCmdBindPipeline`
    pub fn bind_pipeline(
        &mut self,
        pipeline: vk::Pipeline,
        bind_point: vk::PipelineBindPoint,
        layout: Arc<PipelineLayoutInfo>,
    ) -> bool {
        if self.bound.as_ref().is_some_and(|b| b.pipeline == pipeline && b.bind_point == bind_point) {
            return false;
        }

        self.datasets = [Dataset::default(); MAX_DATASETS];
        self.bound = Some(BoundPipeline {
            pipeline,
            bind_point,
            layout,
        });
        true
    }

    pub fn update_binding(&mut self, set: u32, binding: u32, info: DescriptorInfo) {
        if set as usize >= MAX_DATASETS || binding as usize >= MAX_BINDINGS {
            debug_assert!(false, "binding ({set}, {binding}) out of range");
            log::error!("binding ({}, {}) out of range, ignored", set, binding);
            return;
        }

        let ds = &mut self.datasets[set as usize];
        let slot = &mut ds.infos[binding as usize];
        if ds.external.is_none() && *slot == Some(info) {
            return;
        }

        // descriptor 类型变化后旧的 set 不能再复用
        if slot.is_some_and(|old| old.descriptor_type() != info.descriptor_type()) {
            ds.cached_set = vk::DescriptorSet::null();
        }

        *slot = Some(info);
        ds.bindings_used |= 1 << binding;
        ds.external = None;
        ds.dirty = true;
    }

    /// 整个 set 使用外部已经写好的 descriptor set
    pub fn update_external_set(&mut self, set: u32, descriptor_set: vk::DescriptorSet) {
        if set as usize >= MAX_DATASETS {
            debug_assert!(false, "set {set} out of range");
            log::error!("set {} out of range, ignored", set);
            return;
        }

        let ds = &mut self.datasets[set as usize];
        if ds.external == Some(descriptor_set) {
            return;
        }
        ds.external = Some(descriptor_set);
        ds.needs_bind = true;
    }
}

// flush
impl DescriptorBindingCache {
    /// draw / dispatch 之前调用
    ///
    /// `bindless_set` 是全局的 bindless descriptor set，bindless dataset 直接解析为它，不产生写入
    pub fn flush(&mut self, backend: &mut impl DescriptorBackend, bindless_set: vk::DescriptorSet) -> RhiResult<()> {
        let Some(bound) = self.bound.as_ref() else {
            debug_assert!(false, "draw or dispatch without a bound pipeline");
            log::error!("draw or dispatch without a bound pipeline");
            return Ok(());
        };
        let bind_point = bound.bind_point;
        let info = bound.layout.clone();

        let mut resolved = [vk::DescriptorSet::null(); MAX_DATASETS];
        let mut to_bind = 0u32;

        for set in 0..info.set_layouts.len().min(MAX_DATASETS) {
            if !info.is_dataset_used(set as u32) {
                continue;
            }
            let ds = &mut self.datasets[set];

            if info.bindless_set == Some(set as u32) {
                resolved[set] = bindless_set;
                if ds.needs_bind {
                    to_bind |= 1 << set;
                }
                continue;
            }

            if let Some(external) = ds.external {
                resolved[set] = external;
                if ds.needs_bind {
                    to_bind |= 1 << set;
                }
                continue;
            }

            let expected = info.bindings_used[set];
            let missing = expected & !ds.bindings_used;
            if missing != 0 {
                log::warn!("set {} is missing bindings (mask {:#b}) for the bound pipeline", set, missing);
            }
            if ds.bindings_used & expected == 0 {
                continue;
            }

            let layout = info.set_layouts[set];
            if ds.layout != layout {
                ds.layout = layout;
                ds.cached_set = vk::DescriptorSet::null();
                ds.dirty = true;
            }

            if ds.dirty {
                if ds.cached_set == vk::DescriptorSet::null() || ds.sealed {
                    ds.cached_set = backend.allocate_set(layout)?;
                    ds.sealed = false;
                    ds.needs_bind = true;
                    self.stats.sets_allocated += 1;
                }

                let writes = (0..MAX_BINDINGS as u32)
                    .filter(|b| expected & ds.bindings_used & (1 << b) != 0)
                    .filter_map(|b| {
                        ds.infos[b as usize].map(|descriptor| DescriptorWrite {
                            binding: b,
                            array_element: 0,
                            info: descriptor,
                        })
                    })
                    .collect_vec();
                backend.update_set(ds.cached_set, &writes);
                self.stats.set_updates += 1;
                self.stats.descriptor_writes += writes.len() as u32;
                ds.dirty = false;
            }

            resolved[set] = ds.cached_set;
            if ds.needs_bind {
                to_bind |= 1 << set;
            }
        }

        // 连续的 set 合并为一次 bind
        let mut set = 0;
        while set < MAX_DATASETS {
            if to_bind & (1 << set) == 0 {
                set += 1;
                continue;
            }
            let first = set;
            while set < MAX_DATASETS && to_bind & (1 << set) != 0 {
                let ds = &mut self.datasets[set];
                ds.needs_bind = false;
                ds.sealed = true;
                set += 1;
            }
            backend.bind_sets(bind_point, info.pipeline_layout, first as u32, &resolved[first..set]);
            self.stats.bind_calls += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::descriptor_info::test_backend::CountingBackend;
    use ash::vk::Handle;

    fn layout_info(sets: &[(u32, u32)], bindless_set: Option<u32>) -> Arc<PipelineLayoutInfo> {
        let set_count = sets.iter().map(|(s, _)| s + 1).max().unwrap_or(0);
        let mut bindings_used = [0; MAX_DATASETS];
        let mut datasets_used = 0;
        for &(set, mask) in sets {
            bindings_used[set as usize] = mask;
            datasets_used |= 1 << set;
        }
        Arc::new(PipelineLayoutInfo {
            pipeline_layout: vk::PipelineLayout::from_raw(1),
            set_layouts: (0..set_count).map(|s| vk::DescriptorSetLayout::from_raw(10 + s as u64)).collect(),
            datasets_used,
            bindings_used,
            bindless_set,
            push_constant_ranges: vec![],
        })
    }

    fn ubo(raw: u64) -> DescriptorInfo {
        DescriptorInfo::UniformBuffer {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            range: 256,
        }
    }

    const BINDLESS: u64 = 0xb1d;

    #[test]
    fn test_identical_binds_write_once() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        let pipeline = vk::Pipeline::from_raw(1);

        assert!(cache.bind_pipeline(pipeline, vk::PipelineBindPoint::GRAPHICS, layout_info(&[(0, 0b1)], None)));
        cache.update_binding(0, 0, ubo(7));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        // 第二次 draw 使用完全相同的 binding
        assert!(!cache.bind_pipeline(pipeline, vk::PipelineBindPoint::GRAPHICS, layout_info(&[(0, 0b1)], None)));
        cache.update_binding(0, 0, ubo(7));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        assert_eq!(backend.updates.len(), 1);
        assert_eq!(backend.binds.len(), 1);
        assert_eq!(
            cache.stats(),
            BindingCacheStats {
                sets_allocated: 1,
                set_updates: 1,
                descriptor_writes: 1,
                bind_calls: 1,
            }
        );
    }

    #[test]
    fn test_change_after_draw_uses_fresh_set() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        cache.bind_pipeline(vk::Pipeline::from_raw(1), vk::PipelineBindPoint::COMPUTE, layout_info(&[(0, 0b11)], None));

        cache.update_binding(0, 0, ubo(1));
        cache.update_binding(0, 1, ubo(2));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        cache.update_binding(0, 1, ubo(3));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        assert_eq!(backend.allocated.len(), 2);
        assert_eq!(backend.updates.len(), 2);
        // 新的 set 需要写入所有 binding
        let (set, writes) = &backend.updates[1];
        assert_eq!(*set, backend.allocated[1]);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].info, ubo(3));
        assert_eq!(backend.binds.last().unwrap(), &(0, vec![backend.allocated[1]]));
    }

    #[test]
    fn test_contiguous_sets_bind_together() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        cache.bind_pipeline(
            vk::Pipeline::from_raw(1),
            vk::PipelineBindPoint::GRAPHICS,
            layout_info(&[(0, 1), (1, 1), (3, 1)], None),
        );
        cache.update_binding(0, 0, ubo(1));
        cache.update_binding(1, 0, ubo(2));
        cache.update_binding(3, 0, ubo(3));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        assert_eq!(backend.updates.len(), 3);
        assert_eq!(backend.binds.len(), 2);
        assert_eq!(backend.binds[0].0, 0);
        assert_eq!(backend.binds[0].1.len(), 2);
        assert_eq!(backend.binds[1].0, 3);
        assert_eq!(backend.binds[1].1.len(), 1);
    }

    #[test]
    fn test_pipeline_switch_clears_state() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        let layout = layout_info(&[(0, 1)], None);

        cache.bind_pipeline(vk::Pipeline::from_raw(1), vk::PipelineBindPoint::GRAPHICS, layout.clone());
        cache.update_binding(0, 0, ubo(1));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        assert!(cache.bind_pipeline(vk::Pipeline::from_raw(2), vk::PipelineBindPoint::GRAPHICS, layout));
        // 切换后没有任何 binding，不会写入也不会 bind
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();
        assert_eq!(backend.updates.len(), 1);
        assert_eq!(backend.binds.len(), 1);

        // 重新提供同样的 binding 需要再次写入
        cache.update_binding(0, 0, ubo(1));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();
        assert_eq!(backend.updates.len(), 2);
        assert_eq!(backend.binds.len(), 2);
    }

    #[test]
    fn test_bindless_set_resolves_without_writes() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        cache.bind_pipeline(
            vk::Pipeline::from_raw(1),
            vk::PipelineBindPoint::COMPUTE,
            layout_info(&[(0, 1), (1, 1)], Some(1)),
        );
        cache.update_binding(0, 0, ubo(1));
        let bindless = vk::DescriptorSet::from_raw(BINDLESS);
        cache.flush(&mut backend, bindless).unwrap();
        cache.flush(&mut backend, bindless).unwrap();

        assert_eq!(backend.updates.len(), 1);
        assert_eq!(backend.allocated.len(), 1);
        assert_eq!(backend.binds, vec![(0, vec![backend.allocated[0], bindless])]);
    }

    #[test]
    fn test_external_set_bypasses_writes() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        cache.bind_pipeline(vk::Pipeline::from_raw(1), vk::PipelineBindPoint::COMPUTE, layout_info(&[(0, 1)], None));

        let persistent = vk::DescriptorSet::from_raw(0x5e7);
        cache.update_external_set(0, persistent);
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();
        cache.update_external_set(0, persistent);
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        assert!(backend.updates.is_empty());
        assert_eq!(backend.binds, vec![(0, vec![persistent])]);

        // 之后单独更新 binding 会回到按 draw 分配的 set
        cache.update_binding(0, 0, ubo(9));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();
        assert_eq!(backend.updates.len(), 1);
        assert_eq!(backend.binds.len(), 2);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut cache = DescriptorBindingCache::new();
        let mut backend = CountingBackend::default();
        cache.bind_pipeline(vk::Pipeline::from_raw(1), vk::PipelineBindPoint::COMPUTE, layout_info(&[(0, 1)], None));
        cache.update_binding(0, 0, ubo(1));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();

        cache.reset();
        assert!(cache.bound_layout().is_none());
        assert_eq!(cache.stats(), BindingCacheStats::default());

        cache.bind_pipeline(vk::Pipeline::from_raw(1), vk::PipelineBindPoint::COMPUTE, layout_info(&[(0, 1)], None));
        cache.update_binding(0, 0, ubo(1));
        cache.flush(&mut backend, vk::DescriptorSet::null()).unwrap();
        assert_eq!(backend.allocated.len(), 2);
    }
}
