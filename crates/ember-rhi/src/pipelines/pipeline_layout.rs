use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::descriptors::bindless::BINDLESS_BINDING;
use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::pipelines::shader_reflection::ShaderReflection;

/// 一个 pipeline 最多使用的 descriptor set 数量
pub const MAX_DATASETS: usize = 8;
/// 每个 set 中 binding index 的上限
pub const MAX_BINDINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetLayoutDesc {
    /// 按 binding index 排序
    Regular(Vec<LayoutBinding>),
    /// 使用全局共享的 bindless layout
    Bindless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantDesc {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// 从反射结果推导出的 layout 描述，作为缓存的 key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineLayoutDesc {
    pub sets: Vec<SetLayoutDesc>,
    pub push_constants: Vec<PushConstantDesc>,
}

/// 创建好的 pipeline layout 以及 binding cache 需要的掩码
#[derive(Debug)]
pub struct PipelineLayoutInfo {
    pub pipeline_layout: vk::PipelineLayout,
    /// 长度等于 set 的数量，未使用的 set 是空 layout
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// 第 i 位表示 set i 至少有一个 binding
    pub datasets_used: u32,
    pub bindings_used: [u32; MAX_DATASETS],
    pub bindless_set: Option<u32>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutInfo {
    #[inline]
    pub fn is_dataset_used(&self, set: u32) -> bool {
        self.datasets_used & (1 << set) != 0
    }

    /// 与 `[offset, offset + size)` 重叠的 push constant range 的 stage 合集
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> vk::ShaderStageFlags {
        let end = offset.saturating_add(size);
        self.push_constant_ranges
            .iter()
            .filter(|r| r.offset < end && offset < r.offset.saturating_add(r.size))
            .fold(vk::ShaderStageFlags::empty(), |acc, r| acc | r.stage_flags)
    }
}

impl PipelineLayoutDesc {
    /// 合并所有 stage 的反射结果
    ///
    /// 同一个 (set, binding) 在不同 stage 中的类型和数量必须一致，stage flags 取并集。
    /// set 的第一个 binding 数量为 0（runtime array）时，该 set 被视为 bindless set，
    /// 它必须和共享的 bindless layout 一致：只有 `BINDLESS_BINDING` 一个 binding，类型为 `bindless_type`。
    pub fn derive(stages: &[ShaderReflection], bindless_type: vk::DescriptorType) -> RhiResult<Self> {
        let mut merged: BTreeMap<(u32, u32), LayoutBinding> = BTreeMap::new();
        for stage in stages {
            for b in &stage.bindings {
                if b.set as usize >= MAX_DATASETS || b.binding as usize >= MAX_BINDINGS {
                    return Err(RhiError::LayoutMismatch(format!(
                        "set {} binding {} exceeds the limit ({} sets, {} bindings)",
                        b.set, b.binding, MAX_DATASETS, MAX_BINDINGS
                    )));
                }
                let entry = merged.entry((b.set, b.binding)).or_insert(LayoutBinding {
                    binding: b.binding,
                    descriptor_type: b.descriptor_type,
                    count: b.count,
                    stages: vk::ShaderStageFlags::empty(),
                });
                if entry.descriptor_type != b.descriptor_type || entry.count != b.count {
                    return Err(RhiError::LayoutMismatch(format!(
                        "set {} binding {} is declared as {:?}[{}] and {:?}[{}]",
                        b.set, b.binding, entry.descriptor_type, entry.count, b.descriptor_type, b.count
                    )));
                }
                entry.stages |= stage.stage;
            }
        }

        let set_count = merged.keys().map(|(set, _)| set + 1).max().unwrap_or(0);
        let mut sets = Vec::with_capacity(set_count as usize);
        for set in 0..set_count {
            let bindings = merged.range((set, 0)..(set + 1, 0)).map(|(_, b)| *b).collect_vec();
            match bindings.first() {
                Some(first) if first.count == 0 => {
                    if first.binding != BINDLESS_BINDING || first.descriptor_type != bindless_type || bindings.len() > 1
                    {
                        return Err(RhiError::LayoutMismatch(format!(
                            "bindless set {} must declare only {:?}[] at binding {}, found {:?}[] at binding {} ({} bindings)",
                            set,
                            bindless_type,
                            BINDLESS_BINDING,
                            first.descriptor_type,
                            first.binding,
                            bindings.len()
                        )));
                    }
                    sets.push(SetLayoutDesc::Bindless);
                }
                _ => {
                    if let Some(b) = bindings.iter().find(|b| b.count == 0) {
                        return Err(RhiError::LayoutMismatch(format!(
                            "runtime array at set {} binding {} must be the first binding of the set",
                            set, b.binding
                        )));
                    }
                    sets.push(SetLayoutDesc::Regular(bindings));
                }
            }
        }
        if sets.iter().filter(|s| matches!(s, SetLayoutDesc::Bindless)).count() > 1 {
            return Err(RhiError::LayoutMismatch("only one bindless set is allowed".to_string()));
        }

        Ok(Self {
            sets,
            push_constants: Self::merge_push_constants(stages),
        })
    }

    /// 每个 stage 只能出现在一个 range 中；完全相同的 range 合并 stage flags
    fn merge_push_constants(stages: &[ShaderReflection]) -> Vec<PushConstantDesc> {
        let mut ranges: Vec<PushConstantDesc> = Vec::new();
        for stage in stages {
            let Some(pc) = stage.push_constant else { continue };
            if pc.size == 0 {
                continue;
            }
            match ranges.iter_mut().find(|r| r.offset == pc.offset && r.size == pc.size) {
                Some(range) => range.stages |= stage.stage,
                None => ranges.push(PushConstantDesc {
                    stages: stage.stage,
                    offset: pc.offset,
                    size: pc.size,
                }),
            }
        }
        ranges
    }

    /// 计算每个 set 的 binding 掩码
    fn masks(&self) -> (u32, [u32; MAX_DATASETS], Option<u32>) {
        let mut datasets_used = 0;
        let mut bindings_used = [0u32; MAX_DATASETS];
        let mut bindless_set = None;
        for (set, desc) in self.sets.iter().enumerate() {
            match desc {
                SetLayoutDesc::Bindless => {
                    datasets_used |= 1 << set;
                    bindings_used[set] = 1;
                    bindless_set = Some(set as u32);
                }
                SetLayoutDesc::Regular(bindings) => {
                    bindings_used[set] = bindings.iter().fold(0, |mask, b| mask | (1 << b.binding));
                    if bindings_used[set] != 0 {
                        datasets_used |= 1 << set;
                    }
                }
            }
        }
        (datasets_used, bindings_used, bindless_set)
    }
}

/// 创建 layout 的 native 操作，测试中可以替换
pub trait LayoutFactory {
    fn create_set_layout(&mut self, bindings: &[LayoutBinding]) -> RhiResult<vk::DescriptorSetLayout>;
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;
}

pub struct DeviceLayoutFactory<'a>(pub &'a GfxDevice);

impl LayoutFactory for DeviceLayoutFactory<'_> {
    fn create_set_layout(&mut self, bindings: &[LayoutBinding]) -> RhiResult<vk::DescriptorSetLayout> {
        let vk_bindings = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect_vec();
        let ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        unsafe { self.0.create_descriptor_set_layout(&ci, None) }.map_err(RhiError::creation("descriptor set layout"))
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let ci = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts).push_constant_ranges(push_constants);
        unsafe { self.0.create_pipeline_layout(&ci, None) }.map_err(RhiError::creation("pipeline layout"))
    }
}

/// set layout 和 pipeline layout 的缓存，按结构相等复用
///
/// 缓存的 layout 在设备关闭时统一销毁
pub struct PipelineLayoutCache {
    set_layouts: HashMap<Vec<LayoutBinding>, vk::DescriptorSetLayout>,
    pipeline_layouts: HashMap<PipelineLayoutDesc, Arc<PipelineLayoutInfo>>,
    bindless_layout: vk::DescriptorSetLayout,
}

// new & init
impl PipelineLayoutCache {
    pub fn new(bindless_layout: vk::DescriptorSetLayout) -> Self {
        Self {
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            bindless_layout,
        }
    }
}

// destroy
impl PipelineLayoutCache {
    pub fn destroy(&mut self, device: &GfxDevice) {
        for (_, info) in self.pipeline_layouts.drain() {
            unsafe { device.destroy_pipeline_layout(info.pipeline_layout, None) };
        }
        for (_, layout) in self.set_layouts.drain() {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
        }
    }
}

// tools
impl PipelineLayoutCache {
    pub fn get_or_create(
        &mut self,
        desc: &PipelineLayoutDesc,
        factory: &mut impl LayoutFactory,
    ) -> RhiResult<Arc<PipelineLayoutInfo>> {
        if let Some(info) = self.pipeline_layouts.get(desc) {
            return Ok(info.clone());
        }

        let mut set_layouts = Vec::with_capacity(desc.sets.len());
        for set in &desc.sets {
            let layout = match set {
                SetLayoutDesc::Bindless => self.bindless_layout,
                SetLayoutDesc::Regular(bindings) => match self.set_layouts.get(bindings) {
                    Some(layout) => *layout,
                    None => {
                        let layout = factory.create_set_layout(bindings)?;
                        self.set_layouts.insert(bindings.clone(), layout);
                        layout
                    }
                },
            };
            set_layouts.push(layout);
        }

        let push_constant_ranges = desc
            .push_constants
            .iter()
            .map(|pc| vk::PushConstantRange::default().stage_flags(pc.stages).offset(pc.offset).size(pc.size))
            .collect_vec();
        let pipeline_layout = factory.create_pipeline_layout(&set_layouts, &push_constant_ranges)?;

        let (datasets_used, bindings_used, bindless_set) = desc.masks();
        let info = Arc::new(PipelineLayoutInfo {
            pipeline_layout,
            set_layouts,
            datasets_used,
            bindings_used,
            bindless_set,
            push_constant_ranges,
        });
        self.pipeline_layouts.insert(desc.clone(), info.clone());
        Ok(info)
    }

    #[inline]
    pub fn set_layout_count(&self) -> usize {
        self.set_layouts.len()
    }

    #[inline]
    pub fn pipeline_layout_count(&self) -> usize {
        self.pipeline_layouts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::shader_reflection::test_spirv::*;
    use crate::pipelines::shader_reflection::{ReflectedBinding, ReflectedPushConstant, reflect_spirv};
    use ash::vk::Handle;

    #[derive(Default)]
    struct CountingFactory {
        set_layouts: Vec<Vec<LayoutBinding>>,
        pipeline_layouts: usize,
    }
    impl LayoutFactory for CountingFactory {
        fn create_set_layout(&mut self, bindings: &[LayoutBinding]) -> RhiResult<vk::DescriptorSetLayout> {
            self.set_layouts.push(bindings.to_vec());
            Ok(vk::DescriptorSetLayout::from_raw(self.set_layouts.len() as u64))
        }
        fn create_pipeline_layout(
            &mut self,
            _set_layouts: &[vk::DescriptorSetLayout],
            _push_constants: &[vk::PushConstantRange],
        ) -> RhiResult<vk::PipelineLayout> {
            self.pipeline_layouts += 1;
            Ok(vk::PipelineLayout::from_raw(100 + self.pipeline_layouts as u64))
        }
    }

    fn reflection(
        stage: vk::ShaderStageFlags,
        bindings: &[(u32, u32, vk::DescriptorType, u32)],
        push_constant: Option<(u32, u32)>,
    ) -> ShaderReflection {
        ShaderReflection {
            stage,
            entry_point: "main".to_string(),
            bindings: bindings
                .iter()
                .map(|&(set, binding, descriptor_type, count)| ReflectedBinding {
                    set,
                    binding,
                    descriptor_type,
                    count,
                })
                .collect(),
            push_constant: push_constant.map(|(offset, size)| ReflectedPushConstant { offset, size }),
        }
    }

    const BINDLESS_LAYOUT: u64 = 0xb1d1e55;
    const BINDLESS_TYPE: vk::DescriptorType = vk::DescriptorType::SAMPLED_IMAGE;

    #[test]
    fn test_merge_stage_flags() {
        let vs = reflection(
            vk::ShaderStageFlags::VERTEX,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
            Some((0, 64)),
        );
        let fs = reflection(
            vk::ShaderStageFlags::FRAGMENT,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1), (0, 2, vk::DescriptorType::SAMPLER, 1)],
            Some((0, 64)),
        );
        let desc = PipelineLayoutDesc::derive(&[vs, fs], BINDLESS_TYPE).unwrap();

        let SetLayoutDesc::Regular(bindings) = &desc.sets[0] else { panic!("set 0 should be regular") };
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[1].stages, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            desc.push_constants,
            vec![PushConstantDesc {
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: 64
            }]
        );
    }

    #[test]
    fn test_push_constant_stages_overlap() {
        let info = PipelineLayoutInfo {
            pipeline_layout: vk::PipelineLayout::null(),
            set_layouts: vec![],
            datasets_used: 0,
            bindings_used: [0; MAX_DATASETS],
            bindless_set: None,
            push_constant_ranges: vec![
                vk::PushConstantRange::default().stage_flags(vk::ShaderStageFlags::VERTEX).offset(0).size(64),
                vk::PushConstantRange::default().stage_flags(vk::ShaderStageFlags::FRAGMENT).offset(64).size(16),
            ],
        };
        assert_eq!(info.push_constant_stages(0, 64), vk::ShaderStageFlags::VERTEX);
        assert_eq!(info.push_constant_stages(64, 16), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(info.push_constant_stages(60, 8), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert!(info.push_constant_stages(80, 4).is_empty());
    }

    #[test]
    fn test_conflicting_declarations() {
        let vs = reflection(vk::ShaderStageFlags::VERTEX, &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)], None);
        let fs = reflection(vk::ShaderStageFlags::FRAGMENT, &[(0, 0, vk::DescriptorType::STORAGE_BUFFER, 1)], None);
        assert!(matches!(PipelineLayoutDesc::derive(&[vs, fs], BINDLESS_TYPE), Err(RhiError::LayoutMismatch(_))));
    }

    #[test]
    fn test_masks_and_bindless_set() {
        let cs = reflection(
            vk::ShaderStageFlags::COMPUTE,
            &[
                (0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
                (0, 3, vk::DescriptorType::STORAGE_IMAGE, 1),
                (2, 0, vk::DescriptorType::SAMPLED_IMAGE, 0),
            ],
            None,
        );
        let desc = PipelineLayoutDesc::derive(&[cs], BINDLESS_TYPE).unwrap();
        assert_eq!(desc.sets.len(), 3);
        assert_eq!(desc.sets[1], SetLayoutDesc::Regular(vec![]));
        assert_eq!(desc.sets[2], SetLayoutDesc::Bindless);

        let mut cache = PipelineLayoutCache::new(vk::DescriptorSetLayout::from_raw(BINDLESS_LAYOUT));
        let mut factory = CountingFactory::default();
        let info = cache.get_or_create(&desc, &mut factory).unwrap();

        assert_eq!(info.datasets_used, 0b101);
        assert_eq!(info.bindings_used[0], 0b1001);
        assert_eq!(info.bindings_used[1], 0);
        assert_eq!(info.bindless_set, Some(2));
        assert_eq!(info.set_layouts.len(), 3);
        assert_eq!(info.set_layouts[2], vk::DescriptorSetLayout::from_raw(BINDLESS_LAYOUT));
        // set 0 和空的 set 1 各创建一个 layout，bindless 使用共享的 layout
        assert_eq!(factory.set_layouts.len(), 2);
    }

    #[test]
    fn test_layouts_are_cached_structurally() {
        let mut cache = PipelineLayoutCache::new(vk::DescriptorSetLayout::null());
        let mut factory = CountingFactory::default();

        let a = reflection(vk::ShaderStageFlags::COMPUTE, &[(0, 0, vk::DescriptorType::STORAGE_BUFFER, 1)], None);
        let b = reflection(
            vk::ShaderStageFlags::COMPUTE,
            &[(0, 0, vk::DescriptorType::STORAGE_BUFFER, 1), (1, 0, vk::DescriptorType::STORAGE_BUFFER, 1)],
            None,
        );

        let desc_a = PipelineLayoutDesc::derive(&[a.clone()], BINDLESS_TYPE).unwrap();
        let info_a = cache.get_or_create(&desc_a, &mut factory).unwrap();
        let desc_a2 = PipelineLayoutDesc::derive(&[a], BINDLESS_TYPE).unwrap();
        let info_a2 = cache.get_or_create(&desc_a2, &mut factory).unwrap();
        assert!(Arc::ptr_eq(&info_a, &info_a2));
        assert_eq!(factory.pipeline_layouts, 1);

        // 两个 set 的 binding 列表相同，复用同一个 set layout
        let desc_b = PipelineLayoutDesc::derive(&[b], BINDLESS_TYPE).unwrap();
        let info_b = cache.get_or_create(&desc_b, &mut factory).unwrap();
        assert_eq!(factory.set_layouts.len(), 1);
        assert_eq!(factory.pipeline_layouts, 2);
        assert_eq!(info_b.set_layouts[0], info_b.set_layouts[1]);
        assert_eq!(cache.pipeline_layout_count(), 2);
    }

    #[test]
    fn test_runtime_array_must_come_first() {
        let cs = reflection(
            vk::ShaderStageFlags::COMPUTE,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1), (0, 1, vk::DescriptorType::SAMPLED_IMAGE, 0)],
            None,
        );
        assert!(PipelineLayoutDesc::derive(&[cs], BINDLESS_TYPE).is_err());
    }

    #[test]
    fn test_bindless_set_must_match_shared_layout() {
        let mismatch = |bindings: &[(u32, u32, vk::DescriptorType, u32)]| {
            let cs = reflection(vk::ShaderStageFlags::COMPUTE, bindings, None);
            matches!(PipelineLayoutDesc::derive(&[cs], BINDLESS_TYPE), Err(RhiError::LayoutMismatch(_)))
        };

        // runtime array 不在 BINDLESS_BINDING 上
        assert!(mismatch(&[(1, 3, vk::DescriptorType::STORAGE_BUFFER, 0)]));
        assert!(mismatch(&[(1, 3, BINDLESS_TYPE, 0)]));
        // 类型和 bindless layout 不同
        assert!(mismatch(&[(1, 0, vk::DescriptorType::STORAGE_IMAGE, 0)]));
        // bindless set 中还有其他 binding
        assert!(mismatch(&[(1, 0, BINDLESS_TYPE, 0), (1, 1, vk::DescriptorType::UNIFORM_BUFFER, 1)]));

        let cs = reflection(vk::ShaderStageFlags::COMPUTE, &[(1, 0, BINDLESS_TYPE, 0)], None);
        let desc = PipelineLayoutDesc::derive(&[cs], BINDLESS_TYPE).unwrap();
        assert_eq!(desc.sets, vec![SetLayoutDesc::Regular(vec![]), SetLayoutDesc::Bindless]);
    }

    #[test]
    fn test_derive_from_spirv() {
        let mut insts = vec![entry_point(5, 1, "main")];
        insts.extend(basic_types());
        insts.extend(uniform_buffer(10, 0, 0));
        insts.extend(runtime_texture_array(20, 1, 0));
        let reflection = reflect_spirv(&module(insts), "main").unwrap();

        let desc = PipelineLayoutDesc::derive(&[reflection], BINDLESS_TYPE).unwrap();
        assert_eq!(
            desc.sets[0],
            SetLayoutDesc::Regular(vec![LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
            }])
        );
        assert_eq!(desc.sets[1], SetLayoutDesc::Bindless);
    }
}
