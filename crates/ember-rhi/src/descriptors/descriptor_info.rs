use ash::vk;
use itertools::Itertools;

use crate::error::RhiResult;

/// 已经解析为 native 对象的一条 descriptor
///
/// 可以直接比较，用于判断 binding 是否真的发生了变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorInfo {
    Sampler {
        sampler: vk::Sampler,
    },
    CombinedImageSampler {
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
    SampledImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
}

impl DescriptorInfo {
    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Sampler { .. } => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage { .. } => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    fn image_info(&self) -> Option<vk::DescriptorImageInfo> {
        match *self {
            Self::Sampler { sampler } => Some(vk::DescriptorImageInfo::default().sampler(sampler)),
            Self::CombinedImageSampler { view, layout, sampler } => {
                Some(vk::DescriptorImageInfo::default().image_view(view).image_layout(layout).sampler(sampler))
            }
            Self::SampledImage { view, layout } | Self::StorageImage { view, layout } => {
                Some(vk::DescriptorImageInfo::default().image_view(view).image_layout(layout))
            }
            _ => None,
        }
    }

    fn buffer_info(&self) -> Option<vk::DescriptorBufferInfo> {
        match *self {
            Self::UniformBuffer { buffer, offset, range } | Self::StorageBuffer { buffer, offset, range } => {
                Some(vk::DescriptorBufferInfo::default().buffer(buffer).offset(offset).range(range))
            }
            _ => None,
        }
    }
}

/// 对某个 set 的一次写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub info: DescriptorInfo,
}

/// 写 descriptor set 的 native 操作
pub trait DescriptorWriter {
    /// 一次 native 调用写入同一个 set 的所有 writes
    fn update_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);
}

/// 直接使用 device 写入，用于 bindless 表和常驻的 Binding 资源
pub struct DeviceDescriptorWriter<'a>(pub &'a ash::Device);
impl DescriptorWriter for DeviceDescriptorWriter<'_> {
    #[inline]
    fn update_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        write_descriptor_set(self.0, set, writes);
    }
}

/// recorder 录制时需要的 descriptor 操作
///
/// binding cache 只通过这个 trait 访问驱动，测试中可以用计数的实现替换
pub trait DescriptorBackend: DescriptorWriter {
    /// 从当前 recorder 的 pool 中分配一个 set
    fn allocate_set(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet>;

    fn bind_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
}

/// 将 writes 转换为 `vk::WriteDescriptorSet` 并调用 `vkUpdateDescriptorSets`
pub fn write_descriptor_set(device: &ash::Device, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
    if writes.is_empty() {
        return;
    }

    // info 数组必须在 update 调用结束之前保持存活
    let image_infos = writes.iter().map(|w| w.info.image_info().unwrap_or_default()).collect_vec();
    let buffer_infos = writes.iter().map(|w| w.info.buffer_info().unwrap_or_default()).collect_vec();

    let vk_writes = writes
        .iter()
        .enumerate()
        .map(|(idx, w)| {
            let vk_write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(w.binding)
                .dst_array_element(w.array_element)
                .descriptor_type(w.info.descriptor_type());
            if w.info.buffer_info().is_some() {
                vk_write.buffer_info(std::slice::from_ref(&buffer_infos[idx]))
            } else {
                vk_write.image_info(std::slice::from_ref(&image_infos[idx]))
            }
        })
        .collect_vec();

    unsafe {
        device.update_descriptor_sets(&vk_writes, &[]);
    }
}

#[cfg(test)]
pub(crate) mod test_backend {
    use super::*;
    use ash::vk::Handle;

    /// 只记录调用次数的 backend
    #[derive(Default)]
    pub struct CountingBackend {
        next_set: u64,
        pub allocated: Vec<vk::DescriptorSet>,
        pub updates: Vec<(vk::DescriptorSet, Vec<DescriptorWrite>)>,
        pub binds: Vec<(u32, Vec<vk::DescriptorSet>)>,
    }

    impl DescriptorWriter for CountingBackend {
        fn update_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
            self.updates.push((set, writes.to_vec()));
        }
    }

    impl DescriptorBackend for CountingBackend {
        fn allocate_set(&mut self, _layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
            self.next_set += 1;
            let set = vk::DescriptorSet::from_raw(0x1000 + self.next_set);
            self.allocated.push(set);
            Ok(set)
        }

        fn bind_sets(
            &mut self,
            _bind_point: vk::PipelineBindPoint,
            _layout: vk::PipelineLayout,
            first_set: u32,
            sets: &[vk::DescriptorSet],
        ) {
            self.binds.push((first_set, sets.to_vec()));
        }
    }
}
