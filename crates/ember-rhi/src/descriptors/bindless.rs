use ash::vk;

use crate::descriptors::descriptor_info::{DescriptorInfo, DescriptorWrite, DescriptorWriter};
use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;

/// bindless 数组所在的 binding
pub const BINDLESS_BINDING: u32 = 0;

/// 全局唯一的 bindless descriptor set
///
/// 整个设备只有一个 set，里面是长度为 capacity 的 descriptor 数组（partially bound，
/// variable count，update after bind）。每个资源在其生命周期内持有一个稳定的 slot index，
/// shader 通过 index 访问。
///
/// slot 的回收是 LIFO 的：刚释放的 index 会被下一次 allocate 复用。
pub struct BindlessAllocator {
    capacity: u32,
    descriptor_type: vk::DescriptorType,

    /// 栈顶是下一个可用的 index
    free_list: Vec<u32>,
    /// 释放 slot 时写入的占位 descriptor
    null_info: Option<DescriptorInfo>,

    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl BindlessAllocator {
    /// 只包含 free list，不创建 native 对象
    pub fn new_detached(capacity: u32, descriptor_type: vk::DescriptorType) -> Self {
        Self {
            capacity,
            descriptor_type,
            // 倒序放入，保证 0 最先被分配
            free_list: (0..capacity).rev().collect(),
            null_info: None,
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            #[cfg(debug_assertions)]
            destroyed: true,
        }
    }

    pub fn new(device: &GfxDevice, capacity: u32, descriptor_type: vk::DescriptorType) -> RhiResult<Self> {
        let _span = tracy_client::span!("BindlessAllocator::new");

        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(BINDLESS_BINDING)
            .descriptor_type(descriptor_type)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::ALL);
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND];
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(std::slice::from_ref(&binding))
            .push_next(&mut binding_flags_ci);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_ci, None) }
            .map_err(RhiError::creation("bindless descriptor set layout"))?;
        device.set_object_debug_name(layout, "bindless");

        let pool_size = vk::DescriptorPoolSize::default().ty(descriptor_type).descriptor_count(capacity);
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(std::slice::from_ref(&pool_size));
        let pool = match unsafe { device.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(RhiError::creation("bindless descriptor pool")(e));
            }
        };
        device.set_object_debug_name(pool, "bindless");

        let counts = [capacity];
        let mut variable_count_ai =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let set_ai = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&layout))
            .push_next(&mut variable_count_ai);
        let set = match unsafe { device.allocate_descriptor_sets(&set_ai) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(RhiError::creation("bindless descriptor set")(e));
            }
        };
        device.set_object_debug_name(set, "bindless");

        log::info!("bindless table created: {} x {:?}", capacity, descriptor_type);

        let mut allocator = Self::new_detached(capacity, descriptor_type);
        allocator.layout = layout;
        allocator.pool = pool;
        allocator.set = set;
        #[cfg(debug_assertions)]
        {
            allocator.destroyed = false;
        }
        Ok(allocator)
    }
}

// destroy
impl BindlessAllocator {
    pub fn destroy(&mut self, device: &GfxDevice) {
        unsafe {
            // set 跟随 pool 一起释放
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
        self.pool = vk::DescriptorPool::null();
        self.layout = vk::DescriptorSetLayout::null();
        self.set = vk::DescriptorSet::null();

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for BindlessAllocator {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "BindlessAllocator must be destroyed before being dropped.");
    }
}

// getters
impl BindlessAllocator {
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        self.descriptor_type
    }
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
    #[inline]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

// slot 分配
impl BindlessAllocator {
    /// 注册占位 descriptor，之后 free 的 slot 都会被重写为它
    #[inline]
    pub fn set_null(&mut self, info: DescriptorInfo) {
        debug_assert_eq!(info.descriptor_type(), self.descriptor_type);
        self.null_info = Some(info);
    }

    /// 取出一个 slot 并写入 descriptor
    ///
    /// slot 耗尽时返回 `BindlessExhausted`，这不是致命错误，调用方可以选择不使用 bindless
    pub fn allocate(&mut self, info: DescriptorInfo, writer: &mut impl DescriptorWriter) -> RhiResult<u32> {
        debug_assert_eq!(info.descriptor_type(), self.descriptor_type);

        let index = self.free_list.pop().ok_or(RhiError::BindlessExhausted {
            capacity: self.capacity,
        })?;
        writer.update_set(self.set, &[self.write(index, info)]);
        Ok(index)
    }

    /// 归还 slot
    ///
    /// 调用方需要保证已经没有 in-flight 的命令会读取这个 slot
    pub fn free(&mut self, index: u32, writer: &mut impl DescriptorWriter) {
        debug_assert!(index < self.capacity, "bindless index {} out of range", index);
        debug_assert!(!self.free_list.contains(&index), "bindless index {} freed twice", index);

        if let Some(null_info) = self.null_info {
            writer.update_set(self.set, &[self.write(index, null_info)]);
        }
        self.free_list.push(index);
    }

    #[inline]
    fn write(&self, index: u32, info: DescriptorInfo) -> DescriptorWrite {
        DescriptorWrite {
            binding: BINDLESS_BINDING,
            array_element: index,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::descriptor_info::test_backend::CountingBackend;
    use ash::vk::Handle;

    fn image(raw: u64) -> DescriptorInfo {
        DescriptorInfo::SampledImage {
            view: vk::ImageView::from_raw(raw),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_allocate_starts_from_zero() {
        let mut bindless = BindlessAllocator::new_detached(4, vk::DescriptorType::SAMPLED_IMAGE);
        let mut writer = CountingBackend::default();

        assert_eq!(bindless.allocate(image(1), &mut writer).unwrap(), 0);
        assert_eq!(bindless.allocate(image(2), &mut writer).unwrap(), 1);
        assert_eq!(writer.updates.len(), 2);
        assert_eq!(writer.updates[1].1[0].array_element, 1);
        assert_eq!(writer.updates[1].1[0].info, image(2));
    }

    #[test]
    fn test_free_then_allocate_reuses_index() {
        let mut bindless = BindlessAllocator::new_detached(8, vk::DescriptorType::SAMPLED_IMAGE);
        let mut writer = CountingBackend::default();

        let indices: Vec<u32> = (0..5).map(|i| bindless.allocate(image(i + 1), &mut writer).unwrap()).collect();
        bindless.free(indices[2], &mut writer);
        assert_eq!(bindless.allocate(image(100), &mut writer).unwrap(), indices[2]);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut bindless = BindlessAllocator::new_detached(2, vk::DescriptorType::SAMPLED_IMAGE);
        let mut writer = CountingBackend::default();

        bindless.allocate(image(1), &mut writer).unwrap();
        bindless.allocate(image(2), &mut writer).unwrap();
        match bindless.allocate(image(3), &mut writer) {
            Err(RhiError::BindlessExhausted { capacity }) => assert_eq!(capacity, 2),
            other => panic!("unexpected: {other:?}"),
        }
        // 失败的分配不会写 descriptor
        assert_eq!(writer.updates.len(), 2);

        bindless.free(0, &mut writer);
        assert_eq!(bindless.allocate(image(4), &mut writer).unwrap(), 0);
    }

    #[test]
    fn test_free_rewrites_null_placeholder() {
        let mut bindless = BindlessAllocator::new_detached(4, vk::DescriptorType::SAMPLED_IMAGE);
        let mut writer = CountingBackend::default();

        let index = bindless.allocate(image(1), &mut writer).unwrap();
        bindless.free(index, &mut writer);
        // 没有注册占位时 free 不写 descriptor
        assert_eq!(writer.updates.len(), 1);

        let null = image(0xdead);
        bindless.set_null(null);
        let index = bindless.allocate(image(2), &mut writer).unwrap();
        bindless.free(index, &mut writer);
        assert_eq!(writer.updates.len(), 3);
        let (_, writes) = writer.updates.last().unwrap();
        assert_eq!(writes[0].array_element, index);
        assert_eq!(writes[0].info, null);
    }
}
