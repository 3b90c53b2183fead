use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;

/// 每种 descriptor 类型相对于 max sets 的倍数
const POOL_SIZE_RATIOS: [(vk::DescriptorType, u32); 6] = [
    (vk::DescriptorType::SAMPLER, 2),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
    (vk::DescriptorType::SAMPLED_IMAGE, 4),
    (vk::DescriptorType::STORAGE_IMAGE, 2),
    (vk::DescriptorType::UNIFORM_BUFFER, 4),
    (vk::DescriptorType::STORAGE_BUFFER, 4),
];

/// 可增长的 descriptor pool 链
///
/// 当前 pool 分配失败时切换到下一个 pool（不存在则新建）；
/// reset 时一次性重置所有用过的 pool，set 的生命周期随之结束。
pub struct DescriptorPoolChain {
    pools: Vec<vk::DescriptorPool>,
    current: usize,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
    name: String,
}

// new & init
impl DescriptorPoolChain {
    pub fn new(max_sets: u32, flags: vk::DescriptorPoolCreateFlags, name: impl Into<String>) -> Self {
        Self {
            pools: Vec::new(),
            current: 0,
            max_sets,
            flags,
            name: name.into(),
        }
    }

    fn create_pool(&self, device: &GfxDevice) -> RhiResult<vk::DescriptorPool> {
        let pool_sizes = POOL_SIZE_RATIOS.map(|(ty, ratio)| {
            vk::DescriptorPoolSize::default().ty(ty).descriptor_count(self.max_sets * ratio)
        });
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(self.flags)
            .max_sets(self.max_sets)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .map_err(RhiError::creation("descriptor pool"))?;
        device.set_object_debug_name(pool, format!("{}-{}", self.name, self.pools.len()));
        Ok(pool)
    }
}

// destroy
impl DescriptorPoolChain {
    pub fn destroy(&mut self, device: &GfxDevice) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
        self.current = 0;
    }
}

// tools
impl DescriptorPoolChain {
    #[inline]
    pub fn allocate(&mut self, device: &GfxDevice, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.allocate_with_pool(device, layout).map(|(_, set)| set)
    }

    /// 同时返回 set 所在的 pool，单独释放 set 时需要
    pub fn allocate_with_pool(
        &mut self,
        device: &GfxDevice,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<(vk::DescriptorPool, vk::DescriptorSet)> {
        loop {
            let fresh_pool = self.current == self.pools.len();
            if fresh_pool {
                let pool = self.create_pool(device)?;
                self.pools.push(pool);
            }

            let set_ai = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.pools[self.current])
                .set_layouts(std::slice::from_ref(&layout));
            match unsafe { device.allocate_descriptor_sets(&set_ai) } {
                Ok(sets) => return Ok((self.pools[self.current], sets[0])),
                // 新建的 pool 也分配失败，说明 layout 本身超过了 pool 的容量
                Err(e) if fresh_pool => return Err(RhiError::creation("descriptor set")(e)),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    self.current += 1;
                }
                Err(e) => return Err(RhiError::creation("descriptor set")(e)),
            }
        }
    }

    /// 重置所有用过的 pool，之前分配的 set 全部失效
    pub fn reset(&mut self, device: &GfxDevice) -> RhiResult<()> {
        let used = (self.current + 1).min(self.pools.len());
        for &pool in &self.pools[..used] {
            unsafe { device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
                .map_err(RhiError::vulkan("vkResetDescriptorPool"))?;
        }
        self.current = 0;
        Ok(())
    }

    /// 单独释放一个 set，pool 需要带有 FREE_DESCRIPTOR_SET
    pub fn free(&mut self, device: &GfxDevice, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> RhiResult<()> {
        debug_assert!(self.flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET));
        unsafe { device.free_descriptor_sets(pool, std::slice::from_ref(&set)) }
            .map_err(RhiError::vulkan("vkFreeDescriptorSets"))?;
        // 释放之后前面的 pool 又有了空间
        if let Some(idx) = self.pools.iter().position(|p| *p == pool) {
            self.current = self.current.min(idx);
        }
        Ok(())
    }

    #[inline]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}
