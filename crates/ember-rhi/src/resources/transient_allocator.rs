use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::mem_allocator::GfxMemAllocator;

/// 一块 host 可见、持久映射的 buffer
pub struct TransientBlock<B> {
    buffer: vk::Buffer,
    mapped: NonNull<u8>,
    capacity: u64,
    backing: B,
}

// mapped 指针指向 block 独占的内存，block 本身可以跨线程移动
unsafe impl<B: Send> Send for TransientBlock<B> {}

impl<B> TransientBlock<B> {
    pub fn new(buffer: vk::Buffer, mapped: NonNull<u8>, capacity: u64, backing: B) -> Self {
        Self {
            buffer,
            mapped,
            capacity,
            backing,
        }
    }

    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
    #[inline]
    pub fn backing(&self) -> &B {
        &self.backing
    }
    #[inline]
    pub fn into_backing(self) -> B {
        self.backing
    }
}

/// transient block 的 native 来源
pub trait TransientMemory {
    type Backing;

    fn create_block(&mut self, capacity: u64) -> RhiResult<TransientBlock<Self::Backing>>;
    fn destroy_block(&mut self, block: TransientBlock<Self::Backing>);
    fn flush(&mut self, block: &TransientBlock<Self::Backing>, offset: u64, size: u64) -> RhiResult<()>;
}

/// 一次 transient 分配
///
/// 在所属 recorder 下一次 begin 之前有效
#[derive(Debug, Clone, Copy)]
pub struct TransientAllocation {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    mapped: *mut u8,
}

impl TransientAllocation {
    /// # Safety
    /// 只能在分配它的 recorder 下一次 begin 之前使用，并且不能和同一个分配的其它切片重叠使用
    #[inline]
    pub unsafe fn mapped_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped, self.size as usize) }
    }
}

/// 线性的 bump allocator，每个 recorder 一个
///
/// - 空间不足时按 2 倍扩容，旧的 block 保留到下一次 reset 再销毁（那时 GPU 已经读完）
/// - 扩容之后 cursor 从新 block 的起点开始
pub struct TransientAllocator<M: TransientMemory> {
    memory: M,
    current: TransientBlock<M::Backing>,
    cursor: u64,
    /// 本轮中被替换下来的 block，以及它们已经使用的字节数
    retired: Vec<(TransientBlock<M::Backing>, u64)>,
    grow_count: u32,
}

// new & init
impl<M: TransientMemory> TransientAllocator<M> {
    pub fn new(mut memory: M, initial_capacity: u64) -> RhiResult<Self> {
        let current = memory.create_block(initial_capacity.max(1))?;
        Ok(Self {
            memory,
            current,
            cursor: 0,
            retired: Vec::new(),
            grow_count: 0,
        })
    }
}

// destroy
impl<M: TransientMemory> TransientAllocator<M> {
    pub fn destroy(self) {
        let Self {
            mut memory,
            current,
            retired,
            ..
        } = self;
        for (block, _) in retired {
            memory.destroy_block(block);
        }
        memory.destroy_block(current);
    }
}

// getters
impl<M: TransientMemory> TransientAllocator<M> {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.current.capacity
    }
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
    #[inline]
    pub fn grow_count(&self) -> u32 {
        self.grow_count
    }
    #[inline]
    pub fn current_block(&self) -> &TransientBlock<M::Backing> {
        &self.current
    }
    #[inline]
    pub fn memory(&self) -> &M {
        &self.memory
    }
}

// tools
impl<M: TransientMemory> TransientAllocator<M> {
    /// `align` 必须是 2 的幂
    pub fn allocate(&mut self, size: u64, align: u64) -> RhiResult<TransientAllocation> {
        let align = align.max(1);
        debug_assert!(align.is_power_of_two(), "alignment {} is not a power of two", align);

        let (mut offset, mut end) = self
            .cursor
            .checked_next_multiple_of(align)
            .and_then(|offset| Some((offset, offset.checked_add(size)?)))
            .ok_or_else(|| RhiError::OutOfRange(format!("transient allocation of {size} bytes overflows")))?;
        if end > self.current.capacity {
            self.grow(size)?;
            (offset, end) = (0, size);
        }
        self.cursor = end;

        Ok(TransientAllocation {
            buffer: self.current.buffer,
            offset,
            size,
            mapped: unsafe { self.current.mapped.as_ptr().add(offset as usize) },
        })
    }

    /// 分配并写入数据
    pub fn upload(&mut self, data: &[u8], align: u64) -> RhiResult<TransientAllocation> {
        let allocation = self.allocate(data.len() as u64, align)?;
        unsafe { allocation.mapped_slice().copy_from_slice(data) };
        Ok(allocation)
    }

    fn grow(&mut self, size: u64) -> RhiResult<()> {
        let mut capacity = self.current.capacity.max(1).saturating_mul(2);
        while capacity < size {
            capacity = capacity.saturating_mul(2);
        }
        log::debug!("transient block grows: {} -> {} bytes", self.current.capacity, capacity);

        let block = self.memory.create_block(capacity)?;
        let old = std::mem::replace(&mut self.current, block);
        self.retired.push((old, self.cursor));
        self.cursor = 0;
        self.grow_count += 1;
        Ok(())
    }

    /// 调用方需要保证之前分配的内存已经不再被 GPU 读取
    pub fn reset(&mut self) {
        for (block, _) in self.retired.drain(..) {
            self.memory.destroy_block(block);
        }
        self.cursor = 0;
    }

    /// flush 单次分配
    pub fn flush_range(&mut self, allocation: &TransientAllocation) -> RhiResult<()> {
        if allocation.buffer == self.current.buffer {
            return self.memory.flush(&self.current, allocation.offset, allocation.size);
        }
        match self.retired.iter().find(|(block, _)| block.buffer == allocation.buffer) {
            Some((block, _)) => self.memory.flush(block, allocation.offset, allocation.size),
            None => {
                log::warn!("flush of a transient allocation from a previous frame ignored");
                Ok(())
            }
        }
    }

    /// flush 上一次 reset 之后写入的所有内容
    pub fn flush_all(&mut self) -> RhiResult<()> {
        for (block, used) in &self.retired {
            if *used > 0 {
                self.memory.flush(block, 0, *used)?;
            }
        }
        if self.cursor > 0 {
            self.memory.flush(&self.current, 0, self.cursor)?;
        }
        Ok(())
    }
}

/// 使用 vma 分配 transient block
pub struct VmaTransientMemory {
    allocator: Arc<GfxMemAllocator>,
    device: Arc<GfxDevice>,
    name: String,
}

impl VmaTransientMemory {
    /// transient 内存可以作为任意类型的 buffer 使用
    const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
        vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
            | vk::BufferUsageFlags::TRANSFER_DST.as_raw()
            | vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw()
            | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
            | vk::BufferUsageFlags::VERTEX_BUFFER.as_raw()
            | vk::BufferUsageFlags::INDEX_BUFFER.as_raw()
            | vk::BufferUsageFlags::INDIRECT_BUFFER.as_raw(),
    );

    pub fn new(allocator: Arc<GfxMemAllocator>, device: Arc<GfxDevice>, name: impl Into<String>) -> Self {
        Self {
            allocator,
            device,
            name: name.into(),
        }
    }
}

impl TransientMemory for VmaTransientMemory {
    type Backing = vk_mem::Allocation;

    fn create_block(&mut self, capacity: u64) -> RhiResult<TransientBlock<Self::Backing>> {
        let buffer_ci = vk::BufferCreateInfo::default().size(capacity).usage(Self::USAGE);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .map_err(RhiError::allocation("transient buffer"))?;

        let mapped = match unsafe { self.allocator.map_memory(&mut allocation) } {
            Ok(ptr) => NonNull::new(ptr),
            Err(e) => {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(RhiError::allocation("transient buffer mapping")(e));
            }
        };
        let Some(mapped) = mapped else {
            unsafe {
                self.allocator.unmap_memory(&mut allocation);
                self.allocator.destroy_buffer(buffer, &mut allocation);
            }
            return Err(RhiError::Allocation {
                what: "transient buffer mapping",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        };

        self.device.set_object_debug_name(buffer, format!("{}-{}", self.name, capacity));
        Ok(TransientBlock::new(buffer, mapped, capacity, allocation))
    }

    fn destroy_block(&mut self, block: TransientBlock<Self::Backing>) {
        let buffer = block.buffer();
        let mut allocation = block.into_backing();
        unsafe {
            self.allocator.unmap_memory(&mut allocation);
            self.allocator.destroy_buffer(buffer, &mut allocation);
        }
    }

    fn flush(&mut self, block: &TransientBlock<Self::Backing>, offset: u64, size: u64) -> RhiResult<()> {
        self.allocator
            .flush_allocation(block.backing(), offset, size)
            .map_err(RhiError::vulkan("vmaFlushAllocation"))
    }
}

#[cfg(test)]
pub(crate) mod test_memory {
    use super::*;
    use ash::vk::Handle;

    /// 使用普通内存模拟的 block
    #[derive(Default)]
    pub struct HostMemory {
        next_buffer: u64,
        pub created: Vec<u64>,
        pub destroyed: Vec<vk::Buffer>,
        pub flushes: Vec<(vk::Buffer, u64, u64)>,
    }

    impl TransientMemory for HostMemory {
        type Backing = Box<[u8]>;

        fn create_block(&mut self, capacity: u64) -> RhiResult<TransientBlock<Self::Backing>> {
            self.next_buffer += 1;
            self.created.push(capacity);
            let mut backing = vec![0u8; capacity as usize].into_boxed_slice();
            let mapped = NonNull::new(backing.as_mut_ptr()).ok_or(RhiError::ResourceCreation {
                what: "host block",
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            })?;
            Ok(TransientBlock::new(vk::Buffer::from_raw(self.next_buffer), mapped, capacity, backing))
        }

        fn destroy_block(&mut self, block: TransientBlock<Self::Backing>) {
            self.destroyed.push(block.buffer());
        }

        fn flush(&mut self, block: &TransientBlock<Self::Backing>, offset: u64, size: u64) -> RhiResult<()> {
            assert!(offset + size <= block.capacity());
            self.flushes.push((block.buffer(), offset, size));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_memory::HostMemory;
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_alignment() {
        let mut transient = TransientAllocator::new(HostMemory::default(), 1024).unwrap();
        let a = transient.allocate(3, 1).unwrap();
        let b = transient.allocate(16, 256).unwrap();
        let c = transient.allocate(4, 4).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(c.offset, 272);
        assert_eq!(transient.cursor(), 276);
    }

    #[test]
    fn test_grow_once_then_reset_to_zero() {
        let mut transient = TransientAllocator::new(HostMemory::default(), MIB).unwrap();
        transient.allocate(16, 16).unwrap();

        let big = transient.allocate(2 * MIB, 256).unwrap();
        assert_eq!(transient.grow_count(), 1);
        assert_eq!(big.offset, 0);
        assert_eq!(transient.capacity(), 2 * MIB);

        transient.reset();
        // 旧 block 在 reset 时销毁
        assert_eq!(transient.memory().destroyed.len(), 1);

        let next = transient.allocate(64, 64).unwrap();
        assert_eq!(next.offset, 0);
        assert_eq!(next.buffer, big.buffer);
        assert_eq!(transient.grow_count(), 1);
    }

    #[test]
    fn test_grow_doubles_until_fit() {
        let mut transient = TransientAllocator::new(HostMemory::default(), 1024).unwrap();
        transient.allocate(5000, 1).unwrap();
        assert_eq!(transient.capacity(), 8192);
        assert_eq!(transient.grow_count(), 1);
        assert_eq!(transient.memory().created, vec![1024, 8192]);
    }

    #[test]
    fn test_overflowing_request_is_rejected() {
        let mut transient = TransientAllocator::new(HostMemory::default(), 1024).unwrap();
        transient.allocate(16, 16).unwrap();

        let err = transient.allocate(u64::MAX - 8, 16).unwrap_err();
        assert!(matches!(err, RhiError::OutOfRange(_)));
        assert_eq!(transient.grow_count(), 0);
        assert_eq!(transient.cursor(), 16);

        // 失败的请求不影响之后的分配
        assert_eq!(transient.allocate(4, 4).unwrap().offset, 16);
    }

    #[test]
    fn test_upload_roundtrip() {
        let mut transient = TransientAllocator::new(HostMemory::default(), 4096).unwrap();
        transient.allocate(10, 1).unwrap();

        let data: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
        let allocation = transient.upload(&data, 64).unwrap();
        transient.flush_range(&allocation).unwrap();

        let offset = allocation.offset as usize;
        assert_eq!(&transient.current_block().backing()[offset..offset + data.len()], data.as_slice());
        assert_eq!(transient.memory().flushes, vec![(allocation.buffer, 64, 200)]);
    }

    #[test]
    fn test_flush_all_covers_retired_blocks() {
        let mut transient = TransientAllocator::new(HostMemory::default(), 128).unwrap();
        let first = transient.allocate(100, 4).unwrap();
        let second = transient.allocate(100, 4).unwrap();
        assert_ne!(first.buffer, second.buffer);

        transient.flush_all().unwrap();
        assert_eq!(transient.memory().flushes, vec![(first.buffer, 0, 100), (second.buffer, 0, 100)]);

        transient.reset();
        transient.flush_all().unwrap();
        assert_eq!(transient.memory().flushes.len(), 2);
    }
}
