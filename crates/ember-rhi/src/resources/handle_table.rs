use slotmap::SlotMap;

use crate::error::{RhiError, RhiResult};
use crate::handles::{ResourceHandle, ResourceKind};

/// 某一类资源的 generational 表
///
/// - 单写多读：写操作需要 `&mut self`，由 Device 的创建/销毁路径独占；
///   录制命令时只会通过 `&self` 读取
/// - erase 之后 slot 的 generation 递增，旧句柄永远不会重新变为有效
pub struct HandleTable<K: ResourceHandle, R> {
    slots: SlotMap<K, R>,
}

impl<K: ResourceHandle, R> Default for HandleTable<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<K: ResourceHandle, R> HandleTable<K, R> {
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }
}

// 读写
impl<K: ResourceHandle, R> HandleTable<K, R> {
    /// 放入一条记录，返回指向它的新句柄
    #[inline]
    pub fn emplace(&mut self, record: R) -> K {
        self.slots.insert(record)
    }

    /// 句柄失效时返回 None
    #[inline]
    pub fn get(&self, handle: K) -> Option<&R> {
        self.slots.get(handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: K) -> Option<&mut R> {
        self.slots.get_mut(handle)
    }

    /// 和 `get` 相同，但句柄失效时返回 `InvalidHandle` 错误
    #[inline]
    pub fn try_get(&self, handle: K) -> RhiResult<&R> {
        self.slots.get(handle).ok_or(RhiError::InvalidHandle { kind: K::KIND })
    }

    /// 移除记录并返回，slot 的 generation 随之递增
    #[inline]
    pub fn erase(&mut self, handle: K) -> Option<R> {
        self.slots.remove(handle)
    }

    #[inline]
    pub fn contains(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    /// 关闭设备时用来清空所有残留的记录
    #[inline]
    pub fn drain(&mut self) -> impl Iterator<Item = (K, R)> + '_ {
        self.slots.drain()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (K, &R)> {
        self.slots.iter()
    }
}

// getters
impl<K: ResourceHandle, R> HandleTable<K, R> {
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        K::KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{BufferHandle, TextureHandle};

    #[test]
    fn test_emplace_get_erase() {
        let mut table: HandleTable<BufferHandle, u32> = HandleTable::new();
        let a = table.emplace(1);
        let b = table.emplace(2);

        assert_eq!(table.get(a), Some(&1));
        assert_eq!(table.get(b), Some(&2));
        assert_eq!(table.len(), 2);

        assert_eq!(table.erase(a), Some(1));
        assert_eq!(table.get(a), None);
        assert_eq!(table.erase(a), None);
        assert_eq!(table.get(b), Some(&2));
    }

    #[test]
    fn test_stale_handle_never_revalidates() {
        let mut table: HandleTable<TextureHandle, &'static str> = HandleTable::new();
        let old = table.emplace("old");
        table.erase(old);

        // 新记录会复用同一个 slot，但 generation 不同
        let new = table.emplace("new");
        assert_ne!(old, new);
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&"new"));

        for _ in 0..64 {
            let h = table.emplace("churn");
            table.erase(h);
        }
        assert_eq!(table.get(old), None);
    }

    #[test]
    fn test_try_get_reports_kind() {
        let mut table: HandleTable<TextureHandle, u8> = HandleTable::new();
        let h = table.emplace(7);
        table.erase(h);
        match table.try_get(h) {
            Err(RhiError::InvalidHandle { kind }) => assert_eq!(kind, ResourceKind::Texture),
            _ => panic!("expected InvalidHandle"),
        }
    }

    #[test]
    fn test_null_handle_is_invalid() {
        let table: HandleTable<BufferHandle, u8> = HandleTable::new();
        assert_eq!(table.get(BufferHandle::default()), None);
    }
}
