use std::collections::HashSet;
use std::hash::Hash;

/// 按 frame slot 分组的延迟销毁队列
///
/// 在第 K 帧销毁的资源进入 `graveyards[K % F]`，直到该 slot 下一次被复用时
/// （此时 GPU 已经完成了第 K 帧的工作）才真正回收。
///
/// `T` 通常是 Device 的 `RetiredResource`，回收动作由调用方通过闭包提供。
/// 同一个 item 在回收之前只会出现在一个 graveyard 中。
pub struct FrameLifecycleManager<T> {
    graveyards: Vec<Vec<T>>,
    /// 所有 graveyard 中尚未回收的 item
    pending: HashSet<T>,
    active: usize,
}

// new & init
impl<T> FrameLifecycleManager<T> {
    pub fn new(fif_count: usize) -> Self {
        assert!(fif_count > 0, "frames in flight must be at least 1");
        Self {
            graveyards: (0..fif_count).map(|_| Vec::new()).collect(),
            pending: HashSet::new(),
            active: 0,
        }
    }
}

// getters
impl<T> FrameLifecycleManager<T> {
    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.graveyards.len()
    }

    /// 所有 graveyard 中尚未回收的数量
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.graveyards.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn pending_in(&self, index: usize) -> usize {
        self.graveyards[index].len()
    }
}

// tools
impl<T: Eq + Hash + Clone> FrameLifecycleManager<T> {
    #[inline]
    pub fn is_pending(&self, item: &T) -> bool {
        self.pending.contains(item)
    }

    /// 放入当前帧的 graveyard；item 已经在某个 graveyard 中时不做任何事，返回 false
    pub fn retire(&mut self, item: T) -> bool {
        if !self.pending.insert(item.clone()) {
            return false;
        }
        self.graveyards[self.active].push(item);
        true
    }

    /// 切换到 `new_index`，并回收该 slot 上一轮积累的资源
    ///
    /// 调用方必须保证 `new_index` 对应的 GPU 工作已经完成（fence 已等待）
    pub fn finalize_frame(&mut self, new_index: usize, mut reclaim: impl FnMut(T)) {
        debug_assert!(new_index < self.graveyards.len());
        self.active = new_index;

        // 先取出来，reclaim 的过程中不会再往这个 slot 里放东西
        let items = std::mem::take(&mut self.graveyards[new_index]);
        for item in items {
            self.pending.remove(&item);
            reclaim(item);
        }
    }

    /// 前进到下一个 slot，返回新的 slot
    pub fn advance(&mut self, reclaim: impl FnMut(T)) -> usize {
        let next = (self.active + 1) % self.graveyards.len();
        self.finalize_frame(next, reclaim);
        next
    }

    /// 关闭时使用：调用方已经 wait idle，所有 graveyard 无条件回收
    pub fn finalize_all(&mut self, mut reclaim: impl FnMut(T)) {
        for graveyard in &mut self.graveyards {
            for item in graveyard.drain(..) {
                reclaim(item);
            }
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::BufferHandle;
    use crate::resources::handle_table::HandleTable;

    /// 模拟 Device：destroy 只放入 graveyard，handle 在回收时才失效
    struct FakeDevice {
        table: HandleTable<BufferHandle, &'static str>,
        lifecycle: FrameLifecycleManager<BufferHandle>,
        reclaimed: Vec<&'static str>,
    }
    impl FakeDevice {
        fn new(fif: usize) -> Self {
            Self {
                table: HandleTable::new(),
                lifecycle: FrameLifecycleManager::new(fif),
                reclaimed: Vec::new(),
            }
        }
        fn destroy(&mut self, h: BufferHandle) {
            self.lifecycle.retire(h);
        }
        fn advance(&mut self) {
            let table = &mut self.table;
            let reclaimed = &mut self.reclaimed;
            self.lifecycle.advance(|h| {
                if let Some(name) = table.erase(h) {
                    reclaimed.push(name);
                }
            });
        }
    }

    #[test]
    fn test_destroy_survives_until_slot_reused() {
        let mut device = FakeDevice::new(3);
        let buffer = device.table.emplace("buffer");
        assert_eq!(device.lifecycle.active_index(), 0);

        device.destroy(buffer);
        assert!(device.table.get(buffer).is_some());

        device.advance();
        device.advance();
        assert!(device.table.get(buffer).is_some(), "still valid after F-1 advances");

        device.advance();
        assert!(device.table.get(buffer).is_none(), "reclaimed after F advances");
        assert_eq!(device.reclaimed, vec!["buffer"]);
    }

    #[test]
    fn test_each_slot_reclaims_only_its_own() {
        let mut device = FakeDevice::new(2);
        let a = device.table.emplace("a");
        let b = device.table.emplace("b");

        device.destroy(a); // slot 0
        device.advance(); // -> slot 1
        device.destroy(b); // slot 1

        device.advance(); // -> slot 0, 回收 a
        assert!(device.table.get(a).is_none());
        assert!(device.table.get(b).is_some());

        device.advance(); // -> slot 1, 回收 b
        assert!(device.table.get(b).is_none());
        assert_eq!(device.lifecycle.pending_count(), 0);
    }

    #[test]
    fn test_finalize_all_drains_everything() {
        let mut lifecycle = FrameLifecycleManager::new(3);
        lifecycle.retire(1);
        lifecycle.advance(|_: i32| {});
        lifecycle.retire(2);
        lifecycle.retire(3);
        assert_eq!(lifecycle.pending_count(), 3);

        let mut reclaimed = Vec::new();
        lifecycle.finalize_all(|x| reclaimed.push(x));
        reclaimed.sort();
        assert_eq!(reclaimed, vec![1, 2, 3]);
        assert_eq!(lifecycle.pending_count(), 0);
    }

    #[test]
    fn test_repeated_retire_stays_in_one_slot() {
        let mut lifecycle = FrameLifecycleManager::new(3);
        assert!(lifecycle.retire(7));
        assert!(!lifecycle.retire(7));
        lifecycle.advance(|_: i32| {});
        assert!(!lifecycle.retire(7));
        assert_eq!(lifecycle.pending_count(), 1);
        assert_eq!(lifecycle.pending_in(0), 1);
        assert!(lifecycle.is_pending(&7));

        let mut reclaimed = Vec::new();
        lifecycle.advance(|x| reclaimed.push(x));
        lifecycle.advance(|x| reclaimed.push(x));
        assert_eq!(reclaimed, vec![7]);
        assert!(!lifecycle.is_pending(&7));

        // 回收之后同一个值可以再次进入 graveyard
        assert!(lifecycle.retire(7));
    }

    #[test]
    fn test_single_frame_in_flight() {
        let mut lifecycle = FrameLifecycleManager::new(1);
        lifecycle.retire("x");
        let mut reclaimed = 0;
        assert_eq!(lifecycle.advance(|_| reclaimed += 1), 0);
        assert_eq!(reclaimed, 1);
    }
}
