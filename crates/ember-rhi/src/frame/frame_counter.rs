/// 帧计数器
///
/// frame id 一直累加，frame slot = frame id % frames in flight
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub fn new(fif_count: usize) -> Self {
        debug_assert!(fif_count > 0);
        Self { frame_id: 0, fif_count }
    }
}
// update
impl FrameCounter {
    /// 进入下一帧，返回新的 frame slot
    #[inline]
    pub fn next_frame(&mut self) -> usize {
        self.frame_id = self.frame_id.wrapping_add(1);
        self.frame_slot()
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    #[inline]
    pub fn frame_slot(&self) -> usize {
        (self.frame_id % self.fif_count as u64) as usize
    }
    /// `next_frame` 将要进入的 slot，不改变计数
    #[inline]
    pub fn next_slot(&self) -> usize {
        (self.frame_id.wrapping_add(1) % self.fif_count as u64) as usize
    }
    /// frame slot 对应的字母：A, B, C...
    #[inline]
    pub fn frame_label(&self) -> char {
        (b'A' + (self.frame_slot() % 26) as u8) as char
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_wraps() {
        let mut counter = FrameCounter::new(3);
        assert_eq!(counter.frame_slot(), 0);
        assert_eq!(counter.next_frame(), 1);
        assert_eq!(counter.next_frame(), 2);
        assert_eq!(counter.next_frame(), 0);
        assert_eq!(counter.frame_id(), 3);
        assert_eq!(counter.frame_name(), "[F3A]");
    }

    #[test]
    fn test_next_slot_does_not_advance() {
        let mut counter = FrameCounter::new(2);
        assert_eq!(counter.next_slot(), 1);
        assert_eq!(counter.next_slot(), 1);
        assert_eq!(counter.frame_id(), 0);
        assert_eq!(counter.next_frame(), 1);
        assert_eq!(counter.next_slot(), 0);
    }
}
