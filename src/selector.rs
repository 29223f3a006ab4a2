use crate::error::SelectorError;
use crate::sync::{Arc, AtomicBool, AtomicU32, Ordering};

/// Key of the single row the selector holds.
/// 选择器所持有的唯一一行的键。
pub const ACTIVE_SELECTOR_KEY: u32 = 1;

#[derive(Debug)]
struct SelectorCell {
    index: AtomicU32,
    destroyed: AtomicBool,
}

/// Shared register naming which of the two buffers is active.
///
/// The coordinator is the only caller of [`set`](Self::set); writer contexts
/// read it with [`get`](Self::get) before every write. Reads are not ordered
/// against `set`: a writer may keep acting on the previous index until the
/// next grace period completes. That window is exactly what the quiescence
/// barrier closes.
///
/// 命名两个缓冲区中哪个处于活跃状态的共享寄存器。读取与 `set` 之间没有顺序保证，
/// 写入者可能在下一个宽限期完成之前仍按旧索引行事。
#[derive(Debug, Clone)]
pub struct ActiveSelector {
    cell: Arc<SelectorCell>,
}

impl ActiveSelector {
    /// Create a selector pointing at `initial`.
    /// 创建指向 `initial` 的选择器。
    pub fn new(initial: u32) -> Result<Self, SelectorError> {
        check_index(initial)?;
        Ok(Self {
            cell: Arc::new(SelectorCell {
                index: AtomicU32::new(initial),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Overwrite the active index.
    /// 覆盖活跃索引。
    pub fn set(&self, index: u32) -> Result<(), SelectorError> {
        check_index(index)?;
        if self.cell.destroyed.load(Ordering::Acquire) {
            return Err(SelectorError::Destroyed);
        }
        self.cell.index.store(index, Ordering::Release);
        Ok(())
    }

    /// Best-effort read of the active index. May be stale.
    /// 尽力而为地读取活跃索引，可能是过期的。
    #[inline]
    pub fn get(&self) -> Result<u32, SelectorError> {
        if self.cell.destroyed.load(Ordering::Relaxed) {
            return Err(SelectorError::Destroyed);
        }
        Ok(self.cell.index.load(Ordering::Relaxed))
    }

    /// Tear the selector down for every handle.
    /// 对所有句柄销毁选择器。
    pub fn destroy(&self) {
        self.cell.destroyed.store(true, Ordering::Release);
    }
}

fn check_index(index: u32) -> Result<(), SelectorError> {
    if index > 1 {
        Err(SelectorError::InvalidIndex(index))
    } else {
        Ok(())
    }
}
