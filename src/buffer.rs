//! Fixed-capacity associative buffer.
//!
//! The buffer is a hash-keyed map with a hard `max_entries` limit. Every
//! operation is individually atomic, but the buffer provides no exclusion
//! between `clear` and a writer that picked this buffer from a stale selector
//! reading. Deferring `clear` past a grace period is the caller's job.
//!
//! 固定容量的关联缓冲区。每个操作单独是原子的，但缓冲区不提供 `clear`
//! 与持有过期选择器的写入者之间的互斥。将 `clear` 推迟到宽限期之后是调用者的责任。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering as StdOrdering};

use crate::error::BufferError;
use crate::sync::Mutex;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Distinct owning identity of a buffer.
/// 缓冲区唯一的所有权标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, StdOrdering::Relaxed))
    }

    /// Raw numeric id.
    /// 原始数字标识。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Backing store layout.
/// 底层存储布局。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferKind {
    /// Hash-keyed map.
    /// 哈希键映射。
    #[default]
    Hash,
}

/// Creation flags. These only affect the memory strategy.
/// 创建标志，只影响内存策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags {
    /// Do not reserve `max_entries` slots up front.
    /// 不预先保留 `max_entries` 个槽位。
    pub no_prealloc: bool,
}

/// Parameters for [`AssocBuffer::create`].
/// [`AssocBuffer::create`] 的参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    /// Store layout.
    /// 存储布局。
    pub kind: BufferKind,
    /// Hard entry limit.
    /// 条目数硬上限。
    pub max_entries: usize,
    /// Memory strategy hints.
    /// 内存策略提示。
    pub flags: BufferFlags,
}

impl BufferSpec {
    /// Hash buffer with `max_entries` slots, preallocated.
    /// 带 `max_entries` 个预分配槽位的哈希缓冲区。
    pub fn hash(max_entries: usize) -> Self {
        Self {
            kind: BufferKind::Hash,
            max_entries,
            flags: BufferFlags::default(),
        }
    }

    /// Skip preallocation.
    /// 跳过预分配。
    pub fn no_prealloc(mut self) -> Self {
        self.flags.no_prealloc = true;
        self
    }
}

/// How [`AssocBuffer::write`] treats existing keys.
/// [`AssocBuffer::write`] 如何对待已存在的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert or overwrite.
    /// 插入或覆盖。
    Upsert,
    /// Fail with `AlreadyExists` if the key is present.
    /// 键已存在时以 `AlreadyExists` 失败。
    InsertOnly,
    /// Fail with `NotFound` if the key is absent.
    /// 键不存在时以 `NotFound` 失败。
    UpdateOnly,
}

/// A fixed-capacity key/value buffer.
///
/// # Example
/// ```
/// use epoch_swap::{AssocBuffer, BufferSpec, WriteMode};
///
/// let buf: AssocBuffer<u32, u32> = AssocBuffer::create(BufferSpec::hash(10)).unwrap();
/// buf.write(1, 100, WriteMode::InsertOnly).unwrap();
/// assert_eq!(buf.read(&1).unwrap(), 100);
/// ```
///
/// 固定容量的键值缓冲区。
pub struct AssocBuffer<K, V> {
    id: BufferId,
    spec: BufferSpec,
    // `None` once destroyed.
    inner: Mutex<Option<HashMap<K, V>>>,
}

impl<K, V> AssocBuffer<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    /// Create a buffer.
    /// 创建一个缓冲区。
    pub fn create(spec: BufferSpec) -> Result<Self, BufferError> {
        if spec.max_entries == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        let mut map = HashMap::new();
        if !spec.flags.no_prealloc {
            map.try_reserve(spec.max_entries)
                .map_err(|_| BufferError::AllocationFailed {
                    max_entries: spec.max_entries,
                })?;
        }

        Ok(Self {
            id: BufferId::next(),
            spec,
            inner: Mutex::new(Some(map)),
        })
    }

    /// Identity of this buffer.
    /// 此缓冲区的标识。
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Creation parameters.
    /// 创建参数。
    #[inline]
    pub fn spec(&self) -> &BufferSpec {
        &self.spec
    }

    /// Declared `max_entries`.
    /// 声明的 `max_entries`。
    #[inline]
    pub fn capacity(&self) -> usize {
        self.spec.max_entries
    }

    /// Size of one key in bytes.
    /// 单个键的字节大小。
    #[inline]
    pub fn key_size(&self) -> usize {
        size_of::<K>()
    }

    /// Size of one value in bytes.
    /// 单个值的字节大小。
    #[inline]
    pub fn value_size(&self) -> usize {
        size_of::<V>()
    }

    fn with_map<R>(
        &self,
        op: impl FnOnce(&mut HashMap<K, V>) -> Result<R, BufferError>,
    ) -> Result<R, BufferError> {
        let mut guard = self.inner.lock();
        match guard.as_mut() {
            Some(map) => op(map),
            None => Err(BufferError::Destroyed(self.id)),
        }
    }

    /// Write `value` under `key` according to `mode`.
    /// 按 `mode` 将 `value` 写入 `key`。
    pub fn write(&self, key: K, value: V, mode: WriteMode) -> Result<(), BufferError> {
        let capacity = self.spec.max_entries;
        self.with_map(|map| {
            let len = map.len();
            match (map.entry(key), mode) {
                (Entry::Occupied(_), WriteMode::InsertOnly) => Err(BufferError::AlreadyExists),
                (Entry::Occupied(mut slot), _) => {
                    slot.insert(value);
                    Ok(())
                }
                (Entry::Vacant(_), WriteMode::UpdateOnly) => Err(BufferError::NotFound),
                (Entry::Vacant(_), _) if len >= capacity => Err(BufferError::Full { capacity }),
                (Entry::Vacant(slot), _) => {
                    slot.insert(value);
                    Ok(())
                }
            }
        })
    }

    /// Atomic read-modify-write. A missing key is inserted as `init()` first,
    /// subject to capacity, then `f` is applied.
    ///
    /// 原子的读-改-写。缺失的键先以 `init()` 插入（受容量限制），然后应用 `f`。
    pub fn update_with(
        &self,
        key: K,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V),
    ) -> Result<(), BufferError> {
        let capacity = self.spec.max_entries;
        self.with_map(|map| {
            let len = map.len();
            match map.entry(key) {
                Entry::Occupied(mut slot) => {
                    f(slot.get_mut());
                    Ok(())
                }
                Entry::Vacant(_) if len >= capacity => Err(BufferError::Full { capacity }),
                Entry::Vacant(slot) => {
                    let mut value = init();
                    f(&mut value);
                    slot.insert(value);
                    Ok(())
                }
            }
        })
    }

    /// Read the value stored under `key`.
    /// 读取 `key` 下存储的值。
    pub fn read(&self, key: &K) -> Result<V, BufferError> {
        self.with_map(|map| map.get(key).cloned().ok_or(BufferError::NotFound))
    }

    /// Remove `key`, returning its value.
    /// 删除 `key` 并返回其值。
    pub fn remove(&self, key: &K) -> Result<V, BufferError> {
        self.with_map(|map| map.remove(key).ok_or(BufferError::NotFound))
    }

    /// Number of entries.
    /// 条目数量。
    pub fn len(&self) -> Result<usize, BufferError> {
        self.with_map(|map| Ok(map.len()))
    }

    /// First key in enumeration order, if any.
    /// 枚举顺序中的第一个键（如果有）。
    pub fn first_key(&self) -> Result<Option<K>, BufferError> {
        self.with_map(|map| Ok(map.keys().next().copied()))
    }

    /// Enumerate all keys.
    /// 枚举所有键。
    pub fn keys(&self) -> Result<Vec<K>, BufferError> {
        self.with_map(|map| Ok(map.keys().copied().collect()))
    }

    /// Copy out every entry.
    /// 复制出所有条目。
    pub fn snapshot(&self) -> Result<Vec<(K, V)>, BufferError> {
        self.with_map(|map| Ok(map.iter().map(|(k, v)| (*k, v.clone())).collect()))
    }

    /// Whether enumeration yields no entries.
    ///
    /// An enumeration failure is returned as an error, never as `false` or
    /// `true`.
    ///
    /// 枚举是否没有产生任何条目。枚举失败作为错误返回。
    pub fn is_empty(&self) -> Result<bool, BufferError> {
        Ok(self.first_key()?.is_none())
    }

    /// Remove every entry and return how many were removed.
    ///
    /// Clearing an empty buffer succeeds and removes nothing.
    ///
    /// 删除所有条目并返回删除的数量。对空缓冲区清空会成功且不删除任何东西。
    pub fn clear(&self) -> Result<usize, BufferError> {
        self.with_map(|map| {
            let removed = map.len();
            map.clear();
            Ok(removed)
        })
    }

    /// Tear the buffer down. Later operations fail with `Destroyed`.
    /// 销毁缓冲区。之后的操作以 `Destroyed` 失败。
    pub fn destroy(&self) {
        let mut guard = self.inner.lock();
        if guard.take().is_some() {
            tracing::debug!(buffer = %self.id, "buffer destroyed");
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    /// 是否已调用 [`destroy`](Self::destroy)。
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl<K, V> fmt::Debug for AssocBuffer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssocBuffer")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
