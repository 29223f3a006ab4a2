/// 边界情况测试模块
/// 测试容量上限、销毁后的句柄、死上下文清理和配置错误
use crate::{
    ActiveSelector, AssocBuffer, BufferError, BufferSpec, Error, QuiescenceDomain,
    SelectorError, StatsMaps, SwapCoordinator, SyncMode, WriteMode,
};

/// 测试1: 零容量的缓冲区无法创建
#[test]
fn test_zero_capacity_rejected() {
    let result: Result<AssocBuffer<u32, u32>, _> = AssocBuffer::create(BufferSpec::hash(0));
    assert_eq!(result.unwrap_err(), BufferError::ZeroCapacity);

    let maps: Result<StatsMaps<u32, u32>, _> = StatsMaps::create(BufferSpec::hash(0));
    let err = maps.unwrap_err();
    assert!(matches!(err, Error::BufferSetup(BufferError::ZeroCapacity)));
    assert!(err.is_setup());
}

/// 测试2: 写满之后插入新键失败，已有条目不会被驱逐
#[test]
fn test_full_buffer_rejects_new_keys() {
    let buf: AssocBuffer<u32, u32> = AssocBuffer::create(BufferSpec::hash(3)).unwrap();
    for key in 0..3 {
        buf.write(key, key, WriteMode::Upsert).unwrap();
    }

    assert_eq!(
        buf.write(99, 0, WriteMode::Upsert),
        Err(BufferError::Full { capacity: 3 })
    );
    assert_eq!(
        buf.update_with(99, || 0, |v| *v += 1),
        Err(BufferError::Full { capacity: 3 })
    );

    // 已有的键仍然可以更新
    buf.write(1, 10, WriteMode::Upsert).unwrap();
    buf.update_with(2, || 0, |v| *v += 5).unwrap();

    let mut keys = buf.keys().unwrap();
    keys.sort_unstable();
    assert_eq!(keys, vec![0, 1, 2]);
    assert_eq!(buf.read(&1).unwrap(), 10);
    assert_eq!(buf.read(&2).unwrap(), 7);
}

/// 测试3: 删除一个键之后可以再插入
#[test]
fn test_remove_frees_capacity() {
    let buf: AssocBuffer<u32, u32> = AssocBuffer::create(BufferSpec::hash(1)).unwrap();
    buf.write(1, 1, WriteMode::InsertOnly).unwrap();
    assert!(buf.write(2, 2, WriteMode::InsertOnly).is_err());

    assert_eq!(buf.remove(&1).unwrap(), 1);
    assert_eq!(buf.remove(&1), Err(BufferError::NotFound));
    buf.write(2, 2, WriteMode::InsertOnly).unwrap();
    assert_eq!(buf.first_key().unwrap(), Some(2));
}

/// 测试4: no_prealloc 只影响内存策略，不影响容量
#[test]
fn test_no_prealloc_keeps_capacity() {
    let spec = BufferSpec::hash(2).no_prealloc();
    assert!(spec.flags.no_prealloc);

    let buf: AssocBuffer<u64, u64> = AssocBuffer::create(spec).unwrap();
    assert_eq!(buf.capacity(), 2);
    buf.write(1, 1, WriteMode::Upsert).unwrap();
    buf.write(2, 2, WriteMode::Upsert).unwrap();
    assert_eq!(
        buf.write(3, 3, WriteMode::Upsert),
        Err(BufferError::Full { capacity: 2 })
    );
}

/// 测试5: 销毁后的缓冲区所有操作都失败，is_empty 也返回错误而不是布尔值
#[test]
fn test_destroyed_buffer_errors() {
    let buf: AssocBuffer<u32, u32> = AssocBuffer::create(BufferSpec::hash(4)).unwrap();
    buf.write(1, 1, WriteMode::Upsert).unwrap();
    let id = buf.id();

    buf.destroy();
    assert!(buf.is_destroyed());
    // 重复销毁是无害的
    buf.destroy();

    let destroyed = BufferError::Destroyed(id);
    assert_eq!(buf.read(&1), Err(destroyed.clone()));
    assert_eq!(buf.write(2, 2, WriteMode::Upsert), Err(destroyed.clone()));
    assert_eq!(buf.is_empty(), Err(destroyed.clone()));
    assert_eq!(buf.clear(), Err(destroyed.clone()));
    assert_eq!(buf.len(), Err(destroyed));
}

/// 测试6: 销毁后的选择器对所有句柄失效
#[test]
fn test_destroyed_selector_errors() {
    let selector = ActiveSelector::new(0).unwrap();
    let other = selector.clone();
    selector.destroy();

    assert_eq!(other.get(), Err(SelectorError::Destroyed));
    assert_eq!(other.set(1), Err(SelectorError::Destroyed));
    // 无效索引优先于销毁检查
    assert_eq!(other.set(7), Err(SelectorError::InvalidIndex(7)));
}

/// 测试7: 协调者检查空闲缓冲区时，枚举错误被传播而不是当作空
#[test]
fn test_check_vacant_propagates_enumeration_error() {
    let maps: StatsMaps<u32, u32> = StatsMaps::create(BufferSpec::hash(4)).unwrap();
    let coordinator = SwapCoordinator::new(maps.clone(), None).unwrap();

    maps.buffer(1).destroy();
    let err = coordinator.check_vacant().unwrap_err();
    assert!(matches!(err, Error::Buffer(BufferError::Destroyed(_))));
    assert!(err.is_protocol());
}

/// 测试8: 协议错误终止运行循环
#[test]
fn test_run_aborts_on_protocol_error() {
    let maps: StatsMaps<u32, u32> = StatsMaps::create(BufferSpec::hash(4)).unwrap();
    let mut coordinator = SwapCoordinator::new(maps.clone(), None).unwrap();

    maps.selector().destroy();
    let err = coordinator
        .run(SyncMode::Unsynchronized, std::time::Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, Error::Selector(SelectorError::Destroyed)));
    assert!(err.is_protocol());
}

/// 测试9: 没有屏障时请求同步模式是初始化错误
#[test]
fn test_synchronized_mode_requires_barrier() {
    let maps: StatsMaps<u32, u32> = StatsMaps::create(BufferSpec::hash(4)).unwrap();
    let mut coordinator = SwapCoordinator::new(maps.clone(), None).unwrap();

    let err = coordinator.swap_and_clear(SyncMode::Synchronized).unwrap_err();
    assert!(matches!(err, Error::MissingBarrier));
    assert!(err.is_setup());

    // 选择器没有被翻转
    assert_eq!(maps.selector().get().unwrap(), 0);
    assert_eq!(coordinator.active_index(), 0);

    let err = coordinator
        .run(SyncMode::Synchronized, std::time::Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(err, Error::MissingBarrier));
}

/// 测试10: 被 drop 的上下文在清理间隔到达时被移除
#[test]
fn test_dead_context_slots_pruned() {
    let (mut barrier, domain) = QuiescenceDomain::builder().cleanup_interval(2).build();

    let keep = domain.register_context();
    {
        let _a = domain.register_context();
        let _b = domain.register_context();
    }
    assert_eq!(domain.registered_contexts(), 3);

    // 第一次同步不到清理间隔
    barrier.synchronize().unwrap();
    assert_eq!(domain.registered_contexts(), 3);

    barrier.synchronize().unwrap();
    assert_eq!(domain.registered_contexts(), 1);

    let _section = keep.enter();
    assert_eq!(domain.registered_contexts(), 1);
}

/// 测试11: 清理间隔为 0 时从不清理
#[test]
fn test_cleanup_disabled() {
    let (mut barrier, domain) = QuiescenceDomain::builder().cleanup_interval(0).build();
    drop(domain.register_context());

    for _ in 0..32 {
        barrier.synchronize().unwrap();
    }
    assert_eq!(domain.registered_contexts(), 1);
}

/// 测试12: 可重入临界区在最外层守卫 drop 后才离开
#[test]
fn test_reentrant_sections() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let ctx = domain.register_context();

    let outer = ctx.enter();
    {
        let inner = ctx.enter();
        let cloned = inner.clone();
        assert_eq!(cloned.epoch(), outer.epoch());
        drop(inner);
        assert!(ctx.is_in_flight());
    }
    assert!(ctx.is_in_flight());
    drop(outer);
    assert!(!ctx.is_in_flight());
}

/// 测试13: 已 drop 的上下文在同步时被清理
#[test]
fn test_dropped_context_pruned_on_synchronize() {
    let (mut barrier, domain) = QuiescenceDomain::builder()
        .cleanup_interval(1)
        .max_wait(std::time::Duration::from_secs(5))
        .build();

    let ctx = domain.register_context();
    drop(ctx.enter());
    drop(ctx);

    barrier.synchronize().unwrap();
    assert_eq!(domain.registered_contexts(), 0);
}

/// 测试14: 错误信息带有类别前缀
#[test]
fn test_error_display_categories() {
    let setup = Error::MissingBarrier.to_string();
    assert!(setup.starts_with("setup:"), "{setup}");

    let protocol = Error::from(SelectorError::Destroyed).to_string();
    assert!(protocol.starts_with("protocol:"), "{protocol}");

    let full = BufferError::Full { capacity: 8 }.to_string();
    assert_eq!(full, "buffer full: capacity 8");
}

/// 测试15: 初始化阶段的选择器错误归类为初始化错误
#[test]
fn test_selector_error_during_setup_is_setup() {
    let maps: StatsMaps<u32, u32> = StatsMaps::create(BufferSpec::hash(4)).unwrap();
    maps.selector().destroy();

    let err = SwapCoordinator::new(maps, None).unwrap_err();
    assert!(matches!(err, Error::SelectorSetup(SelectorError::Destroyed)));
    assert!(err.is_setup());
    assert!(err.to_string().starts_with("setup:"));
}

/// 测试16: 缓冲区集合可以调试打印
#[test]
fn test_stats_maps_debug() {
    let maps: StatsMaps<u32, u32> = StatsMaps::create(BufferSpec::hash(2)).unwrap();
    let printed = format!("{maps:?}");
    assert!(printed.starts_with("StatsMaps"), "{printed}");
    assert!(printed.contains("selector"), "{printed}");
}
