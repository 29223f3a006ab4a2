/// 基础测试模块
/// 测试缓冲区、选择器和静默域的核心功能
use crate::{
    ActiveSelector, AssocBuffer, BufferError, BufferSpec, QuiescenceDomain, SelectorError,
    WriteMode,
};

fn buffer(capacity: usize) -> AssocBuffer<u32, u32> {
    AssocBuffer::create(BufferSpec::hash(capacity)).unwrap()
}

/// 测试1: 容量为 10 的缓冲区，insert-only 写入后读取
#[test]
fn test_insert_only_then_read() {
    let buf = buffer(10);

    buf.write(1, 100, WriteMode::InsertOnly).unwrap();
    assert_eq!(buf.read(&1).unwrap(), 100);

    // 第二次 insert-only 应该失败
    assert_eq!(
        buf.write(1, 200, WriteMode::InsertOnly),
        Err(BufferError::AlreadyExists)
    );
    assert_eq!(buf.read(&1).unwrap(), 100);

    // update-only 对不存在的键应该失败
    assert_eq!(
        buf.write(2, 200, WriteMode::UpdateOnly),
        Err(BufferError::NotFound)
    );
}

/// 测试2: upsert 写入后读回相同的值
#[test]
fn test_upsert_round_trip() {
    let buf = buffer(10);

    for key in 0..10u32 {
        buf.write(key, key * 7, WriteMode::Upsert).unwrap();
    }
    for key in 0..10u32 {
        assert_eq!(buf.read(&key).unwrap(), key * 7);
    }

    // upsert 覆盖已有的值
    buf.write(3, 9, WriteMode::Upsert).unwrap();
    assert_eq!(buf.read(&3).unwrap(), 9);
}

/// 测试3: update-only 更新已存在的键
#[test]
fn test_update_only_existing_key() {
    let buf = buffer(4);
    buf.write(5, 1, WriteMode::InsertOnly).unwrap();
    buf.write(5, 2, WriteMode::UpdateOnly).unwrap();
    assert_eq!(buf.read(&5).unwrap(), 2);
    assert_eq!(buf.len().unwrap(), 1);
}

/// 测试4: 读取不存在的键
#[test]
fn test_read_missing_key() {
    let buf = buffer(4);
    assert_eq!(buf.read(&42), Err(BufferError::NotFound));
}

/// 测试5: 清空后为空
#[test]
fn test_clear_empties_buffer() {
    let buf = buffer(4);
    buf.write(1, 1, WriteMode::Upsert).unwrap();
    buf.write(2, 2, WriteMode::Upsert).unwrap();
    assert!(!buf.is_empty().unwrap());

    assert_eq!(buf.clear().unwrap(), 2);
    assert!(buf.is_empty().unwrap());
    assert_eq!(buf.keys().unwrap(), Vec::<u32>::new());
}

/// 测试6: 对空缓冲区清空是幂等的
#[test]
fn test_clear_is_idempotent() {
    let buf = buffer(4);
    assert_eq!(buf.clear().unwrap(), 0);
    assert_eq!(buf.clear().unwrap(), 0);
    assert!(buf.is_empty().unwrap());
}

/// 测试7: update_with 插入初始值后应用闭包
#[test]
fn test_update_with_inserts_then_modifies() {
    let buf = buffer(4);
    buf.update_with(7, || 10, |v| *v += 1).unwrap();
    assert_eq!(buf.read(&7).unwrap(), 11);
    buf.update_with(7, || 10, |v| *v += 1).unwrap();
    assert_eq!(buf.read(&7).unwrap(), 12);
}

/// 测试8: 每个缓冲区都有不同的身份
#[test]
fn test_buffer_ids_are_distinct() {
    let a = buffer(1);
    let b = buffer(1);
    assert_ne!(a.id(), b.id());
    assert_eq!(a.key_size(), 4);
    assert_eq!(a.value_size(), 4);
}

/// 测试9: 选择器的 set/get
#[test]
fn test_selector_set_get() {
    let selector = ActiveSelector::new(0).unwrap();
    assert_eq!(selector.get().unwrap(), 0);

    selector.set(1).unwrap();
    assert_eq!(selector.get().unwrap(), 1);

    // 克隆共享同一个单元
    let clone = selector.clone();
    clone.set(0).unwrap();
    assert_eq!(selector.get().unwrap(), 0);
}

/// 测试10: 选择器拒绝无效索引
#[test]
fn test_selector_rejects_invalid_index() {
    let selector = ActiveSelector::new(1).unwrap();
    assert_eq!(selector.set(2), Err(SelectorError::InvalidIndex(2)));
    assert_eq!(selector.get().unwrap(), 1);
    assert!(ActiveSelector::new(5).is_err());
}

/// 测试11: 创建静默域并注册上下文
#[test]
fn test_domain_register_and_enter() {
    let (_barrier, domain) = QuiescenceDomain::new();
    let ctx = domain.register_context();
    assert_eq!(domain.registered_contexts(), 1);

    assert!(!ctx.is_in_flight());
    {
        let section = ctx.enter();
        assert!(ctx.is_in_flight());
        assert_eq!(section.epoch(), 0);
    }
    assert!(!ctx.is_in_flight());
}

/// 测试12: 没有上下文时同步立即完成
#[test]
fn test_synchronize_without_contexts() {
    let (mut barrier, domain) = QuiescenceDomain::new();
    barrier.synchronize().unwrap();
    barrier.synchronize().unwrap();
    assert_eq!(barrier.grace_periods(), 2);
    assert_eq!(domain.global_epoch(), 2);
}

/// 测试13: 空闲上下文不会阻塞同步
#[test]
fn test_synchronize_with_idle_contexts() {
    let (mut barrier, domain) = QuiescenceDomain::new();
    let _ctx1 = domain.register_context();
    let _ctx2 = domain.register_context();

    barrier.synchronize().unwrap();
    assert_eq!(barrier.global_epoch(), 1);
}

/// 测试14: 同步之后进入的临界区处于新纪元
#[test]
fn test_section_after_synchronize_sees_new_epoch() {
    let (mut barrier, domain) = QuiescenceDomain::new();
    let ctx = domain.register_context();

    barrier.synchronize().unwrap();
    let section = ctx.enter();
    assert_eq!(section.epoch(), 1);
}

/// 测试15: 缓冲区集合按选择器给出活跃和非活跃缓冲区
#[test]
fn test_stats_maps_active_follows_selector() {
    let maps: crate::StatsMaps<u32, u32> = crate::StatsMaps::create(BufferSpec::hash(2)).unwrap();
    assert_eq!(maps.active_index().unwrap(), 0);
    assert_eq!(maps.active().unwrap().id(), maps.buffer(0).id());
    assert_eq!(maps.inactive().unwrap().id(), maps.buffer(1).id());

    maps.selector().set(1).unwrap();
    assert_eq!(maps.active().unwrap().id(), maps.buffer(1).id());
    assert_eq!(maps.inactive().unwrap().id(), maps.buffer(0).id());
    // buffer() 只看最低位
    assert_eq!(maps.buffer(3).id(), maps.buffer(1).id());
}
