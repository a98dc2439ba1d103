//! Arena integration tests

use mytunnel_pool::config::{Config, PoolConfig};
use mytunnel_pool::pool::{PoolArena, SubpageMetric};
use std::sync::Arc;
use std::thread;

fn small_config() -> PoolConfig {
    PoolConfig {
        page_size: 4096,
        max_order: 3,
        ..PoolConfig::default()
    }
}

#[test]
fn test_arena_from_toml() {
    let config = Config::from_toml(
        r#"
[pool]
page_size = 4096
max_order = 4
max_chunks = 2
recycler_capacity = 0
"#,
    )
    .unwrap();
    let arena = PoolArena::new(config.pool).unwrap();
    assert_eq!(arena.config().chunk_size(), 65536);

    // Without a recycler, released handles are simply dropped.
    drop(arena.buffer(64).unwrap());
    assert_eq!(arena.stats().idle_handles, 0);
}

#[test]
fn test_invalid_config_rejected() {
    let config = PoolConfig {
        page_size: 5000,
        ..PoolConfig::default()
    };
    assert!(PoolArena::new(config).is_err());
}

#[test]
fn test_elements_fill_page_in_order() {
    let arena = PoolArena::new(small_config()).unwrap();

    // 4096 / 512 = 8 elements in one page
    let bufs: Vec<_> = (0..8).map(|_| arena.buffer(512).unwrap()).collect();
    for (i, buf) in bufs.iter().enumerate() {
        let locator = buf.locator().unwrap();
        assert_eq!(locator.page_index(), bufs[0].locator().unwrap().page_index());
        assert_eq!(locator.bitmap_index(), Some(i as u32));
    }
    assert_eq!(arena.free_subpages(512), 0);

    // A full page leaves the list; one free slot brings it back.
    let mut bufs = bufs;
    let freed = bufs.remove(3).locator().unwrap();
    drop(bufs.remove(2));
    assert_eq!(arena.free_subpages(512), 1);

    let reused = arena.buffer(500).unwrap();
    assert_eq!(reused.locator().unwrap().bitmap_index(), Some(2));
    let next = arena.buffer(512).unwrap();
    assert_eq!(next.locator(), Some(freed));
}

#[test]
fn test_sole_subpage_is_retained() {
    let arena = PoolArena::new(small_config()).unwrap();
    let buf = arena.buffer(48).unwrap();
    let page = buf.locator().unwrap().page_index();
    drop(buf);

    // Still listed and still holding its page.
    assert_eq!(arena.free_subpages(48), 1);
    assert_eq!(arena.stats().used_pages, 1);
    let again = arena.buffer(48).unwrap();
    assert_eq!(again.locator().unwrap().page_index(), page);
}

#[test]
fn test_sole_subpage_released_when_not_retained() {
    let config = PoolConfig {
        retain_sole_subpage: false,
        ..small_config()
    };
    let arena = PoolArena::new(config).unwrap();
    drop(arena.buffer(48).unwrap());

    assert_eq!(arena.free_subpages(48), 0);
    assert_eq!(arena.stats().used_pages, 0);
    assert_eq!(arena.stats().active_subpages, 0);
}

#[test]
fn test_subpage_metrics() {
    let arena = PoolArena::new(small_config()).unwrap();
    let _a = arena.buffer(1024).unwrap();
    let _b = arena.buffer(1024).unwrap();
    let _c = arena.buffer(16).unwrap();

    let metrics = arena.subpage_metrics();
    assert_eq!(metrics.len(), 2);

    let large = metrics
        .iter()
        .find(|m| m.element_size() == Some(1024))
        .unwrap();
    assert_eq!(large.max_num_elements(), Some(4));
    assert_eq!(large.num_available(), Some(2));
    assert_eq!(large.page_size(), 4096);

    let tiny = metrics.iter().find(|m| m.element_size() == Some(16)).unwrap();
    assert_eq!(tiny.max_num_elements(), Some(256));
    assert_eq!(tiny.num_available(), Some(255));
}

#[test]
fn test_runs_span_chunks() {
    let arena = PoolArena::new(small_config()).unwrap();
    let chunk_size = arena.config().chunk_size();

    let half_a = arena.buffer(chunk_size / 2).unwrap();
    let half_b = arena.buffer(chunk_size / 2).unwrap();
    assert_eq!(arena.stats().chunks, 1);

    let third = arena.buffer(chunk_size / 2).unwrap();
    assert_eq!(arena.stats().chunks, 2);
    assert_eq!(arena.stats().used_pages, 12);

    drop(third);
    assert_eq!(arena.stats().chunks, 1);
    drop(half_a);
    drop(half_b);
    assert_eq!(arena.stats().used_pages, 0);
}

#[test]
fn test_concurrent_allocations() {
    let arena = PoolArena::new(small_config()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                for round in 0..200 {
                    let size = 16 + ((t * 131 + round * 37) % 6000);
                    let fill = (t * 31 + round) as u8;
                    let mut buf = arena.buffer(size).unwrap();
                    buf.write_bytes(&vec![fill; size]).unwrap();

                    // Resize across classes while other threads churn.
                    buf.set_capacity(size * 2).unwrap();
                    let mut out = vec![0u8; size];
                    buf.get_bytes(0, &mut out).unwrap();
                    assert!(out.iter().all(|b| *b == fill));

                    let view = buf.retained_slice(0, size).unwrap();
                    drop(buf);
                    assert_eq!(view.copy_readable().unwrap().len(), size);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = arena.stats();
    assert_eq!(stats.active_leases, 0);
    // Only retained subpages may still hold pages.
    assert_eq!(stats.used_pages, stats.active_subpages);
    assert!(stats.reallocations > 0);
}

#[test]
fn test_buffers_outlive_local_arena_handle() {
    let arena = PoolArena::new(small_config()).unwrap();
    let mut buf = arena.buffer(100).unwrap();
    drop(arena);

    // The buffer keeps the arena alive.
    buf.write_bytes(b"still here").unwrap();
    buf.set_capacity(3000).unwrap();
    assert_eq!(buf.copy_readable().unwrap().as_ref(), b"still here");
}
