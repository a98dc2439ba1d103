//! Leased buffer integration tests

use mytunnel_pool::config::PoolConfig;
use mytunnel_pool::pool::PoolArena;
use mytunnel_pool::PoolError;
use std::sync::Arc;

fn arena() -> Arc<PoolArena> {
    PoolArena::new(PoolConfig::default()).unwrap()
}

/// Fill `len` bytes with a recognizable pattern
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Resize policy for a 1024-byte lease currently 600 bytes wide
#[test]
fn test_set_capacity_large_lease() {
    let arena = arena();
    let mut buf = arena.buffer(600).unwrap();
    assert_eq!(buf.max_fast_capacity(), 1024);
    let locator = buf.locator();

    // Grow within the lease
    buf.set_capacity(700).unwrap();
    assert_eq!(buf.capacity(), 700);
    assert_eq!(buf.locator(), locator);
    assert_eq!(arena.stats().reallocations, 0);

    // Same size is a no-op
    buf.set_capacity(700).unwrap();
    assert_eq!(arena.stats().reallocations, 0);

    // Shrink above half stays in place
    buf.set_capacity(600).unwrap();
    assert_eq!(buf.capacity(), 600);
    assert_eq!(arena.stats().reallocations, 0);

    // Past max length moves the buffer
    buf.set_capacity(1200).unwrap();
    assert_eq!(buf.capacity(), 1200);
    assert_eq!(buf.max_fast_capacity(), 2048);
    assert_eq!(arena.stats().reallocations, 1);
}

#[test]
fn test_shrink_below_half_reallocates() {
    let arena = arena();
    let mut buf = arena.buffer(600).unwrap();

    buf.set_capacity(300).unwrap();
    assert_eq!(buf.capacity(), 300);
    assert_eq!(buf.max_fast_capacity(), 304);
    assert_eq!(arena.stats().reallocations, 1);
}

/// Leases of 512 bytes or less only shrink in place by less than 16 bytes
#[test]
fn test_set_capacity_small_lease() {
    let arena = arena();
    let mut buf = arena.buffer(256).unwrap();
    assert_eq!(buf.max_fast_capacity(), 256);

    buf.set_capacity(250).unwrap();
    assert_eq!(buf.capacity(), 250);
    assert_eq!(arena.stats().reallocations, 0);

    buf.set_capacity(200).unwrap();
    assert_eq!(buf.capacity(), 200);
    assert_eq!(buf.max_fast_capacity(), 208);
    assert_eq!(arena.stats().reallocations, 1);
}

#[test]
fn test_growth_preserves_bytes() {
    let arena = arena();
    let mut buf = arena.buffer(100).unwrap();
    let data = pattern(100);
    buf.write_bytes(&data).unwrap();

    buf.set_capacity(50_000).unwrap();
    assert!(!buf.locator().unwrap().is_subpage());

    let mut out = vec![0u8; 100];
    buf.get_bytes(0, &mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(buf.writer_index(), 100);
}

#[test]
fn test_shrink_clamps_cursors_and_keeps_prefix() {
    let arena = arena();
    let mut buf = arena.buffer(4096).unwrap();
    let data = pattern(4096);
    buf.write_bytes(&data).unwrap();
    buf.set_index(3000, 4000).unwrap();

    // 1000 is below half of 4096: reallocation
    buf.set_capacity(1000).unwrap();
    assert_eq!(buf.reader_index(), 1000);
    assert_eq!(buf.writer_index(), 1000);

    let mut out = vec![0u8; 1000];
    buf.get_bytes(0, &mut out).unwrap();
    assert_eq!(out, &data[..1000]);

    // 3000 is above half of 4096: in place
    let mut buf = arena.buffer(4096).unwrap();
    buf.set_index(0, 3500).unwrap();
    buf.set_capacity(3000).unwrap();
    assert_eq!(buf.writer_index(), 3000);
}

#[test]
fn test_capacity_ceiling() {
    let arena = arena();
    let mut buf = arena.allocate(100, 1000).unwrap();

    let err = buf.set_capacity(1001).unwrap_err();
    assert_eq!(
        err,
        PoolError::CapacityExceeded {
            requested: 1001,
            max: 1000
        }
    );
    assert_eq!(buf.capacity(), 100);

    buf.set_capacity(1000).unwrap();
    assert_eq!(buf.capacity(), 1000);
}

#[test]
fn test_write_bytes_grows_until_ceiling() {
    let arena = arena();
    let mut buf = arena.allocate(16, 300).unwrap();

    buf.write_bytes(&pattern(40)).unwrap();
    assert_eq!(buf.capacity(), 64);

    buf.write_bytes(&pattern(200)).unwrap();
    assert_eq!(buf.capacity(), 256);
    assert_eq!(buf.readable_bytes(), 240);

    buf.write_bytes(&pattern(60)).unwrap();
    assert_eq!(buf.capacity(), 300);
    assert_eq!(buf.writable_bytes(), 0);

    let err = buf.write_bytes(&[1]).unwrap_err();
    assert!(matches!(err, PoolError::CapacityExceeded { requested: 301, max: 300 }));
}

#[test]
fn test_read_write_cursors() {
    let arena = arena();
    let mut buf = arena.buffer(64).unwrap();
    buf.write_bytes(b"hello world").unwrap();

    let mut head = [0u8; 5];
    buf.read_bytes(&mut head).unwrap();
    assert_eq!(&head, b"hello");
    assert_eq!(buf.copy_readable().unwrap().as_ref(), b" world");

    let mut too_much = [0u8; 7];
    assert!(matches!(
        buf.read_bytes(&mut too_much),
        Err(PoolError::IndexOutOfBounds { .. })
    ));
    assert!(buf.set_index(8, 4).is_err());
}

#[test]
fn test_copy_readable_follows_cursors() {
    let arena = arena();
    let mut buf = arena.buffer(32).unwrap();
    assert!(buf.copy_readable().unwrap().is_empty());

    buf.write_bytes(b"abcdef").unwrap();
    buf.set_index(2, 5).unwrap();
    assert_eq!(buf.copy_readable().unwrap().as_ref(), b"cde");

    // Cursors pulled in by a shrink still bound the copy.
    buf.set_capacity(4).unwrap();
    assert_eq!(buf.copy_readable().unwrap().as_ref(), b"cd");
}

#[test]
fn test_unpooled_resize() {
    let arena = PoolArena::new(PoolConfig {
        page_size: 4096,
        max_order: 2,
        ..PoolConfig::default()
    })
    .unwrap();
    let chunk_size = arena.config().chunk_size();

    let mut buf = arena.buffer(chunk_size * 2).unwrap();
    assert!(!buf.is_pooled());
    buf.set_bytes(0, b"huge").unwrap();

    buf.set_capacity(chunk_size * 2).unwrap();
    assert_eq!(arena.stats().reallocations, 0);

    // Unpooled leases never resize in place.
    buf.set_capacity(chunk_size * 2 - 1).unwrap();
    assert_eq!(arena.stats().reallocations, 1);
    assert!(!buf.is_pooled());

    buf.set_capacity(100).unwrap();
    assert!(buf.is_pooled());
    let mut out = [0u8; 4];
    buf.get_bytes(0, &mut out).unwrap();
    assert_eq!(&out, b"huge");
}

#[test]
fn test_failed_reallocation_leaves_buffer_intact() {
    let arena = PoolArena::new(PoolConfig {
        page_size: 4096,
        max_order: 3,
        max_chunks: 1,
        ..PoolConfig::default()
    })
    .unwrap();

    let mut buf = arena.buffer(100).unwrap();
    buf.write_bytes(&pattern(100)).unwrap();
    let locator = buf.locator();

    // Take the remaining seven pages.
    let _runs = [
        arena.buffer(16384).unwrap(),
        arena.buffer(8192).unwrap(),
        arena.buffer(4096).unwrap(),
    ];
    assert_eq!(arena.stats().used_pages, 8);

    let err = buf.set_capacity(2000).unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { .. }));
    assert_eq!(buf.capacity(), 100);
    assert_eq!(buf.locator(), locator);
    assert_eq!(buf.copy_readable().unwrap().as_ref(), pattern(100).as_slice());
    assert_eq!(arena.stats().reallocations, 0);
}

#[test]
fn test_duplicate_keeps_lease_alive() {
    let arena = arena();
    let mut buf = arena.buffer(128).unwrap();
    buf.write_bytes(b"shared bytes").unwrap();

    let dup = buf.retained_duplicate();
    assert_eq!(buf.ref_cnt(), 2);
    assert_eq!(dup.readable_bytes(), 12);

    drop(buf);
    assert_eq!(dup.ref_cnt(), 1);
    assert_eq!(arena.stats().active_leases, 1);
    assert_eq!(dup.copy_readable().unwrap().as_ref(), b"shared bytes");

    drop(dup);
    assert_eq!(arena.stats().active_leases, 0);
}

#[test]
fn test_slices_have_independent_cursors() {
    let arena = arena();
    let mut buf = arena.buffer(64).unwrap();
    buf.write_bytes(b"0123456789").unwrap();

    let mut slice = buf.retained_slice(2, 5).unwrap();
    assert_eq!(slice.capacity(), 5);
    assert_eq!(slice.copy_readable().unwrap().as_ref(), b"23456");

    let mut one = [0u8; 1];
    slice.read_bytes(&mut one).unwrap();
    assert_eq!(&one, b"2");
    assert_eq!(buf.reader_index(), 0);

    // Writes through the view land in the shared memory.
    slice.set_bytes(0, b"X").unwrap();
    let mut at_two = [0u8; 1];
    buf.get_bytes(2, &mut at_two).unwrap();
    assert_eq!(&at_two, b"X");

    let nested = slice.retained_slice(1, 2).unwrap();
    assert_eq!(nested.copy_readable().unwrap().as_ref(), b"34");
    assert_eq!(buf.ref_cnt(), 3);

    assert!(buf.retained_slice(60, 5).is_err());
    assert!(slice.retained_slice(4, 2).is_err());

    let readable = buf.retained_slice_readable();
    assert_eq!(readable.capacity(), 10);
}

#[test]
fn test_released_handle_is_reused_fresh() {
    let arena = arena();
    let mut buf = arena.allocate(64, 128).unwrap();
    buf.write_bytes(b"stale").unwrap();
    drop(buf);

    let buf = arena.allocate(32, 4096).unwrap();
    assert_eq!(arena.stats().idle_handles, 0);
    assert_eq!(buf.ref_cnt(), 1);
    assert_eq!(buf.max_capacity(), 4096);
    assert_eq!(buf.reader_index(), 0);
    assert_eq!(buf.writer_index(), 0);
}
