use crate::{
    error::*, BitLayout, Builder, MachineIdSource, MemoryLeaseStore, Registry, SequenceCounter,
    Snowflake, TimeSource, DEFAULT_EPOCH_MILLIS,
};
use chrono::prelude::*;
use std::{
    collections::HashSet,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

struct MockClock(AtomicI64);

impl MockClock {
    fn at(millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(millis)))
    }

    fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockClock {
    fn current_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn epoch_2020() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn test_next_id() -> Result<(), BoxDynError> {
    let sf = Snowflake::builder().machine_id(1).finalize_local()?;
    assert!(sf.next_id().is_ok());
    Ok(())
}

#[test]
fn test_default_layout() -> Result<(), BoxDynError> {
    let sf = Snowflake::new()?;
    let layout = sf.layout();
    assert_eq!(layout.total_bits(), 64);
    assert_eq!(layout.bit_len_time(), 41);
    assert_eq!(layout.bit_len_machine_id(), 10);
    assert_eq!(layout.bit_len_sequence(), 13);
    assert_eq!(sf.start_time(), epoch_2020());
    assert_eq!(sf.machine_id_source(), MachineIdSource::Random);
    assert!(sf.machine_id() < 1024);
    assert!(sf.lease().is_none());
    Ok(())
}

#[test]
fn test_first_ids_of_a_millisecond() -> Result<(), BoxDynError> {
    let epoch = epoch_2020();
    let clock = MockClock::at(epoch.timestamp_millis() + 1000);
    let sf = Snowflake::builder()
        .start_time(epoch)
        .total_bits(63)
        .bit_len_time(41)
        .bit_len_machine_id(10)
        .bit_len_sequence(12)
        .machine_id(5)
        .clock(clock)
        .finalize_local()?;

    let first = sf.next_id()?;
    let second = sf.next_id()?;

    let parts = sf.decompose(first);
    assert_eq!((parts.time, parts.machine_id, parts.sequence), (1000, 5, 1));
    let parts = sf.decompose(second);
    assert_eq!((parts.time, parts.machine_id, parts.sequence), (1000, 5, 2));
    assert_eq!(first, (1000 << 22) | (5 << 12) | 1);
    assert!(second > first);
    assert_eq!(
        sf.timestamp_of(first),
        epoch + chrono::Duration::milliseconds(1000)
    );
    Ok(())
}

#[test]
fn test_once() -> Result<(), BoxDynError> {
    let now = Utc::now();
    let expected_machine_id = 10u64;

    let sf = Snowflake::builder()
        .start_time(now)
        .machine_id(expected_machine_id)
        .finalize_local()?;

    let sleep_duration_ms = 500;
    thread::sleep(Duration::from_millis(sleep_duration_ms));

    let id = sf.next_id()?;
    let parts = sf.decompose(id);

    let actual_time = parts.time;
    // allow for scheduler jitter
    if actual_time < sleep_duration_ms || actual_time > sleep_duration_ms + 50 {
        panic!(
            "Unexpected time {}, expected around {}",
            actual_time, sleep_duration_ms
        )
    }

    assert_eq!(
        parts.machine_id, expected_machine_id,
        "Unexpected machine id"
    );

    Ok(())
}

#[test]
fn test_run_for_200ms() -> Result<(), BoxDynError> {
    let now = Utc::now();
    let start_time = now.timestamp_millis();
    let expected_machine_id = 15u64;

    let sf = Snowflake::builder()
        .start_time(now)
        .machine_id(expected_machine_id)
        .finalize_local()?;

    let mut last_id: u64 = 0;
    let initial = Utc::now().timestamp_millis();
    let mut current = initial;
    while current - initial < 200 {
        let id = sf.next_id()?;
        let parts = sf.decompose(id);

        assert!(
            id > last_id,
            "duplicated id (id: {}, last_id: {})",
            id,
            last_id
        );
        last_id = id;

        current = Utc::now().timestamp_millis();

        let actual_time = parts.time as i64;
        let overtime = start_time + actual_time - current;
        assert!(overtime.abs() <= 1, "unexpected overtime: {}", overtime);

        assert_eq!(
            parts.machine_id, expected_machine_id,
            "unexpected machine id: {}",
            parts.machine_id
        );
    }

    Ok(())
}

#[test]
fn test_ids_increase_across_milliseconds() -> Result<(), BoxDynError> {
    let sf = Snowflake::builder().machine_id(3).finalize_local()?;
    let mut last_id = sf.next_id()?;
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(2));
        let id = sf.next_id()?;
        assert!(id > last_id, "id {} not greater than {}", id, last_id);
        assert!(sf.decompose(id).time > sf.decompose(last_id).time);
        last_id = id;
    }
    Ok(())
}

#[test]
fn test_threads_uniqueness() -> Result<(), BoxDynError> {
    let sf = Arc::new(Snowflake::builder().machine_id(1).finalize_local()?);
    let ids = Arc::new(Mutex::new(HashSet::new()));
    let mut children = Vec::new();
    let num_threads = 10;
    let ids_per_thread = 10_000;

    for _ in 0..num_threads {
        let thread_sf = Arc::clone(&sf);
        let thread_ids = Arc::clone(&ids);
        children.push(thread::spawn(move || {
            let mut local_ids = Vec::with_capacity(ids_per_thread);
            for _ in 0..ids_per_thread {
                local_ids.push(thread_sf.next_id().unwrap());
            }
            let mut ids_lock = thread_ids.lock().unwrap();
            for id in local_ids {
                assert!(ids_lock.insert(id), "Duplicate ID detected: {}", id);
            }
        }));
    }

    for child in children {
        child.join().expect("Child thread panicked");
    }

    let final_count = ids.lock().unwrap().len();
    assert_eq!(final_count, num_threads * ids_per_thread);
    Ok(())
}

#[test]
fn test_generate_10_ids() -> Result<(), BoxDynError> {
    let sf = Snowflake::builder().machine_id(30).finalize_local()?;
    let mut ids = HashSet::new();
    for _ in 0..10 {
        let id = sf.next_id()?;
        assert!(ids.insert(id), "duplicated id: {}", id);
    }
    Ok(())
}

#[test]
fn test_sequence_wrap_waits_for_next_tick() -> Result<(), BoxDynError> {
    let clock = MockClock::at(DEFAULT_EPOCH_MILLIS + 100);
    let sf = Snowflake::builder()
        .total_bits(53)
        .bit_len_sequence(2)
        .machine_id(9)
        .clock(clock)
        .finalize_local()?;

    let ids = (0..12).map(|_| sf.next_id()).collect::<Result<Vec<_>, _>>()?;
    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0], "ids not increasing: {:?}", pair);
    }

    let parts: Vec<_> = ids
        .iter()
        .map(|id| {
            let parts = sf.decompose(*id);
            (parts.time, parts.sequence)
        })
        .collect();
    assert_eq!(
        parts,
        vec![
            (100, 1),
            (100, 2),
            (100, 3),
            (101, 0),
            (101, 1),
            (101, 2),
            (101, 3),
            (102, 0),
            (102, 1),
            (102, 2),
            (102, 3),
            (103, 0),
        ]
    );
    Ok(())
}

#[test]
fn test_sequence_continues_into_next_tick() -> Result<(), BoxDynError> {
    let clock = MockClock::at(DEFAULT_EPOCH_MILLIS + 100);
    let sf = Snowflake::builder()
        .machine_id(1)
        .clock(clock.clone())
        .finalize_local()?;

    assert_eq!(sf.decompose(sf.next_id()?).sequence, 1);
    assert_eq!(sf.decompose(sf.next_id()?).sequence, 2);
    clock.set(DEFAULT_EPOCH_MILLIS + 101);
    let parts = sf.decompose(sf.next_id()?);
    assert_eq!((parts.time, parts.sequence), (101, 3));
    Ok(())
}

#[test]
fn test_clock_regression_within_tolerance_reuses_last_tick() -> Result<(), BoxDynError> {
    let clock = MockClock::at(DEFAULT_EPOCH_MILLIS + 5000);
    let sf = Snowflake::builder()
        .machine_id(2)
        .clock(clock.clone())
        .clock_regression_tolerance(Duration::from_secs(1))
        .finalize_local()?;

    let before = sf.next_id()?;
    clock.set(DEFAULT_EPOCH_MILLIS + 4500);
    let after = sf.next_id()?;

    assert!(after > before);
    assert_eq!(sf.decompose(after).time, 5000);
    Ok(())
}

#[test]
fn test_clock_regression_beyond_tolerance_fails() -> Result<(), BoxDynError> {
    let clock = MockClock::at(DEFAULT_EPOCH_MILLIS + 5000);
    let sf = Snowflake::builder()
        .machine_id(2)
        .clock(clock.clone())
        .clock_regression_tolerance(Duration::from_secs(1))
        .finalize_local()?;

    sf.next_id()?;
    clock.set(DEFAULT_EPOCH_MILLIS + 3000);
    assert!(matches!(
        sf.next_id(),
        Err(Error::ClockMovedBackwards {
            last: 5000,
            now: 3000
        })
    ));

    // Once the clock catches up, ids flow again.
    clock.set(DEFAULT_EPOCH_MILLIS + 5001);
    assert_eq!(sf.decompose(sf.next_id()?).time, 5001);
    Ok(())
}

#[test]
fn test_builder_errors() {
    let start_time = Utc::now() + chrono::Duration::seconds(1);
    assert!(matches!(
        Snowflake::builder().start_time(start_time).finalize_local(),
        Err(Error::StartTimeAheadOfCurrentTime(_))
    ));

    assert!(matches!(
        Snowflake::builder().machine_id(1024).finalize_local(),
        Err(Error::MachineIdOutOfRange {
            machine_id: 1024,
            limit: 1024
        })
    ));

    assert!(matches!(
        Snowflake::builder()
            .machine_id(1)
            .check_machine_id(|_| false)
            .finalize_local(),
        Err(Error::CheckMachineIdFailed(1))
    ));

    assert!(matches!(
        Snowflake::builder()
            .bit_len_time(41)
            .bit_len_machine_id(30)
            .total_bits(64)
            .finalize_local(),
        Err(Error::InvalidBitLength(41, 30, 0, 64))
    ));

    assert!(matches!(
        Snowflake::builder()
            .bit_len_sequence(12)
            .finalize_local(),
        Err(Error::InvalidBitLength(41, 10, 12, 64))
    ));

    assert!(matches!(
        Snowflake::builder().total_bits(65).finalize_local(),
        Err(Error::TotalBitsTooWide(65))
    ));

    assert!(matches!(
        Snowflake::builder()
            .bit_len_time(0)
            .finalize_local(),
        Err(Error::ZeroTimestampBits)
    ));
}

#[test]
fn test_lease_store_needs_async_finalize() {
    let store = Arc::new(MemoryLeaseStore::new());
    assert!(matches!(
        Snowflake::builder().lease_store(store).finalize_local(),
        Err(Error::LeaseRequiresAsync)
    ));
}

#[test]
fn test_explicit_machine_id_wins() -> Result<(), BoxDynError> {
    let store = Arc::new(MemoryLeaseStore::new());
    let sf = Snowflake::builder()
        .machine_id(42)
        .lease_store(store.clone())
        .network_hint(Arc::new(|| Some(Ipv4Addr::new(10, 0, 0, 7))))
        .finalize_local()?;
    assert_eq!(sf.machine_id(), 42);
    assert_eq!(sf.machine_id_source(), MachineIdSource::Explicit);
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn test_network_hint_uses_low_address_bits() -> Result<(), BoxDynError> {
    let sf = Snowflake::builder()
        .network_hint(Arc::new(|| Some(Ipv4Addr::new(10, 1, 2, 3))))
        .finalize_local()?;
    // 10.1.2.3 is 0x0A01_0203; the low 10 bits are 0x203.
    assert_eq!(sf.machine_id(), 0x203);
    assert_eq!(sf.machine_id_source(), MachineIdSource::NetworkHint);

    let sf = Snowflake::builder()
        .total_bits(52)
        .bit_len_machine_id(8)
        .network_hint(Arc::new(|| Some(Ipv4Addr::new(192, 168, 1, 200))))
        .finalize_local()?;
    assert_eq!(sf.machine_id(), 200);
    Ok(())
}

#[test]
fn test_missing_network_hint_falls_back_to_random() -> Result<(), BoxDynError> {
    let limits = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&limits);
    let sf = Snowflake::builder()
        .network_hint(Arc::new(|| None::<Ipv4Addr>))
        .rand_source(Arc::new(move |limit: u64| {
            seen.lock().unwrap().push(limit);
            7u64
        }))
        .finalize_local()?;
    assert_eq!(sf.machine_id(), 7);
    assert_eq!(sf.machine_id_source(), MachineIdSource::Random);
    assert_eq!(*limits.lock().unwrap(), vec![1024]);
    Ok(())
}

#[test]
fn test_check_machine_id_sees_derived_id() {
    assert!(matches!(
        Snowflake::builder()
            .rand_source(Arc::new(|_: u64| 3u64))
            .check_machine_id(|id| id != 3)
            .finalize_local(),
        Err(Error::CheckMachineIdFailed(3))
    ));
}

#[test]
fn test_error_send_sync() {
    // This test ensures the Error type is Send + Sync
    let err = Error::ResourceExhausted { limit: 1 };
    thread::spawn(move || {
        let _ = err;
    })
    .join()
    .unwrap();
}

#[test]
fn test_over_time_limit() -> Result<(), BoxDynError> {
    let clock = MockClock::at(DEFAULT_EPOCH_MILLIS + 1023);
    let sf = Snowflake::builder()
        .bit_len_time(10)
        .machine_id(1)
        .clock(clock.clone())
        .finalize_local()?;

    assert_eq!(sf.decompose(sf.next_id()?).time, 1023);
    clock.set(DEFAULT_EPOCH_MILLIS + 1024);
    assert!(matches!(sf.next_id(), Err(Error::OverTimeLimit)));
    Ok(())
}

#[test]
fn test_timestamp_of_wide_time_field_saturates() -> Result<(), BoxDynError> {
    let sf = Snowflake::builder()
        .total_bits(64)
        .bit_len_time(63)
        .bit_len_machine_id(0)
        .bit_len_sequence(1)
        .finalize_local()?;

    let parts = sf.decompose(u64::MAX);
    assert_eq!(parts.time, u64::MAX >> 1);
    assert_eq!(parts.timestamp_millis(DEFAULT_EPOCH_MILLIS), i64::MAX);
    assert_eq!(sf.timestamp_of(u64::MAX), DateTime::<Utc>::MAX_UTC);
    Ok(())
}

#[test]
fn test_layout_decompose_inverts_compose() -> Result<(), BoxDynError> {
    let layouts = [
        BitLayout::new(64, 41, 10, None)?,
        BitLayout::new(63, 41, 10, Some(12))?,
        BitLayout::new(64, 64, 0, None)?,
        BitLayout::new(32, 20, 4, None)?,
    ];
    for layout in layouts {
        let time = layout.max_time();
        let machine_id = layout.machine_id_limit() - 1;
        let sequence = layout.sequence_limit() - 1;
        let parts = layout.decompose(layout.compose(time, machine_id, sequence));
        assert_eq!(
            (parts.time, parts.machine_id, parts.sequence),
            (time, machine_id, sequence),
            "{:?}",
            layout
        );

        let half = layout.machine_id_limit() / 2;
        let parts = layout.decompose(layout.compose(1, half, 0));
        assert_eq!((parts.time, parts.machine_id, parts.sequence), (1, half, 0));
    }

    let layout = BitLayout::new(32, 20, 4, None)?;
    assert_eq!(layout.time_shift(), 12);
    assert_eq!(layout.machine_id_shift(), 8);
    assert!(layout.compose(layout.max_time(), 15, 255) <= u64::from(u32::MAX));
    Ok(())
}

#[test]
fn test_sequence_counter_wraps() {
    let mut counter = SequenceCounter::new(2);
    assert_eq!(counter.limit(), 4);
    assert_eq!(counter.current(), 0);
    let values: Vec<_> = (0..6).map(|_| counter.increment_and_wrap()).collect();
    assert_eq!(values, vec![1, 2, 3, 0, 1, 2]);

    let mut single = SequenceCounter::new(0);
    assert_eq!(single.increment_and_wrap(), 0);
}

#[test]
fn test_registry_installs_default_lazily() -> Result<(), BoxDynError> {
    let registry = Registry::new();
    assert!(!registry.is_configured());
    let first = registry.next_id()?;
    assert!(registry.is_configured());
    let second = registry.next_id()?;
    assert_ne!(first, second);
    assert_eq!(
        registry.current()?.machine_id(),
        registry.current()?.machine_id()
    );

    assert!(registry.close()?.is_some());
    assert!(!registry.is_configured());
    Ok(())
}

#[tokio::test]
async fn test_registry_keeps_previous_on_failed_configure() -> Result<(), BoxDynError> {
    let registry = Registry::new();
    registry.configure(Builder::new().machine_id(11)).await?;

    let failed = registry
        .configure(Builder::new().bit_len_time(41).bit_len_machine_id(30))
        .await;
    assert!(matches!(failed, Err(Error::InvalidBitLength(..))));
    assert_eq!(registry.current()?.machine_id(), 11);

    registry.configure(Builder::new().machine_id(12)).await?;
    assert_eq!(registry.current()?.machine_id(), 12);
    Ok(())
}

#[test]
fn test_global_next_id() -> Result<(), BoxDynError> {
    let first = crate::next_id()?;
    let second = crate::next_id()?;
    assert_ne!(first, second);
    assert!(Registry::global().is_configured());
    Ok(())
}

// --- Performance Benchmarks ---
// These tests are ignored by default. Run with `cargo test -- --ignored`.

#[test]
#[ignore]
fn bench_single_thread_performance() -> Result<(), BoxDynError> {
    let sf = Snowflake::new()?;
    let iterations = 1_000_000;

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = sf.next_id()?;
    }
    let duration = start.elapsed();
    let rate = iterations as f64 / duration.as_secs_f64();

    println!(
        "Generated {} IDs in {:?}. Rate: {:.2} IDs/sec",
        iterations, duration, rate
    );

    Ok(())
}
