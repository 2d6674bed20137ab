//! Acceptance guard: at most one task per ride, under concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use ride_dispatch::models::{NewDriver, NewTask};
use ride_dispatch::orchestration::{AcceptError, AcceptanceGuard};
use ride_dispatch::registry::{DriverRegistry, InMemoryDriverRegistry};

async fn registry_with_drivers(count: usize) -> (Arc<InMemoryDriverRegistry>, Vec<i64>) {
    let registry = Arc::new(InMemoryDriverRegistry::new());
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let driver = registry
            .create_driver(NewDriver::new(
                format!("Driver {n}"),
                format!("driver{n}@example.com"),
                format!("+77000000{n:02}"),
            ))
            .await
            .unwrap();
        ids.push(driver.id);
    }
    (registry, ids)
}

#[tokio::test]
async fn test_accept_creates_task_and_confirms() {
    let (registry, drivers) = registry_with_drivers(1).await;
    let guard = AcceptanceGuard::new(registry.clone(), true);

    let confirmation = guard.accept(drivers[0], 42).await.unwrap();
    assert_eq!(confirmation.driver_id, drivers[0]);
    assert_eq!(confirmation.ride_id, 42);
    assert_eq!(
        confirmation.message,
        format!("Driver {} accepted the ride 42", drivers[0])
    );

    let task = registry.get_task_by_ride(42).await.unwrap().unwrap();
    assert_eq!(task.id, confirmation.task_id);
    assert_eq!(task.driver_id, drivers[0]);
    assert_eq!(guard.locked_rides(), 0);
}

#[tokio::test]
async fn test_unknown_driver() {
    let (registry, _) = registry_with_drivers(0).await;
    let guard = AcceptanceGuard::new(registry.clone(), true);

    let err = guard.accept(99, 42).await.unwrap_err();
    assert!(matches!(err, AcceptError::DriverNotFound { driver_id: 99 }));
    assert_eq!(registry.task_count(), 0);
}

#[tokio::test]
async fn test_blocked_driver_never_gets_a_task() {
    let (registry, drivers) = registry_with_drivers(1).await;
    registry.set_blocked(drivers[0], true).unwrap();
    let guard = AcceptanceGuard::new(registry.clone(), true);

    let err = guard.accept(drivers[0], 42).await.unwrap_err();
    assert!(matches!(err, AcceptError::DriverBlocked { .. }));
    assert!(!err.is_retryable());
    assert_eq!(registry.task_count(), 0);
}

#[tokio::test]
async fn test_second_accept_is_already_accepted() {
    let (registry, drivers) = registry_with_drivers(2).await;
    let guard = AcceptanceGuard::new(registry.clone(), true);

    guard.accept(drivers[0], 42).await.unwrap();
    let err = guard.accept(drivers[1], 42).await.unwrap_err();

    assert!(matches!(err, AcceptError::AlreadyAccepted { ride_id: 42 }));
    assert_eq!(err.to_string(), "Ride has been already accepted RideID=42");
}

#[tokio::test]
async fn test_task_recorded_by_another_instance() {
    let (registry, drivers) = registry_with_drivers(1).await;
    registry
        .insert_task(NewTask { driver_id: 500, ride_id: 42 })
        .unwrap();
    let guard = AcceptanceGuard::new(registry.clone(), true);

    let err = guard.accept(drivers[0], 42).await.unwrap_err();
    assert!(matches!(err, AcceptError::AlreadyAccepted { ride_id: 42 }));
}

#[tokio::test]
async fn test_failed_transaction_is_retryable_conflict() {
    let (registry, drivers) = registry_with_drivers(1).await;
    registry.fail_task_creates(1);
    let guard = AcceptanceGuard::new(registry.clone(), true);

    let err = guard.accept(drivers[0], 42).await.unwrap_err();
    assert!(matches!(err, AcceptError::AcceptConflict { ride_id: 42 }));
    assert!(err.is_retryable());
    assert_eq!(registry.task_count(), 0);

    // Retrying succeeds
    guard.accept(drivers[0], 42).await.unwrap();
    assert_eq!(registry.task_count(), 1);
}

#[tokio::test]
async fn test_stalled_create_is_bounded_and_releases_ride_lock() {
    let (registry, drivers) = registry_with_drivers(2).await;
    registry.set_task_create_delay(Some(Duration::from_secs(3)));
    let guard = Arc::new(
        AcceptanceGuard::new(registry.clone(), true).with_store_timeout(Duration::from_millis(100)),
    );

    let started = Instant::now();
    let first = tokio::spawn({
        let guard = Arc::clone(&guard);
        let driver = drivers[0];
        async move { guard.accept(driver, 42).await }
    });
    let second = tokio::spawn({
        let guard = Arc::clone(&guard);
        let driver = drivers[1];
        async move { guard.accept(driver, 42).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert!(started.elapsed() < Duration::from_secs(1));
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, AcceptError::AcceptConflict { ride_id: 42 }));
        assert!(err.is_retryable());
    }
    assert_eq!(registry.task_count(), 0);
    assert_eq!(guard.locked_rides(), 0);

    // Once the store recovers the retry goes through
    registry.set_task_create_delay(None);
    let confirmation = guard.accept(drivers[1], 42).await.unwrap();
    assert_eq!(confirmation.driver_id, drivers[1]);
}

#[tokio::test]
async fn test_same_driver_accepting_twice_concurrently() {
    let (registry, drivers) = registry_with_drivers(1).await;
    registry.set_task_create_delay(Some(Duration::from_millis(30)));
    let guard = Arc::new(AcceptanceGuard::new(registry.clone(), true));
    let driver = drivers[0];

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.accept(driver, 42).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].driver_id, driver);
    assert_eq!(winners[0].ride_id, 42);
    assert_eq!(
        winners[0].message,
        format!("Driver {driver} accepted the ride 42")
    );

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, AcceptError::AlreadyAccepted { ride_id: 42 }));
    assert_eq!(registry.task_count(), 1);
}

#[tokio::test]
async fn test_concurrent_accepts_with_local_lock() {
    let (registry, drivers) = registry_with_drivers(2).await;
    registry.set_task_create_delay(Some(Duration::from_millis(30)));
    let guard = Arc::new(AcceptanceGuard::new(registry.clone(), true));

    let first = tokio::spawn({
        let guard = Arc::clone(&guard);
        let driver = drivers[0];
        async move { guard.accept(driver, 42).await }
    });
    let second = tokio::spawn({
        let guard = Arc::clone(&guard);
        let driver = drivers[1];
        async move { guard.accept(driver, 42).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].ride_id, 42);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, AcceptError::AlreadyAccepted { ride_id: 42 }));

    assert_eq!(registry.task_count(), 1);
    assert_eq!(guard.locked_rides(), 0);
}

#[tokio::test]
async fn test_concurrent_accepts_without_local_lock_rely_on_store() {
    let (registry, drivers) = registry_with_drivers(2).await;
    registry.set_task_create_delay(Some(Duration::from_millis(30)));
    let guard = Arc::new(AcceptanceGuard::new(registry.clone(), false));

    let handles: Vec<_> = drivers
        .iter()
        .map(|&driver| {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.accept(driver, 42).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AcceptError::AlreadyAccepted { .. }) | Err(AcceptError::AcceptConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(registry.task_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However accepts interleave, each ride gets exactly one task and exactly one winner
    #[test]
    fn prop_at_most_one_task_per_ride(
        attempts in prop::collection::vec((0usize..4, 1i64..=3), 1..24),
        local_lock in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let (wins, tasks_by_ride, task_count) = runtime.block_on(async {
            let (registry, drivers) = registry_with_drivers(4).await;
            registry.set_task_create_delay(Some(Duration::from_millis(1)));
            let guard = Arc::new(AcceptanceGuard::new(registry.clone(), local_lock));

            let handles: Vec<_> = attempts
                .iter()
                .map(|&(driver_index, ride_id)| {
                    let guard = Arc::clone(&guard);
                    let driver = drivers[driver_index];
                    tokio::spawn(async move { (ride_id, guard.accept(driver, ride_id).await) })
                })
                .collect();

            let mut wins: HashMap<i64, usize> = HashMap::new();
            for handle in handles {
                let (ride_id, result) = handle.await.unwrap();
                match result {
                    Ok(confirmation) => {
                        assert_eq!(confirmation.ride_id, ride_id);
                        *wins.entry(ride_id).or_default() += 1;
                    }
                    Err(AcceptError::AlreadyAccepted { .. }) | Err(AcceptError::AcceptConflict { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let mut tasks_by_ride = HashMap::new();
            for ride_id in 1..=3 {
                if let Some(task) = registry.get_task_by_ride(ride_id).await.unwrap() {
                    tasks_by_ride.insert(ride_id, task.driver_id);
                }
            }
            (wins, tasks_by_ride, registry.task_count())
        });

        let attempted: std::collections::HashSet<i64> = attempts.iter().map(|(_, r)| *r).collect();
        prop_assert_eq!(task_count, tasks_by_ride.len());
        for ride_id in attempted {
            prop_assert_eq!(wins.get(&ride_id).copied(), Some(1));
            prop_assert!(tasks_by_ride.contains_key(&ride_id));
        }
    }
}
