//! Group loop scheduling under paused time.
//!
//! The harness polls every 60s, backs off 1s without a donor and delays
//! ordinary deliveries by 300s. Assertions are taken between those ticks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use leasewatch_id::{SubscriberId, TierKey};
use leasewatch_testing::{items, Harness};
use leasewatch_watcher::catalog::CatalogError;
use leasewatch_watcher::group::GroupPhase;
use leasewatch_watcher::subscriber::EULA_NOT_ACCEPTED;
use tokio::time::{sleep, timeout, Instant};

fn tier(key: &str) -> TierKey {
    TierKey::new(key).unwrap()
}

async fn sleep_until(start: Instant, secs: u64) {
    tokio::time::sleep_until(start + Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_one_poll_per_cycle_for_whole_group() {
    let h = Harness::new();
    for credential in ["a", "b", "c"] {
        h.catalog.set_tier(credential, "gold");
    }
    h.catalog.set_items("gold", items(&["x", "y"]));

    let start = Instant::now();
    h.registered(1, "a").await;
    h.registered(2, "b").await;
    h.registered(3, "c").await;

    // Polls at 0, 60 and 120
    sleep_until(start, 150).await;
    assert_eq!(h.catalog.fetch_count(), 3);
    assert_eq!(h.metrics.requests("gold"), 3);
    assert_eq!(h.registry.group_keys().await, vec![tier("gold")]);

    let group = h.registry.group(&tier("gold")).await.unwrap();
    assert_eq!(group.member_count().await, 3);
    assert_eq!(group.current_items().await.len(), 2);
    assert_eq!(h.metrics.group_items("gold"), Some(2));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_donor_rotates_between_members() {
    let h = Harness::new();
    for credential in ["a", "b", "c"] {
        h.catalog.set_tier(credential, "gold");
    }
    h.registered(1, "a").await;
    h.registered(2, "b").await;
    h.registered(3, "c").await;

    sleep(Duration::from_secs(30 * 60 + 30)).await;

    let donors: HashSet<String> = h.catalog.fetch_calls().into_iter().collect();
    assert!(donors.len() > 1, "only {donors:?} were used as donor");

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_groups_are_separated_by_tier() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_tier("b", "silver");
    h.catalog.set_items("gold", items(&["g1", "g2"]));
    h.catalog.set_items("silver", items(&["s1"]));

    h.registered(1, "a").await;
    h.registered(2, "b").await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(
        h.registry.group_keys().await,
        vec![tier("gold"), tier("silver")]
    );
    let items = h.registry.items().await;
    assert_eq!(items["gold"].len(), 2);
    assert_eq!(items["silver"].len(), 1);

    let states = h.registry.states().await;
    assert_eq!(states["gold"].member_count, 1);
    assert!(states["silver"].active);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ordinary_delivery_waits_privileged_does_not() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_tier("b", "gold");

    let start = Instant::now();
    h.registered(1, "a").await;
    let privileged = h.subscriber(2, "b").await;
    privileged.lock().await.is_privileged = true;
    h.registry.register(Arc::clone(&privileged)).await.unwrap();

    // Nothing to announce until the catalog changes; the next poll is at 60
    sleep_until(start, 30).await;
    h.catalog.set_items("gold", items(&["x"]));

    sleep_until(start, 90).await;
    let fast = h.transport.sent_to(SubscriberId::new(2));
    assert!(!fast.is_empty());
    assert!(fast[0].at >= start + Duration::from_secs(60));
    assert!(h.transport.sent_to(SubscriberId::new(1)).is_empty());

    sleep_until(start, 350).await;
    assert!(h.transport.sent_to(SubscriberId::new(1)).is_empty());

    sleep_until(start, 370).await;
    let slow = h.transport.sent_to(SubscriberId::new(1));
    assert!(!slow.is_empty());
    assert!(slow[0].at >= start + Duration::from_secs(360));
    assert_eq!(slow[0].text, "0 -> 1 (+1, -0)");
    assert_eq!(h.metrics.messages_sent("user-1"), slow.len());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_throttled_updates_leave_frame_untouched() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_items("gold", items(&["x"]));

    let start = Instant::now();
    let wall_start = h.ctx.clock.now();
    let handle = h.subscriber(1, "a").await;
    handle.lock().await.throttle = Duration::from_secs(10 * 60);
    h.registry.register(Arc::clone(&handle)).await.unwrap();

    sleep_until(start, 30).await;
    h.catalog.set_items("gold", items(&["x", "y"]));

    // Polls at 60..=300 fall inside the window
    sleep_until(start, 330).await;
    {
        let subscriber = handle.lock().await;
        assert_eq!(subscriber.last_frame.current.len(), 1);
        assert_eq!(subscriber.last_frame.captured_at, Some(wall_start));
    }

    sleep_until(start, 700).await;
    let subscriber = handle.lock().await;
    assert_eq!(subscriber.last_frame.current.len(), 2);
    assert_eq!(subscriber.last_frame.added.len(), 1);
    let applied = subscriber.last_frame.captured_at.unwrap();
    assert!(applied - wall_start >= chrono::Duration::seconds(600));
    drop(subscriber);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_tier_change_moves_member_to_one_group() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_tier("b", "gold");

    // Enabled but never a donor
    let bystander = h.subscriber(1, "a").await;
    bystander.lock().await.eula_accepted = false;
    h.registry.register(Arc::clone(&bystander)).await.unwrap();
    let mover = h.registered(2, "b").await;

    sleep(Duration::from_secs(30)).await;
    h.catalog.set_tier("b", "silver");

    let id = SubscriberId::new(2);
    for _ in 0..30 {
        sleep(Duration::from_secs(10)).await;
        assert!(h.registry.groups_containing(id).await.len() <= 1);
    }

    assert_eq!(h.registry.groups_containing(id).await, vec![tier("silver")]);
    assert_eq!(h.registry.membership_of(id).await, Some(tier("silver")));
    assert_eq!(mover.lock().await.tier_key, Some(tier("silver")));
    assert_eq!(
        h.registry.group_keys().await,
        vec![tier("gold"), tier("silver")]
    );

    let gold = h.registry.group(&tier("gold")).await.unwrap();
    assert_eq!(gold.member_ids().await, vec![SubscriberId::new(1)]);
    assert_eq!(
        bystander.lock().await.watcher_error.as_deref(),
        Some(EULA_NOT_ACCEPTED)
    );

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_group_makes_no_catalog_calls() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.registered(1, "a").await;
    h.registry.unregister(SubscriberId::new(1)).await;

    sleep(Duration::from_secs(1)).await;
    let calls = h.catalog.total_calls();

    sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(h.catalog.total_calls(), calls);

    let group = h.registry.group(&tier("gold")).await.unwrap();
    let status = group.status().await;
    assert_eq!(status.member_count, 0);
    assert_eq!(status.phase, GroupPhase::Idle);
    assert!(h.registry.membership_of(SubscriberId::new(1)).await.is_none());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credential_disables_only_its_owner() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_tier("b", "gold");

    let owner = h.registered(1, "a").await;
    let other = h.subscriber(2, "b").await;
    other.lock().await.eula_accepted = false;
    h.registry.register(Arc::clone(&other)).await.unwrap();

    h.catalog
        .fail_tier("a", CatalogError::Unauthorized("token expired".to_string()));
    sleep(Duration::from_secs(90)).await;

    {
        let owner = owner.lock().await;
        assert!(!owner.notifications_enabled);
        assert!(owner.watcher_error.as_deref().unwrap().contains("token expired"));
    }
    assert!(other.lock().await.notifications_enabled);
    assert!(h.metrics.failures("gold") >= 1);

    let saved = h.store.saved(SubscriberId::new(1)).unwrap();
    assert!(!saved.notifications_enabled);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failure_keeps_previous_snapshot() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_items("gold", items(&["x"]));

    let handle = h.registered(1, "a").await;
    sleep(Duration::from_secs(30)).await;

    h.catalog
        .fail_fetch("a", CatalogError::Transient("upstream 502".to_string()));
    sleep(Duration::from_secs(60)).await;

    let group = h.registry.group(&tier("gold")).await.unwrap();
    assert_eq!(group.current_items().await.len(), 1);
    assert!(handle.lock().await.notifications_enabled);
    assert!(h.metrics.failures("gold") >= 1);

    // Constant retry: the next cycle polls again
    h.catalog.heal("a");
    let before = h.catalog.fetch_count();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.catalog.fetch_count(), before + 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_ends_every_loop() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    h.catalog.set_tier("b", "silver");
    h.registered(1, "a").await;
    h.registered(2, "b").await;
    sleep(Duration::from_secs(30)).await;

    h.registry.stop_all().await;
    let calls = h.catalog.total_calls();

    for (key, status) in h.registry.states().await {
        assert_eq!(status.phase, GroupPhase::Stopped, "group {key}");
        assert!(!status.active);
    }

    sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(h.catalog.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_stop_right_after_group_creation() {
    let h = Harness::new();
    h.catalog.set_tier("a", "gold");
    let handle = h.registered(1, "a").await;

    // The silver group is spawned here and stopped before it ever ran
    h.registry.reallocate(handle, tier("silver")).await;
    timeout(Duration::from_secs(60), h.registry.stop_all())
        .await
        .expect("every group loop exited");

    let states = h.registry.states().await;
    assert_eq!(states.len(), 2);
    for (key, status) in states {
        assert_eq!(status.phase, GroupPhase::Stopped, "group {key}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_tier_drift_reallocates_once_per_detection() {
    let h = Harness::new();
    for credential in ["a", "b", "c", "d"] {
        h.catalog.set_tier(credential, "gold");
    }

    // Two members that are always skipped, two that drift
    for (id, credential) in [(1, "a"), (2, "b")] {
        let bystander = h.subscriber(id, credential).await;
        bystander.lock().await.eula_accepted = false;
        h.registry.register(bystander).await.unwrap();
    }
    h.registered(3, "c").await;
    h.registered(4, "d").await;
    sleep(Duration::from_secs(30)).await;
    assert!(h.metrics.reallocations("user-3").is_empty());

    h.catalog.set_tier("c", "silver");
    h.catalog.set_tier("d", "silver");

    // Gold now has no donor and retries every second
    sleep(Duration::from_secs(10 * 60)).await;

    assert_eq!(h.metrics.reallocations("user-3"), vec!["silver".to_string()]);
    assert_eq!(h.metrics.reallocations("user-4"), vec!["silver".to_string()]);
    assert!(h.metrics.reallocations("user-1").is_empty());

    let gold = h.registry.group(&tier("gold")).await.unwrap();
    assert_eq!(
        gold.member_ids().await,
        vec![SubscriberId::new(1), SubscriberId::new(2)]
    );
    let silver = h.registry.group(&tier("silver")).await.unwrap();
    assert_eq!(
        silver.member_ids().await,
        vec![SubscriberId::new(3), SubscriberId::new(4)]
    );

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_persists_once_per_cycle() {
    let h = Harness::new();
    for credential in ["a", "b", "c"] {
        h.catalog.set_tier(credential, "gold");
    }
    h.catalog.set_items("gold", items(&["x"]));

    let start = Instant::now();
    h.registered(1, "a").await;
    h.registered(2, "b").await;
    h.registered(3, "c").await;

    sleep_until(start, 30).await;
    let before = h.store.save_count();
    h.catalog.set_items("gold", items(&["x", "y"]));

    // One poll at 60
    sleep_until(start, 90).await;
    assert_eq!(h.store.save_count(), before + 1);
    for id in 1..=3 {
        let saved = h.store.saved(SubscriberId::new(id)).unwrap();
        assert_eq!(saved.last_frame.current.len(), 2, "subscriber {id}");
    }

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_credential_change_during_tier_refresh_wins() {
    let h = Harness::new();
    h.catalog.set_tier("old", "gold");
    h.catalog.set_tier("new", "silver");
    h.catalog.delay_tier("old", Duration::from_secs(20));

    // Registered at 20, first poll at 40, next lookup runs from 100 to 120
    let start = Instant::now();
    let handle = h.registered(1, "old").await;
    sleep_until(start, 110).await;
    assert_eq!(h.catalog.fetch_calls(), vec!["old".to_string()]);

    // Replace the credential while the lookup is in flight, as /settoken does
    handle.lock().await.credential = Some("new".to_string());
    h.registry.register(Arc::clone(&handle)).await.unwrap();

    sleep_until(start, 400).await;
    assert_eq!(handle.lock().await.tier_key, Some(tier("silver")));
    assert_eq!(
        h.registry.groups_containing(SubscriberId::new(1)).await,
        vec![tier("silver")]
    );
    let stale = h.catalog.fetch_calls().iter().filter(|c| *c == "old").count();
    assert_eq!(stale, 1);
    assert_eq!(&h.catalog.tier_calls()[..3], &["old", "old", "old"]);
    assert!(h.metrics.reallocations("user-1").is_empty());

    h.shutdown().await;
}
