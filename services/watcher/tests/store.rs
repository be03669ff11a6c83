//! SQLite store on disk.

use std::collections::HashMap;
use std::sync::Arc;

use leasewatch_id::{SubscriberId, TierKey};
use leasewatch_snapshot::UpdateFrame;
use leasewatch_testing::items;
use leasewatch_watcher::directory::SubscriberDirectory;
use leasewatch_watcher::store::{SqliteSubscriberStore, SubscriberStore};
use leasewatch_watcher::subscriber::Subscriber;
use tempfile::TempDir;

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leasewatch.sqlite");

    let mut alice = Subscriber::new(SubscriberId::new(1), "alice");
    alice.credential = Some("token-a".to_string());
    alice.tier_key = Some(TierKey::new("gold").unwrap());
    alice.filters = vec!["lt .attributes.price 400".to_string()];
    alice.last_frame = UpdateFrame::empty().advance(items(&["x", "y"]), chrono::Utc::now());

    {
        let store = SqliteSubscriberStore::open(&path).unwrap();
        store
            .save_all(&HashMap::from([(alice.id, alice.clone())]))
            .unwrap();
    }

    let store = SqliteSubscriberStore::open(&path).unwrap();
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[&alice.id], alice);
    assert_eq!(loaded[&alice.id].last_frame.current.len(), 2);
}

#[tokio::test]
async fn test_directory_round_trip_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leasewatch.sqlite");

    {
        let store = Arc::new(SqliteSubscriberStore::open(&path).unwrap());
        let directory = SubscriberDirectory::new(store);
        let (handle, _) = directory
            .get_or_insert(Subscriber::new(SubscriberId::new(7), "bob"))
            .await;
        handle.lock().await.notifications_enabled = true;
        directory.persist().await.unwrap();
    }

    let store = Arc::new(SqliteSubscriberStore::open(&path).unwrap());
    let directory = SubscriberDirectory::load(store).await.unwrap();
    let enabled = directory.enabled().await;
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].lock().await.friendly_name, "bob");
}
