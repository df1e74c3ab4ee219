mod common;

use std::collections::HashMap;
use std::time::Duration;

use tgstash_sync::settings::{MAX_UPDATE_INTERVAL, keys};
use tgstash_sync::{RemoteError, Settings, SyncMode};
use tokio_util::sync::CancellationToken;

use common::store;

fn changes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn setup_seeds_defaults_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let settings = Settings::load(store.clone()).unwrap();
    assert_eq!(settings.get(keys::USE_LIVE_UPDATE).as_deref(), Some("false"));
    assert_eq!(settings.get(keys::UPDATE_INTERVAL).as_deref(), Some("60"));
    assert_eq!(settings.get(keys::API_ID).as_deref(), Some(""));

    settings.update(&changes(&[(keys::UPDATE_INTERVAL, "15")])).unwrap();
    store.setup().unwrap();
    assert_eq!(store.load_settings().unwrap()[keys::UPDATE_INTERVAL], "15");
}

#[test]
fn update_writes_only_known_keys_that_differ() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let settings = Settings::load(store.clone()).unwrap();

    let written = settings
        .update(&changes(&[
            (keys::USE_LIVE_UPDATE, "false"),
            (keys::UPDATE_INTERVAL, "5"),
            ("not_a_setting", "x"),
        ]))
        .unwrap();

    assert_eq!(written, 1);
    let persisted = store.load_settings().unwrap();
    assert_eq!(persisted[keys::UPDATE_INTERVAL], "5");
    assert!(!persisted.contains_key("not_a_setting"));
    assert_eq!(settings.get(keys::UPDATE_INTERVAL).as_deref(), Some("5"));
}

#[test]
fn mode_follows_settings() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(store(dir.path())).unwrap();
    assert_eq!(settings.mode(), SyncMode::Polling { interval: Duration::from_secs(3600) });

    settings.update(&changes(&[(keys::UPDATE_INTERVAL, "2.5")])).unwrap();
    assert_eq!(settings.mode(), SyncMode::Polling { interval: Duration::from_secs(150) });

    settings.update(&changes(&[(keys::UPDATE_INTERVAL, "soon")])).unwrap();
    assert_eq!(settings.update_interval(), Duration::from_secs(3600));

    settings.update(&changes(&[(keys::USE_LIVE_UPDATE, "true")])).unwrap();
    assert_eq!(settings.mode(), SyncMode::Live);
}

#[test]
fn huge_intervals_fall_back_or_clamp_instead_of_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(store(dir.path())).unwrap();

    for unrepresentable in ["1e300", "inf", "NaN", "1e-300"] {
        settings.update(&changes(&[(keys::UPDATE_INTERVAL, unrepresentable)])).unwrap();
        assert_eq!(settings.mode(), SyncMode::Polling { interval: Duration::from_secs(3600) }, "{unrepresentable}");
    }

    settings.update(&changes(&[(keys::UPDATE_INTERVAL, "1e9")])).unwrap();
    assert_eq!(settings.update_interval(), MAX_UPDATE_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn wait_picks_up_values_written_by_another_process() {
    let dir = tempfile::tempdir().unwrap();
    let waiting = Settings::load(store(dir.path())).unwrap();
    let operator = Settings::load(store(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    let task = {
        let waiting = waiting.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { waiting.wait_for(keys::API_ID, &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!task.is_finished());

    operator.update(&changes(&[(keys::API_ID, "12345")])).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(task.await.unwrap().unwrap(), "12345");
    assert_eq!(waiting.get(keys::API_ID).as_deref(), Some("12345"));
}

#[tokio::test]
async fn wait_wakes_on_in_process_update() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(store(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    let task = {
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { settings.wait_for(keys::PHONE_NUMBER, &cancel).await })
    };
    tokio::task::yield_now().await;
    settings.update(&changes(&[(keys::PHONE_NUMBER, "+100200300")])).unwrap();

    let value = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    assert_eq!(value, "+100200300");
}

#[tokio::test(start_paused = true)]
async fn wait_ends_on_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(store(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    let task = {
        let settings = settings.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { settings.wait_for(keys::PASSWORD, &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    assert!(matches!(task.await.unwrap(), Err(RemoteError::Cancelled)));
}
