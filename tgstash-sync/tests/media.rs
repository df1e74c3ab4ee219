mod common;

use std::sync::Arc;

use tgstash_sync::media::CACHE_DIR;
use tgstash_sync::{ChatKind, ChatRecord, Materialized, Materializer, Remote};

use common::{JPEG, MockRemote, document, photo};

fn chat(name: &str) -> ChatRecord {
    ChatRecord {
        local_id:           1,
        remote_id:          42,
        access_hash:        7,
        display_name:       name.into(),
        username:           None,
        storage_name:       None,
        kind:               Some(ChatKind::Channel),
        last_downloaded_id: 0,
        enabled:            true,
    }
}

fn materializer(remote: &Arc<MockRemote>, root: &std::path::Path) -> Materializer {
    let remote: Arc<dyn Remote> = remote.clone();
    Materializer::new(remote, root)
}

#[tokio::test]
async fn second_call_does_not_download_again() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    let m = materializer(&remote, dir.path());
    let chat = chat("News");

    let first = m.materialize(&photo(11), &chat).await;
    let second = m.materialize(&photo(11), &chat).await;

    let target = dir.path().join("News").join("2024-05-01-11.jpg");
    assert_eq!(first, Materialized::Downloaded(target.clone()));
    assert_eq!(second, Materialized::AlreadyPresent(target));
    assert_eq!(remote.downloads(), 1);
}

#[tokio::test]
async fn existing_file_survives_a_restart_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let chat = chat("News");
    let target = dir.path().join("News").join("2024-05-01-11.jpg");

    materializer(&MockRemote::new(), dir.path()).materialize(&photo(11), &chat).await;
    std::fs::write(&target, b"kept").unwrap();

    // Fresh process: new remote, same download root.
    let remote = MockRemote::new();
    let result = materializer(&remote, dir.path()).materialize(&photo(11), &chat).await;

    assert_eq!(result, Materialized::AlreadyPresent(target.clone()));
    assert_eq!(remote.downloads(), 0);
    assert_eq!(std::fs::read(&target).unwrap(), b"kept");
}

#[tokio::test]
async fn photo_is_promoted_out_of_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    let chat = chat("Pics");

    materializer(&remote, dir.path()).materialize(&photo(5), &chat).await;

    let chat_dir = dir.path().join("Pics");
    assert_eq!(std::fs::read(chat_dir.join("2024-05-01-5.jpg")).unwrap(), JPEG);
    let leftovers: Vec<_> = std::fs::read_dir(chat_dir.join(CACHE_DIR)).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn photo_of_unknown_type_is_still_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    remote.set_body(b"not an image");

    let result = materializer(&remote, dir.path()).materialize(&photo(6), &chat("Pics")).await;

    assert!(matches!(result, Materialized::Downloaded(_)));
    assert!(dir.path().join("Pics").join("2024-05-01-6.jpg").exists());
}

#[tokio::test]
async fn documents_use_sender_name_and_storage_override() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    remote.set_body(b"%PDF-1.7");
    let mut chat = chat("Work Chat");
    chat.storage_name = Some("work".into());
    let m = materializer(&remote, dir.path());

    m.materialize(&document(8, Some("report.pdf"), "application/pdf"), &chat).await;
    m.materialize(&document(9, None, "video/mp4"), &chat).await;

    assert!(dir.path().join("work").join("report.pdf").exists());
    assert!(dir.path().join("work").join("2024-05-01-9.mp4").exists());
}

#[tokio::test]
async fn hostile_chat_title_stays_under_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    let m = materializer(&remote, dir.path());

    assert_eq!(m.chat_dir(&chat("../../etc")), dir.path().join("_.._etc"));
    assert_eq!(m.chat_dir(&chat("..")), dir.path().join("42"));
}

#[tokio::test]
async fn failed_download_leaves_no_final_file() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MockRemote::new();
    remote.fail_downloads(true);

    let result = materializer(&remote, dir.path()).materialize(&photo(3), &chat("News")).await;

    assert_eq!(result, Materialized::Failed);
    assert!(!dir.path().join("News").join("2024-05-01-3.jpg").exists());
}
