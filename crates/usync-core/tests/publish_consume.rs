//! End-to-end publish/consume against the in-memory relay and store.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use usync_core::access::{AccessSpec, Credentials, ShareHandle};
use usync_core::config::UsyncConfig;
use usync_core::crypto::{Actor, FolderKeys};
use usync_core::error::CoreError;
use usync_core::relay::{MemoryRelay, Relay};
use usync_core::store::Store;
use usync_core::workflow::{add_folder, consume_share, publish_folder, PublishOptions};

struct TestEnv {
    store: Store,
    relay: Arc<MemoryRelay>,
    relay_dyn: Arc<dyn Relay>,
    actor: Actor,
    cfg: UsyncConfig,
    src: tempfile::TempDir,
    dst: tempfile::TempDir,
}

async fn env() -> TestEnv {
    let relay = Arc::new(MemoryRelay::new());
    let relay_dyn: Arc<dyn Relay> = relay.clone();
    TestEnv {
        store: Store::open_memory().await.unwrap(),
        relay,
        relay_dyn,
        actor: Actor::new("tester@local", [7u8; 32]),
        cfg: UsyncConfig {
            segment_size: 4096,
            upload_workers: 3,
            download_workers: 3,
            scanner_workers: 4,
            ..UsyncConfig::default()
        },
        src: tempfile::tempdir().unwrap(),
        dst: tempfile::tempdir().unwrap(),
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Deterministic pseudo-random bytes (xorshift), no RNG dependency needed.
fn noise(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        out.extend_from_slice(&seed.to_le_bytes());
    }
    out.truncate(len);
    out
}

async fn setup_folder(env: &TestEnv) -> String {
    add_folder(&env.store, &env.actor, env.src.path(), "docs")
        .await
        .unwrap()
}

async fn publish(env: &TestEnv, folder_id: &str, access: AccessSpec) -> ShareHandle {
    let options = PublishOptions {
        access,
        newsgroups: None,
        expires_at: None,
    };
    publish_folder(
        &env.store,
        &env.relay_dyn,
        &env.actor,
        folder_id,
        options,
        &env.cfg,
        None,
        None,
    )
    .await
    .unwrap()
    .handle
}

async fn consume(
    env: &TestEnv,
    handle: &ShareHandle,
    credentials: &Credentials,
    dest: &Path,
) -> Result<usync_core::ConsumeReport, CoreError> {
    consume_share(
        &env.store,
        &env.relay_dyn,
        handle,
        credentials,
        dest,
        None,
        &env.cfg,
        None,
        None,
    )
    .await
}

fn assert_file_eq(dest: &Path, rel: &str, expected: &[u8]) {
    let got = fs::read(dest.join(rel)).unwrap();
    assert_eq!(got.len(), expected.len(), "size mismatch for {rel}");
    assert_eq!(got, expected, "content mismatch for {rel}");
}

#[tokio::test]
async fn public_share_roundtrip() {
    let env = env().await;
    let big = noise(100_000, 42);
    write(env.src.path(), "a.txt", b"hello");
    write(env.src.path(), "sub/b.bin", &big);

    let folder_id = setup_folder(&env).await;
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;

    // Handle string survives its text form.
    let encoded = handle.encode();
    let decoded = ShareHandle::decode(&encoded).unwrap();
    assert_eq!(decoded, handle);

    let dest = env.dst.path().join("out");
    let report = consume(&env, &decoded, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.files.len(), 2);
    assert_file_eq(&dest, "a.txt", b"hello");
    assert_file_eq(&dest, "sub/b.bin", &big);
    // Clean finish clears the staging area.
    assert!(!dest.join(".usync-staging").exists());
}

#[tokio::test]
async fn empty_folder_roundtrip() {
    let env = env().await;
    let folder_id = setup_folder(&env).await;
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;

    let dest = env.dst.path().join("out");
    let report = consume(&env, &handle, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(report.files.is_empty());
    assert!(report.is_complete());
    assert!(dest.is_dir());
}

#[tokio::test]
async fn single_short_file_is_one_segment() {
    let env = env().await;
    write(env.src.path(), "tiny.txt", b"just a few bytes");
    let folder_id = setup_folder(&env).await;
    publish(&env, &folder_id, AccessSpec::Public).await;

    // One segment article plus the index article.
    assert_eq!(env.relay.article_count(), 2);
}

#[tokio::test]
async fn exact_multiple_has_no_short_segment() {
    let env = env().await;
    write(env.src.path(), "even.bin", &noise(3 * 4096, 9));
    let folder_id = setup_folder(&env).await;
    publish(&env, &folder_id, AccessSpec::Public).await;

    // Three segment articles plus the index article.
    assert_eq!(env.relay.article_count(), 4);
}

#[tokio::test]
async fn protected_share_requires_password() {
    let env = env().await;
    write(env.src.path(), "a.txt", b"top secret");
    let folder_id = setup_folder(&env).await;
    let handle = publish(
        &env,
        &folder_id,
        AccessSpec::Protected {
            password: "p@ss".into(),
        },
    )
    .await;

    let dest = env.dst.path().join("none");
    assert!(matches!(
        consume(&env, &handle, &Credentials::Anonymous, &dest).await,
        Err(CoreError::AccessDenied)
    ));
    assert!(matches!(
        consume(&env, &handle, &Credentials::Password("wrong".into()), &dest).await,
        Err(CoreError::AccessDenied)
    ));

    let dest = env.dst.path().join("ok");
    let report = consume(&env, &handle, &Credentials::Password("p@ss".into()), &dest)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_file_eq(&dest, "a.txt", b"top secret");
}

#[tokio::test]
async fn private_share_and_forward_only_revocation() {
    let env = env().await;
    write(env.src.path(), "a.txt", b"for the chosen");
    let folder_id = setup_folder(&env).await;

    let old_handle = publish(
        &env,
        &folder_id,
        AccessSpec::Private {
            user_ids: vec!["u1".into(), "u2".into()],
        },
    )
    .await;

    // Recipients hold the folder root, conveyed when access was granted.
    let (enc_signing, enc_root) = env.store.get_folder_keys(&folder_id).await.unwrap().unwrap();
    let keys = FolderKeys::unseal(&env.actor, &folder_id, &enc_signing, &enc_root).unwrap();
    let root = *keys.root();
    let as_user = |id: &str| Credentials::User {
        user_id: id.into(),
        folder_root: root,
    };

    let dest = env.dst.path().join("u2");
    let report = consume(&env, &old_handle, &as_user("u2"), &dest).await.unwrap();
    assert!(report.is_complete());
    assert_file_eq(&dest, "a.txt", b"for the chosen");

    assert!(matches!(
        consume(&env, &old_handle, &as_user("u3"), &env.dst.path().join("u3")).await,
        Err(CoreError::AccessDenied)
    ));

    // Re-publish omitting u2: the new share denies them, the old one stays
    // readable (the relay is append-only).
    let new_handle = publish(
        &env,
        &folder_id,
        AccessSpec::Private {
            user_ids: vec!["u1".into()],
        },
    )
    .await;
    assert_ne!(new_handle.share_id, old_handle.share_id);
    assert!(matches!(
        consume(&env, &new_handle, &as_user("u2"), &env.dst.path().join("new-u2")).await,
        Err(CoreError::AccessDenied)
    ));
    let again = env.dst.path().join("old-u2");
    let report = consume(&env, &old_handle, &as_user("u2"), &again).await.unwrap();
    assert!(report.is_complete());
}

#[tokio::test]
async fn private_share_with_no_recipients_is_rejected() {
    let env = env().await;
    write(env.src.path(), "a.txt", b"x");
    let folder_id = setup_folder(&env).await;
    let result = publish_folder(
        &env.store,
        &env.relay_dyn,
        &env.actor,
        &folder_id,
        PublishOptions {
            access: AccessSpec::Private { user_ids: vec![] },
            newsgroups: None,
            expires_at: None,
        },
        &env.cfg,
        None,
        None,
    )
    .await;
    assert!(matches!(result, Err(CoreError::InvalidFormat(_))));
}

#[tokio::test]
async fn replicas_recover_lost_originals() {
    let mut env = env().await;
    env.cfg.redundancy_level = 2;
    let payload = noise(20_000, 7);
    write(env.src.path(), "data.bin", &payload);
    let folder_id = setup_folder(&env).await;
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;

    // The relay loses every original (replica 0) segment article.
    let files = env.store.latest_files(&folder_id).await.unwrap();
    for file in files {
        for seg in env.store.segments_for_file(file.file_id).await.unwrap() {
            if seg.replica_index == 0 {
                env.relay.lose(seg.message_id.as_deref().unwrap());
            }
        }
    }

    let dest = env.dst.path().join("out");
    let report = consume(&env, &handle, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_file_eq(&dest, "data.bin", &payload);
}

#[tokio::test]
async fn all_replicas_lost_reports_incomplete_file() {
    let env = env().await;
    write(env.src.path(), "gone.bin", &noise(10_000, 3));
    write(env.src.path(), "kept.txt", b"survives");
    let folder_id = setup_folder(&env).await;
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;

    // Lose every article of gone.bin (no replicas configured).
    let files = env.store.latest_files(&folder_id).await.unwrap();
    for file in files {
        if file.relative_path == "gone.bin" {
            for seg in env.store.segments_for_file(file.file_id).await.unwrap() {
                env.relay.lose(seg.message_id.as_deref().unwrap());
            }
        }
    }

    let dest = env.dst.path().join("out");
    let report = consume(&env, &handle, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(!report.is_complete());
    let gone = report.files.iter().find(|f| f.path == "gone.bin").unwrap();
    assert!(!gone.missing_segments.is_empty());
    assert_eq!(gone.written_bytes, 0);
    assert!(!dest.join("gone.bin").exists());
    // The intact sibling is unaffected.
    assert_file_eq(&dest, "kept.txt", b"survives");
}

#[tokio::test]
async fn transient_post_failures_retry_with_stable_message_ids() {
    let env = env().await;
    write(env.src.path(), "a.bin", &noise(12_000, 11));
    let folder_id = setup_folder(&env).await;

    env.relay.fail_next_posts(2);
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;

    // Each segment lives under exactly one Message-ID despite the retries.
    let files = env.store.latest_files(&folder_id).await.unwrap();
    let mut ids = HashSet::new();
    for file in &files {
        for seg in env.store.segments_for_file(file.file_id).await.unwrap() {
            let id = seg.message_id.expect("posted segment has message id");
            assert!(env.relay.contains(&id), "article missing for {id}");
            assert!(ids.insert(id), "duplicate message id");
        }
    }

    let dest = env.dst.path().join("out");
    let report = consume(&env, &handle, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(report.is_complete());
}

#[tokio::test]
async fn modified_file_republish_keeps_old_share_intact() {
    let env = env().await;
    write(env.src.path(), "a.txt", b"hello");
    write(env.src.path(), "b.txt", b"constant");
    let folder_id = setup_folder(&env).await;
    let old_handle = publish(&env, &folder_id, AccessSpec::Public).await;

    // Edit one file (and push its mtime back so the change is visible even
    // on coarse filesystem clocks).
    write(env.src.path(), "a.txt", b"hello2");
    let past = std::time::SystemTime::now() - std::time::Duration::from_secs(30);
    fs::File::options()
        .write(true)
        .open(env.src.path().join("a.txt"))
        .unwrap()
        .set_modified(past)
        .unwrap();

    let new_handle = publish(&env, &folder_id, AccessSpec::Public).await;
    assert_ne!(old_handle.share_id, new_handle.share_id);

    let old_dest = env.dst.path().join("old");
    let report = consume(&env, &old_handle, &Credentials::Anonymous, &old_dest)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_file_eq(&old_dest, "a.txt", b"hello");
    assert_file_eq(&old_dest, "b.txt", b"constant");

    let new_dest = env.dst.path().join("new");
    let report = consume(&env, &new_handle, &Credentials::Anonymous, &new_dest)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_file_eq(&new_dest, "a.txt", b"hello2");
    assert_file_eq(&new_dest, "b.txt", b"constant");

    // Versions advanced monotonically for the edited file only.
    let files = env.store.latest_files(&folder_id).await.unwrap();
    let a = files.iter().find(|f| f.relative_path == "a.txt").unwrap();
    let b = files.iter().find(|f| f.relative_path == "b.txt").unwrap();
    assert_eq!(a.version, 2);
    assert_eq!(b.version, 1);
}

#[tokio::test]
async fn wire_metadata_leaks_nothing() {
    let env = env().await;
    write(env.src.path(), "secret-report.txt", b"the contents are secret");
    write(env.src.path(), "sub dir/inner.bin", &noise(9_000, 5));
    let folder_id = setup_folder(&env).await;
    publish(&env, &folder_id, AccessSpec::Public).await;

    let headers = env.relay.all_headers();
    assert!(!headers.is_empty());
    let mut subjects = HashSet::new();
    for h in &headers {
        // Subjects are 20 random alphanumerics, unique per article.
        assert_eq!(h.subject.len(), 20);
        assert!(h.subject.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(subjects.insert(h.subject.clone()));

        for header_value in [&h.subject, &h.message_id, &h.from, &h.path] {
            assert!(!header_value.contains("secret"));
            assert!(!header_value.contains("inner"));
            assert!(!header_value.contains(&folder_id));
            assert!(!header_value.contains("usync"));
        }
        // Message-IDs: <16 lowercase alphanumerics>@<pool domain>.
        let inner = h.message_id.trim_start_matches('<').trim_end_matches('>');
        let (local, _domain) = inner.split_once('@').unwrap();
        assert_eq!(local.len(), 16);
    }
}

#[tokio::test]
async fn interrupted_upload_resumes_under_same_message_ids() {
    let env = env().await;
    write(env.src.path(), "big.bin", &noise(40_000, 13));
    let folder_id = setup_folder(&env).await;

    // First attempt: the relay refuses enough posts to exhaust retries, so
    // the publish aborts partway with some segments durably posted.
    env.relay.fail_next_posts(500);
    let first = publish_folder(
        &env.store,
        &env.relay_dyn,
        &env.actor,
        &folder_id,
        PublishOptions::public(),
        &env.cfg,
        None,
        None,
    )
    .await;
    assert!(first.is_err());

    // Message-IDs were assigned before the failed posts.
    let files = env.store.latest_files(&folder_id).await.unwrap();
    let mut assigned = Vec::new();
    for file in &files {
        for seg in env.store.segments_for_file(file.file_id).await.unwrap() {
            if let Some(id) = seg.message_id {
                assigned.push((seg.segment_id, id));
            }
        }
    }
    assert!(!assigned.is_empty());

    // Second run (fresh process in spirit): relay healthy again. The same
    // ids are reused and the relay deduplicates re-posts.
    env.relay.fail_next_posts(0);
    let handle = publish(&env, &folder_id, AccessSpec::Public).await;
    for (segment_id, id) in &assigned {
        let seg = env.store.get_segment(*segment_id).await.unwrap().unwrap();
        assert_eq!(seg.message_id.as_deref(), Some(id.as_str()));
    }

    let dest = env.dst.path().join("out");
    let report = consume(&env, &handle, &Credentials::Anonymous, &dest)
        .await
        .unwrap();
    assert!(report.is_complete());
}
