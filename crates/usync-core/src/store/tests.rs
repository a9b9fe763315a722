use super::*;

async fn store_with_folder() -> (Store, String) {
    let store = Store::open_memory().await.unwrap();
    let folder_id = new_folder_id();
    store
        .add_folder(&folder_id, "docs", "/home/u/docs")
        .await
        .unwrap();
    (store, folder_id)
}

#[tokio::test]
async fn folder_roundtrip() {
    let (store, folder_id) = store_with_folder().await;
    let folder = store.get_folder(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.display_name, "docs");
    assert_eq!(folder.state, FolderState::Active);

    store
        .set_folder_state(&folder_id, FolderState::Archived)
        .await
        .unwrap();
    let folder = store.get_folder(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.state, FolderState::Archived);

    assert_eq!(store.list_folders().await.unwrap().len(), 1);
}

#[tokio::test]
async fn folder_keys_roundtrip() {
    let (store, folder_id) = store_with_folder().await;
    assert!(store.get_folder_keys(&folder_id).await.unwrap().is_none());
    store
        .put_folder_keys(&folder_id, b"enc-signing", b"enc-root")
        .await
        .unwrap();
    let (signing, root) = store.get_folder_keys(&folder_id).await.unwrap().unwrap();
    assert_eq!(signing, b"enc-signing");
    assert_eq!(root, b"enc-root");
}

#[tokio::test]
async fn file_versioning_appends_and_obsoletes() {
    let (store, folder_id) = store_with_folder().await;

    let v1 = store
        .insert_file_version(&folder_id, "a.txt", 5, "hash-1", 100)
        .await
        .unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v1.previous_version_id, None);

    let v2 = store
        .insert_file_version(&folder_id, "a.txt", 6, "hash-2", 200)
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.previous_version_id, Some(v1.file_id));

    // Old version flipped to obsolete; latest set holds only v2.
    let old = store.get_file(v1.file_id).await.unwrap().unwrap();
    assert_eq!(old.state, FileState::Obsolete);
    let latest = store.latest_files(&folder_id).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].file_id, v2.file_id);

    assert_eq!(store.version_snapshot(&folder_id).await.unwrap(), 2);
}

#[tokio::test]
async fn mark_path_obsolete_for_deletions() {
    let (store, folder_id) = store_with_folder().await;
    store
        .insert_file_version(&folder_id, "gone.bin", 9, "h", 1)
        .await
        .unwrap();
    assert!(store.mark_path_obsolete(&folder_id, "gone.bin").await.unwrap());
    assert!(!store.mark_path_obsolete(&folder_id, "gone.bin").await.unwrap());
    assert!(store.latest_files(&folder_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn segment_rows_and_posting() {
    let (store, folder_id) = store_with_folder().await;
    let file = store
        .insert_file_version(&folder_id, "a.bin", 100, "h", 1)
        .await
        .unwrap();

    let segs: Vec<NewSegment> = (0..2)
        .map(|i| NewSegment {
            segment_id: segment_row_id(file.file_id, i, 0),
            file_id: file.file_id,
            segment_index: i,
            offset: i * 50,
            size: 50,
            plaintext_hash: format!("hash-{i}"),
            replica_index: 0,
            compressed: false,
            wire_subject: format!("subject{i}"),
            newsgroup: "alt.binaries.misc".to_string(),
        })
        .collect();
    store.insert_segments(&segs).await.unwrap();

    assert_eq!(store.unposted_original_count(file.file_id).await.unwrap(), 2);

    let rows = store.segments_for_file(file.file_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].message_id, None);
    assert!(!rows[0].posted);

    store
        .set_segment_message_id(rows[0].segment_id, "<m0@news.local>")
        .await
        .unwrap();
    let mut tx = store.pool.begin().await.unwrap();
    Store::mark_segment_posted(&mut tx, rows[0].segment_id)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let rows = store.segments_for_file(file.file_id).await.unwrap();
    assert_eq!(rows[0].message_id.as_deref(), Some("<m0@news.local>"));
    assert!(rows[0].posted);
    assert_eq!(store.unposted_original_count(file.file_id).await.unwrap(), 1);
    let unposted = store.unposted_segments_for_file(file.file_id).await.unwrap();
    assert_eq!(unposted.len(), 1);
    assert_eq!(unposted[0].segment_index, 1);
}

#[tokio::test]
async fn duplicate_segment_replica_is_rejected() {
    let (store, folder_id) = store_with_folder().await;
    let file = store
        .insert_file_version(&folder_id, "a.bin", 10, "h", 1)
        .await
        .unwrap();
    let seg = NewSegment {
        segment_id: segment_row_id(file.file_id, 0, 0),
        file_id: file.file_id,
        segment_index: 0,
        offset: 0,
        size: 10,
        plaintext_hash: "h".to_string(),
        replica_index: 0,
        compressed: false,
        wire_subject: "s".to_string(),
        newsgroup: "g".to_string(),
    };
    store.insert_segments(std::slice::from_ref(&seg)).await.unwrap();
    assert!(store.insert_segments(&[seg]).await.is_err());
}

#[tokio::test]
async fn pack_membership_roundtrip() {
    let (store, folder_id) = store_with_folder().await;
    let file = store
        .insert_file_version(&folder_id, "a.bin", 10, "h", 1)
        .await
        .unwrap();
    let ids: Vec<i64> = (0..3)
        .map(|i| segment_row_id(file.file_id, i, 0))
        .collect();
    let segs: Vec<NewSegment> = ids
        .iter()
        .enumerate()
        .map(|(i, &segment_id)| NewSegment {
            segment_id,
            file_id: file.file_id,
            segment_index: i as i64,
            offset: 0,
            size: 1,
            plaintext_hash: "h".to_string(),
            replica_index: 0,
            compressed: false,
            wire_subject: format!("s{i}"),
            newsgroup: "g".to_string(),
        })
        .collect();
    store.insert_segments(&segs).await.unwrap();

    let pack_id = store.insert_pack("checksum-hex", &ids).await.unwrap();
    assert_eq!(store.pack_members(pack_id).await.unwrap(), ids);
}

#[tokio::test]
async fn share_and_commitments() {
    let (store, folder_id) = store_with_folder().await;
    let share = ShareRow {
        share_id: "ABCDEFGHJKLMNPQRSTUVWXYZ".to_string(),
        folder_id: folder_id.clone(),
        version_snapshot: 1,
        access_class: AccessClass::Private,
        index_message_id: None,
        created_at: 42,
        expires_at: None,
        password_salt: None,
        kdf_params: None,
    };
    store.insert_share(&share).await.unwrap();

    store
        .insert_commitments(&[CommitmentRow {
            share_id: share.share_id.clone(),
            user_id_hash: "u1".to_string(),
            verification_key: "v1".to_string(),
            wrapped_session_key: vec![1, 2, 3],
        }])
        .await
        .unwrap();

    let got = store.get_share(&share.share_id).await.unwrap().unwrap();
    assert_eq!(got.access_class, AccessClass::Private);
    assert_eq!(got.index_message_id, None);

    store
        .set_share_index_message_id(&share.share_id, "<idx@news.local>")
        .await
        .unwrap();
    // Published shares are immutable: a second set is a no-op.
    store
        .set_share_index_message_id(&share.share_id, "<other@news.local>")
        .await
        .unwrap();
    let got = store.get_share(&share.share_id).await.unwrap().unwrap();
    assert_eq!(got.index_message_id.as_deref(), Some("<idx@news.local>"));

    let commitments = store.commitments_for_share(&share.share_id).await.unwrap();
    assert_eq!(commitments.len(), 1);
    assert_eq!(commitments[0].wrapped_session_key, vec![1, 2, 3]);

    assert_eq!(store.list_shares(Some(&folder_id)).await.unwrap().len(), 1);
    assert_eq!(store.list_shares(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn task_claim_is_exclusive_and_priority_ordered() {
    let (store, folder_id) = store_with_folder().await;
    let low = store
        .enqueue_task(TaskKind::Upload, &folder_id, 10, 3, "{\"n\":1}")
        .await
        .unwrap();
    let high = store
        .enqueue_task(TaskKind::Upload, &folder_id, 1, 3, "{\"n\":2}")
        .await
        .unwrap();

    let first = store.claim_next_task(TaskKind::Upload, 8).await.unwrap().unwrap();
    assert_eq!(first.task_id, high);
    assert_eq!(first.status, TaskStatus::InProgress);

    let second = store.claim_next_task(TaskKind::Upload, 8).await.unwrap().unwrap();
    assert_eq!(second.task_id, low);

    // Nothing left to claim.
    assert!(store.claim_next_task(TaskKind::Upload, 8).await.unwrap().is_none());
}

#[tokio::test]
async fn task_claim_respects_folder_ceiling() {
    let store = Store::open_memory().await.unwrap();
    store.add_folder("f1", "one", "/one").await.unwrap();
    store.add_folder("f2", "two", "/two").await.unwrap();
    store
        .enqueue_task(TaskKind::Upload, "f1", 1, 3, "{}")
        .await
        .unwrap();
    store
        .enqueue_task(TaskKind::Upload, "f1", 2, 3, "{}")
        .await
        .unwrap();
    let other = store
        .enqueue_task(TaskKind::Upload, "f2", 3, 3, "{}")
        .await
        .unwrap();

    // Ceiling 1 per folder: after claiming one f1 task, the next claim must
    // skip f1's second task and hand out f2's despite its worse priority.
    let first = store.claim_next_task(TaskKind::Upload, 1).await.unwrap().unwrap();
    assert_eq!(first.folder_id, "f1");
    let second = store.claim_next_task(TaskKind::Upload, 1).await.unwrap().unwrap();
    assert_eq!(second.task_id, other);
    assert!(store.claim_next_task(TaskKind::Upload, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn retry_parks_in_retrying_until_readmitted() {
    let (store, folder_id) = store_with_folder().await;
    let id = store
        .enqueue_task(TaskKind::Upload, &folder_id, 1, 3, "{}")
        .await
        .unwrap();
    store.claim_next_task(TaskKind::Upload, 8).await.unwrap().unwrap();

    // Failure parks the task in `retrying`, deprioritized; it is not
    // claimable there.
    let after = store
        .mark_task_retrying(TaskKind::Upload, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, TaskStatus::Retrying);
    assert_eq!(after.retry_count, 1);
    assert_eq!(after.priority, 1 + 10);
    assert!(store.claim_next_task(TaskKind::Upload, 8).await.unwrap().is_none());

    // Re-admission is the retrying → pending hop.
    assert_eq!(store.readmit_retrying_tasks(TaskKind::Upload).await.unwrap(), 1);
    let task = store.get_task(TaskKind::Upload, &id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    store.claim_next_task(TaskKind::Upload, 8).await.unwrap().unwrap();
    let after = store
        .mark_task_retrying(TaskKind::Upload, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.retry_count, 2);
    assert_eq!(after.priority, 1 + 10 + 20);
}

#[tokio::test]
async fn suspend_parks_without_retry_bookkeeping() {
    let (store, folder_id) = store_with_folder().await;
    let id = store
        .enqueue_task(TaskKind::Upload, &folder_id, 1, 3, "{}")
        .await
        .unwrap();
    store.claim_next_task(TaskKind::Upload, 8).await.unwrap().unwrap();

    store.suspend_task(TaskKind::Upload, &id).await.unwrap();
    let task = store.get_task(TaskKind::Upload, &id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Retrying);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.priority, 1);

    assert_eq!(store.readmit_retrying_tasks(TaskKind::Upload).await.unwrap(), 1);
    let task = store.get_task(TaskKind::Upload, &id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn recover_stale_resets_in_progress_and_retrying() {
    let (store, folder_id) = store_with_folder().await;
    let a = store
        .enqueue_task(TaskKind::Download, &folder_id, 1, 3, "{}")
        .await
        .unwrap();
    let b = store
        .enqueue_task(TaskKind::Download, &folder_id, 2, 3, "{}")
        .await
        .unwrap();
    // Strand one task mid-flight and park the other as retrying.
    store.claim_next_task(TaskKind::Download, 8).await.unwrap();
    store.claim_next_task(TaskKind::Download, 8).await.unwrap();
    store
        .mark_task_retrying(TaskKind::Download, &b)
        .await
        .unwrap()
        .unwrap();

    let n = store.recover_stale_tasks(TaskKind::Download).await.unwrap();
    assert_eq!(n, 2);
    for id in [&a, &b] {
        let task = store.get_task(TaskKind::Download, id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    let counts = store.task_counts(TaskKind::Download).await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.in_progress, 0);
    assert_eq!(counts.retrying, 0);
}

#[tokio::test]
async fn task_progress_roundtrip() {
    let (store, folder_id) = store_with_folder().await;
    let id = store
        .enqueue_task(TaskKind::Upload, &folder_id, 1, 3, "{}")
        .await
        .unwrap();
    store
        .set_task_progress(TaskKind::Upload, &id, "{\"completed\":[0,1]}")
        .await
        .unwrap();
    let task = store.get_task(TaskKind::Upload, &id).await.unwrap().unwrap();
    assert_eq!(task.progress_json, "{\"completed\":[0,1]}");

    store.complete_task(TaskKind::Upload, &id).await.unwrap();
    let task = store.get_task(TaskKind::Upload, &id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn change_stream_sees_file_and_task_transitions() {
    let (store, folder_id) = store_with_folder().await;
    let mut events = store.subscribe();

    let file = store
        .insert_file_version(&folder_id, "a.txt", 1, "h", 1)
        .await
        .unwrap();
    store
        .set_file_state(file.file_id, FileState::Segmented)
        .await
        .unwrap();
    let task_id = store
        .enqueue_task(TaskKind::Upload, &folder_id, 1, 3, "{}")
        .await
        .unwrap();
    store.complete_task(TaskKind::Upload, &task_id).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::FileChanged {
            file_id: file.file_id,
            state: FileState::Indexed
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::FileChanged {
            file_id: file.file_id,
            state: FileState::Segmented
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::TaskChanged {
            kind: TaskKind::Upload,
            task_id: task_id.clone(),
            status: TaskStatus::Pending
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::TaskChanged {
            kind: TaskKind::Upload,
            task_id,
            status: TaskStatus::Completed
        }
    );
}

#[tokio::test]
async fn folder_stats_counts_live_files() {
    let (store, folder_id) = store_with_folder().await;
    let f = store
        .insert_file_version(&folder_id, "a.bin", 100, "h1", 1)
        .await
        .unwrap();
    store
        .insert_file_version(&folder_id, "b.bin", 50, "h2", 1)
        .await
        .unwrap();
    store
        .insert_segments(&[NewSegment {
            segment_id: segment_row_id(f.file_id, 0, 0),
            file_id: f.file_id,
            segment_index: 0,
            offset: 0,
            size: 100,
            plaintext_hash: "h".to_string(),
            replica_index: 0,
            compressed: false,
            wire_subject: "s".to_string(),
            newsgroup: "g".to_string(),
        }])
        .await
        .unwrap();

    let stats = store.folder_stats(&folder_id).await.unwrap();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.total_size, 150);
    assert_eq!(stats.segment_count, 1);
    assert_eq!(stats.posted_segments, 0);
}
