//! End-to-end scenarios from the continuity store's testable-properties list:
//! tamper detection surviving a restart, checkpoint-driven recovery through
//! the Lifecycle Adapter, and checkpoint pruning under the retention cap.
//! Rotation across a UTC day boundary is covered in `stream_writer`'s own
//! test module, where the injectable clock lives.

use continuity_store::{
    ActionEnvelope, ContinuityConfig, HostEvent, HostEventSink, LifecycleAdapter, Severity,
    StreamWriter,
};
use continuity_store::checkpoint::CheckpointData;
use continuity_store::lifecycle::CriticalToolPatterns;

fn temp_root(suffix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "continuity_store_test_{}_{}_{}",
        suffix,
        std::process::id(),
        uuid::Uuid::new_v4().as_simple()
    ))
}

fn entry(id: &str, timestamp: &str) -> ActionEnvelope {
    ActionEnvelope::new(
        id,
        timestamp,
        continuity_store::model::TYPE_TOOL_CALL,
        Severity::Critical,
        "openclaw",
        "write file",
    )
}

#[tokio::test]
async fn chain_survives_restart_and_append() {
    let root = temp_root("restart");
    {
        let writer = StreamWriter::new(ContinuityConfig::new(&root));
        writer.initialize().await.unwrap();
        for i in 0..3 {
            assert!(writer.append(entry(&format!("a{i}"), "2030-01-01T00:00:00.000Z")).await);
        }
        writer.close().await.unwrap();
    }

    let report_mid = continuity_store::validate_stream(&root).unwrap();
    assert!(report_mid.valid);
    assert_eq!(report_mid.total_checked, 3);

    {
        let writer = StreamWriter::new(ContinuityConfig::new(&root));
        writer.initialize().await.unwrap();
        assert!(writer.append(entry("a3", "2030-01-01T00:00:01.000Z")).await);
        writer.close().await.unwrap();
    }

    let report = continuity_store::validate_stream(&root).unwrap();
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(report.total_checked, 4);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn tamper_detection_survives_restart() {
    let root = temp_root("tamper");
    let writer = StreamWriter::new(ContinuityConfig::new(&root));
    writer.initialize().await.unwrap();
    for i in 0..3 {
        assert!(writer.append(entry(&format!("a{i}"), "2030-01-01T00:00:00.000Z")).await);
    }
    writer.close().await.unwrap();

    let files: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("action-stream-"))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(files.len(), 1);

    let content = std::fs::read_to_string(&files[0]).unwrap();
    let mut lines: Vec<&str> = content.lines().collect();
    // Index 0 is the header; tamper the second data line (sequence 2).
    let tampered = lines[2].replace("write file", "tampered");
    lines[2] = &tampered;
    std::fs::write(&files[0], lines.join("\n") + "\n").unwrap();

    let report = continuity_store::validate_stream(&root).unwrap();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.sequence == Some(2)));
    assert!(report.errors.iter().any(|e| e.sequence == Some(3)));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn before_compaction_creates_recoverable_checkpoint() {
    let root = temp_root("compaction");
    let adapter = LifecycleAdapter::new(
        ContinuityConfig::new(&root),
        "openclaw",
        CriticalToolPatterns(vec!["write".to_string()]),
    );
    adapter.handle(HostEvent::BootPost).await.unwrap();

    let checkpoint_data = CheckpointData {
        timestamp: "2030-01-01T00:00:00.000Z".to_string(),
        message_count: 120,
        extra: serde_json::Map::from_iter([(
            "sessionId".to_string(),
            serde_json::json!("s1"),
        )]),
    };
    adapter
        .handle(HostEvent::BeforeCompaction { checkpoint: checkpoint_data })
        .await
        .unwrap();
    adapter.handle(HostEvent::AfterCompaction).await.unwrap();

    let manager = continuity_store::CheckpointManager::new(root.clone());
    assert!(manager.can_recover().unwrap());
    let manifest = manager.get_manifest().unwrap().unwrap();
    assert_eq!(manifest.recovery_info.original_message_range.start, 20);
    assert_eq!(manifest.recovery_info.original_message_range.end, 120);

    let recent = adapter.writer().get_recent_actions(10).await;
    assert!(recent.iter().any(|a| a.action_type == continuity_store::model::TYPE_COMPACTION));
    assert!(recent
        .iter()
        .any(|a| a.action_type == continuity_store::model::TYPE_COMPACTION_COMPLETE));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn checkpoint_pruning_keeps_fifty() {
    let root = temp_root("prune");
    let manager = continuity_store::CheckpointManager::new(root.clone());
    for i in 0..51 {
        manager
            .create_checkpoint(CheckpointData {
                timestamp: format!("2030-01-01T00:{:02}:00.000Z", i),
                message_count: i,
                extra: serde_json::Map::new(),
            })
            .unwrap();
    }
    assert_eq!(manager.list_checkpoints().unwrap().len(), 50);
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn disk_exhaustion_routes_to_emergency_without_advancing_sequence() {
    let root = temp_root("emergency");
    let writer = StreamWriter::new(ContinuityConfig::new(&root));
    writer.initialize().await.unwrap();

    // Directly exercise the emergency path the way `append` would once the
    // disk-space probe trips, since the probe itself depends on real free
    // space that a test can't control portably.
    let ok = writer.append_emergency(entry("a0", "2030-01-01T00:00:00.000Z")).await;
    assert!(ok);

    let stats = writer.get_stats().await;
    assert_eq!(stats.total_actions, 0);

    let emergency_path = root.join("EMERGENCY_RECOVERY.jsonl");
    assert!(emergency_path.exists());
    let content = std::fs::read_to_string(&emergency_path).unwrap();
    assert!(content.contains("_emergency"));

    let _ = std::fs::remove_dir_all(&root);
}
