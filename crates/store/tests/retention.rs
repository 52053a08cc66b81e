//! Integration tests for index snapshot retention

mod common;

use store::config::RetentionPolicy;

#[tokio::test]
async fn test_keep_last_one() {
    let (mut fs, _, session, _temp) =
        common::setup_with_config(|config| config.retention = RetentionPolicy::KeepLast(1)).await;
    let data = fs.config().data_dir.clone();

    common::write_text(&mut fs, "/a", "1").await;
    common::write_text(&mut fs, "/b", "2").await;
    common::make_dir(&mut fs, "/c/d").await;

    assert_eq!(common::snapshot_files(&data).len(), 1);
    assert_eq!(fs.tree().snapshots().len(), 1);

    let reopened = common::reopen(&fs, &session).await;
    assert!(reopened.tree().alerts().is_empty());
    assert!(reopened.resolve("/c/d").is_ok());
    assert_eq!(reopened.cat("/a", None).await.unwrap().content(), Some("1"));
}

#[tokio::test]
async fn test_keep_last_n() {
    let (mut fs, _, _, _temp) =
        common::setup_with_config(|config| config.retention = RetentionPolicy::KeepLast(2)).await;
    let data = fs.config().data_dir.clone();

    for name in ["/a", "/b", "/c", "/d"] {
        common::write_text(&mut fs, name, "x").await;
    }

    let on_disk = common::snapshot_files(&data);
    assert_eq!(on_disk.len(), 2);
    let mut kept: Vec<String> = fs
        .tree()
        .snapshots()
        .iter()
        .map(|snapshot| snapshot.file_name.clone())
        .collect();
    kept.sort();
    assert_eq!(kept, on_disk);
}

#[tokio::test]
async fn test_keep_all_by_default() {
    let (mut fs, _, _, _temp) = common::setup_test_env().await;
    let data = fs.config().data_dir.clone();

    for name in ["/a", "/b", "/c"] {
        common::write_text(&mut fs, name, "x").await;
    }

    assert_eq!(common::snapshot_files(&data).len(), 3);
}
