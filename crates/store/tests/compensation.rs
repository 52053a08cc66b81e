//! Integration tests for undoing operations whose snapshot could not be written

mod common;

use store::entry::{Entry, NodeType};

#[tokio::test]
async fn test_failed_snapshot_after_add_leaves_no_blob() {
    let (mut fs, backend, _temp) = common::setup_faulty_env().await;
    let root = fs.tree().root_id().to_string();
    let before = common::blob_files(&backend.root());

    backend.fail_snapshots(true);
    let result = fs
        .add(&root, Entry::new(NodeType::Text).with_name("x").with_content("y"))
        .await;
    assert!(result.is_err());

    assert_eq!(common::blob_files(&backend.root()), before);
    assert!(fs.resolve("/x").is_err());
    assert!(!fs.is_dirty());

    backend.fail_snapshots(false);
    fs.add(&root, Entry::new(NodeType::Text).with_name("x").with_content("y"))
        .await
        .unwrap();
    assert!(fs.resolve("/x").is_ok());
}

#[tokio::test]
async fn test_failed_snapshot_after_update() {
    let (mut fs, backend, _temp) = common::setup_faulty_env().await;
    let added = common::write_text(&mut fs, "/f", "v1").await;
    let id = added.id().unwrap().to_string();
    let before = common::blob_files(&backend.root());

    backend.fail_snapshots(true);
    let moved = fs
        .update(&id, Entry::default().with_name("g").with_content("v2"))
        .await;
    assert!(moved.is_err());

    assert_eq!(common::blob_files(&backend.root()), before);
    assert!(fs.resolve("/g").is_err());
    assert_eq!(fs.versions("/f").unwrap().len(), 1);
    assert_eq!(fs.cat("/f", None).await.unwrap().content(), Some("v1"));
}

#[tokio::test]
async fn test_failed_snapshot_after_remove() {
    let (mut fs, backend, _temp) = common::setup_faulty_env().await;
    common::write_text(&mut fs, "/a", "1").await;
    common::write_text(&mut fs, "/b", "2").await;

    backend.fail_snapshots(true);
    let result = fs
        .remove(store::internal_fs::RemoveOptions::path("/*"))
        .await;
    assert!(result.is_err());

    assert!(fs.resolve("/a").is_ok());
    assert!(fs.resolve("/b").is_ok());
    assert_eq!(fs.tree().trash().child_count(), 0);
}

#[tokio::test]
async fn test_failed_make_undoes_intermediate_dirs() {
    let (mut fs, backend, _temp) = common::setup_faulty_env().await;
    let before = common::blob_files(&backend.root());

    backend.fail_snapshots(true);
    let result = fs.make("/p/q/r", NodeType::Text, Some("deep".to_string())).await;
    assert!(result.is_err());

    assert_eq!(common::blob_files(&backend.root()), before);
    assert!(fs.resolve("/p").is_err());
    assert_eq!(fs.tree().root().child_count(), 1);
}
