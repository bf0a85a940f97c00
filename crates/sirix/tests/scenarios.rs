#![allow(clippy::uninlined_format_args)]

use sirix::{
    in_memory_resource, Config, FilePageStore, InMemoryPageStore, NodeEvent, NodeKind, Resource, Result,
    SirixError,
};
use sirix_node::{leaf_content_hash, propagate_rolling_add};

#[test]
fn insert_as_first_child_of_document_root_and_read_back() -> Result<()> {
    let resource = in_memory_resource(Config::default());

    let mut writer = resource.begin_write()?;
    let root = writer.root();
    let a = writer.insert_element_as_first_child(root, None, "a", "")?;
    let b = writer.insert_element_as_first_child(a, None, "b", "")?;
    let committed_revision = writer.commit()?;

    let reader = resource.begin_read()?;
    assert_eq!(reader.revision(), committed_revision);
    drop(reader);

    // The write-side API is the only one that exposes full node navigation,
    // so a freshly reopened write transaction doubles as the "read back"
    // check here: `NodeWriteTrx::begin` loads whatever the latest commit
    // left behind before any new staging happens.
    let mut readback = resource.begin_write()?;
    let root_node = readback.node(root)?;
    assert_eq!(root_node.structural().unwrap().child_count, 1);
    assert_eq!(root_node.structural().unwrap().first_child_key, Some(a));

    let a_node = readback.node(a)?;
    assert_eq!(a_node.kind(), Some(NodeKind::Element));
    assert_eq!(a_node.structural().unwrap().child_count, 1);
    assert_eq!(a_node.structural().unwrap().first_child_key, Some(b));
    assert_eq!(a_node.parent_key(), Some(root));

    let b_node = readback.node(b)?;
    assert_eq!(b_node.kind(), Some(NodeKind::Element));
    assert_eq!(b_node.structural().unwrap().child_count, 0);
    assert_eq!(b_node.parent_key(), Some(a));

    readback.abort()?;
    Ok(())
}

#[test]
fn adjacent_text_inserts_coalesce_into_one_node() -> Result<()> {
    let resource = in_memory_resource(Config::default());
    let mut writer = resource.begin_write()?;
    let root = writer.root();
    let a = writer.insert_element_as_first_child(root, None, "a", "")?;

    writer.insert_text_as_first_child(a, b"hello".to_vec())?;
    writer.insert_text_as_first_child(a, b"world".to_vec())?;

    let a_node = writer.node(a)?;
    assert_eq!(a_node.structural().unwrap().child_count, 1, "coalescing must not create a second text node");
    let text_key = a_node.structural().unwrap().first_child_key.unwrap();
    let text_node = writer.node(text_key)?;
    assert_eq!(text_node.kind(), Some(NodeKind::Text));
    assert_eq!(text_node.valued().unwrap().value, b"worldhello");

    writer.abort()
}

#[test]
fn bulk_insert_ten_thousand_nodes_keeps_rolling_hash_correct() -> Result<()> {
    const CHILDREN: usize = 9_999;

    let resource = in_memory_resource(Config::default());
    let mut writer = resource.begin_write()?;
    let root = writer.root();

    let mut events = vec![NodeEvent::OpenElement { prefix: None, local_name: "root".into(), uri: String::new() }];
    for i in 0..CHILDREN {
        events.push(NodeEvent::OpenElement {
            prefix: None,
            local_name: format!("c{i}"),
            uri: String::new(),
        });
        events.push(NodeEvent::CloseElement);
    }
    events.push(NodeEvent::CloseElement);

    let subtree_root = writer.insert_subtree_as_first_child(root, &events)?;
    let committed_revision = writer.commit()?;

    let mut readback = resource.begin_write()?;
    assert_eq!(readback.revision(), committed_revision);

    let root_node = readback.node(root)?;
    let subtree_root_node = readback.node(subtree_root)?;
    assert_eq!(subtree_root_node.structural().unwrap().child_count, CHILDREN as u64);

    // 10,000 total nodes: the bulk-inserted root plus its 9,999 leaf children.
    let mut total = 1u64;
    let mut expected_subtree_root_hash = 0u64;
    let mut expected_document_root_hash =
        propagate_rolling_add(0, leaf_content_hash(&subtree_root_node));

    let mut child = subtree_root_node.structural().unwrap().first_child_key;
    while let Some(key) = child {
        total += 1;
        let node = readback.node(key)?;
        let leaf_hash = leaf_content_hash(&node);
        expected_subtree_root_hash = propagate_rolling_add(expected_subtree_root_hash, leaf_hash);
        expected_document_root_hash = propagate_rolling_add(expected_document_root_hash, leaf_hash);
        child = node.structural().unwrap().right_sibling_key;
    }

    assert_eq!(total, 10_000);
    assert_eq!(subtree_root_node.hash(), Some(expected_subtree_root_hash));
    assert_eq!(root_node.hash(), Some(expected_document_root_hash));

    readback.abort()
}

#[test]
fn duplicate_attribute_overwrites_then_rejects() -> Result<()> {
    let resource = in_memory_resource(Config::default());
    let mut writer = resource.begin_write()?;
    let root = writer.root();
    let a = writer.insert_element_as_first_child(root, None, "a", "")?;

    writer.insert_attribute(a, None, "x", "", b"1".to_vec())?;
    let x_key = writer.insert_attribute(a, None, "x", "", b"2".to_vec())?;

    let attr_node = writer.node(x_key)?;
    assert_eq!(attr_node.valued().unwrap().value, b"2");
    let a_node = writer.node(a)?;
    assert_eq!(a_node.attributes().len(), 1, "overwrite must not add a second attribute node");

    let err = writer.insert_attribute_with(a, None, "x", "", b"2".to_vec(), false).unwrap_err();
    assert!(matches!(err, SirixError::DuplicateAttribute));

    writer.abort()
}

#[test]
fn move_subtree_to_first_child_reshapes_the_tree() -> Result<()> {
    let resource = in_memory_resource(Config::default());
    let mut writer = resource.begin_write()?;
    let root = writer.root();

    // <r><a/><b><c/></b></r>
    let r = writer.insert_element_as_first_child(root, None, "r", "")?;
    let a = writer.insert_element_as_first_child(r, None, "a", "")?;
    let b = writer.insert_element_as_right_sibling(a, None, "b", "")?;
    let c = writer.insert_element_as_first_child(b, None, "c", "")?;

    writer.move_subtree_to_first_child(a, b)?;

    // Expected shape: <r><b><a/><c/></b></r>
    let r_node = writer.node(r)?;
    assert_eq!(r_node.structural().unwrap().child_count, 1);
    assert_eq!(r_node.structural().unwrap().first_child_key, Some(b));

    let b_node = writer.node(b)?;
    assert_eq!(b_node.structural().unwrap().child_count, 2);
    assert_eq!(b_node.structural().unwrap().first_child_key, Some(a));
    assert_eq!(b_node.parent_key(), Some(r));

    let a_node = writer.node(a)?;
    assert_eq!(a_node.parent_key(), Some(b));
    assert_eq!(a_node.structural().unwrap().left_sibling_key, None);
    assert_eq!(a_node.structural().unwrap().right_sibling_key, Some(c));

    let c_node = writer.node(c)?;
    assert_eq!(c_node.parent_key(), Some(b));
    assert_eq!(c_node.structural().unwrap().left_sibling_key, Some(a));
    assert_eq!(c_node.structural().unwrap().right_sibling_key, None);

    writer.commit()?;
    Ok(())
}

/// Spec §8 scenario 6, adapted to an in-memory store: there is no process to
/// kill, so [`InMemoryPageStore::crash_after`] stands in for it by failing
/// the next physical page write. A commit that fails partway through must
/// surface as `Err`, never panic (this exercises the `NodeWriteTrx::commit`
/// fix that marks the transaction closed before its own fallible call), and
/// the resource must still be readable at the last revision that actually
/// made it to the uber-page pointer.
#[test]
fn commit_failure_mid_write_leaves_the_last_good_revision_intact() -> Result<()> {
    use rand::RngCore;
    let salt = rand::rngs::OsRng.next_u64();
    let resource = Resource::new(InMemoryPageStore::new(), salt, Config::default());

    let mut first = resource.begin_write()?;
    let root = first.root();
    first.insert_element_as_first_child(root, None, "a", "")?;
    let good_revision = first.commit()?;

    let mut second = resource.begin_write()?;
    second.insert_element_as_first_child(root, None, "b", "")?;
    resource.store().crash_after(0);
    let result = second.commit();
    assert!(result.is_err(), "a failing physical write must surface as Err, not panic");

    let reader = resource.begin_read()?;
    assert_eq!(reader.revision(), good_revision, "the failed commit must not have become visible");
    drop(reader);

    // The write lock must have been released even though the commit failed.
    let retry = resource.begin_write()?;
    retry.abort()?;
    Ok(())
}

/// Closing a write transaction with pending, unpublished mutations must
/// surface `SirixError::DirtyOnClose` rather than silently discarding them
/// or panicking; closing a clean (or already-resolved) one is a no-op.
#[test]
fn close_reports_dirty_on_close_for_pending_mutations() -> Result<()> {
    let resource = in_memory_resource(Config::default());

    let mut dirty = resource.begin_write()?;
    let root = dirty.root();
    dirty.insert_element_as_first_child(root, None, "a", "")?;
    let err = dirty.close().unwrap_err();
    assert!(matches!(err, SirixError::DirtyOnClose));

    // The write lock was released despite the error.
    let clean = resource.begin_write()?;
    clean.close()?;
    Ok(())
}

/// Spec §8 scenario 6 on an actual disk-backed resource: a commit marker
/// left behind by an interrupted commit (simulated here, since a real
/// `kill -9` isn't expressible in a test harness) must be discarded on
/// reopen, and the resource must still read back the last commit that
/// actually finished.
#[test]
fn reopening_a_disk_resource_discards_a_stale_commit_marker() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();

    {
        let resource: Resource<FilePageStore> = Resource::open(dir.path(), Config::default())?;
        let mut writer = resource.begin_write()?;
        let root = writer.root();
        writer.insert_element_as_first_child(root, None, "a", "")?;
        let revision = writer.commit()?;
        assert_eq!(revision.0, 1);
    }

    // Nothing was mid-commit here, but this exercises the marker path
    // itself: a leftover marker with no corresponding new revision.
    let marker = dir.path().join("wal").join("COMMIT_PENDING");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
    std::fs::write(&marker, []).unwrap();

    let resource: Resource<FilePageStore> = Resource::open(dir.path(), Config::default())?;
    assert!(!marker.exists(), "reopening must discard a stale commit marker");

    let reader = resource.begin_read()?;
    assert_eq!(reader.revision().0, 1, "the last finished commit must still be readable");
    Ok(())
}
