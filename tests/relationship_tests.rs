mod common;

use common::{MockAdapter, blog_store};
use memostore::{Store, StoreError};
use serde_json::json;
use std::sync::Arc;

fn store() -> Store {
    blog_store(Arc::new(MockAdapter::new()))
}

fn push_post_with_comments(store: &Store) {
    store
        .push_raw(
            "post",
            json!({
                "data": {
                    "type": "post",
                    "id": "1",
                    "attributes": { "title": "Rails" },
                    "relationships": {
                        "comments": { "data": [{ "type": "comment", "id": "1" }, { "type": "comment", "id": "2" }] }
                    }
                },
                "included": [
                    { "type": "comment", "id": "1", "attributes": { "body": "first" } },
                    { "type": "comment", "id": "2", "attributes": { "body": "second" } }
                ]
            }),
        )
        .unwrap();
}

#[test]
fn test_pushed_has_many_populates_inverse() {
    let store = store();
    push_post_with_comments(&store);

    let post = store.peek_record("post", "1").unwrap();
    let first = store.peek_record("comment", "1").unwrap();
    let second = store.peek_record("comment", "2").unwrap();

    assert_eq!(post.has_many("comments").unwrap(), vec![first.clone(), second.clone()]);
    assert_eq!(first.belongs_to("post").unwrap(), Some(post.clone()));
    assert_eq!(second.belongs_to("post").unwrap(), Some(post.clone()));
    assert!(!post.is_dirty());
    assert!(!first.is_dirty());
}

#[test]
fn test_pushed_belongs_to_populates_inverse() {
    let store = store();
    store.load("post", json!({ "id": "1" })).unwrap();
    let comment = store.load("comment", json!({ "id": "9", "post": "1" })).unwrap();
    let post = store.peek_record("post", "1").unwrap();

    assert_eq!(post.has_many("comments").unwrap(), vec![comment]);
}

#[test]
fn test_linkage_to_unknown_record_creates_placeholder() {
    let store = store();
    let comment = store.load("comment", json!({ "id": "9", "post": "1" })).unwrap();

    let post = comment.belongs_to("post").unwrap().unwrap();
    assert_eq!(post.id().as_deref(), Some("1"));
    assert!(post.is_empty());
    // placeholders are not visible until they hold data
    assert!(store.peek_record("post", "1").is_none());

    store.push_raw("post", common::post_doc("1", "now loaded")).unwrap();
    assert_eq!(store.peek_record("post", "1"), Some(post.clone()));
    assert_eq!(post.has_many("comments").unwrap(), vec![comment]);
}

#[test]
fn test_moving_a_comment_updates_both_posts() {
    let store = store();
    push_post_with_comments(&store);
    let first_post = store.peek_record("post", "1").unwrap();
    let second_post = store.load("post", json!({ "id": "2" })).unwrap();
    let comment = store.peek_record("comment", "1").unwrap();

    comment.set_belongs_to("post", Some(&second_post)).unwrap();

    assert_eq!(comment.belongs_to("post").unwrap(), Some(second_post.clone()));
    assert!(!first_post.has_many("comments").unwrap().contains(&comment));
    assert_eq!(second_post.has_many("comments").unwrap(), vec![comment.clone()]);

    // only the written side is dirty
    assert!(comment.is_dirty());
    assert!(!first_post.is_dirty());
    assert!(!second_post.is_dirty());

    comment.rollback();
    assert!(!comment.is_dirty());
    assert_eq!(comment.belongs_to("post").unwrap(), Some(first_post.clone()));
    assert!(first_post.has_many("comments").unwrap().contains(&comment));
    assert!(second_post.has_many("comments").unwrap().is_empty());
}

#[test]
fn test_has_many_writes_are_mirrored() {
    let store = store();
    let post = store.load("post", json!({ "id": "1" })).unwrap();
    let comment = store.load("comment", json!({ "id": "5" })).unwrap();

    post.add_to_has_many("comments", &comment).unwrap();
    assert_eq!(comment.belongs_to("post").unwrap(), Some(post.clone()));
    assert!(post.is_dirty());
    assert!(!comment.is_dirty());

    post.remove_from_has_many("comments", &comment).unwrap();
    assert_eq!(comment.belongs_to("post").unwrap(), None);
    // back to the acknowledged linkage
    assert!(!post.is_dirty());
}

#[test]
fn test_clearing_belongs_to() {
    let store = store();
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap();
    let comment = store.peek_record("comment", "2").unwrap();

    comment.set_belongs_to("post", None).unwrap();
    assert_eq!(comment.belongs_to("post").unwrap(), None);
    assert_eq!(post.has_many("comments").unwrap().len(), 1);
}

#[test]
fn test_server_update_does_not_clobber_local_edit() {
    let store = store();
    push_post_with_comments(&store);
    let local_post = store.load("post", json!({ "id": "2" })).unwrap();
    let comment = store.peek_record("comment", "1").unwrap();
    comment.set_belongs_to("post", Some(&local_post)).unwrap();

    // the server still links the comment to post 1
    store.load("comment", json!({ "id": "1", "body": "edited remotely", "post": "1" })).unwrap();

    assert_eq!(comment.belongs_to("post").unwrap(), Some(local_post));
    assert_eq!(comment.get("body"), Some(json!("edited remotely")));
    assert!(comment.is_dirty());
}

#[test]
fn test_server_update_flushes_to_unmodified_relationship() {
    let store = store();
    push_post_with_comments(&store);
    store.load("post", json!({ "id": "2" })).unwrap();
    let comment = store.peek_record("comment", "1").unwrap();

    store.load("comment", json!({ "id": "1", "post": "2" })).unwrap();

    let second_post = store.peek_record("post", "2").unwrap();
    let first_post = store.peek_record("post", "1").unwrap();
    assert_eq!(comment.belongs_to("post").unwrap(), Some(second_post.clone()));
    assert_eq!(second_post.has_many("comments").unwrap(), vec![comment.clone()]);
    assert!(!first_post.has_many("comments").unwrap().contains(&comment));
}

#[test]
fn test_unload_removes_record_from_relationships() {
    let store = store();
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap();
    let comment = store.peek_record("comment", "1").unwrap();

    comment.unload();
    assert!(comment.is_unloaded());
    assert!(!store.has_record_for_id("comment", "1"));
    assert_eq!(post.has_many("comments").unwrap().len(), 1);
}

#[test]
fn test_relationship_misuse() {
    let store = store();
    let post = store.load("post", json!({ "id": "1" })).unwrap();
    let person = store.load("person", json!({ "id": "1" })).unwrap();

    assert!(matches!(post.belongs_to("comments"), Err(StoreError::Misuse(_))));
    assert!(matches!(post.has_many("author"), Err(StoreError::Misuse(_))));
    assert!(matches!(post.has_many("tags"), Err(StoreError::Misuse(_))));
    assert!(matches!(post.add_to_has_many("comments", &person), Err(StoreError::Misuse(_))));
    assert!(matches!(
        post.set_belongs_to("comments", Some(&person)),
        Err(StoreError::Misuse(_))
    ));
}

#[test]
fn test_snapshot_carries_known_linkage() {
    let store = store();
    push_post_with_comments(&store);
    let post = store.peek_record("post", "1").unwrap();

    let snapshot = post.snapshot().unwrap();
    assert_eq!(snapshot.attr("title"), Some(&json!("Rails")));
    let comments = snapshot.has_many("comments").unwrap();
    let ids: Vec<_> = comments.iter().filter_map(|member| member.id.clone()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    // linkage never supplied by the server is left out
    assert!(snapshot.belongs_to("author").is_none());
}
