mod common;

use common::{MockAdapter, blog_store, post_doc};
use memostore::{
    AdapterCapabilities, AdapterError, FindOptions, IdMismatchPolicy, QueryConvention, Store, StoreConfig,
    StoreError,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;

#[tokio::test]
async fn test_find_record_loads_and_caches() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| Ok(post_doc(id, "Rails is omakase"))));
    let store = blog_store(adapter.clone());

    let post = store.find_record("post", "1").await.unwrap();
    assert_eq!(post.id().as_deref(), Some("1"));
    assert_eq!(post.get("title"), Some(json!("Rails is omakase")));
    assert!(post.is_loaded());
    assert!(!post.is_dirty());

    // second find is answered from the cache
    let again = store.find_record("post", "1").await.unwrap();
    assert_eq!(post, again);
    assert_eq!(adapter.count("findRecord"), 1);
}

#[tokio::test]
async fn test_identity_is_stable_across_pushes_and_finds() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| Ok(post_doc(id, "fetched"))));
    let store = blog_store(adapter.clone());

    let pushed = store.push_raw("post", post_doc("1", "pushed")).unwrap().single().unwrap();
    let peeked = store.peek_record("post", "1").unwrap();
    let found = store.find_record("post", "1").await.unwrap();
    let reloaded = store
        .find_record_with("post", "1", FindOptions::reload())
        .await
        .unwrap();

    assert_eq!(pushed, peeked);
    assert_eq!(pushed, found);
    assert_eq!(pushed, reloaded);
    assert_eq!(pushed.client_id(), reloaded.client_id());
    assert_eq!(reloaded.get("title"), Some(json!("fetched")));
    assert_eq!(adapter.count("findRecord"), 1);
}

#[tokio::test]
async fn test_reload_on_find_config() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| Ok(post_doc(id, "fresh"))));
    let store = Store::builder()
        .models(common::blog_models())
        .adapter(adapter.clone())
        .config(StoreConfig::new("test").reload_on_find(true))
        .build()
        .unwrap();

    store.find_record("post", "1").await.unwrap();
    store.find_record("post", "1").await.unwrap();
    assert_eq!(adapter.count("findRecord"), 2);
}

#[tokio::test]
async fn test_rejected_find_evicts_placeholder() {
    let adapter = Arc::new(MockAdapter::new());
    let store = blog_store(adapter.clone());

    let err = store.find_record("post", "1").await.unwrap_err();
    assert!(matches!(err.adapter_error(), Some(AdapterError::NotFound(_))));
    assert!(!store.has_record_for_id("post", "1"));
    assert!(store.peek_record("post", "1").is_none());

    // nothing was cached, so the next find asks again
    let _ = store.find_record("post", "1").await;
    assert_eq!(adapter.count("findRecord post 1"), 2);
}

#[tokio::test]
async fn test_failed_reload_keeps_data() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, _| Err(AdapterError::Transport("offline".into()))));
    let store = blog_store(adapter.clone());
    let post = store.push_raw("post", post_doc("1", "cached")).unwrap().single().unwrap();

    let err = post.reload().await.unwrap_err();
    assert!(matches!(err, StoreError::Adapter(AdapterError::Transport(_))));
    assert!(!post.is_reloading());
    assert!(post.is_loaded());
    assert_eq!(store.peek_record("post", "1"), Some(post.clone()));
    assert_eq!(post.get("title"), Some(json!("cached")));
}

#[tokio::test]
async fn test_find_record_without_data_is_a_shape_violation() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, _| Ok(json!({}))));
    let store = blog_store(adapter);

    let err = store.find_record("post", "1").await.unwrap_err();
    assert!(matches!(err, StoreError::ShapeViolation(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_find_record_with_collection_is_a_shape_violation() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| {
        Ok(json!({ "data": [{ "type": "post", "id": id, "attributes": {} }] }))
    }));
    let store = blog_store(adapter);

    let err = store.find_record("post", "1").await.unwrap_err();
    assert!(matches!(err, StoreError::ShapeViolation(_)));
}

#[tokio::test]
async fn test_find_record_id_mismatch_pushes_returned_record() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, _| Ok(post_doc("2", "other"))));
    let store = Store::builder()
        .models(common::blog_models())
        .adapter(adapter)
        .config(StoreConfig::new("test").id_mismatch(IdMismatchPolicy::Ignore))
        .build()
        .unwrap();

    let found = store.find_record("post", "1").await.unwrap();
    assert_eq!(found.id().as_deref(), Some("2"));
    assert!(store.peek_record("post", "2").is_some());
    assert!(store.peek_record("post", "1").is_none());
}

#[tokio::test]
async fn test_find_record_misuse() {
    let store = blog_store(Arc::new(MockAdapter::new()));
    assert!(matches!(store.find_record("post", "").await, Err(StoreError::Misuse(_))));
    assert!(matches!(store.find_record("planet", "1").await, Err(StoreError::Misuse(_))));
}

#[tokio::test]
async fn test_find_many_coalesces_unloaded_records() {
    let adapter = Arc::new(
        MockAdapter::new()
            .capabilities(AdapterCapabilities::new().coalesce_find_requests(true))
            .on_find_many(|_, ids| {
                let data: Vec<_> = ids
                    .iter()
                    .filter(|id| id.as_str() != "3")
                    .map(|id| json!({ "type": "post", "id": id, "attributes": { "title": format!("post {}", id) } }))
                    .collect();
                Ok(json!({ "data": data }))
            }),
    );
    let store = blog_store(adapter.clone());
    store.push_raw("post", post_doc("1", "cached")).unwrap();

    let records = store.find_many("post", &["1", "2", "3"]).await.unwrap();

    // only the unloaded ids go out, in one call
    assert_eq!(adapter.calls(), vec!["findMany post 2,3".to_string()]);
    let ids: Vec<_> = records.iter().filter_map(|record| record.id()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    // the missing record was evicted
    assert!(!store.has_record_for_id("post", "3"));
}

#[tokio::test]
async fn test_find_many_without_coalescing_calls_find_record() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| Ok(post_doc(id, "x"))));
    let store = blog_store(adapter.clone());

    let records = store.find_many("post", &["1", "2"]).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(adapter.count("findRecord"), 2);
    assert_eq!(adapter.count("findMany"), 0);
}

#[tokio::test]
async fn test_find_many_unsupported_is_misuse() {
    let adapter = Arc::new(MockAdapter::new().capabilities(AdapterCapabilities::new().coalesce_find_requests(true)));
    let store = blog_store(adapter);

    let err = store.find_many("post", &["1"]).await.unwrap_err();
    assert!(matches!(err, StoreError::Misuse(_)));
}

#[tokio::test]
async fn test_find_all_fills_live_array_and_caches() {
    let adapter = Arc::new(MockAdapter::new().on_find_all(|_, since| {
        assert!(since.is_none());
        Ok(json!({
            "data": [
                { "type": "post", "id": "1", "attributes": { "title": "one" } },
                { "type": "post", "id": "2", "attributes": { "title": "two" } }
            ],
            "meta": { "since": "t1" }
        }))
    }));
    let store = blog_store(adapter.clone());

    let posts = store.find_all("post").await.unwrap();
    assert!(posts.is_live());
    assert!(posts.is_loaded());
    assert!(!posts.is_updating());
    assert_eq!(posts.len(), 2);
    assert!(store.has_loaded_all("post"));
    assert_eq!(store.since_token("post"), Some(json!("t1")));

    let again = store.find_all("post").await.unwrap();
    assert_eq!(again.len(), 2);
    assert_eq!(adapter.count("findAll"), 1);

    // the live array follows records created later
    store.create_record("post", json!({ "title": "three" })).unwrap();
    assert_eq!(posts.len(), 3);
}

#[tokio::test]
async fn test_find_all_sends_since_token_on_reload() {
    let adapter = Arc::new(MockAdapter::new().on_find_all(|_, since| {
        let next = match since {
            None => "t1",
            Some(_) => "t2",
        };
        Ok(json!({ "data": [], "meta": { "since": next } }))
    }));
    let store = blog_store(adapter.clone());

    store.find_all("post").await.unwrap();
    let posts = store.peek_all("post").unwrap();
    posts.update().await.unwrap();
    assert_eq!(store.since_token("post"), Some(json!("t2")));
    assert_eq!(adapter.count("findAll"), 2);
}

#[tokio::test]
async fn test_query_returns_populated_array() {
    let adapter = Arc::new(MockAdapter::new().on_query(|_, query| {
        assert_eq!(query, &json!({ "author": "dhh" }));
        Ok(json!({
            "data": [{ "type": "post", "id": "1", "attributes": { "title": "one" } }],
            "meta": { "total": 1 }
        }))
    }));
    let store = blog_store(adapter.clone());

    let results = store.query("post", json!({ "author": "dhh" })).await.unwrap();
    assert!(results.is_adapter_populated());
    assert_eq!(results.query(), Some(&json!({ "author": "dhh" })));
    assert_eq!(results.len(), 1);
    assert_eq!(results.meta(), Some(json!({ "total": 1 })));

    // pushed records are regular cache entries
    assert_eq!(store.peek_record("post", "1"), results.first());

    results.update().await.unwrap();
    assert_eq!(adapter.count("query"), 2);
}

#[tokio::test]
async fn test_query_with_record_array_convention() {
    let adapter = Arc::new(
        MockAdapter::new()
            .capabilities(AdapterCapabilities::new().query_convention(QueryConvention::PopulatesRecordArray))
            .on_query(|_, _| Ok(json!({ "data": [{ "type": "post", "id": "9", "attributes": {} }] }))),
    );
    let store = blog_store(adapter);

    let results = store.query("post", json!({})).await.unwrap();
    assert_eq!(results.ids(), vec![Some("9".to_string())]);
}

#[tokio::test]
async fn test_query_single_result_is_a_shape_violation() {
    let adapter = Arc::new(MockAdapter::new().on_query(|_, _| Ok(post_doc("1", "x"))));
    let store = blog_store(adapter);

    let err = store.query("post", json!({})).await.unwrap_err();
    assert!(matches!(err, StoreError::ShapeViolation(_)));
}

#[tokio::test]
async fn test_query_record() {
    let adapter = Arc::new(MockAdapter::new().on_query_record(|_, query| {
        if query["slug"] == "missing" {
            Ok(json!({ "data": null }))
        } else {
            Ok(post_doc("5", "found"))
        }
    }));
    let store = blog_store(adapter);

    let found = store.query_record("post", json!({ "slug": "rails" })).await.unwrap();
    assert_eq!(found.and_then(|post| post.id()).as_deref(), Some("5"));

    let missing = store.query_record("post", json!({ "slug": "missing" })).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_fetch_has_many_through_link_sets_inverse() {
    let adapter = Arc::new(MockAdapter::new().on_find_has_many(|link| {
        assert_eq!(link, "/posts/1/comments");
        // the comments do not mention their post
        Ok(json!({
            "data": [
                { "type": "comment", "id": "1", "attributes": { "body": "first" } },
                { "type": "comment", "id": "2", "attributes": { "body": "second" } }
            ],
            "meta": { "total": 2 }
        }))
    }));
    let store = blog_store(adapter.clone());
    let post = store
        .push_raw(
            "post",
            json!({
                "data": {
                    "type": "post",
                    "id": "1",
                    "attributes": { "title": "Rails" },
                    "relationships": { "comments": { "links": { "related": "/posts/1/comments" } } }
                }
            }),
        )
        .unwrap()
        .single()
        .unwrap();
    assert_eq!(post.link("comments").as_deref(), Some("/posts/1/comments"));

    let comments = store.fetch_has_many(&post, "comments").await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments.meta(), Some(&json!({ "total": 2 })));
    for comment in comments.iter() {
        assert_eq!(comment.belongs_to("post").unwrap(), Some(post.clone()));
    }
    assert_eq!(post.has_many("comments").unwrap(), comments.records());
    assert!(!post.is_dirty());
    assert_eq!(adapter.count("findHasMany"), 1);
}

#[tokio::test]
async fn test_fetch_has_many_without_link_resolves_linkage() {
    let adapter = Arc::new(MockAdapter::new().on_find_record(|_, id| {
        Ok(json!({ "data": { "type": "comment", "id": id, "attributes": { "body": id } } }))
    }));
    let store = blog_store(adapter.clone());
    let post = store
        .load("post", json!({ "id": "1", "title": "Rails", "comments": ["1", "2"] }))
        .unwrap();

    let comments = store.fetch_has_many(&post, "comments").await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(adapter.count("findRecord comment"), 2);
    assert_eq!(comments.records()[0].get("body"), Some(json!("1")));
    assert!(comments.meta().is_none());
}

#[tokio::test]
async fn test_fetch_belongs_to_through_link() {
    let adapter = Arc::new(MockAdapter::new().on_find_belongs_to(|_| Ok(common::person_doc("7", "dhh"))));
    let store = blog_store(adapter);
    let post = store
        .push_raw(
            "post",
            json!({
                "data": {
                    "type": "post",
                    "id": "1",
                    "relationships": { "author": { "links": { "related": "/posts/1/author" } } }
                }
            }),
        )
        .unwrap()
        .single()
        .unwrap();

    let author = store.fetch_belongs_to(&post, "author").await.unwrap().unwrap();
    assert_eq!(author.get("name"), Some(json!("dhh")));
    assert_eq!(post.belongs_to("author").unwrap(), Some(author.clone()));
    assert_eq!(author.has_many("posts").unwrap(), vec![post]);
}

#[tokio::test]
async fn test_fetch_belongs_to_keeps_known_members_of_inverse() {
    let adapter = Arc::new(MockAdapter::new().on_find_belongs_to(|link| {
        assert_eq!(link, "/comments/3/post");
        // the post does not list its comments
        Ok(post_doc("1", "Rails"))
    }));
    let store = blog_store(adapter);
    store
        .push_raw(
            "post",
            json!({
                "data": {
                    "type": "post",
                    "id": "1",
                    "relationships": {
                        "comments": { "data": [{ "type": "comment", "id": "1" }, { "type": "comment", "id": "2" }] }
                    }
                }
            }),
        )
        .unwrap();
    let comment = store
        .push_raw(
            "comment",
            json!({
                "data": {
                    "type": "comment",
                    "id": "3",
                    "relationships": { "post": { "links": { "related": "/comments/3/post" } } }
                }
            }),
        )
        .unwrap()
        .single()
        .unwrap();

    let post = store.fetch_belongs_to(&comment, "post").await.unwrap().unwrap();

    let comments = post.has_many("comments").unwrap();
    let ids: Vec<_> = comments.iter().filter_map(|member| member.id()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    for member in &comments {
        assert_eq!(member.belongs_to("post").unwrap(), Some(post.clone()));
    }
    assert_eq!(comments[2], comment);
    assert!(!post.is_dirty());
}

#[tokio::test]
async fn test_fetch_has_many_on_belongs_to_is_misuse() {
    let store = blog_store(Arc::new(MockAdapter::new()));
    let comment = store.load("comment", json!({ "id": "1" })).unwrap();
    assert!(matches!(
        store.fetch_has_many(&comment, "post").await,
        Err(StoreError::Misuse(_))
    ));
}

#[tokio::test]
async fn test_destroyed_store_discards_pending_find() {
    let gate = Arc::new(Notify::new());
    let adapter = Arc::new(
        MockAdapter::new()
            .gated(gate.clone())
            .on_find_record(|_, id| Ok(post_doc(id, "late"))),
    );
    let store = blog_store(adapter.clone());

    let find = store.find_record("post", "1");
    let teardown = async {
        adapter.started().await;
        store.destroy();
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(find, teardown);

    assert!(result.unwrap_err().is_cancelled());
    assert!(store.is_destroyed());
    assert!(matches!(
        store.find_record("post", "1").await,
        Err(StoreError::StoreDestroyed)
    ));
    assert!(store.peek_record("post", "1").is_none());
}

#[tokio::test]
async fn test_unloaded_owner_discards_pending_relationship_fetch() {
    let gate = Arc::new(Notify::new());
    let adapter = Arc::new(MockAdapter::new().gated(gate.clone()).on_find_has_many(|_| {
        Ok(json!({ "data": [{ "type": "comment", "id": "1", "attributes": { "body": "late" } }] }))
    }));
    let store = blog_store(adapter.clone());
    let post = store
        .push_raw(
            "post",
            json!({
                "data": {
                    "type": "post",
                    "id": "1",
                    "relationships": { "comments": { "links": { "related": "/posts/1/comments" } } }
                }
            }),
        )
        .unwrap()
        .single()
        .unwrap();

    let fetch = store.fetch_has_many(&post, "comments");
    let teardown = async {
        adapter.started().await;
        post.unload();
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(fetch, teardown);

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(adapter.count("findHasMany"), 1);
    assert!(!store.is_destroyed());
    assert!(!store.has_record_for_id("comment", "1"));
}
