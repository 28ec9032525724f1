//! Denormalized counters and latest-reply pointers under deletes, failed
//! batches, lost races and injected drift.

use integration_tests::{Backend, FakeCredentials, Fixture, BACKENDS};
use nb_core::lifecycle::{self, NewNode, NewReply, NewTopic, NewUser};
use nb_core::query::to_document;
use nb_core::{
    collections, fields, new_id, now, AppError, EscapingRenderer, ForumStore, MockDocumentStore, Mutation, Node,
    Reply, Status, Topic, User, WriteBatch, STATUS_ID,
};
use nb_store_sqlite::SqliteDocumentStore;
use secrecy::SecretString;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_deleting_latest_reply_moves_pointer_back() {
    for backend in BACKENDS {
        let fx = Fixture::new(backend).await;
        let alice = fx.user("alice").await;
        let go = fx.node("go").await;
        let topic = fx.topic(&go, &alice, "T1").await;
        let r1 = fx.reply(&topic, &alice, "one").await;
        let r2 = fx.reply(&topic, &alice, "two").await;

        lifecycle::delete_reply(&fx.store, r2.id).await.unwrap();
        let topic: Topic = fx.reload(topic.id).await;
        assert_eq!(topic.reply_count, 1, "{backend:?}");
        assert_eq!(topic.latest_reply_id, r1.id.to_string());
        assert_eq!(topic.latest_replied_at, r1.created_at);

        lifecycle::delete_reply(&fx.store, r1.id).await.unwrap();
        let topic: Topic = fx.reload(topic.id).await;
        assert_eq!(topic.reply_count, 0);
        assert!(topic.latest_reply_id.is_empty());
        assert_eq!(topic.latest_replied_at, topic.created_at);

        let status: Status = fx.reload(STATUS_ID).await;
        assert_eq!(status.reply_count, 0);
    }
}

#[tokio::test]
async fn test_deleting_older_reply_keeps_pointer() {
    for backend in BACKENDS {
        let fx = Fixture::new(backend).await;
        let alice = fx.user("alice").await;
        let go = fx.node("go").await;
        let topic = fx.topic(&go, &alice, "T1").await;
        let r1 = fx.reply(&topic, &alice, "one").await;
        let r2 = fx.reply(&topic, &alice, "two").await;

        lifecycle::delete_reply(&fx.store, r1.id).await.unwrap();
        let topic: Topic = fx.reload(topic.id).await;
        assert_eq!(topic.reply_count, 1, "{backend:?}");
        assert_eq!(topic.latest_reply_id, r2.id.to_string());
    }
}

#[tokio::test]
async fn test_delete_topic_cascades_and_adjusts_counters() {
    for backend in BACKENDS {
        let fx = Fixture::new(backend).await;
        let alice = fx.user("alice").await;
        let go = fx.node("go").await;
        let doomed = fx.topic(&go, &alice, "doomed").await;
        let kept = fx.topic(&go, &alice, "kept").await;
        fx.reply(&doomed, &alice, "a").await;
        fx.reply(&doomed, &alice, "b").await;
        fx.reply(&kept, &alice, "c").await;

        lifecycle::delete_topic(&fx.store, doomed.id).await.unwrap();

        assert!(fx.store.get::<Topic>(doomed.id).await.unwrap().is_none(), "{backend:?}");
        let go: Node = fx.reload(go.id).await;
        assert_eq!(go.topic_count, 1);
        let status: Status = fx.reload(STATUS_ID).await;
        assert_eq!((status.topic_count, status.reply_count), (1, 1));
        assert_eq!(fx.store.count::<Reply>(nb_core::Filter::new()).await.unwrap(), 1);

        let missing = lifecycle::delete_topic(&fx.store, doomed.id).await;
        assert!(matches!(missing, Err(AppError::NotFound(..))));
    }
}

#[tokio::test]
async fn test_failed_precondition_leaves_store_untouched() {
    for backend in BACKENDS {
        let fx = Fixture::new(backend).await;
        let alice = fx.user("alice").await;
        let go = fx.node("go").await;
        let topic = fx.topic(&go, &alice, "T1").await;

        let stray = Reply::new(alice.id, topic.id, "stray", "<p>stray</p>", now());
        let batch = WriteBatch::new()
            .insert(&stray)
            .unwrap()
            .increment(collections::TOPICS, topic.id, fields::REPLY_COUNT, 1)
            .expect(collections::TOPICS, topic.id, fields::LATEST_REPLY_ID, "somebody-else")
            .set(collections::TOPICS, topic.id, fields::LATEST_REPLY_ID, stray.id.to_string());

        let result = fx.store.apply(batch).await;
        assert!(matches!(result, Err(AppError::Conflict(_))), "{backend:?}");

        let unchanged: Topic = fx.reload(topic.id).await;
        assert_eq!(unchanged, topic);
        assert!(fx.store.get::<Reply>(stray.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_hits_and_edits() {
    for backend in BACKENDS {
        let fx = Fixture::new(backend).await;
        let alice = fx.user("alice").await;
        let go = fx.node("go").await;
        let topic = fx.topic(&go, &alice, "T1").await;

        for _ in 0..3 {
            lifecycle::record_hit(&fx.store, topic.id).await.unwrap();
        }
        let edited = lifecycle::edit_topic(&fx.store, &fx.renderer, topic.id, "T1 (edited)", "a & b")
            .await
            .unwrap();
        assert_eq!(edited.hits, 3, "{backend:?}");
        assert_eq!(edited.title, "T1 (edited)");
        assert_eq!(edited.html, "<p>a &amp; b</p>");
        assert_eq!(edited.created_at, topic.created_at);
    }
}

#[tokio::test]
async fn test_reconcile_repairs_injected_drift() {
    let fx = Fixture::new(Backend::Memory).await;
    let alice = fx.user("alice").await;
    let go = fx.node("go").await;
    let topic = fx.topic(&go, &alice, "T1").await;
    fx.reply(&topic, &alice, "one").await;
    let r2 = fx.reply(&topic, &alice, "two").await;

    assert!(lifecycle::reconcile_counters(&fx.store).await.unwrap().is_clean());

    let memory = fx.memory();
    assert!(memory.poke(collections::NODES, &go.id.to_string(), fields::TOPIC_COUNT, json!(99)).await);
    assert!(memory.poke(collections::TOPICS, &topic.id.to_string(), fields::REPLY_COUNT, json!(0)).await);
    assert!(memory.poke(collections::TOPICS, &topic.id.to_string(), fields::LATEST_REPLY_ID, json!("")).await);
    assert!(memory.poke(collections::STATUS, &STATUS_ID.to_string(), fields::USER_COUNT, json!(0)).await);

    let report = lifecycle::reconcile_counters(&fx.store).await.unwrap();
    assert_eq!(
        report,
        lifecycle::ReconcileReport {
            nodes_fixed: 1,
            topics_fixed: 1,
            status_fixed: true,
        }
    );

    let go: Node = fx.reload(go.id).await;
    assert_eq!(go.topic_count, 1);
    let topic: Topic = fx.reload(topic.id).await;
    assert_eq!(topic.reply_count, 2);
    assert_eq!(topic.latest_reply_id, r2.id.to_string());
    assert_eq!(topic.latest_replied_at, r2.created_at);
    let status: Status = fx.reload(STATUS_ID).await;
    assert_eq!((status.user_count, status.topic_count, status.reply_count), (1, 1, 2));

    assert!(lifecycle::reconcile_counters(&fx.store).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_add_reply_rebuilds_batch_after_lost_race() {
    let user = User {
        id: new_id(),
        username: "alice".into(),
        password: SecretString::from("x".to_string()),
        email: "alice@example.com".into(),
        website: None,
        location: None,
        tagline: None,
        bio: None,
        twitter: None,
        weibo: None,
        joined_at: now(),
        follow: Vec::new(),
        fans: Vec::new(),
        is_superuser: false,
        is_active: true,
        validate_code: SecretString::from(String::new()),
        reset_code: SecretString::from(String::new()),
        index: 1,
    };
    let created_at = now();
    let topic = Topic {
        id: new_id(),
        node_id: new_id(),
        user_id: user.id,
        title: "T1".into(),
        markdown: String::new(),
        html: String::new(),
        created_at,
        reply_count: 0,
        latest_reply_id: String::new(),
        latest_replied_at: created_at,
        hits: 0,
    };

    let topic_doc = to_document(&topic).unwrap();
    let user_doc = to_document(&user).unwrap();
    let mut mock = MockDocumentStore::new();
    mock.expect_find_one().returning(move |collection, _| match collection {
        "topics" => Ok(Some(topic_doc.clone())),
        "users" => Ok(Some(user_doc.clone())),
        other => panic!("unexpected lookup in {other}"),
    });

    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    mock.expect_apply().times(2).returning(move |batch| {
        assert!(batch.ops.iter().any(|op| matches!(
            op,
            Mutation::Expect { field, .. } if field == fields::LATEST_REPLY_ID
        )));
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(AppError::Conflict("latest_reply_id moved".into()))
        } else {
            Ok(())
        }
    });

    let store = ForumStore::new(Arc::new(mock));
    let reply = lifecycle::add_reply(
        &store,
        &EscapingRenderer,
        NewReply {
            topic_id: topic.id,
            user_id: user.id,
            markdown: "hi".into(),
            created_at: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.topic_id, topic.id);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_updates_on_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("forum.db").display());
    let store = ForumStore::new(Arc::new(SqliteDocumentStore::new(&url).await.unwrap()));
    lifecycle::bootstrap_status(&store).await.unwrap();

    let credentials = FakeCredentials::default();
    let registration = lifecycle::register_user(
        &store,
        &credentials,
        NewUser {
            username: "alice".into(),
            password: SecretString::from("pw".to_string()),
            email: "alice@example.com".into(),
        },
    )
    .await
    .unwrap();
    let node = lifecycle::create_node(
        &store,
        NewNode {
            slug: "go".into(),
            name: "Go".into(),
            description: String::new(),
        },
    )
    .await
    .unwrap();
    let new_topic = |title: String| NewTopic {
        node_id: node.id,
        user_id: registration.user.id,
        title,
        markdown: "body".into(),
    };
    let topic = lifecycle::create_topic(&store, &EscapingRenderer, new_topic("hot".into()))
        .await
        .unwrap();

    let mut writers = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        writers.push(tokio::spawn(async move { lifecycle::record_hit(&store, topic.id).await }));
    }
    for i in 0..8 {
        let store = store.clone();
        let new = new_topic(format!("topic {i}"));
        writers.push(tokio::spawn(async move {
            lifecycle::create_topic(&store, &EscapingRenderer, new).await.map(|_| ())
        }));
    }
    for writer in writers {
        writer.await.unwrap().expect("concurrent write failed");
    }

    let topic: Topic = store.require(topic.id).await.unwrap();
    assert_eq!(topic.hits, 32);
    let node: Node = store.require(node.id).await.unwrap();
    assert_eq!(node.topic_count, 9);
    let status: Status = store.require(STATUS_ID).await.unwrap();
    assert_eq!(status.topic_count, 9);
}
