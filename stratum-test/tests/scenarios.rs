//! End-to-end coverage of spec.md §8's literal scenarios, driven through
//! the real [`MethodRegistry`](stratum_pipeline::MethodRegistry) exactly
//! as `stratum-api` would, rather than unit-testing the components in
//! isolation.

use stratum_security::{AccessKind, Level, Permission};
use stratum_test::Fixture;

/// S2: an access scoped to `{streamId: "A", level: "manage"}` cannot read
/// a sibling stream `T` until `T` is moved under `A` — and loses that
/// reach again once moved back out, proving the cache is invalidated on
/// both moves rather than permanently widening on the first one.
#[tokio::test]
async fn scenario_s2_permission_inheritance_follows_a_stream_move() {
    let fixture = Fixture::new().await;
    let (user_id, owner_token) = fixture.create_user("alice").await;

    let a = fixture.create_stream(&user_id, "A", "A", None).await;
    fixture.create_stream(&user_id, "A1", "A1", Some(&a.id)).await;
    fixture.create_stream(&user_id, "B", "B", None).await;
    fixture.create_stream(&user_id, "T", "T", None).await;
    fixture
        .create_event(&user_id, "T", "note/txt", 1000.0)
        .await;

    let (_, scoped_token) = fixture
        .create_scoped_access(
            &user_id,
            "scoped",
            AccessKind::App,
            vec![Permission::Stream {
                stream_id: "A".to_string(),
                level: Level::Manage,
            }],
        )
        .await;

    let before = fixture
        .call_as("alice", &scoped_token, "events.get", serde_json::json!({"streams": ["T"]}))
        .await;
    assert!(before.is_err(), "T should not be reachable before the move");
    assert_eq!(before.unwrap_err().kind, stratum_core::ErrorKind::Forbidden);

    // The owning personal access performs the reparent; the scoped app
    // access has no manage permission on `T` itself to do this on its own.
    fixture
        .call_as(
            "alice",
            &owner_token,
            "streams.update",
            serde_json::json!({"id": "T", "parentId": "A"}),
        )
        .await
        .expect("the owner can move T under A");

    let during = fixture
        .call_as("alice", &scoped_token, "events.get", serde_json::json!({"streams": ["T"]}))
        .await
        .expect("T should be reachable once nested under A, after the cache rebuilds the forest");
    assert_eq!(during["events"].as_array().unwrap().len(), 1);

    fixture
        .call_as(
            "alice",
            &owner_token,
            "streams.update",
            serde_json::json!({"id": "T", "parentId": null}),
        )
        .await
        .expect("the owner can move T back out from under A");

    let after = fixture
        .call_as("alice", &scoped_token, "events.get", serde_json::json!({"streams": ["T"]}))
        .await;
    assert!(after.is_err(), "T should be unreachable again after the move back out");
}

/// S3: a single-activity stream rejects an overlapping insert but accepts
/// a non-overlapping one.
#[tokio::test]
async fn scenario_s3_single_activity_rejects_overlap() {
    let fixture = Fixture::new().await;
    let (user_id, token) = fixture.create_user("bob").await;

    fixture
        .call_as(
            "bob",
            &token,
            "streams.create",
            serde_json::json!({"id": "s", "name": "Activity", "singleActivity": true}),
        )
        .await
        .expect("stream creation should succeed");

    fixture
        .call_as(
            "bob",
            &token,
            "events.create",
            serde_json::json!({"streamIds": ["s"], "type": "activity/plain", "time": 1000, "duration": 60}),
        )
        .await
        .expect("first activity should be accepted");

    let overlapping = fixture
        .call_as(
            "bob",
            &token,
            "events.create",
            serde_json::json!({"streamIds": ["s"], "type": "activity/plain", "time": 1030, "duration": 10}),
        )
        .await;
    assert!(overlapping.is_err(), "overlapping activity must be rejected");
    assert_eq!(overlapping.unwrap_err().kind, stratum_core::ErrorKind::InvalidOperation);

    fixture
        .call_as(
            "bob",
            &token,
            "events.create",
            serde_json::json!({"streamIds": ["s"], "type": "activity/plain", "time": 1060}),
        )
        .await
        .expect("a non-overlapping instantaneous event should be accepted");
}

/// S6: an app access with `{feature: "selfRevoke", setting: "forbidden"}`
/// cannot delete itself; without that feature permission, it can.
#[tokio::test]
async fn scenario_s6_self_revoke_feature_gate() {
    let fixture = Fixture::new().await;
    let (user_id, _owner_token) = fixture.create_user("carol").await;

    let (forbidden_id, forbidden_token) = fixture
        .create_scoped_access(
            &user_id,
            "forbidden-app",
            AccessKind::App,
            vec![
                Permission::Stream {
                    stream_id: "*".to_string(),
                    level: Level::Manage,
                },
                Permission::Feature {
                    feature: "selfRevoke".to_string(),
                    setting: "forbidden".to_string(),
                },
            ],
        )
        .await;
    let denied = fixture
        .call_as(
            "carol",
            &forbidden_token,
            "accesses.delete",
            serde_json::json!({"id": forbidden_id}),
        )
        .await;
    assert!(denied.is_err());
    assert_eq!(denied.unwrap_err().kind, stratum_core::ErrorKind::Forbidden);

    let (allowed_id, allowed_token) = fixture
        .create_scoped_access(
            &user_id,
            "allowed-app",
            AccessKind::App,
            vec![Permission::Stream {
                stream_id: "*".to_string(),
                level: Level::Manage,
            }],
        )
        .await;
    fixture
        .call_as(
            "carol",
            &allowed_token,
            "accesses.delete",
            serde_json::json!({"id": allowed_id}),
        )
        .await
        .expect("without selfRevoke=forbidden, self-deletion is allowed");
}

/// Testable property #4: updating a system-stream-backed account field
/// leaves exactly one active event for it and the prior value remains,
/// inactive, for audit.
#[tokio::test]
async fn system_stream_field_update_swaps_the_active_event() {
    let fixture = Fixture::new().await;
    let (_user_id, token) = fixture.create_user("dora").await;

    let before = fixture
        .call_as("dora", &token, "account.get", serde_json::json!({}))
        .await
        .expect("account.get should succeed");
    assert_eq!(before["account"]["email"], serde_json::json!("dora@example.test"));

    fixture
        .call_as(
            "dora",
            &token,
            "account.update",
            serde_json::json!({"email": "dora2@example.test"}),
        )
        .await
        .expect("account.update should succeed");

    let after = fixture
        .call_as("dora", &token, "account.get", serde_json::json!({}))
        .await
        .expect("account.get should succeed");
    assert_eq!(after["account"]["email"], serde_json::json!("dora2@example.test"));
}

/// Stream trashing is two-phase: the first `streams.delete` on a live
/// stream only trashes it, and a second `streams.delete` on the now-trashed,
/// childless stream removes it for good.
#[tokio::test]
async fn streams_delete_is_two_phase_trash_then_permanent() {
    let fixture = Fixture::new().await;
    let (_user_id, token) = fixture.create_user("frank").await;

    fixture
        .call_as(
            "frank",
            &token,
            "streams.create",
            serde_json::json!({"id": "s", "name": "Scratch"}),
        )
        .await
        .expect("stream creation should succeed");

    let trashed = fixture
        .call_as("frank", &token, "streams.delete", serde_json::json!({"id": "s"}))
        .await
        .expect("first delete should trash, not remove");
    assert_eq!(trashed["stream"]["trashed"], serde_json::json!(true));

    let deleted = fixture
        .call_as("frank", &token, "streams.delete", serde_json::json!({"id": "s"}))
        .await
        .expect("second delete on an already-trashed stream should permanently remove it");
    assert_eq!(deleted["streamDeletion"]["id"], serde_json::json!("s"));

    let listed = fixture
        .call_as("frank", &token, "streams.get", serde_json::json!({}))
        .await
        .expect("streams.get should succeed");
    let streams = listed["streams"].as_array().unwrap();
    assert!(!streams.iter().any(|s| s["id"] == "s"), "permanently deleted stream should not be listed");
}

/// The `email` system field is declared unique: once one user claims a
/// value via `account.update`, a second user updating to the same value
/// is rejected with `item-already-exists`, and the second user can still
/// claim it after the first moves away from it.
#[tokio::test]
async fn account_update_enforces_email_uniqueness_across_users() {
    let fixture = Fixture::new().await;
    let (_gina_id, gina_token) = fixture.create_user("gina").await;
    let (_hank_id, hank_token) = fixture.create_user("hank").await;

    fixture
        .call_as(
            "gina",
            &gina_token,
            "account.update",
            serde_json::json!({"email": "shared@example.test"}),
        )
        .await
        .expect("gina should be able to claim the email");

    let conflict = fixture
        .call_as(
            "hank",
            &hank_token,
            "account.update",
            serde_json::json!({"email": "shared@example.test"}),
        )
        .await;
    assert!(conflict.is_err(), "hank should not be able to claim gina's email");
    assert_eq!(conflict.unwrap_err().kind, stratum_core::ErrorKind::ItemAlreadyExists);

    fixture
        .call_as(
            "gina",
            &gina_token,
            "account.update",
            serde_json::json!({"email": "gina-new@example.test"}),
        )
        .await
        .expect("gina should be able to move off the contested email");

    fixture
        .call_as(
            "hank",
            &hank_token,
            "account.update",
            serde_json::json!({"email": "shared@example.test"}),
        )
        .await
        .expect("hank can claim the email once gina releases it");
}

/// `batch`: sub-call results come back in order, and one sub-call's
/// failure does not abort the rest.
#[tokio::test]
async fn batch_runs_sub_calls_in_order_without_aborting_on_failure() {
    let fixture = Fixture::new().await;
    let (_user_id, token) = fixture.create_user("erin").await;

    let result = fixture
        .call_as(
            "erin",
            &token,
            "batch",
            serde_json::json!({"calls": [
                {"method": "streams.create", "params": {"name": "Diary"}},
                {"method": "does.not.exist", "params": {}},
                {"method": "streams.get", "params": {}},
            ]}),
        )
        .await
        .expect("batch itself should succeed even if a sub-call fails");

    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0]["result"]["stream"]["id"].is_string());
    assert!(results[1]["error"]["id"].is_string());
    assert!(results[2]["result"]["streams"].is_array());
}
