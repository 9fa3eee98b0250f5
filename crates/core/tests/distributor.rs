//! Placement behavior against an in-process fleet.

mod common;

use common::*;

use serde_json::json;

use browsergrid_core::config::GridConfig;
use browsergrid_core::error::Error;

#[tokio::test]
async fn test_happy_path_create_and_delete() {
    let grid = grid(GridConfig::default());
    let fake = grid
        .add_node(node_status(
            "n1",
            "http://a:5555",
            vec![chrome_slot("slot-1")],
        ))
        .await;

    let session = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap();

    assert!(!session.session_id.is_empty());
    assert_eq!(session.node_id, "n1");
    assert_eq!(grid.sessions.len().await, 1);
    assert_eq!(fake.created_count(), 1);

    let node = grid.registry.get("n1").await.unwrap();
    assert_eq!(node.busy_count(), 1);

    grid.distributor
        .delete_session(&session.session_id)
        .await
        .unwrap();

    assert_eq!(grid.sessions.len().await, 0);
    let node = grid.registry.get("n1").await.unwrap();
    assert_eq!(node.busy_count(), 0);
    assert_eq!(fake.deleted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_matching_stereotype() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status(
        "n1",
        "http://a:5555",
        vec![slot("slot-1", json!({"browserName": "firefox"}))],
    ))
    .await;

    let err = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotCreated(_)));
    assert_eq!(grid.sessions.len().await, 0);
}

#[tokio::test]
async fn test_empty_capabilities_refused() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status(
        "n1",
        "http://a:5555",
        vec![chrome_slot("slot-1")],
    ))
    .await;

    let err = grid
        .distributor
        .create_session(w3c_request(json!({}), vec![]))
        .await
        .unwrap_err();
    match err {
        Error::SessionNotCreated(message) => {
            assert!(message.contains("no capabilities supplied"))
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_draining_node_never_chosen() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status(
        "live",
        "http://a:5555",
        vec![chrome_slot("s1"), chrome_slot("s2")],
    ))
    .await;

    // draining with one session still running, so it stays in the fleet
    let mut draining = node_status("drainer", "http://b:5555", vec![chrome_slot("s1"), chrome_slot("s2")]);
    draining.draining = true;
    draining.slots[0].session_id = Some("old-session".to_string());
    let drainer = grid.add_node(draining).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let distributor = grid.distributor.clone();
        tasks.push(tokio::spawn(async move {
            distributor
                .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
                .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if let Ok(session) = task.await.unwrap() {
            assert_eq!(session.node_id, "live");
            successes += 1;
        }
    }
    assert_eq!(successes, 2);
    assert_eq!(drainer.created_count(), 0);

    let node = grid.registry.get("drainer").await.unwrap();
    assert_eq!(node.busy_count(), 1);
}

#[tokio::test]
async fn test_one_slot_two_racers() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status(
        "n1",
        "http://a:5555",
        vec![chrome_slot("slot-1")],
    ))
    .await;

    let a = {
        let distributor = grid.distributor.clone();
        tokio::spawn(async move {
            distributor
                .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
                .await
        })
    };
    let b = {
        let distributor = grid.distributor.clone();
        tokio::spawn(async move {
            distributor
                .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
                .await
        })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(Error::SessionNotCreated(_)))));
    assert_eq!(grid.sessions.len().await, 1);
}

#[tokio::test]
async fn test_refusing_node_falls_through_to_next_alternative() {
    let grid = grid(GridConfig::default());
    let chrome_node = grid
        .add_node(node_status(
            "chrome-node",
            "http://a:5555",
            vec![chrome_slot("s1")],
        ))
        .await;
    chrome_node.refuse_sessions();
    grid.add_node(node_status(
        "firefox-node",
        "http://b:5555",
        vec![slot("s1", json!({"browserName": "firefox"}))],
    ))
    .await;

    let session = grid
        .distributor
        .create_session(w3c_request(
            json!({}),
            vec![
                json!({"browserName": "chrome"}),
                json!({"browserName": "firefox"}),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(session.node_id, "firefox-node");

    // the failed reservation was handed back
    let node = grid.registry.get("chrome-node").await.unwrap();
    assert_eq!(node.active_count(), 0);
}

#[tokio::test]
async fn test_transport_failure_does_not_evict() {
    let grid = grid(GridConfig::default());
    let fake = grid
        .add_node(node_status("n1", "http://a:5555", vec![chrome_slot("s1")]))
        .await;
    fake.refuse_sessions();

    let err = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotCreated(_)));

    // still registered; only the health loop evicts
    assert!(grid.registry.get("n1").await.is_some());
}

#[tokio::test]
async fn test_empty_node_preferred_over_busy_node() {
    let grid = grid(GridConfig::default());

    let mut busy = node_status("busy", "http://a:5555", vec![chrome_slot("s1"), chrome_slot("s2")]);
    busy.slots[0].session_id = Some("existing".to_string());
    grid.add_node(busy).await;
    grid.add_node(node_status("empty", "http://b:5555", vec![chrome_slot("s1")]))
        .await;

    let session = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap();
    assert_eq!(session.node_id, "empty");
}

#[tokio::test]
async fn test_tie_breaks_on_smallest_node_id() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status("beta", "http://b:5555", vec![chrome_slot("s1")]))
        .await;
    grid.add_node(node_status("alpha", "http://a:5555", vec![chrome_slot("s1")]))
        .await;

    let session = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap();
    assert_eq!(session.node_id, "alpha");
}

#[tokio::test]
async fn test_least_recently_started_slot_wins_within_node() {
    let grid = grid(GridConfig::default());
    let mut status = node_status(
        "n1",
        "http://a:5555",
        vec![chrome_slot("fresh"), chrome_slot("stale")],
    );
    status.slots[0].last_started = Some(chrono::Utc::now());
    status.slots[1].last_started = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    grid.add_node(status).await;

    let session = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap();
    assert_eq!(session.slot_id, "stale");
}

#[tokio::test]
async fn test_declared_capacity_caps_placements() {
    let grid = grid(GridConfig::default());
    let mut status = node_status("n1", "http://a:5555", vec![chrome_slot("s1"), chrome_slot("s2")]);
    status.max_sessions = 1;
    grid.add_node(status).await;

    let request = || w3c_request(json!({"browserName": "chrome"}), vec![]);
    grid.distributor.create_session(request()).await.unwrap();
    let err = grid.distributor.create_session(request()).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotCreated(_)));

    let node = grid.registry.get("n1").await.unwrap();
    assert_eq!(node.busy_count(), 1);
}

#[tokio::test]
async fn test_version_prefix_request_matches() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status(
        "n1",
        "http://a:5555",
        vec![slot(
            "s1",
            json!({"browserName": "chrome", "browserVersion": "121.0.6167.85"}),
        )],
    ))
    .await;

    let session = grid
        .distributor
        .create_session(w3c_request(
            json!({"browserName": "chrome", "browserVersion": "121"}),
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(session.node_id, "n1");
}

#[tokio::test]
async fn test_exhausted_deadline_fails_fast() {
    let config = GridConfig {
        new_session_timeout_secs: 0,
        ..GridConfig::default()
    };
    let grid = grid(config);
    grid.add_node(node_status("n1", "http://a:5555", vec![chrome_slot("s1")]))
        .await;

    let err = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap_err();
    match err {
        Error::SessionNotCreated(message) => assert!(message.contains("timed out")),
        other => panic!("unexpected error {other:?}"),
    }

    // nothing leaked
    let node = grid.registry.get("n1").await.unwrap();
    assert_eq!(node.active_count(), 0);
}

#[tokio::test]
async fn test_delete_with_vanished_node_still_clears_binding() {
    let grid = grid(GridConfig::default());
    grid.add_node(node_status("n1", "http://a:5555", vec![chrome_slot("s1")]))
        .await;

    let session = grid
        .distributor
        .create_session(w3c_request(json!({"browserName": "chrome"}), vec![]))
        .await
        .unwrap();

    // the node process dies between create and delete
    grid.factory.forget("http://a:5555");

    grid.distributor
        .delete_session(&session.session_id)
        .await
        .unwrap();
    assert_eq!(grid.sessions.len().await, 0);
}

#[tokio::test]
async fn test_delete_unknown_session() {
    let grid = grid(GridConfig::default());
    let err = grid.distributor.delete_session("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NoSuchSession(_)));
}
