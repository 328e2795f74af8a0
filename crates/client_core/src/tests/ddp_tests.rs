use super::*;
use crate::transport::SubscribeOptions;

fn routes_for(entries: &[(&str, &str, StreamKind)]) -> HashMap<SubscriptionId, Route> {
    entries
        .iter()
        .map(|(sub, room, kind)| {
            let request =
                StreamRequest::for_kind(&RoomId::from(*room), *kind, SubscribeOptions::default());
            (SubscriptionId::from(*sub), Route::from_request(&request))
        })
        .collect()
}

fn frame(value: Value) -> ServerFrame {
    serde_json::from_value(value).expect("frame")
}

fn targets(events: &[PushEvent]) -> Vec<(String, PushKind)> {
    let mut targets: Vec<(String, PushKind)> = events
        .iter()
        .map(|event| (event.subscription_id.to_string(), event.kind))
        .collect();
    targets.sort_by(|a, b| a.0.cmp(&b.0));
    targets
}

#[test]
fn routes_room_message_to_matching_room_only() {
    let mut routes = routes_for(&[
        ("s1", "GENERAL", StreamKind::RoomMessages),
        ("s2", "random", StreamKind::RoomMessages),
    ]);
    let events = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "stream-room-messages",
            "id": "id",
            "fields": {"eventName": "GENERAL", "args": [{"_id": "m1", "rid": "GENERAL", "msg": "hi"}]}
        })),
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subscription_id, SubscriptionId::from("s1"));
    assert_eq!(events[0].room_id, RoomId::from("GENERAL"));
    assert_eq!(events[0].kind, PushKind::Change);
    assert_eq!(events[0].payload["_id"], json!("m1"));
}

#[test]
fn delete_and_typing_events_become_keyed_payloads() {
    let mut routes = routes_for(&[
        ("del", "GENERAL", StreamKind::RoomDelete),
        ("typ", "GENERAL", StreamKind::RoomTyping),
    ]);
    let deleted = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "stream-notify-room",
            "id": "id",
            "fields": {"eventName": "GENERAL/deleteMessage", "args": [{"_id": "m1"}]}
        })),
    );
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].kind, PushKind::Remove);
    assert_eq!(deleted[0].payload, json!({"_id": "m1"}));

    let stopped = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "stream-notify-room",
            "id": "id",
            "fields": {"eventName": "GENERAL/typing", "args": ["alice", false]}
        })),
    );
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].subscription_id, SubscriptionId::from("typ"));
    assert_eq!(stopped[0].kind, PushKind::Remove);
    assert_eq!(stopped[0].payload, json!({"_id": "alice"}));
}

#[test]
fn record_set_frames_carry_id_into_payload() {
    let mut routes = routes_for(&[
        ("pin", "GENERAL", StreamKind::PinnedMessages),
        ("other", "random", StreamKind::PinnedMessages),
    ]);
    let added = route_frame(
        &mut routes,
        frame(json!({
            "msg": "added",
            "collection": "rocketchat_pinned_message",
            "id": "m9",
            "fields": {"rid": "GENERAL", "msg": "pinned"}
        })),
    );
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].subscription_id, SubscriptionId::from("pin"));
    assert_eq!(added[0].payload["_id"], json!("m9"));

    let removed = route_frame(
        &mut routes,
        frame(json!({"msg": "removed", "collection": "rocketchat_pinned_message", "id": "m9"})),
    );
    assert_eq!(targets(&removed), vec![("pin".to_string(), PushKind::Remove)]);
}

#[test]
fn partial_changes_stay_in_the_owning_room() {
    let mut routes = routes_for(&[
        ("a", "GENERAL", StreamKind::PinnedMessages),
        ("b", "random", StreamKind::PinnedMessages),
    ]);
    route_frame(
        &mut routes,
        frame(json!({
            "msg": "added",
            "collection": "rocketchat_pinned_message",
            "id": "m9",
            "fields": {"rid": "GENERAL", "msg": "pinned"}
        })),
    );
    route_frame(
        &mut routes,
        frame(json!({
            "msg": "added",
            "collection": "rocketchat_pinned_message",
            "id": "r1",
            "fields": {"rid": "random", "msg": "elsewhere"}
        })),
    );

    let changed = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "rocketchat_pinned_message",
            "id": "m9",
            "fields": {"msg": "edited"}
        })),
    );
    assert_eq!(targets(&changed), vec![("a".to_string(), PushKind::Change)]);
    assert_eq!(changed[0].room_id, RoomId::from("GENERAL"));

    let removed = route_frame(
        &mut routes,
        frame(json!({"msg": "removed", "collection": "rocketchat_pinned_message", "id": "r1"})),
    );
    assert_eq!(targets(&removed), vec![("b".to_string(), PushKind::Remove)]);
}

#[test]
fn unowned_frames_without_room_are_dropped() {
    let mut routes = routes_for(&[
        ("a", "GENERAL", StreamKind::StarredMessages),
        ("b", "random", StreamKind::StarredMessages),
    ]);
    let changed = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "rocketchat_starred_message",
            "id": "ghost",
            "fields": {"msg": "edited"}
        })),
    );
    assert!(changed.is_empty());

    let removed = route_frame(
        &mut routes,
        frame(json!({"msg": "removed", "collection": "rocketchat_starred_message", "id": "ghost"})),
    );
    assert!(removed.is_empty());
}

#[test]
fn removal_releases_ownership() {
    let mut routes = routes_for(&[("a", "GENERAL", StreamKind::RoomFiles)]);
    route_frame(
        &mut routes,
        frame(json!({
            "msg": "added",
            "collection": "room_files",
            "id": "f1",
            "fields": {"rid": "GENERAL", "name": "a.txt"}
        })),
    );
    let first = route_frame(
        &mut routes,
        frame(json!({"msg": "removed", "collection": "room_files", "id": "f1"})),
    );
    assert_eq!(first.len(), 1);
    let second = route_frame(
        &mut routes,
        frame(json!({"msg": "removed", "collection": "room_files", "id": "f1"})),
    );
    assert!(second.is_empty());
}

#[test]
fn changed_frames_forward_cleared_fields() {
    let mut routes = routes_for(&[("a", "GENERAL", StreamKind::PinnedMessages)]);
    route_frame(
        &mut routes,
        frame(json!({
            "msg": "added",
            "collection": "rocketchat_pinned_message",
            "id": "m1",
            "fields": {"rid": "GENERAL", "msg": "hi", "pinned": true}
        })),
    );
    let changed = route_frame(
        &mut routes,
        frame(json!({
            "msg": "changed",
            "collection": "rocketchat_pinned_message",
            "id": "m1",
            "cleared": ["pinned"]
        })),
    );
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].cleared, vec!["pinned".to_string()]);
    assert_eq!(changed[0].payload, json!({"_id": "m1"}));
}

#[tokio::test]
async fn method_results_resolve_their_waiter() {
    let state = Mutex::new(DdpState::default());
    let (outbound, _outbound_rx) = mpsc::unbounded_channel();
    let (pushes, _) = broadcast::channel(4);
    let (ok_tx, ok_rx) = oneshot::channel();
    let (err_tx, err_rx) = oneshot::channel();
    {
        let mut guard = state.lock().await;
        guard.methods.insert("1".into(), ok_tx);
        guard.methods.insert("2".into(), err_tx);
    }

    handle_frame(
        frame(json!({"msg": "result", "id": "1", "result": {"_id": "m1"}})),
        &outbound,
        &state,
        &pushes,
    )
    .await;
    handle_frame(
        frame(json!({"msg": "result", "id": "2", "error": {"reason": "not allowed"}})),
        &outbound,
        &state,
        &pushes,
    )
    .await;

    assert_eq!(ok_rx.await.expect("sent"), Ok(json!({"_id": "m1"})));
    assert_eq!(err_rx.await.expect("sent"), Err("not allowed".to_string()));
    assert!(state.lock().await.methods.is_empty());
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let state = Mutex::new(DdpState::default());
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let (pushes, _) = broadcast::channel(4);

    handle_frame(frame(json!({"msg": "ping", "id": "7"})), &outbound, &state, &pushes).await;

    let pong: Value = serde_json::from_str(&outbound_rx.recv().await.expect("pong")).expect("json");
    assert_eq!(pong, json!({"msg": "pong", "id": "7"}));
}

#[test]
fn unknown_frames_are_tolerated() {
    assert!(matches!(
        frame(json!({"msg": "updated", "methods": ["1"]})),
        ServerFrame::Other
    ));
    assert!(serde_json::from_value::<ServerFrame>(json!({"server_id": "0"})).is_err());
}
