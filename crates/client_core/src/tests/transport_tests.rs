use super::*;

#[test]
fn room_streams_use_notify_room_event_names() {
    let room_id = RoomId::from("GENERAL");
    let typing =
        StreamRequest::for_kind(&room_id, StreamKind::RoomTyping, SubscribeOptions::default());
    assert_eq!(typing.name, "stream-notify-room");
    assert_eq!(typing.params, vec![json!("GENERAL/typing"), json!(false)]);

    let delete =
        StreamRequest::for_kind(&room_id, StreamKind::RoomDelete, SubscribeOptions::default());
    assert_eq!(delete.params[0], json!("GENERAL/deleteMessage"));
}

#[test]
fn record_set_streams_carry_limit() {
    let request = StreamRequest::for_kind(
        &RoomId::from("GENERAL"),
        StreamKind::PinnedMessages,
        SubscribeOptions { limit: 20 },
    );
    assert_eq!(request.name, "pinnedMessages");
    assert_eq!(request.params, vec![json!("GENERAL"), json!(20)]);
}

#[test]
fn query_value_finds_first_match() {
    let request = RestRequest::get("/api/v1/channels.files")
        .query("roomId", "general")
        .query("offset", "0");
    assert_eq!(request.query_value("offset"), Some("0"));
    assert_eq!(request.query_value("sort"), None);
}

#[test]
fn only_record_sets_send_a_limit() {
    let room_id = RoomId::from("GENERAL");
    for kind in StreamKind::ALL {
        let request = StreamRequest::for_kind(&room_id, kind, SubscribeOptions { limit: 5 });
        let expected = if kind.is_record_set() {
            json!(5)
        } else {
            json!(false)
        };
        assert_eq!(request.params[1], expected, "{kind}");
    }
}
