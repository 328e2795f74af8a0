use super::*;

#[test]
fn classifies_http_status_ranges() {
    assert_eq!(RpcErrorKind::from_status(200), None);
    assert_eq!(RpcErrorKind::from_status(204), None);
    assert_eq!(RpcErrorKind::from_status(401), Some(RpcErrorKind::Auth));
    assert_eq!(RpcErrorKind::from_status(403), Some(RpcErrorKind::ClientError));
    assert_eq!(RpcErrorKind::from_status(404), Some(RpcErrorKind::ClientError));
    assert_eq!(RpcErrorKind::from_status(503), Some(RpcErrorKind::ServerError));
    assert_eq!(RpcErrorKind::from_status(302), Some(RpcErrorKind::Unknown));
}

#[test]
fn invalid_response_keeps_parse_error_as_source() {
    let parse_err = serde_json::from_str::<serde_json::Value>("NOT A JSON").unwrap_err();
    let expected = parse_err.to_string();
    let err = RpcError::invalid_response(parse_err);
    assert_eq!(err.kind, RpcErrorKind::InvalidResponse);
    assert_eq!(err.message, expected);
    assert!(err.cause().is_some());
    assert!(StdError::source(&err).is_some());
}

#[test]
fn require_rejects_blank_values() {
    assert!(require("room_id", "GENERAL").is_ok());
    assert_eq!(
        require("room_id", "  ").unwrap_err(),
        ContractViolation::missing("room_id")
    );
}
