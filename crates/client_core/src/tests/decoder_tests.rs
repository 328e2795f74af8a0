use super::*;
use shared::protocol::User;

fn raw(status: u16, body: &str) -> RawResponse {
    RawResponse::new(status, body)
}

#[test]
fn login_success_yields_token_without_expiry() {
    let token = ResponseDecoder
        .decode_login(&raw(
            200,
            r#"{"status":"success","data":{"authToken":"token","userId":"userid"}}"#,
        ))
        .expect("token");
    assert_eq!(token.auth_token, "token");
    assert_eq!(token.user_id.as_str(), "userid");
    assert!(token.expires_at.is_none());
}

#[test]
fn login_error_status_is_auth_failure() {
    let err = ResponseDecoder
        .decode_login(&raw(200, r#"{"status":"error","message":"bad credentials"}"#))
        .expect_err("auth failure");
    assert_eq!(err.kind, RpcErrorKind::Auth);
    assert_eq!(err.message, "bad credentials");
}

#[test]
fn unauthorized_uses_server_message() {
    let err = ResponseDecoder
        .decode_ack(&raw(401, r#"{"status": "error","message": "Unauthorized"}"#))
        .expect_err("401");
    assert_eq!(err.kind, RpcErrorKind::Auth);
    assert_eq!(err.message, "Unauthorized");
    assert_eq!(err.status, Some(401));
}

#[test]
fn malformed_body_is_invalid_response_with_cause() {
    let err = ResponseDecoder
        .decode::<Value>(&raw(200, "NOT A JSON"))
        .expect_err("invalid");
    assert_eq!(err.kind, RpcErrorKind::InvalidResponse);
    assert!(err.cause().is_some());
}

#[test]
fn status_ranges_map_to_kinds_and_fall_back_to_reason() {
    let client = ResponseDecoder
        .decode_ack(&raw(404, "<html>gone</html>"))
        .expect_err("404");
    assert_eq!(client.kind, RpcErrorKind::ClientError);
    assert_eq!(client.message, "Not Found");

    let server = ResponseDecoder
        .decode_ack(&raw(502, r#"{"error":"upstream down"}"#))
        .expect_err("502");
    assert_eq!(server.kind, RpcErrorKind::ServerError);
    assert_eq!(server.message, "upstream down");

    let other = ResponseDecoder
        .decode_ack(&raw(302, ""))
        .expect_err("302");
    assert_eq!(other.kind, RpcErrorKind::Unknown);
}

#[test]
fn success_false_is_client_error() {
    let err = ResponseDecoder
        .decode_ack(&raw(200, r#"{"success":false,"error":"room not found"}"#))
        .expect_err("failure body");
    assert_eq!(err.kind, RpcErrorKind::ClientError);
    assert_eq!(err.message, "room not found");
}

#[test]
fn page_reports_total_separately_from_items() {
    let page: Paginated<User> = ResponseDecoder
        .decode_page(
            &raw(
                200,
                r#"{"members":[{"_id":"hcBGHsKo763bTDAiw","username":"someone"}],"count":1,"offset":0,"total":154581,"success":true}"#,
            ),
            "members",
        )
        .expect("page");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 154581);
    assert_eq!(page.offset, 0);
}

#[test]
fn missing_list_key_is_invalid_response() {
    let err = ResponseDecoder
        .decode_page::<User>(&raw(200, r#"{"success":true,"total":0}"#), "members")
        .expect_err("missing key");
    assert_eq!(err.kind, RpcErrorKind::InvalidResponse);
}
