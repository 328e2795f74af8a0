use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    error::{RpcError, RpcErrorKind},
    protocol::{LoginResponse, Paginated, Token},
};

use crate::transport::RawResponse;

/// Turns a raw status/body pair into a typed value or a classified
/// [`RpcError`]. Stateless; every method produces exactly one outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn decode<T: DeserializeOwned>(&self, raw: &RawResponse) -> Result<T, RpcError> {
        let body = self.checked_body(raw)?;
        serde_json::from_value(body).map_err(RpcError::invalid_response)
    }

    pub fn decode_field<T: DeserializeOwned>(
        &self,
        raw: &RawResponse,
        key: &str,
    ) -> Result<T, RpcError> {
        let mut body = self.checked_body(raw)?;
        let value = take_field(&mut body, key)?;
        serde_json::from_value(value).map_err(RpcError::invalid_response)
    }

    pub fn decode_list<T: DeserializeOwned>(
        &self,
        raw: &RawResponse,
        key: &str,
    ) -> Result<Vec<T>, RpcError> {
        self.decode_field(raw, key)
    }

    /// List endpoint body: `{total, offset, count, <key>: [...]}`. A missing
    /// `total` falls back to the page length.
    pub fn decode_page<T: DeserializeOwned>(
        &self,
        raw: &RawResponse,
        key: &str,
    ) -> Result<Paginated<T>, RpcError> {
        let mut body = self.checked_body(raw)?;
        let items: Vec<T> = serde_json::from_value(take_field(&mut body, key)?)
            .map_err(RpcError::invalid_response)?;
        let total = body
            .get("total")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        let offset = body.get("offset").and_then(Value::as_u64).unwrap_or(0);
        Ok(Paginated {
            items,
            total,
            offset,
        })
    }

    pub fn decode_ack(&self, raw: &RawResponse) -> Result<(), RpcError> {
        self.checked_body(raw).map(|_| ())
    }

    /// Login uses `{status, data}` instead of `success`; anything but
    /// `status: "success"` with a token is an auth failure.
    pub fn decode_login(&self, raw: &RawResponse) -> Result<Token, RpcError> {
        let body = self.checked_body(raw)?;
        let response: LoginResponse =
            serde_json::from_value(body).map_err(RpcError::invalid_response)?;
        match (response.status.as_str(), response.data) {
            ("success", Some(token)) => Ok(token),
            ("success", None) => Err(RpcError::new(
                RpcErrorKind::InvalidResponse,
                "login succeeded without token data",
            )),
            (status, _) => Err(RpcError::auth(
                response
                    .message
                    .unwrap_or_else(|| format!("login failed with status `{status}`")),
            )
            .with_status(raw.status)),
        }
    }

    fn checked_body(&self, raw: &RawResponse) -> Result<Value, RpcError> {
        if let Some(kind) = RpcErrorKind::from_status(raw.status) {
            return Err(RpcError::new(kind, server_message(raw)).with_status(raw.status));
        }

        let body: Value = serde_json::from_str(&raw.body).map_err(RpcError::invalid_response)?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = error_text(&body).unwrap_or_else(|| "request was not successful".into());
            return Err(
                RpcError::new(RpcErrorKind::ClientError, message).with_status(raw.status),
            );
        }
        Ok(body)
    }
}

fn take_field(body: &mut Value, key: &str) -> Result<Value, RpcError> {
    body.get_mut(key).map(Value::take).ok_or_else(|| {
        RpcError::new(
            RpcErrorKind::InvalidResponse,
            format!("response is missing `{key}`"),
        )
    })
}

fn error_text(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .map(str::to_owned)
}

fn server_message(raw: &RawResponse) -> String {
    serde_json::from_str::<Value>(&raw.body)
        .ok()
        .as_ref()
        .and_then(error_text)
        .or_else(|| {
            StatusCode::from_u16(raw.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| format!("HTTP {}", raw.status))
}

#[cfg(test)]
#[path = "tests/decoder_tests.rs"]
mod tests;
