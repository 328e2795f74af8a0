use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FileId, MessageId, RoomId, RoomType, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub auth_token: String,
    pub user_id: UserId,
    #[serde(default, with = "crate::timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<Token>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub utc_offset: Option<f64>,
}

/// A file uploaded to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "_id")]
    pub id: FileId,
    pub name: String,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "rid")]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, with = "crate::timestamp")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(rename = "_id")]
    pub id: FileId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(rename = "rid")]
    pub room_id: RoomId,
    #[serde(default)]
    pub msg: String,
    #[serde(default, rename = "u")]
    pub sender: Option<UserRef>,
    #[serde(default, with = "crate::timestamp")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default, rename = "_updatedAt", with = "crate::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, rename = "pinnedBy")]
    pub pinned_by: Option<UserRef>,
    #[serde(default)]
    pub starred: Vec<IdRef>,
    #[serde(default)]
    pub mentions: Vec<UserRef>,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

/// A room the caller has joined, as returned by the room-list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "_id")]
    pub room_id: RoomId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "t")]
    pub room_type: RoomType,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub msgs: Option<u64>,
    #[serde(default, rename = "ro")]
    pub read_only: bool,
    #[serde(default, rename = "_updatedAt", with = "crate::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRole {
    #[serde(rename = "rid")]
    pub room_id: RoomId,
    #[serde(rename = "u")]
    pub user: UserRef,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// One page of a server-side result set. `total` counts the whole set, not
/// the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(rename = "rid")]
    pub room_id: RoomId,
    pub msg: String,
}

/// A file already stored by the upload service, announced to a room.
#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    #[serde(skip)]
    pub store: String,
    #[serde(rename = "_id")]
    pub file_id: FileId,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
