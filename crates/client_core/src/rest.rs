use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use shared::{
    domain::{MessageId, RoomId, RoomIdentity, RoomType, SortDirection, UserId},
    error::{require, ContractViolation, RpcError},
    protocol::{
        Attachment, FileDescriptor, LoginRequest, Message, OutgoingMessage, Paginated, RoomRole,
        RoomSummary, Token, User,
    },
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::TokenProvider,
    call::RpcCall,
    decoder::ResponseDecoder,
    transport::{RawResponse, RestRequest, Transport},
};

const API_PREFIX: &str = "/api/v1";
const MESSAGE_ID_LEN: usize = 17;

fn endpoint(name: &str) -> String {
    format!("{API_PREFIX}/{name}")
}

/// A sortable column of one list resource.
pub trait SortField: Copy + Send + 'static {
    fn field_name(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSort {
    UploadedAt,
    Name,
    Size,
    Type,
}

impl SortField for FileSort {
    fn field_name(self) -> &'static str {
        match self {
            Self::UploadedAt => "uploadedAt",
            Self::Name => "name",
            Self::Size => "size",
            Self::Type => "type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberSort {
    Username,
    Name,
    Status,
}

impl SortField for MemberSort {
    fn field_name(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Name => "name",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSort {
    Timestamp,
}

impl SortField for MessageSort {
    fn field_name(self) -> &'static str {
        match self {
            Self::Timestamp => "ts",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<S> {
    pub offset: u32,
    pub sort_by: Option<S>,
    pub direction: SortDirection,
}

impl<S: SortField> PageRequest<S> {
    pub fn at(offset: u32) -> Self {
        Self {
            offset,
            sort_by: None,
            direction: SortDirection::default(),
        }
    }

    pub fn sorted(offset: u32, sort_by: S, direction: SortDirection) -> Self {
        Self {
            offset,
            sort_by: Some(sort_by),
            direction,
        }
    }

    /// `offset` verbatim, `sort` as a single `{field: ±1}` object.
    fn apply(&self, request: RestRequest) -> RestRequest {
        let request = request.query("offset", self.offset.to_string());
        match self.sort_by {
            Some(field) => {
                let mut sort = Map::new();
                sort.insert(field.field_name().to_string(), json!(self.direction.as_wire()));
                request.query("sort", Value::Object(sort).to_string())
            }
            None => request,
        }
    }
}

impl<S: SortField> Default for PageRequest<S> {
    fn default() -> Self {
        Self::at(0)
    }
}

fn family(room: &RoomIdentity) -> Result<&'static str, ContractViolation> {
    room.room_type().rest_family().ok_or_else(|| {
        ContractViolation::new(
            "room_type",
            "live chat rooms have no room-scoped REST endpoints",
        )
    })
}

fn room_scoped(room: &RoomIdentity, operation: &str) -> Result<String, ContractViolation> {
    require("room_id", room.room_id().as_str())?;
    Ok(endpoint(&format!("{}.{operation}", family(room)?)))
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn short_id() -> MessageId {
    MessageId::new(
        Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(MESSAGE_ID_LEN)
            .collect::<String>(),
    )
}

/// Typed REST operations. Each method validates its arguments and returns
/// the call to issue; nothing touches the network until the call is
/// awaited or spawned.
pub struct RestClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    decoder: ResponseDecoder,
}

impl RestClient {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            transport,
            tokens,
            decoder: ResponseDecoder,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    fn authorized(&self, request: RestRequest) -> RestRequest {
        match self.tokens.token() {
            Some(token) => request
                .header("X-Auth-Token", token.auth_token)
                .header("X-User-Id", token.user_id.to_string()),
            None => request,
        }
    }

    fn execute<T, F>(&self, request: RestRequest, decode: F) -> RpcCall<T>
    where
        T: Send + 'static,
        F: FnOnce(&ResponseDecoder, &RawResponse) -> Result<T, RpcError> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let decoder = self.decoder;
        let request = self.authorized(request);
        RpcCall::new(async move {
            let path = request.path.clone();
            debug!(method = ?request.method, %path, "rest: issuing request");
            match transport.request(request).await {
                Ok(raw) => {
                    let result = decode(&decoder, &raw);
                    if let Err(err) = &result {
                        warn!(
                            %path,
                            kind = ?err.kind,
                            status = raw.status,
                            "rest: call failed: {}",
                            err.message
                        );
                    }
                    result
                }
                Err(err) => {
                    warn!(%path, "rest: transport failure: {err:#}");
                    Err(RpcError::unknown(format!("{err:#}")).with_cause(err))
                }
            }
        })
    }

    /// Server method invoked over the streaming channel instead of REST.
    fn stream_call<T, F>(&self, method: &'static str, params: Vec<Value>, decode: F) -> RpcCall<T>
    where
        T: Send + 'static,
        F: FnOnce(Value) -> Result<T, RpcError> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        RpcCall::new(async move {
            debug!(method, "rest: issuing stream method");
            match transport.call_method(method, params).await {
                Ok(value) => decode(value),
                Err(err) => {
                    warn!(method, "rest: stream method failed: {err:#}");
                    Err(RpcError::unknown(format!("{err:#}")).with_cause(err))
                }
            }
        })
    }

    fn caller_id(&self) -> Result<UserId, RpcError> {
        self.tokens
            .user_id()
            .ok_or_else(|| RpcError::auth("no signed-in user"))
    }

    pub fn sign_in(&self, username: &str, password: &str) -> Result<RpcCall<Token>, ContractViolation> {
        require("username", username)?;
        require("password", password)?;
        let request = RestRequest::post(
            endpoint("login"),
            json!(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            }),
        );
        let tokens = Arc::clone(&self.tokens);
        Ok(self.execute(request, move |decoder, raw| {
            let token = decoder.decode_login(raw)?;
            tokens.save(&token);
            Ok(token)
        }))
    }

    pub fn list_room_files(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<FileSort>>,
    ) -> Result<RpcCall<Paginated<Attachment>>, ContractViolation> {
        let path = room_scoped(room, "files")?;
        let request = page
            .unwrap_or_default()
            .apply(RestRequest::get(path).query("roomId", room.room_id().as_str()));
        Ok(self.execute(request, |decoder, raw| decoder.decode_page(raw, "files")))
    }

    pub fn list_room_members(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<MemberSort>>,
    ) -> Result<RpcCall<Paginated<User>>, ContractViolation> {
        let path = room_scoped(room, "members")?;
        let request = page
            .unwrap_or_default()
            .apply(RestRequest::get(path).query("roomId", room.room_id().as_str()));
        Ok(self.execute(request, |decoder, raw| decoder.decode_page(raw, "members")))
    }

    fn list_messages_matching(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<MessageSort>>,
        filter: Value,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        let path = room_scoped(room, "messages")?;
        let request = page
            .unwrap_or_default()
            .apply(RestRequest::get(path).query("roomId", room.room_id().as_str()))
            .query("query", filter.to_string());
        Ok(self.execute(request, |decoder, raw| decoder.decode_page(raw, "messages")))
    }

    pub fn list_pinned_messages(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        self.list_messages_matching(room, page, json!({"pinned": true}))
    }

    /// Messages the signed-in caller starred.
    pub fn list_favorite_messages(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        room_scoped(room, "messages")?;
        match self.caller_id() {
            Ok(user_id) => self.list_messages_matching(
                room,
                page,
                json!({"starred._id": {"$in": [user_id.as_str()]}}),
            ),
            Err(err) => Ok(RpcCall::failed(err)),
        }
    }

    pub fn list_mentioned_messages(
        &self,
        room: &RoomIdentity,
        page: Option<PageRequest<MessageSort>>,
    ) -> Result<RpcCall<Paginated<Message>>, ContractViolation> {
        room_scoped(room, "messages")?;
        match self.caller_id() {
            Ok(user_id) => self.list_messages_matching(
                room,
                page,
                json!({"mentions._id": {"$in": [user_id.as_str()]}}),
            ),
            Err(err) => Ok(RpcCall::failed(err)),
        }
    }

    pub fn list_joined_rooms(
        &self,
        room_type: RoomType,
    ) -> Result<RpcCall<Vec<RoomSummary>>, ContractViolation> {
        let (name, key) = match room_type {
            RoomType::Public => ("channels.list.joined", "channels"),
            RoomType::Private => ("groups.list", "groups"),
            RoomType::OneToOne => ("dm.list", "ims"),
            RoomType::LiveChat => {
                return Err(ContractViolation::new(
                    "room_type",
                    "live chat rooms cannot be listed",
                ))
            }
        };
        let request = RestRequest::get(endpoint(name));
        Ok(self.execute(request, move |decoder, raw| decoder.decode_list(raw, key)))
    }

    pub fn room_history(
        &self,
        room: &RoomIdentity,
        count: u32,
        oldest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<RpcCall<Vec<Message>>, ContractViolation> {
        let path = room_scoped(room, "history")?;
        let mut request = RestRequest::get(path)
            .query("roomId", room.room_id().as_str())
            .query("count", count.to_string());
        if let Some(oldest) = oldest {
            request = request.query("oldest", timestamp(oldest));
        }
        if let Some(latest) = latest {
            request = request.query("latest", timestamp(latest));
        }
        Ok(self.execute(request, |decoder, raw| decoder.decode_list(raw, "messages")))
    }

    pub fn room_roles(
        &self,
        room: &RoomIdentity,
    ) -> Result<RpcCall<Vec<RoomRole>>, ContractViolation> {
        let path = room_scoped(room, "roles")?;
        let request = RestRequest::get(path).query("roomId", room.room_id().as_str());
        Ok(self.execute(request, |decoder, raw| decoder.decode_list(raw, "roles")))
    }

    pub fn send_message(
        &self,
        room_id: &RoomId,
        text: &str,
    ) -> Result<RpcCall<Message>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("text", text)?;
        let outgoing = OutgoingMessage {
            id: short_id(),
            room_id: room_id.clone(),
            msg: text.to_string(),
        };
        let request =
            RestRequest::post(endpoint("chat.sendMessage"), json!({ "message": outgoing }));
        Ok(self.execute(request, |decoder, raw| decoder.decode_field(raw, "message")))
    }

    pub fn update_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<RpcCall<Message>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("message_id", message_id.as_str())?;
        require("text", text)?;
        let request = RestRequest::post(
            endpoint("chat.update"),
            json!({"roomId": room_id, "msgId": message_id, "text": text}),
        );
        Ok(self.execute(request, |decoder, raw| decoder.decode_field(raw, "message")))
    }

    pub fn delete_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<RpcCall<()>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("message_id", message_id.as_str())?;
        let request = RestRequest::post(
            endpoint("chat.delete"),
            json!({"roomId": room_id, "msgId": message_id}),
        );
        Ok(self.ack(request))
    }

    pub fn pin_message(&self, message_id: &MessageId) -> Result<RpcCall<()>, ContractViolation> {
        self.message_action("chat.pinMessage", message_id)
    }

    pub fn unpin_message(&self, message_id: &MessageId) -> Result<RpcCall<()>, ContractViolation> {
        self.message_action("chat.unPinMessage", message_id)
    }

    pub fn star_message(
        &self,
        message_id: &MessageId,
        starred: bool,
    ) -> Result<RpcCall<()>, ContractViolation> {
        let name = if starred {
            "chat.starMessage"
        } else {
            "chat.unStarMessage"
        };
        self.message_action(name, message_id)
    }

    pub fn react(
        &self,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<RpcCall<()>, ContractViolation> {
        require("message_id", message_id.as_str())?;
        require("emoji", emoji)?;
        let request = RestRequest::post(
            endpoint("chat.react"),
            json!({"messageId": message_id, "emoji": emoji}),
        );
        Ok(self.ack(request))
    }

    /// Tells the other members of the room whether `username` is typing.
    pub fn send_typing(
        &self,
        room_id: &RoomId,
        username: &str,
        typing: bool,
    ) -> Result<RpcCall<()>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("username", username)?;
        let params = vec![
            json!(format!("{room_id}/typing")),
            json!(username),
            json!(typing),
        ];
        Ok(self.stream_call("stream-notify-room", params, |_| Ok(())))
    }

    /// Posts a message referencing a file the upload service already stored.
    pub fn send_file_message(
        &self,
        room_id: &RoomId,
        file: &FileDescriptor,
    ) -> Result<RpcCall<Message>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("store", &file.store)?;
        require("file_id", file.file_id.as_str())?;
        let params = vec![json!(room_id), json!(file.store), json!(file)];
        Ok(self.stream_call("sendFileMessage", params, |value| {
            serde_json::from_value(value).map_err(RpcError::invalid_response)
        }))
    }

    pub fn search_messages(
        &self,
        room_id: &RoomId,
        text: &str,
        limit: u32,
    ) -> Result<RpcCall<Vec<Message>>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        require("text", text)?;
        let request = RestRequest::get(endpoint("chat.search"))
            .query("roomId", room_id.as_str())
            .query("searchText", text)
            .query("count", limit.to_string());
        Ok(self.execute(request, |decoder, raw| decoder.decode_list(raw, "messages")))
    }

    pub fn archive_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "archive")
    }

    pub fn unarchive_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "unarchive")
    }

    pub fn leave_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "leave")
    }

    pub fn hide_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "close")
    }

    pub fn open_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "open")
    }

    pub fn delete_room(&self, room: &RoomIdentity) -> Result<RpcCall<()>, ContractViolation> {
        self.room_action(room, "delete")
    }

    pub fn set_favorite(
        &self,
        room_id: &RoomId,
        favorite: bool,
    ) -> Result<RpcCall<()>, ContractViolation> {
        require("room_id", room_id.as_str())?;
        let request = RestRequest::post(
            endpoint("rooms.favorite"),
            json!({"roomId": room_id, "favorite": favorite}),
        );
        Ok(self.ack(request))
    }

    fn ack(&self, request: RestRequest) -> RpcCall<()> {
        self.execute(request, |decoder, raw| decoder.decode_ack(raw))
    }

    fn message_action(
        &self,
        name: &str,
        message_id: &MessageId,
    ) -> Result<RpcCall<()>, ContractViolation> {
        require("message_id", message_id.as_str())?;
        let request = RestRequest::post(endpoint(name), json!({"messageId": message_id}));
        Ok(self.ack(request))
    }

    fn room_action(
        &self,
        room: &RoomIdentity,
        operation: &str,
    ) -> Result<RpcCall<()>, ContractViolation> {
        let path = room_scoped(room, operation)?;
        let request = RestRequest::post(path, json!({"roomId": room.room_id()}));
        Ok(self.ack(request))
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
