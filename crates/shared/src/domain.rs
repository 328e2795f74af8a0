use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(RoomId);
id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(FileId);
id_newtype!(SubscriptionId);

/// Room type as encoded by the server in the `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    #[serde(rename = "c")]
    Public,
    #[serde(rename = "p")]
    Private,
    #[serde(rename = "d")]
    OneToOne,
    #[serde(rename = "l")]
    LiveChat,
}

impl RoomType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Public => "c",
            Self::Private => "p",
            Self::OneToOne => "d",
            Self::LiveChat => "l",
        }
    }

    /// REST endpoint family serving room-scoped lists for this room type.
    pub fn rest_family(self) -> Option<&'static str> {
        match self {
            Self::Public => Some("channels"),
            Self::Private => Some("groups"),
            Self::OneToOne => Some("im"),
            Self::LiveChat => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomIdentity {
    room_id: RoomId,
    room_type: RoomType,
}

impl RoomIdentity {
    pub fn new(room_id: impl Into<RoomId>, room_type: RoomType) -> Self {
        Self {
            room_id: room_id.into(),
            room_type,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn room_type(&self) -> RoomType {
        self.room_type
    }
}

impl fmt::Display for RoomIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_type.code(), self.room_id)
    }
}

/// A category of server-pushed events that a room can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    RoomMessages,
    RoomTyping,
    RoomDelete,
    RoomFiles,
    MentionedMessages,
    StarredMessages,
    PinnedMessages,
    SnippetedMessages,
}

impl StreamKind {
    pub const ALL: [StreamKind; 8] = [
        StreamKind::RoomMessages,
        StreamKind::RoomTyping,
        StreamKind::RoomDelete,
        StreamKind::RoomFiles,
        StreamKind::MentionedMessages,
        StreamKind::StarredMessages,
        StreamKind::PinnedMessages,
        StreamKind::SnippetedMessages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomMessages => "room_messages",
            Self::RoomTyping => "room_typing",
            Self::RoomDelete => "room_delete",
            Self::RoomFiles => "room_files",
            Self::MentionedMessages => "mentioned_messages",
            Self::StarredMessages => "starred_messages",
            Self::PinnedMessages => "pinned_messages",
            Self::SnippetedMessages => "snippeted_messages",
        }
    }

    /// Streams backed by a server-side record set that honours a `limit`.
    pub fn is_record_set(self) -> bool {
        matches!(
            self,
            Self::RoomFiles
                | Self::MentionedMessages
                | Self::StarredMessages
                | Self::PinnedMessages
                | Self::SnippetedMessages
        )
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_wire(self) -> i8 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}
