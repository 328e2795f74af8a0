use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, ChatClient, CollectionObserver, Document, FileSort, MemberSort, PageRequest,
    TokenProvider,
};
use shared::domain::{RoomIdentity, RoomType, SortDirection, StreamKind};
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides `server_url` from client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RoomKind {
    Public,
    Private,
    Direct,
}

impl From<RoomKind> for RoomType {
    fn from(kind: RoomKind) -> Self {
        match kind {
            RoomKind::Public => RoomType::Public,
            RoomKind::Private => RoomType::Private,
            RoomKind::Direct => RoomType::OneToOne,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Stream {
    Messages,
    Typing,
    Files,
    Mentioned,
    Starred,
    Pinned,
    Snippeted,
}

impl From<Stream> for StreamKind {
    fn from(stream: Stream) -> Self {
        match stream {
            Stream::Messages => StreamKind::RoomMessages,
            Stream::Typing => StreamKind::RoomTyping,
            Stream::Files => StreamKind::RoomFiles,
            Stream::Mentioned => StreamKind::MentionedMessages,
            Stream::Starred => StreamKind::StarredMessages,
            Stream::Pinned => StreamKind::PinnedMessages,
            Stream::Snippeted => StreamKind::SnippetedMessages,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    SignIn,
    Rooms {
        #[arg(long, value_enum, default_value = "public")]
        kind: RoomKind,
    },
    Files {
        room_id: String,
        #[arg(long, value_enum, default_value = "public")]
        kind: RoomKind,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Members {
        room_id: String,
        #[arg(long, value_enum, default_value = "public")]
        kind: RoomKind,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Pinned {
        room_id: String,
        #[arg(long, value_enum, default_value = "public")]
        kind: RoomKind,
    },
    /// Subscribes to a room stream and prints every snapshot until Ctrl-C.
    Watch {
        room_id: String,
        #[arg(long, value_enum, default_value = "public")]
        kind: RoomKind,
        #[arg(long, value_enum, default_value = "messages")]
        stream: Stream,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    let client = ChatClient::new(settings)?;

    if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        let token = client.rest().sign_in(username, password)?.await?;
        info!(user_id = %token.user_id, "tools: signed in");
    }

    match cli.command {
        Command::SignIn => {
            let token = client
                .tokens()
                .token()
                .ok_or_else(|| anyhow!("--username and --password are required"))?;
            println!("user_id={} auth_token={}", token.user_id, token.auth_token);
        }
        Command::Rooms { kind } => {
            for room in client.rest().list_joined_rooms(kind.into())?.await? {
                println!(
                    "{} {}",
                    room.room_id,
                    room.name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Files {
            room_id,
            kind,
            offset,
        } => {
            let room = RoomIdentity::new(room_id, kind.into());
            let page = client
                .rest()
                .list_room_files(
                    &room,
                    Some(PageRequest::sorted(
                        offset,
                        FileSort::UploadedAt,
                        SortDirection::Desc,
                    )),
                )?
                .await?;
            println!("total={} offset={}", page.total, page.offset);
            for file in page.items {
                println!("{} {}", file.id, file.name);
            }
        }
        Command::Members {
            room_id,
            kind,
            offset,
        } => {
            let room = RoomIdentity::new(room_id, kind.into());
            let page = client
                .rest()
                .list_room_members(
                    &room,
                    Some(PageRequest::sorted(
                        offset,
                        MemberSort::Username,
                        SortDirection::Asc,
                    )),
                )?
                .await?;
            println!("total={}", page.total);
            for member in page.items {
                println!("{} {}", member.id, member.username);
            }
        }
        Command::Pinned { room_id, kind } => {
            let room = RoomIdentity::new(room_id, kind.into());
            let page = client.rest().list_pinned_messages(&room, None)?.await?;
            println!("total={}", page.total);
            for message in page.items {
                println!("{} {}", message.id, message.msg);
            }
        }
        Command::Watch {
            room_id,
            kind,
            stream,
        } => {
            let session = client.open_room(RoomIdentity::new(room_id, kind.into()));
            let stream_kind = StreamKind::from(stream);
            let observer: Arc<dyn CollectionObserver<Document>> =
                Arc::new(move |snapshot: &[Document]| {
                    let ids: Vec<&str> = snapshot.iter().map(Document::id).collect();
                    println!("{stream_kind}: {} item(s) {:?}", snapshot.len(), ids);
                });
            session.subscribe(stream_kind, observer).await?;
            info!(room = %session.identity(), stream = %stream_kind, "tools: watching; Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            let report = session.teardown().await;
            for failure in &report.failures {
                warn!("tools: {failure}");
            }
            println!("closed {} subscription(s)", report.closed.len());
        }
    }

    Ok(())
}
