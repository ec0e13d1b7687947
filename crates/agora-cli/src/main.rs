mod config;
mod input;
mod render;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::warn;

use agora_api::{ApiClient, ConversationLoader, LoadedPage};
use agora_gateway::{
    FileSessionStore, GatewayClient, Notice, NoticeLevel, SendMessageRequest, TypingIndicator,
};
use agora_store::{ActiveChat, ChatStoreHandle};
use agora_types::models::FileAttachment;

use crate::config::CliConfig;
use crate::input::{Command, HELP};
use crate::render::Renderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=info,agora_gateway=info,agora_api=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::from_env();
    let token = config.token.clone().context("AGORA_TOKEN is not set")?;

    let store = ChatStoreHandle::default();
    let session = Arc::new(FileSessionStore::new(config.session_path.clone()));
    let client = GatewayClient::new(config.gateway_config(), store.clone(), session);
    let api = ApiClient::new(config.api_config(), token.as_str())?;
    let loader = ConversationLoader::new(api.clone(), store.clone());

    tokio::spawn(print_changes(store.clone()));
    tokio::spawn(print_notices(client.notices()));

    client
        .connect(&token)
        .await
        .context("connecting to the chat server")?;

    match config.community_ids.first() {
        Some(first) => {
            client.join_community_rooms(&config.community_ids).await?;
            store.dispatch(|s| s.set_active_community(first.clone()));
        }
        None => warn!("AGORA_COMMUNITY_IDS is empty, pick one with /community <id>"),
    }
    println!("{HELP}");

    let app = App {
        client,
        api,
        loader,
        store,
        typing: Mutex::new(None),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match input::parse(&line) {
            None => {}
            Some(Err(usage)) => println!("{usage}"),
            Some(Ok(Command::Quit)) => break,
            Some(Ok(command)) => {
                if let Err(e) = app.run(command).await {
                    println!("! {e:#}");
                }
            }
        }
    }

    app.client.disconnect().await;
    Ok(())
}

struct App {
    client: GatewayClient,
    api: ApiClient,
    loader: ConversationLoader,
    store: ChatStoreHandle,
    typing: Mutex<Option<TypingIndicator>>,
}

impl App {
    async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Say(content) => self.send(content, None, None).await,
            Command::Reply {
                message_id,
                content,
            } => self.send(content, Some(message_id), None).await,
            Command::Community(Some(community_id)) => {
                self.client
                    .join_community_rooms(std::slice::from_ref(&community_id))
                    .await?;
                self.store.dispatch(|s| {
                    s.set_active_community(community_id);
                    s.switch_chat_mode(ActiveChat::Community);
                });
                Ok(())
            }
            Command::Community(None) => {
                self.store
                    .dispatch(|s| s.switch_chat_mode(ActiveChat::Community));
                Ok(())
            }
            Command::Direct(peer_id) => {
                match self.loader.open_direct_conversation(&peer_id).await? {
                    Some(page) => report(&page),
                    None => println!("* showing cached conversation, /refresh to update"),
                }
                Ok(())
            }
            Command::Older => {
                let page = self.loader.load_older(&self.active_peer()?).await?;
                report(&page);
                Ok(())
            }
            Command::Refresh => {
                let page = self.loader.refresh(&self.active_peer()?).await?;
                report(&page);
                Ok(())
            }
            Command::Edit {
                message_id,
                content,
            } => {
                let community_id = self.community()?;
                self.client
                    .commands()
                    .edit_message(&message_id, &content, &community_id)
                    .await?;
                Ok(())
            }
            Command::Delete {
                message_id,
                delete_type,
            } => {
                let community_id = self.community()?;
                self.client
                    .commands()
                    .delete_message(&message_id, delete_type, &community_id)
                    .await?;
                Ok(())
            }
            Command::React { message_id, emoji } => {
                let community_id = self.community()?;
                self.client
                    .commands()
                    .react_to_message(&message_id, &emoji, &community_id)
                    .await?;
                Ok(())
            }
            Command::Upload { path, caption } => {
                let community_id = self.community()?;
                let file = self
                    .api
                    .upload_attachment(&self.store, &community_id, &path)
                    .await?;
                self.send(caption, None, Some(file)).await
            }
            Command::Who => {
                let community_id = self.community()?;
                let names: Vec<String> = self.store.read(|s| {
                    s.online_members(&community_id)
                        .iter()
                        .map(|m| format!("{} ({})", m.user_name, m.user_id))
                        .collect()
                });
                println!("* online in {community_id}: {}", names.join(", "));
                Ok(())
            }
            Command::Typing => self.keystroke(),
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }

    async fn send(
        &self,
        content: String,
        reply_to: Option<String>,
        attachment: Option<FileAttachment>,
    ) -> anyhow::Result<()> {
        let community_id = self.community()?;
        let peer = self
            .store
            .read(|s| s.active_direct_chat_user_id().map(str::to_string));

        let mut request = match peer {
            Some(peer) => SendMessageRequest::direct(community_id, peer, content),
            None => SendMessageRequest::community(community_id, content),
        };
        if let Some(file) = attachment {
            request = request.with_attachment(file);
        }
        if let Some(message_id) = reply_to {
            request = request.replying_to(message_id);
        }

        if let Some(typing) = self.typing().as_mut() {
            typing.stop();
        }
        self.client
            .commands()
            .send_community_message(request)
            .await?;
        Ok(())
    }

    /// Signal typing in the open conversation, replacing the indicator when
    /// the conversation changed since the last signal.
    fn keystroke(&self) -> anyhow::Result<()> {
        let community_id = self.community()?;
        let peer = self
            .store
            .read(|s| s.active_direct_chat_user_id().map(str::to_string));

        let mut typing = self.typing();
        let current = typing
            .as_ref()
            .is_some_and(|t| t.is_for(&community_id, peer.as_deref()));
        if !current {
            if let Some(mut previous) = typing.take() {
                previous.stop();
            }
            *typing = self.client.typing_indicator();
        }
        if let Some(typing) = typing.as_mut() {
            typing.keystroke();
        }
        Ok(())
    }

    fn typing(&self) -> MutexGuard<'_, Option<TypingIndicator>> {
        self.typing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn community(&self) -> anyhow::Result<String> {
        self.store
            .read(|s| s.active_community_id().map(str::to_string))
            .context("no community selected, use /community <id>")
    }

    fn active_peer(&self) -> anyhow::Result<String> {
        match self
            .store
            .read(|s| s.active_direct_chat_user_id().map(str::to_string))
        {
            Some(peer) => Ok(peer),
            None => bail!("not in a direct conversation, use /dm <user id>"),
        }
    }
}

fn report(page: &LoadedPage) {
    let more = if page.pagination.has_more {
        ", /older for more"
    } else {
        ""
    };
    println!("* {} new message(s){more}", page.added);
}

async fn print_changes(store: ChatStoreHandle) {
    let mut changes = store.subscribe();
    let mut renderer = Renderer::default();
    loop {
        match changes.recv().await {
            Ok(change) => {
                for line in store.read(|s| renderer.on_change(&change, s)) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Display fell behind by {} changes", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => {
                let marker = match notice.level {
                    NoticeLevel::Info => "*",
                    NoticeLevel::Warning => "!",
                    NoticeLevel::Error => "!!",
                };
                println!("{marker} {}", notice.message);
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
