use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use agora_types::events::TypingSignal;
use agora_types::grouping;
use agora_types::models::{
    ChatType, ConversationKey, DeleteType, DirectChatUser, Message, MessageGroup, OnlineMember,
    Sender, TypingUser,
};

/// A typing entry disappears this long after the last typing signal.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Fetch status of one conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
}

/// Which conversation of the active community is on screen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveChat {
    #[default]
    Community,
    Direct(String),
}

/// What an action touched. Subscribers re-run their selectors on these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Messages(ConversationKey),
    LoadStatus(ConversationKey),
    Unread(ConversationKey),
    ActiveChat,
    Presence(String),
    Typing(ConversationKey),
    DirectUsers,
    UploadProgress(Option<u8>),
    Connection(bool),
    CurrentUser,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The id already exists in the target conversation; nothing changed.
    Duplicate,
    /// No conversation could be derived (e.g. current user unknown for a
    /// direct message, or a direct message between two other users).
    Unroutable,
}

#[derive(Debug, Default)]
struct Conversation {
    groups: Vec<MessageGroup>,
    status: LoadStatus,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    key: ConversationKey,
    user: TypingUser,
    expires_at: Instant,
}

/// Normalized client-side chat state.
///
/// Mutated only through the action methods below; each action records the
/// [`StoreChange`]s it caused, drained by [`ChatStore::take_changes`].
#[derive(Debug, Default)]
pub struct ChatStore {
    current_user_id: Option<String>,
    connected: bool,
    active_community_id: Option<String>,
    active_chat: ActiveChat,
    conversations: HashMap<ConversationKey, Conversation>,
    unread_direct: HashMap<ConversationKey, u32>,
    /// community_id -> members currently online there
    online_members: HashMap<String, Vec<OnlineMember>>,
    typing: Vec<TypingEntry>,
    direct_chat_users: Vec<DirectChatUser>,
    upload_progress: Option<u8>,
    changes: Vec<StoreChange>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_user(user_id: impl Into<String>) -> Self {
        Self {
            current_user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn take_changes(&mut self) -> Vec<StoreChange> {
        std::mem::take(&mut self.changes)
    }

    // -- Session --

    pub fn set_current_user(&mut self, user_id: Option<String>) {
        if self.current_user_id != user_id {
            self.current_user_id = user_id;
            self.changes.push(StoreChange::CurrentUser);
        }
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.current_user_id.as_deref()
    }

    /// Record socket connectivity. Losing the connection invalidates
    /// presence, since the server only asserts it for live sockets.
    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.changes.push(StoreChange::Connection(connected));
        }
        if !connected {
            self.clear_presence();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Drop every piece of state (logout).
    pub fn reset(&mut self) {
        *self = Self::default();
        self.changes.push(StoreChange::Reset);
    }

    // -- Active chat pointer --

    /// Scope the selectors to a community; the view returns to its
    /// community conversation.
    pub fn set_active_community(&mut self, community_id: impl Into<String>) {
        let community_id = community_id.into();
        if self.active_community_id.as_deref() == Some(community_id.as_str())
            && self.active_chat == ActiveChat::Community
        {
            return;
        }
        self.active_community_id = Some(community_id);
        self.active_chat = ActiveChat::Community;
        self.changes.push(StoreChange::ActiveChat);
    }

    pub fn active_community_id(&self) -> Option<&str> {
        self.active_community_id.as_deref()
    }

    pub fn active_chat(&self) -> &ActiveChat {
        &self.active_chat
    }

    pub fn active_chat_type(&self) -> ChatType {
        match self.active_chat {
            ActiveChat::Community => ChatType::Community,
            ActiveChat::Direct(_) => ChatType::Direct,
        }
    }

    pub fn active_direct_chat_user_id(&self) -> Option<&str> {
        match &self.active_chat {
            ActiveChat::Community => None,
            ActiveChat::Direct(peer) => Some(peer),
        }
    }

    /// Key of the conversation currently on screen.
    pub fn active_key(&self) -> Option<ConversationKey> {
        let community_id = self.active_community_id.clone()?;
        Some(match &self.active_chat {
            ActiveChat::Community => ConversationKey::Community(community_id),
            ActiveChat::Direct(peer) => ConversationKey::direct(community_id, peer.clone()),
        })
    }

    fn is_active(&self, key: &ConversationKey) -> bool {
        self.active_key().as_ref() == Some(key)
    }

    /// Switch the pointer. Entering a direct conversation clears its unread
    /// count and marks its messages read; returns the ids newly marked.
    pub fn switch_chat_mode(&mut self, chat: ActiveChat) -> Vec<String> {
        match chat {
            ActiveChat::Community => {
                if self.active_chat != ActiveChat::Community {
                    self.active_chat = ActiveChat::Community;
                    self.changes.push(StoreChange::ActiveChat);
                }
                Vec::new()
            }
            ActiveChat::Direct(peer) => self.select_direct_chat_user(peer),
        }
    }

    pub fn select_direct_chat_user(&mut self, peer_id: impl Into<String>) -> Vec<String> {
        let peer_id = peer_id.into();
        if self.active_chat != ActiveChat::Direct(peer_id.clone()) {
            self.active_chat = ActiveChat::Direct(peer_id);
            self.changes.push(StoreChange::ActiveChat);
        }

        match self.active_key() {
            Some(key) => {
                if self.unread_direct.get(&key).copied().unwrap_or(0) > 0 {
                    self.unread_direct.remove(&key);
                    self.changes.push(StoreChange::Unread(key.clone()));
                }
                self.mark_direct_messages_read(&key)
            }
            None => Vec::new(),
        }
    }

    /// Add the current user to `read_by` of every message in the
    /// conversation that someone else sent and we have not read yet.
    pub fn mark_direct_messages_read(&mut self, key: &ConversationKey) -> Vec<String> {
        let Some(me) = self.current_user_id.clone() else {
            return Vec::new();
        };

        let mut marked = Vec::new();
        if let Some(conversation) = self.conversations.get_mut(key) {
            for message in conversation.groups.iter_mut().flat_map(|g| g.messages.iter_mut()) {
                if message.sender.id != me && !message.read_by.contains(&me) {
                    message.read_by.insert(me.clone());
                    marked.push(message.id.clone());
                }
            }
        }

        if !marked.is_empty() {
            self.changes.push(StoreChange::Messages(key.clone()));
        }
        if let Some(peer_id) = key.peer_id() {
            if let Some(user) = self.direct_chat_users.iter_mut().find(|u| u.user_id == peer_id) {
                if user.unread_count > 0 {
                    user.unread_count = 0;
                    sort_direct_users(&mut self.direct_chat_users);
                    self.changes.push(StoreChange::DirectUsers);
                }
            }
        }
        marked
    }

    // -- Messages --

    /// Conversation a message belongs to, from the current user's view.
    pub fn conversation_key_for(&self, message: &Message) -> Option<ConversationKey> {
        match message.chat_type {
            ChatType::Community => Some(ConversationKey::Community(message.community_id.clone())),
            ChatType::Direct => {
                let me = self.current_user_id.as_deref()?;
                let peer = message.other_party(me)?;
                Some(ConversationKey::direct(message.community_id.clone(), peer))
            }
        }
    }

    /// Insert a message into its conversation unless its id is already
    /// there. Both the ack of our own send and the broadcast echo of it go
    /// through here, in either order.
    pub fn insert_message(&mut self, mut message: Message) -> InsertOutcome {
        let Some(key) = self.conversation_key_for(&message) else {
            warn!(
                "Dropping message {} with no conversation for user {:?}",
                message.id, self.current_user_id
            );
            return InsertOutcome::Unroutable;
        };

        if self
            .conversations
            .get(&key)
            .is_some_and(|c| grouping::contains(&c.groups, &message.id))
        {
            debug!("Message {} already in {}", message.id, key);
            return InsertOutcome::Duplicate;
        }

        let from_peer = message.is_direct()
            && self.current_user_id.as_deref() != Some(message.sender.id.as_str());
        let active = self.is_active(&key);

        if from_peer && active {
            if let Some(me) = &self.current_user_id {
                message.read_by.insert(me.clone());
            }
        }

        let sender = message.sender.clone();
        let created_at = message.created_at;

        let conversation = self.conversations.entry(key.clone()).or_default();
        grouping::insert_sorted(&mut conversation.groups, message);
        self.changes.push(StoreChange::Messages(key.clone()));

        if let Some(peer_id) = key.peer_id() {
            if !active {
                self.seed_unread_from_roster(&key);
            }
            let unread = from_peer && !active;
            if unread {
                *self.unread_direct.entry(key.clone()).or_insert(0) += 1;
                self.changes.push(StoreChange::Unread(key.clone()));
            }
            let unread_count = self.unread_direct.get(&key).copied().unwrap_or(0);
            let peer_id = peer_id.to_string();
            self.touch_direct_user(&peer_id, from_peer.then_some(&sender), created_at, unread_count);
        }

        InsertOutcome::Inserted
    }

    /// The roster may arrive with unread counts before any message does;
    /// carry them into `unread_direct` so later increments add to them.
    fn seed_unread_from_roster(&mut self, key: &ConversationKey) {
        if self.unread_direct.contains_key(key) {
            return;
        }
        let Some(peer_id) = key.peer_id() else {
            return;
        };
        let seeded = self
            .direct_chat_users
            .iter()
            .find(|u| u.user_id == peer_id)
            .map_or(0, |u| u.unread_count);
        if seeded > 0 {
            self.unread_direct.insert(key.clone(), seeded);
        }
    }

    /// Make roster unread counts and `unread_direct` agree for the active
    /// community. The larger count wins; the open conversation has none.
    fn sync_roster_unread(&mut self) {
        let Some(community_id) = self.active_community_id.clone() else {
            return;
        };
        let open_peer = self.active_direct_chat_user_id().map(str::to_string);

        for user in self.direct_chat_users.iter_mut() {
            let key = ConversationKey::direct(community_id.clone(), user.user_id.clone());
            let count = if open_peer.as_deref() == Some(user.user_id.as_str()) {
                0
            } else {
                user.unread_count
                    .max(self.unread_direct.get(&key).copied().unwrap_or(0))
            };
            user.unread_count = count;
            let before = if count > 0 {
                self.unread_direct.insert(key.clone(), count)
            } else {
                self.unread_direct.remove(&key)
            };
            if before.unwrap_or(0) != count {
                self.changes.push(StoreChange::Unread(key));
            }
        }
    }

    /// Keep the roster entry of a direct peer in step with its conversation.
    fn touch_direct_user(
        &mut self,
        peer_id: &str,
        sender: Option<&Sender>,
        at: DateTime<Utc>,
        unread_count: u32,
    ) {
        let online = self.is_user_online(peer_id);
        let idx = match self.direct_chat_users.iter().position(|u| u.user_id == peer_id) {
            Some(idx) => idx,
            None => {
                let mut user = DirectChatUser::new(
                    peer_id,
                    sender.map(|s| s.name.clone()).unwrap_or_else(|| peer_id.to_string()),
                );
                user.avatar = sender.and_then(|s| s.avatar.clone());
                user.is_online = online;
                self.direct_chat_users.push(user);
                self.direct_chat_users.len() - 1
            }
        };

        let user = &mut self.direct_chat_users[idx];
        if user.last_message_time.is_none_or(|t| t < at) {
            user.last_message_time = Some(at);
        }
        user.unread_count = unread_count;

        sort_direct_users(&mut self.direct_chat_users);
        self.changes.push(StoreChange::DirectUsers);
    }

    /// Dedup-merge a page of history into `key`. Messages that belong to a
    /// different conversation are skipped. Returns how many were added.
    pub fn merge_history(&mut self, key: &ConversationKey, groups: Vec<MessageGroup>) -> usize {
        let mut added = 0;
        for message in groups.into_iter().flat_map(|g| g.messages) {
            match self.conversation_key_for(&message) {
                Some(k) if &k == key => {}
                other => {
                    warn!(
                        "History message {} belongs to {:?}, not {}",
                        message.id, other, key
                    );
                    continue;
                }
            }

            let conversation = self.conversations.entry(key.clone()).or_default();
            if grouping::contains(&conversation.groups, &message.id) {
                continue;
            }
            grouping::insert_sorted(&mut conversation.groups, message);
            added += 1;
        }

        if added > 0 {
            self.changes.push(StoreChange::Messages(key.clone()));
            if self.is_active(key) {
                self.mark_direct_messages_read(key);
            }
        }
        added
    }

    /// Merge the first fetched page of a direct conversation, but only when
    /// nothing is cached for it yet: a slow page must not clobber messages
    /// that arrived in real time meanwhile. Always completes the load and
    /// returns how many messages were added (0 when the page was ignored).
    pub fn merge_direct_conversation(
        &mut self,
        key: &ConversationKey,
        groups: Vec<MessageGroup>,
    ) -> usize {
        let added = if self.has_cached_messages(key) {
            debug!("{} already cached, ignoring fetched page", key);
            0
        } else {
            self.merge_history(key, groups)
        };
        self.finish_load(key);
        added
    }

    pub fn edit_message(&mut self, message_id: &str, content: &str) -> bool {
        for (key, conversation) in self.conversations.iter_mut() {
            if let Some(message) = grouping::find_mut(&mut conversation.groups, message_id) {
                if message.deleted_for_everyone {
                    return false;
                }
                message.content = content.to_string();
                message.edited = true;
                self.changes.push(StoreChange::Messages(key.clone()));
                return true;
            }
        }
        false
    }

    pub fn delete_message(&mut self, message_id: &str, delete_type: DeleteType) -> bool {
        for (key, conversation) in self.conversations.iter_mut() {
            let found = match delete_type {
                DeleteType::ForEveryone => {
                    match grouping::find_mut(&mut conversation.groups, message_id) {
                        Some(message) => {
                            message.tombstone();
                            true
                        }
                        None => false,
                    }
                }
                DeleteType::ForMe => grouping::remove(&mut conversation.groups, message_id).is_some(),
            };
            if found {
                self.changes.push(StoreChange::Messages(key.clone()));
                return true;
            }
        }
        false
    }

    pub fn update_reactions(&mut self, message_id: &str, reactions: BTreeMap<String, String>) -> bool {
        for (key, conversation) in self.conversations.iter_mut() {
            if let Some(message) = grouping::find_mut(&mut conversation.groups, message_id) {
                message.reactions = reactions;
                self.changes.push(StoreChange::Messages(key.clone()));
                return true;
            }
        }
        false
    }

    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.conversations
            .values()
            .flat_map(|c| c.groups.iter())
            .flat_map(|g| g.messages.iter())
            .find(|m| m.id == message_id)
    }

    /// Message groups of the conversation on screen.
    pub fn messages(&self) -> &[MessageGroup] {
        match self.active_key() {
            Some(key) => self.conversation(&key),
            None => &[],
        }
    }

    pub fn conversation(&self, key: &ConversationKey) -> &[MessageGroup] {
        self.conversations
            .get(key)
            .map(|c| c.groups.as_slice())
            .unwrap_or_default()
    }

    pub fn community_messages(&self, community_id: &str) -> &[MessageGroup] {
        self.conversation(&ConversationKey::Community(community_id.to_string()))
    }

    /// Direct conversation with `peer_id` in the active community.
    pub fn direct_messages(&self, peer_id: &str) -> &[MessageGroup] {
        match &self.active_community_id {
            Some(community_id) => {
                self.conversation(&ConversationKey::direct(community_id.clone(), peer_id))
            }
            None => &[],
        }
    }

    pub fn has_cached_messages(&self, key: &ConversationKey) -> bool {
        !self.conversation(key).is_empty()
    }

    // -- Unread --

    pub fn unread_count(&self, key: &ConversationKey) -> u32 {
        self.unread_direct.get(key).copied().unwrap_or(0)
    }

    /// Unread direct messages from `peer_id` in the active community.
    pub fn unread_direct_count(&self, peer_id: &str) -> u32 {
        match &self.active_community_id {
            Some(community_id) => {
                self.unread_count(&ConversationKey::direct(community_id.clone(), peer_id))
            }
            None => 0,
        }
    }

    pub fn total_unread_direct(&self) -> u32 {
        self.unread_direct.values().sum()
    }

    // -- Load status --

    pub fn begin_load(&mut self, key: &ConversationKey) {
        self.set_status(key, LoadStatus::Loading);
    }

    pub fn finish_load(&mut self, key: &ConversationKey) {
        self.set_status(key, LoadStatus::Loaded);
    }

    /// A failed fetch leaves the conversation as it was before the request:
    /// loaded if anything is cached, idle otherwise.
    pub fn fail_load(&mut self, key: &ConversationKey) {
        let status = if self.has_cached_messages(key) {
            LoadStatus::Loaded
        } else {
            LoadStatus::Idle
        };
        self.set_status(key, status);
    }

    fn set_status(&mut self, key: &ConversationKey, status: LoadStatus) {
        let conversation = self.conversations.entry(key.clone()).or_default();
        if conversation.status != status {
            conversation.status = status;
            self.changes.push(StoreChange::LoadStatus(key.clone()));
        }
    }

    pub fn load_status(&self, key: &ConversationKey) -> LoadStatus {
        self.conversations
            .get(key)
            .map(|c| c.status)
            .unwrap_or_default()
    }

    /// Spinner only while loading an empty conversation; background
    /// refreshes of a cached one stay silent.
    pub fn show_spinner(&self, key: &ConversationKey) -> bool {
        self.load_status(key) == LoadStatus::Loading && !self.has_cached_messages(key)
    }

    // -- Presence --

    pub fn user_online(&mut self, member: OnlineMember) {
        let user_id = member.user_id.clone();
        let community_id = member.community_id.clone();
        let members = self.online_members.entry(community_id.clone()).or_default();
        match members.iter_mut().find(|m| m.user_id == user_id) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }
        self.changes.push(StoreChange::Presence(community_id));
        self.set_direct_user_online(&user_id, true);
    }

    /// Remove a member from one community's roster, or from every roster
    /// when the community is not given.
    pub fn user_offline(&mut self, user_id: &str, community_id: Option<&str>) {
        let mut touched = Vec::new();
        for (cid, members) in self.online_members.iter_mut() {
            if community_id.is_some_and(|c| c != cid) {
                continue;
            }
            let before = members.len();
            members.retain(|m| m.user_id != user_id);
            if members.len() != before {
                touched.push(cid.clone());
            }
        }
        for cid in touched {
            self.changes.push(StoreChange::Presence(cid));
        }
        let still_online = self.is_user_online(user_id);
        self.set_direct_user_online(user_id, still_online);
    }

    pub fn clear_presence(&mut self) {
        for (cid, members) in self.online_members.drain() {
            if !members.is_empty() {
                self.changes.push(StoreChange::Presence(cid));
            }
        }
        let mut touched = false;
        for user in self.direct_chat_users.iter_mut().filter(|u| u.is_online) {
            user.is_online = false;
            touched = true;
        }
        if touched {
            self.changes.push(StoreChange::DirectUsers);
        }
    }

    fn set_direct_user_online(&mut self, user_id: &str, online: bool) {
        if let Some(user) = self
            .direct_chat_users
            .iter_mut()
            .find(|u| u.user_id == user_id && u.is_online != online)
        {
            user.is_online = online;
            self.changes.push(StoreChange::DirectUsers);
        }
    }

    pub fn online_members(&self, community_id: &str) -> &[OnlineMember] {
        self.online_members
            .get(community_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.online_members
            .values()
            .any(|members| members.iter().any(|m| m.user_id == user_id))
    }

    // -- Typing --

    fn typing_key(&self, signal: &TypingSignal) -> Option<ConversationKey> {
        match signal.chat_type {
            ChatType::Community => Some(ConversationKey::Community(signal.community_id.clone())),
            ChatType::Direct => {
                if let (Some(me), Some(recipient)) =
                    (self.current_user_id.as_deref(), signal.recipient_user_id.as_deref())
                {
                    if me != recipient {
                        return None;
                    }
                }
                Some(ConversationKey::direct(
                    signal.community_id.clone(),
                    signal.user.user_id.clone(),
                ))
            }
        }
    }

    pub fn user_typing(&mut self, signal: &TypingSignal, now: Instant) {
        if self.current_user_id.as_deref() == Some(signal.user.user_id.as_str()) {
            return;
        }
        let Some(key) = self.typing_key(signal) else {
            return;
        };

        let expires_at = now + TYPING_TIMEOUT;
        match self
            .typing
            .iter_mut()
            .find(|e| e.key == key && e.user.user_id == signal.user.user_id)
        {
            Some(entry) => {
                entry.expires_at = expires_at;
                entry.user.user_name = signal.user.user_name.clone();
            }
            None => {
                self.typing.push(TypingEntry {
                    key: key.clone(),
                    user: signal.user.clone(),
                    expires_at,
                });
                self.changes.push(StoreChange::Typing(key));
            }
        }
    }

    pub fn user_stopped_typing(&mut self, signal: &TypingSignal) {
        let Some(key) = self.typing_key(signal) else {
            return;
        };
        let before = self.typing.len();
        self.typing
            .retain(|e| !(e.key == key && e.user.user_id == signal.user.user_id));
        if self.typing.len() != before {
            self.changes.push(StoreChange::Typing(key));
        }
    }

    /// Drop typing entries whose stop event never arrived. Returns how many
    /// were removed.
    pub fn expire_typing(&mut self, now: Instant) -> usize {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.typing)
            .into_iter()
            .partition(|e| e.expires_at <= now);
        self.typing = live;

        for entry in &expired {
            let change = StoreChange::Typing(entry.key.clone());
            if !self.changes.contains(&change) {
                self.changes.push(change);
            }
        }
        expired.len()
    }

    /// Users typing in the conversation on screen.
    pub fn typing_users(&self, now: Instant) -> Vec<TypingUser> {
        let Some(key) = self.active_key() else {
            return Vec::new();
        };
        self.typing
            .iter()
            .filter(|e| e.key == key && e.expires_at > now)
            .map(|e| e.user.clone())
            .collect()
    }

    // -- Direct chat roster --

    pub fn set_direct_chat_users(&mut self, mut users: Vec<DirectChatUser>) {
        for user in users.iter_mut() {
            if self.is_user_online(&user.user_id) {
                user.is_online = true;
            }
        }
        self.direct_chat_users = users;
        self.sync_roster_unread();
        sort_direct_users(&mut self.direct_chat_users);
        self.changes.push(StoreChange::DirectUsers);
    }

    /// Add or refresh one roster entry (e.g. the peer snapshot of a fetched
    /// conversation), keeping locally tracked unread and recency.
    pub fn upsert_direct_chat_user(&mut self, mut user: DirectChatUser) {
        match self.direct_chat_users.iter_mut().find(|u| u.user_id == user.user_id) {
            Some(existing) => {
                user.unread_count = existing.unread_count;
                user.last_message_time = user.last_message_time.max(existing.last_message_time);
                user.is_online = user.is_online || existing.is_online;
                *existing = user;
            }
            None => self.direct_chat_users.push(user),
        }
        self.sync_roster_unread();
        sort_direct_users(&mut self.direct_chat_users);
        self.changes.push(StoreChange::DirectUsers);
    }

    pub fn direct_chat_users(&self) -> &[DirectChatUser] {
        &self.direct_chat_users
    }

    // -- Upload progress --

    pub fn set_upload_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.upload_progress != Some(percent) {
            self.upload_progress = Some(percent);
            self.changes.push(StoreChange::UploadProgress(Some(percent)));
        }
    }

    pub fn clear_upload_progress(&mut self) {
        if self.upload_progress.take().is_some() {
            self.changes.push(StoreChange::UploadProgress(None));
        }
    }

    pub fn upload_progress(&self) -> Option<u8> {
        self.upload_progress
    }
}

/// Unread first, then most recent conversation, then name.
fn sort_direct_users(users: &mut [DirectChatUser]) {
    users.sort_by(|a, b| {
        b.unread_count
            .cmp(&a.unread_count)
            .then_with(|| b.last_message_time.cmp(&a.last_message_time))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration as ChronoDuration, TimeZone};

    use agora_types::models::MessageType;

    use super::*;

    const ME: &str = "alice";
    const PEER: &str = "bob";
    const COMMUNITY: &str = "c1";

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn community_msg(id: &str, sender: &str, minute: i64) -> Message {
        Message {
            id: id.into(),
            community_id: COMMUNITY.into(),
            content: format!("text of {id}"),
            message_type: MessageType::Text,
            file: None,
            sender: Sender {
                id: sender.into(),
                name: sender.to_uppercase(),
                avatar: None,
            },
            reply_to: None,
            reactions: BTreeMap::new(),
            edited: false,
            created_at: at(minute),
            deleted_for_everyone: false,
            chat_type: ChatType::Community,
            recipient_user_id: None,
            read_by: BTreeSet::new(),
        }
    }

    fn direct_msg(id: &str, sender: &str, recipient: &str, minute: i64) -> Message {
        Message {
            chat_type: ChatType::Direct,
            recipient_user_id: Some(recipient.into()),
            ..community_msg(id, sender, minute)
        }
    }

    fn store() -> ChatStore {
        let mut store = ChatStore::with_current_user(ME);
        store.set_active_community(COMMUNITY);
        store.take_changes();
        store
    }

    fn peer_key(peer: &str) -> ConversationKey {
        ConversationKey::direct(COMMUNITY, peer)
    }

    fn typing(user: &str, recipient: Option<&str>) -> TypingSignal {
        TypingSignal {
            user: TypingUser {
                user_id: user.into(),
                user_name: user.to_uppercase(),
            },
            community_id: COMMUNITY.into(),
            chat_type: if recipient.is_some() {
                ChatType::Direct
            } else {
                ChatType::Community
            },
            recipient_user_id: recipient.map(str::to_string),
        }
    }

    #[test]
    fn test_same_id_inserted_once() {
        let mut store = store();
        let msg = community_msg("m1", ME, 0);

        assert_eq!(store.insert_message(msg.clone()), InsertOutcome::Inserted);
        assert_eq!(store.insert_message(msg), InsertOutcome::Duplicate);
        assert_eq!(grouping::message_count(store.community_messages(COMMUNITY)), 1);
    }

    #[test]
    fn test_echo_before_ack_is_still_deduplicated() {
        let mut store = store();
        let mut echo = direct_msg("m1", ME, PEER, 0);
        echo.content = "from broadcast".into();
        let ack = direct_msg("m1", ME, PEER, 0);

        store.insert_message(echo);
        assert_eq!(store.insert_message(ack), InsertOutcome::Duplicate);
        let groups = store.conversation(&peer_key(PEER));
        assert_eq!(grouping::message_count(groups), 1);
        assert_eq!(groups[0].messages[0].content, "from broadcast");
    }

    #[test]
    fn test_direct_message_partitioned_by_other_party() {
        let mut store = store();
        store.insert_message(direct_msg("out", ME, PEER, 0));
        store.insert_message(direct_msg("in", PEER, ME, 1));

        let ids: Vec<_> = grouping::flatten(store.conversation(&peer_key(PEER)))
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["out", "in"]);
        assert!(store.conversation(&peer_key(ME)).is_empty());
        assert!(store.community_messages(COMMUNITY).is_empty());
    }

    #[test]
    fn test_direct_message_without_current_user_is_unroutable() {
        let mut anonymous = ChatStore::new();
        assert_eq!(
            anonymous.insert_message(direct_msg("m1", PEER, ME, 0)),
            InsertOutcome::Unroutable
        );

        let mut store = store();
        assert_eq!(
            store.insert_message(direct_msg("m1", "carol", "dave", 0)),
            InsertOutcome::Unroutable
        );
    }

    #[test]
    fn test_unread_counts_until_conversation_selected() {
        let mut store = store();
        for i in 0..3 {
            store.insert_message(direct_msg(&format!("m{i}"), PEER, ME, i));
        }
        // our own messages never count as unread
        store.insert_message(direct_msg("mine", ME, PEER, 5));

        assert_eq!(store.unread_direct_count(PEER), 3);
        assert_eq!(store.direct_chat_users()[0].unread_count, 3);

        let marked = store.select_direct_chat_user(PEER);
        assert_eq!(marked.len(), 3);
        assert_eq!(store.unread_direct_count(PEER), 0);
        assert_eq!(store.direct_chat_users()[0].unread_count, 0);
        assert!(
            grouping::flatten(store.messages())
                .iter()
                .filter(|m| m.sender.id == PEER)
                .all(|m| m.read_by.contains(ME))
        );
    }

    #[test]
    fn test_message_to_active_conversation_is_read_immediately() {
        let mut store = store();
        store.select_direct_chat_user(PEER);
        store.insert_message(direct_msg("m1", PEER, ME, 0));

        assert_eq!(store.unread_direct_count(PEER), 0);
        assert!(store.messages()[0].messages[0].read_by.contains(ME));
    }

    #[test]
    fn test_switching_chat_scenario() {
        let mut store = store();
        store.insert_message(community_msg("c-1", "carol", 0));
        let before = store.messages().to_vec();

        store.insert_message(direct_msg("m1", PEER, ME, 1));

        assert_eq!(store.unread_direct_count(PEER), 1);
        let direct = store.direct_messages(PEER);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].messages.len(), 1);
        assert_eq!(direct[0].messages[0].id, "m1");
        assert_eq!(store.messages(), before.as_slice());

        store.select_direct_chat_user(PEER);

        assert_eq!(store.active_chat_type(), ChatType::Direct);
        assert_eq!(store.active_direct_chat_user_id(), Some(PEER));
        assert_eq!(store.unread_direct_count(PEER), 0);
        assert_eq!(store.messages(), store.direct_messages(PEER));

        store.switch_chat_mode(ActiveChat::Community);
        assert_eq!(store.messages(), before.as_slice());
    }

    #[test]
    fn test_out_of_order_arrival_is_sorted() {
        let mut store = store();
        store.insert_message(community_msg("b", "carol", 2));
        store.insert_message(community_msg("a", "carol", 1));
        store.insert_message(community_msg("c", "carol", 3));

        let ids: Vec<_> = grouping::flatten(store.messages())
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_edit_delete_and_react_locate_by_id() {
        let mut store = store();
        store.insert_message(community_msg("m1", ME, 0));
        store.insert_message(direct_msg("m2", PEER, ME, 1));

        assert!(store.edit_message("m2", "edited"));
        let m2 = store.find_message("m2").unwrap();
        assert_eq!(m2.content, "edited");
        assert!(m2.edited);

        let mut reactions = BTreeMap::new();
        reactions.insert(PEER.to_string(), "🎉".to_string());
        assert!(store.update_reactions("m1", reactions));
        assert_eq!(store.find_message("m1").unwrap().reactions[PEER], "🎉");

        assert!(store.delete_message("m1", DeleteType::ForEveryone));
        let m1 = store.find_message("m1").unwrap();
        assert!(m1.deleted_for_everyone);
        assert!(m1.content.is_empty());
        assert!(!store.edit_message("m1", "resurrected"));

        assert!(store.delete_message("m2", DeleteType::ForMe));
        assert!(store.find_message("m2").is_none());
        assert!(!store.delete_message("missing", DeleteType::ForMe));
    }

    #[test]
    fn test_typing_expires_without_stop_event() {
        let mut store = store();
        let t0 = Instant::now();
        store.user_typing(&typing("carol", None), t0);

        assert_eq!(store.typing_users(t0 + Duration::from_secs(1)).len(), 1);
        // filtered by the selector even before the sweep
        assert!(store.typing_users(t0 + TYPING_TIMEOUT).is_empty());

        assert_eq!(store.expire_typing(t0 + TYPING_TIMEOUT), 1);
        assert!(store.typing_users(t0).is_empty());
    }

    #[test]
    fn test_typing_signal_refreshes_window() {
        let mut store = store();
        let t0 = Instant::now();
        store.user_typing(&typing("carol", None), t0);
        store.user_typing(&typing("carol", None), t0 + Duration::from_secs(2));

        assert_eq!(store.expire_typing(t0 + Duration::from_secs(4)), 0);
        assert_eq!(store.typing_users(t0 + Duration::from_secs(4)).len(), 1);

        store.user_stopped_typing(&typing("carol", None));
        assert!(store.typing_users(t0).is_empty());
    }

    #[test]
    fn test_typing_scoped_to_active_conversation() {
        let mut store = store();
        let t0 = Instant::now();
        store.user_typing(&typing(PEER, Some(ME)), t0);
        store.user_typing(&typing(ME, None), t0);

        assert!(store.typing_users(t0).is_empty());
        store.select_direct_chat_user(PEER);
        let users = store.typing_users(t0);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, PEER);
    }

    #[test]
    fn test_cache_first_merge() {
        let mut store = store();
        let key = peer_key(PEER);
        store.begin_load(&key);
        assert!(store.show_spinner(&key));

        // a real-time message lands while the page is in flight
        store.insert_message(direct_msg("live", PEER, ME, 10));
        assert!(!store.show_spinner(&key));

        let page = grouping::group_by_date(vec![direct_msg("old", PEER, ME, 0)]);
        assert_eq!(store.merge_direct_conversation(&key, page), 0);
        assert_eq!(store.load_status(&key), LoadStatus::Loaded);
        assert_eq!(grouping::message_count(store.conversation(&key)), 1);
    }

    #[test]
    fn test_first_page_merges_into_empty_conversation() {
        let mut store = store();
        let key = peer_key(PEER);
        store.begin_load(&key);

        let page = grouping::group_by_date(vec![
            direct_msg("a", PEER, ME, 0),
            direct_msg("b", ME, PEER, 1),
            direct_msg("stray", "carol", ME, 2),
        ]);
        assert_eq!(store.merge_direct_conversation(&key, page), 2);
        assert_eq!(grouping::message_count(store.conversation(&key)), 2);
        assert_eq!(store.load_status(&key), LoadStatus::Loaded);

        // refresh re-enters loading without a spinner
        store.begin_load(&key);
        assert_eq!(store.load_status(&key), LoadStatus::Loading);
        assert!(!store.show_spinner(&key));
    }

    #[test]
    fn test_failed_load_returns_to_idle() {
        let mut store = store();
        let key = peer_key(PEER);
        store.begin_load(&key);
        store.fail_load(&key);
        assert_eq!(store.load_status(&key), LoadStatus::Idle);
    }

    #[test]
    fn test_presence_roster() {
        let mut store = store();
        store.insert_message(direct_msg("m1", PEER, ME, 0));
        let member = OnlineMember {
            user_id: PEER.into(),
            user_name: "Bob".into(),
            community_id: COMMUNITY.into(),
            profile_picture: None,
        };
        store.user_online(member.clone());
        store.user_online(member);

        assert_eq!(store.online_members(COMMUNITY).len(), 1);
        assert!(store.direct_chat_users()[0].is_online);

        store.user_offline(PEER, Some(COMMUNITY));
        assert!(store.online_members(COMMUNITY).is_empty());
        assert!(!store.direct_chat_users()[0].is_online);
    }

    #[test]
    fn test_disconnect_clears_presence() {
        let mut store = store();
        store.set_connected(true);
        store.user_online(OnlineMember {
            user_id: PEER.into(),
            user_name: "Bob".into(),
            community_id: COMMUNITY.into(),
            profile_picture: None,
        });
        store.set_connected(false);
        assert!(store.online_members(COMMUNITY).is_empty());
    }

    #[test]
    fn test_direct_users_sorted_by_unread_recency_name() {
        let mut store = store();
        let mut zed = DirectChatUser::new("z", "Zed");
        zed.last_message_time = Some(at(5));
        let mut amy = DirectChatUser::new("a", "amy");
        amy.last_message_time = Some(at(5));
        let mut old = DirectChatUser::new("o", "Old");
        old.last_message_time = Some(at(1));
        let never = DirectChatUser::new("n", "Never");
        let mut busy = DirectChatUser::new("b", "Busy");
        busy.unread_count = 2;

        store.set_direct_chat_users(vec![never, old, zed, busy, amy]);
        let order: Vec<_> = store
            .direct_chat_users()
            .iter()
            .map(|u| u.user_id.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a", "z", "o", "n"]);
    }

    #[test]
    fn test_seeded_roster_unread_keeps_counting() {
        let mut store = store();
        let mut bob = DirectChatUser::new(PEER, "Bob");
        bob.unread_count = 5;
        store.set_direct_chat_users(vec![bob]);
        assert_eq!(store.unread_direct_count(PEER), 5);

        store.insert_message(direct_msg("m1", PEER, ME, 0));
        assert_eq!(store.unread_direct_count(PEER), 6);
        assert_eq!(store.direct_chat_users()[0].unread_count, 6);

        // our own reply does not reset what we have not read
        store.insert_message(direct_msg("m2", ME, PEER, 1));
        assert_eq!(store.unread_direct_count(PEER), 6);
        assert_eq!(store.direct_chat_users()[0].unread_count, 6);

        store.select_direct_chat_user(PEER);
        assert_eq!(store.unread_direct_count(PEER), 0);
        assert_eq!(store.direct_chat_users()[0].unread_count, 0);
    }

    #[test]
    fn test_roster_unread_seeded_before_community_is_chosen() {
        let mut store = ChatStore::with_current_user(ME);
        let mut bob = DirectChatUser::new(PEER, "Bob");
        bob.unread_count = 2;
        store.set_direct_chat_users(vec![bob]);
        store.set_active_community(COMMUNITY);

        store.insert_message(direct_msg("m1", PEER, ME, 0));

        assert_eq!(store.unread_direct_count(PEER), 3);
        assert_eq!(store.direct_chat_users()[0].unread_count, 3);
    }

    #[test]
    fn test_upserted_peer_unread_is_counted() {
        let mut store = store();
        let mut bob = DirectChatUser::new(PEER, "Bob");
        bob.unread_count = 4;
        store.upsert_direct_chat_user(bob);

        assert_eq!(store.unread_direct_count(PEER), 4);
        assert_eq!(store.total_unread_direct(), 4);
    }

    #[test]
    fn test_changes_are_recorded() {
        let mut store = store();
        store.insert_message(direct_msg("m1", PEER, ME, 0));
        let changes = store.take_changes();
        assert!(changes.contains(&StoreChange::Messages(peer_key(PEER))));
        assert!(changes.contains(&StoreChange::Unread(peer_key(PEER))));
        assert!(changes.contains(&StoreChange::DirectUsers));
        assert!(store.take_changes().is_empty());
    }

    #[test]
    fn test_upload_progress_clamped() {
        let mut store = store();
        store.set_upload_progress(150);
        assert_eq!(store.upload_progress(), Some(100));
        store.clear_upload_progress();
        assert_eq!(store.upload_progress(), None);
    }
}
