use agora_store::ChatStoreHandle;
use agora_types::api::{DirectConversationQuery, Pagination};
use agora_types::grouping;
use agora_types::models::ConversationKey;
use chrono::SecondsFormat;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::error::ApiError;

/// Result of fetching one page into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    /// Messages that were not cached before.
    pub added: usize,
    pub pagination: Pagination,
}

/// Fetches direct conversation history over REST and merges it into the
/// chat store.
#[derive(Clone)]
pub struct ConversationLoader {
    api: ApiClient,
    store: ChatStoreHandle,
}

impl ConversationLoader {
    pub fn new(api: ApiClient, store: ChatStoreHandle) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &ChatStoreHandle {
        &self.store
    }

    /// Make `peer_id` the active conversation. The first page is fetched
    /// only when nothing is cached; returns `None` on a cache hit.
    pub async fn open_direct_conversation(
        &self,
        peer_id: &str,
    ) -> Result<Option<LoadedPage>, ApiError> {
        let (community_id, key) = self.direct_key(peer_id)?;
        self.store.dispatch(|s| s.select_direct_chat_user(peer_id));

        if self.store.read(|s| s.has_cached_messages(&key)) {
            debug!("Serving {} from cache", key);
            return Ok(None);
        }

        self.store.dispatch(|s| s.begin_load(&key));
        let query = self.first_page();
        match self
            .api
            .load_direct_conversation(&community_id, peer_id, &query)
            .await
        {
            Ok(page) => {
                let added = self.store.dispatch(|s| {
                    if let Some(user) = page.other_user {
                        s.upsert_direct_chat_user(user);
                    }
                    s.merge_direct_conversation(&key, page.groups)
                });
                Ok(Some(LoadedPage {
                    added,
                    pagination: page.pagination,
                }))
            }
            Err(e) => {
                warn!("Loading conversation with {} failed: {}", peer_id, e);
                self.store.dispatch(|s| s.fail_load(&key));
                Err(e)
            }
        }
    }

    /// Re-fetch the newest page and merge whatever is missing.
    pub async fn refresh(&self, peer_id: &str) -> Result<LoadedPage, ApiError> {
        let query = self.first_page();
        self.fetch_into_store(peer_id, query).await
    }

    /// Fetch the page before the oldest cached message. With nothing cached
    /// this is the same as [`refresh`](Self::refresh).
    pub async fn load_older(&self, peer_id: &str) -> Result<LoadedPage, ApiError> {
        let (_, key) = self.direct_key(peer_id)?;
        let before = self.store.read(|s| {
            grouping::oldest(s.conversation(&key))
                .map(|m| m.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        });

        let query = DirectConversationQuery {
            before_timestamp: before,
            ..self.first_page()
        };
        self.fetch_into_store(peer_id, query).await
    }

    async fn fetch_into_store(
        &self,
        peer_id: &str,
        query: DirectConversationQuery,
    ) -> Result<LoadedPage, ApiError> {
        let (community_id, key) = self.direct_key(peer_id)?;
        self.store.dispatch(|s| s.begin_load(&key));

        match self
            .api
            .load_direct_conversation(&community_id, peer_id, &query)
            .await
        {
            Ok(page) => {
                let added = self.store.dispatch(|s| {
                    let added = s.merge_history(&key, page.groups);
                    s.finish_load(&key);
                    added
                });
                debug!("Merged {} new messages into {}", added, key);
                Ok(LoadedPage {
                    added,
                    pagination: page.pagination,
                })
            }
            Err(e) => {
                warn!("Fetching history with {} failed: {}", peer_id, e);
                self.store.dispatch(|s| s.fail_load(&key));
                Err(e)
            }
        }
    }

    fn direct_key(&self, peer_id: &str) -> Result<(String, ConversationKey), ApiError> {
        let community_id = self
            .store
            .read(|s| s.active_community_id().map(str::to_string))
            .ok_or(ApiError::NoActiveCommunity)?;
        let key = ConversationKey::direct(community_id.clone(), peer_id);
        Ok((community_id, key))
    }

    fn first_page(&self) -> DirectConversationQuery {
        DirectConversationQuery {
            limit: self.api.config().page_size,
            ..DirectConversationQuery::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use agora_store::LoadStatus;

    use super::*;
    use crate::client::ApiConfig;

    fn loader(store: ChatStoreHandle) -> ConversationLoader {
        // nothing listens here; requests fail fast with a connection error
        let api = ApiClient::new(ApiConfig::new("http://127.0.0.1:9/api"), "token").unwrap();
        ConversationLoader::new(api, store)
    }

    #[tokio::test]
    async fn needs_an_active_community() {
        let loader = loader(ChatStoreHandle::default());
        assert!(matches!(
            loader.open_direct_conversation("bob").await,
            Err(ApiError::NoActiveCommunity)
        ));
    }

    #[tokio::test]
    async fn failed_first_load_returns_to_idle() {
        let store = ChatStoreHandle::default();
        store.dispatch(|s| {
            s.set_current_user(Some("alice".to_string()));
            s.set_active_community("c1");
        });
        let loader = loader(store.clone());

        assert!(loader.open_direct_conversation("bob").await.is_err());

        let key = ConversationKey::direct("c1", "bob");
        store.read(|s| {
            assert_eq!(s.active_direct_chat_user_id(), Some("bob"));
            assert_eq!(s.load_status(&key), LoadStatus::Idle);
        });
    }
}
