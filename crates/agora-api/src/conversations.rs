use agora_types::api::{DirectConversationPage, DirectConversationQuery};
use agora_types::normalize::normalize_conversation_page;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;

impl ApiClient {
    /// GET `/community-chat/{community}/direct-conversation/{user}`.
    pub async fn load_direct_conversation(
        &self,
        community_id: &str,
        other_user_id: &str,
        query: &DirectConversationQuery,
    ) -> Result<DirectConversationPage, ApiError> {
        let url = self.endpoint(&[
            "community-chat",
            community_id,
            "direct-conversation",
            other_user_id,
        ])?;
        debug!(
            "Fetching conversation with {} in {} (page {}, before {:?})",
            other_user_id, community_id, query.page, query.before_timestamp
        );

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body = self.json_body(resp).await?;
        let page = normalize_conversation_page(&body)?;

        debug!(
            "Got {} messages with {} (has more: {})",
            page.message_count(),
            other_user_id,
            page.pagination.has_more
        );
        Ok(page)
    }
}
