//! reqwest adapter for the REST collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use parley_shared::{Conversation, ConversationId, Message, MessageId};

use crate::api::{
    AuthApi, BearerSource, Identity, MessagePage, MessagingApi, OutgoingMessage, PageQuery,
};
use crate::error::{ApiError, ApiResult};

/// Some endpoints wrap their payload in `{"data": ...}`, others don't.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// REST client. Every request carries the current bearer credential.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
    bearer: Arc<dyn BearerSource>,
}

impl HttpApi {
    pub fn new(base_url: &str, bearer: Arc<dyn BearerSource>) -> ApiResult<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url,
            bearer,
        })
    }

    /// Base URL joined with percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> ApiResult<RequestBuilder> {
        let url = self.endpoint(segments)?;
        debug!(method = %method, url = %url, "REST request");
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.bearer.bearer() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> ApiResult<T> {
        let response = check_status(builder.send().await?).await?;
        let body: Envelope<T> = response.json().await?;
        Ok(body.into_inner())
    }

    async fn execute(builder: RequestBuilder) -> ApiResult<()> {
        check_status(builder.send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound),
        _ => {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or(text);
            Err(ApiError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl MessagingApi for HttpApi {
    async fn get_conversations(&self) -> ApiResult<Vec<Conversation>> {
        Self::fetch(self.request(Method::GET, &["conversations"])?).await
    }

    async fn get_conversation(&self, id: &ConversationId) -> ApiResult<Conversation> {
        Self::fetch(self.request(Method::GET, &["conversations", id.as_str()])?).await
    }

    async fn get_messages(&self, id: &ConversationId, query: PageQuery) -> ApiResult<MessagePage> {
        let builder = self
            .request(Method::GET, &["conversations", id.as_str(), "messages"])?
            .query(&[("page", query.page), ("limit", query.limit)]);
        Self::fetch(builder).await
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> ApiResult<Message> {
        let builder = self
            .request(Method::POST, &["conversations", conversation.as_str(), "messages"])?
            .json(message);
        Self::fetch(builder).await
    }

    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        content: &str,
    ) -> ApiResult<()> {
        let builder = self
            .request(
                Method::PUT,
                &["conversations", conversation.as_str(), "messages", message.as_str()],
            )?
            .json(&serde_json::json!({ "content": content }));
        Self::execute(builder).await
    }

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> ApiResult<()> {
        Self::execute(self.request(
            Method::DELETE,
            &["conversations", conversation.as_str(), "messages", message.as_str()],
        )?)
        .await
    }

    async fn add_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()> {
        let builder = self
            .request(
                Method::POST,
                &[
                    "conversations",
                    conversation.as_str(),
                    "messages",
                    message.as_str(),
                    "reactions",
                ],
            )?
            .json(&serde_json::json!({ "emoji": emoji }));
        Self::execute(builder).await
    }

    async fn remove_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()> {
        Self::execute(self.request(
            Method::DELETE,
            &[
                "conversations",
                conversation.as_str(),
                "messages",
                message.as_str(),
                "reactions",
                emoji,
            ],
        )?)
        .await
    }

    async fn mark_as_read(&self, conversation: &ConversationId) -> ApiResult<()> {
        Self::execute(self.request(Method::PUT, &["conversations", conversation.as_str(), "read"])?)
            .await
    }
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn refresh_token(&self) -> ApiResult<String> {
        let refreshed: RefreshResponse =
            Self::fetch(self.request(Method::POST, &["auth", "refresh"])?).await?;
        Ok(refreshed.access_token)
    }

    async fn me(&self) -> ApiResult<Identity> {
        Self::fetch(self.request(Method::GET, &["auth", "me"])?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(base, Arc::new(Some("t".to_string()))).unwrap()
    }

    #[test]
    fn joins_and_encodes_segments() {
        let api = api("http://localhost:5000/api/");
        let url = api
            .endpoint(&["conversations", "c 1", "messages", "m1", "reactions", "👍"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/conversations/c%201/messages/m1/reactions/%F0%9F%91%8D"
        );
    }

    #[test]
    fn base_without_trailing_slash() {
        let api = api("http://localhost:5000/api");
        assert_eq!(
            api.endpoint(&["auth", "me"]).unwrap().as_str(),
            "http://localhost:5000/api/auth/me"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(matches!(
            HttpApi::new("mailto:someone", Arc::new(None::<String>)),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpApi::new("::not a url", Arc::new(None::<String>)),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn envelope_accepts_wrapped_and_bare_bodies() {
        let wrapped: Envelope<RefreshResponse> =
            serde_json::from_str(r#"{"data":{"accessToken":"a"}}"#).unwrap();
        assert_eq!(wrapped.into_inner().access_token, "a");
        let bare: Envelope<RefreshResponse> =
            serde_json::from_str(r#"{"accessToken":"b"}"#).unwrap();
        assert_eq!(bare.into_inner().access_token, "b");
    }
}
