use super::{RemoteMirror, SyncConfig, TimeEntryApi};
use crate::error::SyncError;
use crate::models::{CreatedTimeEntry, NewTimeEntry, RemoteSessionRecord};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP-бэкенд: зеркало сессии + создание записей времени
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_base_url: String,
    app_version: String,
    auth_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &SyncConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            app_version: config.app_version.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// База + сегменты пути. Каждый сегмент percent-encoded целиком ('/', '?', '#' внутри id).
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.api_base_url).map_err(|e| {
            SyncError::Encode(format!("invalid api url {}: {}", self.api_base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::Encode(format!("api url cannot be a base: {}", self.api_base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn session_url(&self, user_id: &str) -> Result<Url, SyncError> {
        self.endpoint(&["users", user_id, "session"])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json")
            .header("X-App-Version", &self.app_version);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
    }
}

/// Неуспешный статус → SyncError::Http с телом ответа
async fn error_for_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").into()
    } else {
        body
    };
    Err(SyncError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteMirror for HttpBackend {
    async fn hydrate(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>, SyncError> {
        let response = self
            .request(Method::GET, self.session_url(user_id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        let record = response
            .json::<RemoteSessionRecord>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        Ok(Some(record))
    }

    async fn upsert(&self, user_id: &str, record: &RemoteSessionRecord) -> Result<(), SyncError> {
        let response = self
            .request(Method::PUT, self.session_url(user_id)?)
            .json(record)
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), SyncError> {
        let response = self
            .request(Method::DELETE, self.session_url(user_id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("[SYNC] Remote session already absent");
            return Ok(());
        }
        error_for_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TimeEntryApi for HttpBackend {
    async fn create_entry(&self, entry: &NewTimeEntry) -> Result<CreatedTimeEntry, SyncError> {
        let url = self.endpoint(&["time-entries"])?;
        let response = self.request(Method::POST, url).json(entry).send().await?;
        let response = error_for_status(response).await.map_err(|e| {
            if let SyncError::Http { status: 400..=499, message } = &e {
                warn!("[COMMIT] Time entry rejected: {}", message);
            }
            e
        })?;
        response
            .json::<CreatedTimeEntry>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}
