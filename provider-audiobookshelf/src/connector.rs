//! Audiobookshelf API connector
//!
//! Implements `SessionNegotiator`, `ProgressRemote` and `LibraryItemSource`
//! over the host's `HttpClient`.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::server::{
    LibraryItemSource, PlaybackSession, ProgressRemote, ProgressUpdate, RemoteItem,
    RemoteProgress, SessionNegotiator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::ProviderError;
use crate::types::{
    AbsPlaybackSession, DeviceInfo, LibraryItem, MediaProgress, PlayRequest, ProgressPatch,
    SessionCloseRequest, SessionSyncRequest,
};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const CLIENT_NAME: &str = "audiobook-core";

/// Formats requested when opening a session; the server transcodes others.
const DEFAULT_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp4",
    "audio/x-m4b",
    "audio/aac",
    "audio/flac",
    "audio/ogg",
];

/// Audiobookshelf API connector
///
/// # Example
///
/// ```ignore
/// use provider_audiobookshelf::AudiobookshelfConnector;
/// use bridge_traits::server::SessionNegotiator;
///
/// let abs = AudiobookshelfConnector::new(http_client, "https://abs.local", token)
///     .with_device_id("desktop-7f3a");
/// let session = abs.start_session("li_8x2k").await?;
/// ```
pub struct AudiobookshelfConnector {
    http_client: Arc<dyn HttpClient>,

    /// Server root without trailing slash
    base_url: String,

    /// API token of the signed-in user
    token: String,

    device_id: Option<String>,

    supported_mime_types: Vec<String>,
}

impl AudiobookshelfConnector {
    /// Create a connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `base_url` - Server root, e.g. `https://abs.example.com`
    /// * `token` - User API token, sent as a bearer token
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            device_id: None,
            supported_mime_types: DEFAULT_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Identify this device to the server's session list.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_supported_mime_types(mut self, mime_types: Vec<String>) -> Self {
        self.supported_mime_types = mime_types;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute, authorized URL for a track. Relative paths are served by
    /// this server and need the token as a query parameter.
    fn content_url(&self, content_url: &str) -> String {
        if content_url.starts_with("http://") || content_url.starts_with("https://") {
            return content_url.to_string();
        }
        let separator = if content_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}token={}",
            self.base_url,
            content_url,
            separator,
            urlencoding::encode(&self.token)
        )
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
            .bearer_token(self.token.as_str())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    /// Send a request and map the status. `resource` names what a 404 means.
    async fn send(&self, request: HttpRequest, resource: &str) -> Result<HttpResponse> {
        let response = self.http_client.execute(request).await?;
        let status = response.status;

        if response.is_success() {
            debug!(status, "API request succeeded");
            return Ok(response);
        }

        let error = match status {
            404 => ProviderError::NotFound {
                resource: resource.to_string(),
            },
            401 | 403 => ProviderError::Unauthorized {
                status_code: status,
            },
            _ => ProviderError::ApiError {
                status_code: status,
                message: response.text(),
            },
        };
        warn!(status, resource, "API request failed");
        Err(error.into())
    }
}

fn encode(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl SessionNegotiator for AudiobookshelfConnector {
    #[instrument(skip(self))]
    async fn start_session(&self, item_id: &str) -> Result<PlaybackSession> {
        let body = PlayRequest {
            device_info: DeviceInfo {
                client_name: CLIENT_NAME.to_string(),
                client_version: env!("CARGO_PKG_VERSION").to_string(),
                device_id: self.device_id.clone(),
            },
            force_direct_play: true,
            force_transcode: false,
            supported_mime_types: self.supported_mime_types.clone(),
            media_player: CLIENT_NAME.to_string(),
        };
        let request = self
            .request(HttpMethod::Post, &format!("/api/items/{}/play", encode(item_id)))
            .json(&body)?;

        let response = self.send(request, &format!("item {}", item_id)).await?;
        let session: AbsPlaybackSession = response.json()?;
        let session = session.into_session(|url| self.content_url(url));

        info!(
            session_id = %session.id,
            tracks = session.tracks.len(),
            resume_position = session.resume_position,
            "Playback session opened"
        );
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn sync_session(
        &self,
        session_id: &str,
        position: f64,
        time_listened: f64,
    ) -> Result<()> {
        let request = self
            .request(HttpMethod::Post, &format!("/api/session/{}/sync", encode(session_id)))
            .json(&SessionSyncRequest {
                current_time: position,
                time_listened,
            })?;
        self.send(request, &format!("session {}", session_id))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_session(&self, session_id: &str, final_position: Option<f64>) -> Result<()> {
        let mut request =
            self.request(HttpMethod::Post, &format!("/api/session/{}/close", encode(session_id)));
        if let Some(position) = final_position {
            request = request.json(&SessionCloseRequest {
                current_time: position,
            })?;
        }
        self.send(request, &format!("session {}", session_id))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressRemote for AudiobookshelfConnector {
    /// A 404 means the user has no progress for the item yet.
    #[instrument(skip(self))]
    async fn get_progress(&self, item_id: &str) -> Result<Option<RemoteProgress>> {
        let request = self.request(HttpMethod::Get, &format!("/api/me/progress/{}", encode(item_id)));
        match self.send(request, &format!("progress {}", item_id)).await {
            Ok(response) => {
                let progress: MediaProgress = response.json()?;
                Ok(Some(progress.into()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, update))]
    async fn update_progress(&self, item_id: &str, update: &ProgressUpdate) -> Result<()> {
        let request = self
            .request(HttpMethod::Patch, &format!("/api/me/progress/{}", encode(item_id)))
            .json(&ProgressPatch {
                current_time: update.position,
                duration: update.duration,
                progress: update.progress,
                is_finished: update.is_finished,
            })?;
        self.send(request, &format!("item {}", item_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl LibraryItemSource for AudiobookshelfConnector {
    #[instrument(skip(self))]
    async fn fetch_item(&self, item_id: &str) -> Result<RemoteItem> {
        let request = self.request(
            HttpMethod::Get,
            &format!("/api/items/{}?expanded=1", encode(item_id)),
        );
        let response = self.send(request, &format!("item {}", item_id)).await?;
        let item: LibraryItem = response.json()?;
        Ok(item.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    fn connector(http: MockHttpClient) -> AudiobookshelfConnector {
        AudiobookshelfConnector::new(Arc::new(http), "https://abs.local/", "tok en")
    }

    fn body_json(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_start_session() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| {
                req.method == HttpMethod::Post
                    && req.url == "https://abs.local/api/items/li_1/play"
                    && req.headers.get("Authorization") == Some(&"Bearer tok en".to_string())
            })
            .returning(|req| {
                let body = body_json(&req);
                assert_eq!(body["forceDirectPlay"], true);
                assert_eq!(body["deviceInfo"]["clientName"], "audiobook-core");

                Ok(response(
                    200,
                    r#"{
                        "id": "ses_1",
                        "libraryItemId": "li_1",
                        "currentTime": 42.0,
                        "audioTracks": [
                            { "index": 1, "startOffset": 0, "duration": 600, "contentUrl": "/s/item/li_1/a.mp3" },
                            { "index": 2, "startOffset": 600, "duration": 300, "contentUrl": "https://cdn.local/b.mp3" }
                        ],
                        "chapters": []
                    }"#,
                ))
            });

        let session = connector(http).start_session("li_1").await.unwrap();

        assert_eq!(session.id, "ses_1");
        assert_eq!(session.resume_position, 42.0);
        assert_eq!(session.total_duration(), 900.0);
        assert_eq!(
            session.tracks[0].content_url,
            "https://abs.local/s/item/li_1/a.mp3?token=tok%20en"
        );
        assert_eq!(session.tracks[1].content_url, "https://cdn.local/b.mp3");
    }

    #[tokio::test]
    async fn test_sync_session_body_and_not_found() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.url == "https://abs.local/api/session/ses_1/sync")
            .returning(|req| {
                let body = body_json(&req);
                assert_eq!(body["currentTime"], 1190.0);
                assert_eq!(body["timeListened"], 0.0);
                Ok(response(404, "Not Found"))
            });

        let err = connector(http)
            .sync_session("ses_1", 1190.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(ref r) if r == "session ses_1"));
    }

    #[tokio::test]
    async fn test_close_session_without_position_has_no_body() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.url.ends_with("/api/session/ses_1/close") && req.body.is_none())
            .returning(|_| Ok(response(200, "")));

        connector(http).close_session("ses_1", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_progress() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.method == HttpMethod::Get && req.url.ends_with("/api/me/progress/li_1"))
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{
                        "id": "prog_1",
                        "libraryItemId": "li_1",
                        "currentTime": 900.5,
                        "duration": 3600,
                        "progress": 0.25,
                        "isFinished": false,
                        "lastUpdate": 1700000000000
                    }"#,
                ))
            });

        let progress = connector(http).get_progress("li_1").await.unwrap().unwrap();
        assert_eq!(progress.position, 900.5);
        assert_eq!(progress.last_update, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_missing_progress_is_none() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, "")));

        assert!(connector(http).get_progress("li_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_progress_patch() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.method == HttpMethod::Patch && req.url.ends_with("/api/me/progress/li_1"))
            .returning(|req| {
                let body = body_json(&req);
                assert_eq!(body["progress"], 0.25);
                assert_eq!(body["duration"], 3600.0);
                Ok(response(200, "{}"))
            });

        connector(http)
            .update_progress("li_1", &ProgressUpdate::new(900.0, 3600.0, false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_not_terminal() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(503, "maintenance")));

        let err = connector(http)
            .update_progress("li_1", &ProgressUpdate::new(1.0, 2.0, false))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::OperationFailed(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_fetch_item_expanded() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.url == "https://abs.local/api/items/li_1?expanded=1")
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{
                        "id": "li_1",
                        "media": {
                            "metadata": { "title": "Dune", "authorName": "Frank Herbert" },
                            "duration": 1800,
                            "chapters": [
                                { "id": 0, "start": 0, "end": 900, "title": "Book One" },
                                { "id": 1, "start": 900, "end": 1800, "title": "Book Two" }
                            ]
                        }
                    }"#,
                ))
            });

        let item = connector(http).fetch_item("li_1").await.unwrap();
        assert_eq!(item.title, "Dune");
        assert_eq!(item.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(item.chapters.len(), 2);
        assert_eq!(item.chapters[1].id, "1");
    }
}
