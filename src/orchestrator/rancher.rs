use super::{EventStream, Orchestrator, OrchestratorError};
use crate::types::WorkloadDescriptor;
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::StreamExt;
use log::{debug, info};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Event classes requested on the subscription socket.
const EVENT_NAMES: [&str; 2] = ["resource.change", "service.kubernetes.change"];

/// Client for the Rancher cattle API (v2-beta).
pub struct RancherClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

/// Where this agent runs, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHost {
    pub host_id: String,
    pub agent_ip: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelfHost {
    agent_ip: String,
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct Host {
    id: String,
    #[serde(default)]
    uuid: Option<String>,
}

impl RancherClient {
    pub fn new(
        base_url: &str,
        access_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: access_key.map(|key| (key, secret_key.unwrap_or_default())),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((key, secret)) => request.basic_auth(key, Some(secret)),
            None => request,
        }
    }

    fn authorization(&self) -> Option<String> {
        self.credentials.as_ref().map(|(key, secret)| {
            let token =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", key, secret));
            format!("Basic {}", token)
        })
    }

    /// GET a JSON document; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<Option<T>, OrchestratorError> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }
        Ok(Some(response.json().await?))
    }

    /// Fetch every page of a collection.
    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, OrchestratorError> {
        let mut items = Vec::new();
        let mut next = Some(format!("{}/{}", self.base_url, path));

        while let Some(url) = next.take() {
            debug!("Fetching {}", url);
            let page: Collection<T> = self
                .get_json(self.authed(self.http.get(&url)), &url)
                .await?
                .ok_or_else(|| OrchestratorError::Status {
                    url: url.clone(),
                    status: StatusCode::NOT_FOUND,
                    body: String::new(),
                })?;
            items.extend(page.data);
            next = page
                .pagination
                .and_then(|p| p.next)
                .filter(|n| !n.is_empty());
        }
        Ok(items)
    }

    /// WebSocket URL of the change subscription.
    pub fn subscribe_url(&self) -> Result<Url, OrchestratorError> {
        let mut url = Url::parse(&format!("{}/subscribe", self.base_url))
            .map_err(|e| OrchestratorError::Url(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme)
            .map_err(|_| OrchestratorError::Url(format!("cannot use scheme {}", scheme)))?;
        {
            let mut query = url.query_pairs_mut();
            for name in EVENT_NAMES {
                query.append_pair("eventNames", name);
            }
        }
        Ok(url)
    }

    /// Ask the metadata service who we are, then map our host uuid to the
    /// orchestrator's host id.
    pub async fn resolve_local_host(
        &self,
        metadata_url: &str,
    ) -> Result<LocalHost, OrchestratorError> {
        let url = format!("{}/self/host", metadata_url.trim_end_matches('/'));
        let request = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json");
        let me: SelfHost = self
            .get_json(request, &url)
            .await?
            .ok_or_else(|| OrchestratorError::Status {
                url: url.clone(),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            })?;

        let hosts: Vec<Host> = self.list_all("hosts").await?;
        let host = hosts
            .into_iter()
            .find(|h| h.uuid.as_deref() == Some(me.uuid.as_str()))
            .ok_or_else(|| OrchestratorError::UnknownHost(me.uuid.clone()))?;

        Ok(LocalHost {
            host_id: host.id,
            agent_ip: me.agent_ip,
        })
    }
}

#[async_trait]
impl Orchestrator for RancherClient {
    async fn list_workloads(&self) -> Result<Vec<WorkloadDescriptor>, OrchestratorError> {
        self.list_all("containers").await
    }

    async fn get_workload(
        &self,
        id: &str,
    ) -> Result<Option<WorkloadDescriptor>, OrchestratorError> {
        let url = format!("{}/containers/{}", self.base_url, id);
        self.get_json(self.authed(self.http.get(&url)), &url).await
    }

    async fn subscribe(&self) -> Result<EventStream, OrchestratorError> {
        let url = self.subscribe_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(Box::new)?;
        if let Some(auth) = self.authorization() {
            let value = HeaderValue::from_str(&auth)
                .map_err(|e| OrchestratorError::Credentials(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(Box::new)?;
        info!(
            "Listening on websocket connection: {} ({})",
            url,
            response.status()
        );

        let events = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().as_bytes().to_vec())),
                Ok(Message::Binary(data)) => Some(Ok(data.to_vec())),
                Ok(_) => None,
                Err(e) => Some(Err(OrchestratorError::WebSocket(Box::new(e)))),
            }
        });
        Ok(events.boxed())
    }
}
