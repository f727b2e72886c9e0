//! Consul agent HTTP API.
//!
//! Only the local agent endpoints are used: services registered here are
//! tied to the agent running on the same host, which is what makes the
//! per-host deployment model work.

use std::collections::HashMap;
use std::time::Duration;

use super::{LiveServices, RegistryError, ServiceRegistry};
use crate::types::{HealthCheck, Registration};
use async_trait::async_trait;
use log::debug;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TOKEN_HEADER: &str = "X-Consul-Token";

pub struct ConsulRegistry {
    http: reqwest::Client,
    address: String,
    datacenter: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentServiceCheck>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck {
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<String>,
    interval: String,
}

impl From<&HealthCheck> for AgentServiceCheck {
    fn from(check: &HealthCheck) -> Self {
        match check {
            HealthCheck::Http { url, interval } => AgentServiceCheck {
                http: Some(url.clone()),
                tcp: None,
                interval: format!("{}s", interval.as_secs()),
            },
            HealthCheck::Tcp { address, interval } => AgentServiceCheck {
                http: None,
                tcp: Some(address.clone()),
                interval: format!("{}s", interval.as_secs()),
            },
        }
    }
}

impl ConsulRegistry {
    pub fn new(
        address: &str,
        datacenter: Option<String>,
        token: Option<String>,
    ) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
            datacenter,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/agent/{}", self.address, path)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.datacenter {
            Some(dc) => request.query(&[("dc", dc)]),
            None => request,
        };
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn check(url: &str, response: Response) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn list_services(&self) -> Result<LiveServices, RegistryError> {
        let url = self.url("services");
        let response = self.prepare(self.http.get(&url)).send().await?;
        let services: HashMap<String, serde_json::Value> =
            Self::check(&url, response).await?.json().await?;
        Ok(services
            .into_keys()
            .map(|id| (id.to_lowercase(), id))
            .collect())
    }

    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let url = self.url("service/register");
        let body = AgentServiceRegistration {
            id: registration.id.as_str(),
            name: &registration.name,
            tags: &registration.tags,
            address: &registration.address,
            port: registration.port,
            check: registration.check.as_ref().map(AgentServiceCheck::from),
        };
        debug!("Registering {:?}", body);
        let response = self.prepare(self.http.put(&url)).json(&body).send().await?;
        Self::check(&url, response).await?;
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let url = self.url(&format!("service/deregister/{}", service_id));
        let response = self.prepare(self.http.put(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Service {} already absent", service_id);
            return Ok(());
        }
        Self::check(&url, response).await?;
        Ok(())
    }
}
