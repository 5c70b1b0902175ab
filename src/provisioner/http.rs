use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{project_name, DatabaseProvisioner, ProvisionedDatabase, ProvisionerError};
use crate::config::ProviderConfig;
use crate::database::redact_connection_string;
use crate::types::TenantId;

const MAX_ERROR_MESSAGE_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct CreateProjectResponse {
    project: ProjectBody,
    #[serde(default)]
    connection_uris: Vec<ConnectionUri>,
}

#[derive(Debug, Deserialize)]
struct ProjectBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionUri {
    connection_uri: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Provisioner talking to a hosted-Postgres HTTP API (`/projects`)
#[derive(Clone)]
pub struct HttpProvisioner {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    region: Option<String>,
}

impl HttpProvisioner {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProvisionerError> {
        let mut base_url = Url::parse(&config.api_url)
            .map_err(|e| ProvisionerError::Misconfigured(format!("provider url '{}': {}", config.api_url, e)))?;
        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProvisionerError::Misconfigured(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
            region: config.region.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProvisionerError> {
        self.base_url
            .join(path)
            .map_err(|e| ProvisionerError::Misconfigured(format!("endpoint '{path}': {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> ProvisionerError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        let message: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();

        if status.is_client_error() {
            ProvisionerError::Rejected {
                status: status.as_u16(),
                message,
            }
        } else {
            ProvisionerError::Unavailable(format!("provider returned {status}: {message}"))
        }
    }
}

fn transport_error(err: reqwest::Error) -> ProvisionerError {
    if err.is_timeout() {
        ProvisionerError::Unavailable("provider request timed out".to_string())
    } else {
        ProvisionerError::Unavailable(format!("provider request failed: {err}"))
    }
}

#[async_trait]
impl DatabaseProvisioner for HttpProvisioner {
    async fn provision(&self, tenant_id: &TenantId) -> Result<ProvisionedDatabase, ProvisionerError> {
        let url = self.endpoint("projects")?;
        let mut project = json!({ "name": project_name(tenant_id) });
        if let Some(region) = &self.region {
            project["region_id"] = json!(region);
        }

        let response = self
            .authorize(self.client.post(url))
            .json(&json!({ "project": project }))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let created: CreateProjectResponse = response
            .json()
            .await
            .map_err(|e| ProvisionerError::Unavailable(format!("unreadable provider response: {e}")))?;

        let connection_string = created
            .connection_uris
            .into_iter()
            .map(|uri| uri.connection_uri)
            .next()
            .ok_or_else(|| {
                ProvisionerError::Unavailable(format!(
                    "provider created project {} without a connection uri",
                    created.project.id
                ))
            })?;

        info!(
            "Provisioned database {} for tenant {} at {}",
            created.project.id,
            tenant_id,
            redact_connection_string(&connection_string)
        );

        Ok(ProvisionedDatabase {
            external_project_id: created.project.id,
            connection_string,
        })
    }

    async fn delete(&self, external_project_id: &str) -> Result<(), ProvisionerError> {
        let url = self.endpoint(&format!("projects/{external_project_id}"))?;

        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => {
                info!("Deleted provider database {}", external_project_id);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!("Provider database {} was already gone", external_project_id);
                Ok(())
            }
            _ => Err(Self::error_from_response(response).await),
        }
    }
}
