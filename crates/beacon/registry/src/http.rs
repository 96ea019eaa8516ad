//! HTTP client for the beacon registry REST API

use crate::api::{beacon_resource, RegistryApi};
use crate::config::RegistryConfig;
use crate::model::{
    BeaconAttachment, DeleteAttachmentsResponse, ListAttachmentsResponse, ListBeaconsResponse,
    RegistryBeacon,
};
use crate::{RegistryError, RegistryResult};
use async_trait::async_trait;
use beacon_types::BeaconName;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Registry client over HTTPS with bearer-token auth.
#[derive(Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| RegistryError::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.as_str().trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RegistryResult<T> {
        let response = self.authorize(request).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> RegistryResult<T> {
        let status = response.status();

        if status.is_success() {
            Ok(response.json().await?)
        } else if status == StatusCode::NOT_FOUND {
            let resource = response.url().path().to_string();
            Err(RegistryError::NotFound(resource))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(RegistryError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryClient {
    async fn list_beacons(&self, query: &str) -> RegistryResult<ListBeaconsResponse> {
        debug!(query, "listing registry beacons");
        self.send(self.client.get(self.url("beacons")).query(&[("q", query)]))
            .await
    }

    async fn get_beacon(&self, name: &BeaconName) -> RegistryResult<RegistryBeacon> {
        self.send(self.client.get(self.url(&beacon_resource(name))))
            .await
    }

    async fn list_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<Vec<BeaconAttachment>> {
        let path = format!("{}/attachments", beacon_resource(name));
        let response: ListAttachmentsResponse = self
            .send(
                self.client
                    .get(self.url(&path))
                    .query(&[("namespacedType", namespaced_type)]),
            )
            .await?;
        Ok(response.attachments)
    }

    async fn create_attachment(
        &self,
        name: &BeaconName,
        attachment: &BeaconAttachment,
    ) -> RegistryResult<BeaconAttachment> {
        debug!(beacon = %name, "creating attachment");
        let path = format!("{}/attachments", beacon_resource(name));
        self.send(self.client.post(self.url(&path)).json(attachment))
            .await
    }

    async fn batch_delete_attachments(
        &self,
        name: &BeaconName,
        namespaced_type: &str,
    ) -> RegistryResult<u64> {
        debug!(beacon = %name, "deleting attachments");
        let path = format!("{}/attachments:batchDelete", beacon_resource(name));
        let response: DeleteAttachmentsResponse = self
            .send(
                self.client
                    .post(self.url(&path))
                    .query(&[("namespacedType", namespaced_type)]),
            )
            .await?;
        Ok(response.num_deleted)
    }
}
