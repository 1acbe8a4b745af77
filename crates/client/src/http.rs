//! reqwest transport for [`UploadApi`].

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use slicedrop_protocol::constants::{
    FIELD_CHUNK, FIELD_CHUNK_HASH, FIELD_CHUNK_INDEX, FIELD_CHUNK_SIZE, FIELD_FILE_HASH,
    ROUTE_GET_FILE_HREF, ROUTE_MERGE_CHUNKS, ROUTE_UPLOAD_CHUNK, ROUTE_VALIDATE_CHUNK,
    ROUTE_VALIDATE_FILE,
};
use slicedrop_protocol::{
    ApiResponse, ArtifactKey, ChunkKey, ChunkQuery, FileQuery, MergeChunksRequest,
};
use slicedrop_transfer::{ApiFuture, TransferError, UploadApi};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to a slicedrop server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUploadApi {
    client: Client,
    base_url: String,
}

impl HttpUploadApi {
    /// Creates a client for the server at `base_url` (e.g. `http://host:3000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(network)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Uses a preconfigured reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    fn file_request(&self, route: &str, key: &ArtifactKey) -> RequestBuilder {
        self.client
            .get(format!("{}/{}", self.url(route), key.file_hash()))
            .query(&FileQuery {
                file_ext: key.file_ext().to_string(),
            })
    }
}

fn network(e: reqwest::Error) -> TransferError {
    TransferError::Network(e.to_string())
}

/// Sends `request` and unwraps the `{code, data, message}` envelope.
async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<Option<T>, TransferError> {
    let response = request.send().await.map_err(network)?;
    let response = response.error_for_status().map_err(network)?;
    let envelope: ApiResponse<T> = response.json().await.map_err(network)?;
    envelope.into_result().map_err(TransferError::Api)
}

impl UploadApi for HttpUploadApi {
    fn upload_chunk(&self, key: ChunkKey, data: Vec<u8>) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let partition = key.partition();
            let form = Form::new()
                .text(FIELD_FILE_HASH, partition.file_hash().to_string())
                .text(FIELD_CHUNK_SIZE, partition.chunk_size().to_string())
                .text(FIELD_CHUNK_HASH, key.chunk_hash().to_string())
                .text(FIELD_CHUNK_INDEX, key.chunk_index().to_string())
                .part(FIELD_CHUNK, Part::bytes(data).file_name(key.file_name()));

            debug!(chunk = %key, "uploading chunk");
            let request = self.client.post(self.url(ROUTE_UPLOAD_CHUNK)).multipart(form);
            send::<()>(request).await.map(|_| ())
        })
    }

    fn validate_file(&self, key: ArtifactKey) -> ApiFuture<'_, bool> {
        Box::pin(async move {
            let exists = send::<bool>(self.file_request(ROUTE_VALIDATE_FILE, &key)).await?;
            Ok(exists.unwrap_or(false))
        })
    }

    fn file_href(&self, key: ArtifactKey) -> ApiFuture<'_, Option<String>> {
        Box::pin(async move { send::<String>(self.file_request(ROUTE_GET_FILE_HREF, &key)).await })
    }

    fn validate_chunk(&self, key: ChunkKey) -> ApiFuture<'_, bool> {
        Box::pin(async move {
            let request = self
                .client
                .get(format!("{}/{}", self.url(ROUTE_VALIDATE_CHUNK), key.chunk_hash()))
                .query(&ChunkQuery::from(&key));
            Ok(send::<bool>(request).await?.unwrap_or(false))
        })
    }

    fn merge_chunks(&self, request: MergeChunksRequest) -> ApiFuture<'_, Option<String>> {
        Box::pin(async move {
            let request = self.client.post(self.url(ROUTE_MERGE_CHUNKS)).json(&request);
            send::<String>(request).await
        })
    }
}
