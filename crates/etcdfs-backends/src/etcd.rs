use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use etcdfs_core::{DeleteOptions, Node, ReadOptions, Store, StoreError, StoreErrorKind, WriteOptions};

use crate::normalize_key;

/// etcd store configuration.
#[derive(Debug, Clone)]
pub struct EtcdStoreConfig {
    /// Client URL, e.g. `http://127.0.0.1:2379`.
    pub endpoint: String,
    /// Per-request timeout. `None` waits for the transport.
    pub timeout: Option<Duration>,
}

/// Store client for the etcd v2 keys API.
pub struct EtcdStore {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    key: Option<String>,
    #[serde(default)]
    dir: bool,
    value: Option<String>,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    created_index: Option<u64>,
    modified_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

impl EtcdNode {
    fn into_node(self, fallback_key: Option<&str>) -> Node {
        let key = self
            .key
            .or_else(|| fallback_key.map(str::to_string))
            .unwrap_or_default();
        Node {
            key,
            is_dir: self.dir,
            value: self.value.map(String::into_bytes).unwrap_or_default(),
            children: self.nodes.into_iter().map(|n| n.into_node(None)).collect(),
            created_version: self.created_index.unwrap_or(0),
            modified_version: self.modified_index.unwrap_or(0),
        }
    }
}

impl EtcdStore {
    pub fn new(config: EtcdStoreConfig) -> Result<Self, StoreError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| StoreError::ConnectionFailed {
            endpoint: config.endpoint.clone(),
            source: Box::new(e),
        })?;

        Ok(EtcdStore {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn key_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/v2/keys/{}", self.endpoint, encoded.join("/"))
    }

    fn transport_error(&self, operation: &str, key: &str, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                operation: operation.to_string(),
                key: key.to_string(),
            }
        } else {
            StoreError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                source: Box::new(e),
            }
        }
    }

    async fn finish(
        &self,
        operation: &str,
        key: &str,
        response: reqwest::Response,
    ) -> Result<Option<Node>, StoreError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, key, e))?;
        debug!("etcd {} {} -> {}", operation, key, status);
        parse_response(status, &body, key)
    }
}

/// Form-encode a PUT body. Values are sent as raw bytes.
fn write_body(value: &[u8], opts: &WriteOptions) -> String {
    let mut fields = Vec::new();
    if opts.dir {
        fields.push("dir=true".to_string());
    } else {
        fields.push(format!("value={}", urlencoding::encode_binary(value)));
    }
    if let Some(prev_exist) = opts.prev_exist {
        fields.push(format!("prevExist={}", prev_exist));
    }
    if let Some(prev_index) = opts.prev_index {
        fields.push(format!("prevIndex={}", prev_index));
    }
    fields.join("&")
}

/// Decode an etcd v2 response body.
///
/// Error bodies carry an `errorCode` and become [`StoreError::Remote`];
/// anything that is neither a node response nor a coded error is a
/// protocol error.
fn parse_response(status: StatusCode, body: &[u8], key: &str) -> Result<Option<Node>, StoreError> {
    if status.is_success() {
        if body.is_empty() {
            return Ok(None);
        }
        let parsed: EtcdResponse = serde_json::from_slice(body)
            .map_err(|e| StoreError::Protocol(format!("invalid response for '{}': {}", key, e)))?;
        return Ok(parsed.node.map(|n| n.into_node(Some(key))));
    }

    match serde_json::from_slice::<EtcdErrorBody>(body) {
        Ok(err) => Err(StoreError::remote(
            StoreErrorKind::from_code(err.error_code),
            err.message,
            if err.cause.is_empty() { key.to_string() } else { err.cause },
        )),
        Err(_) => Err(StoreError::Protocol(format!(
            "unexpected status {} for '{}': {}",
            status,
            key,
            String::from_utf8_lossy(body)
        ))),
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn read(&self, key: &str, opts: ReadOptions) -> Result<Node, StoreError> {
        let key = normalize_key(key);
        let response = self
            .client
            .get(self.key_url(&key))
            .send()
            .await
            .map_err(|e| self.transport_error("read", &key, e))?;

        let mut node = self
            .finish("read", &key, response)
            .await?
            .ok_or_else(|| StoreError::Protocol(format!("read of '{}' returned no node", key)))?;
        if !opts.dir {
            node.children.clear();
        }
        Ok(node)
    }

    async fn write(&self, key: &str, value: &[u8], opts: WriteOptions) -> Result<Node, StoreError> {
        let key = normalize_key(key);
        let response = self
            .client
            .put(self.key_url(&key))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(write_body(value, &opts))
            .send()
            .await
            .map_err(|e| self.transport_error("write", &key, e))?;

        self.finish("write", &key, response)
            .await?
            .ok_or_else(|| StoreError::Protocol(format!("write of '{}' returned no node", key)))
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), StoreError> {
        let key = normalize_key(key);
        let mut request = self.client.delete(self.key_url(&key));
        if opts.dir {
            request = request.query(&[("dir", "true")]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error("delete", &key, e))?;

        self.finish("delete", &key, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EtcdStore {
        EtcdStore::new(EtcdStoreConfig {
            endpoint: "http://127.0.0.1:2379/".to_string(),
            timeout: Some(Duration::from_secs(1)),
        })
        .unwrap()
    }

    #[test]
    fn test_key_url() {
        let store = store();
        assert_eq!(store.endpoint(), "http://127.0.0.1:2379");
        assert_eq!(store.key_url("/"), "http://127.0.0.1:2379/v2/keys/");
        assert_eq!(store.key_url("/a/b"), "http://127.0.0.1:2379/v2/keys/a/b");
        assert_eq!(
            store.key_url("/dir/with space?"),
            "http://127.0.0.1:2379/v2/keys/dir/with%20space%3F"
        );
    }

    #[test]
    fn test_write_body() {
        assert_eq!(write_body(b"a b&c", &WriteOptions::value()), "value=a%20b%26c");
        assert_eq!(
            write_body(b"", &WriteOptions::create_file()),
            "value=&prevExist=false"
        );
        assert_eq!(
            write_body(b"ignored", &WriteOptions::create_dir()),
            "dir=true&prevExist=false"
        );
        assert_eq!(
            write_body(b"v", &WriteOptions::compare_and_swap(17)),
            "value=v&prevIndex=17"
        );
    }

    #[test]
    fn test_parse_file_node() {
        let body = br#"{"action":"get","node":{"key":"/app/port","value":"8080","modifiedIndex":12,"createdIndex":7}}"#;
        let node = parse_response(StatusCode::OK, body, "/app/port").unwrap().unwrap();
        assert_eq!(node.key, "/app/port");
        assert!(!node.is_dir);
        assert_eq!(node.value, b"8080");
        assert_eq!(node.created_version, 7);
        assert_eq!(node.modified_version, 12);
    }

    #[test]
    fn test_parse_directory_listing() {
        let body = br#"{"action":"get","node":{"key":"/app","dir":true,"nodes":[
            {"key":"/app/port","value":"8080","modifiedIndex":12,"createdIndex":7},
            {"key":"/app/tls","dir":true,"modifiedIndex":9,"createdIndex":9},
            {"value":"orphan"}
        ],"modifiedIndex":3,"createdIndex":3}}"#;
        let node = parse_response(StatusCode::OK, body, "/app").unwrap().unwrap();
        assert!(node.is_dir);
        assert_eq!(node.children.len(), 3);
        assert!(node.children[1].is_dir);
        // A child without a key stays keyless for the caller to skip
        assert_eq!(node.children[2].key, "");
    }

    #[test]
    fn test_parse_root_without_key() {
        let body = br#"{"action":"get","node":{"dir":true,"nodes":[{"key":"/a","value":"1","modifiedIndex":4,"createdIndex":4}]}}"#;
        let node = parse_response(StatusCode::OK, body, "/").unwrap().unwrap();
        assert_eq!(node.key, "/");
        assert_eq!(node.created_version, 0);
        assert_eq!(node.children[0].key, "/a");
    }

    #[test]
    fn test_parse_coded_error() {
        let body = br#"{"errorCode":100,"message":"Key not found","cause":"/missing","index":42}"#;
        let err = parse_response(StatusCode::NOT_FOUND, body, "/missing").unwrap_err();
        assert_eq!(err.kind(), Some(StoreErrorKind::KeyNotFound));

        let body = br#"{"errorCode":108,"message":"Directory not empty","cause":"/d","index":42}"#;
        let err = parse_response(StatusCode::FORBIDDEN, body, "/d").unwrap_err();
        assert_eq!(err.kind(), Some(StoreErrorKind::DirNotEmpty));

        let body = br#"{"errorCode":300,"message":"Raft Internal Error"}"#;
        let err = parse_response(StatusCode::INTERNAL_SERVER_ERROR, body, "/x").unwrap_err();
        assert_eq!(err.kind(), Some(StoreErrorKind::Other(300)));
    }

    #[test]
    fn test_parse_uncoded_failure_is_protocol_error() {
        let err = parse_response(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>", "/x").unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_parse_garbage_success_body() {
        let err = parse_response(StatusCode::OK, b"not json", "/x").unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_store_coded() {
        let store = EtcdStore::new(EtcdStoreConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout: Some(Duration::from_millis(500)),
        })
        .unwrap();
        let err = store.read("/a", ReadOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), None);
    }
}
