//! `StageClient`: the storage abstraction the Storage Service (C9) dispatches
//! against. The operations it actually calls (`write`/`read`/`delete`/
//! `generate_presigned_url`/`is_bucket_private`) are required; `read_many_json`/
//! `list_objects`/`managed_download` have no operation type wired to them in
//! the event routing table, so they're declared with a not-implemented
//! default rather than a real body.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Permissions(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("{0}")]
    Generic(String),
}

pub trait StageClient: Send + Sync {
    fn bucket_name(&self) -> &str;

    fn write(&self, key: &str, contents: &[u8]) -> Result<(), StageClientError>;

    fn read(
        &self,
        key: &str,
        decompress: bool,
        encoding: Option<&str>,
    ) -> Result<Vec<u8>, StageClientError>;

    fn delete(&self, key: &str) -> Result<(), StageClientError>;

    fn generate_presigned_url(
        &self,
        key: &str,
        expiration: Duration,
    ) -> Result<String, StageClientError>;

    fn is_bucket_private(&self) -> bool;

    fn read_many_json(&self, _keys: &[String]) -> Result<Vec<serde_json::Value>, StageClientError> {
        Err(StageClientError::NotImplemented("read_many_json".to_owned()))
    }

    fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, StageClientError> {
        Err(StageClientError::NotImplemented("list_objects".to_owned()))
    }

    fn managed_download(&self, _key: &str, _destination: &str) -> Result<(), StageClientError> {
        Err(StageClientError::NotImplemented("managed_download".to_owned()))
    }
}

pub(super) const GZIP_MAGIC_NUMBER: [u8; 2] = [0x1f, 0x8b];

pub(super) fn is_gzip(content: &[u8]) -> bool {
    content.len() >= 2 && content[..2] == GZIP_MAGIC_NUMBER
}
