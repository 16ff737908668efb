//! Two `StageClient` implementations: `WarehouseStageClient`, the production
//! client that round-trips through a warehouse stage via `PUT`/`GET`/`REMOVE`
//! queries and local temp files, and `LocalStageClient`, an in-memory fake
//! for tests.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use super::client::{is_gzip, StageClient, StageClientError};
use crate::db::QueryExecutor;

const DEFAULT_STAGE_NAME: &str = "mcd_agent.core.app_stage";
const DEFAULT_PREFIX: &str = "mcd";
const SNOWFLAKE_ERROR_FILE_NOT_FOUND_MARKER: &str = "253006";
/// Config job type used for stage queries; these run on the same warehouse
/// as config store reads rather than a query-serving pool.
const STAGE_JOB_TYPE: &str = "storage";

pub struct WarehouseStageClient {
    executor: Arc<QueryExecutor>,
    stage_name: String,
    prefix: String,
    /// Whether the process is running inside the warehouse container. This
    /// decides which of two ways to request a pre-signed URL: a stored
    /// procedure indirection is required inside the container;
    /// `GET_PRESIGNED_URL` works directly for local development.
    in_container: bool,
}

impl WarehouseStageClient {
    pub fn new(
        executor: Arc<QueryExecutor>,
        stage_name: Option<String>,
        in_container: bool,
    ) -> Self {
        let mut prefix = DEFAULT_PREFIX.to_owned();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            executor,
            stage_name: stage_name.unwrap_or_else(|| DEFAULT_STAGE_NAME.to_owned()),
            prefix,
            in_container,
        }
    }

    fn apply_prefix(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn parse_key(key: &str) -> (String, String) {
        match key.rsplit_once('/') {
            Some((folder, file_name)) => (format!("{}/", folder), file_name.to_owned()),
            None => (String::new(), key.to_owned()),
        }
    }

    fn run_stage_query(&self, query: &str, operation: &str, key: &str) -> Result<Vec<Vec<String>>, StageClientError> {
        self.executor
            .execute_query(STAGE_JOB_TYPE, query, &[])
            .map(|rows| rows.rows)
            .map_err(|err| {
                let message = err.to_string();
                if message.contains(SNOWFLAKE_ERROR_FILE_NOT_FOUND_MARKER) {
                    StageClientError::NotFound(format!("File not found: {}", key))
                } else {
                    StageClientError::Generic(format!("{} operation failed for: {}: {}", operation, key, message))
                }
            })
    }
}

impl StageClient for WarehouseStageClient {
    fn bucket_name(&self) -> &str {
        &self.stage_name
    }

    fn write(&self, key: &str, contents: &[u8]) -> Result<(), StageClientError> {
        let (folder, file_name) = Self::parse_key(key);
        let tmp_dir = std::env::temp_dir().join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&tmp_dir).map_err(|e| StageClientError::Generic(e.to_string()))?;
        let tmp_location = tmp_dir.join(&file_name);
        {
            let mut file = std::fs::File::create(&tmp_location)
                .map_err(|e| StageClientError::Generic(e.to_string()))?;
            file.write_all(contents)
                .map_err(|e| StageClientError::Generic(e.to_string()))?;
        }

        let put_query = format!(
            "PUT file://{} @{}/{} AUTO_COMPRESS=FALSE OVERWRITE=TRUE",
            tmp_location.display(),
            self.stage_name,
            self.apply_prefix(&folder),
        );
        let result = self.run_stage_query(&put_query, "write", key);

        let _ = std::fs::remove_file(&tmp_location);
        let _ = std::fs::remove_dir(&tmp_dir);
        result.map(|_| ())
    }

    fn read(&self, key: &str, decompress: bool, encoding: Option<&str>) -> Result<Vec<u8>, StageClientError> {
        let (_, file_name) = Self::parse_key(key);
        let tmp_dir = std::env::temp_dir().join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&tmp_dir).map_err(|e| StageClientError::Generic(e.to_string()))?;

        let get_query = format!(
            "GET @{}/{} file://{}",
            self.stage_name,
            self.apply_prefix(key),
            tmp_dir.display(),
        );
        self.run_stage_query(&get_query, "read", key)?;

        let tmp_location = tmp_dir.join(&file_name);
        let mut content = std::fs::read(&tmp_location).map_err(|e| StageClientError::Generic(e.to_string()))?;
        let _ = std::fs::remove_file(&tmp_location);
        let _ = std::fs::remove_dir(&tmp_dir);

        if decompress && is_gzip(&content) {
            content = decompress_gzip(&content).map_err(StageClientError::Generic)?;
        }
        if let Some(_encoding) = encoding {
            // content is already UTF-8 bytes on the wire; encoding selection
            // beyond UTF-8 is not supported by the warehouse stage protocol.
        }
        Ok(content)
    }

    fn delete(&self, key: &str) -> Result<(), StageClientError> {
        let delete_query = format!("REMOVE @{}/{}", self.stage_name, self.apply_prefix(key));
        self.run_stage_query(&delete_query, "delete", key).map(|_| ())
    }

    fn generate_presigned_url(&self, key: &str, expiration: Duration) -> Result<String, StageClientError> {
        let mut full_key = self.apply_prefix(key);
        if let Some(stripped) = full_key.strip_prefix('/') {
            full_key = stripped.to_owned();
        }
        let pre_signed_url_query = format!(
            "CALL GET_PRESIGNED_URL(@{}, '{}', {})",
            self.stage_name,
            full_key,
            expiration.as_secs_f64(),
        );

        let rows = if !self.in_container {
            self.run_stage_query(&pre_signed_url_query, "pre_signed_url", key)?
        } else {
            // Inside the SNA, GET_PRESIGNED_URL must be invoked indirectly
            // through a stored procedure; calling it directly doesn't work.
            let wrapped = format!("CALL mcd_agent.core.execute_query('{}')", pre_signed_url_query.replace('\'', "''"));
            self.run_stage_query(&wrapped, "pre_signed_url", key)?
        };

        rows.first()
            .and_then(|row| row.first())
            .cloned()
            .ok_or_else(|| StageClientError::Generic("No pre-signed URL returned".to_owned()))
    }

    fn is_bucket_private(&self) -> bool {
        true
    }
}

fn decompress_gzip(content: &[u8]) -> Result<Vec<u8>, String> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(content);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

/// An in-memory fake used in tests; never touches the filesystem or a
/// warehouse connection.
#[derive(Default)]
pub struct LocalStageClient {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl LocalStageClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageClient for LocalStageClient {
    fn bucket_name(&self) -> &str {
        "local-fake-stage"
    }

    fn write(&self, key: &str, contents: &[u8]) -> Result<(), StageClientError> {
        self.files
            .lock()
            .expect("local stage lock poisoned")
            .insert(key.to_owned(), contents.to_vec());
        Ok(())
    }

    fn read(&self, key: &str, decompress: bool, _encoding: Option<&str>) -> Result<Vec<u8>, StageClientError> {
        let content = self
            .files
            .lock()
            .expect("local stage lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StageClientError::NotFound(format!("File not found: {}", key)))?;
        if decompress && is_gzip(&content) {
            decompress_gzip(&content).map_err(StageClientError::Generic)
        } else {
            Ok(content)
        }
    }

    fn delete(&self, key: &str) -> Result<(), StageClientError> {
        self.files.lock().expect("local stage lock poisoned").remove(key);
        Ok(())
    }

    fn generate_presigned_url(&self, key: &str, expiration: Duration) -> Result<String, StageClientError> {
        Ok(format!("https://local-fake-stage/{}?expires_in={}", key, expiration.as_secs()))
    }

    fn is_bucket_private(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_stage_client_round_trips_a_write_and_read() {
        let client = LocalStageClient::new();
        client.write("dir/file.txt", b"hello").unwrap();
        let content = client.read("dir/file.txt", false, None).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn local_stage_client_read_missing_key_is_not_found() {
        let client = LocalStageClient::new();
        let err = client.read("missing", false, None).unwrap_err();
        assert!(matches!(err, StageClientError::NotFound(_)));
    }

    #[test]
    fn parse_key_splits_folder_and_file_name() {
        let (folder, file_name) = WarehouseStageClient::parse_key("a/b/c.txt");
        assert_eq!(folder, "a/b/");
        assert_eq!(file_name, "c.txt");
    }

    #[test]
    fn parse_key_with_no_folder() {
        let (folder, file_name) = WarehouseStageClient::parse_key("c.txt");
        assert_eq!(folder, "");
        assert_eq!(file_name, "c.txt");
    }
}
