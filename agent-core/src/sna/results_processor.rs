//! The Result Processor (C10): spills oversized results to storage rather
//! than pushing them inline. The size gate is per-operation (not a global
//! threshold); the storage key is `responses/{trace_id}`; gzip is optional,
//! controlled by the operation's own `compress_response_file` flag.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::storage::StageClient;

use super::operation_result::PublishedResult;

const DEFAULT_EXPIRATION_SECONDS: u64 = 60 * 60;

pub struct ResultsProcessor {
    stage_client: Arc<dyn StageClient>,
    presigned_url_expiration: Duration,
}

impl ResultsProcessor {
    pub fn new(stage_client: Arc<dyn StageClient>, presigned_url_expiration: Duration) -> Self {
        Self {
            stage_client,
            presigned_url_expiration,
        }
    }

    pub fn with_default_expiration(stage_client: Arc<dyn StageClient>) -> Self {
        Self::new(stage_client, Duration::from_secs(DEFAULT_EXPIRATION_SECONDS))
    }

    fn must_use_presigned_url(limit_bytes: i64, size: usize) -> bool {
        limit_bytes > 0 && (size as i64) > limit_bytes
    }

    /// If `result`'s serialized size exceeds `response_size_limit_bytes`,
    /// writes it (optionally gzipped) to `responses/{trace_id}` in storage
    /// and replaces the inline result with a presigned URL pointer instead.
    /// Returns the (possibly unmodified) result ready to push to the
    /// orchestrator.
    pub fn process(
        &self,
        mut result: PublishedResult,
        response_size_limit_bytes: i64,
        compress_response_file: bool,
    ) -> PublishedResult {
        let Some(trace_id) = result.envelope.trace_id.clone() else {
            return result;
        };
        let Some(ref value) = result.envelope.result else {
            return result;
        };

        let serialized = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(_) => return result,
        };

        if !Self::must_use_presigned_url(response_size_limit_bytes, serialized.len()) {
            return result;
        }

        let payload = if compress_response_file {
            match Self::gzip(&serialized) {
                Ok(compressed) => compressed,
                Err(err) => {
                    error!("failed to gzip oversized result"; "trace_id" => &trace_id, "error" => err.to_string());
                    return result;
                }
            }
        } else {
            serialized
        };

        let key = format!("responses/{}", trace_id);
        if let Err(err) = self.stage_client.write(&key, &payload) {
            error!("failed to spill oversized result to storage"; "trace_id" => &trace_id, "error" => err.to_string());
            return result;
        }

        let url = match self.stage_client.generate_presigned_url(&key, self.presigned_url_expiration) {
            Ok(url) => url,
            Err(err) => {
                error!("failed to generate presigned url for spilled result"; "trace_id" => &trace_id, "error" => err.to_string());
                return result;
            }
        };

        result.envelope.result = None;
        result.envelope.result_location = Some(url);
        result.envelope.result_compressed = Some(compress_response_file);
        result
    }

    fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()
    }
}
