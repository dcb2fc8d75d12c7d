//! S3 access: object listing, staging objects to local temp files, and
//! uploading the final table.

use crate::error::{PivotError, Result};

use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// True if the identifier is an `s3://` URI
pub fn is_s3_uri(uri: &str) -> bool {
    uri.trim().to_lowercase().starts_with("s3://")
}

/// Split `s3://bucket/key` into `(bucket, key)`; the key may be empty
pub fn parse_s3_uri(uri: &str) -> Option<(String, String)> {
    let trimmed = uri.trim();
    if !is_s3_uri(trimmed) {
        return None;
    }
    let rest = &trimmed[5..];
    let (bucket, key) = match rest.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

/// Thin wrapper over the S3 client with the operations the pipeline needs
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration (env, profile, IMDS)
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
        }
    }

    /// List object keys under a prefix ending in `.parquet`
    pub async fn list_parquet_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|e| PivotError::remote(format!("s3://{}/{}", bucket, prefix), e))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    if key.to_lowercase().ends_with(".parquet") {
                        keys.push(key.to_string());
                    }
                }
            }
        }

        debug!(
            "Listed {} parquet objects under s3://{}/{}",
            keys.len(),
            bucket,
            prefix
        );
        Ok(keys)
    }

    /// Download one object into a temporary file inside `dir`.
    ///
    /// The returned path deletes the file when dropped.
    pub async fn stage(&self, bucket: &str, key: &str, dir: &Path) -> Result<TempPath> {
        let uri = format!("s3://{}/{}", bucket, key);
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PivotError::remote(&uri, e))?;

        let tmp = tempfile::Builder::new()
            .prefix("staged_")
            .suffix(".parquet")
            .tempfile_in(dir)?;
        let (file, path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| PivotError::remote(&uri, e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Staged {} ({} bytes) to {}", uri, written, path.display());
        Ok(path)
    }

    /// Upload a local file to `s3://bucket/key`
    pub async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<()> {
        let uri = format!("s3://{}/{}", bucket, key);
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| PivotError::remote(&uri, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type("application/vnd.apache.parquet")
            .send()
            .await
            .map_err(|e| PivotError::remote(&uri, e))?;

        info!("Uploaded {} to {}", path.display(), uri);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri() {
        assert_eq!(
            parse_s3_uri("s3://nyc-tlc/trip data/yellow_tripdata_2023-01.parquet"),
            Some((
                "nyc-tlc".to_string(),
                "trip data/yellow_tripdata_2023-01.parquet".to_string()
            ))
        );
        assert_eq!(
            parse_s3_uri("S3://bucket"),
            Some(("bucket".to_string(), String::new()))
        );
        assert_eq!(parse_s3_uri("s3:///key"), None);
        assert_eq!(parse_s3_uri("/local/path"), None);
    }

    #[test]
    fn test_is_s3_uri() {
        assert!(is_s3_uri("  s3://bucket/prefix"));
        assert!(!is_s3_uri("data/s3://x"));
    }
}
