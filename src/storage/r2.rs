use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;

use crate::error::{AppError, AppResult};

use super::{ensure_safe_key, StorageBackend};

pub struct R2Backend {
    bucket: Box<Bucket>,
    bucket_name: String,
}

impl R2Backend {
    pub fn new(
        bucket_name: String,
        account_id: String,
        access_key: String,
        secret_key: String,
    ) -> AppResult<Self> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: format!("https://{}.r2.cloudflarestorage.com", account_id),
        };

        let credentials = Credentials::new(
            Some(&access_key),
            Some(&secret_key),
            None, // security token
            None, // session token
            None, // profile
        )
        .map_err(|e| AppError::Storage(format!("R2 credentials error: {}", e)))?;

        let bucket = Bucket::new(&bucket_name, region, credentials)
            .map_err(|e| AppError::Storage(format!("R2 bucket error: {}", e)))?;

        Ok(Self {
            bucket,
            bucket_name,
        })
    }
}

#[tonic::async_trait]
impl StorageBackend for R2Backend {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> AppResult<String> {
        ensure_safe_key(key)?;
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| AppError::Storage(format!("R2 upload failed: {}", e)))?;
        if response.status_code() >= 300 {
            return Err(AppError::Storage(format!(
                "R2 upload failed: key={}, status={}",
                key,
                response.status_code()
            )));
        }

        tracing::info!("R2 upload: bucket={}, key={}", self.bucket_name, key);
        Ok(format!("r2://{}/{}", self.bucket_name, key))
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        ensure_safe_key(key)?;
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("R2 download failed: {}", e)))?;
        if response.status_code() != 200 {
            return Err(AppError::Storage(format!(
                "R2 download failed: key={}, status={}",
                key,
                response.status_code()
            )));
        }

        tracing::debug!(
            "R2 download: bucket={}, key={}, size={}",
            self.bucket_name,
            key,
            response.bytes().len()
        );
        Ok(response.bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        ensure_safe_key(key)?;
        let (_head, status) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("R2 head object failed: {}", e)))?;
        match status {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(AppError::Storage(format!(
                "R2 head object failed: key={}, status={}",
                key, other
            ))),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        ensure_safe_key(key)?;
        self.bucket
            .delete_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("R2 delete failed: {}", e)))?;

        tracing::info!("R2 delete: bucket={}, key={}", self.bucket_name, key);
        Ok(())
    }

    fn location(&self) -> &str {
        &self.bucket_name
    }
}
