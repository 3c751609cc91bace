// pgarchive/src/storage/s3_upload.rs
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use tokio::io::AsyncReadExt;

use super::ObjectStore;
use crate::config::S3Config;

/// Smallest multipart part; also the threshold below which a single
/// PutObject is used.
pub const MULTIPART_CHUNK_SIZE: usize = 5 * 1024 * 1024;
/// S3 rejects multipart uploads with more parts than this.
pub const MAX_PARTS: u64 = 10_000;
const MIB: u64 = 1024 * 1024;

/// Part size for a `size`-byte object: at least 5 MiB, large enough to stay
/// within `MAX_PARTS`, rounded up to a whole MiB.
pub fn part_size(size: u64) -> usize {
    let needed = size.div_ceil(MAX_PARTS).div_ceil(MIB) * MIB;
    needed.max(MULTIPART_CHUNK_SIZE as u64) as usize
}

/// Primary backend: an S3-compatible bucket with no practical object ceiling.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    name: String,
}

impl S3Store {
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        log::info!("Open bucket: [{}]", config.bucket_name);
        Self {
            client: s3::Client::new(&sdk_config),
            bucket: config.bucket_name.clone(),
            name: format!("s3://{}", config.bucket_name),
        }
    }

    async fn put_single(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::Private)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {} to bucket {} with key {}", path.display(), self.bucket, key))?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, path: &Path, size: u64) -> Result<()> {
        let part = part_size(size);
        log::info!("Multipart upload of {} bytes in {} byte parts", size, part);
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .with_context(|| format!("Failed to start multipart upload for {}", key))?;
        let upload_id = created
            .upload_id()
            .context("Multipart upload response carried no upload id")?
            .to_string();

        match self.upload_parts(key, path, &upload_id, part).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                    .send()
                    .await
                    .with_context(|| format!("Failed to complete multipart upload for {}", key))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    log::warn!("⚠️ Could not abort multipart upload {}: {}", upload_id, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, key: &str, path: &Path, upload_id: &str, part_size: usize) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open artifact {}", path.display()))?;
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let chunk = read_chunk(&mut file, part_size)
                .await
                .with_context(|| format!("Failed to read artifact {}", path.display()))?;
            if chunk.is_empty() {
                break;
            }
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {} of {}", part_number, key))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
        }
        Ok(parts)
    }
}

/// Fills up to `size` bytes, stopping early only at end of file.
async fn read_chunk<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, size: usize) -> std::io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size);
    reader.take(size as u64).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat artifact {}", path.display()))?
            .len();
        if size <= MULTIPART_CHUNK_SIZE as u64 {
            self.put_single(key, path).await
        } else {
            self.put_multipart(key, path, size).await
        }
    }
}
