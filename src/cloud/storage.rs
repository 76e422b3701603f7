//! Template upload bucket selection.
//!
//! Templates above the inline size limit are uploaded to object storage and
//! submitted by URL. The bucket is the configured one when it exists, else
//! the account's default CloudFormation bucket for the region
//! (`cf-templates-<suffix>-<region>`).

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use super::ObjectStorage;
use crate::defaults::DEFAULT_BUCKET_PREFIX;
use crate::error::{Error, Result};

/// Picks the bucket templates are uploaded to in `region`.
pub fn select_upload_bucket(
    storage: &dyn ObjectStorage,
    configured: Option<&str>,
    region: &str,
) -> Result<Option<String>> {
    let buckets = storage
        .list_buckets()
        .map_err(|e| e.into_error("ListBuckets"))?;

    if let Some(name) = configured {
        if buckets.iter().any(|b| b == name) {
            info!("Using configured upload bucket {}", name);
            return Ok(Some(name.to_string()));
        }
        warn!("Configured upload bucket {} was not found in the account", name);
    }

    let default = buckets
        .into_iter()
        .find(|b| b.starts_with(DEFAULT_BUCKET_PREFIX) && b.ends_with(region));
    if default.is_none() {
        warn!("Unable to find a default CloudFormation bucket in {}", region);
        warn!("Templates larger than the inline limit will fail to deploy");
        warn!("Create a bucket for CloudFormation templates or set cloudformation_upload_bucket_name");
    }
    Ok(default)
}

/// URL the orchestration service fetches an uploaded template from.
pub fn template_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Uploads templates to the selected bucket of one region.
#[derive(Clone)]
pub struct TemplateUploader {
    storage: Arc<dyn ObjectStorage>,
    bucket: Option<String>,
}

impl TemplateUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: Option<String>) -> Self {
        Self { storage, bucket }
    }

    /// Selects the bucket for `region` and builds an uploader.
    pub fn for_region(storage: Arc<dyn ObjectStorage>, configured: Option<&str>, region: &str) -> Result<Self> {
        let bucket = select_upload_bucket(storage.as_ref(), configured, region)?;
        Ok(Self::new(storage, bucket))
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Uploads `path` under its file name and returns the template URL.
    pub fn upload(&self, path: &Path) -> Result<String> {
        let bucket = self.bucket.as_deref().ok_or_else(|| Error::Service {
            operation: "PutObject".to_string(),
            code: "NoUploadBucket".to_string(),
            message: format!("No bucket available to upload {}", path.display()),
        })?;
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::config(format!("Invalid template file name: {}", path.display())))?;
        let version = self
            .storage
            .upload_file(bucket, key, path)
            .map_err(|e| e.into_error("PutObject"))?;
        match version {
            Some(version) => info!("Uploaded {} to {} (version {})", key, bucket, version),
            None => info!("Uploaded {} to {}", key, bucket),
        }
        Ok(template_url(bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStorage;

    #[test]
    fn test_configured_bucket_wins() {
        let storage = FakeStorage::new(&["mine", "cf-templates-abc-us-east-1"]);
        assert_eq!(
            select_upload_bucket(&storage, Some("mine"), "us-east-1").unwrap(),
            Some("mine".to_string())
        );
    }

    #[test]
    fn test_default_bucket_for_region() {
        let storage = FakeStorage::new(&["cf-templates-abc-eu-west-1", "cf-templates-abc-us-east-1"]);
        assert_eq!(
            select_upload_bucket(&storage, Some("absent"), "us-east-1").unwrap(),
            Some("cf-templates-abc-us-east-1".to_string())
        );
    }

    #[test]
    fn test_no_bucket_warns() {
        testing_logger::setup();
        let storage = FakeStorage::new(&["unrelated"]);
        assert_eq!(select_upload_bucket(&storage, None, "us-east-1").unwrap(), None);
        testing_logger::validate(|captured| {
            assert_eq!(captured.iter().filter(|l| l.level == log::Level::Warn).count(), 3);
        });
    }

    #[test]
    fn test_upload_returns_url() {
        let storage = Arc::new(FakeStorage::new(&["cf-templates-abc-us-east-1"]));
        let uploader = TemplateUploader::for_region(storage.clone(), None, "us-east-1").unwrap();
        let url = uploader.upload(Path::new("/repo/deployments/big.yaml")).unwrap();
        assert_eq!(url, "https://cf-templates-abc-us-east-1.s3.amazonaws.com/big.yaml");
        assert_eq!(
            storage.uploads(),
            vec![("cf-templates-abc-us-east-1".to_string(), "big.yaml".to_string())]
        );
    }

    #[test]
    fn test_upload_without_bucket_is_error() {
        let uploader = TemplateUploader::new(Arc::new(FakeStorage::new(&[])), None);
        let err = uploader.upload(Path::new("big.yaml")).unwrap_err();
        assert!(err.to_string().contains("NoUploadBucket"));
    }
}
