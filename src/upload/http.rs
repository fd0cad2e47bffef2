//! Multipart HTTP upload over `reqwest`.

use super::transport::{check_files, truncate_body};
use super::{TransportError, UploadConfig, UploadJob, UploadMetadata, UploadTransport};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 400;

/// POSTs `job_id`, `grade`, `metadata`, `front` and `back` as one
/// multipart form.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpUploader {
    /// Builds the client. With `pinned_cert` set, only that certificate
    /// is trusted.
    pub fn new(config: &UploadConfig) -> Result<Self, TransportError> {
        if config.url.is_empty() {
            return Err(TransportError::Build("upload url is empty".into()));
        }

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(path) = &config.pinned_cert {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TransportError::Build(format!("bad certificate {}: {e}", path.display())))?;
            builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
            tracing::info!(cert = %path.display(), "Upload client pinned");
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn form(job: &UploadJob) -> Result<Form, TransportError> {
        let metadata = serde_json::to_string(&UploadMetadata::from(job))
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let jpeg = |path: &std::path::Path| -> Result<Part, TransportError> {
            Part::file(path)?
                .mime_str("image/jpeg")
                .map_err(|e| TransportError::Request(e.to_string()))
        };

        Ok(Form::new()
            .text("job_id", job.id.to_string())
            .text("grade", job.grade.code().to_string())
            .part(
                "metadata",
                Part::text(metadata)
                    .mime_str("application/json")
                    .map_err(|e| TransportError::Request(e.to_string()))?,
            )
            .part("front", jpeg(&job.front_path)?)
            .part("back", jpeg(&job.back_path)?))
    }
}

impl UploadTransport for HttpUploader {
    fn upload(&self, job: &UploadJob) -> Result<(), TransportError> {
        check_files(job)?;

        let mut request = self.client.post(&self.url).multipart(Self::form(job)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(job = job.id, status = status.as_u16(), "Upload accepted");
            return Ok(());
        }

        let body = response.text().unwrap_or_default();
        Err(TransportError::Http {
            status: status.as_u16(),
            body: truncate_body(&body, MAX_ERROR_BODY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_rejected() {
        let err = HttpUploader::new(&UploadConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Build(_)));
    }

    #[test]
    fn test_missing_pinned_cert() {
        let config = UploadConfig {
            url: "https://localhost:9/upload".into(),
            pinned_cert: Some("/definitely/not/here.pem".into()),
            ..UploadConfig::default()
        };
        assert!(matches!(HttpUploader::new(&config), Err(TransportError::Io(_))));
    }
}
