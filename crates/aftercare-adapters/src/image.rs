//! Resolves customer image references into bytes for the analysis service.
//!
//! Only two kinds of reference are accepted: inline `data:` URLs and http(s)
//! URLs on a configured upload host. Both are capped at `max_bytes`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;

use aftercare_core::types::ImageRef;

use crate::error::ServiceError;

/// Default cap on a decoded or downloaded image.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

enum Source<'a> {
    Inline(&'a str),
    Remote(Url),
}

#[derive(Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
    max_bytes: usize,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(reqwest::Client::default(), Vec::new(), DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl ImageLoader {
    pub fn new(client: reqwest::Client, allowed_hosts: Vec<String>, max_bytes: usize) -> Self {
        Self {
            client,
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            max_bytes,
        }
    }

    /// Reject references that could never be loaded, without doing any I/O.
    pub fn check(&self, image: &ImageRef) -> Result<(), ServiceError> {
        self.classify(image).map(|_| ())
    }

    pub async fn load(&self, image: &ImageRef) -> Result<Vec<u8>, ServiceError> {
        match self.classify(image)? {
            Source::Inline(data) => self.decode_data_url(data),
            Source::Remote(url) => self.download(url).await,
        }
    }

    fn classify<'a>(&self, image: &'a ImageRef) -> Result<Source<'a>, ServiceError> {
        let reference = image.as_str().trim();
        if reference.is_empty() {
            return Err(ServiceError::Unprocessable("Empty image reference".into()));
        }
        if let Some(data) = reference.strip_prefix("data:") {
            return Ok(Source::Inline(data));
        }

        let url = Url::parse(reference).map_err(|_| {
            ServiceError::Unprocessable("Image must be a data URL or an upload link".into())
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ServiceError::Unprocessable(format!(
                "Unsupported image scheme: {}",
                url.scheme()
            )));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.allowed_hosts.iter().any(|allowed| *allowed == host) {
            return Err(ServiceError::Unprocessable(format!(
                "Images from {} are not accepted",
                host
            )));
        }
        Ok(Source::Remote(url))
    }

    fn too_large(&self) -> ServiceError {
        ServiceError::Unprocessable(format!("Image exceeds {} bytes", self.max_bytes))
    }

    /// Decode the part of a data URL after `data:`, e.g. `image/png;base64,iVBOR...`.
    fn decode_data_url(&self, data: &str) -> Result<Vec<u8>, ServiceError> {
        let (meta, payload) = data
            .split_once(',')
            .ok_or_else(|| ServiceError::Unprocessable("Malformed data URL".into()))?;
        let payload = payload.trim();
        if !meta.ends_with(";base64") {
            if payload.len() > self.max_bytes {
                return Err(self.too_large());
            }
            return Ok(payload.as_bytes().to_vec());
        }
        // Base64 grows 4/3; refuse obvious overruns before decoding.
        if payload.len() / 4 * 3 > self.max_bytes + 3 {
            return Err(self.too_large());
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ServiceError::Unprocessable(format!("Invalid base64 image: {}", e)))?;
        if bytes.len() > self.max_bytes {
            return Err(self.too_large());
        }
        Ok(bytes)
    }

    async fn download(&self, url: Url) -> Result<Vec<u8>, ServiceError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(self.too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader_for(server: &MockServer, max_bytes: usize) -> ImageLoader {
        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        ImageLoader::new(reqwest::Client::new(), vec![host], max_bytes)
    }

    #[tokio::test]
    async fn test_load_base64_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG fake");
        let image = ImageRef(format!("data:image/png;base64,{}", encoded));
        let bytes = ImageLoader::default().load(&image).await.unwrap();
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_load_invalid_base64() {
        let image = ImageRef("data:image/png;base64,@@@".into());
        let err = ImageLoader::default().load(&image).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)));
    }

    #[tokio::test]
    async fn test_local_paths_are_rejected() {
        let loader = ImageLoader::default();
        for reference in ["/etc/passwd", "file:///etc/passwd", "../secrets.png"] {
            let image = ImageRef(reference.into());
            assert!(loader.check(&image).is_err(), "{} accepted", reference);
            let err = loader.load(&image).await.unwrap_err();
            assert!(matches!(err, ServiceError::Unprocessable(_)));
        }
    }

    #[tokio::test]
    async fn test_unlisted_host_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let loader = ImageLoader::new(
            reqwest::Client::new(),
            vec!["uploads.example.com".into()],
            DEFAULT_MAX_IMAGE_BYTES,
        );
        let image = ImageRef(format!("{}/photo.jpg", server.uri()));
        let err = loader.load(&image).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)));
    }

    #[tokio::test]
    async fn test_download_from_allowed_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;

        let image = ImageRef(format!("{}/photo.jpg", server.uri()));
        let bytes = loader_for(&server, 1024).load(&image).await.unwrap();
        assert_eq!(bytes, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_oversized_download_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let image = ImageRef(format!("{}/big.jpg", server.uri()));
        let err = loader_for(&server, 1024).load(&image).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(msg) if msg.contains("1024")));
    }

    #[tokio::test]
    async fn test_oversized_data_url_is_refused() {
        let loader = ImageLoader::new(reqwest::Client::new(), Vec::new(), 16);
        let encoded = STANDARD.encode([7u8; 64]);
        let image = ImageRef(format!("data:image/png;base64,{}", encoded));
        assert!(loader.load(&image).await.is_err());

        let small = ImageRef(format!("data:image/png;base64,{}", STANDARD.encode([7u8; 16])));
        assert_eq!(loader.load(&small).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_empty_reference() {
        let err = ImageLoader::default().load(&ImageRef(String::new())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)));
    }
}
