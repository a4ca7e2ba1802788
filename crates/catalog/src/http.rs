//! [`CatalogClient`] over HTTP.

use crate::error::{ErrorKind, Result};
use crate::models::{BundleStatus, BundleTicket, BundleTicketWire};
use crate::{BundleDownload, CatalogClient};
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize)]
struct BundleRequest<'a> {
    books: &'a [String],
}

#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base: Url,
    schema_version: String,
}

impl HttpCatalog {
    /// Client for the server at `base_url`, reading exports of
    /// `schema_version`.
    pub fn new(base_url: &str, schema_version: impl Into<String>) -> Result<Self> {
        let mut base = Url::parse(base_url).or_raise(|| ErrorKind::InvalidUrl(base_url.to_string()))?;
        if !base.path().ends_with('/') {
            // Without the trailing slash `Url::join` replaces the last segment.
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Network)?;
        Ok(Self { client, base, schema_version: schema_version.into() })
    }

    fn resolve(&self, location: &str) -> Result<Url> {
        self.base.join(location).or_raise(|| ErrorKind::InvalidUrl(location.to_string()))
    }

    fn export_url(&self, name: &str) -> Result<Url> {
        self.resolve(&format!("static/ios-export/{}/{}", self.schema_version, name))
    }

    fn check_status(status: StatusCode) -> Result<()> {
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }
        exn::bail!(ErrorKind::Status(status.as_u16()))
    }
}

#[async_trait]
impl CatalogClient for HttpCatalog {
    #[instrument(skip(self))]
    async fn fetch_manifest(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.export_url(name)?;
        let response = self.client.get(url).send().await.or_raise(|| ErrorKind::Network)?;
        Self::check_status(response.status())?;
        let body = response.bytes().await.or_raise(|| ErrorKind::Network)?;
        Ok(body.to_vec())
    }

    #[instrument(skip(self, titles), fields(titles = titles.len()))]
    async fn request_bundle(&self, titles: &[String]) -> Result<BundleStatus> {
        let url = self.resolve("makeBundle")?;
        let response = self
            .client
            .post(url)
            .query(&[("schema_version", self.schema_version.as_str())])
            .json(&BundleRequest { books: titles })
            .send()
            .await
            .or_raise(|| ErrorKind::Network)?;
        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(BundleStatus::Preparing);
        }
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        let wire: BundleTicketWire = response.json().await.or_raise(|| ErrorKind::InvalidResponse)?;
        let download_size = wire.download_size;
        let urls = wire
            .locations()
            .iter()
            .map(|location| self.resolve(location).map(String::from))
            .collect::<Result<Vec<_>>>()?;
        if urls.is_empty() {
            exn::bail!(ErrorKind::InvalidResponse);
        }
        Ok(BundleStatus::Ready(BundleTicket { urls, download_size }))
    }

    #[instrument(skip(self))]
    async fn open_bundle(&self, url: &str) -> Result<BundleDownload> {
        let url = self.resolve(url)?;
        let response = self.client.get(url).send().await.or_raise(|| ErrorKind::Network)?;
        Self::check_status(response.status())?;
        let total = response.content_length();
        let body = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()).or_raise(|| ErrorKind::Network));
        Ok(BundleDownload { total, body: Box::pin(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://example.org", "https://example.org/static/ios-export/7/packages.json")]
    #[case("https://example.org/mirror", "https://example.org/mirror/static/ios-export/7/packages.json")]
    #[case("https://example.org/mirror/", "https://example.org/mirror/static/ios-export/7/packages.json")]
    fn test_export_url(#[case] base: &str, #[case] expected: &str) {
        let catalog = HttpCatalog::new(base, "7").unwrap();
        assert_eq!(catalog.export_url("packages.json").unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("bundles/abc.zip", "https://example.org/bundles/abc.zip")]
    #[case("https://cdn.example.org/abc.zip", "https://cdn.example.org/abc.zip")]
    fn test_resolve_bundle_location(#[case] location: &str, #[case] expected: &str) {
        let catalog = HttpCatalog::new("https://example.org", "7").unwrap();
        assert_eq!(catalog.resolve(location).unwrap().as_str(), expected);
    }

    #[test]
    fn test_invalid_base() {
        let err = HttpCatalog::new("not a url", "7").err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[rstest]
    #[case(200, true)]
    #[case(304, true)]
    #[case(404, false)]
    #[case(502, false)]
    fn test_check_status(#[case] code: u16, #[case] ok: bool) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(HttpCatalog::check_status(status).is_ok(), ok);
    }
}
