use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::model::BundleDescriptor;

pub const CATALOG_FILE: &str = "model-list.json";

const USER_AGENT: &str = concat!("vosk-service/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{url}: request failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url}: unexpected status {status}")]
    Status { url: String, status: u16 },
    #[error("{url}: read failed: {source}")]
    Read {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed catalog: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl CatalogError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Request { .. } | Self::Status { .. } | Self::Read { .. } => {
                "Could not reach the model catalog. Check your internet connection."
            }
            Self::Decode(_) => "The model catalog could not be read. Try again later.",
            Self::Client(_) => "Internal network error. Please restart the app.",
        }
    }
}

/// A streamed HTTP response body.
pub struct HttpBody {
    /// Declared `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Blocking HTTP GET, shared by the catalog fetch and the bundle download.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpBody, CatalogError>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            // Bundle bodies can take minutes; only the connect is bounded.
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| CatalogError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpBody, CatalogError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| CatalogError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(HttpBody {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}

pub struct CatalogClient {
    base_url: String,
    transport: Arc<dyn Transport>,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            transport,
        }
    }

    pub fn catalog_url(&self) -> String {
        format!("{}{CATALOG_FILE}", self.base_url)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn fetch(&self) -> Result<Vec<BundleDescriptor>, CatalogError> {
        let url = self.catalog_url();
        log::debug!("Fetching model catalog from {url}");

        let mut body = self.transport.get(&url)?;
        let mut raw = String::new();
        body.reader
            .read_to_string(&mut raw)
            .map_err(|source| CatalogError::Read {
                url: url.clone(),
                source,
            })?;

        let bundles: Vec<BundleDescriptor> = serde_json::from_str(&raw)?;
        log::info!("Catalog lists {} models", bundles.len());
        Ok(bundles)
    }

    /// Current, non-obsolete bundles of the given tier.
    pub fn fetch_available(&self, kind: &str) -> Result<Vec<BundleDescriptor>, CatalogError> {
        Ok(filter_available(self.fetch()?, kind))
    }
}

pub fn filter_available(bundles: Vec<BundleDescriptor>, kind: &str) -> Vec<BundleDescriptor> {
    bundles
        .into_iter()
        .filter(|bundle| !bundle.obsolete && bundle.kind == kind)
        .collect()
}

pub fn find_bundle<'a>(bundles: &'a [BundleDescriptor], name: &str) -> Option<&'a BundleDescriptor> {
    bundles.iter().find(|bundle| bundle.name == name)
}
