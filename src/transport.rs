use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, Identity, Proxy};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::ApiConfig;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Request error: {0}")]
    Request(String),
    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_request() {
            TransportError::Request(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// What came back for one POST. `elapsed` covers send until the response
/// headers arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct PostResponse {
    pub status: u16,
    pub status_line: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl PostResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait EventPoster: Send + Sync {
    /// POST one serialized event leg.
    async fn post(&self, body: Vec<u8>) -> Result<PostResponse, TransportError>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// Mutual-TLS client for the event API. Built once, reused for every leg.
pub struct HttpsPoster {
    client: Client,
    url: Url,
}

impl HttpsPoster {
    pub fn new(cfg: &ApiConfig) -> Result<Self, TransportError> {
        let url = Url::parse(&cfg.url).map_err(|e| TransportError::Request(format!("url '{}': {}", cfg.url, e)))?;

        let identity = load_identity(&cfg.cert_path(), &cfg.key_path())?;
        let roots = load_trust_bundle(&cfg.ca_path())?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(cfg.accept_invalid_certs);
        for cert in roots {
            builder = builder.add_root_certificate(cert);
        }

        if let Some(secs) = cfg.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(proxy) = &cfg.proxy_url {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Tls(format!("client construction: {}", e)))?;

        info!(
            url = %url,
            accept_invalid_certs = cfg.accept_invalid_certs,
            proxy = cfg.proxy_url.as_deref().unwrap_or("none"),
            "mTLS client ready"
        );
        Ok(Self { client, url })
    }
}

/// Client certificate chain plus its private key. The key may be PKCS#8
/// (`BEGIN PRIVATE KEY`), PKCS#1 (`BEGIN RSA PRIVATE KEY`) or SEC1
/// (`BEGIN EC PRIVATE KEY`).
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<Identity, TransportError> {
    let mut pem = read_pem(cert_path)?;
    pem.push(b'\n');
    pem.extend(read_pem(key_path)?);
    Identity::from_pem(&pem).map_err(|e| {
        TransportError::Tls(format!(
            "client identity {} / {}: {}",
            cert_path.display(),
            key_path.display(),
            e
        ))
    })
}

/// Every certificate in the file is trusted, not just the first.
pub fn load_trust_bundle(path: &Path) -> Result<Vec<Certificate>, TransportError> {
    let certs = Certificate::from_pem_bundle(&read_pem(path)?)
        .map_err(|e| TransportError::Tls(format!("trust bundle {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "trust bundle {}: no certificates",
            path.display()
        )));
    }
    debug!(bundle = %path.display(), certificates = certs.len(), "Trust bundle loaded");
    Ok(certs)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|source| TransportError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl EventPoster for HttpsPoster {
    async fn post(&self, body: Vec<u8>) -> Result<PostResponse, TransportError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        let elapsed = start.elapsed();

        let status = resp.status();
        let status_line = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in resp.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = resp.bytes().await?.to_vec();
        debug!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "POST complete");

        Ok(PostResponse {
            status: status.as_u16(),
            status_line,
            headers,
            body,
            elapsed,
        })
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}
