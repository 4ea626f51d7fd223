//! HTTPS transport over reqwest.

use crate::{BodyHandler, Transport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use vops_core::request::{Auth, HostRequest, HttpMethod};
use vops_core::result::HostResult;

/// TLS material for the HTTPS client.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM CA bundle used to verify the server.
    pub ca_cert_pem: Option<Vec<u8>>,
    /// PEM client certificate and PKCS#8 key, for certificate auth.
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub accept_invalid_certs: bool,
}

/// Transport that sends requests over HTTPS. One reqwest client is shared
/// across hosts; it keeps a keep-alive connection per host internally.
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(tls: &TlsOptions, default_timeout_secs: u64) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(default_timeout_secs))
            .danger_accept_invalid_certs(tls.accept_invalid_certs);

        if let Some(ca) = &tls.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(ca)
                .map_err(|e| TransportError::Client(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        match (&tls.client_cert_pem, &tls.client_key_pem) {
            (Some(cert), Some(key)) => {
                let identity = reqwest::Identity::from_pkcs8_pem(cert, key)
                    .map_err(|e| TransportError::Client(format!("invalid client identity: {e}")))?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(TransportError::Config(
                    "client certificate and key must be given together".into(),
                ))
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            default_timeout_secs,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, host: &str, request: &HostRequest, body: &BodyHandler) -> HostResult {
        let timeout_secs = request.timeout_secs.unwrap_or(self.default_timeout_secs);
        let url = match request.url(host) {
            Ok(u) => u,
            Err(e) => return HostResult::exception(host, e.to_string()),
        };

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url)
            .timeout(Duration::from_secs(timeout_secs));
        if let Auth::Password { username, password } = &request.auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(raw) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(raw.clone());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return classify_error(host, timeout_secs, &e),
        };

        let status = response.status();
        let code = status.as_u16();
        if !status.is_success() {
            return match response.text().await {
                Ok(text) => HostResult::failure(host, code, text),
                Err(e) => classify_error(host, timeout_secs, &e),
            };
        }

        match body {
            BodyHandler::Buffer => match response.text().await {
                Ok(text) => HostResult::success(host, code, text),
                Err(e) => classify_error(host, timeout_secs, &e),
            },
            BodyHandler::Download(path) => download(host, code, timeout_secs, response, path).await,
        }
    }
}

async fn download(
    host: &str,
    code: u16,
    timeout_secs: u64,
    response: reqwest::Response,
    path: &Path,
) -> HostResult {
    match write_stream(response.bytes_stream(), path).await {
        Ok(written) => {
            tracing::debug!("[HttpTransport] downloaded {written} bytes from {host} to {}", path.display());
            HostResult::success(host, code, String::new())
        }
        Err(DownloadError::Create(e)) => HostResult::exception(host, format!("cannot create {}: {e}", path.display())),
        Err(DownloadError::Fetch(e)) => classify_error(host, timeout_secs, &e),
        Err(DownloadError::Write(e)) => HostResult::exception(host, format!("write to {} failed: {e}", path.display())),
    }
}

enum DownloadError<E> {
    Create(std::io::Error),
    Fetch(E),
    Write(std::io::Error),
}

/// Stream `chunks` into a new file at `path`. A partial file is removed
/// when the stream or a write fails.
async fn write_stream<S, B, E>(chunks: S, path: &Path) -> Result<u64, DownloadError<E>>
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut file = tokio::fs::File::create(path).await.map_err(DownloadError::Create)?;
    let mut written = 0u64;
    let outcome = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(DownloadError::Fetch)?;
            file.write_all(chunk.as_ref()).await.map_err(DownloadError::Write)?;
            written += chunk.as_ref().len() as u64;
        }
        file.flush().await.map_err(DownloadError::Write)
    }
    .await;

    match outcome {
        Ok(()) => Ok(written),
        Err(e) => {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(path).await {
                tracing::warn!("[HttpTransport] cannot remove partial download {}: {rm}", path.display());
            }
            Err(e)
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn classify_error(host: &str, timeout_secs: u64, err: &reqwest::Error) -> HostResult {
    if err.is_timeout() {
        return HostResult::timeout(host, timeout_secs);
    }
    let message = error_chain(err);
    if is_eof_message(&message) {
        HostResult::eof(host, message)
    } else {
        HostResult::exception(host, message)
    }
}

/// Render an error with all of its sources, so causes such as
/// "Connection refused" stay visible to result classification.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

fn is_eof_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("unexpected eof")
        || lower.contains("unexpectedeof")
        || lower.contains("connection closed before message completed")
        || lower.contains("incomplete message")
}
