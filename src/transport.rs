//! # Transport
//!
//! Hands a finished payload to the TSDB. The flush path only sees the [Transport]
//! trait; [connect] picks the implementation from the URL scheme.
//!
//! * `http://` and `https://` POST the payload (*requires the `http-client` feature*)
//! * `tcp://host:port` writes it to a raw socket

use crate::error::{Error, Result};
use crate::format::SendFormat;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use serde::Deserialize;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// What came back from the TSDB
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TransportResponse {
    /// Response reported by transports without a reply channel
    pub fn accepted() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }
}

/// Sends one finished buffer; retrying is up to the implementation
pub trait Transport: Send {
    fn send(&mut self, payload: Bytes) -> Result<TransportResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, payload: Bytes) -> Result<TransportResponse> {
        (**self).send(payload)
    }
}

/// How a response status is treated by the flush path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Rejected,
    /// Not a known answer of the put API, logged but counted as delivered
    Unexpected,
}

pub fn classify(status: StatusCode) -> Delivery {
    match status.as_u16() {
        200 | 204 | 301 => Delivery::Accepted,
        400 | 404 | 405 | 406 | 408 | 413 | 500 | 501 | 503 => Delivery::Rejected,
        _ => Delivery::Unexpected,
    }
}

/// Lowest TLS version the HTTP client will negotiate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(alias = "default")]
    Default,
    #[serde(rename = "TLSv1_0", alias = "TLSv1")]
    Tlsv1_0,
    #[serde(rename = "TLSv1_1")]
    Tlsv1_1,
    #[serde(rename = "TLSv1_2")]
    Tlsv1_2,
}

/// Connection parameters of a destination
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub verify_peer: bool,
    pub verify_host: bool,
    pub ca_cert: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_key_pass: Option<String>,
    pub tls_version: TlsVersion,
    pub timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            verify_peer: true,
            verify_host: true,
            ca_cert: None,
            ca_path: None,
            client_cert: None,
            client_key: None,
            client_key_pass: None,
            tls_version: TlsVersion::Default,
            timeout: None,
        }
    }
}

/// Builds the transport matching the URL scheme
pub fn connect(config: &TransportConfig, format: SendFormat) -> Result<Box<dyn Transport>> {
    let uri: Uri = config
        .url
        .parse()
        .map_err(|e| Error::Config(format!("invalid url {}: {e}", config.url)))?;

    match uri.scheme_str() {
        Some("tcp") => Ok(Box::new(SocketTransport::new(&uri, config.timeout)?)),
        #[cfg(feature = "http-client")]
        Some("http") | Some("https") => Ok(Box::new(http_client::HttpTransport::new(config, format)?)),
        scheme => {
            let _ = format;
            Err(Error::Config(format!("unsupported url scheme {scheme:?} in {}", config.url)))
        }
    }
}

/// Writes payloads to a TCP socket, reconnecting after a failed write
pub struct SocketTransport {
    addr: String,
    timeout: Option<Duration>,
    stream: Option<TcpStream>,
}

impl SocketTransport {
    pub fn new(uri: &Uri, timeout: Option<Duration>) -> Result<Self> {
        let authority = uri
            .authority()
            .filter(|a| a.port_u16().is_some())
            .ok_or_else(|| Error::Config(format!("{uri} needs a host and a port")))?;

        Ok(Self {
            addr: authority.as_str().to_string(),
            timeout,
            stream: None,
        })
    }

    fn open(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
        let peers = addr
            .to_socket_addrs()
            .map_err(|e| Error::Transport(format!("failed to resolve {addr}: {e}")))?;

        let mut last_error = None;
        for peer in peers {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&peer, timeout),
                None => TcpStream::connect(peer),
            };
            match attempt {
                Ok(stream) => {
                    stream
                        .set_write_timeout(timeout)
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    debug!(%peer, "connected");
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Transport(match last_error {
            Some(e) => format!("failed to connect to {addr}: {e}"),
            None => format!("{addr} resolved to no address"),
        }))
    }
}

impl Transport for SocketTransport {
    fn send(&mut self, payload: Bytes) -> Result<TransportResponse> {
        let stream = match &mut self.stream {
            Some(stream) => stream,
            slot @ None => slot.insert(Self::open(&self.addr, self.timeout)?),
        };

        if let Err(e) = stream.write_all(&payload).and_then(|_| stream.flush()) {
            self.stream = None;
            return Err(Error::Transport(format!("write to {} failed: {e}", self.addr)));
        }
        Ok(TransportResponse::accepted())
    }
}

#[cfg(feature = "http-client")]
mod http_client {
    use super::*;
    use http::{header, HeaderValue};
    use reqwest::blocking::Client;
    use reqwest::redirect::Policy;
    use reqwest::{tls, Certificate, Identity};
    use std::fs;
    use std::path::Path;
    use tracing::warn;

    const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

    const MAX_REDIRECTS: usize = 50;

    /// POSTs payloads with a blocking reqwest client
    pub struct HttpTransport {
        client: Client,
        url: reqwest::Url,
        credentials: Option<(String, String)>,
    }

    impl HttpTransport {
        pub fn new(config: &TransportConfig, format: SendFormat) -> Result<Self> {
            let url = reqwest::Url::parse(&config.url)
                .map_err(|e| Error::Config(format!("invalid url {}: {e}", config.url)))?;

            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));

            let mut builder = Client::builder()
                .user_agent(USER_AGENT)
                .default_headers(headers)
                .redirect(Policy::limited(MAX_REDIRECTS))
                .danger_accept_invalid_certs(!config.verify_peer)
                .danger_accept_invalid_hostnames(!config.verify_host);

            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match config.tls_version {
                TlsVersion::Default => builder,
                TlsVersion::Tlsv1_0 => builder.min_tls_version(tls::Version::TLS_1_0),
                TlsVersion::Tlsv1_1 => builder.min_tls_version(tls::Version::TLS_1_1),
                TlsVersion::Tlsv1_2 => builder.min_tls_version(tls::Version::TLS_1_2),
            };

            if let Some(path) = &config.ca_cert {
                builder = builder.add_root_certificate(read_certificate(path)?);
            }
            if let Some(dir) = &config.ca_path {
                for certificate in read_certificate_dir(dir)? {
                    builder = builder.add_root_certificate(certificate);
                }
            }
            if let Some(identity) = read_identity(config)? {
                builder = builder.identity(identity);
            }

            let client = builder
                .build()
                .map_err(|e| Error::Config(format!("unable to build http client: {e}")))?;

            // A password without a user is ignored
            let credentials = config
                .user
                .clone()
                .map(|user| (user, config.password.clone().unwrap_or_default()));

            Ok(Self {
                client,
                url,
                credentials,
            })
        }
    }

    impl Transport for HttpTransport {
        fn send(&mut self, payload: Bytes) -> Result<TransportResponse> {
            let mut request = self.client.post(self.url.clone()).body(payload);
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, Some(password));
            }

            let response = request
                .send()
                .map_err(|e| Error::Transport(format!("POST {} failed: {e}", self.url)))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().unwrap_or_default();

            Ok(TransportResponse { status, headers, body })
        }
    }

    fn read_certificate(path: &Path) -> Result<Certificate> {
        let pem = fs::read(path).map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))?;
        Certificate::from_pem(&pem).map_err(|e| Error::Config(format!("invalid certificate {}: {e}", path.display())))
    }

    /// Every readable certificate in `dir`, other files are skipped
    fn read_certificate_dir(dir: &Path) -> Result<Vec<Certificate>> {
        let entries =
            fs::read_dir(dir).map_err(|e| Error::Config(format!("unable to read {}: {e}", dir.display())))?;

        let mut certificates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match read_certificate(&path) {
                Ok(certificate) => certificates.push(certificate),
                Err(e) => warn!("skipping CA path entry: {e}"),
            }
        }
        Ok(certificates)
    }

    fn read_identity(config: &TransportConfig) -> Result<Option<Identity>> {
        let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) else {
            return Ok(None);
        };
        if config.client_key_pass.is_some() {
            return Err(Error::Config("encrypted client keys are not supported".into()));
        }

        let cert = fs::read(cert).map_err(|e| Error::Config(format!("unable to read {}: {e}", cert.display())))?;
        let key = fs::read(key).map_err(|e| Error::Config(format!("unable to read {}: {e}", key.display())))?;
        Identity::from_pkcs8_pem(&cert, &key)
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid client certificate: {e}")))
    }
}

#[cfg(feature = "http-client")]
pub use http_client::HttpTransport;
