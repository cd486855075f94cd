use super::destination::{self, Connector, Destination};
use crate::buffer::{DEFAULT_CAPACITY, MIN_CAPACITY};
use crate::error::{Error, Result};
use crate::format::{DataFormat, EncoderConfig, SendFormat};
use crate::record::{RateSource, Tag, MAX_TAGS};
use crate::sanitize::{replacement_char, DEFAULT_REPLACEMENT};
use crate::transport::{self, TlsVersion, Transport, TransportConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a TSDB [Destination]
///
/// # Example
/// ```
///  let destination = metrics_tsdb_writer::Builder::new()
///      .name("opentsdb")
///      .url("http://localhost:4242/api/put")
///      .with_tag("dc", "lga")
///      .init()
///      .unwrap();
/// ```
pub struct Builder {
    name: Option<String>,
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    verify_peer: bool,
    verify_host: bool,
    ca_cert: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    client_key_pass: Option<String>,
    tls_version: TlsVersion,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    send_format: SendFormat,
    data_format: DataFormat,
    store_rates: bool,
    append_data_type: bool,
    replace_char: Option<String>,
    prefix: Option<String>,
    tags: Vec<Tag>,
    rates: Option<Arc<dyn RateSource>>,
    transport: Option<Box<dyn Transport>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            name: None,
            url: None,
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
            buffer_size: None,
            send_format: Default::default(),
            data_format: Default::default(),
            store_rates: false,
            append_data_type: false,
            replace_char: None,
            prefix: None,
            tags: Vec::new(),
            rates: None,
            transport: None,
        }
    }

    /// Name used in logs and telemetry labels, defaults to the URL
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Endpoint receiving the payloads: `http(s)://` for the put API, `tcp://host:port`
    /// for a raw socket
    /// * Must be set or init() will return Err(Config("url missing")) unless a
    ///   transport is supplied with [Builder::with_transport]
    pub fn url(self, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..self
        }
    }

    /// HTTP basic auth; a password without a user is ignored
    pub fn credentials(self, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
            ..self
        }
    }

    pub fn verify_peer(self, verify_peer: bool) -> Self {
        Self { verify_peer, ..self }
    }

    pub fn verify_host(self, verify_host: bool) -> Self {
        Self { verify_host, ..self }
    }

    /// PEM file with an additional trusted CA
    pub fn ca_cert(self, path: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert: Some(path.into()),
            ..self
        }
    }

    /// Directory of PEM files with additional trusted CAs
    pub fn ca_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            ca_path: Some(path.into()),
            ..self
        }
    }

    /// Client certificate and its unencrypted PKCS#8 key, both PEM
    pub fn client_cert(self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            client_cert: Some(cert.into()),
            client_key: Some(key.into()),
            ..self
        }
    }

    /// Passphrase of the client key
    /// * Encrypted keys are not supported, connecting will fail
    pub fn client_key_pass(self, pass: impl Into<String>) -> Self {
        Self {
            client_key_pass: Some(pass.into()),
            ..self
        }
    }

    pub fn tls_version(self, tls_version: TlsVersion) -> Self {
        Self { tls_version, ..self }
    }

    /// Upper bound for one transport call
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Send buffer capacity in bytes
    /// * Defaults to 4096, anything below 1024 is refused by init()
    pub fn buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: Some(buffer_size),
            ..self
        }
    }

    pub fn send_format(self, send_format: SendFormat) -> Self {
        Self { send_format, ..self }
    }

    pub fn data_format(self, data_format: DataFormat) -> Self {
        Self { data_format, ..self }
    }

    /// Replace non-finite gauges (JSON) or non-gauge values (PUT) by rates taken from
    /// the source given to [Builder::with_rate_source]
    pub fn store_rates(self, store_rates: bool) -> Self {
        Self { store_rates, ..self }
    }

    /// Always add the data source type to metric names and tags
    pub fn append_data_type(self, append_data_type: bool) -> Self {
        Self {
            append_data_type,
            ..self
        }
    }

    /// Single character substituted for characters the TSDB refuses
    /// * Must be exactly one allowed character or init() will return an error
    pub fn replace_char(self, replace_char: impl Into<String>) -> Self {
        Self {
            replace_char: Some(replace_char.into()),
            ..self
        }
    }

    /// Prefix for every metric name, overridden per sample by the `prefix` metadata
    pub fn prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self
        }
    }

    /// Adds a static tag (name, value) sent with every data point
    /// * This method can be called multiple times with distinct names
    /// * Records can have no more than 32 tags, static ones included
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn with_rate_source(self, rates: impl RateSource + 'static) -> Self {
        Self {
            rates: Some(Arc::new(rates)),
            ..self
        }
    }

    /// Sends through `transport` instead of one built from the URL
    pub fn with_transport(self, transport: impl Transport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            ..self
        }
    }

    /// Private helper for consuming the builder into destination configuration
    fn build(self) -> Result<(destination::Config, Connector)> {
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_CAPACITY);
        if buffer_size < MIN_CAPACITY {
            return Err(Error::Config(format!(
                "buffer size {buffer_size} is smaller than {MIN_CAPACITY}"
            )));
        }

        let replace_char = match &self.replace_char {
            None => DEFAULT_REPLACEMENT,
            Some(c) => replacement_char(c)
                .ok_or_else(|| Error::Config(format!("replace char {c:?} must be one allowed character")))?,
        };

        // One slot is always taken by the host tag
        if self.tags.len() >= MAX_TAGS {
            return Err(Error::Config(format!(
                "{} static tags, at most {} are supported",
                self.tags.len(),
                MAX_TAGS - 1
            )));
        }
        if let Some(tag) = self.tags.iter().find(|tag| tag.name.is_empty()) {
            return Err(Error::Config(format!("static tag with value {:?} has no name", tag.value)));
        }

        let connector: Connector = match (self.transport, &self.url) {
            (Some(transport), _) => {
                let mut transport = Some(transport);
                Box::new(move || {
                    transport
                        .take()
                        .ok_or_else(|| Error::Transport("transport already handed out".into()))
                })
            }
            (None, Some(url)) => {
                let config = TransportConfig {
                    url: url.clone(),
                    user: self.user,
                    password: self.password,
                    verify_peer: self.verify_peer,
                    verify_host: self.verify_host,
                    ca_cert: self.ca_cert,
                    ca_path: self.ca_path,
                    client_cert: self.client_cert,
                    client_key: self.client_key,
                    client_key_pass: self.client_key_pass,
                    tls_version: self.tls_version,
                    timeout: self.timeout,
                };
                let send_format = self.send_format;
                Box::new(move || transport::connect(&config, send_format))
            }
            (None, None) => return Err(Error::Config("url missing".into())),
        };

        let mut encoder = EncoderConfig::new(self.send_format, self.data_format);
        encoder.store_rates = self.store_rates;
        encoder.append_data_type = self.append_data_type;
        encoder.replace_char = replace_char;
        encoder.prefix = self.prefix;
        encoder.static_tags = self.tags;
        if let Some(rates) = self.rates {
            encoder.rates = rates;
        }

        let name = self.name.or(self.url).unwrap_or_else(|| "tsdb".into());
        Ok((
            destination::Config {
                name,
                buffer_size,
                encoder,
            },
            connector,
        ))
    }

    /// Validates the configuration and allocates the send buffer
    ///
    /// The transport is only opened on the first write or flush.
    pub fn init(self) -> Result<Destination> {
        let (config, connector) = self.build()?;
        Ok(Destination::new(config, connector))
    }
}

/// Destination settings as read from a configuration file
///
/// ```
/// let config: metrics_tsdb_writer::DestinationConfig = serde_json::from_str(r#"{
///     "name": "opentsdb",
///     "url": "http://localhost:4242/api/put",
///     "send_format": "json",
///     "data_format": "tagged",
///     "tags": [{"name": "dc", "value": "lga"}]
/// }"#).unwrap();
/// let destination = metrics_tsdb_writer::Builder::from(config).init().unwrap();
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "enabled")]
    pub verify_peer: bool,
    #[serde(default = "enabled")]
    pub verify_host: bool,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub client_key_pass: Option<String>,
    #[serde(default)]
    pub tls_version: TlsVersion,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub send_format: SendFormat,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub store_rates: bool,
    #[serde(default)]
    pub append_data_type: bool,
    #[serde(default)]
    pub replace_char: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

fn enabled() -> bool {
    true
}

impl From<DestinationConfig> for Builder {
    fn from(config: DestinationConfig) -> Self {
        let mut builder = Builder::new()
            .url(config.url)
            .verify_peer(config.verify_peer)
            .verify_host(config.verify_host)
            .tls_version(config.tls_version)
            .send_format(config.send_format)
            .data_format(config.data_format)
            .store_rates(config.store_rates)
            .append_data_type(config.append_data_type);

        builder.name = config.name;
        builder.user = config.user;
        builder.password = config.password;
        builder.ca_cert = config.ca_cert;
        builder.ca_path = config.ca_path;
        builder.client_cert = config.client_cert;
        builder.client_key = config.client_key;
        builder.client_key_pass = config.client_key_pass;
        builder.timeout = config.timeout_ms.map(Duration::from_millis);
        builder.buffer_size = config.buffer_size;
        builder.replace_char = config.replace_char;
        builder.prefix = config.prefix;
        builder.tags = config.tags;
        builder
    }
}
