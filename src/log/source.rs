use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::Arc;

/// A single CT log server: its base URL (the stable identifier used for
/// cursors and page sizing) and the DER public key used to build its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    url: Arc<str>,
    public_key: Arc<[u8]>,
}

impl LogSource {
    /// Builds a source from an absolute `http://` or `https://` URL.
    ///
    /// The URL always ends with `/` so endpoint paths can be appended and so
    /// page-size patterns such as `oak.ct.letsencrypt.org/2021/` match.
    pub fn new(url: &str, public_key: impl Into<Vec<u8>>) -> Result<Self> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("log url '{url}' must start with http:// or https://");
        }

        let mut base = url.to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed =
            reqwest::Url::parse(&base).with_context(|| format!("invalid log url '{url}'"))?;
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            bail!("log url '{url}' has no host");
        }

        Ok(Self {
            url: Arc::from(base),
            public_key: Arc::from(public_key.into()),
        })
    }

    /// Base URL of the log, ending with `/`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Shared handle to the identifier, cheap to clone into every derived value.
    pub fn id(&self) -> Arc<str> {
        Arc::clone(&self.url)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
