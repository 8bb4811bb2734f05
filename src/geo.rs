use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

/// Best-effort location details for an alert. Empty strings mean unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country_text: String,
    pub isp_text: String,
}

// --- ipwho.is response ---

#[derive(Debug, Deserialize)]
struct IpWhoResponse {
    #[serde(default)]
    success: bool,
    country: Option<String>,
    country_code: Option<String>,
    org: Option<String>,
    connection: Option<Connection>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    isp: Option<String>,
    org: Option<String>,
    #[serde(default, deserialize_with = "asn_as_string")]
    asn: Option<String>,
}

/// ipwho.is sends the ASN as a number; tolerate strings, null and 0.
fn asn_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) if n.as_u64() != Some(0) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl From<IpWhoResponse> for GeoInfo {
    fn from(resp: IpWhoResponse) -> Self {
        let country_text = match (non_empty(resp.country), non_empty(resp.country_code)) {
            (Some(country), Some(code)) => format!("{} ({})", country, code),
            (Some(country), None) => country,
            _ => String::new(),
        };

        let (isp, conn_org, asn) = match resp.connection {
            Some(c) => (non_empty(c.isp), non_empty(c.org), c.asn),
            None => (None, None, None),
        };
        let org = conn_org.or_else(|| non_empty(resp.org));

        let mut parts = Vec::new();
        if let Some(isp) = &isp {
            parts.push(isp.clone());
        }
        if let Some(org) = org {
            if isp.as_deref() != Some(org.as_str()) {
                parts.push(org);
            }
        }
        if let Some(asn) = asn {
            parts.push(format!("AS{}", asn));
        }

        GeoInfo {
            country_text,
            isp_text: parts.join(" / "),
        }
    }
}

#[derive(Clone)]
pub struct GeoClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl GeoClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    fn lookup_url(&self, ip: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid geo base URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Geo base URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .push(ip);
        Ok(url)
    }

    async fn fetch(&self, ip: &str) -> Result<GeoInfo> {
        let url = self.lookup_url(ip)?;
        let resp = self.http.get(url).send().await.context("HTTP GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("geo lookup returned {}", status);
        }
        let body: IpWhoResponse = resp.json().await.context("Failed to parse geo response")?;
        if !body.success {
            bail!("geo lookup reported success=false");
        }
        Ok(body.into())
    }

    /// Look up `ip`, giving up after the configured deadline.
    /// Never fails: any problem yields an empty [`GeoInfo`].
    pub async fn lookup(&self, ip: &str) -> GeoInfo {
        match tokio::time::timeout(self.timeout, self.fetch(ip)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Geo lookup failed");
                GeoInfo::default()
            }
            Err(_) => {
                debug!(ip = %ip, timeout_ms = self.timeout.as_millis() as u64, "Geo lookup timed out");
                GeoInfo::default()
            }
        }
    }
}
