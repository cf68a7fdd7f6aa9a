use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// Country used whenever a lookup fails or resolves to nothing.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

const USER_AGENT: &str = concat!("pinboard/", env!("CARGO_PKG_VERSION"));

/// Resolves a coordinate to a human-readable country name. The board masks
/// every failure with [`UNKNOWN_COUNTRY`]; implementations just report them.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn country_at(&self, lat: f64, lng: f64) -> Result<String>;
}

/// Nominatim-style `GET {base}/reverse?lat={lat}&lon={lng}&format=json`
/// lookup, consumed at `address.country`.
pub struct NominatimGeocoder {
    http: Client,
    base_url: Url,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<ReverseAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    #[serde(default)]
    country: Option<String>,
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn country_at(&self, lat: f64, lng: f64) -> Result<String> {
        let url = self.base_url.join("reverse")?;
        let response: ReverseResponse = self
            .http
            .get(url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .address
            .and_then(|address| address.country)
            .filter(|country| !country.trim().is_empty())
            .ok_or_else(|| anyhow!("reverse geocode response has no address.country"))
    }
}
