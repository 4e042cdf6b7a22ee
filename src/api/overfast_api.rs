use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::database::types::{Division, GameMode, Region};
use crate::Error;

/// One readable resource of the OverFast API.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Heroes {
        locale: Option<String>,
    },
    HeroDetail {
        hero_key: String,
        locale: Option<String>,
    },
    HeroStats {
        platform: String,
        gamemode: GameMode,
        region: Region,
        division: Option<Division>,
    },
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::Heroes { .. } => "/heroes".to_string(),
            Endpoint::HeroDetail { hero_key, .. } => format!("/heroes/{hero_key}"),
            Endpoint::HeroStats { .. } => "/heroes/stats".to_string(),
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::Heroes { locale } | Endpoint::HeroDetail { locale, .. } => locale
                .iter()
                .map(|locale| ("locale", locale.clone()))
                .collect(),
            Endpoint::HeroStats {
                platform,
                gamemode,
                region,
                division,
            } => {
                let mut params = vec![
                    ("platform", platform.clone()),
                    ("gamemode", gamemode.as_str().to_string()),
                    ("region", region.as_str().to_string()),
                ];
                if let Some(division) = division {
                    params.push(("competitive_division", division.as_str().to_string()));
                }
                params
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())?;
        for (i, (name, value)) in self.query().iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// Raw upstream response; classification happens in the fetcher.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Performs one GET. `Err` means the request never produced an HTTP status.
    async fn get(&self, endpoint: &Endpoint) -> Result<UpstreamResponse, Error>;
}

pub struct OverfastClient {
    http: reqwest::Client,
    base_url: String,
}

impl OverfastClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("oowsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Upstream for OverfastClient {
    #[tracing::instrument(level = "trace", skip(self), fields(endpoint = %endpoint))]
    async fn get(&self, endpoint: &Endpoint) -> Result<UpstreamResponse, Error> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let response = self
            .http
            .get(&url)
            .query(&endpoint.query())
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await?;

        debug!(url, status, bytes = body.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Entry of `GET /heroes`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiHeroSummary {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub portrait: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Body of `GET /heroes/{key}`. Every field is optional upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiHeroDetail {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub portrait: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hitpoints: ApiHitpoints,
    #[serde(default, deserialize_with = "null_as_default")]
    pub abilities: Vec<ApiAbility>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub perks: Vec<ApiPerk>,
}

impl ApiHeroDetail {
    /// True when the payload carries nothing worth persisting (e.g. `{}`).
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.role.is_none()
            && self.abilities.is_empty()
            && self.perks.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiHitpoints {
    #[serde(default, deserialize_with = "null_as_default")]
    pub health: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub armor: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shields: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiAbility {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub icon: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPerk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub icon: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Row of `GET /heroes/stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiHeroStat {
    pub hero: String,
    #[serde(default)]
    pub winrate: Option<f64>,
    #[serde(default)]
    pub pickrate: Option<f64>,
}
