//! Mirror of the managed server's proxy and toxic records.
//!
//! Nothing here is authoritative: every value is a copy of what the
//! toxiproxy server reported during the last successful sync.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Proxies keyed (and therefore ordered) by name
pub type ProxyRegistry = BTreeMap<String, Proxy>;

/// The fixed set of toxic kinds the managed server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToxicType {
    Bandwidth,
    Latency,
    Slicer,
    Timeout,
    SlowClose,
    SlowStart,
    LimitData,
    Reset,
    Corrupt,
    Delay,
    Echo,
}

impl ToxicType {
    pub const ALL: [ToxicType; 11] = [
        ToxicType::Bandwidth,
        ToxicType::Latency,
        ToxicType::Slicer,
        ToxicType::Timeout,
        ToxicType::SlowClose,
        ToxicType::SlowStart,
        ToxicType::LimitData,
        ToxicType::Reset,
        ToxicType::Corrupt,
        ToxicType::Delay,
        ToxicType::Echo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToxicType::Bandwidth => "bandwidth",
            ToxicType::Latency => "latency",
            ToxicType::Slicer => "slicer",
            ToxicType::Timeout => "timeout",
            ToxicType::SlowClose => "slow_close",
            ToxicType::SlowStart => "slow_start",
            ToxicType::LimitData => "limit_data",
            ToxicType::Reset => "reset",
            ToxicType::Corrupt => "corrupt",
            ToxicType::Delay => "delay",
            ToxicType::Echo => "echo",
        }
    }
}

impl fmt::Display for ToxicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToxicType {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToxicType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WardenError::invalid_request(format!("unknown toxic type: {s}")))
    }
}

/// Which direction of a proxied connection a toxic applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Upstream,
    #[default]
    Downstream,
}

impl StreamDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamDirection::Upstream => "upstream",
            StreamDirection::Downstream => "downstream",
        }
    }
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type-specific toxic attribute (`latency`, `jitter`, `rate`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_more::From)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Number(f64::from(value))
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toxic {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToxicType,
    #[serde(default)]
    pub stream: StreamDirection,
    #[serde(default = "default_toxicity")]
    pub toxicity: f64,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub toxics: Vec<Toxic>,
}

impl Proxy {
    pub fn toxic(&self, name: &str) -> Option<&Toxic> {
        self.toxics.iter().find(|toxic| toxic.name == name)
    }
}

/// Request body for creating a proxy; new proxies start enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProxy {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl NewProxy {
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen: listen.into(),
            upstream: upstream.into(),
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), WardenError> {
        for (field, value) in [
            ("name", &self.name),
            ("listen", &self.listen),
            ("upstream", &self.upstream),
        ] {
            if value.trim().is_empty() {
                return Err(WardenError::invalid_request(format!(
                    "proxy {field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Request body for attaching a toxic to a proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewToxic {
    #[serde(rename = "type")]
    pub kind: ToxicType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stream: StreamDirection,
    #[serde(default = "default_toxicity")]
    pub toxicity: f64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl NewToxic {
    pub fn new(kind: ToxicType) -> Self {
        Self {
            kind,
            name: None,
            stream: StreamDirection::default(),
            toxicity: default_toxicity(),
            attributes: Attributes::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stream(mut self, stream: StreamDirection) -> Self {
        self.stream = stream;
        self
    }

    pub fn toxicity(mut self, toxicity: f64) -> Self {
        self.toxicity = toxicity;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Resolve defaults into the record sent to the server. An unnamed toxic
    /// is called `{type}_{stream}`.
    pub fn into_toxic(self) -> Result<Toxic, WardenError> {
        validate_toxicity(self.toxicity)?;
        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(WardenError::invalid_request("toxic name must not be empty"));
            }
            Some(name) => name,
            None => format!("{}_{}", self.kind, self.stream),
        };
        Ok(Toxic {
            name,
            kind: self.kind,
            stream: self.stream,
            toxicity: self.toxicity,
            attributes: self.attributes,
        })
    }
}

/// Partial update of an existing toxic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToxicUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toxicity: Option<f64>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ToxicUpdate {
    pub fn validate(&self) -> Result<(), WardenError> {
        match self.toxicity {
            Some(toxicity) => validate_toxicity(toxicity),
            None => Ok(()),
        }
    }
}

/// The server answers `GET /proxies` with an object keyed by name; some
/// builds answer with a plain list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProxyListing {
    Keyed(BTreeMap<String, Proxy>),
    Listed(Vec<Proxy>),
}

/// Decode a `GET /proxies` body into a registry keyed by proxy name
pub fn parse_proxy_listing(body: &str) -> Result<ProxyRegistry, WardenError> {
    let listing: ProxyListing =
        serde_json::from_str(body).map_err(|e| WardenError::Decode(e.to_string()))?;
    let proxies = match listing {
        ProxyListing::Keyed(map) => map.into_values().collect::<Vec<_>>(),
        ProxyListing::Listed(list) => list,
    };
    Ok(proxies
        .into_iter()
        .map(|proxy| (proxy.name.clone(), proxy))
        .collect())
}

fn validate_toxicity(toxicity: f64) -> Result<(), WardenError> {
    if (0.0..=1.0).contains(&toxicity) {
        Ok(())
    } else {
        Err(WardenError::invalid_request(format!(
            "toxicity must be between 0 and 1, got {toxicity}"
        )))
    }
}

fn default_toxicity() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "redis": {
            "name": "redis",
            "listen": "127.0.0.1:26379",
            "upstream": "127.0.0.1:6379",
            "enabled": true,
            "toxics": [
                {
                    "name": "latency_downstream",
                    "type": "latency",
                    "stream": "downstream",
                    "toxicity": 1.0,
                    "attributes": {"latency": 1000, "jitter": 0}
                }
            ]
        },
        "api": {
            "name": "api",
            "listen": "127.0.0.1:28080",
            "upstream": "example.com:80",
            "enabled": false,
            "toxics": []
        }
    }"#;

    #[test]
    fn test_listing_is_ordered_by_name() {
        let registry = parse_proxy_listing(LISTING).unwrap();
        let names: Vec<_> = registry.keys().cloned().collect();
        assert_eq!(names, vec!["api", "redis"]);

        let redis = &registry["redis"];
        assert!(redis.enabled);
        let latency = redis.toxic("latency_downstream").unwrap();
        assert_eq!(latency.kind, ToxicType::Latency);
        assert_eq!(
            latency.attributes.get("latency"),
            Some(&AttributeValue::Number(1000.0))
        );
        assert!(!registry["api"].enabled);
    }

    #[test]
    fn test_list_shaped_listing() {
        let body = r#"[{"name": "db", "listen": ":5433", "upstream": ":5432"}]"#;
        let registry = parse_proxy_listing(body).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry["db"].enabled);
        assert!(registry["db"].toxics.is_empty());
    }

    #[test]
    fn test_malformed_listing_is_decode_error() {
        let err = parse_proxy_listing("<html>oops</html>").unwrap_err();
        assert!(matches!(err, WardenError::Decode(_)));
    }

    #[test]
    fn test_toxic_defaults() {
        let toxic: Toxic = serde_json::from_str(r#"{"name": "t", "type": "slow_close"}"#).unwrap();
        assert_eq!(toxic.kind, ToxicType::SlowClose);
        assert_eq!(toxic.stream, StreamDirection::Downstream);
        assert_eq!(toxic.toxicity, 1.0);
        assert!(toxic.attributes.is_empty());
    }

    #[test]
    fn test_unknown_toxic_type_is_rejected() {
        assert!(serde_json::from_str::<Toxic>(r#"{"name": "t", "type": "gremlin"}"#).is_err());
        assert!("gremlin".parse::<ToxicType>().is_err());
        assert_eq!("limit_data".parse::<ToxicType>().unwrap(), ToxicType::LimitData);
    }

    #[test]
    fn test_new_toxic_default_name() {
        let toxic = NewToxic::new(ToxicType::Bandwidth)
            .stream(StreamDirection::Upstream)
            .attribute("rate", 100u32)
            .into_toxic()
            .unwrap();
        assert_eq!(toxic.name, "bandwidth_upstream");
        assert_eq!(toxic.toxicity, 1.0);
        assert_eq!(
            toxic.attributes.get("rate"),
            Some(&AttributeValue::Number(100.0))
        );

        let named = NewToxic::new(ToxicType::Latency)
            .named("slow")
            .into_toxic()
            .unwrap();
        assert_eq!(named.name, "slow");
    }

    #[test]
    fn test_toxicity_bounds() {
        assert!(NewToxic::new(ToxicType::Reset).toxicity(1.5).into_toxic().is_err());
        assert!(NewToxic::new(ToxicType::Reset).toxicity(-0.1).into_toxic().is_err());
        assert!(NewToxic::new(ToxicType::Reset).toxicity(0.0).into_toxic().is_ok());

        let update = ToxicUpdate {
            toxicity: Some(2.0),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_toxic_update_omits_missing_toxicity() {
        let update = ToxicUpdate::default();
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"attributes": {}}));
    }

    #[test]
    fn test_new_proxy_validation() {
        assert!(NewProxy::new("redis", ":26379", ":6379").validate().is_ok());
        assert!(NewProxy::new("redis", "", ":6379").validate().is_err());
        let parsed: NewProxy =
            serde_json::from_str(r#"{"name": "a", "listen": ":1", "upstream": ":2"}"#).unwrap();
        assert!(parsed.enabled);
    }
}
