//! Settings for the session backend.
//!
//! [`SessionConfig`] can be deserialized from any serde source or read from the
//! environment with [`SessionConfig::from_env`].

use crate::store::Consistency;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value `{value}` for `{name}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub table_name: String,
    pub key_attribute: String,
    pub consistency: Consistency,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Overrides the service endpoint, e.g. for DynamoDB Local.
    pub endpoint_url: Option<String>,
    /// Attribute written for DynamoDB TTL expiry. Nothing is written when unset.
    pub ttl_attribute: Option<String>,
    pub ttl_seconds: u64,
    pub cache_ttl_seconds: u64,
    /// Mixed into every generated session key.
    pub secret_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            table_name: "sessions".to_string(),
            key_attribute: "session_key".to_string(),
            consistency: Consistency::Strong,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            ttl_attribute: None,
            ttl_seconds: 60 * 60 * 24 * 14,
            cache_ttl_seconds: 300,
            secret_key: String::new(),
        }
    }
}

impl SessionConfig {
    /// Reads the `DYNAMODB_SESSIONS_*` variables, falling back to the standard
    /// AWS variables for region and credentials. `SESSION_SECRET_KEY` is required.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();
        let first = |names: &[&str]| names.iter().find_map(|&name| lookup(name));

        let consistency = match lookup("DYNAMODB_SESSIONS_CONSISTENT_READ") {
            Some(value) => {
                if parse::<bool>("DYNAMODB_SESSIONS_CONSISTENT_READ", value)? {
                    Consistency::Strong
                } else {
                    Consistency::Eventual
                }
            }
            None => defaults.consistency,
        };

        let ttl_seconds = lookup("DYNAMODB_SESSIONS_TTL_SECONDS")
            .map(|value| parse("DYNAMODB_SESSIONS_TTL_SECONDS", value))
            .transpose()?
            .unwrap_or(defaults.ttl_seconds);

        let cache_ttl_seconds = lookup("DYNAMODB_SESSIONS_CACHE_TTL_SECONDS")
            .map(|value| parse("DYNAMODB_SESSIONS_CACHE_TTL_SECONDS", value))
            .transpose()?
            .unwrap_or(defaults.cache_ttl_seconds);

        let secret_key =
            lookup("SESSION_SECRET_KEY").ok_or(Error::Missing("SESSION_SECRET_KEY"))?;

        Ok(Self {
            table_name: lookup("DYNAMODB_SESSIONS_TABLE_NAME").unwrap_or(defaults.table_name),
            key_attribute: lookup("DYNAMODB_SESSIONS_TABLE_PRIMARY_KEY")
                .unwrap_or(defaults.key_attribute),
            consistency,
            region: first(&["DYNAMODB_SESSIONS_AWS_REGION_NAME", "AWS_REGION"]),
            access_key_id: first(&["DYNAMODB_SESSIONS_AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]),
            secret_access_key: first(&[
                "DYNAMODB_SESSIONS_AWS_SECRET_ACCESS_KEY",
                "AWS_SECRET_ACCESS_KEY",
            ]),
            endpoint_url: lookup("DYNAMODB_SESSIONS_ENDPOINT_URL"),
            ttl_attribute: lookup("DYNAMODB_SESSIONS_TTL_ATTRIBUTE"),
            ttl_seconds,
            cache_ttl_seconds,
            secret_key,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, Error> {
    value.parse().map_err(|_| Error::Invalid { name, value })
}
