//! Routing profile.
//!
//! A profile is the user-facing description of a gateway setup: which proxy
//! stack runs, which routing mode applies and which lists feed the ipsets.
//! Profiles are stored as camelCase JSON.

use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::types::{Mode, ProxyFamily, ProxyStack};

/// Default SSH port of the proxy server
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default proxy timeout in seconds
pub const DEFAULT_TIMEOUT: u32 = 60;

/// Routing profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Active proxy stack
    pub proxies: ProxyStack,

    /// Routing mode
    pub mode: Mode,

    /// Route DNS queries through the proxy
    #[serde(default)]
    pub enable_tunnel_dns: bool,

    /// Upstream DNS server (`host` or `host#port`)
    #[serde(default)]
    pub dns_server: String,

    /// Blacklist identifiers in declaration order
    #[serde(rename = "selectedBL", default)]
    pub selected_bl: IndexMap<String, bool>,

    /// Whitelist identifiers in declaration order
    #[serde(rename = "selectedWL", default)]
    pub selected_wl: IndexMap<String, bool>,

    /// Send SSH to the proxy server through kcptun
    #[serde(rename = "speedupServerSSH", default)]
    pub speedup_server_ssh: bool,

    #[serde(rename = "serverSSHPort", default = "default_ssh_port")]
    pub server_ssh_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadowsocks: Option<ShadowsocksConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadowsocksr: Option<ShadowsocksrConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kcptun: Option<KcptunConfig>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT
}

/// Shadowsocks server credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksConfig {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    pub method: String,
    #[serde(default)]
    pub fast_open: bool,
}

/// Shadowsocksr server credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksrConfig {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    pub method: String,
    #[serde(default)]
    pub fast_open: bool,
    pub protocol: String,
    #[serde(default)]
    pub protocol_param: String,
    pub obfs: String,
    #[serde(default)]
    pub obfs_param: String,
    /// Extra `key=value;key=value` fields copied into the client config
    #[serde(default)]
    pub others: Extras,
}

/// Kcptun server parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KcptunConfig {
    pub server: String,
    pub server_port: u16,
    pub key: String,
    pub crypt: String,
    pub mode: String,
    #[serde(default)]
    pub others: Extras,
}

impl Profile {
    /// Parse a profile from JSON text and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: Profile = serde_json::from_str(json)
            .map_err(|e| RuleError::invalid_profile(format!("failed to parse profile: {}", e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check that the credentials of the selected stack are present.
    pub fn validate(&self) -> Result<()> {
        match self.proxies.family() {
            ProxyFamily::Shadowsocks if self.shadowsocks.is_none() => {
                return Err(RuleError::invalid_profile(format!(
                    "proxies '{}' requires a shadowsocks section",
                    self.proxies
                )));
            }
            ProxyFamily::Shadowsocksr if self.shadowsocksr.is_none() => {
                return Err(RuleError::invalid_profile(format!(
                    "proxies '{}' requires a shadowsocksr section",
                    self.proxies
                )));
            }
            _ => {}
        }

        if self.proxies.over_kcptun() && self.kcptun.is_none() {
            return Err(RuleError::invalid_profile(format!(
                "proxies '{}' requires a kcptun section",
                self.proxies
            )));
        }

        Ok(())
    }
}

/// Load and validate a profile from a JSON file.
pub fn load_profile(path: impl AsRef<Path>) -> Result<Profile> {
    let path = path.as_ref();
    debug!("Loading profile from {:?}", path);
    let text = fs::read_to_string(path).map_err(|e| {
        RuleError::invalid_profile(format!(
            "failed to read profile '{}': {}",
            path.display(),
            e
        ))
    })?;
    Profile::from_json_str(&text)
}

/// Free-form extra fields written as `key=value;key=value`.
///
/// Blank segments are ignored and keys and values are trimmed. A value keeps
/// everything after the first `=`. A repeated key overwrites the earlier value
/// but keeps the earlier position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Extras(IndexMap<String, String>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `key=value;key=value` form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut map = IndexMap::new();
        for segment in text.split(';') {
            if segment.trim().is_empty() {
                continue;
            }
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                RuleError::invalid_profile(format!(
                    "extra field '{}' is not a key=value pair",
                    segment.trim()
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(RuleError::invalid_profile(format!(
                    "extra field '{}' has an empty key",
                    segment.trim()
                )));
            }
            map.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(map))
    }

    /// Insert a field, replacing any earlier value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for Extras {
    type Error = RuleError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Extras::parse(&value)
    }
}

impl From<Extras> for String {
    fn from(extras: Extras) -> Self {
        extras.to_string()
    }
}

impl fmt::Display for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
