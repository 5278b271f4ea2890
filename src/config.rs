//! Static generator configuration.
//!
//! Port, binary and file-name directories that describe the gateway image the
//! artifacts are deployed to. Every field has a built-in default so a config
//! file only needs to list what differs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::types::{ProxyFamily, Role};

/// Identifier of the LAN list; it feeds the LAN ipset instead of the whitelist set.
pub const LAN_NETWORKS_ID: &str = "lanNetworks";

/// Per-proxy metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    /// Port the proxy listens on when used directly
    pub local_port: u16,
    /// Port the proxy listens on when kcptun carries its upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_kt_port: Option<u16>,
    pub cfg_name: String,
    pub service_name: String,
    pub bin_name: String,
}

/// Tunnel-DNS binary names, keyed by the active proxy family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyBinNames {
    pub shadowsocks: String,
    pub shadowsocksr: String,
}

impl FamilyBinNames {
    pub fn for_family(&self, family: ProxyFamily) -> &str {
        match family {
            ProxyFamily::Shadowsocks => &self.shadowsocks,
            ProxyFamily::Shadowsocksr => &self.shadowsocksr,
        }
    }
}

/// Tunnel-DNS metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDnsInfo {
    pub local_port: u16,
    pub cfg_name: String,
    pub service_name: String,
    pub bin_name: FamilyBinNames,
}

/// Directory of all proxy metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxiesInfo {
    pub shadowsocks: ProxyInfo,
    pub shadowsocksr: ProxyInfo,
    pub kcptun: ProxyInfo,
    pub tunnel_dns: TunnelDnsInfo,
}

impl Default for ProxiesInfo {
    fn default() -> Self {
        Self {
            shadowsocks: ProxyInfo {
                local_port: 1010,
                over_kt_port: Some(1011),
                cfg_name: "ss-client.json".to_string(),
                service_name: "shadowsocks".to_string(),
                bin_name: "ss-redir".to_string(),
            },
            shadowsocksr: ProxyInfo {
                local_port: 1020,
                over_kt_port: Some(1021),
                cfg_name: "ssr-client.json".to_string(),
                service_name: "shadowsocksr".to_string(),
                bin_name: "ssr-redir".to_string(),
            },
            kcptun: ProxyInfo {
                local_port: 1040,
                over_kt_port: None,
                cfg_name: "kt-client.json".to_string(),
                service_name: "kcptun".to_string(),
                bin_name: "kcptun".to_string(),
            },
            tunnel_dns: TunnelDnsInfo {
                local_port: 1030,
                cfg_name: "tunnel-dns.json".to_string(),
                service_name: "tunnelDns".to_string(),
                bin_name: FamilyBinNames {
                    shadowsocks: "ss-tunnel".to_string(),
                    shadowsocksr: "ssr-tunnel".to_string(),
                },
            },
        }
    }
}

impl ProxiesInfo {
    /// Metadata of a primary proxy family
    pub fn family(&self, family: ProxyFamily) -> &ProxyInfo {
        match family {
            ProxyFamily::Shadowsocks => &self.shadowsocks,
            ProxyFamily::Shadowsocksr => &self.shadowsocksr,
        }
    }

    /// Look up the port a family listens on when layered over kcptun.
    pub fn over_kt_port(&self, family: ProxyFamily) -> Result<u16> {
        let info = self.family(family);
        info.over_kt_port.ok_or_else(|| {
            RuleError::ConfigError(format!(
                "{} has no overKtPort configured",
                Role::from(family)
            ))
        })
    }
}

/// Names of the three ipsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpsetNames {
    pub black_set_name: String,
    pub white_set_name: String,
    pub lan_set_name: String,
}

/// Firewall-side directory: list files and ipset names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirewallInfo {
    /// List identifier -> list file name
    pub lists: IndexMap<String, String>,
    pub ipset: IpsetNames,
    /// ipset restore file name
    pub ipset_fname: String,
    /// iptables script file name
    pub firewall_fname: String,
    /// dnsmasq drop-in file name
    pub dnsmasq_fname: String,
}

impl Default for FirewallInfo {
    fn default() -> Self {
        let lists = [
            ("gfwList", "gfwlist.txt"),
            ("extraBlackList", "extra_blacklist.txt"),
            ("chinaIPs", "chinaIPs.txt"),
            (LAN_NETWORKS_ID, "lan_networks.txt"),
            ("extraWhiteList", "extra_whitelist.txt"),
        ]
        .into_iter()
        .map(|(id, fname)| (id.to_string(), fname.to_string()))
        .collect();

        Self {
            lists,
            ipset: IpsetNames {
                black_set_name: "BLACKLIST".to_string(),
                white_set_name: "WHITELIST".to_string(),
                lan_set_name: "LAN".to_string(),
            },
            ipset_fname: "custom.ipset".to_string(),
            firewall_fname: "firewall.user".to_string(),
            dnsmasq_fname: "custom.conf".to_string(),
        }
    }
}

impl FirewallInfo {
    /// File name backing a list identifier
    pub fn list_file(&self, id: &str) -> Option<&str> {
        self.lists.get(id).map(String::as_str)
    }
}

/// Everything the compiler needs besides the profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    pub proxies_info: ProxiesInfo,
    pub firewall_info: FirewallInfo,
    /// Directory on the gateway holding the deployed configs
    pub remote_cfg_dir: String,
    /// Local directory holding the list files
    pub list_dir: PathBuf,
    pub watchdog_fname: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            proxies_info: ProxiesInfo::default(),
            firewall_info: FirewallInfo::default(),
            remote_cfg_dir: "/etc/vrouter".to_string(),
            list_dir: PathBuf::from("lists"),
            watchdog_fname: "proxies-watchdog".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local list directory
    pub fn with_list_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.list_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the remote config directory
    pub fn with_remote_cfg_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_cfg_dir = dir.into();
        self
    }

    /// Parse a config from JSON text and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GeneratorConfig = serde_json::from_str(json)
            .map_err(|e| RuleError::ConfigError(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading generator config from {:?}", path);
        let text = fs::read_to_string(path).map_err(|e| {
            RuleError::ConfigError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let names = &self.firewall_info.ipset;
        let all = [
            &names.black_set_name,
            &names.white_set_name,
            &names.lan_set_name,
        ];
        if all.iter().any(|n| n.trim().is_empty()) {
            return Err(RuleError::ConfigError(
                "ipset names must not be empty".to_string(),
            ));
        }
        if all.iter().collect::<HashSet<_>>().len() != all.len() {
            return Err(RuleError::ConfigError(
                "black, white and lan ipset names must be distinct".to_string(),
            ));
        }

        self.proxies_info.over_kt_port(ProxyFamily::Shadowsocks)?;
        self.proxies_info.over_kt_port(ProxyFamily::Shadowsocksr)?;

        if self.remote_cfg_dir.trim().is_empty() {
            return Err(RuleError::ConfigError(
                "remoteCfgDir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
