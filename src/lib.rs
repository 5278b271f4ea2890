//! vrouter-rules - compiles a gateway proxy profile into router artifacts
//!
//! A [`Profile`] describes which proxy stack a gateway runs (shadowsocks or
//! shadowsocksr, optionally carried over kcptun, optionally with a DNS tunnel),
//! which traffic-splitting mode it uses, and which domain/network lists are
//! selected. The [`Compiler`] turns it into:
//! - an `ipset restore` file with the selected networks
//! - a dnsmasq drop-in that feeds resolved domains into the sets
//! - a firewall script with the NAT redirect rules
//! - OpenWrt init scripts and a watchdog for every proxy process
//! - JSON client configs for every proxy process
//!
//! # Example
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use vrouter_rules::{
//!     Compiler, GeneratorConfig, MemoryListLoader, Probe, Profile, StaticResolver, Verdict,
//! };
//!
//! let profile = Profile::from_json_str(r#"{
//!     "proxies": "ssKt",
//!     "mode": "whitelist",
//!     "dnsServer": "114.114.114.114",
//!     "selectedBL": {"gfwList": true},
//!     "shadowsocks": {
//!         "server": "1.2.3.4", "server_port": 8388,
//!         "password": "secret", "method": "aes-256-cfb"
//!     },
//!     "kcptun": {
//!         "server": "1.2.3.4", "server_port": 29900,
//!         "key": "k", "crypt": "aes", "mode": "fast"
//!     }
//! }"#).unwrap();
//!
//! let compiler = Compiler::new(GeneratorConfig::default().with_list_dir("/lists"));
//! let lists = MemoryListLoader::new().with_file("/lists/gfwlist.txt", "1.2.3.0/24\nexample.com\n");
//! let artifacts = compiler.compile(&profile, &lists, &StaticResolver::new()).unwrap();
//!
//! assert!(artifacts.ipset.content.contains("add BLACKLIST 1.2.3.0/24"));
//! assert!(artifacts.dnsmasq.content.contains("ipset=/example.com/BLACKLIST"));
//!
//! // The proxy server itself is never redirected
//! let to_server = Probe::tcp(Ipv4Addr::new(1, 2, 3, 4), 8388);
//! assert_eq!(artifacts.verdict(&to_server), Verdict::Bypass);
//! ```
//!
//! # Modes
//!
//! | Mode | NAT rules |
//! |------|-----------|
//! | `none` | none, traffic stays direct |
//! | `whitelist` | blacklist redirected, whitelist direct, everything else redirected |
//! | `blacklist` | whitelist direct, blacklist redirected, everything else direct |
//! | `global` | everything redirected |
//!
//! Proxy servers and LAN networks are bypassed in every mode but `none`.

pub mod compile;
pub mod config;
pub mod error;
pub mod lists;
pub mod profile;
pub mod resolver;
pub mod topology;
pub mod types;

// Re-export commonly used items
pub use compile::{
    Artifacts, Compiler, NamedArtifact, NatRule, NatRuleSet, Probe, ProxyConfigFile,
    ServiceDescriptor, Transport, Verdict,
};
pub use config::{FirewallInfo, GeneratorConfig, IpsetNames, ProxiesInfo};
pub use error::{Result, RuleError};
pub use lists::{FileListLoader, ListLoader, LoadedList, MemoryListLoader, ResolvedListEntry};
pub use profile::{
    load_profile, Extras, KcptunConfig, Profile, ShadowsocksConfig, ShadowsocksrConfig,
};
pub use topology::{resolve_topology, ResolvedTopology, ServiceSpec};
pub use types::{Mode, ProxyFamily, ProxyStack, Role};

// Re-export resolver types
pub use resolver::{Resolver, StaticResolver, SystemResolver};

#[cfg(feature = "async")]
pub use lists::AsyncListLoader;
#[cfg(feature = "async")]
pub use resolver::AsyncResolver;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_full_workflow() {
        let profile = Profile::from_json_str(
            r#"{
                "proxies": "ssr",
                "mode": "blacklist",
                "enableTunnelDns": true,
                "dnsServer": "8.8.8.8:53",
                "selectedBL": {"gfwList": true, "extraBlackList": false},
                "selectedWL": {"lanNetworks": true, "extraWhiteList": true},
                "shadowsocksr": {
                    "server": "ssr.example.net",
                    "server_port": 443,
                    "password": "pw",
                    "method": "chacha20",
                    "protocol": "origin",
                    "obfs": "plain"
                }
            }"#,
        )
        .unwrap();

        let lists = MemoryListLoader::new()
            .with_file("lists/gfwlist.txt", "8.8.8.0/24\ngoogle.com\n")
            .with_file("lists/lan_networks.txt", "192.168.0.0/16\n")
            .with_file("lists/extra_whitelist.txt", "8.8.8.8\nbaidu.com\n");
        let resolver =
            StaticResolver::new().with_mapping("ssr.example.net", Some(Ipv4Addr::new(9, 9, 9, 9)), None);

        let artifacts = Compiler::default()
            .compile(&profile, &lists, &resolver)
            .unwrap();

        assert_eq!(
            artifacts.topology.roles().collect::<Vec<_>>(),
            vec![Role::TunnelDns, Role::Shadowsocksr]
        );
        assert!(artifacts
            .dnsmasq
            .content
            .contains("server=/google.com/127.0.0.1#1030\nipset=/google.com/BLACKLIST"));
        assert!(artifacts.iptables.content.contains("-d 9.9.9.9 -j RETURN"));
        assert!(!artifacts.iptables.content.contains("--dport"));

        // whitelist wins over blacklist in blacklist mode
        let dns = Probe::tcp(Ipv4Addr::new(8, 8, 8, 8), 53);
        assert_eq!(artifacts.verdict(&dns), Verdict::Bypass);
        let blocked = Probe::tcp(Ipv4Addr::new(8, 8, 8, 4), 443);
        assert_eq!(artifacts.verdict(&blocked), Verdict::Redirect(1020));
        let lan = Probe::tcp(Ipv4Addr::new(192, 168, 1, 1), 80);
        assert_eq!(artifacts.verdict(&lan), Verdict::Bypass);
        let other = Probe::tcp(Ipv4Addr::new(4, 4, 4, 4), 80);
        assert_eq!(artifacts.verdict(&other), Verdict::Unmatched);
    }
}
