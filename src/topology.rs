//! Proxy topology resolution.
//!
//! Turns a profile's proxy selector into the set of processes that run on the
//! gateway, the ports they listen on and the hosts that must never be
//! redirected. The result is computed once per compile and shared by every
//! artifact compiler.

use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::config::ProxiesInfo;
use crate::error::{Result, RuleError};
use crate::profile::{KcptunConfig, Profile, ShadowsocksConfig, ShadowsocksrConfig};
use crate::resolver::{resolve_ipv4, Resolver};
use crate::types::{Mode, ProxyFamily, ProxyStack, Role};

#[cfg(feature = "async")]
use crate::resolver::{resolve_ipv4_async, AsyncResolver};
#[cfg(feature = "async")]
use futures_util::future::join_all;

/// Directory the proxy binaries are installed in on the gateway
pub const BIN_DIR: &str = "/usr/bin";

/// Credentials of the active primary proxy
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryProxy {
    Shadowsocks(ShadowsocksConfig),
    Shadowsocksr(ShadowsocksrConfig),
}

impl PrimaryProxy {
    pub fn family(&self) -> ProxyFamily {
        match self {
            PrimaryProxy::Shadowsocks(_) => ProxyFamily::Shadowsocks,
            PrimaryProxy::Shadowsocksr(_) => ProxyFamily::Shadowsocksr,
        }
    }

    /// Remote server of the primary proxy as written in the profile
    pub fn server(&self) -> &str {
        match self {
            PrimaryProxy::Shadowsocks(c) => &c.server,
            PrimaryProxy::Shadowsocksr(c) => &c.server,
        }
    }
}

/// Tunnel-DNS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDns {
    /// Port the tunnel listens on
    pub local_port: u16,
    /// DNS server queries are tunneled to
    pub upstream: String,
}

/// SSH-to-server redirect through kcptun
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSpeedup {
    pub host: String,
    pub port: u16,
}

/// Identity of one proxy process on the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub role: Role,
    pub service_name: String,
    pub bin_name: String,
    pub cfg_name: String,
    pub local_port: u16,
}

impl ServiceSpec {
    pub fn bin_path(&self) -> String {
        format!("{}/{}", BIN_DIR, self.bin_name)
    }

    pub fn cfg_path(&self, remote_cfg_dir: &str) -> String {
        format!("{}/{}", remote_cfg_dir.trim_end_matches('/'), self.cfg_name)
    }
}

/// Resolved proxy topology of one profile
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTopology {
    pub stack: ProxyStack,
    pub mode: Mode,
    pub primary: PrimaryProxy,
    /// Present when kcptun carries the primary proxy
    pub kcptun: Option<KcptunConfig>,
    pub tunnel_dns: Option<TunnelDns>,
    /// Port matched TCP traffic is redirected to
    pub redirect_port: u16,
    pub ssh_speedup: Option<SshSpeedup>,
    /// Proxy servers to bypass, in kcptun, shadowsocksr, shadowsocks order
    pub upstream_hosts: Vec<String>,
    /// Active processes in emission order
    pub services: Vec<ServiceSpec>,
    /// DNS server attached to every list domain, if any
    pub list_dns_server: Option<String>,
}

impl ResolvedTopology {
    pub fn family(&self) -> ProxyFamily {
        self.stack.family()
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.services.iter().map(|s| s.role)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.services.iter().any(|s| s.role == role)
    }

    pub fn service(&self, role: Role) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.role == role)
    }

    /// Resolve every upstream host to the IPv4 address to bypass.
    pub fn resolve_bypass_ips(&self, resolver: &dyn Resolver) -> Result<Vec<Ipv4Addr>> {
        self.upstream_hosts
            .iter()
            .map(|host| {
                resolve_ipv4(resolver, host).inspect_err(|e| {
                    warn!("Cannot bypass proxy server {}: {}", host, e);
                })
            })
            .collect()
    }

    /// Resolve every upstream host concurrently, keeping host order.
    #[cfg(feature = "async")]
    pub async fn resolve_bypass_ips_async(
        &self,
        resolver: &dyn AsyncResolver,
    ) -> Result<Vec<Ipv4Addr>> {
        let results = join_all(self.upstream_hosts.iter().map(|host| async move {
            resolve_ipv4_async(resolver, host).await.inspect_err(|e| {
                warn!("Cannot bypass proxy server {}: {}", host, e);
            })
        }))
        .await;
        results.into_iter().collect()
    }
}

/// Active roles of a stack, in emission order.
pub fn active_roles(stack: ProxyStack, enable_tunnel_dns: bool) -> Vec<Role> {
    let mut roles = Vec::with_capacity(3);
    if enable_tunnel_dns {
        roles.push(Role::TunnelDns);
    }
    match stack {
        ProxyStack::Ss => roles.push(Role::Shadowsocks),
        ProxyStack::SsKt => roles.extend([Role::Kcptun, Role::Shadowsocks]),
        ProxyStack::Ssr => roles.push(Role::Shadowsocksr),
        ProxyStack::SsrKt => roles.extend([Role::Kcptun, Role::Shadowsocksr]),
    }
    roles
}

/// Port the primary proxy listens on, which is where traffic gets redirected.
///
/// Over kcptun the primary proxy moves to its `overKtPort` and forwards to
/// kcptun's local port.
pub fn redirect_port(stack: ProxyStack, info: &ProxiesInfo) -> Result<u16> {
    let family = stack.family();
    if stack.over_kcptun() {
        info.over_kt_port(family)
    } else {
        Ok(info.family(family).local_port)
    }
}

/// Service identities of the given roles.
pub fn service_specs(
    roles: &[Role],
    stack: ProxyStack,
    info: &ProxiesInfo,
) -> Result<Vec<ServiceSpec>> {
    let primary_port = redirect_port(stack, info)?;
    let specs = roles
        .iter()
        .map(|&role| match role {
            Role::TunnelDns => ServiceSpec {
                role,
                service_name: info.tunnel_dns.service_name.clone(),
                bin_name: info.tunnel_dns.bin_name.for_family(stack.family()).to_string(),
                cfg_name: info.tunnel_dns.cfg_name.clone(),
                local_port: info.tunnel_dns.local_port,
            },
            Role::Kcptun => spec_from(role, &info.kcptun, info.kcptun.local_port),
            Role::Shadowsocksr => spec_from(role, &info.shadowsocksr, primary_port),
            Role::Shadowsocks => spec_from(role, &info.shadowsocks, primary_port),
        })
        .collect();
    Ok(specs)
}

fn spec_from(role: Role, info: &crate::config::ProxyInfo, local_port: u16) -> ServiceSpec {
    ServiceSpec {
        role,
        service_name: info.service_name.clone(),
        bin_name: info.bin_name.clone(),
        cfg_name: info.cfg_name.clone(),
        local_port,
    }
}

/// Resolve the topology of a profile.
pub fn resolve_topology(profile: &Profile, info: &ProxiesInfo) -> Result<ResolvedTopology> {
    profile.validate()?;

    let stack = profile.proxies;
    let primary = match stack.family() {
        ProxyFamily::Shadowsocks => PrimaryProxy::Shadowsocks(
            profile
                .shadowsocks
                .clone()
                .ok_or_else(|| RuleError::invalid_profile("missing shadowsocks section"))?,
        ),
        ProxyFamily::Shadowsocksr => PrimaryProxy::Shadowsocksr(
            profile
                .shadowsocksr
                .clone()
                .ok_or_else(|| RuleError::invalid_profile("missing shadowsocksr section"))?,
        ),
    };
    let kcptun = if stack.over_kcptun() {
        profile.kcptun.clone()
    } else {
        None
    };

    let tunnel_dns = profile.enable_tunnel_dns.then(|| TunnelDns {
        local_port: info.tunnel_dns.local_port,
        upstream: profile.dns_server.clone(),
    });

    let roles = active_roles(stack, profile.enable_tunnel_dns);
    let services = service_specs(&roles, stack, info)?;
    let redirect_port = redirect_port(stack, info)?;

    let ssh_speedup = match &kcptun {
        Some(kt) if profile.speedup_server_ssh => Some(SshSpeedup {
            host: kt.server.clone(),
            port: profile.server_ssh_port,
        }),
        _ => None,
    };

    let mut upstream_hosts = Vec::with_capacity(2);
    if let Some(kt) = &kcptun {
        upstream_hosts.push(kt.server.clone());
    }
    upstream_hosts.push(primary.server().to_string());

    let list_dns_server = match &tunnel_dns {
        Some(t) => Some(format!("127.0.0.1#{}", t.local_port)),
        None if profile.dns_server.trim().is_empty() => None,
        None => Some(profile.dns_server.trim().to_string()),
    };

    debug!(
        "Resolved topology: stack={}, mode={}, redirect_port={}, roles={:?}",
        stack,
        profile.mode,
        redirect_port,
        roles
    );

    Ok(ResolvedTopology {
        stack,
        mode: profile.mode,
        primary,
        kcptun,
        tunnel_dns,
        redirect_port,
        ssh_speedup,
        upstream_hosts,
        services,
        list_dns_server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    fn ss() -> ShadowsocksConfig {
        ShadowsocksConfig {
            server: "1.2.3.4".to_string(),
            server_port: 8388,
            password: "pw".to_string(),
            timeout: 60,
            method: "aes-256-cfb".to_string(),
            fast_open: false,
        }
    }

    fn kt() -> KcptunConfig {
        KcptunConfig {
            server: "kt.example.com".to_string(),
            server_port: 29900,
            key: "k".to_string(),
            crypt: "aes".to_string(),
            mode: "fast".to_string(),
            others: Default::default(),
        }
    }

    pub(super) fn profile(stack: ProxyStack) -> Profile {
        Profile {
            name: String::new(),
            proxies: stack,
            mode: Mode::Whitelist,
            enable_tunnel_dns: false,
            dns_server: "8.8.8.8".to_string(),
            selected_bl: Default::default(),
            selected_wl: Default::default(),
            speedup_server_ssh: true,
            server_ssh_port: 22,
            shadowsocks: Some(ss()),
            shadowsocksr: None,
            kcptun: Some(kt()),
        }
    }

    #[test]
    fn test_active_roles() {
        assert_eq!(active_roles(ProxyStack::Ss, false), vec![Role::Shadowsocks]);
        assert_eq!(
            active_roles(ProxyStack::SsrKt, true),
            vec![Role::TunnelDns, Role::Kcptun, Role::Shadowsocksr]
        );
        assert_eq!(
            active_roles(ProxyStack::SsKt, false),
            vec![Role::Kcptun, Role::Shadowsocks]
        );
    }

    #[test]
    fn test_redirect_port() {
        let info = ProxiesInfo::default();
        assert_eq!(redirect_port(ProxyStack::Ss, &info).unwrap(), 1010);
        assert_eq!(redirect_port(ProxyStack::SsKt, &info).unwrap(), 1011);
        assert_eq!(redirect_port(ProxyStack::Ssr, &info).unwrap(), 1020);
        assert_eq!(redirect_port(ProxyStack::SsrKt, &info).unwrap(), 1021);
    }

    #[test]
    fn test_resolve_ss_over_kcptun() {
        let topology = resolve_topology(&profile(ProxyStack::SsKt), &ProxiesInfo::default()).unwrap();
        assert_eq!(topology.redirect_port, 1011);
        assert_eq!(
            topology.upstream_hosts,
            vec!["kt.example.com".to_string(), "1.2.3.4".to_string()]
        );
        assert_eq!(
            topology.ssh_speedup,
            Some(SshSpeedup {
                host: "kt.example.com".to_string(),
                port: 22
            })
        );
        assert_eq!(topology.service(Role::Kcptun).unwrap().local_port, 1040);
        assert_eq!(topology.service(Role::Shadowsocks).unwrap().local_port, 1011);
        assert_eq!(topology.list_dns_server.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn test_no_ssh_speedup_without_kcptun() {
        let topology = resolve_topology(&profile(ProxyStack::Ss), &ProxiesInfo::default()).unwrap();
        assert!(topology.ssh_speedup.is_none());
        assert!(topology.kcptun.is_none());
        assert!(topology.has_role(Role::Shadowsocks));
        assert!(!topology.has_role(Role::Kcptun));
        assert_eq!(topology.upstream_hosts, vec!["1.2.3.4".to_string()]);
    }

    #[test]
    fn test_tunnel_dns_overrides_list_dns() {
        let mut p = profile(ProxyStack::Ss);
        p.enable_tunnel_dns = true;
        let topology = resolve_topology(&p, &ProxiesInfo::default()).unwrap();
        assert_eq!(topology.list_dns_server.as_deref(), Some("127.0.0.1#1030"));
        let tunnel = topology.service(Role::TunnelDns).unwrap();
        assert_eq!(tunnel.bin_name, "ss-tunnel");
        assert_eq!(tunnel.bin_path(), "/usr/bin/ss-tunnel");
    }

    #[test]
    fn test_empty_dns_server_means_no_override() {
        let mut p = profile(ProxyStack::Ss);
        p.dns_server = "  ".to_string();
        let topology = resolve_topology(&p, &ProxiesInfo::default()).unwrap();
        assert!(topology.list_dns_server.is_none());
    }

    #[test]
    fn test_resolve_bypass_ips() {
        let topology = resolve_topology(&profile(ProxyStack::SsKt), &ProxiesInfo::default()).unwrap();
        let resolver = StaticResolver::new().with_mapping(
            "kt.example.com",
            Some(Ipv4Addr::new(5, 6, 7, 8)),
            None,
        );
        let ips = topology.resolve_bypass_ips(&resolver).unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(5, 6, 7, 8), Ipv4Addr::new(1, 2, 3, 4)]);
    }

    #[test]
    fn test_resolve_bypass_ips_failure() {
        let topology = resolve_topology(&profile(ProxyStack::SsKt), &ProxiesInfo::default()).unwrap();
        let err = topology.resolve_bypass_ips(&StaticResolver::new()).unwrap_err();
        assert!(matches!(err, RuleError::DnsResolutionFailed { .. }));
    }

    #[test]
    fn test_cfg_path_joins_without_double_slash() {
        let topology = resolve_topology(&profile(ProxyStack::Ss), &ProxiesInfo::default()).unwrap();
        let spec = topology.service(Role::Shadowsocks).unwrap();
        assert_eq!(spec.cfg_path("/etc/vrouter/"), "/etc/vrouter/ss-client.json");
    }
}
