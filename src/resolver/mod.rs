//! DNS resolver module.
//!
//! Proxy servers given by hostname must be resolved before bypass rules can be
//! written. Resolution is an external concern, so it sits behind a trait.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use crate::error::{Result, RuleError};

#[cfg(feature = "async")]
use async_trait::async_trait;

/// DNS resolver interface.
pub trait Resolver: Send + Sync {
    /// Resolve the hostname to IPv4 and IPv6 addresses.
    ///
    /// Either or both of the returned IPs can be None if no address is found.
    /// Returns an error if the resolution fails completely.
    fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)>;
}

/// Async DNS resolver interface.
#[cfg(feature = "async")]
#[async_trait]
pub trait AsyncResolver: Send + Sync {
    /// Resolve the hostname to IPv4 and IPv6 addresses asynchronously.
    async fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)>;
}

/// Resolve a host to the IPv4 address used in firewall rules.
///
/// Literal addresses are returned as-is without consulting the resolver.
pub fn resolve_ipv4(resolver: &dyn Resolver, host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let (ipv4, _) = resolver.resolve(host).map_err(|e| into_dns_error(host, e))?;
    ipv4.ok_or_else(|| RuleError::dns_failed(host, "no IPv4 address found"))
}

/// Resolve a host to the IPv4 address used in firewall rules.
#[cfg(feature = "async")]
pub async fn resolve_ipv4_async(resolver: &dyn AsyncResolver, host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let (ipv4, _) = resolver
        .resolve(host)
        .await
        .map_err(|e| into_dns_error(host, e))?;
    ipv4.ok_or_else(|| RuleError::dns_failed(host, "no IPv4 address found"))
}

fn into_dns_error(host: &str, err: RuleError) -> RuleError {
    match err {
        e @ RuleError::DnsResolutionFailed { .. } => e,
        other => RuleError::dns_failed(host, other.to_string()),
    }
}

/// System DNS resolver using the OS resolver.
pub struct SystemResolver;

impl SystemResolver {
    /// Create a new system resolver.
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)> {
        if let Some(ips) = literal(host) {
            return Ok(ips);
        }

        let addrs = (host, 0u16)
            .to_socket_addrs()
            .map_err(|e| RuleError::dns_failed(host, e.to_string()))?;

        Ok(split_ipv4_ipv6(addrs.map(|a| a.ip())))
    }
}

#[cfg(feature = "async")]
#[async_trait]
impl AsyncResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)> {
        if let Some(ips) = literal(host) {
            return Ok(ips);
        }

        let addrs = tokio::net::lookup_host((host, 0u16))
            .await
            .map_err(|e| RuleError::dns_failed(host, e.to_string()))?;

        Ok(split_ipv4_ipv6(addrs.map(|a| a.ip())))
    }
}

/// Static resolver with predefined mappings.
#[derive(Default)]
pub struct StaticResolver {
    mappings: HashMap<String, (Option<Ipv4Addr>, Option<Ipv6Addr>)>,
}

impl StaticResolver {
    /// Create a new empty static resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping for a hostname.
    pub fn add(&mut self, host: impl Into<String>, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) {
        self.mappings.insert(host.into(), (ipv4, ipv6));
    }

    /// Add a mapping and return self for chaining.
    pub fn with_mapping(
        mut self,
        host: impl Into<String>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> Self {
        self.add(host, ipv4, ipv6);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)> {
        if let Some(ips) = literal(host) {
            return Ok(ips);
        }

        self.mappings
            .get(host)
            .copied()
            .ok_or_else(|| RuleError::dns_failed(host, "host not found"))
    }
}

#[cfg(feature = "async")]
#[async_trait]
impl AsyncResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<(Option<Ipv4Addr>, Option<Ipv6Addr>)> {
        // Reuse sync implementation since it's non-blocking
        Resolver::resolve(self, host)
    }
}

fn literal(host: &str) -> Option<(Option<Ipv4Addr>, Option<Ipv6Addr>)> {
    match host.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some((Some(v4), None)),
        IpAddr::V6(v6) => Some((None, Some(v6))),
    }
}

/// Split IP addresses into first IPv4 and first IPv6.
fn split_ipv4_ipv6(ips: impl IntoIterator<Item = IpAddr>) -> (Option<Ipv4Addr>, Option<Ipv6Addr>) {
    let mut ipv4 = None;
    let mut ipv6 = None;

    for ip in ips {
        match ip {
            IpAddr::V4(v4) if ipv4.is_none() => ipv4 = Some(v4),
            IpAddr::V6(v6) if ipv6.is_none() => ipv6 = Some(v6),
            _ => {}
        }
        if ipv4.is_some() && ipv6.is_some() {
            break;
        }
    }

    (ipv4, ipv6)
}
