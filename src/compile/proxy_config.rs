//! JSON client configs of the proxy processes.
//!
//! Field order follows what the binaries' sample configs use; serde_json is
//! built with `preserve_order` so overriding a field keeps its position.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::profile::{Extras, KcptunConfig, ShadowsocksConfig, ShadowsocksrConfig};
use crate::topology::{PrimaryProxy, ResolvedTopology};
use crate::types::Role;

/// Timeout used by a primary proxy talking to the local kcptun
pub const OVER_KCPTUN_TIMEOUT: u32 = 50;

/// Config file of one proxy process
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfigFile {
    pub role: Role,
    pub cfg_name: String,
    pub config: Map<String, Value>,
}

impl ProxyConfigFile {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }
}

/// Configs of every active role, in emission order.
pub fn proxy_configs(topology: &ResolvedTopology) -> Vec<ProxyConfigFile> {
    topology
        .services
        .iter()
        .filter_map(|spec| {
            let config = match spec.role {
                Role::TunnelDns => tunnel_dns_config(topology)?,
                Role::Kcptun => kcptun_config(topology.kcptun.as_ref()?, spec.local_port),
                Role::Shadowsocksr | Role::Shadowsocks => primary_config(topology, spec.local_port),
            };
            Some(ProxyConfigFile {
                role: spec.role,
                cfg_name: spec.cfg_name.clone(),
                config,
            })
        })
        .collect()
}

fn primary_config(topology: &ResolvedTopology, local_port: u16) -> Map<String, Value> {
    let mut cfg = match &topology.primary {
        PrimaryProxy::Shadowsocks(ss) => shadowsocks_fields(ss, local_port, None, "tcp_and_udp"),
        PrimaryProxy::Shadowsocksr(ssr) => {
            let mut cfg = shadowsocksr_fields(ssr, local_port, None, "tcp_and_udp");
            insert_extras(&mut cfg, &ssr.others);
            cfg
        }
    };

    if let Some(kcptun) = topology.service(Role::Kcptun) {
        cfg.insert("server".into(), "127.0.0.1".into());
        cfg.insert("server_port".into(), kcptun.local_port.into());
        cfg.insert("timeout".into(), OVER_KCPTUN_TIMEOUT.into());
        cfg.insert("mode".into(), "tcp_only".into());
    }
    cfg
}

fn tunnel_dns_config(topology: &ResolvedTopology) -> Option<Map<String, Value>> {
    let tunnel = topology.tunnel_dns.as_ref()?;
    let upstream = Some(tunnel.upstream.as_str());
    let mut cfg = match &topology.primary {
        PrimaryProxy::Shadowsocks(ss) => {
            shadowsocks_fields(ss, tunnel.local_port, upstream, "udp_only")
        }
        PrimaryProxy::Shadowsocksr(ssr) => {
            shadowsocksr_fields(ssr, tunnel.local_port, upstream, "udp_only")
        }
    };

    if let PrimaryProxy::Shadowsocksr(ssr) = &topology.primary {
        insert_extras(&mut cfg, &ssr.others);
    }
    Some(cfg)
}

fn shadowsocks_fields(
    ss: &ShadowsocksConfig,
    local_port: u16,
    tunnel_address: Option<&str>,
    mode: &str,
) -> Map<String, Value> {
    let mut cfg = Map::new();
    cfg.insert("server".into(), ss.server.clone().into());
    cfg.insert("server_port".into(), ss.server_port.into());
    cfg.insert("local_address".into(), "0.0.0.0".into());
    cfg.insert("local_port".into(), local_port.into());
    cfg.insert("password".into(), ss.password.clone().into());
    cfg.insert("timeout".into(), ss.timeout.into());
    cfg.insert("method".into(), ss.method.clone().into());
    cfg.insert("fast_open".into(), ss.fast_open.into());
    if let Some(address) = tunnel_address {
        cfg.insert("tunnel_address".into(), address.into());
    }
    cfg.insert("mode".into(), mode.into());
    cfg
}

fn shadowsocksr_fields(
    ssr: &ShadowsocksrConfig,
    local_port: u16,
    tunnel_address: Option<&str>,
    mode: &str,
) -> Map<String, Value> {
    let mut cfg = Map::new();
    cfg.insert("server".into(), ssr.server.clone().into());
    cfg.insert("server_port".into(), ssr.server_port.into());
    cfg.insert("local_address".into(), "0.0.0.0".into());
    cfg.insert("local_port".into(), local_port.into());
    cfg.insert("password".into(), ssr.password.clone().into());
    cfg.insert("timeout".into(), ssr.timeout.into());
    cfg.insert("method".into(), ssr.method.clone().into());
    cfg.insert("fast_open".into(), ssr.fast_open.into());
    if let Some(address) = tunnel_address {
        cfg.insert("tunnel_address".into(), address.into());
    }
    cfg.insert("mode".into(), mode.into());
    cfg.insert("protocol".into(), ssr.protocol.clone().into());
    cfg.insert("protocol_param".into(), ssr.protocol_param.clone().into());
    cfg.insert("obfs".into(), ssr.obfs.clone().into());
    cfg.insert("obfs_param".into(), ssr.obfs_param.clone().into());
    cfg
}

fn insert_extras(cfg: &mut Map<String, Value>, extras: &Extras) {
    for (key, value) in extras.iter() {
        cfg.insert(key.to_string(), value.into());
    }
}

fn kcptun_config(kcptun: &KcptunConfig, local_port: u16) -> Map<String, Value> {
    let mut cfg = Map::new();
    cfg.insert(
        "remoteaddr".into(),
        format!("{}:{}", kcptun.server, kcptun.server_port).into(),
    );
    cfg.insert("localaddr".into(), format!(":{}", local_port).into());
    cfg.insert("key".into(), kcptun.key.clone().into());
    cfg.insert("crypt".into(), kcptun.crypt.clone().into());
    cfg.insert("mode".into(), kcptun.mode.clone().into());
    for (key, value) in kcptun.others.iter() {
        cfg.insert(key.to_string(), coerce_kcptun_value(value));
    }
    cfg
}

/// kcptun rejects quoted numbers and booleans, so extras are typed.
pub fn coerce_kcptun_value(raw: &str) -> Value {
    let value = raw.trim().replace('"', "");
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = value.parse::<u64>() {
            return Value::from(n);
        }
    }
    match value.as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value),
    }
}
