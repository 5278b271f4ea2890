use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Proxy stack selected by a profile.
///
/// Exactly one family (shadowsocks or shadowsocksr) is active; kcptun is an
/// optional transport layered underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProxyStack {
    /// Plain shadowsocks
    Ss,
    /// Shadowsocks tunneled over kcptun
    SsKt,
    /// Plain shadowsocksr
    Ssr,
    /// Shadowsocksr tunneled over kcptun
    SsrKt,
}

impl ProxyStack {
    /// Tag used in profiles
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStack::Ss => "ss",
            ProxyStack::SsKt => "ssKt",
            ProxyStack::Ssr => "ssr",
            ProxyStack::SsrKt => "ssrKt",
        }
    }

    /// The primary proxy family of this stack
    pub fn family(&self) -> ProxyFamily {
        match self {
            ProxyStack::Ss | ProxyStack::SsKt => ProxyFamily::Shadowsocks,
            ProxyStack::Ssr | ProxyStack::SsrKt => ProxyFamily::Shadowsocksr,
        }
    }

    /// Whether kcptun is layered under the primary proxy
    pub fn over_kcptun(&self) -> bool {
        match self {
            ProxyStack::SsKt | ProxyStack::SsrKt => true,
            ProxyStack::Ss | ProxyStack::Ssr => false,
        }
    }
}

impl FromStr for ProxyStack {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ss" => Ok(ProxyStack::Ss),
            "ssKt" => Ok(ProxyStack::SsKt),
            "ssr" => Ok(ProxyStack::Ssr),
            "ssrKt" => Ok(ProxyStack::SsrKt),
            other => Err(RuleError::invalid_profile(format!(
                "unknown proxies tag: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ProxyStack {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProxyStack> for String {
    fn from(stack: ProxyStack) -> Self {
        stack.as_str().to_string()
    }
}

impl fmt::Display for ProxyStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary proxy family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyFamily {
    Shadowsocks,
    Shadowsocksr,
}

/// Routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    /// Traffic stays direct, nothing is redirected
    None,
    /// Everything except the whitelist goes through the proxy
    Whitelist,
    /// Only the blacklist goes through the proxy
    Blacklist,
    /// Everything goes through the proxy
    Global,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Whitelist => "whitelist",
            Mode::Blacklist => "blacklist",
            Mode::Global => "global",
        }
    }
}

impl FromStr for Mode {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Mode::None),
            "whitelist" => Ok(Mode::Whitelist),
            "blacklist" => Ok(Mode::Blacklist),
            "global" => Ok(Mode::Global),
            other => Err(RuleError::invalid_profile(format!("unknown mode: {}", other))),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proxy process running on the gateway.
///
/// Variant order is the order in which service, watchdog and proxy config
/// artifacts are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    TunnelDns,
    Kcptun,
    Shadowsocksr,
    Shadowsocks,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TunnelDns => "tunnelDns",
            Role::Kcptun => "kcptun",
            Role::Shadowsocksr => "shadowsocksr",
            Role::Shadowsocks => "shadowsocks",
        }
    }
}

impl From<ProxyFamily> for Role {
    fn from(family: ProxyFamily) -> Self {
        match family {
            ProxyFamily::Shadowsocks => Role::Shadowsocks,
            ProxyFamily::Shadowsocksr => Role::Shadowsocksr,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
