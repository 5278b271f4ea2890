//! NAT rule planning and rendering.
//!
//! Rules are first planned as typed [`NatRule`]s, grouped under the comment
//! that introduces them, and then rendered as `iptables -t nat` commands.
//! Every logical rule is inserted into both `PREROUTING` (forwarded traffic)
//! and `OUTPUT` (traffic originating on the gateway).
//!
//! Order is part of the contract: the chain is first-match, so a bypass
//! placed after a redirect for the same destination never takes effect.

use std::fmt;
use std::net::Ipv4Addr;

use super::ipset::IpsetTable;
use crate::config::IpsetNames;
use crate::topology::ResolvedTopology;
use crate::types::Mode;

/// Path of the ipset binary on the gateway
pub const IPSET_BIN: &str = "/usr/sbin/ipset";

/// Traffic selector of a NAT rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatMatch {
    /// Any protocol to a single address
    Destination(Ipv4Addr),
    /// TCP to a host and port; the host may be a name iptables resolves on load
    TcpDestinationPort { host: String, port: u16 },
    /// Any protocol to a member of an ipset
    Set(String),
    /// TCP to a member of an ipset
    TcpSet(String),
    /// Any TCP
    AnyTcp,
}

/// Action of a NAT rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatTarget {
    /// Leave the chain, traffic goes direct
    Return,
    /// Redirect to a local port
    Redirect(u16),
}

/// One logical NAT rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub matcher: NatMatch,
    pub target: NatTarget,
}

impl NatRule {
    pub fn new(matcher: NatMatch, target: NatTarget) -> Self {
        Self { matcher, target }
    }

    /// Check if this rule matches the probe
    pub fn matches(&self, probe: &Probe, sets: &IpsetTable) -> bool {
        let tcp = probe.transport == Transport::Tcp;
        match &self.matcher {
            NatMatch::Destination(ip) => probe.destination == *ip,
            NatMatch::TcpDestinationPort { host, port } => {
                tcp && probe.port == *port
                    && host.parse::<Ipv4Addr>().is_ok_and(|ip| ip == probe.destination)
            }
            NatMatch::Set(name) => sets.contains(name, probe.destination),
            NatMatch::TcpSet(name) => tcp && sets.contains(name, probe.destination),
            NatMatch::AnyTcp => tcp,
        }
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.matcher {
            NatMatch::Destination(ip) => write!(f, "-d {}", ip)?,
            NatMatch::TcpDestinationPort { host, port } => {
                write!(f, "-d {} -p tcp --dport {}", host, port)?
            }
            NatMatch::Set(name) => write!(f, "-m set --match-set {} dst", name)?,
            NatMatch::TcpSet(name) => write!(f, "-p tcp -m set --match-set {} dst", name)?,
            NatMatch::AnyTcp => f.write_str("-p tcp")?,
        }
        match self.target {
            NatTarget::Return => f.write_str(" -j RETURN"),
            NatTarget::Redirect(port) => write!(f, " -j REDIRECT --to-port {}", port),
        }
    }
}

/// Rules introduced by one comment line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatGroup {
    pub comment: &'static str,
    pub rules: Vec<NatRule>,
}

/// Transport protocol of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// A connection attempt to evaluate against the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub destination: Ipv4Addr,
    pub transport: Transport,
    pub port: u16,
}

impl Probe {
    pub fn tcp(destination: Ipv4Addr, port: u16) -> Self {
        Self {
            destination,
            transport: Transport::Tcp,
            port,
        }
    }

    pub fn udp(destination: Ipv4Addr, port: u16) -> Self {
        Self {
            destination,
            transport: Transport::Udp,
            port,
        }
    }
}

/// Outcome of evaluating a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A RETURN rule matched
    Bypass,
    /// A REDIRECT rule matched
    Redirect(u16),
    /// Nothing matched, traffic falls through untouched
    Unmatched,
}

/// Ordered NAT rules of one profile
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NatRuleSet {
    groups: Vec<NatGroup>,
}

impl NatRuleSet {
    pub fn groups(&self) -> &[NatGroup] {
        &self.groups
    }

    /// All rules in chain order
    pub fn rules(&self) -> impl Iterator<Item = &NatRule> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }

    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }

    /// First-match evaluation of a probe
    pub fn verdict(&self, probe: &Probe, sets: &IpsetTable) -> Verdict {
        for rule in self.rules() {
            if rule.matches(probe, sets) {
                return match rule.target {
                    NatTarget::Return => Verdict::Bypass,
                    NatTarget::Redirect(port) => Verdict::Redirect(port),
                };
            }
        }
        Verdict::Unmatched
    }

    fn push(&mut self, comment: &'static str, rules: Vec<NatRule>) {
        self.groups.push(NatGroup { comment, rules });
    }

    /// Render the groups as `iptables` commands.
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.groups.len() + self.rule_count() * 2);
        for group in &self.groups {
            lines.push(format!("# {}", group.comment));
            for rule in &group.rules {
                lines.push(format!("iptables -t nat -A PREROUTING {}", rule));
                lines.push(format!("iptables -t nat -A OUTPUT {}", rule));
            }
        }
        lines
    }
}

/// Plan the NAT rules of a topology.
///
/// `bypass_ips` are the resolved addresses of `topology.upstream_hosts`.
/// Mode `none` plans no rules at all.
pub fn plan_rules(
    topology: &ResolvedTopology,
    bypass_ips: &[Ipv4Addr],
    names: &IpsetNames,
) -> NatRuleSet {
    let mut set = NatRuleSet::default();
    if topology.mode == Mode::None {
        return set;
    }

    let port = topology.redirect_port;
    let redirect = NatTarget::Redirect(port);

    if let Some(ssh) = &topology.ssh_speedup {
        set.push(
            "speedup server ssh connection",
            vec![NatRule::new(
                NatMatch::TcpDestinationPort {
                    host: ssh.host.clone(),
                    port: ssh.port,
                },
                redirect,
            )],
        );
    }

    set.push(
        "bypass server ip",
        bypass_ips
            .iter()
            .map(|ip| NatRule::new(NatMatch::Destination(*ip), NatTarget::Return))
            .collect(),
    );

    set.push(
        "bypass lan networks",
        vec![NatRule::new(
            NatMatch::Set(names.lan_set_name.clone()),
            NatTarget::Return,
        )],
    );

    let route_blacklist = || {
        NatRule::new(NatMatch::TcpSet(names.black_set_name.clone()), redirect)
    };
    let bypass_whitelist = || {
        NatRule::new(NatMatch::Set(names.white_set_name.clone()), NatTarget::Return)
    };

    match topology.mode {
        Mode::Whitelist => {
            // blacklist before whitelist: an explicit blacklist entry wins
            set.push("route all blacklist traffic", vec![route_blacklist()]);
            set.push("bypass whitelist", vec![bypass_whitelist()]);
            set.push(
                "route all other traffic",
                vec![NatRule::new(NatMatch::AnyTcp, redirect)],
            );
        }
        Mode::Blacklist => {
            // whitelist before blacklist: an explicit whitelist entry wins
            set.push("bypass whitelist", vec![bypass_whitelist()]);
            set.push("route all blacklist traffic", vec![route_blacklist()]);
        }
        Mode::Global => {
            set.push(
                "route all traffic",
                vec![NatRule::new(NatMatch::AnyTcp, redirect)],
            );
        }
        Mode::None => {}
    }

    set
}

/// Render the firewall script: ipset restore preamble followed by the NAT rules.
pub fn render_iptables(
    mode: Mode,
    rules: &NatRuleSet,
    remote_cfg_dir: &str,
    ipset_fname: &str,
) -> String {
    let mut lines = vec![
        "# vrouter-rules".to_string(),
        format!("# workMode: {}", mode),
        "ipset flush".to_string(),
        format!(
            "{} restore -f -! {}/{} &> /dev/null",
            IPSET_BIN,
            remote_cfg_dir.trim_end_matches('/'),
            ipset_fname
        ),
    ];
    lines.extend(rules.render_lines());
    lines.join("\n")
}
