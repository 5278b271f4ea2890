//! Artifact compilation.
//!
//! [`Compiler`] runs the whole pipeline for one profile: resolve the proxy
//! topology, collect and load the selected lists, resolve the proxy servers
//! to bypass, then render every artifact. Nothing is returned unless every
//! artifact compiled.

pub mod dnsmasq;
pub mod ipset;
pub mod iptables;
pub mod proxy_config;
pub mod service;

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::lists::{collect_lists, load_lists, ListLoader, LoadedList, ResolvedListEntry};
use crate::profile::Profile;
use crate::resolver::Resolver;
use crate::topology::{resolve_topology, ResolvedTopology};
use crate::types::Mode;

#[cfg(feature = "async")]
use crate::lists::{load_lists_async, AsyncListLoader};
#[cfg(feature = "async")]
use crate::resolver::AsyncResolver;

pub use dnsmasq::{compile_dnsmasq, STAY_IN_WALL};
pub use ipset::{compile_ipset, IpsetTable};
pub use iptables::{
    plan_rules, render_iptables, NatGroup, NatMatch, NatRule, NatRuleSet, NatTarget, Probe,
    Transport, Verdict,
};
pub use proxy_config::{proxy_configs, ProxyConfigFile};
pub use service::{service_descriptors, watchdog_script, ServiceDescriptor};

/// A rendered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedArtifact {
    pub file_name: String,
    pub content: String,
}

impl NamedArtifact {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// Every artifact of one profile
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub topology: ResolvedTopology,
    pub ipset: NamedArtifact,
    pub dnsmasq: NamedArtifact,
    pub iptables: NamedArtifact,
    /// One init script per active role
    pub services: Vec<NamedArtifact>,
    pub watchdog: NamedArtifact,
    /// One client config per active role
    pub proxy_configs: Vec<NamedArtifact>,
    /// NAT rules behind the iptables artifact
    pub rules: NatRuleSet,
    /// Sets behind the ipset artifact
    pub sets: IpsetTable,
}

impl Artifacts {
    /// All files in a stable order
    pub fn files(&self) -> impl Iterator<Item = &NamedArtifact> {
        [&self.ipset, &self.dnsmasq, &self.iptables]
            .into_iter()
            .chain(self.services.iter())
            .chain(std::iter::once(&self.watchdog))
            .chain(self.proxy_configs.iter())
    }

    /// Where a probe ends up under the compiled rules
    pub fn verdict(&self, probe: &Probe) -> Verdict {
        self.rules.verdict(probe, &self.sets)
    }

    /// Write every file into `dir`, creating it if needed.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for artifact in self.files() {
            let path = dir.join(&artifact.file_name);
            fs::write(&path, &artifact.content)?;
            written.push(path);
        }
        debug!("Wrote {} artifacts to {:?}", written.len(), dir);
        Ok(written)
    }
}

/// Profile compiler
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: GeneratorConfig,
}

impl Compiler {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Resolve the topology of a profile
    pub fn topology(&self, profile: &Profile) -> Result<ResolvedTopology> {
        resolve_topology(profile, &self.config.proxies_info)
    }

    /// Resolve the lists a profile selects
    pub fn lists(
        &self,
        profile: &Profile,
        topology: &ResolvedTopology,
    ) -> Result<Vec<ResolvedListEntry>> {
        collect_lists(
            &profile.selected_bl,
            &profile.selected_wl,
            &self.config.firewall_info,
            &self.config.list_dir,
            topology.list_dns_server.as_deref(),
        )
    }

    /// Compile every artifact of a profile.
    pub fn compile(
        &self,
        profile: &Profile,
        loader: &dyn ListLoader,
        resolver: &dyn Resolver,
    ) -> Result<Artifacts> {
        let topology = self.topology(profile)?;
        let entries = self.lists(profile, &topology)?;
        let lists = load_lists(entries, loader)?;
        let bypass_ips = if topology.mode == Mode::None {
            Vec::new()
        } else {
            topology.resolve_bypass_ips(resolver)?
        };
        self.assemble(topology, &lists, &bypass_ips)
    }

    /// Compile every artifact of a profile, loading lists and resolving proxy
    /// servers concurrently.
    #[cfg(feature = "async")]
    pub async fn compile_async(
        &self,
        profile: &Profile,
        loader: &dyn AsyncListLoader,
        resolver: &dyn AsyncResolver,
    ) -> Result<Artifacts> {
        let topology = self.topology(profile)?;
        let entries = self.lists(profile, &topology)?;

        let resolve = async {
            if topology.mode == Mode::None {
                Ok(Vec::new())
            } else {
                topology.resolve_bypass_ips_async(resolver).await
            }
        };
        let (lists, bypass_ips) = tokio::join!(load_lists_async(entries, loader), resolve);
        let (lists, bypass_ips) = (lists?, bypass_ips?);

        self.assemble(topology, &lists, &bypass_ips)
    }

    fn assemble(
        &self,
        topology: ResolvedTopology,
        lists: &[LoadedList],
        bypass_ips: &[Ipv4Addr],
    ) -> Result<Artifacts> {
        let firewall = &self.config.firewall_info;
        let remote_dir = self.config.remote_cfg_dir.as_str();

        let ipset = NamedArtifact::new(&firewall.ipset_fname, compile_ipset(lists));
        let dnsmasq = NamedArtifact::new(
            &firewall.dnsmasq_fname,
            compile_dnsmasq(topology.mode, lists),
        );

        let rules = plan_rules(&topology, bypass_ips, &firewall.ipset);
        let iptables = NamedArtifact::new(
            &firewall.firewall_fname,
            render_iptables(topology.mode, &rules, remote_dir, &firewall.ipset_fname),
        );

        let services = service_descriptors(&topology, remote_dir)
            .into_iter()
            .map(|d| NamedArtifact::new(d.service_name, d.content))
            .collect();
        let watchdog = NamedArtifact::new(&self.config.watchdog_fname, watchdog_script(&topology));

        let mut configs = Vec::new();
        for file in proxy_configs(&topology) {
            let content = file.to_json_pretty()?;
            configs.push(NamedArtifact::new(file.cfg_name, content));
        }

        let sets = IpsetTable::from_lists(lists);

        info!(
            "Compiled {} profile: mode={}, {} lists, {} nat rules, {} services",
            topology.stack,
            topology.mode,
            lists.len(),
            rules.rule_count(),
            topology.services.len()
        );

        Ok(Artifacts {
            topology,
            ipset,
            dnsmasq,
            iptables,
            services,
            watchdog,
            proxy_configs: configs,
            rules,
            sets,
        })
    }
}
