use crate::topology::{ResolvedTopology, ServiceSpec};
use crate::types::Role;

/// Init script of one proxy process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub role: Role,
    /// File name under `/etc/init.d`
    pub service_name: String,
    pub content: String,
}

/// OpenWrt init script that runs `spec`'s binary with its config.
pub fn init_script(spec: &ServiceSpec, remote_cfg_dir: &str) -> String {
    let bin_path = spec.bin_path();
    format!(
        "#!/bin/sh /etc/rc.common\n\
         # Copyright (C) 2006-2011 OpenWrt.org\n\
         START=95\n\
         SERVICE_USE_PID=1\n\
         SERVICE_WRITE_PID=1\n\
         SERVICE_DAEMONIZE=1\n\
         start() {{\n    service_start {} -c {}\n}}\n\
         stop() {{\n    service_stop {}\n}}\n",
        bin_path,
        spec.cfg_path(remote_cfg_dir),
        bin_path
    )
}

/// Init scripts of every active role, in emission order.
pub fn service_descriptors(topology: &ResolvedTopology, remote_cfg_dir: &str) -> Vec<ServiceDescriptor> {
    topology
        .services
        .iter()
        .map(|spec| ServiceDescriptor {
            role: spec.role,
            service_name: spec.service_name.clone(),
            content: init_script(spec, remote_cfg_dir),
        })
        .collect()
}

/// Shell check that restarts a service whose process is gone.
///
/// The `-[c]` bracket keeps the grep from matching its own command line.
pub fn watchdog_check(spec: &ServiceSpec) -> String {
    format!(
        "output=$(ps -w | grep \"{} -[c] .*{}\")\n\
         if [ -z \"$output\" ]; then\n    /etc/init.d/{} restart\nfi",
        spec.bin_name, spec.cfg_name, spec.service_name
    )
}

/// Watchdog script covering every active role.
pub fn watchdog_script(topology: &ResolvedTopology) -> String {
    let mut parts = vec!["#!/bin/sh".to_string()];
    parts.extend(topology.services.iter().map(watchdog_check));
    parts.join("\n")
}
