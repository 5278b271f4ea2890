use crate::lists::{ListLine, LoadedList};
use crate::types::Mode;

/// Sentinel written when traffic stays direct
pub const STAY_IN_WALL: &str = "# stay in wall";

/// Render the dnsmasq drop-in.
///
/// Each domain line becomes an `ipset=` directive, preceded by a `server=`
/// directive when the list carries a DNS server.
pub fn compile_dnsmasq(mode: Mode, lists: &[LoadedList]) -> String {
    if mode == Mode::None {
        return STAY_IN_WALL.to_string();
    }

    let mut lines = Vec::new();
    for list in lists {
        let entry = &list.entry;
        for line in list.lines() {
            let ListLine::Domain(domain) = line else {
                continue;
            };
            if let Some(server) = &entry.dns_server {
                lines.push(format!("server=/{}/{}", domain, server));
            }
            lines.push(format!("ipset=/{}/{}", domain, entry.ipset_name));
        }
    }

    lines.join("\n")
}
