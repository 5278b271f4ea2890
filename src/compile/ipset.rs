use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::lists::{ipset_names, ListLine, LoadedList};

/// Render the ipset restore file.
///
/// One `create` line per distinct set in first-seen order, then one `add`
/// line per network entry of each list in list order.
pub fn compile_ipset(lists: &[LoadedList]) -> String {
    let mut lines: Vec<String> = ipset_names(lists.iter().map(|l| &l.entry))
        .into_iter()
        .map(create_line)
        .collect();

    for list in lists {
        for line in list.lines() {
            if let ListLine::Network(network) = line {
                lines.push(format!("add {} {}", list.entry.ipset_name, network));
            }
        }
    }

    lines.join("\n")
}

fn create_line(name: &str) -> String {
    format!(
        "create {} hash:net family inet hashsize 1024 maxelem 65536 -exist",
        name
    )
}

/// In-memory view of the ipsets a restore file would populate
#[derive(Debug, Clone, Default)]
pub struct IpsetTable {
    sets: HashMap<String, Vec<Ipv4Net>>,
}

impl IpsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from loaded lists.
    ///
    /// Every referenced set exists, even if empty. Network lines the kernel
    /// would reject (octet or prefix out of range) are left out.
    pub fn from_lists(lists: &[LoadedList]) -> Self {
        let mut table = Self::new();
        for list in lists {
            table.ensure(&list.entry.ipset_name);
            for line in list.lines() {
                if let ListLine::Network(network) = line {
                    if let Some(net) = parse_network(network) {
                        table.insert(&list.entry.ipset_name, net);
                    }
                }
            }
        }
        table
    }

    /// Create an empty set if it does not exist yet.
    pub fn ensure(&mut self, name: &str) {
        self.sets.entry(name.to_string()).or_default();
    }

    pub fn insert(&mut self, name: &str, net: Ipv4Net) {
        self.sets.entry(name.to_string()).or_default().push(net);
    }

    pub fn has_set(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    /// Whether the set contains the address. Unknown sets contain nothing.
    pub fn contains(&self, name: &str, ip: Ipv4Addr) -> bool {
        self.sets
            .get(name)
            .is_some_and(|nets| nets.iter().any(|net| net.contains(&ip)))
    }
}

fn parse_network(network: &str) -> Option<Ipv4Net> {
    if network.contains('/') {
        return network.parse::<Ipv4Net>().ok();
    }
    let ip = network.parse::<Ipv4Addr>().ok()?;
    Ipv4Net::new(ip, 32).ok()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::lists::ResolvedListEntry;

    fn loaded(set: &str, text: &str) -> LoadedList {
        LoadedList {
            entry: ResolvedListEntry {
                path: PathBuf::from(format!("/lists/{}.txt", set.to_lowercase())),
                dns_server: None,
                ipset_name: set.to_string(),
            },
            text: text.to_string(),
        }
    }

    #[test]
    fn test_compile_ipset() {
        let lists = vec![
            loaded("BLACKLIST", "# gfw\n1.2.3.0/24\nexample.com\n\n5.6.7.8\n"),
            loaded("WHITELIST", "10.0.0.0/8\nbaidu.com"),
        ];
        let out = compile_ipset(&lists);
        assert_eq!(
            out,
            "create BLACKLIST hash:net family inet hashsize 1024 maxelem 65536 -exist\n\
             create WHITELIST hash:net family inet hashsize 1024 maxelem 65536 -exist\n\
             add BLACKLIST 1.2.3.0/24\n\
             add BLACKLIST 5.6.7.8\n\
             add WHITELIST 10.0.0.0/8"
        );
    }

    #[test]
    fn test_compile_ipset_dedups_create() {
        let lists = vec![
            loaded("WHITELIST", "1.1.1.1"),
            loaded("LAN", "192.168.0.0/16"),
            loaded("WHITELIST", "2.2.2.2"),
        ];
        let out = compile_ipset(&lists);
        assert_eq!(out.matches("create WHITELIST").count(), 1);
        assert!(out.lines().nth(1).unwrap().starts_with("create LAN"));
    }

    #[test]
    fn test_compile_ipset_skips_non_ascii_digit_lines() {
        let lists = vec![loaded("BLACKLIST", "\u{661}.\u{662}.\u{663}.\u{664}\n5.6.7.8\n")];
        let out = compile_ipset(&lists);
        assert_eq!(
            out,
            "create BLACKLIST hash:net family inet hashsize 1024 maxelem 65536 -exist\n\
             add BLACKLIST 5.6.7.8"
        );
        let table = IpsetTable::from_lists(&lists);
        assert!(table.contains("BLACKLIST", Ipv4Addr::new(5, 6, 7, 8)));
    }

    #[test]
    fn test_compile_ipset_no_lists() {
        assert_eq!(compile_ipset(&[]), "");
    }

    #[test]
    fn test_ipset_table_contains() {
        let lists = vec![
            loaded("BLACKLIST", "1.2.3.0/24\nexample.com\n999.1.1.1\n"),
            loaded("WHITELIST", ""),
        ];
        let table = IpsetTable::from_lists(&lists);
        assert!(table.contains("BLACKLIST", Ipv4Addr::new(1, 2, 3, 200)));
        assert!(!table.contains("BLACKLIST", Ipv4Addr::new(1, 2, 4, 1)));
        assert!(table.has_set("WHITELIST"));
        assert!(!table.contains("WHITELIST", Ipv4Addr::new(1, 2, 3, 1)));
        assert!(!table.contains("LAN", Ipv4Addr::new(1, 2, 3, 1)));
    }

    #[test]
    fn test_parse_network() {
        assert_eq!(
            parse_network("5.6.7.8"),
            Some("5.6.7.8/32".parse().unwrap())
        );
        assert!(parse_network("1.2.3.0/33").is_none());
        assert!(parse_network("256.0.0.1").is_none());
    }
}
