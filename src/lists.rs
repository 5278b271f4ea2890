//! List collection and loading.
//!
//! Selected black/white/LAN list identifiers are mapped to the file backing
//! them and the ipset their entries populate. List files mix IPv4 networks
//! (fed to ipset) with domain names (fed to dnsmasq), one per line.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::{FirewallInfo, LAN_NETWORKS_ID};
use crate::error::{Result, RuleError};

#[cfg(feature = "async")]
use async_trait::async_trait;
#[cfg(feature = "async")]
use futures_util::future::join_all;

/// Dotted-quad IPv4 address with an optional prefix length, ASCII digits only
static NETWORK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+(/[0-9]+)?$")
        .expect("NETWORK_PATTERN: hardcoded regex is invalid")
});

/// One usable line of a list file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListLine<'a> {
    /// IPv4 address or CIDR
    Network(&'a str),
    /// Anything else, treated as a domain name
    Domain(&'a str),
}

impl<'a> ListLine<'a> {
    /// Classify a single raw line. Blank lines and `#` comments yield `None`.
    pub fn classify(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        if NETWORK_PATTERN.is_match(line) {
            Some(ListLine::Network(line))
        } else {
            Some(ListLine::Domain(line))
        }
    }
}

/// Iterate the usable lines of a list file.
pub fn list_lines(text: &str) -> impl Iterator<Item = ListLine<'_>> {
    text.lines().filter_map(ListLine::classify)
}

/// A selected list resolved to its file and target ipset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedListEntry {
    pub path: PathBuf,
    /// DNS server domains of this list are resolved through
    pub dns_server: Option<String>,
    pub ipset_name: String,
}

/// Resolve the selected lists, blacklists first, each in declaration order.
///
/// Identifiers explicitly set to `false` are skipped. `lanNetworks` feeds the
/// LAN set; every other whitelist identifier feeds the whitelist set.
pub fn collect_lists(
    selected_bl: &IndexMap<String, bool>,
    selected_wl: &IndexMap<String, bool>,
    firewall: &FirewallInfo,
    base_dir: &Path,
    dns_server: Option<&str>,
) -> Result<Vec<ResolvedListEntry>> {
    let names = &firewall.ipset;
    let mut entries = Vec::with_capacity(selected_bl.len() + selected_wl.len());

    let blacklists = selected_bl
        .iter()
        .filter(|(_, on)| **on)
        .map(|(id, _)| (id, &names.black_set_name));
    let whitelists = selected_wl.iter().filter(|(_, on)| **on).map(|(id, _)| {
        if id == LAN_NETWORKS_ID {
            (id, &names.lan_set_name)
        } else {
            (id, &names.white_set_name)
        }
    });

    for (id, ipset_name) in blacklists.chain(whitelists) {
        let fname = firewall
            .list_file(id)
            .ok_or_else(|| RuleError::invalid_profile(format!("unknown list identifier: {}", id)))?;
        let entry = ResolvedListEntry {
            path: base_dir.join(fname),
            dns_server: dns_server.map(str::to_string),
            ipset_name: ipset_name.clone(),
        };
        debug!("List {} -> {:?} ({})", id, entry.path, entry.ipset_name);
        entries.push(entry);
    }

    Ok(entries)
}

/// Distinct ipset names of the entries, in first-seen order.
pub fn ipset_names<'a>(entries: impl IntoIterator<Item = &'a ResolvedListEntry>) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::new();
    for entry in entries {
        if !names.contains(&entry.ipset_name.as_str()) {
            names.push(&entry.ipset_name);
        }
    }
    names
}

/// Source of raw list file contents
pub trait ListLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<String>;
}

/// Reads list files from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileListLoader;

impl FileListLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ListLoader for FileListLoader {
    fn load(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| RuleError::ListFileUnavailable {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// In-memory list contents keyed by path
#[derive(Debug, Default, Clone)]
pub struct MemoryListLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryListLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.files.insert(path.as_ref().to_path_buf(), contents.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.add(path, contents);
        self
    }
}

impl ListLoader for MemoryListLoader {
    fn load(&self, path: &Path) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RuleError::ListFileUnavailable {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not loaded"),
            })
    }
}

/// A resolved list together with its raw contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedList {
    pub entry: ResolvedListEntry,
    pub text: String,
}

impl LoadedList {
    pub fn lines(&self) -> impl Iterator<Item = ListLine<'_>> {
        list_lines(&self.text)
    }
}

/// Load every entry; the first unavailable file aborts.
pub fn load_lists(entries: Vec<ResolvedListEntry>, loader: &dyn ListLoader) -> Result<Vec<LoadedList>> {
    entries
        .into_iter()
        .map(|entry| {
            let text = loader.load(&entry.path)?;
            Ok(LoadedList { entry, text })
        })
        .collect()
}

/// Async source of raw list file contents
#[cfg(feature = "async")]
#[async_trait]
pub trait AsyncListLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<String>;
}

#[cfg(feature = "async")]
#[async_trait]
impl AsyncListLoader for FileListLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RuleError::ListFileUnavailable {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(feature = "async")]
#[async_trait]
impl AsyncListLoader for MemoryListLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        ListLoader::load(self, path)
    }
}

/// Load every entry concurrently, keeping entry order.
///
/// When several files are unavailable the error of the first entry is
/// returned, as with [`load_lists`].
#[cfg(feature = "async")]
pub async fn load_lists_async(
    entries: Vec<ResolvedListEntry>,
    loader: &dyn AsyncListLoader,
) -> Result<Vec<LoadedList>> {
    let texts = join_all(entries.iter().map(|entry| loader.load(&entry.path))).await;

    entries
        .into_iter()
        .zip(texts)
        .map(|(entry, text)| Ok(LoadedList { entry, text: text? }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(pairs: &[(&str, bool)]) -> IndexMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_network_pattern_regex_compiles() {
        assert!(NETWORK_PATTERN.is_match("10.0.0.0/8"));
    }

    #[test]
    fn test_classify_lines() {
        assert_eq!(ListLine::classify("1.2.3.4"), Some(ListLine::Network("1.2.3.4")));
        assert_eq!(
            ListLine::classify("  1.2.3.0/24\r"),
            Some(ListLine::Network("1.2.3.0/24"))
        );
        assert_eq!(
            ListLine::classify("example.com"),
            Some(ListLine::Domain("example.com"))
        );
        assert_eq!(ListLine::classify("# comment"), None);
        assert_eq!(ListLine::classify("   "), None);
    }

    #[test]
    fn test_classify_non_network_shapes_are_domains() {
        // Anything not shaped like a dotted quad goes to dnsmasq
        assert!(matches!(ListLine::classify("1.2.3"), Some(ListLine::Domain(_))));
        assert!(matches!(ListLine::classify("2001:db8::/32"), Some(ListLine::Domain(_))));
        assert!(matches!(ListLine::classify("1.2.3.4/"), Some(ListLine::Domain(_))));
    }

    #[test]
    fn test_classify_non_ascii_digits_are_domains() {
        // Arabic-Indic digits look like a dotted quad to a Unicode \d
        assert_eq!(
            ListLine::classify("\u{661}.\u{662}.\u{663}.\u{664}"),
            Some(ListLine::Domain("\u{661}.\u{662}.\u{663}.\u{664}"))
        );
        assert_eq!(
            ListLine::classify("1.2.3.0/\u{662}\u{664}"),
            Some(ListLine::Domain("1.2.3.0/\u{662}\u{664}"))
        );
    }

    #[test]
    fn test_collect_lists_order_and_sets() {
        let firewall = FirewallInfo::default();
        let bl = selection(&[("gfwList", true), ("extraBlackList", false)]);
        let wl = selection(&[("extraWhiteList", true), ("lanNetworks", true), ("chinaIPs", true)]);

        let entries =
            collect_lists(&bl, &wl, &firewall, Path::new("/lists"), Some("127.0.0.1#1030")).unwrap();

        let got: Vec<(&Path, &str)> = entries
            .iter()
            .map(|e| (e.path.as_path(), e.ipset_name.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (Path::new("/lists/gfwlist.txt"), "BLACKLIST"),
                (Path::new("/lists/extra_whitelist.txt"), "WHITELIST"),
                (Path::new("/lists/lan_networks.txt"), "LAN"),
                (Path::new("/lists/chinaIPs.txt"), "WHITELIST"),
            ]
        );
        assert!(entries
            .iter()
            .all(|e| e.dns_server.as_deref() == Some("127.0.0.1#1030")));
    }

    #[test]
    fn test_collect_lists_unknown_identifier() {
        let firewall = FirewallInfo::default();
        let bl = selection(&[("myList", true)]);
        let err = collect_lists(&bl, &IndexMap::new(), &firewall, Path::new("."), None).unwrap_err();
        assert!(matches!(err, RuleError::InvalidProfile(_)));
    }

    #[test]
    fn test_collect_lists_skips_unknown_when_disabled() {
        let firewall = FirewallInfo::default();
        let bl = selection(&[("myList", false)]);
        let entries = collect_lists(&bl, &IndexMap::new(), &firewall, Path::new("."), None).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_ipset_names_first_seen() {
        let firewall = FirewallInfo::default();
        let bl = selection(&[("gfwList", true), ("extraBlackList", true)]);
        let wl = selection(&[("lanNetworks", true), ("chinaIPs", true), ("extraWhiteList", true)]);
        let entries = collect_lists(&bl, &wl, &firewall, Path::new("."), None).unwrap();
        assert_eq!(ipset_names(&entries), vec!["BLACKLIST", "LAN", "WHITELIST"]);
    }

    #[test]
    fn test_load_lists_memory() {
        let firewall = FirewallInfo::default();
        let bl = selection(&[("gfwList", true)]);
        let entries = collect_lists(&bl, &IndexMap::new(), &firewall, Path::new("/l"), None).unwrap();
        let loader = MemoryListLoader::new().with_file("/l/gfwlist.txt", "a.com\n1.1.1.1\n");
        let loaded = load_lists(entries, &loader).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].lines().collect::<Vec<_>>(),
            vec![ListLine::Domain("a.com"), ListLine::Network("1.1.1.1")]
        );
    }

    #[test]
    fn test_load_lists_missing_file() {
        let entries = vec![ResolvedListEntry {
            path: PathBuf::from("/nonexistent/list.txt"),
            dns_server: None,
            ipset_name: "BLACKLIST".to_string(),
        }];
        let err = load_lists(entries, &FileListLoader::new()).unwrap_err();
        assert!(matches!(err, RuleError::ListFileUnavailable { .. }));
    }
}

#[cfg(all(test, feature = "async"))]
mod async_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_lists_async_keeps_order() {
        let dir = std::env::temp_dir().join("vrouter_rules_lists_async");
        let _ = fs::create_dir_all(&dir);
        let names = ["a.txt", "b.txt", "c.txt"];
        for (i, name) in names.iter().enumerate() {
            fs::write(dir.join(name), format!("{}.example.com\n", i)).unwrap();
        }

        let entries: Vec<ResolvedListEntry> = names
            .iter()
            .map(|name| ResolvedListEntry {
                path: dir.join(name),
                dns_server: None,
                ipset_name: "WHITELIST".to_string(),
            })
            .collect();

        let loaded = load_lists_async(entries, &FileListLoader::new()).await.unwrap();
        let texts: Vec<&str> = loaded.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["0.example.com\n", "1.example.com\n", "2.example.com\n"]
        );

        for name in names {
            let _ = fs::remove_file(dir.join(name));
        }
        let _ = fs::remove_dir(&dir);
    }

    #[tokio::test]
    async fn test_load_lists_async_missing_file() {
        let entries = vec![ResolvedListEntry {
            path: PathBuf::from("/nonexistent/async-list.txt"),
            dns_server: None,
            ipset_name: "BLACKLIST".to_string(),
        }];
        let err = load_lists_async(entries, &FileListLoader::new()).await.unwrap_err();
        assert!(matches!(err, RuleError::ListFileUnavailable { .. }));
    }

    fn entry(path: &str) -> ResolvedListEntry {
        ResolvedListEntry {
            path: PathBuf::from(path),
            dns_server: None,
            ipset_name: "BLACKLIST".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_lists_async_reports_first_missing_entry() {
        let loader = MemoryListLoader::new().with_file("/l/present.txt", "a.com\n");
        let entries = vec![
            entry("/l/present.txt"),
            entry("/l/first-missing.txt"),
            entry("/l/second-missing.txt"),
        ];
        for _ in 0..8 {
            let err = load_lists_async(entries.clone(), &loader).await.unwrap_err();
            match err {
                RuleError::ListFileUnavailable { path, .. } => {
                    assert_eq!(path, PathBuf::from("/l/first-missing.txt"))
                }
                other => panic!("expected ListFileUnavailable, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_memory_loader_async() {
        let loader = MemoryListLoader::new().with_file("/l/a.txt", "1.2.3.4\n");
        let loaded = load_lists_async(vec![entry("/l/a.txt")], &loader).await.unwrap();
        assert_eq!(loaded[0].text, "1.2.3.4\n");
    }
}
