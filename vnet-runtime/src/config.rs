use crate::arp::ResolverConfig;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything a router needs besides its interfaces and a `FrameSender`.
///
/// Without a route table file the router routes only to its directly connected subnets.
/// Without an ARP cache file the cache starts empty.
#[derive(Clone, Debug, Default)]
pub struct RouterConfig {
    pub route_table: Option<PathBuf>,
    pub arp_cache: Option<PathBuf>,
    pub resolver: ResolverConfig,
}

impl RouterConfig {
    pub fn new() -> Self {
        RouterConfig::default()
    }

    pub fn with_route_table<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.route_table = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_arp_cache<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.arp_cache = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

/// Failures while building a device from its static configuration.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{}:{line}: no interface named {name}", path.display())]
    UnknownInterface {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{}:{line}: mask {mask} is not contiguous", path.display())]
    NonContiguousMask {
        path: PathBuf,
        line: usize,
        mask: Ipv4Addr,
    },

    #[error("interface {name} has non-contiguous mask {mask}")]
    InterfaceMask { name: String, mask: Ipv4Addr },

    #[error("a router must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl InitError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        InitError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse<S: Into<String>>(path: &Path, line: usize, reason: S) -> Self {
        InitError::Parse {
            path: path.to_path_buf(),
            line,
            reason: reason.into(),
        }
    }
}

/// Splits a config file into its meaningful lines, numbered from 1. Blank lines and
/// `#` comments are skipped.
pub(crate) fn config_lines(contents: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| (number, line.split_whitespace().collect()))
}

pub(crate) fn parse_ipv4(path: &Path, line: usize, field: &str) -> Result<Ipv4Addr, InitError> {
    field
        .parse()
        .map_err(|_| InitError::parse(path, line, format!("invalid IPv4 address {:?}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lines_skip_blanks_and_comments() {
        let contents = "# routes\n\n10.0.1.0 0.0.0.0 255.255.255.0 eth0\n   \n1 2\n";
        let lines: Vec<_> = config_lines(contents).collect();
        assert_eq!(
            lines,
            vec![
                (3, vec!["10.0.1.0", "0.0.0.0", "255.255.255.0", "eth0"]),
                (5, vec!["1", "2"]),
            ]
        );
    }

    #[test]
    fn error_messages_name_the_line() {
        let err = InitError::parse(Path::new("rtable"), 4, "expected 4 fields");
        assert_eq!(err.to_string(), "rtable:4: expected 4 fields");

        let err = InitError::NonContiguousMask {
            path: PathBuf::from("rtable"),
            line: 2,
            mask: Ipv4Addr::new(255, 0, 255, 0),
        };
        assert_eq!(err.to_string(), "rtable:2: mask 255.0.255.0 is not contiguous");
    }

    #[test]
    fn builder() {
        let config = RouterConfig::new()
            .with_route_table("rtable.txt")
            .with_arp_cache("arp_cache.txt");
        assert_eq!(config.route_table, Some(PathBuf::from("rtable.txt")));
        assert_eq!(config.arp_cache, Some(PathBuf::from("arp_cache.txt")));
        assert_eq!(config.resolver, ResolverConfig::default());
    }
}
