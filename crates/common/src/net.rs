//! IP canonicalisation and CIDR set membership.

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use tracing::warn;

/// Canonicalise an address string: strip a trailing port, unwrap
/// bracketed IPv6, and compress via the parsed representation. Strings
/// that do not parse as an address are passed through trimmed, so
/// placeholder values like "unknown" survive.
pub fn normalize_ip(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    // "[2001:db8::1]:443" -> "2001:db8::1"
    let s = if let Some(rest) = s.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        s
    };
    if let Ok(ip) = IpAddr::from_str(s) {
        return Some(ip.to_string());
    }
    // "1.2.3.4:80" -> "1.2.3.4"; a single colon cannot be bare IPv6
    if s.matches(':').count() == 1 {
        if let Some((host, _port)) = s.split_once(':') {
            if let Ok(ip) = IpAddr::from_str(host) {
                return Some(ip.to_string());
            }
            return Some(host.to_string());
        }
    }
    Some(s.to_string())
}

/// A parsed set of CIDR blocks with membership tests on string addresses.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    nets: Vec<IpNetwork>,
}

impl CidrSet {
    /// Parse a comma-separated CIDR list. Entries that fail to parse are
    /// skipped with a warning rather than failing the whole set.
    pub fn parse(list: &str) -> Self {
        let mut nets = Vec::new();
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<IpNetwork>() {
                Ok(net) => nets.push(net),
                Err(e) => warn!("ignoring unparseable CIDR {part:?}: {e}"),
            }
        }
        CidrSet { nets }
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// True when the string parses as an address inside any block.
    /// Unparseable addresses are never members.
    pub fn contains(&self, ip: &str) -> bool {
        let Ok(addr) = IpAddr::from_str(ip) else {
            return false;
        };
        self.nets.iter().any(|net| net.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_port() {
        assert_eq!(normalize_ip("192.168.1.1:80"), Some("192.168.1.1".into()));
        assert_eq!(normalize_ip("1.2.3.4"), Some("1.2.3.4".into()));
    }

    #[test]
    fn test_normalize_compresses_ipv6() {
        assert_eq!(
            normalize_ip("2001:0db8:0000:0000:0000:0000:0000:0001"),
            Some("2001:db8::1".into())
        );
        assert_eq!(normalize_ip("[2001:db8::1]:443"), Some("2001:db8::1".into()));
    }

    #[test]
    fn test_normalize_passthrough() {
        assert_eq!(normalize_ip(" unknown "), Some("unknown".into()));
        assert_eq!(normalize_ip(""), None);
    }

    #[test]
    fn test_cidr_membership() {
        let set = CidrSet::parse("10.0.0.0/8, 192.168.0.0/16");
        assert!(set.contains("10.1.2.3"));
        assert!(set.contains("192.168.44.1"));
        assert!(!set.contains("192.169.0.1"));
        assert!(!set.contains("8.8.8.8"));
        assert!(!set.contains("not-an-ip"));
    }

    #[test]
    fn test_cidr_skips_bad_entries() {
        let set = CidrSet::parse("10.0.0.0/8, bogus, ");
        assert!(set.contains("10.0.0.1"));
        assert!(!set.contains("11.0.0.1"));
    }
}
