//! Connection authorization.
//!
//! A remote address may connect when it is on a private or loopback
//! network, or when its exact `ip:port` pair is on the allow-list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Decides whether a remote address may connect.
pub trait Authorizer: Send + Sync {
    /// Check a remote address.
    fn authorized(&self, addr: SocketAddr) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(SocketAddr) -> bool + Send + Sync,
{
    fn authorized(&self, addr: SocketAddr) -> bool {
        self(addr)
    }
}

/// Check whether an address belongs to a private, link-local or loopback network.
///
/// IPv4-mapped IPv6 addresses are checked as their IPv4 form.
#[must_use]
pub fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let head = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (head & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (head & 0xffc0) == 0xfe80
        }
    }
}

/// Allow-list parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid allow-list entry {0:?}: expected ip:port")]
pub struct AllowEntryError(pub String);

/// One allowed `ip:port` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AllowEntry {
    pub ip: IpAddr,
    pub port: u16,
}

impl AllowEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
        }
    }
}

impl FromStr for AllowEntry {
    type Err = AllowEntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s
            .trim()
            .parse()
            .map_err(|_| AllowEntryError(s.to_string()))?;
        Ok(Self::new(addr.ip(), addr.port()))
    }
}

impl TryFrom<String> for AllowEntry {
    type Error = AllowEntryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AllowEntry> for String {
    fn from(entry: AllowEntry) -> String {
        entry.to_string()
    }
}

impl fmt::Display for AllowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

/// Explicitly allowed remote addresses, on top of private networks.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashSet<AllowEntry>,
}

impl AllowList {
    /// Create an empty allow-list (private networks only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list such as `"127.0.0.1:27115, 62.226.205.78:27015"`.
    ///
    /// Empty items are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error for the first item that is not an `ip:port` pair.
    pub fn parse_list(list: &str) -> Result<Self, AllowEntryError> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse::<AllowEntry>)
            .collect()
    }

    /// Check whether the exact `ip:port` pair is listed.
    #[must_use]
    pub fn contains(&self, ip: IpAddr, port: u16) -> bool {
        self.entries.contains(&AllowEntry::new(ip, port))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the allow-list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<AllowEntry> for AllowList {
    fn from_iter<I: IntoIterator<Item = AllowEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AllowList {
    type Item = AllowEntry;
    type IntoIter = std::collections::hash_set::IntoIter<AllowEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Authorizer for AllowList {
    fn authorized(&self, addr: SocketAddr) -> bool {
        is_private_or_loopback(addr.ip()) || self.contains(addr.ip(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ranges() {
        for private in [
            "10.1.2.3",
            "192.168.0.10",
            "172.16.0.1",
            "172.31.255.255",
            "127.0.0.1",
            "169.254.1.1",
            "::1",
            "::",
            "fd12:3456::1",
            "fc00::1",
            "fe80::1",
            "::ffff:192.168.1.1",
        ] {
            assert!(is_private_or_loopback(ip(private)), "{private}");
        }

        for public in ["8.8.8.8", "172.32.0.1", "62.226.205.78", "2001:db8::1", "::ffff:8.8.8.8"] {
            assert!(!is_private_or_loopback(ip(public)), "{public}");
        }
    }

    #[test]
    fn test_parse_list() {
        let list = AllowList::parse_list("127.0.0.1:27115, 62.226.205.78:27015,,[2001:db8::1]:80")
            .unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.contains(ip("62.226.205.78"), 27015));
        assert!(list.contains(ip("2001:db8::1"), 80));

        assert!(AllowList::parse_list("").unwrap().is_empty());
        assert_eq!(
            AllowList::parse_list("1.2.3.4").unwrap_err(),
            AllowEntryError("1.2.3.4".to_string())
        );
        assert!(AllowList::parse_list("1.2.3.4:http").is_err());
    }

    #[test]
    fn test_authorized() {
        let list = AllowList::parse_list("62.226.205.78:27015").unwrap();

        assert!(list.authorized("10.0.0.1:5000".parse().unwrap()));
        assert!(list.authorized("62.226.205.78:27015".parse().unwrap()));
        assert!(list.authorized("[::ffff:62.226.205.78]:27015".parse().unwrap()));
        assert!(!list.authorized("62.226.205.78:27016".parse().unwrap()));
        assert!(!list.authorized("8.8.8.8:27015".parse().unwrap()));
    }

    #[test]
    fn test_closure_authorizer() {
        let deny_all = |_: SocketAddr| false;
        assert!(!deny_all.authorized("127.0.0.1:1".parse().unwrap()));
    }

    #[test]
    fn test_entry_display() {
        let entry = AllowEntry::try_from(" 1.2.3.4:5 ".to_string()).unwrap();
        assert_eq!(entry.to_string(), "1.2.3.4:5");
        assert_eq!(String::from(entry), "1.2.3.4:5");
    }
}
