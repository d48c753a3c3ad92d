//! The source-address allow list for TCP clients.

use std::net::IpAddr;
use std::str::FromStr;

/// One allow-list entry: an address plus a prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    addr: IpAddr,
    prefix: u8,
}

impl Entry {
    fn matches(&self, candidate: IpAddr) -> bool {
        match (self.addr, candidate) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let bits = u32::from(net) ^ u32::from(addr);
                self.prefix == 0 || bits >> (32 - self.prefix.min(32)) == 0
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let bits = u128::from(net) ^ u128::from(addr);
                self.prefix == 0 || bits >> (128 - self.prefix.min(128) as u32) == 0
            }
            _ => false,
        }
    }
}

/// A parsed `auth-ip-acl` list: comma-separated addresses, each with an
/// optional `/prefix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAcl {
    entries: Vec<Entry>,
}

impl IpAcl {
    /// Whether `addr` is covered by the list.
    pub fn check(&self, addr: IpAddr) -> bool {
        self.entries.iter().any(|e| e.matches(addr))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for IpAcl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (addr, prefix) = match part.split_once('/') {
                Some((addr, prefix)) => {
                    let prefix: u8 = prefix
                        .parse()
                        .map_err(|_| format!("invalid prefix length in '{}'", part))?;
                    (addr, Some(prefix))
                }
                None => (part, None),
            };

            let addr: IpAddr = addr
                .parse()
                .map_err(|_| format!("invalid address in '{}'", part))?;

            let max = if addr.is_ipv4() { 32 } else { 128 };
            let prefix = prefix.unwrap_or(max);
            if prefix > max {
                return Err(format!("prefix length out of range in '{}'", part));
            }

            entries.push(Entry { addr, prefix });
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_matches() {
        let acl: IpAcl = "127.0.0.1,10.0.0.0/8,::1".parse().unwrap();

        assert!(acl.check("127.0.0.1".parse().unwrap()));
        assert!(!acl.check("127.0.0.2".parse().unwrap()));
        assert!(acl.check("10.200.3.4".parse().unwrap()));
        assert!(!acl.check("11.0.0.1".parse().unwrap()));
        assert!(acl.check("::1".parse().unwrap()));
        assert!(!acl.check("::2".parse().unwrap()));
    }

    #[test]
    fn zero_prefix_matches_everything_in_family() {
        let acl: IpAcl = "0.0.0.0/0".parse().unwrap();

        assert!(acl.check("203.0.113.7".parse().unwrap()));
        assert!(!acl.check("::1".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!("not-an-address".parse::<IpAcl>().is_err());
        assert!("10.0.0.0/33".parse::<IpAcl>().is_err());
    }
}
