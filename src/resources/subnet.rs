use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// An IPv4 subnet in CIDR notation. Persisted as the plain CIDR string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    cidr: String,
    net: u32,
    mask: u32,
}

impl Subnet {
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let cidr = cidr.to_string();

        let parts = cidr.split('/').collect::<Vec<&str>>();
        if parts.len() != 2 {
            bail!("Invalid CIDR: {}", cidr);
        }

        let net_parts = parts[0].split('.').collect::<Vec<&str>>();
        if net_parts.len() != 4 {
            bail!("Invalid CIDR: {}", cidr);
        }

        let mut net = 0u32;
        for part in net_parts {
            if part.len() > 3 {
                bail!("Invalid CIDR: {}", cidr);
            }

            let part = part
                .parse::<u8>()
                .context(format!("Invalid CIDR: {}", cidr))?;
            net = (net << 8) | part as u32;
        }

        let prefix = parts[1]
            .parse::<u32>()
            .context(format!("Invalid CIDR: {}", cidr))?;
        if prefix > 32 {
            bail!("Invalid CIDR: {}", cidr);
        }

        let mask = if prefix == 0 {
            0
        } else {
            0xffffffff << (32 - prefix)
        };

        Ok(Subnet { cidr, net, mask })
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn prefix_len(&self) -> u32 {
        self.mask.count_ones()
    }

    /// The host address at the given offset within this subnet.
    pub fn host(&self, offset: u32) -> Result<Ipv4Addr> {
        if offset & self.mask != 0 {
            bail!("Host offset {} is out of range for {}", offset, self.cidr);
        }
        Ok(Ipv4Addr::from((self.net & self.mask) | offset))
    }

    /// First host of the subnet, conventionally assigned to the bridge itself.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from((self.net & self.mask) | 1)
    }
}

impl TryFrom<String> for Subnet {
    type Error = anyhow::Error;

    fn try_from(cidr: String) -> Result<Self> {
        Subnet::from_cidr(&cidr)
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.cidr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let subnet = Subnet::from_cidr("10.0.1.0/24").unwrap();
        assert_eq!(subnet.prefix_len(), 24);
        assert_eq!(subnet.gateway(), Ipv4Addr::new(10, 0, 1, 1));
    }

    #[test]
    fn test_parse_invalid_cidr() {
        assert!(Subnet::from_cidr("10.0.1.0").is_err());
        assert!(Subnet::from_cidr("10.0.1/24").is_err());
        assert!(Subnet::from_cidr("10.0.1.0/33").is_err());
        assert!(Subnet::from_cidr("10.0.256.0/24").is_err());
    }

    #[test]
    fn test_host() {
        let subnet = Subnet::from_cidr("10.0.0.0/24").unwrap();
        assert_eq!(subnet.host(10).unwrap(), Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(subnet.host(254).unwrap(), Ipv4Addr::new(10, 0, 0, 254));
        assert!(subnet.host(256).is_err());
    }

    #[test]
    fn test_roundtrip_through_string() {
        let subnet = Subnet::from_cidr("10.0.0.0/24").unwrap();
        let text = serde_json::to_string(&subnet).unwrap();
        assert_eq!(text, "\"10.0.0.0/24\"");
        let parsed: Subnet = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, subnet);
    }
}
