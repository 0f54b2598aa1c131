//! Peer address filtering for the web API
//!
//! The dashboard is only reachable from loopback and from the configured
//! private networks (typically the Tailscale range 100.64.0.0/10).

use crate::error::{Result, SpotheatError};
use std::net::IpAddr;

/// An IPv4 or IPv6 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Parse `a.b.c.d/nn`, `x::y/nn` or a bare address (host network)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| SpotheatError::config(format!("Invalid network address '{}'", s)))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| SpotheatError::config(format!("Invalid prefix in '{}'", s)))?,
            None => max,
        };
        if prefix > max {
            return Err(SpotheatError::config(format!(
                "Prefix /{} too long in '{}'",
                prefix, s
            )));
        }
        Ok(Self { addr, prefix })
    }

    /// Whether `ip` lies inside this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, normalize(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

// IPv4-mapped IPv6 peers (dual-stack listeners) compare as IPv4
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

/// Allow-list of peer networks; loopback is always allowed
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    networks: Vec<IpNetwork>,
}

impl PeerFilter {
    /// Build a filter from CIDR strings
    pub fn from_cidrs<S: AsRef<str>>(cidrs: &[S]) -> Result<Self> {
        let networks = cidrs
            .iter()
            .map(|c| IpNetwork::parse(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    /// Whether a request from `ip` may proceed
    pub fn allows(&self, ip: IpAddr) -> bool {
        let ip = normalize(ip);
        ip.is_loopback() || self.networks.iter().any(|n| n.contains(ip))
    }
}
