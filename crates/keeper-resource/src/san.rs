//! Subject alternative name resolution.

use crate::declaration::{expand_hostname, IpAddresses};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

/// Local host name, or "localhost" when it cannot be determined.
pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "failed to read host name");
            "localhost".to_string()
        }
    }
}

/// Resolve the IPv4 SAN set from static literals, matching interfaces and DNS.
///
/// The result is deduplicated and ordered.
pub async fn resolve_ip_sans(spec: &IpAddresses, hostname: &str) -> Result<Vec<Ipv4Addr>> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let interfaces = if spec.interfaces.is_empty() {
        Vec::new()
    } else {
        if_addrs::get_if_addrs()
            .context("get interfaces")?
            .into_iter()
            .map(|iface| (iface.name.clone(), iface.ip()))
            .collect()
    };

    let mut resolved = Vec::new();
    for host in &spec.dns_lookup {
        let host = expand_hostname(host, hostname);
        let addrs = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .with_context(|| format!("lookup ip for {}", host))?;
        resolved.extend(addrs.map(|addr| addr.ip()));
    }

    collect_ipv4(spec, &interfaces, &resolved)
}

/// Merge the three sources into a deduplicated IPv4 set.
pub fn collect_ipv4(
    spec: &IpAddresses,
    interfaces: &[(String, IpAddr)],
    resolved: &[IpAddr],
) -> Result<Vec<Ipv4Addr>> {
    let mut ips = BTreeSet::new();

    for literal in &spec.static_ips {
        match literal.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                ips.insert(ip);
            }
            Ok(IpAddr::V6(_)) => debug!(ip = %literal, "skipping non-IPv4 address"),
            Err(_) => warn!(ip = %literal, "invalid static IP address"),
        }
    }

    let patterns = spec
        .interfaces
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid interface pattern {:?}", p)))
        .collect::<Result<Vec<_>>>()?;
    for (name, ip) in interfaces {
        if let IpAddr::V4(ip) = ip {
            if patterns.iter().any(|re| re.is_match(name)) {
                ips.insert(*ip);
            }
        }
    }

    for ip in resolved {
        if let IpAddr::V4(ip) = ip {
            ips.insert(*ip);
        }
    }

    Ok(ips.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(static_ips: &[&str], interfaces: &[&str]) -> IpAddresses {
        IpAddresses {
            static_ips: static_ips.iter().map(|s| s.to_string()).collect(),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            dns_lookup: Vec::new(),
        }
    }

    #[test]
    fn test_static_only_is_exact() {
        let ips = collect_ipv4(&spec(&["10.0.0.1"], &[]), &[], &[]).unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn test_duplicates_across_sources_collapse() {
        let interfaces = vec![
            ("eth0".to_string(), "10.0.0.1".parse().unwrap()),
            ("lo".to_string(), "127.0.0.1".parse().unwrap()),
        ];
        let resolved = vec!["10.0.0.1".parse().unwrap()];

        let ips = collect_ipv4(&spec(&["10.0.0.1", "10.0.0.1"], &["^eth"]), &interfaces, &resolved).unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn test_interfaces_matched_by_regex() {
        let interfaces = vec![
            ("eth0".to_string(), "10.0.0.5".parse().unwrap()),
            ("eth0".to_string(), "fe80::1".parse().unwrap()),
            ("docker0".to_string(), "172.17.0.1".parse().unwrap()),
        ];

        let ips = collect_ipv4(&spec(&[], &["^eth[0-9]+$"]), &interfaces, &[]).unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn test_ipv6_and_garbage_are_dropped() {
        let ips = collect_ipv4(&spec(&["::1", "not-an-ip", "192.168.1.1"], &[]), &[], &[]).unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(192, 168, 1, 1)]);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(collect_ipv4(&spec(&[], &["("]), &[], &[]).is_err());
    }

    #[tokio::test]
    async fn test_resolve_without_matching_interfaces() {
        let ips = resolve_ip_sans(&spec(&["10.0.0.1"], &["^no-such-interface$"]), "node-1")
            .await
            .unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }
}
