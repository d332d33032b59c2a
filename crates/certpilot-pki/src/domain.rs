//! Domain classification, registrable-root extraction and SAN counting.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    Standard,
    Wildcard,
    Ipv4,
    Ipv6,
}

impl DomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::Standard => "standard",
            DomainType::Wildcard => "wildcard",
            DomainType::Ipv4 => "ipv4",
            DomainType::Ipv6 => "ipv6",
        }
    }

    pub fn is_ip(&self) -> bool {
        matches!(self, DomainType::Ipv4 | DomainType::Ipv6)
    }
}

pub fn domain_type(name: &str) -> DomainType {
    if name.parse::<Ipv4Addr>().is_ok() {
        return DomainType::Ipv4;
    }
    if name.parse::<Ipv6Addr>().is_ok() {
        return DomainType::Ipv6;
    }
    if name.starts_with("*.") {
        return DomainType::Wildcard;
    }
    DomainType::Standard
}

/// Split a comma-joined name list, dropping empty segments.
pub fn split_domains(domains: &str) -> Vec<String> {
    domains
        .split(',')
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string())
        .collect()
}

pub fn join_domains(domains: &[String]) -> String {
    domains.join(",")
}

/// Multi-label public suffixes under which the registrable root keeps a
/// third label (kept to the zones the resellers actually sell into).
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "com.cn", "net.cn", "org.cn", "gov.cn", "edu.cn", "ac.cn", "co.uk", "org.uk", "me.uk",
    "net.uk", "com.au", "net.au", "org.au", "co.jp", "ne.jp", "or.jp", "com.hk", "org.hk",
    "com.tw", "org.tw", "com.sg", "com.br", "com.mx", "co.in", "co.nz", "co.kr", "com.tr",
];

/// Registrable root of a name: the alias validation mailbox lives under
/// this domain. IP literals are returned unchanged.
pub fn root_domain(name: &str) -> String {
    let name = name.trim_start_matches("*.").to_ascii_lowercase();

    if domain_type(&name).is_ip() {
        return name;
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() <= 2 {
        return name;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        return labels[labels.len() - 3..].join(".");
    }

    last_two
}

/// For every wildcard in the list, make sure the bare root it covers is
/// present too (the gifted domain). Order is preserved, the common name
/// stays first.
pub fn add_gift_domains(domains: &str) -> String {
    let list = split_domains(domains);
    let existing: HashSet<String> = list.iter().map(|d| d.to_ascii_lowercase()).collect();

    let mut result = list.clone();
    for domain in &list {
        if let Some(base) = domain.strip_prefix("*.") {
            if !existing.contains(&base.to_ascii_lowercase()) {
                result.push(base.to_string());
            }
        }
    }

    join_domains(&result)
}

/// Inverse of `add_gift_domains`: drop bare roots that ride along with a
/// wildcard covering them.
pub fn remove_gift_domains(domains: &str) -> String {
    let list = split_domains(domains);
    let wildcards: HashSet<String> = list
        .iter()
        .filter_map(|d| d.strip_prefix("*."))
        .map(|d| d.to_ascii_lowercase())
        .collect();

    let kept: Vec<String> = list
        .into_iter()
        .filter(|d| !wildcards.contains(&d.to_ascii_lowercase()))
        .collect();

    join_domains(&kept)
}

/// Convert punycode labels in a submitted name list to their unicode form
/// and lowercase everything.
pub fn to_unicode_domains(domains: &str) -> String {
    let converted: Vec<String> = split_domains(domains)
        .into_iter()
        .map(|domain| {
            if domain_type(&domain).is_ip() {
                return domain;
            }
            let (prefix, rest) = match domain.strip_prefix("*.") {
                Some(rest) => ("*.", rest),
                None => ("", domain.as_str()),
            };
            let (unicode, result) = idna::domain_to_unicode(rest);
            if result.is_ok() {
                format!("{}{}", prefix, unicode.to_lowercase())
            } else {
                format!("{}{}", prefix, rest.to_ascii_lowercase())
            }
        })
        .collect();

    join_domains(&converted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanCounts {
    pub standard_count: i32,
    pub wildcard_count: i32,
}

/// Count billable SANs. IP literals count as standard names. When the
/// product gifts root domains, a bare root covered by a wildcard in the
/// same list is free and not counted.
pub fn san_counts(domains: &str, gift_root_domain: bool) -> SanCounts {
    let list = split_domains(domains);
    let wildcards: HashSet<String> = list
        .iter()
        .filter_map(|d| d.strip_prefix("*."))
        .map(|d| d.to_ascii_lowercase())
        .collect();

    let mut counts = SanCounts::default();
    for domain in &list {
        match domain_type(domain) {
            DomainType::Wildcard => counts.wildcard_count += 1,
            _ => {
                if gift_root_domain && wildcards.contains(&domain.to_ascii_lowercase()) {
                    continue;
                }
                counts.standard_count += 1;
            }
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_domain_types() {
        assert_eq!(domain_type("example.com"), DomainType::Standard);
        assert_eq!(domain_type("*.example.com"), DomainType::Wildcard);
        assert_eq!(domain_type("192.168.1.1"), DomainType::Ipv4);
        assert_eq!(domain_type("2001:db8::1"), DomainType::Ipv6);
    }

    #[test]
    fn root_domain_handles_second_level_suffixes() {
        assert_eq!(root_domain("www.example.com"), "example.com");
        assert_eq!(root_domain("a.b.example.com.cn"), "example.com.cn");
        assert_eq!(root_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(root_domain("*.example.com"), "example.com");
        assert_eq!(root_domain("example.com"), "example.com");
    }

    #[test]
    fn gift_domain_roundtrip() {
        assert_eq!(
            add_gift_domains("*.example.com"),
            "*.example.com,example.com"
        );
        // Present roots are not duplicated.
        assert_eq!(
            add_gift_domains("*.example.com,example.com"),
            "*.example.com,example.com"
        );
        assert_eq!(
            remove_gift_domains("*.example.com,example.com,other.com"),
            "*.example.com,other.com"
        );
    }

    #[test]
    fn san_counting_with_gift() {
        let counts = san_counts("*.example.com,example.com,www.other.com", true);
        assert_eq!(counts.wildcard_count, 1);
        assert_eq!(counts.standard_count, 1);

        let counts = san_counts("*.example.com,example.com,www.other.com", false);
        assert_eq!(counts.standard_count, 2);
    }

    #[test]
    fn unicode_conversion_lowercases() {
        assert_eq!(to_unicode_domains("WWW.Example.COM"), "www.example.com");
        assert_eq!(to_unicode_domains("xn--fsq.com"), "\u{4f8b}.com");
        assert_eq!(to_unicode_domains("*.XN--FSQ.com"), "*.\u{4f8b}.com");
    }
}
