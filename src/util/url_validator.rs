use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) attacks.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The destination is a private, loopback, link-local or reserved address.
    #[error("Blocked destination address {addr} for host {host}")]
    BlockedAddress { host: String, addr: IpAddr },
    /// DNS resolution of the host failed.
    #[error("Failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    /// DNS resolution succeeded but returned nothing.
    #[error("Host {0} resolved to no addresses")]
    NoAddresses(String),
}

/// Validates a URL string for use as a feed source.
///
/// Checks syntax, scheme (`http`/`https` only), and that a literal IP host
/// is not in a blocked range. A literal loopback address is accepted so that
/// local collaborators can be targeted explicitly. Hostnames are not
/// resolved here; see [`guard_destination`].
///
/// # Examples
///
/// ```
/// use feedsieve::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// assert!(validate_url("http://127.0.0.1:8080/feed").is_ok());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    check_literal_host(&url)?;
    Ok(url)
}

/// Reject a URL whose host is a literal IP in a blocked range.
///
/// Hostnames pass; literal loopback passes.
pub fn check_literal_host(url: &Url) -> Result<(), UrlValidationError> {
    match url.host() {
        None => Err(UrlValidationError::MissingHost),
        Some(Host::Domain(_)) => Ok(()),
        Some(Host::Ipv4(ip)) => check_literal_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => check_literal_ip(IpAddr::V6(ip)),
    }
}

/// Resolve the URL's host and reject it if any address is blocked.
///
/// Literal IPs are checked without DNS. For hostnames every resolved address
/// must be public; loopback is blocked here since the exemption only covers
/// a literal loopback target.
pub async fn guard_destination(url: &Url) -> Result<(), UrlValidationError> {
    let domain = match url.host() {
        None => return Err(UrlValidationError::MissingHost),
        Some(Host::Ipv4(ip)) => return check_literal_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => return check_literal_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => domain,
    };

    let port = url.port_or_known_default().unwrap_or(80);
    resolve_public(domain, port).await.map(|_| ())
}

/// Resolve `host` and return its addresses only if every one is public.
///
/// Shared by [`guard_destination`] and the HTTP client's resolver so the
/// address that was checked is the address that gets connected to.
pub async fn resolve_public(host: &str, port: u16) -> Result<Vec<IpAddr>, UrlValidationError> {
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| UrlValidationError::Resolve {
            host: host.to_owned(),
            source,
        })?
        .map(|sock| sock.ip())
        .collect();

    if addrs.is_empty() {
        return Err(UrlValidationError::NoAddresses(host.to_owned()));
    }

    if let Some(addr) = addrs.iter().copied().find(is_blocked_ip) {
        return Err(UrlValidationError::BlockedAddress {
            host: host.to_owned(),
            addr,
        });
    }
    Ok(addrs)
}

fn check_literal_ip(ip: IpAddr) -> Result<(), UrlValidationError> {
    if ip.is_loopback() || !is_blocked_ip(&ip) {
        return Ok(());
    }
    Err(UrlValidationError::BlockedAddress {
        host: ip.to_string(),
        addr: ip,
    })
}

/// Private, loopback, link-local, multicast, documentation and reserved ranges.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0 // 0.0.0.0/8 "this network"
        || (a == 100 && (b & 0xc0) == 64) // 100.64.0.0/10 shared address space
        || (a == 192 && b == 0 && c == 0) // 192.0.0.0/24 IETF protocol assignments
        || (a == 198 && (b & 0xfe) == 18) // 198.18.0.0/15 benchmarking
        || a >= 240 // 240.0.0.0/4 reserved
}

fn is_blocked_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(&v4);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (segments[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (segments[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        || (segments[0] == 0x2001 && segments[1] == 0x0db8) // documentation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://news.example.org").is_ok());
        assert!(validate_url("https://example.com:443/feed.xml").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            validate_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_literal_loopback_exempt() {
        assert!(validate_url("http://127.0.0.1:8080/feed").is_ok());
        assert!(validate_url("http://[::1]/feed").is_ok());
    }

    #[test]
    fn test_private_ips_rejected() {
        for url in [
            "http://10.0.0.1/feed",
            "http://10.255.255.255/feed",
            "http://172.16.0.1/feed",
            "http://192.168.1.1:8080/feed",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/feed",
            "http://100.64.0.1/feed",
            "http://240.0.0.1/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
            "http://[::ffff:10.0.0.1]/feed",
        ] {
            assert!(
                matches!(
                    validate_url(url),
                    Err(UrlValidationError::BlockedAddress { .. })
                ),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_mapped_loopback_not_exempt() {
        // Only a plain loopback literal is exempt
        assert!(validate_url("http://[::ffff:127.0.0.1]/feed").is_err());
    }

    #[test]
    fn test_public_ips_allowed() {
        assert!(!is_blocked_ip(&"93.184.216.34".parse().unwrap()));
        assert!(!is_blocked_ip(&"2606:4700::1111".parse().unwrap()));
        assert!(!is_blocked_ip(&"100.128.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_guard_rejects_private_literal_without_dns() {
        let url = Url::parse("http://10.1.2.3/feed").unwrap();
        assert!(matches!(
            guard_destination(&url).await,
            Err(UrlValidationError::BlockedAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_guard_allows_loopback_literal() {
        let url = Url::parse("http://127.0.0.1:9/feed").unwrap();
        assert!(guard_destination(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_guard_rejects_hostname_resolving_to_loopback() {
        let url = Url::parse("http://localhost:9/feed").unwrap();
        assert!(matches!(
            guard_destination(&url).await,
            Err(UrlValidationError::BlockedAddress { .. })
        ));
    }
}
