//! Outbound URL access policy.
//!
//! Every URL the repository fetches on a user's behalf is validated here
//! first: scheme and host checks, DNS resolution, and CIDR allow/deny lists.
//! The validated address is returned so the fetcher can pin it, which keeps
//! a second DNS answer from redirecting the request somewhere private.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::debug;
use url::Url;

use crate::config::UrlPreviewSettings;
use crate::error::{AccessDenial, AppError, AppResult};

/// A URL that passed the access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    /// Normalized URL.
    pub url: Url,
    /// Host name as it appeared in the URL.
    pub host: String,
    /// Address the request must be sent to.
    pub addr: SocketAddr,
}

/// Decides whether a URL may be fetched.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Validate `url`, returning the pinned target or an
    /// [`AppError::AccessPolicy`] describing the refusal.
    async fn validate(&self, url: &str) -> AppResult<ValidatedUrl>;
}

/// CIDR-based policy backed by system DNS.
#[derive(Debug, Clone)]
pub struct NetworkAccessPolicy {
    allowed: Vec<IpNet>,
    denied: Vec<IpNet>,
}

impl NetworkAccessPolicy {
    /// Build a policy from CIDR strings. A bare address is treated as a
    /// single-host network.
    pub fn new(allowed: &[String], denied: &[String]) -> AppResult<Self> {
        Ok(Self {
            allowed: parse_networks(allowed)?,
            denied: parse_networks(denied)?,
        })
    }

    /// Build a policy from the preview settings.
    pub fn from_settings(settings: &UrlPreviewSettings) -> AppResult<Self> {
        Self::new(&settings.allowed_networks, &settings.denied_networks)
    }

    /// Whether `ip` may be contacted. Allowed ranges take precedence over
    /// denied ones.
    #[must_use]
    pub fn permits(&self, ip: IpAddr) -> bool {
        if self.allowed.iter().any(|net| net.contains(&ip)) {
            return true;
        }
        !self.denied.iter().any(|net| net.contains(&ip))
    }

    fn check(&self, url: Url, host: String, addrs: &[IpAddr]) -> AppResult<ValidatedUrl> {
        let Some(first) = addrs.first().copied() else {
            return Err(AppError::AccessPolicy(AccessDenial::HostNotFound));
        };
        if let Some(blocked) = addrs.iter().find(|ip| !self.permits(**ip)) {
            debug!(host = %host, ip = %blocked, "Address refused by access policy");
            return Err(AppError::AccessPolicy(AccessDenial::HostBlacklisted));
        }

        let port = url.port_or_known_default().unwrap_or(443);
        Ok(ValidatedUrl {
            addr: SocketAddr::new(first, port),
            url,
            host,
        })
    }
}

#[async_trait]
impl AccessPolicy for NetworkAccessPolicy {
    async fn validate(&self, url: &str) -> AppResult<ValidatedUrl> {
        let (parsed, host) = parse_target(url)?;

        let addrs: Vec<IpAddr> = if let Some(ip) = literal_ip(&host) {
            vec![ip]
        } else {
            let port = parsed.port_or_known_default().unwrap_or(443);
            match tokio::net::lookup_host((host.as_str(), port)).await {
                Ok(found) => found.map(|addr| addr.ip()).collect(),
                Err(e) => {
                    debug!(host = %host, error = %e, "DNS lookup failed");
                    return Err(AppError::AccessPolicy(AccessDenial::HostNotFound));
                }
            }
        };

        self.check(parsed, host, &addrs)
    }
}

fn parse_networks(entries: &[String]) -> AppResult<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|e| AppError::Config(format!("invalid network {entry}: {e}")))
        })
        .collect()
}

/// Parse and sanity-check a URL, returning it with its host.
fn parse_target(url: &str) -> AppResult<(Url, String)> {
    let parsed = Url::parse(url).map_err(|_| AppError::AccessPolicy(AccessDenial::InvalidHost))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::AccessPolicy(AccessDenial::InvalidHost));
    }

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(AppError::AccessPolicy(AccessDenial::InvalidHost))?
        .to_string();

    Ok((parsed, host))
}

fn literal_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn default_policy() -> NetworkAccessPolicy {
        NetworkAccessPolicy::from_settings(&UrlPreviewSettings::default()).unwrap()
    }

    fn is_denial(err: &AppError, kind: AccessDenial) -> bool {
        matches!(err, AppError::AccessPolicy(k) if *k == kind)
    }

    #[tokio::test]
    async fn test_private_literal_is_blacklisted() {
        let err = default_policy()
            .validate("http://10.1.2.3/page")
            .await
            .unwrap_err();
        assert!(is_denial(&err, AccessDenial::HostBlacklisted));
    }

    #[tokio::test]
    async fn test_loopback_v6_is_blacklisted() {
        let err = default_policy()
            .validate("http://[::1]:8080/")
            .await
            .unwrap_err();
        assert!(is_denial(&err, AccessDenial::HostBlacklisted));
    }

    #[tokio::test]
    async fn test_public_literal_is_pinned() {
        let target = default_policy()
            .validate("https://93.184.216.34/index.html")
            .await
            .unwrap();
        assert_eq!(target.addr, "93.184.216.34:443".parse().unwrap());
        assert_eq!(target.host, "93.184.216.34");
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_invalid_host() {
        let err = default_policy()
            .validate("ftp://example.org/file")
            .await
            .unwrap_err();
        assert!(is_denial(&err, AccessDenial::InvalidHost));
    }

    #[tokio::test]
    async fn test_unparseable_url_is_invalid_host() {
        let err = default_policy().validate("not a url").await.unwrap_err();
        assert!(is_denial(&err, AccessDenial::InvalidHost));
    }

    #[test]
    fn test_allow_list_overrides_deny_list() {
        let policy = NetworkAccessPolicy::new(
            &["10.0.0.5".to_string()],
            &["10.0.0.0/8".to_string()],
        )
        .unwrap();
        assert!(policy.permits("10.0.0.5".parse().unwrap()));
        assert!(!policy.permits("10.0.0.6".parse().unwrap()));
        assert!(policy.permits("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_any_denied_address_rejects_host() {
        let policy = default_policy();
        let url = Url::parse("http://mixed.example/").unwrap();
        let addrs = ["8.8.8.8".parse().unwrap(), "192.168.1.1".parse().unwrap()];
        let err = policy
            .check(url, "mixed.example".to_string(), &addrs)
            .unwrap_err();
        assert!(is_denial(&err, AccessDenial::HostBlacklisted));
    }

    #[test]
    fn test_empty_resolution_is_host_not_found() {
        let policy = default_policy();
        let url = Url::parse("http://nowhere.example/").unwrap();
        let err = policy
            .check(url, "nowhere.example".to_string(), &[])
            .unwrap_err();
        assert!(is_denial(&err, AccessDenial::HostNotFound));
    }

    #[test]
    fn test_bad_cidr_is_config_error() {
        let err = NetworkAccessPolicy::new(&[], &["10.0.0.0/99".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
