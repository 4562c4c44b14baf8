use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;

use super::url_validator::resolve_public;

/// DNS resolver for the feed client that refuses blocked addresses.
///
/// reqwest calls this for every hostname it connects to, including each
/// redirect hop, so a name that resolves into a private or loopback range
/// fails at connect time. Literal IP hosts never reach a resolver; those
/// are covered by [`check_literal_host`](super::check_literal_host).
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardedResolver;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str();
            // Port 0 is replaced by the scheme's port or the URL's explicit one
            let addrs = resolve_public(host, 0).await.map_err(|e| {
                tracing::warn!(host = %host, error = %e, "Refusing to connect");
                e
            })?;
            let addrs: Addrs = Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_name_resolving_to_loopback() {
        let name: Name = "localhost".parse().unwrap();
        let err = GuardedResolver.resolve(name).await.err().unwrap();
        assert!(err.to_string().contains("Blocked destination"), "{err}");
    }
}
