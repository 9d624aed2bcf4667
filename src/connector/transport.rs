// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};
use url::Url;

const PROXY_START_DEADLINE: Duration = Duration::from_secs(10);
const PROXY_STOP_DEADLINE: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the session should connect to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerTarget {
    /// A full WebSocket URL, used verbatim.
    WebSocket(Url),
    /// A bare domain; resolved via XEP-0156 unless discovery is suppressed.
    Domain(String),
    /// A raw TCP/TLS endpoint which requires the proxy to bridge it.
    Proxy { tls: bool, host: String, port: u16 },
}

impl FromStr for ServerTarget {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.starts_with("ws://") || value.starts_with("wss://") {
            let url = Url::parse(value).map_err(|e| TransportError::InvalidTarget {
                msg: e.to_string(),
            })?;
            return Ok(ServerTarget::WebSocket(url));
        }

        if let Some(rest) = value
            .strip_prefix("tls://")
            .map(|rest| (true, rest))
            .or(value.strip_prefix("tcp://").map(|rest| (false, rest)))
        {
            let (tls, rest) = rest;
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or(TransportError::InvalidTarget {
                    msg: format!("Missing port in proxy target {value}"),
                })?;
            let port = port.parse().map_err(|_| TransportError::InvalidTarget {
                msg: format!("Invalid port in proxy target {value}"),
            })?;
            return Ok(ServerTarget::Proxy {
                tls,
                host: host.to_string(),
                port,
            });
        }

        Ok(ServerTarget::Domain(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMethod {
    Proxy,
    WebSocket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub method: ConnectionMethod,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport operation '{operation}' (op {op}) timed out after {elapsed_ms}ms")]
    OpTimedOut {
        op: u64,
        operation: &'static str,
        elapsed_ms: u128,
    },
    #[error("Proxy failed to start: {msg}")]
    ProxyStartup { msg: String },
    #[error("Invalid server target: {msg}")]
    InvalidTarget { msg: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyHandle {
    pub url: String,
    pub connection_method: ConnectionMethod,
    pub resolved_endpoint: Option<String>,
}

/// Bridges raw TCP/TLS targets to a locally reachable WebSocket. External
/// collaborator; the core only drives its lifecycle.
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    async fn start_proxy(&self, target: &ServerTarget) -> anyhow::Result<ProxyHandle>;
    async fn stop_proxy(&self) -> anyhow::Result<()>;
}

/// XEP-0156 lookup port. The default implementation knows nothing and makes
/// the transport fall back to `wss://{domain}/ws`.
#[async_trait]
pub trait HostMetaResolver: Send + Sync {
    async fn websocket_url(&self, domain: &str) -> Option<String>;
}

pub struct NoopHostMetaResolver;

#[async_trait]
impl HostMetaResolver for NoopHostMetaResolver {
    async fn websocket_url(&self, _domain: &str) -> Option<String> {
        None
    }
}

/// Resolves a `ServerTarget` into a concrete endpoint, managing the proxy
/// lifecycle along the way. All lifecycle operations run serialized and
/// deadline-bounded so a dead proxy can never wedge a reconnect.
pub struct Transport {
    proxy: Option<Arc<dyn ProxyAdapter>>,
    resolver: Arc<dyn HostMetaResolver>,
    op_lock: tokio::sync::Mutex<()>,
    op_counter: AtomicU64,
    cached_endpoint: Mutex<Option<(ServerTarget, Endpoint)>>,
}

impl Transport {
    pub fn new(
        proxy: Option<Arc<dyn ProxyAdapter>>,
        resolver: Option<Arc<dyn HostMetaResolver>>,
    ) -> Self {
        Transport {
            proxy,
            resolver: resolver.unwrap_or_else(|| Arc::new(NoopHostMetaResolver)),
            op_lock: tokio::sync::Mutex::new(()),
            op_counter: AtomicU64::new(0),
            cached_endpoint: Mutex::new(None),
        }
    }

    /// Returns an endpoint for `target`, starting the proxy if one is
    /// configured and required. Idempotent for the same target.
    pub async fn ensure(
        &self,
        target: &ServerTarget,
        domain: &str,
        skip_discovery: bool,
    ) -> Result<Endpoint, TransportError> {
        if let Some((cached_target, endpoint)) = &*self.cached_endpoint.lock() {
            if cached_target == target {
                return Ok(endpoint.clone());
            }
        }

        let _guard = self.op_lock.lock().await;
        let op = self.op_counter.fetch_add(1, Ordering::SeqCst);
        let started_at = Instant::now();
        info!(op, ?target, "transport op: ensure");

        let endpoint = self
            .resolve(op, target, domain, skip_discovery, started_at)
            .await?;

        info!(
            op,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            url = %endpoint.url,
            "transport op: ensure finished"
        );

        *self.cached_endpoint.lock() = Some((target.clone(), endpoint.clone()));
        Ok(endpoint)
    }

    /// Like `ensure`, but tears down any cached endpoint first so the next
    /// connection is guaranteed to be a fresh one.
    pub async fn restart(
        &self,
        target: &ServerTarget,
        domain: &str,
        skip_discovery: bool,
    ) -> Result<Endpoint, TransportError> {
        self.cached_endpoint.lock().take();
        self.stop().await;
        self.ensure(target, domain, skip_discovery).await
    }

    /// Best-effort teardown. Bounded so that a hanging proxy or dead socket
    /// cannot block the caller.
    pub async fn stop(&self) {
        let Some(proxy) = &self.proxy else {
            return;
        };

        let _guard = self.op_lock.lock().await;
        let op = self.op_counter.fetch_add(1, Ordering::SeqCst);
        let started_at = Instant::now();
        info!(op, "transport op: stop");

        let deadline = STOP_TIMEOUT.min(PROXY_STOP_DEADLINE);
        match timeout(deadline, proxy.stop_proxy()).await {
            Ok(Ok(())) => info!(
                op,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "transport op: stop finished"
            ),
            Ok(Err(err)) => warn!(op, "Failed to stop proxy. {err}"),
            Err(_) => warn!(
                op,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Timed out stopping proxy"
            ),
        }

        self.cached_endpoint.lock().take();
    }

    async fn resolve(
        &self,
        op: u64,
        target: &ServerTarget,
        domain: &str,
        skip_discovery: bool,
        started_at: Instant,
    ) -> Result<Endpoint, TransportError> {
        // A plain WebSocket URL never involves the proxy.
        if let ServerTarget::WebSocket(url) = target {
            return Ok(Endpoint {
                url: url.to_string(),
                method: ConnectionMethod::WebSocket,
            });
        }

        if let Some(proxy) = &self.proxy {
            match timeout(PROXY_START_DEADLINE, proxy.start_proxy(target)).await {
                Ok(Ok(handle)) => {
                    return Ok(Endpoint {
                        url: handle.url,
                        method: handle.connection_method,
                    });
                }
                Ok(Err(err)) => {
                    warn!(op, "Proxy failed to start, falling back to WebSocket. {err}");
                }
                Err(_) => {
                    return Err(TransportError::OpTimedOut {
                        op,
                        operation: "ensure",
                        elapsed_ms: started_at.elapsed().as_millis(),
                    });
                }
            }
        }

        // No proxy (or the proxy failed): resolve a WebSocket URL.
        let url = match target {
            ServerTarget::WebSocket(url) => url.to_string(),
            ServerTarget::Domain(domain) if !skip_discovery => {
                match timeout(DISCOVERY_TIMEOUT, self.resolver.websocket_url(domain)).await {
                    Ok(Some(url)) => url,
                    Ok(None) => format!("wss://{domain}/ws"),
                    Err(_) => {
                        warn!(op, "XEP-0156 discovery timed out");
                        format!("wss://{domain}/ws")
                    }
                }
            }
            ServerTarget::Domain(domain) => format!("wss://{domain}/ws"),
            // The proxy was required to bridge raw TCP but is unavailable.
            ServerTarget::Proxy { .. } => format!("wss://{domain}/ws"),
        };

        Ok(Endpoint {
            url,
            method: ConnectionMethod::WebSocket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_target() {
        assert_eq!(
            ServerTarget::from_str("wss://chat.parlor.im/ws").unwrap(),
            ServerTarget::WebSocket(Url::parse("wss://chat.parlor.im/ws").unwrap())
        );
        assert_eq!(
            ServerTarget::from_str("parlor.im").unwrap(),
            ServerTarget::Domain("parlor.im".to_string())
        );
        assert_eq!(
            ServerTarget::from_str("tls://xmpp.parlor.im:5223").unwrap(),
            ServerTarget::Proxy {
                tls: true,
                host: "xmpp.parlor.im".to_string(),
                port: 5223
            }
        );
        assert!(ServerTarget::from_str("tcp://no-port").is_err());
    }

    #[tokio::test]
    async fn test_domain_falls_back_without_resolver() {
        let transport = Transport::new(None, None);
        let endpoint = transport
            .ensure(
                &ServerTarget::Domain("parlor.im".to_string()),
                "parlor.im",
                false,
            )
            .await
            .unwrap();

        assert_eq!(
            endpoint,
            Endpoint {
                url: "wss://parlor.im/ws".to_string(),
                method: ConnectionMethod::WebSocket
            }
        );
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let transport = Transport::new(None, None);
        let target = ServerTarget::Domain("parlor.im".to_string());

        let first = transport.ensure(&target, "parlor.im", true).await.unwrap();
        let second = transport.ensure(&target, "parlor.im", true).await.unwrap();
        assert_eq!(first, second);
    }
}
