//! Network health probes.
//!
//! `ProcessAlive` is answered from the process table and has no probe object;
//! the network kinds implement [`Probe`].

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::{ProbeKind, ProbeSpec};
use crate::error::{KanshiError, Result};

/// A bounded-timeout liveness check against a running service.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns the probe kind name.
    fn kind(&self) -> ProbeKind;

    /// Runs one check. Never takes longer than the probe's timeout.
    async fn check(&self) -> Result<()>;
}

/// Succeeds when a TCP connection to `target` can be established.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    service: String,
    target: String,
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(service: impl Into<String>, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            service: service.into(),
            target: target.into(),
            timeout,
        }
    }

    fn failure(&self, message: impl Into<String>) -> KanshiError {
        KanshiError::Probe {
            service: self.service.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Probe for TcpConnectProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::TcpConnect
    }

    async fn check(&self) -> Result<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(self.failure(format!("connect to {} failed: {}", self.target, e))),
            Err(_) => Err(self.failure(format!(
                "connect to {} timed out after {}ms",
                self.target,
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Succeeds when `GET url` answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpGetProbe {
    service: String,
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpGetProbe {
    pub fn new(
        service: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        client: Client,
    ) -> Self {
        Self {
            service: service.into(),
            url: url.into(),
            timeout,
            client,
        }
    }
}

#[async_trait]
impl Probe for HttpGetProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::HttpGet
    }

    async fn check(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| KanshiError::Probe {
                service: self.service.clone(),
                message: format!("GET {} failed: {}", self.url, e),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(KanshiError::Probe {
                service: self.service.clone(),
                message: format!("GET {} returned {}", self.url, status),
            })
        }
    }
}

/// Builds the network probe for `spec`, or `None` for `ProcessAlive`.
pub fn for_spec(service: &str, spec: &ProbeSpec, client: &Client) -> Result<Option<Box<dyn Probe>>> {
    if spec.kind == ProbeKind::ProcessAlive {
        return Ok(None);
    }
    let target = spec.target.clone().ok_or_else(|| {
        KanshiError::config(format!(
            "services.{}: {} probe has no target",
            service, spec.kind
        ))
    })?;

    let probe: Box<dyn Probe> = match spec.kind {
        ProbeKind::TcpConnect => Box::new(TcpConnectProbe::new(service, target, spec.timeout())),
        ProbeKind::HttpGet => Box::new(HttpGetProbe::new(
            service,
            target,
            spec.timeout(),
            client.clone(),
        )),
        ProbeKind::ProcessAlive => return Ok(None),
    };
    Ok(Some(probe))
}

/// Shared HTTP client for probes.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| KanshiError::internal_with_source("Failed to create HTTP client", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn serve_http() -> String {
        let app = Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_tcp_probe_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();

        let probe = TcpConnectProbe::new("db", target, Duration::from_millis(500));
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let port = free_port().await;
        let probe = TcpConnectProbe::new(
            "db",
            format!("127.0.0.1:{}", port),
            Duration::from_millis(500),
        );

        let err = probe.check().await.unwrap_err();
        assert!(matches!(err, KanshiError::Probe { ref service, .. } if service == "db"));
    }

    #[tokio::test]
    async fn test_http_probe_status_handling() {
        let base = serve_http().await;
        let client = http_client().unwrap();

        let ok = HttpGetProbe::new(
            "api",
            format!("{}/health", base),
            Duration::from_secs(2),
            client.clone(),
        );
        assert!(ok.check().await.is_ok());

        let broken = HttpGetProbe::new(
            "api",
            format!("{}/broken", base),
            Duration::from_secs(2),
            client,
        );
        let err = broken.check().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_http_probe_connection_failure() {
        let port = free_port().await;
        let probe = HttpGetProbe::new(
            "api",
            format!("http://127.0.0.1:{}/health", port),
            Duration::from_millis(500),
            http_client().unwrap(),
        );
        assert!(probe.check().await.is_err());
    }

    #[test]
    fn test_for_spec() {
        let client = http_client().unwrap();

        let alive = ProbeSpec::default();
        assert!(for_spec("api", &alive, &client).unwrap().is_none());

        let tcp = ProbeSpec {
            kind: ProbeKind::TcpConnect,
            target: Some("127.0.0.1:9999".to_string()),
            timeout_ms: 100,
        };
        let probe = for_spec("api", &tcp, &client).unwrap().unwrap();
        assert_eq!(probe.kind(), ProbeKind::TcpConnect);

        let missing = ProbeSpec {
            kind: ProbeKind::HttpGet,
            target: None,
            timeout_ms: 100,
        };
        assert!(for_spec("api", &missing, &client).is_err());
    }
}
