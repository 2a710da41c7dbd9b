use crate::client::ToxiproxyClient;
use async_trait::async_trait;
use toxiwarden_core::HealthProbe;
use tracing::{info, warn};

/// Treats any answer to `GET /version` as proof of life
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: ToxiproxyClient,
}

impl HttpHealthProbe {
    pub fn new(client: ToxiproxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> bool {
        match self.client.version().await {
            Ok(version) => {
                info!("Toxiproxy server is running (version: {version})");
                true
            }
            Err(e) => {
                warn!("Toxiproxy server is not running: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubServer, closed_port};
    use toxiwarden_core::SupervisorOptions;

    #[tokio::test]
    async fn test_probe_against_live_server() {
        let server = StubServer::start().await;
        server.route("GET", "/version", 200, "2.1.4");
        let probe = HttpHealthProbe::new(ToxiproxyClient::new(&server.options()).unwrap());

        assert!(probe.probe().await);
    }

    #[tokio::test]
    async fn test_probe_fails_soft() {
        let options = SupervisorOptions::builder()
            .host("127.0.0.1")
            .port(closed_port().await)
            .build()
            .unwrap();
        let probe = HttpHealthProbe::new(ToxiproxyClient::new(&options).unwrap());
        assert!(!probe.probe().await);

        // Something answers, but not successfully
        let server = StubServer::start().await;
        let probe = HttpHealthProbe::new(ToxiproxyClient::new(&server.options()).unwrap());
        assert!(!probe.probe().await);
    }
}
