use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use toxiwarden_core::{
    NewProxy, NewToxic, Proxy, ProxyRegistry, ProxySource, SupervisorOptions, Toxic, ToxicUpdate,
    WardenError, parse_proxy_listing,
};

/// Thin client for the toxiproxy control API.
///
/// Transport failures (refused connection, timeout) surface as
/// [`WardenError::Unreachable`]; the server's own refusals keep their
/// status as [`WardenError::Http`].
#[derive(Debug, Clone)]
pub struct ToxiproxyClient {
    http: Client,
    base: Url,
}

impl ToxiproxyClient {
    pub fn new(options: &SupervisorOptions) -> Result<Self, WardenError> {
        let base = Url::parse(&options.base_url()).map_err(|e| {
            WardenError::configuration(format!(
                "invalid toxiproxy address {}: {e}",
                options.base_url()
            ))
        })?;
        let http = Client::builder()
            .timeout(options.request_timeout())
            .build()
            .map_err(|e| WardenError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Server version, from `GET /version`
    pub async fn version(&self) -> Result<String, WardenError> {
        let response = self.send(self.http.get(self.endpoint(&["version"])?)).await?;
        let body = response.text().await.map_err(transport_error)?;
        Ok(parse_version(&body))
    }

    pub async fn proxies(&self) -> Result<ProxyRegistry, WardenError> {
        let response = self.send(self.http.get(self.endpoint(&["proxies"])?)).await?;
        let body = response.text().await.map_err(transport_error)?;
        parse_proxy_listing(&body)
    }

    pub async fn proxy(&self, name: &str) -> Result<Proxy, WardenError> {
        let response = self
            .send(self.http.get(self.endpoint(&["proxies", name])?))
            .await?;
        decode(response).await
    }

    pub async fn create_proxy(&self, proxy: &NewProxy) -> Result<Proxy, WardenError> {
        proxy.validate()?;
        let response = self
            .send(self.http.post(self.endpoint(&["proxies"])?).json(proxy))
            .await?;
        decode(response).await
    }

    /// Replace `listen`, `upstream` and `enabled` of an existing proxy
    pub async fn update_proxy(&self, proxy: &Proxy) -> Result<Proxy, WardenError> {
        let response = self
            .send(
                self.http
                    .post(self.endpoint(&["proxies", &proxy.name])?)
                    .json(proxy),
            )
            .await?;
        decode(response).await
    }

    pub async fn delete_proxy(&self, name: &str) -> Result<(), WardenError> {
        self.send(self.http.delete(self.endpoint(&["proxies", name])?))
            .await?;
        Ok(())
    }

    pub async fn toxics(&self, proxy: &str) -> Result<Vec<Toxic>, WardenError> {
        let response = self
            .send(self.http.get(self.endpoint(&["proxies", proxy, "toxics"])?))
            .await?;
        decode(response).await
    }

    pub async fn create_toxic(&self, proxy: &str, toxic: NewToxic) -> Result<Toxic, WardenError> {
        let toxic = toxic.into_toxic()?;
        let response = self
            .send(
                self.http
                    .post(self.endpoint(&["proxies", proxy, "toxics"])?)
                    .json(&toxic),
            )
            .await?;
        decode(response).await
    }

    pub async fn update_toxic(
        &self,
        proxy: &str,
        toxic: &str,
        update: &ToxicUpdate,
    ) -> Result<Toxic, WardenError> {
        update.validate()?;
        let response = self
            .send(
                self.http
                    .post(self.endpoint(&["proxies", proxy, "toxics", toxic])?)
                    .json(update),
            )
            .await?;
        decode(response).await
    }

    pub async fn delete_toxic(&self, proxy: &str, toxic: &str) -> Result<(), WardenError> {
        self.send(
            self.http
                .delete(self.endpoint(&["proxies", proxy, "toxics", toxic])?),
        )
        .await?;
        Ok(())
    }

    /// Re-enable every proxy and drop all toxics
    pub async fn reset(&self) -> Result<(), WardenError> {
        self.send(self.http.post(self.endpoint(&["reset"])?))
            .await?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, WardenError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                WardenError::configuration(format!("{} cannot be used as a base URL", self.base))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, WardenError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(WardenError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ProxySource for ToxiproxyClient {
    async fn fetch_proxies(&self) -> Result<ProxyRegistry, WardenError> {
        self.proxies().await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, WardenError> {
    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| WardenError::Decode(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> WardenError {
    if e.is_decode() {
        WardenError::Decode(e.to_string())
    } else {
        WardenError::unreachable(e)
    }
}

/// Newer servers answer `/version` with JSON, older ones with plain text
fn parse_version(body: &str) -> String {
    #[derive(Deserialize)]
    struct VersionBody {
        version: String,
    }

    serde_json::from_str::<VersionBody>(body)
        .map(|parsed| parsed.version)
        .unwrap_or_else(|_| body.trim().to_string())
}
