use super::client::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }

    /// A client that bounds connection setup only. Streaming responses stay
    /// open indefinitely, so there is no overall request timeout.
    pub fn with_connect_timeout(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self(
            reqwest::Client::builder().connect_timeout(timeout).build()?,
        ))
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
