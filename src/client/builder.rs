use std::time::Duration;

use super::HttpClient;
use crate::error::RemoteError;

pub struct HttpClientBuilder {
    addr: String,
    token: Option<String>,
    timeout: Option<Duration>,
}

impl HttpClientBuilder {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            token: None,
            timeout: None,
        }
    }

    /// Bearer token sent with every request
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    pub fn build(self) -> Result<HttpClient, RemoteError> {
        let mut client = match self.timeout {
            Some(timeout) => HttpClient::with_timeout(&self.addr, timeout)?,
            None => HttpClient::new(&self.addr)?,
        };

        if let Some(token) = &self.token {
            client.set_token(token);
        }

        Ok(client)
    }
}
