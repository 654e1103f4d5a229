//! HTTP transport seam

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Response of a GET request with a streaming body
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, read incrementally
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

impl HttpResponse {
    /// Whether the server answered 200
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens URLs for streaming reads. TLS and certificate handling live here.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET and return the status with an unread body
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Join an index URL and a filename listed in it
pub fn join_url(base: &str, filename: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{filename}")
    } else {
        format!("{base}/{filename}")
    }
}
