use async_trait::async_trait;
use reqwest::{Request, Response};

/// Minimal HTTP seam so feed and weather fetching stay testable.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
