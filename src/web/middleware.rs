use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum::http::request::Parts;

const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// The public host the request was addressed to, used to build webhook addresses.
#[derive(Debug, Clone)]
pub(crate) struct RequestHost {
    pub(crate) host: Option<String>,
}

impl RequestHost {
    fn from_headers(headers: &HeaderMap) -> Self {
        // behind a proxy the Host header is the proxy's upstream, not ours
        let host = [X_FORWARDED_HOST, HOST.as_str()]
            .into_iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(',').next())
            .map(normalize_host)
            .find(|host| !host.is_empty());

        Self { host }
    }
}

impl<S> FromRequestParts<S> for RequestHost
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let host = Self::from_headers(&parts.headers);
        async move { Ok(host) }
    }
}

/// Keeps the port, it's part of where the webhook has to go.
fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
