use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

use crate::relay::ClientContext;

/// The browser's address and user agent, as seen through any proxy.
///
/// The peer address is only available when the server is started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(client_context(&parts.headers, peer))
    }
}

pub(super) fn client_context(headers: &HeaderMap, peer: Option<String>) -> ClientContext {
    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "x-real-ip").map(str::trim))
        .map(str::to_owned)
        .or(peer);
    let user_agent = header_str(headers, USER_AGENT.as_str()).map(str::to_owned);
    ClientContext::new(ip, user_agent)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("DingTalk/7.0"));

        let ctx = client_context(&headers, Some("192.168.1.1".into()));
        assert_eq!(ctx.ip, "203.0.113.7");
        assert_eq!(ctx.user_agent, "DingTalk/7.0");
    }

    #[test]
    fn falls_back_to_peer_then_loopback() {
        let headers = HeaderMap::new();
        assert_eq!(client_context(&headers, Some("192.168.1.1".into())).ip, "192.168.1.1");
        assert_eq!(client_context(&headers, None).ip, "127.0.0.1");
    }
}
