use crate::acme::error::ProtocolResult;
use crate::acme::object::Nonce;
use reqwest::header::{
    ACCEPT_LANGUAGE, AsHeaderName, CONTENT_TYPE, HeaderMap, HeaderValue, LINK, LOCATION, RETRY_AFTER,
};
use reqwest::{ClientBuilder, Method, Response};
use serde::Serialize;
use std::time::{Duration, SystemTime};
use url::Url;

// Identify ourselves and our HTTP library to the CA.
const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " reqwest/",
    env!("REQWEST_VERSION"),
);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

const REPLAY_NONCE: &str = "Replay-Nonce";
const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// Thin wrapper around `reqwest` with the timeouts and headers every CA request carries.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn try_new() -> ProtocolResult<Self> {
        Self::build(true)
    }

    /// A client that also talks to `http://` CAs. Only meant for local test authorities.
    pub fn try_new_allowing_plain_http() -> ProtocolResult<Self> {
        Self::build(false)
    }

    fn build(https_only: bool) -> ProtocolResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        let client = ClientBuilder::new()
            .https_only(https_only)
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .default_headers(headers)
            // Make TRACE logs available for test or debug builds (still needs to be enabled separately)
            .connection_verbose(cfg!(any(test, debug_assertions)))
            .build()?;
        Ok(Self { client })
    }

    pub fn extract_nonce(res: &Response) -> Option<Nonce> {
        header_str(res, REPLAY_NONCE)
            .and_then(|value| Nonce::try_from(value.to_string()).ok())
    }

    /// When the CA asked us to come back, from a `Retry-After` header.
    pub fn extract_backoff(res: &Response) -> Option<SystemTime> {
        header_str(res, RETRY_AFTER).and_then(parse_retry_after)
    }

    /// The `Location` header, resolved against the URL of the response.
    pub fn extract_location(res: &Response) -> Option<Url> {
        header_str(res, LOCATION).and_then(|location| res.url().join(location).ok())
    }

    /// All `Link` headers that carry a `rel` parameter, resolved against the URL of the response.
    pub fn extract_relation_links(res: &Response) -> Vec<RelationLink> {
        let mut links = Vec::new();
        for header in res.headers().get_all(LINK) {
            let Ok(header) = header.to_str() else {
                continue;
            };
            let Ok(parsed) = nom_rfc8288::complete::link(header) else {
                continue;
            };
            for link in parsed.into_iter().flatten() {
                let Ok(url) = res.url().join(link.url) else {
                    continue;
                };
                let relation = link
                    .params
                    .into_iter()
                    .find(|param| param.key == "rel")
                    .and_then(|param| param.val);
                if let Some(relation) = relation {
                    links.push(RelationLink { relation, url });
                }
            }
        }
        links
    }

    async fn send(&self, method: Method, url: &Url) -> ProtocolResult<Response> {
        Ok(self.client.request(method, url.clone()).send().await?)
    }

    pub async fn get(&self, url: &Url) -> ProtocolResult<Response> {
        self.send(Method::GET, url).await
    }

    pub async fn head(&self, url: &Url) -> ProtocolResult<Response> {
        self.send(Method::HEAD, url).await
    }

    /// Posts a signed request body.
    pub async fn post<T: Serialize>(&self, url: &Url, body: &T) -> ProtocolResult<Response> {
        Ok(self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .json(body)
            .send()
            .await?)
    }
}

fn header_str(res: &Response, name: impl AsHeaderName) -> Option<&str> {
    res.headers().get(name).and_then(|value| value.to_str().ok())
}

fn parse_retry_after(retry_after: &str) -> Option<SystemTime> {
    // Either a delay in seconds or an HTTP date
    match retry_after.parse::<u64>() {
        Ok(seconds) => SystemTime::now().checked_add(Duration::from_secs(seconds)),
        Err(_) => httpdate::parse_http_date(retry_after).ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationLink {
    pub relation: String,
    pub url: Url,
}
