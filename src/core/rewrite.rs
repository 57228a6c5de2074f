//! Turns a captured job back into a request addressed to its destination.
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Request, Uri,
    header,
    uri::{Authority, PathAndQuery, Scheme},
};
use thiserror::Error;

use crate::core::capture::{CaptureError, CapturedJob, ParsedJob, ROUTING_HEADER, routing_directive};

/// Request handed to the outbound client.
pub type OutboundRequest = Request<Bytes>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RewriteError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Captured request carries no x-delay-host header")]
    MissingRoutingHeader,

    #[error("Invalid destination host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Failed to build outbound request: {0}")]
    Build(#[from] http::Error),
}

/// Build the outbound request for `job`.
///
/// The routing header is removed, the original request-target is replaced by
/// an absolute URI pointing at the routing directive, and the scheme defaults
/// to `https` when the captured target had none.
pub fn build_outbound(job: &CapturedJob) -> Result<OutboundRequest, RewriteError> {
    let ParsedJob {
        method,
        target,
        mut headers,
        body,
    } = job.parse()?;

    let host = routing_directive(&headers)
        .ok_or(RewriteError::MissingRoutingHeader)?
        .to_string();
    headers.remove(ROUTING_HEADER);
    strip_hop_by_hop(&mut headers);

    let authority: Authority = host.parse().map_err(|e: http::uri::InvalidUri| {
        RewriteError::InvalidHost {
            host: host.clone(),
            reason: e.to_string(),
        }
    })?;
    if authority.as_str().contains('@') {
        return Err(RewriteError::InvalidHost {
            host,
            reason: "user info is not allowed".to_string(),
        });
    }

    let scheme = target.scheme().cloned().unwrap_or(Scheme::HTTPS);
    let path_and_query = target
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    let uri = Uri::builder()
        .scheme(scheme)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()?;

    let host_value =
        HeaderValue::from_str(authority.as_str()).map_err(|e| RewriteError::InvalidHost {
            host: host.clone(),
            reason: e.to_string(),
        })?;
    headers.insert(header::HOST, host_value);

    let mut outbound = Request::new(body);
    *outbound.method_mut() = method;
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = headers;

    Ok(outbound)
}

/// Remove connection-scoped headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }

    for name in [
        "connection",
        "keep-alive",
        "proxy-connection",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        headers.remove(name);
    }
}
