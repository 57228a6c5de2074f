//! Snapshot of an inbound request as retransmittable HTTP/1.1 bytes.
//!
//! A [`CapturedJob`] is produced once per accepted request and holds the
//! request line, headers and the complete body. The inbound connection is
//! released as soon as the body has been read; workers later parse the bytes
//! back with [`CapturedJob::parse`] to build the outbound request.
use axum::body::Body as AxumBody;
use bytes::{BufMut, Bytes, BytesMut};
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version, header, request::Parts,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;

/// Header naming the destination host of a deferred request.
pub const ROUTING_HEADER: &str = "x-delay-host";

/// Errors raised while capturing or re-reading a request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    /// The inbound body is larger than the configured limit
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The inbound body could not be read to the end
    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    /// The captured bytes end before the header block does
    #[error("Captured request is truncated")]
    Truncated,

    /// The captured bytes are not a valid HTTP/1.1 request
    #[error("Captured request is malformed: {0}")]
    Malformed(String),
}

/// Returns the routing directive carried by `headers`, if any.
///
/// Values that are empty, whitespace only or not visible ASCII count as
/// absent.
pub fn routing_directive(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ROUTING_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
}

/// Immutable wire form of one inbound request.
#[derive(Debug)]
pub struct CapturedJob {
    wire: Bytes,
    header_count: usize,
}

/// Structured view of a [`CapturedJob`].
#[derive(Debug)]
pub struct ParsedJob {
    pub method: Method,
    /// The original request-target (origin-form or absolute-form).
    pub target: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedJob {
    /// Read the whole body of `req` (up to `max_body_bytes`) and serialize it.
    pub async fn capture(
        req: Request<AxumBody>,
        max_body_bytes: usize,
    ) -> Result<Self, CaptureError> {
        let (parts, body) = req.into_parts();

        let body = Limited::new(body, max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    CaptureError::BodyTooLarge {
                        limit: max_body_bytes,
                    }
                } else {
                    CaptureError::BodyRead(e.to_string())
                }
            })?
            .to_bytes();

        Ok(Self::from_parts(&parts, body))
    }

    /// Serialize request parts and an already collected body.
    ///
    /// `Transfer-Encoding` is dropped since the body is stored whole, and
    /// `Content-Length` is rewritten to the stored length.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let target = request_target(parts);
        let mut wire = BytesMut::with_capacity(256 + target.len() + body.len());
        let mut header_count = 0;

        wire.put_slice(parts.method.as_str().as_bytes());
        wire.put_u8(b' ');
        wire.put_slice(target.as_bytes());
        wire.put_slice(b" HTTP/1.1\r\n");

        if !parts.headers.contains_key(header::HOST) {
            if let Some(authority) = parts.uri.authority() {
                put_header(&mut wire, header::HOST.as_str(), authority.as_str().as_bytes());
                header_count += 1;
            }
        }

        for (name, value) in &parts.headers {
            if name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
                continue;
            }
            put_header(&mut wire, name.as_str(), value.as_bytes());
            header_count += 1;
        }

        if !body.is_empty() || parts.headers.contains_key(header::CONTENT_LENGTH) {
            let length = body.len().to_string();
            put_header(&mut wire, header::CONTENT_LENGTH.as_str(), length.as_bytes());
            header_count += 1;
        }

        wire.put_slice(b"\r\n");
        wire.put_slice(&body);

        Self {
            wire: wire.freeze(),
            header_count,
        }
    }

    /// The serialized request.
    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }

    /// Parse the captured bytes back into method, target, headers and body.
    pub fn parse(&self) -> Result<ParsedJob, CaptureError> {
        let mut storage = vec![httparse::EMPTY_HEADER; self.header_count.max(1)];
        let mut req = httparse::Request::new(&mut storage);

        let body_start = match req.parse(&self.wire) {
            Ok(httparse::Status::Complete(offset)) => offset,
            Ok(httparse::Status::Partial) => return Err(CaptureError::Truncated),
            Err(e) => return Err(CaptureError::Malformed(e.to_string())),
        };

        let method = req
            .method
            .ok_or_else(|| CaptureError::Malformed("missing method".to_string()))
            .and_then(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|e| CaptureError::Malformed(format!("method: {e}")))
            })?;

        let target = req
            .path
            .ok_or_else(|| CaptureError::Malformed("missing request-target".to_string()))
            .and_then(|p| {
                p.parse::<Uri>()
                    .map_err(|e| CaptureError::Malformed(format!("request-target: {e}")))
            })?;

        let mut headers = HeaderMap::with_capacity(req.headers.len());
        for h in req.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|e| CaptureError::Malformed(format!("header name {}: {e}", h.name)))?;
            let value = HeaderValue::from_bytes(h.value)
                .map_err(|e| CaptureError::Malformed(format!("header {}: {e}", h.name)))?;
            headers.append(name, value);
        }

        Ok(ParsedJob {
            method,
            target,
            headers,
            body: self.wire.slice(body_start..),
        })
    }
}

/// Origin-form unless the client sent absolute-form over HTTP/1.x.
///
/// HTTP/2 requests always carry scheme and authority pseudo-headers, so their
/// scheme is not treated as one the client chose for the destination.
fn request_target(parts: &Parts) -> String {
    let http1 = matches!(
        parts.version,
        Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11
    );

    if http1 && parts.uri.scheme().is_some() {
        parts.uri.to_string()
    } else {
        parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string())
    }
}

fn put_header(wire: &mut BytesMut, name: &str, value: &[u8]) {
    wire.put_slice(name.as_bytes());
    wire.put_slice(b": ");
    wire.put_slice(value);
    wire.put_slice(b"\r\n");
}
