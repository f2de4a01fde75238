//! # Failed Responses
//!
//! Translates a non-200 HTTP response into an [`Error`].
//!
//! A response whose body is a valid [`ErrorEnvelope`] came from a blaze server and is decoded
//! as-is. Anything else (redirects, HTML error pages from a proxy, empty bodies) is an
//! *intermediary error* and is mapped from its status code alone.
use crate::envelope::ErrorEnvelope;
use crate::error::Error;
use http::{HeaderMap, StatusCode, header};

/// Builds an [`Error`] from a failed response.
pub fn error_from_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Error {
    let reason = status.canonical_reason().unwrap_or_default();

    if status.is_redirection() {
        let location = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let msg = format!(
            "unexpected HTTP status code {} {reason:?} received, Location={location:?}",
            status.as_u16()
        );
        return error_from_intermediary(status, msg).with_meta("location", location);
    }

    let envelope = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.code.is_empty() => envelope,
        _ => {
            let msg = format!(
                "Error from intermediary with HTTP status code {} {reason:?}",
                status.as_u16()
            );
            return error_from_intermediary(status, msg);
        }
    };

    let tag = envelope.r#type.clone();
    envelope.into_error().unwrap_or_else(|_| {
        Error::internal(format!(
            "invalid type returned from server error response: {tag}"
        ))
    })
}

/// Maps the status of a response that did not come from a blaze server.
///
/// Redirects always map to `Internal`: RPC calls are POSTs and must never be redirected.
pub fn error_from_intermediary(status: StatusCode, msg: String) -> Error {
    if status.is_redirection() {
        return Error::internal(msg);
    }

    match status.as_u16() {
        401 => Error::unauthenticated(msg),
        403 => Error::permission_denied(msg),
        404 => Error::bad_route(msg),
        429 => Error::resource_exhausted(msg),
        502..=504 => Error::unavailable(msg),
        code => Error::unknown(msg).with_meta("code", code.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::marshal_error;
    use crate::error::ErrorKind;

    #[test]
    fn test_envelope_is_decoded() {
        let body = marshal_error(&Error::already_exists("dup").with_meta("id", "7"));
        let err = error_from_response(StatusCode::CONFLICT, &HeaderMap::new(), &body);
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.msg(), "dup");
        assert_eq!(err.meta("id"), "7");
    }

    #[test]
    fn test_intermediary_statuses() {
        let cases = [
            (401, ErrorKind::Unauthenticated),
            (403, ErrorKind::PermissionDenied),
            (404, ErrorKind::BadRoute),
            (429, ErrorKind::ResourceExhausted),
            (502, ErrorKind::Unavailable),
            (503, ErrorKind::Unavailable),
            (504, ErrorKind::Unavailable),
            (400, ErrorKind::Unknown),
            (500, ErrorKind::Unknown),
        ];

        for (code, kind) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            let err = error_from_response(status, &HeaderMap::new(), b"<html>busy</html>");
            assert_eq!(err.kind(), kind, "status {code}");
        }
    }

    #[test]
    fn test_unknown_status_is_tagged_with_code() {
        let err = error_from_response(StatusCode::IM_A_TEAPOT, &HeaderMap::new(), b"");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.meta("code"), "418");
        assert_eq!(
            err.msg(),
            "Error from intermediary with HTTP status code 418 \"I'm a teapot\""
        );
    }

    #[test]
    fn test_envelope_without_code_is_intermediary() {
        let body = br#"{"msg":"slow down","type":"not_found"}"#;
        let err = error_from_response(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), body);
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_redirect_ignores_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, "https://elsewhere/".parse().unwrap());
        let body = marshal_error(&Error::not_found("looks valid"));

        let err = error_from_response(StatusCode::FOUND, &headers, &body);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.meta("location"), "https://elsewhere/");
        assert_eq!(
            err.msg(),
            "unexpected HTTP status code 302 \"Found\" received, Location=\"https://elsewhere/\""
        );
    }

    #[test]
    fn test_unregistered_type_is_internal() {
        let body = br#"{"code":"418","msg":"x","type":"teapot"}"#;
        let err = error_from_response(StatusCode::IM_A_TEAPOT, &HeaderMap::new(), body);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            err.msg(),
            "invalid type returned from server error response: teapot"
        );
    }
}
