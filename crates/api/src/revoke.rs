//! Revoke request and response bodies.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Highest RFC 5280 reason code (`aACompromise`).
pub const MAX_REASON_CODE: i64 = 10;

/// Reason code 7 is not assigned by RFC 5280.
const UNUSED_REASON_CODE: i64 = 7;

/// Body of a revoke request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    /// Serial number of the certificate, in decimal.
    #[serde(default)]
    pub serial: String,
    /// One-time revocation token; absent for mTLS requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ott: Option<String>,
    /// RFC 5280 reason code.
    #[serde(default)]
    pub reason_code: i64,
    /// Free-form reason.
    #[serde(default)]
    pub reason: String,
    /// Passive revocation (record only).
    #[serde(default)]
    pub passive: bool,
}

impl RevokeRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] for a missing serial or an invalid
    /// reason code, and [`ApiError::NotImplemented`] for active revocation.
    pub fn validate(&self) -> Result<()> {
        if self.serial.is_empty() {
            return Err(ApiError::bad_request("missing serial"));
        }
        if !(0..=MAX_REASON_CODE).contains(&self.reason_code) || self.reason_code == UNUSED_REASON_CODE {
            return Err(ApiError::bad_request("reasonCode out of bounds"));
        }
        if !self.passive {
            return Err(ApiError::not_implemented("non-passive revocation not implemented"));
        }
        Ok(())
    }

    /// The one-time token, if one was sent.
    #[must_use]
    pub fn ott(&self) -> Option<&str> {
        self.ott.as_deref().filter(|ott| !ott.is_empty())
    }
}

/// Body of a successful revoke response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    /// Always `ok`.
    pub status: String,
}

impl RevokeResponse {
    /// The success response.
    #[must_use]
    pub fn ok() -> Self {
        Self { status: "ok".to_owned() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    fn request(serial: &str, reason_code: i64, passive: bool) -> RevokeRequest {
        RevokeRequest { serial: serial.to_owned(), reason_code, passive, ..RevokeRequest::default() }
    }

    #[test]
    fn test_validate() {
        let cases = [
            (request("", 0, true), Some((StatusCode::BAD_REQUEST, "missing serial"))),
            (request("10", -1, true), Some((StatusCode::BAD_REQUEST, "reasonCode out of bounds"))),
            (request("10", 7, true), Some((StatusCode::BAD_REQUEST, "reasonCode out of bounds"))),
            (request("10", 11, true), Some((StatusCode::BAD_REQUEST, "reasonCode out of bounds"))),
            (
                request("10", 1, false),
                Some((StatusCode::NOT_IMPLEMENTED, "non-passive revocation not implemented")),
            ),
            (request("10", 0, true), None),
            (request("10", 10, true), None),
        ];
        for (req, expected) in cases {
            match (req.validate(), expected) {
                (Ok(()), None) => {},
                (Err(err), Some((status, message))) => {
                    assert_eq!(err.status_code(), status, "{req:?}");
                    assert_eq!(err.to_string(), message);
                },
                (result, expected) => panic!("{req:?}: got {result:?}, expected {expected:?}"),
            }
        }
    }

    #[test]
    fn test_wire_names() {
        let req: RevokeRequest = serde_json::from_str(
            r#"{"serial": "42", "reasonCode": 4, "reason": "superseded", "ott": "tok", "passive": true}"#,
        )
        .unwrap();
        assert_eq!(req.reason_code, 4);
        assert_eq!(req.ott(), Some("tok"));

        let empty_ott: RevokeRequest = serde_json::from_str(r#"{"serial": "1", "ott": ""}"#).unwrap();
        assert_eq!(empty_ott.ott(), None);

        assert_eq!(serde_json::to_string(&RevokeResponse::ok()).unwrap(), r#"{"status":"ok"}"#);
    }
}
