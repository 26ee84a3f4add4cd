//! Axum routes.
//!
//! The TLS terminator is expected to attach the verified client chain to
//! each request as a [`PeerCertificates`] extension, leaf first.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Bytes, to_bytes},
    extract::{Request, State},
    http::StatusCode,
    routing::post,
};
use privca_authority::{Authority, RevokeOptions};
use privca_provisioner::{CertificateInfo, Provisioner};

use crate::{
    error::{ApiError, BoxError, Result},
    revoke::{RevokeRequest, RevokeResponse},
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// DER-encoded client certificates of an mTLS connection, leaf first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerCertificates(pub Vec<Vec<u8>>);

impl PeerCertificates {
    /// The client's own certificate.
    #[must_use]
    pub fn leaf(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }
}

/// What the HTTP layer needs from the authority.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Resolves the provisioner that issued a client certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is not attributable.
    fn load_provisioner_by_certificate(&self, der: &[u8]) -> std::result::Result<Arc<Provisioner>, BoxError>;

    /// Authorizes and records a revocation.
    ///
    /// # Errors
    ///
    /// Returns the authorization or storage error.
    async fn revoke(&self, opts: &RevokeOptions) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl CertificateAuthority for Authority {
    fn load_provisioner_by_certificate(&self, der: &[u8]) -> std::result::Result<Arc<Provisioner>, BoxError> {
        Ok(Authority::load_provisioner_by_certificate(self, der)?)
    }

    async fn revoke(&self, opts: &RevokeOptions) -> std::result::Result<(), BoxError> {
        Ok(Authority::revoke(self, opts).await?)
    }
}

/// Builds the router serving `/revoke` and `/1.0/revoke`.
pub fn router(authority: Arc<dyn CertificateAuthority>) -> Router {
    Router::new()
        .route("/revoke", post(revoke))
        .route("/1.0/revoke", post(revoke))
        .with_state(authority)
}

fn parse_body(body: &Bytes) -> Result<RevokeRequest> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "malformed revoke request");
        ApiError::bad_request("error reading request body")
    })
}

/// `POST /revoke`.
///
/// With an OTT the authority authenticates the token. Without one, the
/// client certificate must be present and its serial must match the
/// requested serial.
#[tracing::instrument(skip_all)]
pub async fn revoke(
    State(authority): State<Arc<dyn CertificateAuthority>>,
    request: Request,
) -> Result<Json<RevokeResponse>> {
    let peer = request.extensions().get::<PeerCertificates>().cloned();
    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::bad_request("error reading request body"))?;
    let body = parse_body(&body)?;
    body.validate()?;

    let reason_code = u8::try_from(body.reason_code).map_err(|_| ApiError::bad_request("reasonCode out of bounds"))?;
    let options = RevokeOptions::builder()
        .serial(body.serial.clone())
        .reason_code(reason_code)
        .reason(body.reason.clone())
        .passive_only(body.passive);

    let options = if let Some(ott) = body.ott() {
        tracing::info!(serial = %body.serial, reason_code, "revoke request with token");
        options.ott(ott).build()
    } else {
        let leaf = peer
            .as_ref()
            .and_then(PeerCertificates::leaf)
            .ok_or_else(|| ApiError::bad_request("missing ott or peer certificate"))?;
        let info = CertificateInfo::from_der(leaf).map_err(|e| ApiError::from_collaborator(e.into(), StatusCode::BAD_REQUEST))?;
        if info.serial != body.serial {
            return Err(ApiError::bad_request("serial number in mTLS certificate different than body"));
        }
        let provisioner = authority
            .load_provisioner_by_certificate(leaf)
            .map_err(|e| ApiError::from_collaborator(e, StatusCode::UNAUTHORIZED))?;
        tracing::info!(serial = %body.serial, reason_code, provisioner = %provisioner.id(), "revoke request with client certificate");
        options.mtls(true).crt(leaf.to_vec()).build()
    };

    authority.revoke(&options).await.map_err(|e| ApiError::from_collaborator(e, StatusCode::FORBIDDEN))?;
    Ok(Json(RevokeResponse::ok()))
}
