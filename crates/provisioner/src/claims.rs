//! Claims: per-provisioner policy overrides and their resolution.
//!
//! [`Claims`] is a sparse override layer; every field is optional and an
//! absent field inherits from the authority-wide [`GlobalClaims`], which is
//! always fully populated. [`Claimer`] joins the two and is the only way the
//! rest of the crate reads policy.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use privca_provisioner::claims::{Claimer, Claims, GlobalClaims};
//!
//! let overrides = Claims { max_tls_dur: Some(Duration::from_secs(3600)), ..Claims::default() };
//! let claimer = Claimer::new(Some(overrides), GlobalClaims::default())?;
//!
//! assert_eq!(claimer.max_tls_cert_duration(), Duration::from_secs(3600));
//! assert_eq!(claimer.min_tls_cert_duration(), Duration::from_secs(300));
//! # Ok::<(), privca_provisioner::ProvisionerError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    duration::HumanDuration,
    error::{ProvisionerError, Result},
};

/// Largest duration a claim may hold: the span of a signed 64-bit
/// nanosecond count, roughly 292 years.
pub const MAX_CLAIM_DURATION: Duration = Duration::from_nanos(i64::MAX.unsigned_abs());

/// Minimum TLS certificate duration used when nothing else is configured.
pub const DEFAULT_MIN_TLS_DURATION: Duration = Duration::from_secs(5 * 60);
/// Maximum TLS certificate duration used when nothing else is configured.
pub const DEFAULT_MAX_TLS_DURATION: Duration = Duration::from_secs(24 * 3600);
/// Default TLS certificate duration used when nothing else is configured.
pub const DEFAULT_TLS_DURATION: Duration = Duration::from_secs(24 * 3600);
/// Minimum SSH user certificate duration used when nothing else is configured.
pub const DEFAULT_MIN_USER_SSH_DURATION: Duration = Duration::from_secs(5 * 60);
/// Maximum SSH user certificate duration used when nothing else is configured.
pub const DEFAULT_MAX_USER_SSH_DURATION: Duration = Duration::from_secs(24 * 3600);
/// Default SSH user certificate duration used when nothing else is configured.
pub const DEFAULT_USER_SSH_DURATION: Duration = Duration::from_secs(4 * 3600);
/// Minimum SSH host certificate duration used when nothing else is configured.
pub const DEFAULT_MIN_HOST_SSH_DURATION: Duration = Duration::from_secs(5 * 60);
/// Maximum SSH host certificate duration used when nothing else is configured.
pub const DEFAULT_MAX_HOST_SSH_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);
/// Default SSH host certificate duration used when nothing else is configured.
pub const DEFAULT_HOST_SSH_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Sparse policy overrides.
///
/// Used both per provisioner and as the authority-level override of the
/// built-in defaults. Durations are human-readable strings in JSON
/// (`"5m"`, `"24h"`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Minimum TLS certificate duration.
    #[serde(
        rename = "minTLSCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_tls_dur: Option<Duration>,
    /// Maximum TLS certificate duration.
    #[serde(
        rename = "maxTLSCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_tls_dur: Option<Duration>,
    /// Default TLS certificate duration.
    #[serde(
        rename = "defaultTLSCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_tls_dur: Option<Duration>,
    /// Disables the renewal flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_renewal: Option<bool>,
    /// Minimum SSH user certificate duration.
    #[serde(
        rename = "minUserSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_user_ssh_dur: Option<Duration>,
    /// Maximum SSH user certificate duration.
    #[serde(
        rename = "maxUserSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_user_ssh_dur: Option<Duration>,
    /// Default SSH user certificate duration.
    #[serde(
        rename = "defaultUserSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_user_ssh_dur: Option<Duration>,
    /// Minimum SSH host certificate duration.
    #[serde(
        rename = "minHostSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_host_ssh_dur: Option<Duration>,
    /// Maximum SSH host certificate duration.
    #[serde(
        rename = "maxHostSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_host_ssh_dur: Option<Duration>,
    /// Default SSH host certificate duration.
    #[serde(
        rename = "defaultHostSSHCertDuration",
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_host_ssh_dur: Option<Duration>,
    /// Enables SSH certificate signing.
    #[serde(rename = "enableSSHCA", default, skip_serializing_if = "Option::is_none")]
    pub enable_ssh_ca: Option<bool>,
}

/// Fully-populated authority-wide policy.
///
/// Unlike [`Claims`], no field may be absent; this is the bottom of the
/// resolution chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalClaims {
    /// Minimum TLS certificate duration.
    pub min_tls_dur: Duration,
    /// Maximum TLS certificate duration.
    pub max_tls_dur: Duration,
    /// Default TLS certificate duration.
    pub default_tls_dur: Duration,
    /// Disables the renewal flow.
    pub disable_renewal: bool,
    /// Minimum SSH user certificate duration.
    pub min_user_ssh_dur: Duration,
    /// Maximum SSH user certificate duration.
    pub max_user_ssh_dur: Duration,
    /// Default SSH user certificate duration.
    pub default_user_ssh_dur: Duration,
    /// Minimum SSH host certificate duration.
    pub min_host_ssh_dur: Duration,
    /// Maximum SSH host certificate duration.
    pub max_host_ssh_dur: Duration,
    /// Default SSH host certificate duration.
    pub default_host_ssh_dur: Duration,
    /// Enables SSH certificate signing.
    pub enable_ssh_ca: bool,
}

impl Default for GlobalClaims {
    fn default() -> Self {
        Self {
            min_tls_dur: DEFAULT_MIN_TLS_DURATION,
            max_tls_dur: DEFAULT_MAX_TLS_DURATION,
            default_tls_dur: DEFAULT_TLS_DURATION,
            disable_renewal: false,
            min_user_ssh_dur: DEFAULT_MIN_USER_SSH_DURATION,
            max_user_ssh_dur: DEFAULT_MAX_USER_SSH_DURATION,
            default_user_ssh_dur: DEFAULT_USER_SSH_DURATION,
            min_host_ssh_dur: DEFAULT_MIN_HOST_SSH_DURATION,
            max_host_ssh_dur: DEFAULT_MAX_HOST_SSH_DURATION,
            default_host_ssh_dur: DEFAULT_HOST_SSH_DURATION,
            enable_ssh_ca: false,
        }
    }
}

impl GlobalClaims {
    /// Returns a copy of `self` with every field present in `overrides`
    /// replaced.
    #[must_use]
    pub fn with_overrides(&self, overrides: &Claims) -> Self {
        Self {
            min_tls_dur: overrides.min_tls_dur.unwrap_or(self.min_tls_dur),
            max_tls_dur: overrides.max_tls_dur.unwrap_or(self.max_tls_dur),
            default_tls_dur: overrides.default_tls_dur.unwrap_or(self.default_tls_dur),
            disable_renewal: overrides.disable_renewal.unwrap_or(self.disable_renewal),
            min_user_ssh_dur: overrides.min_user_ssh_dur.unwrap_or(self.min_user_ssh_dur),
            max_user_ssh_dur: overrides.max_user_ssh_dur.unwrap_or(self.max_user_ssh_dur),
            default_user_ssh_dur: overrides
                .default_user_ssh_dur
                .unwrap_or(self.default_user_ssh_dur),
            min_host_ssh_dur: overrides.min_host_ssh_dur.unwrap_or(self.min_host_ssh_dur),
            max_host_ssh_dur: overrides.max_host_ssh_dur.unwrap_or(self.max_host_ssh_dur),
            default_host_ssh_dur: overrides
                .default_host_ssh_dur
                .unwrap_or(self.default_host_ssh_dur),
            enable_ssh_ca: overrides.enable_ssh_ca.unwrap_or(self.enable_ssh_ca),
        }
    }
}

impl TryFrom<Claims> for GlobalClaims {
    type Error = ProvisionerError;

    /// Converts a sparse [`Claims`] into global policy, failing on the first
    /// absent field.
    fn try_from(claims: Claims) -> Result<Self> {
        fn required<T>(value: Option<T>, field: &str) -> Result<T> {
            value.ok_or_else(|| ProvisionerError::config(format!("claims: global {field} is required")))
        }

        Ok(Self {
            min_tls_dur: required(claims.min_tls_dur, "minTLSCertDuration")?,
            max_tls_dur: required(claims.max_tls_dur, "maxTLSCertDuration")?,
            default_tls_dur: required(claims.default_tls_dur, "defaultTLSCertDuration")?,
            disable_renewal: required(claims.disable_renewal, "disableRenewal")?,
            min_user_ssh_dur: required(claims.min_user_ssh_dur, "minUserSSHCertDuration")?,
            max_user_ssh_dur: required(claims.max_user_ssh_dur, "maxUserSSHCertDuration")?,
            default_user_ssh_dur: required(
                claims.default_user_ssh_dur,
                "defaultUserSSHCertDuration",
            )?,
            min_host_ssh_dur: required(claims.min_host_ssh_dur, "minHostSSHCertDuration")?,
            max_host_ssh_dur: required(claims.max_host_ssh_dur, "maxHostSSHCertDuration")?,
            default_host_ssh_dur: required(
                claims.default_host_ssh_dur,
                "defaultHostSSHCertDuration",
            )?,
            enable_ssh_ca: required(claims.enable_ssh_ca, "enableSSHCA")?,
        })
    }
}

impl From<&GlobalClaims> for Claims {
    fn from(global: &GlobalClaims) -> Self {
        Self {
            min_tls_dur: Some(global.min_tls_dur),
            max_tls_dur: Some(global.max_tls_dur),
            default_tls_dur: Some(global.default_tls_dur),
            disable_renewal: Some(global.disable_renewal),
            min_user_ssh_dur: Some(global.min_user_ssh_dur),
            max_user_ssh_dur: Some(global.max_user_ssh_dur),
            default_user_ssh_dur: Some(global.default_user_ssh_dur),
            min_host_ssh_dur: Some(global.min_host_ssh_dur),
            max_host_ssh_dur: Some(global.max_host_ssh_dur),
            default_host_ssh_dur: Some(global.default_host_ssh_dur),
            enable_ssh_ca: Some(global.enable_ssh_ca),
        }
    }
}

/// Generates an accessor returning the provisioner override when present,
/// else the global value.
macro_rules! effective {
    ($(#[$meta:meta])* $name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        #[must_use]
        pub fn $name(&self) -> $ty {
            self.claims.$field.unwrap_or(self.global.$field)
        }
    };
}

/// Resolves effective policy for one provisioner.
///
/// A `Claimer` can only be obtained through [`Claimer::new`], which rejects
/// inconsistent TLS bounds, so every instance in circulation satisfies
/// `0 < min <= default <= max` for TLS durations. Instances are immutable and
/// safe to share across request threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claimer {
    global: GlobalClaims,
    claims: Claims,
}

impl Claimer {
    /// Creates a claimer from optional provisioner overrides and the global
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] if the merged TLS bounds are
    /// inconsistent (see [`Claimer::validate`]), or if SSH signing is enabled
    /// and the merged user or host SSH bounds are inconsistent.
    pub fn new(claims: Option<Claims>, global: GlobalClaims) -> Result<Self> {
        let claimer = Self { global, claims: claims.unwrap_or_default() };
        claimer.validate()?;
        if claimer.is_ssh_ca_enabled() {
            claimer.validate_ssh()?;
        }
        Ok(claimer)
    }

    /// Returns the merge of the provisioner overrides and the global policy.
    #[must_use]
    pub fn claims(&self) -> Claims {
        Claims::from(&self.global.with_overrides(&self.claims))
    }

    /// Returns the global policy this claimer falls back to.
    #[must_use]
    pub fn global(&self) -> &GlobalClaims {
        &self.global
    }

    effective!(
        /// Default TLS certificate duration.
        default_tls_cert_duration, default_tls_dur, Duration
    );
    effective!(
        /// Minimum TLS certificate duration.
        min_tls_cert_duration, min_tls_dur, Duration
    );
    effective!(
        /// Maximum TLS certificate duration.
        max_tls_cert_duration, max_tls_dur, Duration
    );
    effective!(
        /// Whether renewal is disabled.
        is_disable_renewal, disable_renewal, bool
    );
    effective!(
        /// Default SSH user certificate duration.
        default_user_ssh_cert_duration, default_user_ssh_dur, Duration
    );
    effective!(
        /// Minimum SSH user certificate duration.
        min_user_ssh_cert_duration, min_user_ssh_dur, Duration
    );
    effective!(
        /// Maximum SSH user certificate duration.
        max_user_ssh_cert_duration, max_user_ssh_dur, Duration
    );
    effective!(
        /// Default SSH host certificate duration.
        default_host_ssh_cert_duration, default_host_ssh_dur, Duration
    );
    effective!(
        /// Minimum SSH host certificate duration.
        min_host_ssh_cert_duration, min_host_ssh_dur, Duration
    );
    effective!(
        /// Maximum SSH host certificate duration.
        max_host_ssh_cert_duration, max_host_ssh_dur, Duration
    );
    effective!(
        /// Whether SSH certificate signing is enabled.
        is_ssh_ca_enabled, enable_ssh_ca, bool
    );

    /// Validates the effective TLS bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] naming the first violated rule:
    /// `min <= 0`, `max <= 0`, `default <= 0`, `max < min`, `default < min`,
    /// `max < default`, `max > MAX_CLAIM_DURATION`.
    pub fn validate(&self) -> Result<()> {
        let min = self.min_tls_cert_duration();
        let max = self.max_tls_cert_duration();
        let def = self.default_tls_cert_duration();

        let message = if min.is_zero() {
            "claims: MinTLSCertDuration must be greater than 0".to_owned()
        } else if max.is_zero() {
            "claims: MaxTLSCertDuration must be greater than 0".to_owned()
        } else if def.is_zero() {
            "claims: DefaultTLSCertDuration must be greater than 0".to_owned()
        } else if max < min {
            format!(
                "claims: MaxCertDuration cannot be less than MinCertDuration: \
                 MaxCertDuration - {}, MinCertDuration - {}",
                HumanDuration(max),
                HumanDuration(min)
            )
        } else if def < min {
            format!(
                "claims: DefaultCertDuration cannot be less than MinCertDuration: \
                 DefaultCertDuration - {}, MinCertDuration - {}",
                HumanDuration(def),
                HumanDuration(min)
            )
        } else if max < def {
            format!(
                "claims: MaxCertDuration cannot be less than DefaultCertDuration: \
                 MaxCertDuration - {}, DefaultCertDuration - {}",
                HumanDuration(max),
                HumanDuration(def)
            )
        } else if max > MAX_CLAIM_DURATION {
            format!(
                "claims: MaxTLSCertDuration cannot be greater than {}",
                HumanDuration(MAX_CLAIM_DURATION)
            )
        } else {
            return Ok(());
        };
        Err(ProvisionerError::config(message))
    }

    /// Validates the effective SSH user and host bounds with the same rules
    /// as [`Claimer::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionerError::Config`] naming the first violated rule.
    pub fn validate_ssh(&self) -> Result<()> {
        check_ssh_bounds(
            "UserSSH",
            self.min_user_ssh_cert_duration(),
            self.max_user_ssh_cert_duration(),
            self.default_user_ssh_cert_duration(),
        )?;
        check_ssh_bounds(
            "HostSSH",
            self.min_host_ssh_cert_duration(),
            self.max_host_ssh_cert_duration(),
            self.default_host_ssh_cert_duration(),
        )
    }
}

fn check_ssh_bounds(kind: &str, min: Duration, max: Duration, def: Duration) -> Result<()> {
    let (min_name, max_name, def_name) = (
        format!("Min{kind}CertDuration"),
        format!("Max{kind}CertDuration"),
        format!("Default{kind}CertDuration"),
    );
    let message = if min.is_zero() {
        format!("claims: {min_name} must be greater than 0")
    } else if max.is_zero() {
        format!("claims: {max_name} must be greater than 0")
    } else if def.is_zero() {
        format!("claims: {def_name} must be greater than 0")
    } else if max < min {
        format!(
            "claims: {max_name} cannot be less than {min_name}: {max_name} - {}, {min_name} - {}",
            HumanDuration(max),
            HumanDuration(min)
        )
    } else if def < min {
        format!(
            "claims: {def_name} cannot be less than {min_name}: {def_name} - {}, {min_name} - {}",
            HumanDuration(def),
            HumanDuration(min)
        )
    } else if max < def {
        format!(
            "claims: {max_name} cannot be less than {def_name}: {max_name} - {}, {def_name} - {}",
            HumanDuration(max),
            HumanDuration(def)
        )
    } else if max > MAX_CLAIM_DURATION {
        format!("claims: {max_name} cannot be greater than {}", HumanDuration(MAX_CLAIM_DURATION))
    } else {
        return Ok(());
    };
    Err(ProvisionerError::config(message))
}
