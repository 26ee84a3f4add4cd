//! Two-stage sign-option pipelines.
//!
//! A provisioner that authorizes a signing request answers with a
//! [`SignOptions`] value: an ordered list of [`Modifier`]s followed by an
//! ordered list of [`Validator`]s. [`Pipeline::apply`] runs every modifier,
//! then every validator, and stops at the first failure. Modifiers never run
//! after a validator, so the final bounds are always what gets checked.

use std::fmt;

use crate::{error::Result, ssh::SshCertificate, x509::CertificateTemplate};

/// Mutates a certificate template.
///
/// Implementations must be idempotent: applying a modifier twice yields the
/// same template as applying it once.
pub trait Modifier<T>: Send + Sync + fmt::Debug {
    /// Applies the modification.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be brought into shape.
    fn modify(&self, target: &mut T) -> Result<()>;
}

/// Checks a certificate template.
pub trait Validator<T>: Send + Sync + fmt::Debug {
    /// Returns `Ok(())` if the template satisfies the rule.
    ///
    /// # Errors
    ///
    /// Returns the policy violation.
    fn valid(&self, target: &T) -> Result<()>;
}

/// Ordered modifiers followed by ordered validators.
pub struct Pipeline<T> {
    modifiers: Vec<Box<dyn Modifier<T>>>,
    validators: Vec<Box<dyn Validator<T>>>,
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self { modifiers: Vec::new(), validators: Vec::new() }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("modifiers", &self.modifiers)
            .field("validators", &self.validators)
            .finish()
    }
}

impl<T> Pipeline<T> {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a modifier.
    #[must_use]
    pub fn with_modifier(mut self, modifier: impl Modifier<T> + 'static) -> Self {
        self.modifiers.push(Box::new(modifier));
        self
    }

    /// Appends a validator.
    #[must_use]
    pub fn with_validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// The modifier stage, in application order.
    #[must_use]
    pub fn modifiers(&self) -> &[Box<dyn Modifier<T>>] {
        &self.modifiers
    }

    /// The validator stage, in evaluation order.
    #[must_use]
    pub fn validators(&self) -> &[Box<dyn Validator<T>>] {
        &self.validators
    }

    /// Total number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modifiers.len() + self.validators.len()
    }

    /// Returns `true` if the pipeline holds no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every modifier, then every validator.
    ///
    /// # Errors
    ///
    /// Returns the first modifier or validator error; later options do not
    /// run.
    pub fn apply(&self, target: &mut T) -> Result<()> {
        for modifier in &self.modifiers {
            modifier.modify(target)?;
        }
        self.validate(target)
    }

    /// Runs only the validator stage.
    ///
    /// # Errors
    ///
    /// Returns the first validator error.
    pub fn validate(&self, target: &T) -> Result<()> {
        self.validators.iter().try_for_each(|v| v.valid(target))
    }
}

/// The kind of certificate a signing request asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SignMethod {
    /// X.509 certificate.
    #[default]
    X509,
    /// SSH certificate.
    Ssh,
}

impl fmt::Display for SignMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X509 => "x509",
            Self::Ssh => "ssh",
        })
    }
}

/// Request context passed to `authorize_sign`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignContext {
    /// Requested certificate kind.
    pub method: SignMethod,
}

impl SignContext {
    /// Context for an X.509 signing request.
    #[must_use]
    pub fn x509() -> Self {
        Self { method: SignMethod::X509 }
    }

    /// Context for an SSH signing request.
    #[must_use]
    pub fn ssh() -> Self {
        Self { method: SignMethod::Ssh }
    }
}

/// The sign options returned by a successful `authorize_sign`.
#[derive(Debug)]
pub enum SignOptions {
    /// Options for an X.509 template.
    X509(Pipeline<CertificateTemplate>),
    /// Options for an SSH certificate.
    Ssh(Pipeline<SshCertificate>),
}

impl SignOptions {
    /// The certificate kind these options apply to.
    #[must_use]
    pub fn method(&self) -> SignMethod {
        match self {
            Self::X509(_) => SignMethod::X509,
            Self::Ssh(_) => SignMethod::Ssh,
        }
    }

    /// Total number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::X509(p) => p.len(),
            Self::Ssh(p) => p.len(),
        }
    }

    /// Returns `true` if no options are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the X.509 pipeline, if these are X.509 options.
    #[must_use]
    pub fn into_x509(self) -> Option<Pipeline<CertificateTemplate>> {
        match self {
            Self::X509(p) => Some(p),
            Self::Ssh(_) => None,
        }
    }

    /// Returns the SSH pipeline, if these are SSH options.
    #[must_use]
    pub fn into_ssh(self) -> Option<Pipeline<SshCertificate>> {
        match self {
            Self::Ssh(p) => Some(p),
            Self::X509(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::error::ProvisionerError;

    #[derive(Debug)]
    struct Push(u32);

    impl Modifier<Vec<u32>> for Push {
        fn modify(&self, target: &mut Vec<u32>) -> Result<()> {
            if !target.contains(&self.0) {
                target.push(self.0);
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct MaxLen(usize, Arc<AtomicUsize>);

    impl Validator<Vec<u32>> for MaxLen {
        fn valid(&self, target: &Vec<u32>) -> Result<()> {
            self.1.fetch_add(1, Ordering::SeqCst);
            if target.len() > self.0 {
                return Err(ProvisionerError::forbidden(format!("too long: {}", target.len())));
            }
            Ok(())
        }
    }

    #[test]
    fn test_modifiers_run_before_validators() {
        let calls = Arc::new(AtomicUsize::new(0));
        // The validator is registered first but must see the modified value.
        let pipeline = Pipeline::new()
            .with_validator(MaxLen(1, Arc::clone(&calls)))
            .with_modifier(Push(1))
            .with_modifier(Push(2));

        let mut v = Vec::new();
        let err = pipeline.apply(&mut v).unwrap_err();
        assert_eq!(err.to_string(), "too long: 2");
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn test_validators_fail_fast() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new()
            .with_validator(MaxLen(0, Arc::clone(&first)))
            .with_validator(MaxLen(0, Arc::clone(&second)));

        assert!(pipeline.apply(&mut vec![7]).is_err());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let pipeline = Pipeline::new().with_modifier(Push(1)).with_modifier(Push(2));
        let mut once = Vec::new();
        pipeline.apply(&mut once).unwrap();
        let mut twice = once.clone();
        pipeline.apply(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sign_options_method() {
        let options = SignOptions::X509(Pipeline::new());
        assert_eq!(options.method(), SignMethod::X509);
        assert!(options.is_empty());
        assert!(options.into_ssh().is_none());
        assert_eq!(SignMethod::Ssh.to_string(), "ssh");
    }
}
