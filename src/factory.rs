//! Resource factories and resource-class identifiers

use crate::errors::BoxError;

use async_trait::async_trait;
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// Opaque identifier of one provisionable resource variant, such as a
/// backing-service model name. Cheap to clone.
///
/// # Examples
///
/// ```
/// use scoped_lease::ResourceClassId;
///
/// let id = ResourceClassId::from("gpt-4o-mini");
/// assert_eq!(id.as_str(), "gpt-4o-mini");
/// assert_eq!(id, "gpt-4o-mini");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ResourceClassId(Arc<str>);

impl ResourceClassId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for identifiers that are empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for ResourceClassId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for ResourceClassId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceClassId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceClassId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl PartialEq<str> for ResourceClassId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ResourceClassId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Why a factory could not report the identifiers it serves
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The provider has no listing endpoint; the factory is skipped
    #[error("provider does not support resource-class discovery")]
    Unsupported,

    /// The provider supports discovery but the call failed
    #[error("provider unreachable: {0}")]
    Unavailable(#[source] BoxError),
}

/// Creates, validates and destroys instances of one resource kind
///
/// Implementations wrap a concrete client (for example one per remote AI
/// provider). One factory may serve many resource classes; the registry
/// builds a separate pool per class and hands the class id to [`create`].
///
/// `validate_configuration` and `destroy` are synchronous: the first runs
/// during startup, the second may run while a scope is being torn down.
///
/// [`create`]: ResourceFactory::create
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Resource: Send + Sync + 'static;

    /// Short name used in logs and errors, e.g. `"openai"`
    fn kind(&self) -> &str;

    /// Cheap check that credentials and other prerequisites are present
    fn validate_configuration(&self) -> bool;

    /// Ask the provider which resource classes it can serve
    async fn discover_served_identifiers(&self) -> Result<Vec<ResourceClassId>, DiscoveryError> {
        Err(DiscoveryError::Unsupported)
    }

    /// Build one instance bound to `id`
    async fn create(&self, id: &ResourceClassId) -> Result<Self::Resource, BoxError>;

    /// Check an idle instance before it is leased again
    async fn is_valid(&self, _instance: &Self::Resource) -> bool {
        true
    }

    /// Release whatever the instance holds. Called once per destroyed instance.
    fn destroy(&self, _instance: Arc<Self::Resource>) {}
}

/// Rejects missing credentials and the usual template placeholders
///
/// Factories call this from [`ResourceFactory::validate_configuration`].
///
/// ```
/// use scoped_lease::factory::is_real_credential;
///
/// assert!(is_real_credential(Some("sk-live-123")));
/// assert!(!is_real_credential(Some("your-api-key-here")));
/// assert!(!is_real_credential(Some("  ")));
/// assert!(!is_real_credential(None));
/// ```
pub fn is_real_credential(value: Option<&str>) -> bool {
    const PLACEHOLDERS: &[&str] = &["changeme", "change-me", "placeholder", "xxx", "todo"];

    let Some(value) = value.map(str::trim) else {
        return false;
    };
    if value.is_empty() {
        return false;
    }

    let lowered = value.to_ascii_lowercase();
    if lowered.starts_with("your") || (lowered.starts_with('<') && lowered.ends_with('>')) {
        return false;
    }
    !PLACEHOLDERS.contains(&lowered.as_str())
}
