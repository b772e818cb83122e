//! Entity abstraction for the synchronization layer.
//!
//! The layer is generic over the record type being replicated. Entities are
//! treated as whole-value replacements: a write overwrites whatever any
//! store currently holds for that id, with no field-level diffing.

use std::fmt::Display;
use std::hash::Hash;

/// A replicable record with a unique identifier.
///
/// Implement this for any domain type that should flow through the
/// [`CompositeRepository`](crate::CompositeRepository). The id is used as
/// the key in all three stores, so it must be stable and printable.
///
/// # Example
///
/// ```
/// use polysync::Entity;
///
/// #[derive(Clone)]
/// struct Credential {
///     id: String,
///     tenant: String,
///     payload: String,
/// }
///
/// impl Entity for Credential {
///     type Id = String;
///
///     fn id(&self) -> String {
///         self.id.clone()
///     }
///
///     fn scoped_field(&self) -> Option<String> {
///         Some(self.tenant.clone())
///     }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + 'static {
    /// Opaque, comparable identifier. `Display` is required because the id
    /// doubles as the storage key in the SQL and Redis adapters.
    type Id: Clone + Eq + Hash + Display + Send + Sync + 'static;

    /// The unique identifier of this entity.
    fn id(&self) -> Self::Id;

    /// Value of the secondary-indexed field, if this entity type has one
    /// (e.g. a tenant key or category). Drives
    /// [`find_by_scoped_field`](crate::CompositeRepository::find_by_scoped_field)
    /// lookups against the document store.
    fn scoped_field(&self) -> Option<String> {
        None
    }
}
