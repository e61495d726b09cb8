//! Model declaration traits
//!
//! A model type is a newtype over [`Instance`](crate::instance::Instance)
//! that declares its fields once, at schema registration time. There is no
//! code generation: registration builds a `{field key -> binder}` table and
//! every accessor on the newtype delegates through that table.
//!
//! ```ignore
//! #[derive(Clone)]
//! struct Order { inner: Instance }
//!
//! impl Model for Order {
//!     fn type_name() -> &'static str { "Order" }
//!     fn kind() -> ModelKind { ModelKind::Entity }
//!     fn declare(t: &mut TypeBuilder) {
//!         t.string("customer");
//!         t.long("total");
//!         t.has_many::<LineItem>("lineItems", "orderId", "byOrder");
//!     }
//!     fn from_instance(inner: Instance) -> Self { Order { inner } }
//!     fn instance(&self) -> &Instance { &self.inner }
//! }
//! ```

use crate::instance::Instance;
use crate::schema::TypeBuilder;

/// Whether a model has its own durable identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Stored as a separate document with `_id`/`_rev`
    Entity,
    /// A document fragment owned by a parent; no identity of its own
    Embedded,
}

/// A typed view over a document, declared against the schema
pub trait Model: Clone + Sized + Send + Sync + 'static {
    /// Type discriminator, persisted under `$type` and used as the
    /// collection / design-document name
    fn type_name() -> &'static str;

    /// Entity or embedded
    fn kind() -> ModelKind;

    /// Declare fields and indexes. Runs once, at schema registration.
    fn declare(t: &mut TypeBuilder);

    /// Wrap a bound instance
    fn from_instance(instance: Instance) -> Self;

    /// The bound instance behind this value
    fn instance(&self) -> &Instance;
}

/// An enum persisted by member symbol, with document-state metadata
///
/// Mirrors a state enum whose members carry a one-character code, a display
/// label, and at most one default flag. Decoding a missing document value
/// yields the default-flagged member.
pub trait DocEnum: Sized + Copy + PartialEq + Send + Sync + 'static {
    /// Name of the enum type, used in schema diagnostics
    fn enum_name() -> &'static str;

    /// All members, in declaration order
    fn variants() -> &'static [Self];

    /// Symbolic member name, the persisted representation
    fn symbol(&self) -> &'static str;

    /// One-character state code
    fn code(&self) -> &'static str {
        ""
    }

    /// Display label
    fn label(&self) -> &'static str {
        self.symbol()
    }

    /// True for the member decoded from an absent document value
    fn is_default(&self) -> bool {
        false
    }

    /// Look up a member by its symbol
    fn from_symbol(symbol: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.symbol() == symbol)
    }

    /// The member flagged as default, if any
    fn default_variant() -> Option<Self> {
        Self::variants().iter().copied().find(Self::is_default)
    }
}
