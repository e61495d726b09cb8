//! Index declarations and the backend-agnostic query plan
//!
//! An [`IndexSpec`] declares how a named index is materialized; it is
//! compiled to exactly one backend-native artifact (a Couch view or a Mongo
//! index) during provisioning. [`Index`] is the typed handle an application
//! queries through: `get(..)` returns a reusable [`Query`] that resolves to
//! a concrete [`QueryPlan`] against whichever backend the entity manager
//! was constructed with.
//!
//! ## Prefix ranges
//!
//! A multi-key prefix query always spans `[key .. key + {}]` with
//! `inclusive_end = false`. `{}` sorts after every scalar in view-key
//! collation, so the range matches exactly the documents whose key starts
//! with the given components and never a lexicographically later sibling.

use serde_json::Value;
use std::marker::PhantomData;

use crate::model::Model;

/// Declaration of one logical index on an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Logical index name, unique per entity type
    pub name: String,
    /// Field names forming the composite key, in order
    pub keys: Vec<String>,
    /// Extra predicate AND'ed into the Couch map-function guard
    pub predicate: Option<String>,
    /// Custom key expression, overriding the `keys` list (Couch)
    pub key_expr: Option<String>,
    /// Custom emit statement, overriding the default `emit(<key>, null)`
    pub emit_expr: Option<String>,
    /// Reduce function body (Couch)
    pub reduce_expr: Option<String>,
}

impl IndexSpec {
    /// New index with the given logical name
    pub fn new(name: impl Into<String>) -> Self {
        IndexSpec {
            name: name.into(),
            keys: Vec::new(),
            predicate: None,
            key_expr: None,
            emit_expr: None,
            reduce_expr: None,
        }
    }

    /// Set the composite key field names
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// AND an extra predicate into the index guard
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Override the emitted key expression
    pub fn key_expr(mut self, expr: impl Into<String>) -> Self {
        self.key_expr = Some(expr.into());
        self
    }

    /// Override the whole emit statement
    pub fn emit_expr(mut self, expr: impl Into<String>) -> Self {
        self.emit_expr = Some(expr.into());
        self
    }

    /// Attach a reduce function
    pub fn reduce_expr(mut self, expr: impl Into<String>) -> Self {
        self.reduce_expr = Some(expr.into());
        self
    }
}

/// How query key components match against index keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    /// The full composite key equals the given components
    Exact(Vec<Value>),
    /// The composite key starts with the given components
    /// (range `[key .. key + {}]`, `inclusive_end = false`)
    Prefix(Vec<Value>),
}

impl KeyMatch {
    /// The key components, regardless of match mode
    pub fn components(&self) -> &[Value] {
        match self {
            KeyMatch::Exact(c) | KeyMatch::Prefix(c) => c,
        }
    }
}

/// A reusable, typed query over one declared index
///
/// Carries no backend state: the entity manager resolves it to a
/// [`QueryPlan`] at execution time, against whatever backend it holds.
#[derive(Debug, Clone)]
pub struct Query<T: Model> {
    pub(crate) index: String,
    pub(crate) matcher: KeyMatch,
    pub(crate) descending: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Query<T> {
    pub(crate) fn new(index: String, matcher: KeyMatch, descending: bool) -> Self {
        Query {
            index,
            matcher,
            descending,
            _marker: PhantomData,
        }
    }

    /// Name of the index this query runs against
    pub fn index_name(&self) -> &str {
        &self.index
    }
}

/// Typed handle for building queries against a declared index
pub struct Index<T: Model> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Index<T> {
    /// Handle for the index declared under `name` on `T`
    pub fn named(name: impl Into<String>) -> Self {
        Index {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Exact-match query on the full composite key
    pub fn get<I, V>(&self, components: I) -> Query<T>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let components = components.into_iter().map(Into::into).collect();
        Query::new(self.name.clone(), KeyMatch::Exact(components), false)
    }

    /// Prefix query over leading key components
    pub fn prefix<I, V>(&self, components: I, ascending: bool) -> Query<T>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let components = components.into_iter().map(Into::into).collect();
        Query::new(self.name.clone(), KeyMatch::Prefix(components), !ascending)
    }
}

/// A query resolved against the schema, ready for a backend to execute
///
/// Self-contained: carries the full index declaration so an adapter never
/// needs to reach back into the schema.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Entity type the result documents decode to
    pub type_name: String,
    /// The declared index the query runs against
    pub index: IndexSpec,
    /// Key match mode and components
    pub matcher: KeyMatch,
    /// Reverse the index-native key order
    pub descending: bool,
}
