//! XForm wire/boundary support.
//!
//! This crate is responsible for translating XForm definitions (XML) into the in-memory form
//! model the entity subsystem works with. It handles:
//! - namespace-aware parsing of the form definition (`<model>`, primary `<instance>`, `<bind>`s)
//! - the entities namespace extension: `entities-version` validation and `saveto` collection
//! - answered instance trees (an immutable-by-convention snapshot of a filled form)
//! - a small XPath subset evaluator used for `relevant`, `create` and `update` expressions
//!
//! Entity semantics (what a finalized form *means* for stored entities) live in
//! `entities-core`. This crate handles the form format only.

pub mod answer;
pub mod entities;
pub mod expr;
pub mod form;
pub mod instance;
pub mod namespaces;

pub use answer::{AnswerValue, DataType};
pub use entities::{EntitiesVersion, EntityFormExtra, SaveTo};
pub use expr::{Expression, ExpressionError, Value};
pub use form::{Bind, BindAttribute, FormDef};
pub use instance::{InstanceNode, InstanceTree, NodeAttribute, NodeId};

use thiserror::Error;

/// Errors returned by the `xforms` boundary crate.
#[derive(Debug, Error)]
pub enum XFormError {
    #[error("invalid XML: {0}")]
    InvalidXml(#[from] roxmltree::Error),

    #[error("missing required element: {0}")]
    MissingElement(String),

    /// An `<entity>` element is declared but `<model>` lacks the version attribute.
    #[error("missing required attribute '{name}' in namespace '{namespace}' on <model>")]
    MissingModelAttribute { namespace: String, name: String },

    /// The form targets an entities protocol version this client does not understand.
    #[error("unrecognized entities version '{version}'")]
    UnrecognizedEntityVersion { version: String },

    #[error("invalid expression: {0}")]
    Expression(#[from] ExpressionError),

    #[error("invalid answer at {path}: {message}")]
    InvalidAnswer { path: String, message: String },

    #[error("no node matches reference {0}")]
    UnknownReference(String),

    #[error("failed to serialise form definition: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Type alias for Results that can fail with an [`XFormError`].
pub type XFormResult<T> = Result<T, XFormError>;
