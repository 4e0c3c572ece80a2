//! Namespace URIs recognised in XForm definitions.
//!
//! Matching is always done on the URI, never on the prefix a document happens to use.

/// Default XForms namespace (`<model>`, `<instance>`, `<bind>`).
pub const XFORMS: &str = "http://www.w3.org/2002/xforms";

/// XHTML namespace used for the form wrapper (`<h:html>`, `<h:head>`, `<h:title>`).
pub const XHTML: &str = "http://www.w3.org/1999/xhtml";

/// Entities extension namespace (`entities-version`, `saveto`).
pub const ENTITIES: &str = "http://www.opendatakit.org/xforms/entities";

/// Name of the `<model>` attribute declaring the entities spec version.
pub const ENTITIES_VERSION_ATTR: &str = "entities-version";

/// Name of the bind attribute mapping a question onto an entity property.
pub const SAVETO_ATTR: &str = "saveto";
