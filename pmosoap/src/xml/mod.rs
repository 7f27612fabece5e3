//! # Module XML - briques communes du runtime
//!
//! Le runtime manipule l'XML sous trois formes :
//!
//! - un **curseur** ([`XmlCursor`]) au-dessus de `quick_xml::Reader`, qui résout
//!   les espaces de noms au fil de l'eau et connaît sa position en octets ;
//! - un **arbre** (`xmltree::Element`) construit sans récursion à partir du curseur ;
//! - un **écrivain** ([`XmlWriter`]) qui ne déclare un espace de noms que s'il
//!   n'est pas déjà visible.
//!
//! [`PayloadEvent`] fournit une vue canonique des deux premières formes, utilisée
//! pour comparer des contenus indépendamment des préfixes choisis.

mod cursor;
mod infoset;
mod scope;
mod tree;
mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) use cursor::{StartTag, Token, XmlCursor};
pub use infoset::{PayloadEvent, canonical, events_of, same_infoset};
pub use scope::{NamespaceScope, XML_NAMESPACE};
pub(crate) use tree::read_element;
pub use tree::{
    attribute, bind_prefix, child, child_elements, deep_clone, element_name, new_element,
    parse_element, push_child, resolve_qname, set_attribute, text_content,
};
pub use writer::{Attr, XmlWriter};

/// Nom qualifié : URI d'espace de noms + nom local
///
/// Un espace de noms vide signifie « pas d'espace de noms ».
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    #[serde(default)]
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Nom sans espace de noms
    pub fn unqualified(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace == namespace && self.local == local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Découpe un nom `prefixe:local` en ses deux parties
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("S:Envelope"), (Some("S"), "Envelope"));
        assert_eq!(split_qualified("Body"), (None, "Body"));
    }

    #[test]
    fn test_qname_display() {
        assert_eq!(QName::new("urn:x", "Foo").to_string(), "{urn:x}Foo");
        assert_eq!(QName::unqualified("Foo").to_string(), "Foo");
    }
}
