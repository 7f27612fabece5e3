//! Versions du protocole SOAP
//!
//! Regroupe les URI d'espaces de noms, les types MIME et les URI de rôles
//! propres à SOAP 1.1 et SOAP 1.2, ainsi que la normalisation des valeurs
//! `actor` (1.1) vers les rôles 1.2.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Espace de noms de l'enveloppe SOAP 1.1
pub const SOAP11_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Espace de noms de l'enveloppe SOAP 1.2
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Valeur `actor` SOAP 1.1 désignant le prochain nœud
pub const SOAP11_ACTOR_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";

/// Rôle SOAP 1.2 « next »
pub const ROLE_NEXT: &str = "http://www.w3.org/2003/05/soap-envelope/role/next";

/// Rôle SOAP 1.2 « none »
pub const ROLE_NONE: &str = "http://www.w3.org/2003/05/soap-envelope/role/none";

/// Rôle SOAP 1.2 « ultimateReceiver », utilisé quand aucun rôle n'est indiqué
pub const ROLE_ULTIMATE_RECEIVER: &str =
    "http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver";

/// Préfixe utilisé à l'écriture pour l'espace de noms de l'enveloppe
pub const ENVELOPE_PREFIX: &str = "S";

/// Version du protocole SOAP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    #[serde(rename = "1.1")]
    Soap11,
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// URI de l'espace de noms de l'enveloppe
    pub fn namespace(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP11_NAMESPACE,
            SoapVersion::Soap12 => SOAP12_NAMESPACE,
        }
    }

    /// Type MIME d'une enveloppe de cette version
    pub fn media_type(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "text/xml",
            SoapVersion::Soap12 => "application/soap+xml",
        }
    }

    /// Nom de l'attribut désignant le destinataire d'un en-tête
    pub fn role_attribute(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => "actor",
            SoapVersion::Soap12 => "role",
        }
    }

    /// Retrouve la version à partir de l'espace de noms d'une enveloppe
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            SOAP11_NAMESPACE => Some(SoapVersion::Soap11),
            SOAP12_NAMESPACE => Some(SoapVersion::Soap12),
            _ => None,
        }
    }

    /// Retrouve la version à partir d'un type MIME (sans paramètres)
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type.trim().to_ascii_lowercase().as_str() {
            "text/xml" => Some(SoapVersion::Soap11),
            "application/soap+xml" => Some(SoapVersion::Soap12),
            _ => None,
        }
    }

    /// Rôles joués implicitement par tout nœud SOAP
    pub fn implicit_roles(self) -> [&'static str; 2] {
        [ROLE_NEXT, ROLE_ULTIMATE_RECEIVER]
    }

    /// Normalise une valeur `actor`/`role` brute vers un URI de rôle SOAP 1.2
    ///
    /// - absence ou chaîne vide ⇒ `ultimateReceiver`
    /// - `actor` SOAP 1.1 « next » ⇒ rôle SOAP 1.2 « next »
    pub fn normalize_role(self, raw: Option<&str>) -> String {
        match raw.map(str::trim) {
            None | Some("") => ROLE_ULTIMATE_RECEIVER.to_string(),
            Some(SOAP11_ACTOR_NEXT) if self == SoapVersion::Soap11 => ROLE_NEXT.to_string(),
            Some(other) => other.to_string(),
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoapVersion::Soap11 => write!(f, "SOAP 1.1"),
            SoapVersion::Soap12 => write!(f, "SOAP 1.2"),
        }
    }
}
