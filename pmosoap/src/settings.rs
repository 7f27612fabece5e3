//! Réglages d'exécution partagés par les pipelines, codecs et endpoints
//!
//! Ces réglages sont figés à l'assemblage : ils sont placés dans un
//! `Arc` par [`AssemblyContext`](crate::pipeline::AssemblyContext) et lus
//! sans verrou par toutes les copies de pipeline. Ils se chargent depuis la
//! section `soap` de la configuration avec
//! [`SoapConfigExt::get_soap_settings`](crate::SoapConfigExt::get_soap_settings).

use serde::{Deserialize, Serialize};

use crate::version::SoapVersion;

pub const DEFAULT_POOL_CAPACITY: usize = 8;
pub const DEFAULT_DUMP_LIMIT: usize = 4096;
pub const DEFAULT_BASE_ADDRESS: &str = "http://localhost:8080/soap";

/// Réglages globaux du runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Version utilisée quand la liaison n'en impose pas
    pub version: SoapVersion,
    /// Encodage MTOM pour toutes les liaisons SOAP
    pub mtom: bool,
    /// Nombre maximal de copies de pipeline gardées au repos par endpoint
    pub pool_capacity: usize,
    /// Trace le contenu des messages dans l'étape de journalisation
    pub dump_messages: bool,
    /// Taille maximale, en octets, d'un message tracé
    pub dump_limit: usize,
    /// Active WS-Addressing même si la liaison ne le déclare pas
    pub addressing: bool,
    /// Adresse publiée quand la requête n'en fournit pas
    pub base_address: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            version: SoapVersion::Soap11,
            mtom: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            dump_messages: false,
            dump_limit: DEFAULT_DUMP_LIMIT,
            addressing: false,
            base_address: DEFAULT_BASE_ADDRESS.to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn with_version(mut self, version: SoapVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_mtom(mut self, enabled: bool) -> Self {
        self.mtom = enabled;
        self
    }

    pub fn with_base_address(mut self, address: impl Into<String>) -> Self {
        self.base_address = address.into();
        self
    }
}
