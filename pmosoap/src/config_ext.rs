//! Extension de configuration pour le runtime SOAP
//!
//! Ce module fournit le trait [`SoapConfigExt`] qui ajoute à
//! `pmoconfig::Config` des accesseurs typés pour la section `soap` :
//!
//! ```yaml
//! soap:
//!   version: "1.1"
//!   mtom:
//!     enabled: false
//!   pipeline:
//!     pool_capacity: 8
//!   logging:
//!     dump_messages: false
//!     dump_limit: 4096
//!   addressing:
//!     enabled: false
//!   endpoint:
//!     base_address: http://localhost:8080/soap
//!   binding:
//!     service: Calculator
//!     version: "1.2"
//!     operations:
//!       - name: add
//! ```
//!
//! Comme pour les autres extensions de configuration, un getter qui ne
//! trouve pas sa clé écrit la valeur par défaut avant de la rendre.

use anyhow::{Result, anyhow};
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::binding::Binding;
use crate::settings::{
    DEFAULT_BASE_ADDRESS, DEFAULT_DUMP_LIMIT, DEFAULT_POOL_CAPACITY, RuntimeSettings,
};
use crate::version::SoapVersion;

/// Trait d'extension pour la section `soap` de la configuration
pub trait SoapConfigExt {
    /// Version SOAP par défaut (`"1.1"` ou `"1.2"`)
    fn get_soap_version(&self) -> Result<SoapVersion>;

    fn set_soap_version(&self, version: SoapVersion) -> Result<()>;

    /// Encodage MTOM activé (défaut : false)
    fn get_soap_mtom_enabled(&self) -> Result<bool>;

    fn set_soap_mtom_enabled(&self, enabled: bool) -> Result<()>;

    /// Copies de pipeline gardées au repos par endpoint (défaut : 8)
    fn get_soap_pool_capacity(&self) -> Result<usize>;

    fn set_soap_pool_capacity(&self, capacity: usize) -> Result<()>;

    /// Trace du contenu des messages (défaut : false)
    fn get_soap_dump_messages(&self) -> Result<bool>;

    fn set_soap_dump_messages(&self, enabled: bool) -> Result<()>;

    /// Taille maximale d'un message tracé, en octets (défaut : 4096)
    fn get_soap_dump_limit(&self) -> Result<usize>;

    fn set_soap_dump_limit(&self, limit: usize) -> Result<()>;

    /// WS-Addressing forcé pour toutes les liaisons (défaut : false)
    fn get_soap_addressing_enabled(&self) -> Result<bool>;

    fn set_soap_addressing_enabled(&self, enabled: bool) -> Result<()>;

    /// Adresse publiée par les références d'objets exportés
    fn get_soap_base_address(&self) -> Result<String>;

    fn set_soap_base_address(&self, address: String) -> Result<()>;

    /// Rassemble tous les réglages de la section `soap`
    ///
    /// # Returns
    ///
    /// Les réglages, les valeurs absentes étant remplacées (et enregistrées)
    /// par leur valeur par défaut
    fn get_soap_settings(&self) -> Result<RuntimeSettings>;

    /// Description de liaison déclarée sous `soap.binding`
    ///
    /// # Returns
    ///
    /// Une erreur si la section est absente ou ne décrit pas une liaison
    fn get_soap_binding(&self) -> Result<Binding>;
}

fn bool_or_default(config: &Config, path: &[&str], default: bool) -> Result<bool> {
    match config.get_value(path) {
        Ok(Value::Bool(b)) => Ok(b),
        _ => {
            config.set_value(path, Value::Bool(default))?;
            Ok(default)
        }
    }
}

fn usize_or_default(config: &Config, path: &[&str], default: usize) -> Result<usize> {
    match config.get_value(path) {
        Ok(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64().unwrap_or(0) as usize),
        _ => {
            config.set_value(path, Value::Number(Number::from(default)))?;
            Ok(default)
        }
    }
}

fn version_label(version: SoapVersion) -> &'static str {
    match version {
        SoapVersion::Soap11 => "1.1",
        SoapVersion::Soap12 => "1.2",
    }
}

impl SoapConfigExt for Config {
    fn get_soap_version(&self) -> Result<SoapVersion> {
        let path = &["soap", "version"];
        // « 1.2 » non quoté est lu comme un flottant par YAML
        let raw = match self.get_value(path) {
            Ok(Value::String(s)) => Some(s),
            Ok(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        match raw.as_deref().map(str::trim) {
            Some("1.1") => Ok(SoapVersion::Soap11),
            Some("1.2") => Ok(SoapVersion::Soap12),
            Some(other) => Err(anyhow!("Unsupported SOAP version '{}'", other)),
            None => {
                let default = SoapVersion::Soap11;
                self.set_soap_version(default)?;
                Ok(default)
            }
        }
    }

    fn set_soap_version(&self, version: SoapVersion) -> Result<()> {
        self.set_value(
            &["soap", "version"],
            Value::String(version_label(version).to_string()),
        )
    }

    fn get_soap_mtom_enabled(&self) -> Result<bool> {
        bool_or_default(self, &["soap", "mtom", "enabled"], false)
    }

    fn set_soap_mtom_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(&["soap", "mtom", "enabled"], Value::Bool(enabled))
    }

    fn get_soap_pool_capacity(&self) -> Result<usize> {
        usize_or_default(
            self,
            &["soap", "pipeline", "pool_capacity"],
            DEFAULT_POOL_CAPACITY,
        )
    }

    fn set_soap_pool_capacity(&self, capacity: usize) -> Result<()> {
        self.set_value(
            &["soap", "pipeline", "pool_capacity"],
            Value::Number(Number::from(capacity)),
        )
    }

    fn get_soap_dump_messages(&self) -> Result<bool> {
        bool_or_default(self, &["soap", "logging", "dump_messages"], false)
    }

    fn set_soap_dump_messages(&self, enabled: bool) -> Result<()> {
        self.set_value(&["soap", "logging", "dump_messages"], Value::Bool(enabled))
    }

    fn get_soap_dump_limit(&self) -> Result<usize> {
        usize_or_default(self, &["soap", "logging", "dump_limit"], DEFAULT_DUMP_LIMIT)
    }

    fn set_soap_dump_limit(&self, limit: usize) -> Result<()> {
        self.set_value(
            &["soap", "logging", "dump_limit"],
            Value::Number(Number::from(limit)),
        )
    }

    fn get_soap_addressing_enabled(&self) -> Result<bool> {
        bool_or_default(self, &["soap", "addressing", "enabled"], false)
    }

    fn set_soap_addressing_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(&["soap", "addressing", "enabled"], Value::Bool(enabled))
    }

    fn get_soap_base_address(&self) -> Result<String> {
        let path = &["soap", "endpoint", "base_address"];
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => {
                self.set_value(path, Value::String(DEFAULT_BASE_ADDRESS.to_string()))?;
                Ok(DEFAULT_BASE_ADDRESS.to_string())
            }
        }
    }

    fn set_soap_base_address(&self, address: String) -> Result<()> {
        self.set_value(&["soap", "endpoint", "base_address"], Value::String(address))
    }

    fn get_soap_settings(&self) -> Result<RuntimeSettings> {
        Ok(RuntimeSettings {
            version: self.get_soap_version()?,
            mtom: self.get_soap_mtom_enabled()?,
            pool_capacity: self.get_soap_pool_capacity()?,
            dump_messages: self.get_soap_dump_messages()?,
            dump_limit: self.get_soap_dump_limit()?,
            addressing: self.get_soap_addressing_enabled()?,
            base_address: self.get_soap_base_address()?,
        })
    }

    fn get_soap_binding(&self) -> Result<Binding> {
        let value = self
            .get_value(&["soap", "binding"])
            .map_err(|e| anyhow!("No SOAP binding configured: {}", e))?;
        let binding: Binding = serde_yaml::from_value(value)
            .map_err(|e| anyhow!("Invalid SOAP binding description: {}", e))?;
        Ok(binding)
    }
}
