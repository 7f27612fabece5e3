//! Description de liaison consommée par le runtime
//!
//! La description (issue d'un WSDL ou écrite à la main) n'est jamais
//! modifiée par le runtime. Elle peut être désérialisée depuis la section
//! `soap.binding` de la configuration.

use serde::{Deserialize, Serialize};

use crate::message::{Message, property};
use crate::version::SoapVersion;
use crate::xml::QName;

/// Style de liaison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStyle {
    #[default]
    Document,
    Rpc,
}

/// Une opération du service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationInfo {
    pub name: String,
    pub one_way: bool,
    pub soap_action: Option<String>,
    /// Nom de l'élément racine de la requête
    pub input: Option<QName>,
    /// Action WS-Addressing de la requête
    pub action: Option<String>,
    /// Action WS-Addressing de la réponse
    pub output_action: Option<String>,
}

/// Liaison d'un service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Binding {
    pub service: String,
    /// `None` pour une liaison XML/HTTP sans enveloppe
    pub version: Option<SoapVersion>,
    pub style: WireStyle,
    pub addressing: bool,
    pub mtom: bool,
    pub operations: Vec<OperationInfo>,
}

impl Binding {
    pub fn new(service: impl Into<String>, version: Option<SoapVersion>) -> Self {
        Self {
            service: service.into(),
            version,
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: OperationInfo) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operation(&self, name: &str) -> Option<&OperationInfo> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Opération correspondant à un message
    ///
    /// Essaie dans l'ordre : la propriété d'opération explicite, le nom de
    /// l'élément racine du contenu (ou son nom local en style RPC), l'action
    /// WS-Addressing, puis la valeur SOAPAction.
    pub fn operation_for(&self, message: &Message) -> Option<&OperationInfo> {
        if let Some(name) = message.property(property::OPERATION) {
            if let Some(op) = self.operation(name) {
                return Some(op);
            }
        }

        if let Some(payload) = message.payload_name() {
            let by_input = self.operations.iter().find(|op| match &op.input {
                Some(input) => input == payload,
                None => self.style == WireStyle::Rpc && op.name == payload.local,
            });
            if by_input.is_some() {
                return by_input;
            }
        }

        if let Some(action) = message.headers().action() {
            if let Some(op) = self
                .operations
                .iter()
                .find(|op| op.action.as_deref() == Some(action.as_str()))
            {
                return Some(op);
            }
        }

        let soap_action = message.property(property::SOAP_ACTION)?;
        let soap_action = soap_action.trim_matches('"');
        self.operations
            .iter()
            .find(|op| op.soap_action.as_deref() == Some(soap_action))
    }
}
