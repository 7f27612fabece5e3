//! Références d'endpoint WS-Addressing

use xmltree::{Element, XMLNode};

use crate::error::MessageError;
use crate::message::{Header, Message, RUNTIME_NAMESPACE, WSA_NAMESPACE, WSA_PREFIX, property};
use crate::version::SoapVersion;
use crate::xml::{child, child_elements, new_element, push_child, set_attribute, text_content};

/// Nom local du paramètre de référence portant l'identifiant d'objet
pub const OBJECT_ID: &str = "ObjectId";

/// Identité externe d'un objet serveur
///
/// Une adresse, relative au contexte de la requête qui l'a produite, et des
/// paramètres de référence opaques renvoyés par le client en en-têtes.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReference {
    address: String,
    reference_parameters: Vec<Element>,
}

impl EndpointReference {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reference_parameters: Vec::new(),
        }
    }

    /// Référence portant l'identifiant d'un objet exporté
    pub fn for_object(address: impl Into<String>, object_id: &str) -> Self {
        let mut id = new_element(RUNTIME_NAMESPACE, Some("ps"), OBJECT_ID);
        id.children.push(XMLNode::Text(object_id.to_string()));
        Self::new(address).with_parameter(id)
    }

    pub fn with_parameter(mut self, parameter: Element) -> Self {
        self.reference_parameters.push(parameter);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn reference_parameters(&self) -> &[Element] {
        &self.reference_parameters
    }

    /// Identifiant d'objet porté par les paramètres, s'il y en a un
    pub fn object_id(&self) -> Option<String> {
        self.reference_parameters
            .iter()
            .find(|p| p.name == OBJECT_ID && p.namespace.as_deref() == Some(RUNTIME_NAMESPACE))
            .map(|p| text_content(p).trim().to_string())
    }

    /// Sérialise en `wsa:EndpointReference`
    pub fn to_element(&self) -> Element {
        let mut epr = new_element(WSA_NAMESPACE, Some(WSA_PREFIX), "EndpointReference");
        let mut address = new_element(WSA_NAMESPACE, Some(WSA_PREFIX), "Address");
        address.children.push(XMLNode::Text(self.address.clone()));
        push_child(&mut epr, address);
        if !self.reference_parameters.is_empty() {
            let mut parameters =
                new_element(WSA_NAMESPACE, Some(WSA_PREFIX), "ReferenceParameters");
            for parameter in &self.reference_parameters {
                push_child(&mut parameters, parameter.clone());
            }
            push_child(&mut epr, parameters);
        }
        epr
    }

    /// Relit un élément de type `wsa:EndpointReferenceType`
    ///
    /// Le nom de l'élément lui-même est libre (`ReplyTo`, `From`, ...).
    pub fn from_element(element: &Element) -> Result<Self, MessageError> {
        let address = child(element, WSA_NAMESPACE, "Address").ok_or_else(|| {
            MessageError::InvalidReference(format!("<{}> has no wsa:Address", element.name))
        })?;
        let address = text_content(address).trim().to_string();
        if address.is_empty() {
            return Err(MessageError::InvalidReference("empty wsa:Address".into()));
        }
        let reference_parameters = child(element, WSA_NAMESPACE, "ReferenceParameters")
            .map(|p| child_elements(p).cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            address,
            reference_parameters,
        })
    }

    /// Adresse un message sortant vers cette référence
    ///
    /// Chaque paramètre devient un en-tête marqué
    /// `wsa:IsReferenceParameter="true"` ; l'adresse devient la
    /// destination du message.
    pub fn prepare(&self, message: &mut Message, version: SoapVersion) {
        for parameter in &self.reference_parameters {
            let mut element = parameter.clone();
            set_attribute(
                &mut element,
                WSA_NAMESPACE,
                WSA_PREFIX,
                "IsReferenceParameter",
                "true",
            );
            message
                .headers_mut()
                .replace(Header::from_element(version, element));
        }
        message.set_property(property::ENDPOINT_ADDRESS, self.address.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_element;

    #[test]
    fn test_element_roundtrip() {
        let epr = EndpointReference::for_object("local://bank", "acc-1");
        let element = epr.to_element();
        let back = EndpointReference::from_element(&element).unwrap();
        assert_eq!(back.address(), "local://bank");
        assert_eq!(back.object_id().as_deref(), Some("acc-1"));
    }

    #[test]
    fn test_from_foreign_element() {
        let xml = br#"<x:ReplyTo xmlns:x="http://www.w3.org/2005/08/addressing">
            <x:Address>http://client/callback</x:Address>
        </x:ReplyTo>"#;
        let epr = EndpointReference::from_element(&parse_element(xml).unwrap()).unwrap();
        assert_eq!(epr.address(), "http://client/callback");
        assert!(epr.reference_parameters().is_empty());
    }

    #[test]
    fn test_missing_address() {
        let element = new_element(WSA_NAMESPACE, Some("wsa"), "EndpointReference");
        assert!(matches!(
            EndpointReference::from_element(&element),
            Err(MessageError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_prepare_adds_reference_headers() {
        let epr = EndpointReference::for_object("local://bank", "acc-7");
        let mut message = Message::empty();
        epr.prepare(&mut message, SoapVersion::Soap12);

        assert_eq!(message.property(property::ENDPOINT_ADDRESS), Some("local://bank"));
        let header = message.headers().find(RUNTIME_NAMESPACE, OBJECT_ID).unwrap();
        assert_eq!(header.text_content(), "acc-7");
        assert_eq!(
            header.attribute(WSA_NAMESPACE, "IsReferenceParameter"),
            Some("true")
        );
    }
}
