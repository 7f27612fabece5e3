//! # Module Message - modèle de message SOAP
//!
//! Un [`Message`] regroupe les en-têtes, le contenu (payload), les pièces
//! jointes et un sac de propriétés hors fil.
//!
//! ## Consommation unique
//!
//! Le contenu ne peut être lu qu'une seule fois, quelle que soit la forme
//! demandée (arbre, curseur, source, écriture). Une seconde lecture échoue
//! avec [`MessageError::AlreadyConsumed`]. Pour lire deux fois, il faut
//! d'abord dupliquer le message avec [`Message::copy`], qui produit toujours
//! un message dont le contenu n'a pas été lu.
//!
//! ## Exemple
//!
//! ```rust
//! use pmosoap::message::Message;
//! use pmosoap::xml::parse_element;
//!
//! let body = parse_element(b"<m:Ping xmlns:m=\"urn:ping\"/>").unwrap();
//! let mut message = Message::from_tree(body);
//! let mut copy = message.copy();
//!
//! assert_eq!(message.payload_local_part(), Some("Ping"));
//! assert!(message.read_payload_as_tree().is_ok());
//! assert!(message.read_payload_as_tree().is_err());
//! assert!(copy.read_payload_as_tree().is_ok());
//! ```

mod attachment;
mod fault;
mod header;
mod payload;

pub use attachment::{Attachment, AttachmentSet, normalize_content_id};
pub use fault::{FaultCode, RUNTIME_NAMESPACE, SoapFault};
pub use header::{Header, HeaderList, WSA_NAMESPACE, WSA_PREFIX};
pub use payload::PayloadReader;

pub(crate) use payload::{Payload, copy_tokens};

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;
use xmltree::Element;

use crate::binding::{Binding, OperationInfo};
use crate::error::MessageError;
use crate::version::{ENVELOPE_PREFIX, SoapVersion};
use crate::xml::{
    QName, Token, XmlWriter, deep_clone, element_name, parse_element, read_element,
};

/// Clés de propriétés connues du runtime
pub mod property {
    /// Adresse de destination d'un message sortant
    pub const ENDPOINT_ADDRESS: &str = "pmosoap.endpoint.address";
    /// Valeur SOAPAction (en-tête HTTP en 1.1, paramètre `action` en 1.2)
    pub const SOAP_ACTION: &str = "pmosoap.soap.action";
    /// Type de contenu reçu
    pub const CONTENT_TYPE: &str = "pmosoap.content_type";
    /// Adresse du serveur telle que perçue par le client
    pub const LOCAL_ADDRESS: &str = "pmosoap.local.address";
    /// Code de statut de transport de la réponse
    pub const STATUS_CODE: &str = "pmosoap.transport.status";
    /// Opération de la liaison à laquelle le message correspond
    pub const OPERATION: &str = "pmosoap.operation";
}

/// Un message SOAP/XML
#[derive(Debug)]
pub struct Message {
    version: Option<SoapVersion>,
    headers: HeaderList,
    payload: Payload,
    payload_name: Option<QName>,
    consumed: bool,
    attachments: AttachmentSet,
    properties: BTreeMap<String, String>,
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

impl Message {
    /// Message sans contenu
    pub fn empty() -> Self {
        Self {
            version: None,
            headers: HeaderList::new(),
            payload: Payload::Empty,
            payload_name: None,
            consumed: false,
            attachments: AttachmentSet::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Message dont le contenu est un arbre
    pub fn from_tree(root: Element) -> Self {
        let mut message = Self::empty();
        message.payload_name = Some(element_name(&root));
        message.payload = Payload::Tree(Arc::new(root));
        message
    }

    /// Message dont le contenu est un document XML brut
    ///
    /// Seule la balise ouvrante de la racine est analysée ici.
    pub fn from_source(source: impl Into<Bytes>) -> Result<Self, MessageError> {
        let mut message = Self::empty();
        message.payload = Payload::Source(source.into());
        message.payload_name = payload::first_element_name(&message.payload)?;
        if message.payload_name.is_none() {
            message.payload = Payload::Empty;
        }
        Ok(message)
    }

    /// Message portant un fault
    pub fn fault(version: SoapVersion, fault: &SoapFault) -> Self {
        let mut message = Self::from_tree(fault.to_element(version));
        message.version = Some(version);
        for element in fault.not_understood_headers(version) {
            message.headers.add(Header::from_element(version, element));
        }
        message
    }

    /// Message issu d'un décodage, contenu analysé à la demande
    pub(crate) fn from_stream(
        version: SoapVersion,
        headers: HeaderList,
        buffer: Bytes,
        span: Range<usize>,
        inherited: Vec<(String, String)>,
        payload_name: Option<QName>,
    ) -> Self {
        let payload = if payload_name.is_some() {
            Payload::Stream {
                buffer,
                span,
                inherited: Arc::new(inherited),
            }
        } else {
            Payload::Empty
        };
        Self {
            version: Some(version),
            headers,
            payload,
            payload_name,
            consumed: false,
            attachments: AttachmentSet::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: SoapVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn version(&self) -> Option<SoapVersion> {
        self.version
    }

    pub fn set_version(&mut self, version: SoapVersion) {
        self.version = Some(version);
    }

    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    pub fn has_payload(&self) -> bool {
        !matches!(self.payload, Payload::Empty)
    }

    /// Nom qualifié de l'élément racine du contenu, lisible sans consommer
    pub fn payload_name(&self) -> Option<&QName> {
        self.payload_name.as_ref()
    }

    pub fn payload_local_part(&self) -> Option<&str> {
        self.payload_name.as_ref().map(|q| q.local.as_str())
    }

    pub fn payload_namespace_uri(&self) -> Option<&str> {
        self.payload_name.as_ref().map(|q| q.namespace.as_str())
    }

    pub fn is_fault(&self) -> bool {
        self.payload_name.as_ref().is_some_and(|name| {
            name.local == "Fault" && SoapVersion::from_namespace(&name.namespace).is_some()
        })
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    fn take_payload(&mut self) -> Result<Payload, MessageError> {
        if self.consumed {
            return Err(MessageError::AlreadyConsumed);
        }
        self.consumed = true;
        trace!(payload = ?self.payload_name, "consuming message payload");
        Ok(self.payload.clone())
    }

    /// Lit le contenu sous forme d'arbre
    pub fn read_payload_as_tree(&mut self) -> Result<Element, MessageError> {
        match self.take_payload()? {
            Payload::Empty => Err(MessageError::NoPayload),
            Payload::Tree(root) => {
                Ok(Arc::try_unwrap(root).unwrap_or_else(|shared| deep_clone(&shared)))
            }
            Payload::Source(bytes) => Ok(parse_element(&bytes)?),
            stream @ Payload::Stream { .. } => {
                let mut cursor = stream.cursor().ok_or(MessageError::NoPayload)?;
                loop {
                    match cursor.next_token()? {
                        Token::Start(tag) => return Ok(read_element(&mut cursor, tag)?),
                        Token::Eof => return Err(MessageError::NoPayload),
                        _ => continue,
                    }
                }
            }
        }
    }

    /// Lit le contenu sous forme d'événements
    pub fn read_payload(&mut self) -> Result<PayloadReader, MessageError> {
        let payload = self.take_payload()?;
        Ok(PayloadReader::new(&payload))
    }

    /// Lit le contenu sous forme de document autonome
    pub fn read_payload_as_source(&mut self) -> Result<Bytes, MessageError> {
        match self.take_payload()? {
            Payload::Empty => Err(MessageError::NoPayload),
            Payload::Source(bytes) => Ok(bytes),
            other => {
                let mut writer = XmlWriter::new(Vec::new());
                write_payload(&other, &mut writer)?;
                Ok(Bytes::from(writer.into_inner()))
            }
        }
    }

    /// Écrit le contenu dans un écrivain XML
    pub fn write_payload_to<W: Write>(
        &mut self,
        writer: &mut XmlWriter<W>,
    ) -> Result<(), MessageError> {
        let payload = self.take_payload()?;
        write_payload(&payload, writer)
    }

    /// Écrit l'enveloppe complète : en-têtes puis contenu
    pub fn write_envelope<W: Write>(
        &mut self,
        version: SoapVersion,
        writer: &mut XmlWriter<W>,
    ) -> Result<(), MessageError> {
        let ns = version.namespace();
        let prefix = Some(ENVELOPE_PREFIX);

        writer.write_declaration()?;
        writer.start_element(prefix, "Envelope", ns, &[], &[])?;
        if self.has_headers() {
            writer.start_element(prefix, "Header", ns, &[], &[])?;
            for header in &self.headers {
                writer.write_element(header.element())?;
            }
            writer.end_element()?;
        }
        writer.start_element(prefix, "Body", ns, &[], &[])?;
        self.write_payload_to(writer)?;
        writer.end_element()?;
        writer.end_element()?;
        Ok(())
    }

    /// Interprète le contenu comme un fault
    pub fn read_as_fault(&mut self) -> Result<SoapFault, MessageError> {
        if !self.is_fault() {
            return Err(MessageError::InvalidFault(format!(
                "payload {:?} is not a fault",
                self.payload_name
            )));
        }
        let element = self.read_payload_as_tree()?;
        SoapFault::from_element(&element)
    }

    /// Duplique le message ; la copie a toujours un contenu lisible
    pub fn copy(&self) -> Message {
        Message {
            version: self.version,
            headers: self.headers.clone(),
            payload: self.payload.clone(),
            payload_name: self.payload_name.clone(),
            consumed: false,
            attachments: self.attachments.clone(),
            properties: self.properties.clone(),
        }
    }

    pub fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Opération de la liaison correspondant à ce message
    pub fn operation<'b>(&self, binding: &'b Binding) -> Option<&'b OperationInfo> {
        binding.operation_for(self)
    }

    pub fn is_one_way(&self, binding: &Binding) -> bool {
        self.operation(binding).is_some_and(|op| op.one_way)
    }
}

fn write_payload<W: Write>(
    payload: &Payload,
    writer: &mut XmlWriter<W>,
) -> Result<(), MessageError> {
    match payload {
        Payload::Empty => Ok(()),
        Payload::Tree(root) => Ok(writer.write_element(root)?),
        Payload::Stream { inherited, .. } => {
            let mut cursor = payload.cursor().ok_or(MessageError::NoPayload)?;
            Ok(copy_tokens(&mut cursor, inherited, writer)?)
        }
        Payload::Source(_) => {
            let mut cursor = payload.cursor().ok_or(MessageError::NoPayload)?;
            Ok(copy_tokens(&mut cursor, &[], writer)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ROLE_ULTIMATE_RECEIVER;
    use crate::xml::{events_of, same_infoset};

    #[test]
    fn test_single_consumption() {
        let mut message = Message::from_source("<a><b>1</b></a>").unwrap();
        let first = message.read_payload_as_tree().unwrap();
        assert_eq!(first.name, "a");
        assert!(matches!(
            message.read_payload_as_source(),
            Err(MessageError::AlreadyConsumed)
        ));
        assert!(matches!(
            message.read_payload(),
            Err(MessageError::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_copy_of_deep_tree_is_readable() {
        let depth = 2500;
        let mut xml = String::new();
        for _ in 0..depth {
            xml.push_str("<n>");
        }
        xml.push_str("leaf");
        for _ in 0..depth {
            xml.push_str("</n>");
        }
        let mut message = Message::from_tree(parse_element(xml.as_bytes()).unwrap());
        let mut copy = message.copy();

        let from_copy = copy.read_payload_as_tree().unwrap();
        let original = message.read_payload_as_tree().unwrap();
        assert_eq!(crate::xml::text_content(&from_copy), "leaf");
        assert!(same_infoset(&events_of(&original), &events_of(&from_copy)));
    }

    #[test]
    fn test_copy_after_consumption_is_fresh() {
        let mut message = Message::from_source(r#"<m:a xmlns:m="urn:m">x</m:a>"#).unwrap();
        let first = message.read_payload_as_tree().unwrap();
        let mut copy = message.copy();
        assert!(!copy.is_consumed());
        let second = copy.read_payload_as_tree().unwrap();
        assert!(same_infoset(&events_of(&first), &events_of(&second)));
    }

    #[test]
    fn test_headers_survive_payload_consumption() {
        let mut message = Message::empty().with_version(SoapVersion::Soap11);
        message.headers_mut().add(
            Header::new(SoapVersion::Soap11, QName::new("urn:x", "Foo")).with_must_understand(true),
        );
        assert!(!message.has_payload());
        assert!(matches!(
            message.read_payload_as_tree(),
            Err(MessageError::NoPayload)
        ));

        let header = message.headers().find("urn:x", "Foo").unwrap();
        assert!(header.is_must_understood());
        assert_eq!(header.role(), ROLE_ULTIMATE_RECEIVER);
    }

    #[test]
    fn test_fault_message() {
        let fault = SoapFault::receiver("boom");
        let mut message = Message::fault(SoapVersion::Soap12, &fault);
        assert!(message.is_fault());
        assert_eq!(message.read_as_fault().unwrap().reason, "boom");
    }

    #[test]
    fn test_source_without_root_is_empty() {
        let message = Message::from_source("   ").unwrap();
        assert!(!message.has_payload());
        assert!(Message::from_source("<p:a/>").is_err());
    }

    #[test]
    fn test_properties() {
        let mut message = Message::empty();
        message.set_property(property::ENDPOINT_ADDRESS, "local://bank");
        assert_eq!(
            message.copy().property(property::ENDPOINT_ADDRESS),
            Some("local://bank")
        );
        assert_eq!(
            message.remove_property(property::ENDPOINT_ADDRESS).as_deref(),
            Some("local://bank")
        );
    }
}
