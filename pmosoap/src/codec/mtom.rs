//! Codec MTOM/XOP
//!
//! L'enveloppe voyage dans une partie racine `application/xop+xml`; les
//! données binaires sont des parties séparées, référencées depuis le XML
//! par un élément `xop:Include href="cid:..."`.

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::debug;
use xmltree::Element;

use super::mime::{ROOT_CONTENT_ID, new_boundary, split_related, write_related};
use super::soap::SoapCodec;
use super::{Codec, ContentType, Decoder, Encoder, content_type_parameter, media_type, read_all};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, normalize_content_id, property};
use crate::version::SoapVersion;
use crate::xml::{attribute, element_name, new_element, set_attribute};

/// Espace de noms XOP
pub const XOP_NAMESPACE: &str = "http://www.w3.org/2004/08/xop/include";

const XOP_MEDIA_TYPE: &str = "application/xop+xml";

/// Élément `xop:Include` désignant une pièce jointe
pub fn xop_include(content_id: &str) -> Element {
    let mut include = new_element(XOP_NAMESPACE, Some("xop"), "Include");
    set_attribute(&mut include, "", "", "href", format!("cid:{}", content_id));
    include
}

/// Content-ID référencé par un élément `xop:Include`, s'il en est un
pub fn xop_reference(element: &Element) -> Option<String> {
    if !element_name(element).is(XOP_NAMESPACE, "Include") {
        return None;
    }
    attribute(element, "", "href").map(normalize_content_id)
}

/// Codec MTOM pour une version SOAP
pub struct MtomCodec {
    envelope: SoapCodec,
}

impl MtomCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            envelope: SoapCodec::new(version),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.envelope.version()
    }

    fn root_content_type(&self, soap_action: Option<&str>) -> String {
        let inner = self.version().media_type();
        match soap_action {
            Some(action) if self.version() == SoapVersion::Soap12 && !action.is_empty() => {
                format!(
                    "{}; charset=UTF-8; type=\"{}\"; action=\"{}\"",
                    XOP_MEDIA_TYPE, inner, action
                )
            }
            _ => format!("{}; charset=UTF-8; type=\"{}\"", XOP_MEDIA_TYPE, inner),
        }
    }
}

impl Encoder for MtomCodec {
    /// La frontière est aléatoire : pas de type connu d'avance
    fn static_content_type(&self, _message: &Message) -> Option<ContentType> {
        None
    }

    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError> {
        let envelope_type = self.envelope.content_type_for(message);
        let soap_action = message.property(property::SOAP_ACTION).map(str::to_string);
        let root_type = self.root_content_type(soap_action.as_deref());
        let boundary = new_boundary();
        let attachments = message.attachments().clone();

        let root = self.envelope.write_envelope(message)?;
        write_related(sink, &boundary, &root_type, root, &attachments)?;
        debug!(
            %boundary,
            attachments = attachments.len(),
            "encoded MTOM message"
        );

        let content_type = format!(
            "multipart/related; type=\"{}\"; boundary=\"{}\"; start=\"<{}>\"; start-info=\"{}\"",
            XOP_MEDIA_TYPE,
            boundary,
            ROOT_CONTENT_ID,
            self.version().media_type()
        );
        Ok(ContentType::new(content_type).with_soap_action(envelope_type.soap_action))
    }
}

impl Decoder for MtomCodec {
    fn decode(
        &mut self,
        source: &mut dyn Read,
        content_type: &str,
    ) -> Result<Message, DecodeError> {
        let media = media_type(content_type);
        let root_type = content_type_parameter(content_type, "type").unwrap_or_default();
        if media != "multipart/related" || !root_type.eq_ignore_ascii_case(XOP_MEDIA_TYPE) {
            return Err(DecodeError::UnsupportedMediaType(media));
        }

        let body = Bytes::from(read_all(source)?);
        let (root, attachments) = split_related(&body, content_type)?;
        let mut message = self.envelope.decode_envelope(root.body.clone())?;
        for attachment in attachments.iter() {
            message.attachments_mut().add(attachment.clone())?;
        }
        message.set_property(property::CONTENT_TYPE, content_type);
        if let Some(action) = content_type_parameter(root.content_type(), "action")
            .or_else(|| content_type_parameter(content_type, "action"))
        {
            message.set_property(property::SOAP_ACTION, action);
        }
        Ok(message)
    }
}

impl Codec for MtomCodec {
    fn mime_type(&self) -> &str {
        XOP_MEDIA_TYPE
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(MtomCodec::new(self.version()))
    }
}
