//! Codec XML brut pour la liaison XML/HTTP

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::debug;

use super::{Codec, ContentType, Decoder, Encoder, media_type, read_all};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, property};
use crate::xml::XmlWriter;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Codec sans enveloppe : le fil ne porte que le contenu
///
/// Les en-têtes du message ne sont pas transmis.
pub struct XmlCodec {
    scratch: Vec<u8>,
}

impl XmlCodec {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
        }
    }
}

impl Default for XmlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for XmlCodec {
    fn static_content_type(&self, _message: &Message) -> Option<ContentType> {
        Some(ContentType::new(XML_CONTENT_TYPE))
    }

    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError> {
        self.scratch.clear();
        if message.has_payload() {
            let mut writer = XmlWriter::new(&mut self.scratch);
            writer.write_declaration()?;
            message.write_payload_to(&mut writer)?;
        }
        sink.write_all(&self.scratch)?;
        debug!(bytes = self.scratch.len(), "encoded XML payload");
        Ok(ContentType::new(XML_CONTENT_TYPE))
    }
}

impl Decoder for XmlCodec {
    fn decode(
        &mut self,
        source: &mut dyn Read,
        content_type: &str,
    ) -> Result<Message, DecodeError> {
        let media = media_type(content_type);
        if media != "application/xml" && media != "text/xml" {
            return Err(DecodeError::UnsupportedMediaType(media));
        }
        let bytes = Bytes::from(read_all(source)?);
        let mut message = Message::from_source(bytes)?;
        message.set_property(property::CONTENT_TYPE, content_type);
        Ok(message)
    }
}

impl Codec for XmlCodec {
    fn mime_type(&self) -> &str {
        "application/xml"
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(XmlCodec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{PayloadEvent, QName};

    #[test]
    fn test_payload_only_roundtrip() {
        let mut codec = XmlCodec::new();
        let mut message = Message::from_source(r#"<p:Order xmlns:p="urn:shop" id="7"/>"#).unwrap();

        let mut wire = Vec::new();
        let ct = codec.encode(&mut message, &mut wire).unwrap();
        assert!(!String::from_utf8_lossy(&wire).contains("Envelope"));

        let mut back = codec.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
        let first = back.read_payload().unwrap().next().unwrap().unwrap();
        assert_eq!(
            first,
            PayloadEvent::Start {
                name: QName::new("urn:shop", "Order"),
                attributes: vec![(QName::unqualified("id"), "7".into())],
            }
        );
    }

    #[test]
    fn test_empty_body_decodes_to_empty_message() {
        let mut codec = XmlCodec::new();
        let message = codec.decode(&mut &b""[..], "application/xml").unwrap();
        assert!(!message.has_payload());
    }
}
