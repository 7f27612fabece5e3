//! Codec SOAP with Attachments

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::debug;

use super::mime::{ROOT_CONTENT_ID, new_boundary, split_related, write_related};
use super::soap::{SoapCodec, check_media_type};
use super::{Codec, ContentType, Decoder, Encoder, content_type_parameter, media_type, read_all};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, property};
use crate::version::SoapVersion;

/// Enveloppe SOAP accompagnée de pièces jointes MIME
///
/// Sans pièce jointe, le message est une enveloppe SOAP ordinaire et le
/// type de contenu est connu d'avance.
pub struct SwaCodec {
    envelope: SoapCodec,
}

impl SwaCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            envelope: SoapCodec::new(version),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.envelope.version()
    }
}

impl Encoder for SwaCodec {
    fn static_content_type(&self, message: &Message) -> Option<ContentType> {
        if message.attachments().is_empty() {
            self.envelope.static_content_type(message)
        } else {
            None
        }
    }

    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError> {
        if message.attachments().is_empty() {
            return self.envelope.encode(message, sink);
        }

        let envelope_type = self.envelope.content_type_for(message);
        let inner = self.version().media_type();
        let boundary = new_boundary();
        let attachments = message.attachments().clone();

        let root = self.envelope.write_envelope(message)?;
        write_related(
            sink,
            &boundary,
            &envelope_type.content_type,
            root,
            &attachments,
        )?;
        debug!(%boundary, attachments = attachments.len(), "encoded SwA message");

        let content_type = format!(
            "multipart/related; type=\"{}\"; boundary=\"{}\"; start=\"<{}>\"",
            inner, boundary, ROOT_CONTENT_ID
        );
        Ok(ContentType::new(content_type).with_soap_action(envelope_type.soap_action))
    }
}

impl Decoder for SwaCodec {
    fn decode(
        &mut self,
        source: &mut dyn Read,
        content_type: &str,
    ) -> Result<Message, DecodeError> {
        if media_type(content_type) != "multipart/related" {
            return self.envelope.decode(source, content_type);
        }

        let root_type = content_type_parameter(content_type, "type").unwrap_or_default();
        check_media_type(self.version(), &root_type)?;

        let body = Bytes::from(read_all(source)?);
        let (root, attachments) = split_related(&body, content_type)?;
        let mut message = self.envelope.decode_envelope(root.body.clone())?;
        for attachment in attachments.iter() {
            message.attachments_mut().add(attachment.clone())?;
        }
        message.set_property(property::CONTENT_TYPE, content_type);
        if let Some(action) = content_type_parameter(root.content_type(), "action") {
            message.set_property(property::SOAP_ACTION, action);
        }
        Ok(message)
    }
}

impl Codec for SwaCodec {
    fn mime_type(&self) -> &str {
        "multipart/related"
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(SwaCodec::new(self.version()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;
    use crate::xml::parse_element;

    fn invoice() -> Message {
        Message::from_tree(parse_element(br#"<i:Invoice xmlns:i="urn:billing"/>"#).unwrap())
    }

    #[test]
    fn test_plain_envelope_without_attachments() {
        let mut codec = SwaCodec::new(SoapVersion::Soap11);
        let mut message = invoice();
        let expected = codec.static_content_type(&message).unwrap();

        let mut wire = Vec::new();
        let ct = codec.encode(&mut message, &mut wire).unwrap();
        assert_eq!(ct, expected);
        assert!(ct.content_type.starts_with("text/xml"));
    }

    #[test]
    fn test_multipart_with_attachments() {
        let mut codec = SwaCodec::new(SoapVersion::Soap11);
        let mut message = invoice();
        message
            .attachments_mut()
            .add(Attachment::new("scan@billing", "application/pdf", "%PDF-1.7"))
            .unwrap();
        assert!(codec.static_content_type(&message).is_none());

        let mut wire = Vec::new();
        let ct = codec.encode(&mut message, &mut wire).unwrap();
        assert_eq!(ct.parameter("type").as_deref(), Some("text/xml"));

        let mut back = codec.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
        assert_eq!(back.payload_local_part(), Some("Invoice"));
        assert_eq!(back.attachments().len(), 1);
        let pdf = back.attachments().get("<scan@billing>").unwrap();
        assert_eq!(pdf.content_type(), "application/pdf");
        assert!(back.read_payload_as_tree().is_ok());
    }
}
