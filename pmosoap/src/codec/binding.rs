//! Codec de liaison SOAP : négocie entre enveloppe simple, SwA et MTOM

use std::io::{Read, Write};

use tracing::trace;

use super::mtom::MtomCodec;
use super::soap::SoapCodec;
use super::swa::SwaCodec;
use super::{Codec, ContentType, Decoder, Encoder, content_type_parameter, media_type};
use crate::error::{DecodeError, EncodeError};
use crate::message::Message;
use crate::version::SoapVersion;

/// Codec d'une liaison SOAP
///
/// Le décodeur est choisi d'après le type reçu, l'encodeur d'après la
/// configuration MTOM et la présence de pièces jointes.
pub struct SoapBindingCodec {
    version: SoapVersion,
    mtom_enabled: bool,
    soap: SoapCodec,
    swa: SwaCodec,
    mtom: MtomCodec,
}

impl SoapBindingCodec {
    pub fn new(version: SoapVersion, mtom_enabled: bool) -> Self {
        Self {
            version,
            mtom_enabled,
            soap: SoapCodec::new(version),
            swa: SwaCodec::new(version),
            mtom: MtomCodec::new(version),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn is_mtom_enabled(&self) -> bool {
        self.mtom_enabled
    }

    fn accept(&self) -> String {
        format!(
            "{}, multipart/related, application/xop+xml",
            self.version.media_type()
        )
    }
}

impl Encoder for SoapBindingCodec {
    fn static_content_type(&self, message: &Message) -> Option<ContentType> {
        if self.mtom_enabled {
            return None;
        }
        self.swa
            .static_content_type(message)
            .map(|ct| ct.with_accept(self.accept()))
    }

    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError> {
        let accept = self.accept();
        let content_type = if self.mtom_enabled {
            self.mtom.encode(message, sink)?
        } else if !message.attachments().is_empty() {
            self.swa.encode(message, sink)?
        } else {
            self.soap.encode(message, sink)?
        };
        Ok(content_type.with_accept(accept))
    }
}

impl Decoder for SoapBindingCodec {
    fn decode(
        &mut self,
        source: &mut dyn Read,
        content_type: &str,
    ) -> Result<Message, DecodeError> {
        let media = media_type(content_type);
        if media == "multipart/related" {
            let root_type = content_type_parameter(content_type, "type")
                .unwrap_or_default()
                .to_ascii_lowercase();
            trace!(%root_type, "decoding multipart message");
            if root_type == "application/xop+xml" {
                self.mtom.decode(source, content_type)
            } else {
                self.swa.decode(source, content_type)
            }
        } else {
            self.soap.decode(source, content_type)
        }
    }
}

impl Codec for SoapBindingCodec {
    fn mime_type(&self) -> &str {
        self.version.media_type()
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(SoapBindingCodec::new(self.version, self.mtom_enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;
    use crate::xml::parse_element;

    fn order() -> Message {
        Message::from_tree(parse_element(br#"<o:Order xmlns:o="urn:shop"/>"#).unwrap())
    }

    #[test]
    fn test_selects_encoder_by_attachments() {
        let mut codec = SoapBindingCodec::new(SoapVersion::Soap12, false);

        let mut plain = order();
        let mut wire = Vec::new();
        let ct = codec.encode(&mut plain, &mut wire).unwrap();
        assert_eq!(ct.media_type(), "application/soap+xml");
        assert!(ct.accept.is_some());

        let mut with_part = order();
        with_part
            .attachments_mut()
            .add(Attachment::new("a@b", "text/plain", "hi"))
            .unwrap();
        let mut wire = Vec::new();
        let ct = codec.encode(&mut with_part, &mut wire).unwrap();
        assert_eq!(ct.media_type(), "multipart/related");

        let back = codec.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
        assert_eq!(back.attachments().len(), 1);
    }

    #[test]
    fn test_mtom_enabled() {
        let mut codec = SoapBindingCodec::new(SoapVersion::Soap11, true);
        let mut message = order();
        assert!(codec.static_content_type(&message).is_none());

        let mut wire = Vec::new();
        let ct = codec.encode(&mut message, &mut wire).unwrap();
        assert_eq!(ct.parameter("type").as_deref(), Some("application/xop+xml"));

        let mut copy = codec.copy();
        let back = copy.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
        assert_eq!(back.payload_local_part(), Some("Order"));
    }
}
