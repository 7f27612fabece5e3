//! Codec d'enveloppe SOAP 1.1 / 1.2

use std::io::{self, Read, Write};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{Codec, ContentType, Decoder, Encoder, content_type_parameter, media_type, read_all};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Header, HeaderList, Message, property};
use crate::version::SoapVersion;
use crate::xml::{QName, StartTag, Token, XmlCursor, XmlWriter, read_element};

/// Codec d'enveloppe SOAP d'une version donnée
///
/// Le décodage est paresseux : les en-têtes sont analysés immédiatement,
/// le contenu du `Body` reste une plage d'octets analysée à la première
/// lecture.
pub struct SoapCodec {
    version: SoapVersion,
    scratch: Vec<u8>,
    parse_buffer: Vec<u8>,
}

impl SoapCodec {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            version,
            scratch: Vec::new(),
            parse_buffer: Vec::new(),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// Type de contenu d'une enveloppe pour ce message
    pub fn content_type_for(&self, message: &Message) -> ContentType {
        let action = message.property(property::SOAP_ACTION).map(str::to_string);
        match self.version {
            SoapVersion::Soap11 => ContentType::new("text/xml; charset=utf-8")
                .with_soap_action(Some(action.unwrap_or_default())),
            SoapVersion::Soap12 => {
                let content_type = match &action {
                    Some(action) if !action.is_empty() => format!(
                        "application/soap+xml; charset=utf-8; action=\"{}\"",
                        action
                    ),
                    _ => "application/soap+xml; charset=utf-8".to_string(),
                };
                ContentType::new(content_type)
            }
        }
    }

    /// Sérialise l'enveloppe dans le tampon de travail
    pub(crate) fn write_envelope(&mut self, message: &mut Message) -> Result<&[u8], EncodeError> {
        self.scratch.clear();
        {
            let mut writer = XmlWriter::new(&mut self.scratch);
            message.write_envelope(self.version, &mut writer)?;
        }
        Ok(&self.scratch)
    }

    /// Décode une enveloppe déjà extraite de son encadrement
    pub(crate) fn decode_envelope(&mut self, bytes: Bytes) -> Result<Message, DecodeError> {
        let buffer = std::mem::take(&mut self.parse_buffer);
        let mut cursor = XmlCursor::new(io::Cursor::new(bytes.clone())).with_buffer(buffer);
        let result = parse_envelope(self.version, &mut cursor, &bytes);
        self.parse_buffer = cursor.into_buffer();
        result
    }
}

fn next_start<R: io::BufRead>(
    cursor: &mut XmlCursor<R>,
    depth: usize,
) -> Result<Option<StartTag>, DecodeError> {
    loop {
        match cursor.next_token()? {
            Token::Start(tag) => return Ok(Some(tag)),
            Token::End(_) if cursor.depth() < depth => return Ok(None),
            Token::Eof => return Ok(None),
            Token::Text(text) if text.trim().is_empty() => continue,
            Token::Text(_) => {
                return Err(DecodeError::malformed("unexpected character data in envelope"));
            }
            Token::End(_) => continue,
        }
    }
}

fn parse_envelope<R: io::BufRead>(
    version: SoapVersion,
    cursor: &mut XmlCursor<R>,
    bytes: &Bytes,
) -> Result<Message, DecodeError> {
    let ns = version.namespace();

    let envelope =
        next_start(cursor, 0)?.ok_or_else(|| DecodeError::malformed("empty document"))?;
    if envelope.name.local != "Envelope" {
        return Err(DecodeError::malformed(format!(
            "root element {} is not an Envelope",
            envelope.name
        )));
    }
    if envelope.name.namespace != ns {
        return Err(DecodeError::VersionMismatch(envelope.name.namespace));
    }

    let mut headers = HeaderList::new();
    let mut child = next_start(cursor, 1)?;

    if let Some(tag) = child.as_ref().filter(|t| t.name.is(ns, "Header")) {
        if !tag.empty {
            while let Some(block) = next_start(cursor, 2)? {
                let element = read_element(cursor, block)?;
                headers.add(Header::from_element(version, element));
            }
        } else {
            // consomme la fin de l'élément vide
            cursor.next_token()?;
        }
        child = next_start(cursor, 1)?;
    }

    let body = child.ok_or_else(|| DecodeError::malformed("missing Body"))?;
    if !body.name.is(ns, "Body") {
        return Err(DecodeError::malformed(format!(
            "unexpected element {} in Envelope",
            body.name
        )));
    }

    let body_start = cursor.position();
    let inherited = cursor.scope().bindings();
    let payload_name: Option<QName> = if body.empty {
        None
    } else {
        next_start(cursor, 2)?.map(|tag| tag.name)
    };

    let span = if payload_name.is_none() {
        body_start..body_start
    } else {
        match body_end_by_tail(bytes, body_start) {
            Some(end) => body_start..end,
            None => body_start..body_end_by_scan(cursor)?,
        }
    };
    trace!(
        headers = headers.len(),
        payload = ?payload_name,
        span = ?span,
        "decoded SOAP envelope"
    );

    Ok(Message::from_stream(
        version,
        headers,
        bytes.clone(),
        span,
        inherited,
        payload_name,
    ))
}

/// Début de la dernière balise fermante se terminant avant `end`
fn last_end_tag(bytes: &[u8], end: usize, local: &str) -> Option<usize> {
    let slice = &bytes[..end];
    let trimmed_end = slice.iter().rposition(|b| !b.is_ascii_whitespace())? + 1;
    if slice[trimmed_end - 1] != b'>' {
        return None;
    }
    let open = slice[..trimmed_end].windows(2).rposition(|w| w == b"</")?;
    let name = std::str::from_utf8(&slice[open + 2..trimmed_end - 1]).ok()?;
    let name = name.trim_end();
    let matches = name == local || name.rsplit_once(':').is_some_and(|(_, l)| l == local);
    matches.then_some(open)
}

/// Fin du `Body` par balayage arrière de `</Envelope>` puis `</Body>`
fn body_end_by_tail(bytes: &[u8], body_start: usize) -> Option<usize> {
    let envelope_end = last_end_tag(bytes, bytes.len(), "Envelope")?;
    let body_end = last_end_tag(bytes, envelope_end, "Body")?;
    (body_end >= body_start).then_some(body_end)
}

/// Fin du `Body` par lecture des jetons jusqu'à sa balise fermante
fn body_end_by_scan<R: io::BufRead>(cursor: &mut XmlCursor<R>) -> Result<usize, DecodeError> {
    loop {
        let before = cursor.position();
        match cursor.next_token()? {
            Token::End(_) if cursor.depth() == 1 => return Ok(before),
            Token::Eof => return Err(DecodeError::malformed("unterminated Body")),
            _ => continue,
        }
    }
}

/// Vérifie le type de contenu pour une version donnée
pub(crate) fn check_media_type(
    version: SoapVersion,
    content_type: &str,
) -> Result<(), DecodeError> {
    let media = media_type(content_type);
    if media == version.media_type() {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedMediaType(media))
    }
}

impl Encoder for SoapCodec {
    fn static_content_type(&self, message: &Message) -> Option<ContentType> {
        Some(self.content_type_for(message))
    }

    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError> {
        let version = self.version;
        let content_type = self.content_type_for(message);
        let envelope = self.write_envelope(message)?;
        sink.write_all(envelope)?;
        debug!(%version, bytes = envelope.len(), "encoded SOAP envelope");
        Ok(content_type)
    }
}

impl Decoder for SoapCodec {
    fn decode(
        &mut self,
        source: &mut dyn Read,
        content_type: &str,
    ) -> Result<Message, DecodeError> {
        check_media_type(self.version, content_type)?;
        let bytes = Bytes::from(read_all(source)?);
        let mut message = self.decode_envelope(bytes)?;
        message.set_property(property::CONTENT_TYPE, content_type);
        if self.version == SoapVersion::Soap12 {
            if let Some(action) = content_type_parameter(content_type, "action") {
                message.set_property(property::SOAP_ACTION, action);
            }
        }
        Ok(message)
    }
}

impl Codec for SoapCodec {
    fn mime_type(&self) -> &str {
        self.version.media_type()
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(SoapCodec::new(self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FaultCode, SoapFault};
    use crate::version::{ROLE_ULTIMATE_RECEIVER, SOAP11_NAMESPACE, SOAP12_NAMESPACE};
    use crate::xml::{events_of, parse_element, same_infoset};

    const REQUEST: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:m="urn:calc">
  <soap:Header>
    <t:Trace xmlns:t="urn:trace" soap:mustUnderstand="1">abc</t:Trace>
  </soap:Header>
  <soap:Body>
    <m:Add><a>1</a><b>2</b></m:Add>
  </soap:Body>
</soap:Envelope>
"#;

    fn span_text(bytes: &[u8], span: std::ops::Range<usize>) -> &str {
        std::str::from_utf8(&bytes[span]).unwrap()
    }

    fn decode(codec: &mut SoapCodec, xml: &str, ct: &str) -> Result<Message, DecodeError> {
        codec.decode(&mut xml.as_bytes(), ct)
    }

    #[test]
    fn test_decode_is_lazy_and_keeps_inherited_namespaces() {
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        let mut message = decode(&mut codec, REQUEST, "text/xml; charset=utf-8").unwrap();

        assert_eq!(message.payload_name(), Some(&QName::new("urn:calc", "Add")));
        let header = message.headers().find("urn:trace", "Trace").unwrap();
        assert!(header.is_must_understood());
        assert_eq!(header.role(), ROLE_ULTIMATE_RECEIVER);
        assert_eq!(header.text_content(), "abc");

        // Le préfixe m est déclaré sur l'Envelope, hors de la plage du Body
        let tree = message.read_payload_as_tree().unwrap();
        let expected = parse_element(br#"<m:Add xmlns:m="urn:calc"><a>1</a><b>2</b></m:Add>"#)
            .unwrap();
        assert!(same_infoset(&events_of(&tree), &events_of(&expected)));
    }

    #[test]
    fn test_tail_scan_finds_body_end() {
        let start = REQUEST.find("<soap:Body>").unwrap() + "<soap:Body>".len();
        let end = body_end_by_tail(REQUEST.as_bytes(), start).unwrap();
        assert_eq!(
            span_text(REQUEST.as_bytes(), start..end).trim(),
            "<m:Add><a>1</a><b>2</b></m:Add>"
        );
    }

    #[test]
    fn test_trailing_comment_falls_back_to_scan() {
        let xml = format!("{}<!-- trailer -->", REQUEST.trim_end());
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        let mut message = decode(&mut codec, &xml, "text/xml").unwrap();
        let tree = message.read_payload_as_tree().unwrap();
        assert_eq!(tree.name, "Add");
    }

    #[test]
    fn test_unsupported_media_type() {
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        let err = decode(&mut codec, REQUEST, "application/json").unwrap_err();
        assert_eq!(err.status_code(), 415);
    }

    #[test]
    fn test_version_mismatch() {
        let mut codec = SoapCodec::new(SoapVersion::Soap12);
        let xml = REQUEST.replace(SOAP11_NAMESPACE, SOAP12_NAMESPACE);
        assert!(decode(&mut codec, &xml, "application/soap+xml").is_ok());

        let err = decode(&mut codec, REQUEST, "application/soap+xml").unwrap_err();
        assert!(matches!(err, DecodeError::VersionMismatch(ns) if ns == SOAP11_NAMESPACE));
    }

    #[test]
    fn test_malformed_envelope() {
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        for bad in [
            "<a/>",
            "",
            r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"/>"#,
            r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body>"#,
        ] {
            let err = decode(&mut codec, bad, "text/xml").unwrap_err();
            assert_eq!(err.status_code(), 400, "input {:?}", bad);
        }
    }

    #[test]
    fn test_malformed_payload_surfaces_on_read() {
        // Le contenu du Body n'est analysé qu'à la lecture
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><x><y></x></S:Body></S:Envelope>"#;
        let mut message = decode(&mut codec, xml, "text/xml").unwrap();
        assert!(message.read_payload_as_tree().is_err());
    }

    #[test]
    fn test_empty_body() {
        let mut codec = SoapCodec::new(SoapVersion::Soap11);
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Header/><S:Body/></S:Envelope>"#;
        let message = decode(&mut codec, xml, "text/xml").unwrap();
        assert!(!message.has_payload());
        assert!(!message.has_headers());
    }

    #[test]
    fn test_soap12_action_parameter_and_fault_roundtrip() {
        let mut codec = SoapCodec::new(SoapVersion::Soap12);
        let mut message = Message::fault(SoapVersion::Soap12, &SoapFault::sender("nope"));
        message.set_property(property::SOAP_ACTION, "urn:calc#Add");

        let mut wire = Vec::new();
        let ct = codec.encode(&mut message, &mut wire).unwrap();
        assert_eq!(
            ct.content_type,
            r#"application/soap+xml; charset=utf-8; action="urn:calc#Add""#
        );

        let mut back = codec.decode(&mut wire.as_slice(), &ct.content_type).unwrap();
        assert_eq!(back.property(property::SOAP_ACTION), Some("urn:calc#Add"));
        assert!(back.is_fault());
        assert_eq!(back.read_as_fault().unwrap().code, FaultCode::Sender);
    }
}
