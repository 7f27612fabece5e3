//! # Module Codec - conversion message ⇄ octets
//!
//! Un codec associe un [`Encoder`] et un [`Decoder`]. Les codecs portent des
//! tampons de travail et ne sont **pas** réentrants : une opération
//! concurrente exige sa propre instance, obtenue par [`Codec::copy`]. Les
//! copies partagent uniquement la configuration (version, options).
//!
//! Codecs fournis :
//!
//! - [`SoapCodec`] : enveloppe SOAP 1.1 (`text/xml`) ou 1.2 (`application/soap+xml`)
//! - [`XmlCodec`] : XML brut, sans enveloppe (`application/xml`)
//! - [`MtomCodec`] : MTOM/XOP (`multipart/related; type="application/xop+xml"`)
//! - [`SwaCodec`] : SOAP with Attachments (`multipart/related; type="text/xml"`)
//! - [`SoapBindingCodec`] : choisit parmi les précédents selon le message

mod binding;
mod mime;
mod mtom;
mod soap;
mod swa;
mod xml;

pub use binding::SoapBindingCodec;
pub use mtom::{MtomCodec, XOP_NAMESPACE, xop_include, xop_reference};
pub use soap::SoapCodec;
pub use swa::SwaCodec;
pub use xml::XmlCodec;

use std::fmt;
use std::io::{Read, Write};

use crate::binding::Binding;
use crate::error::{DecodeError, EncodeError};
use crate::message::Message;
use crate::settings::RuntimeSettings;

/// Type de contenu négocié pour un message encodé
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Valeur complète de l'en-tête `Content-Type`
    pub content_type: String,
    /// Valeur SOAPAction à transmettre séparément (SOAP 1.1)
    pub soap_action: Option<String>,
    /// Valeur d'en-tête `Accept` suggérée
    pub accept: Option<String>,
}

impl ContentType {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            soap_action: None,
            accept: None,
        }
    }

    pub fn with_soap_action(mut self, soap_action: Option<String>) -> Self {
        self.soap_action = soap_action;
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Type MIME sans paramètres, en minuscules
    pub fn media_type(&self) -> String {
        media_type(&self.content_type)
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        content_type_parameter(&self.content_type, name)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_type)
    }
}

/// Type MIME d'une valeur `Content-Type`, sans paramètres et en minuscules
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Valeur d'un paramètre d'une valeur `Content-Type`
///
/// Les valeurs entre guillemets peuvent contenir des `;`.
pub fn content_type_parameter(content_type: &str, name: &str) -> Option<String> {
    let mut rest = content_type.split_once(';')?.1;
    loop {
        let trimmed = rest.trim_start();
        let (key, after_key) = trimmed.split_once('=')?;
        let after_key = after_key.trim_start();
        let (value, remaining) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"')?;
            let after = &quoted[end + 1..];
            let remaining = after.split_once(';').map(|(_, r)| r);
            (quoted[..end].to_string(), remaining)
        } else {
            match after_key.split_once(';') {
                Some((value, r)) => (value.trim().to_string(), Some(r)),
                None => (after_key.trim().to_string(), None),
            }
        };
        if key.trim().eq_ignore_ascii_case(name) {
            return Some(value);
        }
        rest = remaining?;
    }
}

/// Conversion d'un message vers le fil
pub trait Encoder {
    /// Type de contenu connu avant l'encodage, s'il ne dépend pas du corps
    ///
    /// Permet à un transport d'écrire ses en-têtes avant le corps.
    fn static_content_type(&self, message: &Message) -> Option<ContentType>;

    /// Écrit le message ; consomme son contenu
    fn encode(
        &mut self,
        message: &mut Message,
        sink: &mut dyn Write,
    ) -> Result<ContentType, EncodeError>;
}

/// Conversion du fil vers un message
pub trait Decoder {
    /// Lit un message complet (sans l'encadrement du transport)
    fn decode(&mut self, source: &mut dyn Read, content_type: &str)
    -> Result<Message, DecodeError>;
}

/// Paire encodeur/décodeur duplicable
pub trait Codec: Encoder + Decoder + Send + Sync {
    /// Type MIME principal du codec
    fn mime_type(&self) -> &str;

    /// Instance indépendante, de même configuration, sans tampon partagé
    fn copy(&self) -> Box<dyn Codec>;
}

/// Codec adapté à une liaison
pub fn codec_for(binding: &Binding, settings: &RuntimeSettings) -> Box<dyn Codec> {
    match binding.version {
        None => Box::new(XmlCodec::new()),
        Some(version) => Box::new(SoapBindingCodec::new(
            version,
            binding.mtom || settings.mtom,
        )),
    }
}

/// Lit tout le flux dans un tampon détenu
pub(crate) fn read_all(source: &mut dyn Read) -> Result<Vec<u8>, DecodeError> {
    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;
    Ok(buffer)
}
