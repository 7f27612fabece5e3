//! Erreurs du runtime SOAP
//!
//! Chaque domaine de défaillance possède son énumération : XML brut,
//! modèle de message, décodage, encodage, pipeline et transport.

use std::io;
use thiserror::Error;

use crate::message::SoapFault;
use crate::pipeline::StageId;

/// Erreur de lecture ou d'écriture XML
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Undeclared namespace prefix '{0}'")]
    UndeclaredPrefix(String),
}

impl XmlError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        XmlError::Malformed(message.into())
    }
}

/// Erreur d'accès au contenu d'un message
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message payload has already been consumed")]
    AlreadyConsumed,

    #[error("Message has no payload")]
    NoPayload,

    #[error("Duplicate attachment content id '{0}'")]
    DuplicateContentId(String),

    #[error("Attachment '{0}' not found")]
    MissingAttachment(String),

    #[error("Invalid SOAP fault: {0}")]
    InvalidFault(String),

    #[error("Invalid endpoint reference: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Erreur de décodage d'un flux d'octets en message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("SOAP version mismatch: envelope namespace '{0}'")]
    VersionMismatch(String),

    #[error("I/O error while reading message: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        DecodeError::Malformed(message.into())
    }

    /// Code de statut qu'un transport HTTP associe à cette erreur
    pub fn status_code(&self) -> u16 {
        match self {
            DecodeError::UnsupportedMediaType(_) => 415,
            DecodeError::Malformed(_) => 400,
            DecodeError::VersionMismatch(_) => 500,
            DecodeError::Io(_) => 400,
        }
    }
}

impl From<XmlError> for DecodeError {
    fn from(err: XmlError) -> Self {
        match err {
            XmlError::Io(io) => DecodeError::Io(io),
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

impl From<MessageError> for DecodeError {
    fn from(err: MessageError) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Erreur d'encodage d'un message vers le fil
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error while writing message: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Cannot encode message: {0}")]
    Unsupported(String),
}

/// Erreur remontée par un transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Endpoint '{0}' is not reachable")]
    Unreachable(String),

    #[error("Transport failure: {0}")]
    Failure(String),
}

/// Erreur de construction ou d'exécution d'un pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline configuration error: {0}")]
    Configuration(String),

    #[error("No transport available for address '{0}'")]
    NoTransport(String),

    #[error("Stage {0} is already processing a message")]
    Reentrant(StageId),

    #[error("Stage {0} does not exist in this pipeline")]
    UnknownStage(StageId),

    #[error("Pipeline has been destroyed")]
    Destroyed,

    #[error("Message has no destination address")]
    MissingAddress,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fault(#[from] SoapFault),
}

impl PipelineError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status_codes() {
        assert_eq!(
            DecodeError::UnsupportedMediaType("application/json".into()).status_code(),
            415
        );
        assert_eq!(DecodeError::malformed("bad").status_code(), 400);
        assert_eq!(
            DecodeError::VersionMismatch("urn:x".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_xml_error_becomes_malformed() {
        let err: DecodeError = XmlError::malformed("unexpected end").into();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
