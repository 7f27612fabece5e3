//! # Module Transport - acheminement des octets
//!
//! Un [`Transport`] envoie une requête encodée et rend la réponse brute.
//! Une [`TransportFactory`] construit, pour une adresse donnée, l'étape
//! terminale qui encode, envoie et décode ([`TransportStage`]). Le
//! [`TransportRegistry`] interroge ses fabriques dans l'ordre.
//!
//! Le [`TransportResolverStage`] retarde ce choix jusqu'au premier message
//! et garde en cache le transport de la dernière adresse utilisée.

#[cfg(feature = "http")]
mod http;
mod local;
mod resolver;
mod stage;

#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportFactory};
pub use local::{LocalTransport, LocalTransportFactory};
pub use resolver::TransportResolverStage;
pub use stage::TransportStage;

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::codec::ContentType;
use crate::error::{PipelineError, TransportError};
use crate::pipeline::{AssemblyContext, Stage};

/// Réponse brute d'un transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Canal d'envoi vers une adresse fixée à la construction
pub trait Transport: Send {
    fn send(
        &mut self,
        content_type: &ContentType,
        body: &[u8],
    ) -> Result<TransportResponse, TransportError>;

    /// Instance indépendante vers la même adresse
    fn copy(&self) -> Box<dyn Transport>;

    /// Ferme les ressources ouvertes ; peut être appelée plusieurs fois
    fn close(&mut self) {}
}

/// Fabrique d'étapes de transport
pub trait TransportFactory: Send + Sync {
    /// Étape terminale pour `address`, ou `None` si l'adresse n'est pas
    /// prise en charge
    fn create(
        &self,
        address: &str,
        context: &AssemblyContext,
    ) -> Result<Option<Box<dyn Stage>>, PipelineError>;
}

/// Fabriques de transport, consultées dans l'ordre d'enregistrement
#[derive(Default, Clone)]
pub struct TransportRegistry {
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registre avec les transports compilés dans la crate
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "http")]
        registry.register(Arc::new(HttpTransportFactory::new()));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        self.factories.push(factory);
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Étape de transport pour une adresse
    ///
    /// # Returns
    ///
    /// `PipelineError::NoTransport` si aucune fabrique n'accepte l'adresse
    pub fn resolve(
        &self,
        address: &str,
        context: &AssemblyContext,
    ) -> Result<Box<dyn Stage>, PipelineError> {
        for factory in &self.factories {
            if let Some(stage) = factory.create(address, context)? {
                debug!(%address, stage = stage.name(), "transport resolved");
                return Ok(stage);
            }
        }
        Err(PipelineError::NoTransport(address.to_string()))
    }
}

/// Schéma d'une adresse, en minuscules
pub(crate) fn scheme_of(address: &str) -> Option<String> {
    url::Url::parse(address)
        .ok()
        .map(|url| url.scheme().to_ascii_lowercase())
}
