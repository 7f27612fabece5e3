//! Transport en mémoire vers un endpoint du même processus

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Transport, TransportFactory, TransportResponse, TransportStage, scheme_of};
use crate::codec::{ContentType, codec_for};
use crate::endpoint::{ServerEndpoint, ServerRequest};
use crate::error::{PipelineError, TransportError};
use crate::pipeline::{AssemblyContext, Stage};

/// Schéma des adresses locales : `local://nom`
pub const LOCAL_SCHEME: &str = "local";

/// Transmet les octets encodés à un [`ServerEndpoint`]
pub struct LocalTransport {
    address: String,
    endpoint: Arc<ServerEndpoint>,
}

impl LocalTransport {
    pub fn new(address: impl Into<String>, endpoint: Arc<ServerEndpoint>) -> Self {
        Self {
            address: address.into(),
            endpoint,
        }
    }
}

impl Transport for LocalTransport {
    fn send(
        &mut self,
        content_type: &ContentType,
        body: &[u8],
    ) -> Result<TransportResponse, TransportError> {
        if self.endpoint.is_shut_down() {
            return Err(TransportError::Unreachable(self.address.clone()));
        }
        let mut request = ServerRequest::new(content_type.content_type.clone(), body.to_vec())
            .with_local_address(self.address.clone());
        if let Some(action) = &content_type.soap_action {
            request = request.with_soap_action(action.clone());
        }
        let response = self.endpoint.handle(request);
        Ok(TransportResponse {
            status: response.status,
            content_type: response.content_type,
            body: response.body,
        })
    }

    fn copy(&self) -> Box<dyn Transport> {
        Box::new(LocalTransport::new(self.address.clone(), self.endpoint.clone()))
    }
}

/// Annuaire des endpoints joignables par `local://nom`
#[derive(Default)]
pub struct LocalTransportFactory {
    endpoints: RwLock<HashMap<String, Arc<ServerEndpoint>>>,
}

impl LocalTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publie un endpoint sous `local://name`
    pub fn register(&self, name: impl Into<String>, endpoint: Arc<ServerEndpoint>) {
        let name = name.into();
        info!(%name, "local endpoint registered");
        self.endpoints.write().insert(name, endpoint);
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<ServerEndpoint>> {
        self.endpoints.write().remove(name)
    }

    pub fn address_of(name: &str) -> String {
        format!("{}://{}", LOCAL_SCHEME, name)
    }

    fn endpoint_name(address: &str) -> &str {
        let rest = address
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(address);
        rest.split('/').next().unwrap_or(rest)
    }
}

impl TransportFactory for LocalTransportFactory {
    fn create(
        &self,
        address: &str,
        context: &AssemblyContext,
    ) -> Result<Option<Box<dyn Stage>>, PipelineError> {
        if scheme_of(address).as_deref() != Some(LOCAL_SCHEME) {
            return Ok(None);
        }
        let name = Self::endpoint_name(address);
        let endpoint = self
            .endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;
        debug!(%address, "local transport created");
        let codec = codec_for(&context.binding, &context.settings);
        Ok(Some(Box::new(TransportStage::new(
            address,
            codec,
            Box::new(LocalTransport::new(address, endpoint)),
            context.binding.clone(),
        ))))
    }
}
