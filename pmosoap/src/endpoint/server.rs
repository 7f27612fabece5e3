//! Endpoint serveur : octets reçus → pipeline → octets émis

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::registry::Drainable;
use crate::binding::Binding;
use crate::codec::{Codec, codec_for};
use crate::error::{DecodeError, PipelineError};
use crate::message::{Message, SoapFault, property};
use crate::pipeline::{AssemblyContext, PipelineBuilder, PipelinePool};
use crate::version::SoapVersion;

/// Requête brute remise par un transport
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub content_type: String,
    pub soap_action: Option<String>,
    /// Adresse du serveur telle que le client l'a contactée
    pub local_address: Option<String>,
    pub body: Bytes,
}

impl ServerRequest {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            soap_action: None,
            local_address: None,
            body: body.into(),
        }
    }

    pub fn with_soap_action(mut self, soap_action: impl Into<String>) -> Self {
        self.soap_action = Some(soap_action.into());
        self
    }

    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }
}

/// Réponse à rendre par le transport
#[derive(Debug, Clone)]
pub struct ServerResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ServerResponse {
    fn status_only(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }
}

/// Point d'entrée serveur d'un service
///
/// Le codec est un prototype copié pour chaque requête ; les pipelines
/// sont empruntés à une réserve. Plusieurs requêtes peuvent être traitées
/// en parallèle sur un même endpoint.
pub struct ServerEndpoint {
    binding: Arc<Binding>,
    version: SoapVersion,
    codec: Box<dyn Codec>,
    pool: PipelinePool,
    registries: Vec<Arc<dyn Drainable>>,
    shut_down: AtomicBool,
}

impl ServerEndpoint {
    /// Construit l'endpoint et son pipeline modèle
    ///
    /// # Arguments
    ///
    /// * `context` - Liaison, réglages et transports
    /// * `recipe` - Recette du pipeline serveur
    ///
    /// # Returns
    ///
    /// Une erreur de configuration si la recette ne peut être assemblée
    pub fn new(context: &AssemblyContext, recipe: &PipelineBuilder) -> Result<Self, PipelineError> {
        let master = recipe.build(context)?;
        let codec = codec_for(&context.binding, &context.settings);
        info!(
            service = %context.binding.service,
            codec = codec.mime_type(),
            "server endpoint ready"
        );
        Ok(Self {
            binding: context.binding.clone(),
            version: context.binding.version.unwrap_or(context.settings.version),
            codec,
            pool: PipelinePool::new(master, context.settings.pool_capacity),
            registries: Vec::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Registre vidé à l'arrêt de l'endpoint
    pub fn with_registry(mut self, registry: Arc<dyn Drainable>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Traite une requête complète
    pub fn handle(&self, request: ServerRequest) -> ServerResponse {
        if self.is_shut_down() {
            return ServerResponse::status_only(503);
        }
        let mut codec = self.codec.copy();

        let mut message = match codec.decode(&mut request.body.as_ref(), &request.content_type) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, content_type = %request.content_type, "rejecting request");
                let fault = match &err {
                    DecodeError::VersionMismatch(found) => SoapFault::version_mismatch(found),
                    other => SoapFault::sender(other.to_string()),
                };
                return self.fault_response(codec.as_mut(), err.status_code(), &fault);
            }
        };

        if let Some(action) = &request.soap_action {
            if message.property(property::SOAP_ACTION).is_none() {
                message.set_property(property::SOAP_ACTION, action.trim_matches('"'));
            }
        }
        if let Some(address) = &request.local_address {
            message.set_property(property::LOCAL_ADDRESS, address.clone());
        }
        let one_way = message.is_one_way(&self.binding);

        let outcome = self
            .pool
            .lease()
            .and_then(|mut pipeline| pipeline.process(message));
        match outcome {
            Ok(_) if one_way => ServerResponse::status_only(202),
            Ok(mut response) => {
                let status = if response.is_fault() { 500 } else { 200 };
                let mut body = Vec::new();
                match codec.encode(&mut response, &mut body) {
                    Ok(content_type) => {
                        debug!(status, bytes = body.len(), "response encoded");
                        ServerResponse {
                            status,
                            content_type: Some(content_type.content_type),
                            body: Bytes::from(body),
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "failed to encode response");
                        ServerResponse::status_only(500)
                    }
                }
            }
            Err(PipelineError::Fault(fault)) => self.fault_response(codec.as_mut(), 500, &fault),
            Err(err) => {
                error!(error = %err, "pipeline failed");
                let fault = SoapFault::receiver(err.to_string());
                self.fault_response(codec.as_mut(), 500, &fault)
            }
        }
    }

    fn fault_response(&self, codec: &mut dyn Codec, status: u16, fault: &SoapFault) -> ServerResponse {
        let mut message = Message::fault(self.version, fault);
        let mut body = Vec::new();
        match codec.encode(&mut message, &mut body) {
            Ok(content_type) => ServerResponse {
                status,
                content_type: Some(content_type.content_type),
                body: Bytes::from(body),
            },
            Err(err) => {
                error!(error = %err, "failed to encode fault");
                ServerResponse::status_only(status)
            }
        }
    }

    /// Arrête l'endpoint : pipelines libérés, registres vidés
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.drain();
        let released: usize = self.registries.iter().map(|r| r.drain_all()).sum();
        info!(service = %self.binding.service, released, "server endpoint shut down");
    }
}

impl Drop for ServerEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::OperationInfo;
    use crate::pipeline::server_recipe;
    use crate::pipeline::stages::{Invoker, InvokerStage};
    use crate::settings::RuntimeSettings;
    use crate::transport::TransportRegistry;
    use crate::xml::{QName, parse_element};

    const ECHO: &str = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
<S:Body><e:Echo xmlns:e="urn:echo">hello</e:Echo></S:Body></S:Envelope>"#;

    fn endpoint() -> ServerEndpoint {
        let binding = Binding::new("Echo", Some(SoapVersion::Soap11))
            .with_operation(OperationInfo {
                name: "Echo".into(),
                input: Some(QName::new("urn:echo", "Echo")),
                ..Default::default()
            })
            .with_operation(OperationInfo {
                name: "Ping".into(),
                input: Some(QName::new("urn:echo", "Ping")),
                one_way: true,
                ..Default::default()
            });
        let context =
            AssemblyContext::new(binding, RuntimeSettings::default(), TransportRegistry::new());
        let invoker: Arc<dyn Invoker> =
            Arc::new(|mut request: Message| -> Result<Message, SoapFault> {
                let tree = request
                    .read_payload_as_tree()
                    .map_err(|e| SoapFault::sender(e.to_string()))?;
                if tree.name == "Echo" {
                    Ok(Message::from_tree(
                        parse_element(br#"<e:EchoResponse xmlns:e="urn:echo"/>"#).unwrap(),
                    ))
                } else {
                    Err(SoapFault::receiver("unexpected"))
                }
            });
        ServerEndpoint::new(&context, &server_recipe(InvokerStage::factory(invoker))).unwrap()
    }

    #[test]
    fn test_request_response() {
        let endpoint = endpoint();
        let response = endpoint.handle(ServerRequest::new("text/xml; charset=utf-8", ECHO));
        assert_eq!(response.status, 200);
        assert!(String::from_utf8_lossy(&response.body).contains("EchoResponse"));
    }

    #[test]
    fn test_one_way_is_accepted() {
        let endpoint = endpoint();
        let ping = ECHO.replace("Echo", "Ping");
        let response = endpoint.handle(ServerRequest::new("text/xml", ping));
        assert_eq!(response.status, 202);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_decode_errors_map_to_status() {
        let endpoint = endpoint();
        let response = endpoint.handle(ServerRequest::new("application/json", "{}"));
        assert_eq!(response.status, 415);
        assert!(String::from_utf8_lossy(&response.body).contains("faultcode"));

        let response = endpoint.handle(ServerRequest::new("text/xml", "<S:Envelope"));
        assert_eq!(response.status, 400);

        let soap12 = ECHO.replace(
            "http://schemas.xmlsoap.org/soap/envelope/",
            "http://www.w3.org/2003/05/soap-envelope",
        );
        let response = endpoint.handle(ServerRequest::new("text/xml", soap12));
        assert_eq!(response.status, 500);
        assert!(String::from_utf8_lossy(&response.body).contains("VersionMismatch"));
    }

    #[test]
    fn test_shutdown_refuses_requests() {
        let endpoint = endpoint();
        endpoint.shutdown();
        endpoint.shutdown();
        let response = endpoint.handle(ServerRequest::new("text/xml", ECHO));
        assert_eq!(response.status, 503);
    }
}
