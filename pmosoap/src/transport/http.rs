//! Transport HTTP client bloquant

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use ureq::Agent;

use super::{Transport, TransportFactory, TransportResponse, TransportStage, scheme_of};
use crate::codec::{ContentType, codec_for};
use crate::error::{PipelineError, TransportError};
use crate::pipeline::{AssemblyContext, Stage};

/// POST de la requête encodée vers une URL HTTP(S)
pub struct HttpTransport {
    address: String,
    agent: Agent,
}

impl HttpTransport {
    pub fn new(address: impl Into<String>, timeout: Option<Duration>) -> Self {
        // Les statuts 4xx/5xx ne sont pas des erreurs : un fault SOAP arrive
        // avec un statut 500 et doit être lu.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();
        Self {
            address: address.into(),
            agent: config.into(),
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &mut self,
        content_type: &ContentType,
        body: &[u8],
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .agent
            .post(&self.address)
            .header("Content-Type", &content_type.content_type);
        if let Some(action) = &content_type.soap_action {
            request = request.header("SOAPAction", &format!("\"{}\"", action));
        }
        if let Some(accept) = &content_type.accept {
            request = request.header("Accept", accept);
        }

        let mut response = request
            .send(body)
            .map_err(|e| TransportError::Failure(format!("POST {}: {}", self.address, e)))?;

        let status = response.status().as_u16();
        let response_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let payload = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Failure(format!("reading response body: {}", e)))?;
        debug!(address = %self.address, status, bytes = payload.len(), "HTTP exchange done");

        Ok(TransportResponse {
            status,
            content_type: response_type,
            body: Bytes::from(payload),
        })
    }

    fn copy(&self) -> Box<dyn Transport> {
        Box::new(HttpTransport {
            address: self.address.clone(),
            agent: self.agent.clone(),
        })
    }
}

/// Fabrique pour les adresses `http://` et `https://`
#[derive(Default)]
pub struct HttpTransportFactory {
    timeout: Option<Duration>,
}

impl HttpTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        address: &str,
        context: &AssemblyContext,
    ) -> Result<Option<Box<dyn Stage>>, PipelineError> {
        match scheme_of(address).as_deref() {
            Some("http") | Some("https") => {}
            _ => return Ok(None),
        }
        let codec = codec_for(&context.binding, &context.settings);
        Ok(Some(Box::new(TransportStage::new(
            address,
            codec,
            Box::new(HttpTransport::new(address, self.timeout)),
            context.binding.clone(),
        ))))
    }
}
