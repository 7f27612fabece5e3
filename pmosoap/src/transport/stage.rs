//! Étape terminale : encodage, envoi, décodage

use std::sync::Arc;

use tracing::{debug, trace};

use super::Transport;
use crate::binding::Binding;
use crate::codec::Codec;
use crate::error::{PipelineError, TransportError};
use crate::message::{Message, property};
use crate::pipeline::{Chain, Stage, StageCloner};

/// Envoie le message par un transport et décode la réponse
///
/// Chaque copie possède son codec et son transport.
pub struct TransportStage {
    address: String,
    codec: Box<dyn Codec>,
    transport: Box<dyn Transport>,
    binding: Arc<Binding>,
    scratch: Vec<u8>,
    closed: bool,
}

impl TransportStage {
    pub fn new(
        address: impl Into<String>,
        codec: Box<dyn Codec>,
        transport: Box<dyn Transport>,
        binding: Arc<Binding>,
    ) -> Self {
        Self {
            address: address.into(),
            codec,
            transport,
            binding,
            scratch: Vec::new(),
            closed: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Stage for TransportStage {
    fn name(&self) -> &str {
        "transport"
    }

    fn process(
        &mut self,
        mut message: Message,
        _chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        let one_way = message.is_one_way(&self.binding);
        self.scratch.clear();
        let content_type = self.codec.encode(&mut message, &mut self.scratch)?;
        trace!(address = %self.address, %content_type, bytes = self.scratch.len(), "sending request");

        let response = self.transport.send(&content_type, &self.scratch)?;
        debug!(
            address = %self.address,
            status = response.status,
            bytes = response.body.len(),
            "response received"
        );

        if response.status == 202 || response.body.is_empty() {
            if response.status >= 400 {
                return Err(TransportError::Failure(format!(
                    "status {} with empty body from {}",
                    response.status, self.address
                ))
                .into());
            }
            if !one_way && response.status != 202 {
                debug!(address = %self.address, "empty response to a request-response operation");
            }
            let mut empty = Message::empty();
            empty.set_property(property::STATUS_CODE, response.status.to_string());
            return Ok(empty);
        }

        let response_type = response
            .content_type
            .clone()
            .unwrap_or_else(|| self.codec.mime_type().to_string());
        match self.codec.decode(&mut response.body.as_ref(), &response_type) {
            Ok(mut decoded) => {
                decoded.set_property(property::STATUS_CODE, response.status.to_string());
                Ok(decoded)
            }
            Err(err) if response.status >= 400 => Err(TransportError::Failure(format!(
                "status {} from {}: {}",
                response.status, self.address, err
            ))
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        Ok(Box::new(TransportStage::new(
            self.address.clone(),
            self.codec.copy(),
            self.transport.copy(),
            self.binding.clone(),
        )))
    }

    fn pre_destroy(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
            debug!(address = %self.address, "transport closed");
        }
    }
}
