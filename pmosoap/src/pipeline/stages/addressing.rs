//! Étape WS-Addressing

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use xmltree::XMLNode;

use super::Side;
use crate::binding::Binding;
use crate::error::PipelineError;
use crate::message::{Header, Message, WSA_NAMESPACE, WSA_PREFIX, property};
use crate::pipeline::{
    AssemblyContext, Chain, Stage, StageCloner, StageFactory, StageId, require_next,
    stage_factory,
};
use crate::version::SoapVersion;
use crate::xml::{QName, new_element};

/// Adresse anonyme : la réponse revient sur la connexion de la requête
pub const WSA_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

/// Action des réponses en fault
pub const WSA_FAULT_ACTION: &str = "http://www.w3.org/2005/08/addressing/fault";

const WSA_HEADERS: [&str; 7] = [
    "To",
    "Action",
    "MessageID",
    "RelatesTo",
    "ReplyTo",
    "FaultTo",
    "From",
];

/// Noms des en-têtes WS-Addressing traités par cette étape
pub fn addressing_headers() -> Vec<QName> {
    WSA_HEADERS
        .iter()
        .map(|local| QName::new(WSA_NAMESPACE, *local))
        .collect()
}

fn wsa_header(version: SoapVersion, local: &str, text: &str) -> Header {
    Header::new(version, QName::new(WSA_NAMESPACE, local)).with_text(text)
}

fn reply_to(version: SoapVersion, address: &str) -> Header {
    let mut element = new_element(WSA_NAMESPACE, Some(WSA_PREFIX), "Address");
    element.children.push(XMLNode::Text(address.to_string()));
    Header::new(version, QName::new(WSA_NAMESPACE, "ReplyTo")).with_child(element)
}

/// Ajoute (client) ou relit et renvoie (serveur) les en-têtes WS-Addressing
///
/// Sans effet quand l'adressage n'est activé ni par la liaison ni par la
/// configuration.
pub struct AddressingStage {
    next: StageId,
    side: Side,
    enabled: bool,
    binding: Arc<Binding>,
    fallback_version: SoapVersion,
}

impl AddressingStage {
    pub fn new(
        next: StageId,
        side: Side,
        enabled: bool,
        binding: Arc<Binding>,
        fallback_version: SoapVersion,
    ) -> Self {
        Self {
            next,
            side,
            enabled,
            binding,
            fallback_version,
        }
    }

    pub fn factory(side: Side) -> impl StageFactory {
        stage_factory(move |context: &AssemblyContext, next| {
            let next = require_next("addressing", next)?;
            Ok(Box::new(AddressingStage::new(
                next,
                side,
                context.binding.addressing || context.settings.addressing,
                context.binding.clone(),
                context.binding.version.unwrap_or(context.settings.version),
            )) as Box<dyn Stage>)
        })
    }

    fn version_of(&self, message: &Message) -> SoapVersion {
        message.version().unwrap_or(self.fallback_version)
    }

    fn request_action(&self, message: &Message) -> Option<String> {
        let from_binding = message.operation(&self.binding).and_then(|op| {
            op.action
                .clone()
                .or_else(|| op.soap_action.clone().filter(|a| !a.is_empty()))
        });
        from_binding.or_else(|| {
            message
                .property(property::SOAP_ACTION)
                .map(|a| a.trim_matches('"').to_string())
                .filter(|a| !a.is_empty())
        })
    }

    fn mark_all(message: &mut Message) {
        for local in WSA_HEADERS {
            message.headers_mut().mark_understood(WSA_NAMESPACE, local);
        }
    }

    fn process_client(
        &mut self,
        mut message: Message,
        chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        let version = self.version_of(&message);
        let to = message
            .property(property::ENDPOINT_ADDRESS)
            .map(str::to_string);
        let action = self.request_action(&message);
        let message_id = message
            .headers()
            .message_id()
            .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4()));

        let headers = message.headers_mut();
        if let Some(to) = &to {
            headers.replace(wsa_header(version, "To", to));
        }
        if let Some(action) = &action {
            headers.replace(wsa_header(version, "Action", action));
        }
        headers.replace(wsa_header(version, "MessageID", &message_id));
        if headers.find(WSA_NAMESPACE, "ReplyTo").is_none() {
            headers.add(reply_to(version, WSA_ANONYMOUS));
        }
        debug!(%message_id, action = ?action, "addressing headers added");

        let mut response = chain.invoke(self.next, message)?;
        if let Some(relates_to) = response.headers().relates_to() {
            if relates_to != message_id {
                warn!(%relates_to, expected = %message_id, "response relates to another message");
            }
        }
        Self::mark_all(&mut response);
        Ok(response)
    }

    fn process_server(
        &mut self,
        mut message: Message,
        chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        Self::mark_all(&mut message);
        let message_id = message.headers().message_id();
        let request_action = message.headers().action();
        let output_action = message
            .operation(&self.binding)
            .and_then(|op| op.output_action.clone());

        let mut response = chain.invoke(self.next, message)?;
        if !response.has_payload() && !response.has_headers() {
            return Ok(response);
        }

        let version = self.version_of(&response);
        let action = if response.is_fault() {
            Some(WSA_FAULT_ACTION.to_string())
        } else {
            output_action.or_else(|| request_action.map(|a| format!("{}Response", a)))
        };
        let headers = response.headers_mut();
        if let Some(action) = action {
            headers.replace(wsa_header(version, "Action", &action));
        }
        if let Some(id) = message_id {
            headers.replace(wsa_header(version, "RelatesTo", &id));
        }
        headers.replace(wsa_header(
            version,
            "MessageID",
            &format!("urn:uuid:{}", Uuid::new_v4()),
        ));
        Ok(response)
    }
}

impl Stage for AddressingStage {
    fn name(&self) -> &str {
        "addressing"
    }

    fn process(
        &mut self,
        message: Message,
        chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        if !self.enabled {
            return chain.invoke(self.next, message);
        }
        match self.side {
            Side::Client => self.process_client(message, chain),
            Side::Server => self.process_server(message, chain),
        }
    }

    fn copy(&self, cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        let next = cloner.copy_stage(self.next)?;
        Ok(Box::new(AddressingStage::new(
            next,
            self.side,
            self.enabled,
            self.binding.clone(),
            self.fallback_version,
        )))
    }

    fn successors(&self) -> Vec<StageId> {
        vec![self.next]
    }
}
