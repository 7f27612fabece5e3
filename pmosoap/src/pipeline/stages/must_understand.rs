//! Traitement des en-têtes `mustUnderstand`

use tracing::warn;

use super::Side;
use super::addressing::addressing_headers;
use crate::endpoint::OBJECT_ID;
use crate::error::PipelineError;
use crate::message::{Message, RUNTIME_NAMESPACE, SoapFault};
use crate::pipeline::{
    AssemblyContext, Chain, Stage, StageCloner, StageFactory, StageId, require_next,
    stage_factory,
};
use crate::version::SoapVersion;
use crate::xml::QName;

/// Rejette les messages portant des en-têtes obligatoires non compris
///
/// Côté serveur, la requête fautive reçoit un fault `MustUnderstand` sans
/// atteindre l'invocation. Côté client, une réponse fautive fait échouer
/// l'appel.
pub struct MustUnderstandStage {
    next: StageId,
    side: Side,
    known: Vec<QName>,
    roles: Vec<String>,
    fallback_version: SoapVersion,
}

impl MustUnderstandStage {
    /// # Arguments
    ///
    /// * `known` - En-têtes traités par une étape du pipeline
    /// * `roles` - Rôles joués en plus des rôles implicites
    pub fn new(
        next: StageId,
        side: Side,
        known: Vec<QName>,
        roles: Vec<String>,
        fallback_version: SoapVersion,
    ) -> Self {
        Self {
            next,
            side,
            known,
            roles,
            fallback_version,
        }
    }

    pub fn factory(side: Side) -> impl StageFactory {
        stage_factory(move |context: &AssemblyContext, next| {
            let next = require_next("must-understand", next)?;
            let mut known = vec![QName::new(RUNTIME_NAMESPACE, OBJECT_ID)];
            if context.binding.addressing || context.settings.addressing {
                known.extend(addressing_headers());
            }
            Ok(Box::new(MustUnderstandStage::new(
                next,
                side,
                known,
                Vec::new(),
                context.binding.version.unwrap_or(context.settings.version),
            )) as Box<dyn Stage>)
        })
    }

    fn check(&self, message: &Message) -> Vec<QName> {
        let version = message.version().unwrap_or(self.fallback_version);
        let mut roles: Vec<&str> = version.implicit_roles().to_vec();
        roles.extend(self.roles.iter().map(String::as_str));
        message.headers().not_understood(&roles, &self.known)
    }
}

impl Stage for MustUnderstandStage {
    fn name(&self) -> &str {
        "must-understand"
    }

    fn process(
        &mut self,
        message: Message,
        chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        match self.side {
            Side::Server => {
                let missing = self.check(&message);
                if !missing.is_empty() {
                    warn!(headers = ?missing, "rejecting request with headers not understood");
                    let version = message.version().unwrap_or(self.fallback_version);
                    return Ok(Message::fault(version, &SoapFault::must_understand(missing)));
                }
                chain.invoke(self.next, message)
            }
            Side::Client => {
                let response = chain.invoke(self.next, message)?;
                let missing = self.check(&response);
                if missing.is_empty() {
                    Ok(response)
                } else {
                    warn!(headers = ?missing, "response carries headers not understood");
                    Err(SoapFault::must_understand(missing).into())
                }
            }
        }
    }

    fn copy(&self, cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        let next = cloner.copy_stage(self.next)?;
        Ok(Box::new(MustUnderstandStage::new(
            next,
            self.side,
            self.known.clone(),
            self.roles.clone(),
            self.fallback_version,
        )))
    }

    fn successors(&self) -> Vec<StageId> {
        vec![self.next]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FaultCode, Header};
    use crate::pipeline::Pipeline;
    use crate::version::ROLE_NONE;

    struct Echo;

    impl Stage for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn process(
            &mut self,
            message: Message,
            _chain: &mut Chain<'_>,
        ) -> Result<Message, PipelineError> {
            Ok(message)
        }

        fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
            Ok(Box::new(Echo))
        }
    }

    fn pipeline(side: Side) -> Pipeline {
        let slots: Vec<Option<Box<dyn Stage>>> = vec![
            Some(Box::new(Echo)),
            Some(Box::new(MustUnderstandStage::new(
                StageId(0),
                side,
                vec![QName::new("urn:known", "Session")],
                Vec::new(),
                SoapVersion::Soap11,
            ))),
        ];
        Pipeline::from_parts(slots, StageId(1))
    }

    fn with_header(name: QName, role: Option<&str>) -> Message {
        let mut header = Header::new(SoapVersion::Soap11, name).with_must_understand(true);
        if let Some(role) = role {
            header = header.with_role(role);
        }
        let mut message = Message::empty().with_version(SoapVersion::Soap11);
        message.headers_mut().add(header);
        message
    }

    #[test]
    fn test_server_faults_on_unknown_header() {
        let request = with_header(QName::new("urn:x", "Foo"), None);
        let mut response = pipeline(Side::Server).process(request).unwrap();
        assert!(response.is_fault());
        let fault = response.read_as_fault().unwrap();
        assert_eq!(fault.code, FaultCode::MustUnderstand);
    }

    #[test]
    fn test_known_or_untargeted_headers_pass() {
        let known = with_header(QName::new("urn:known", "Session"), None);
        assert!(!pipeline(Side::Server).process(known).unwrap().is_fault());

        let other_role = with_header(QName::new("urn:x", "Foo"), Some("urn:some:intermediary"));
        assert!(!pipeline(Side::Server).process(other_role).unwrap().is_fault());

        let none = with_header(QName::new("urn:x", "Foo"), Some(ROLE_NONE));
        assert!(!pipeline(Side::Server).process(none).unwrap().is_fault());
    }

    #[test]
    fn test_client_fails_call() {
        let response = with_header(QName::new("urn:x", "Foo"), None);
        let err = pipeline(Side::Client).process(response).unwrap_err();
        assert!(matches!(err, PipelineError::Fault(_)));
    }
}
