//! Résolution différée du transport

use tracing::debug;

use crate::error::PipelineError;
use crate::message::{Message, property};
use crate::pipeline::{
    AssemblyContext, Chain, Pipeline, Stage, StageCloner, StageFactory, require_terminal,
    stage_factory,
};

struct Bound {
    address: String,
    pipeline: Pipeline,
}

/// Étape terminale qui choisit son transport d'après l'adresse du message
///
/// Le transport de la dernière adresse est gardé en cache (un seul
/// emplacement). Une adresse différente libère le transport en cache puis
/// en construit un nouveau.
pub struct TransportResolverStage {
    context: AssemblyContext,
    bound: Option<Bound>,
}

impl TransportResolverStage {
    pub fn new(context: AssemblyContext) -> Self {
        Self {
            context,
            bound: None,
        }
    }

    pub fn factory() -> impl StageFactory {
        stage_factory(|context: &AssemblyContext, next| {
            require_terminal("transport-resolver", next)?;
            Ok(Box::new(TransportResolverStage::new(context.clone())) as Box<dyn Stage>)
        })
    }

    /// Adresse du transport en cache
    pub fn bound_address(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.address.as_str())
    }

    fn bind(&mut self, address: &str) -> Result<&mut Pipeline, PipelineError> {
        let hit = self
            .bound
            .as_ref()
            .is_some_and(|bound| bound.address == address);
        if !hit {
            if let Some(mut stale) = self.bound.take() {
                debug!(old = %stale.address, new = %address, "transport cache miss");
                stale.pipeline.pre_destroy();
            }
            let stage = self.context.transports.resolve(address, &self.context)?;
            self.bound = Some(Bound {
                address: address.to_string(),
                pipeline: Pipeline::single(stage),
            });
        }
        match self.bound.as_mut() {
            Some(bound) => Ok(&mut bound.pipeline),
            None => Err(PipelineError::NoTransport(address.to_string())),
        }
    }
}

impl Stage for TransportResolverStage {
    fn name(&self) -> &str {
        "transport-resolver"
    }

    fn process(
        &mut self,
        message: Message,
        _chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        let address = message
            .property(property::ENDPOINT_ADDRESS)
            .ok_or(PipelineError::MissingAddress)?
            .to_string();
        self.bind(&address)?.process(message)
    }

    /// La copie ne reprend le transport que s'il est déjà résolu
    fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        let bound = match &self.bound {
            Some(bound) => Some(Bound {
                address: bound.address.clone(),
                pipeline: bound.pipeline.copy()?,
            }),
            None => None,
        };
        Ok(Box::new(TransportResolverStage {
            context: self.context.clone(),
            bound,
        }))
    }

    fn pre_destroy(&mut self) {
        if let Some(mut bound) = self.bound.take() {
            bound.pipeline.pre_destroy();
        }
    }
}
