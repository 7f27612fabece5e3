//! Étapes terminales d'invocation applicative

use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::binding::Binding;
use crate::endpoint::{RequestContext, StatefulRegistry};
use crate::error::PipelineError;
use crate::message::{Message, SoapFault, property};
use crate::pipeline::{
    AssemblyContext, Chain, Stage, StageCloner, StageFactory, require_terminal, stage_factory,
};
use crate::version::SoapVersion;

/// Gestionnaire applicatif d'un service sans état
pub trait Invoker: Send + Sync {
    /// Traite une requête ; un fault retourné devient la réponse
    fn invoke(&self, request: Message) -> Result<Message, SoapFault>;
}

impl<F> Invoker for F
where
    F: Fn(Message) -> Result<Message, SoapFault> + Send + Sync,
{
    fn invoke(&self, request: Message) -> Result<Message, SoapFault> {
        self(request)
    }
}

/// Gestionnaire applicatif appelé sur l'objet désigné par la requête
pub trait StatefulInvoker<T>: Send + Sync {
    fn invoke(
        &self,
        target: &T,
        request: Message,
        context: &RequestContext,
    ) -> Result<Message, SoapFault>;
}

impl<T, F> StatefulInvoker<T> for F
where
    F: Fn(&T, Message, &RequestContext) -> Result<Message, SoapFault> + Send + Sync,
{
    fn invoke(
        &self,
        target: &T,
        request: Message,
        context: &RequestContext,
    ) -> Result<Message, SoapFault> {
        self(target, request, context)
    }
}

/// Met en forme le résultat d'une invocation
///
/// Une opération à sens unique produit toujours un message vide ; un fault
/// devient un message de fault dans la version de la requête.
fn conclude(
    outcome: Result<Message, SoapFault>,
    one_way: bool,
    version: SoapVersion,
    enveloped: bool,
) -> Message {
    match (outcome, one_way) {
        (Ok(_), true) => Message::empty(),
        (Err(fault), true) => {
            warn!(%fault, "one-way operation failed, no fault channel");
            Message::empty()
        }
        (Ok(mut response), false) => {
            if enveloped && response.version().is_none() {
                response.set_version(version);
            }
            response
        }
        (Err(fault), false) => {
            debug!(%fault, "operation returned a fault");
            Message::fault(version, &fault)
        }
    }
}

/// Prépare la requête : opération résolue, version et sens unique
fn prepare(message: &mut Message, binding: &Binding, fallback: SoapVersion) -> (SoapVersion, bool) {
    if let Some(operation) = message.operation(binding) {
        let name = operation.name.clone();
        message.set_property(property::OPERATION, name);
    }
    (
        message.version().unwrap_or(fallback),
        message.is_one_way(binding),
    )
}

/// Invocation d'un gestionnaire sans état
pub struct InvokerStage {
    invoker: Arc<dyn Invoker>,
    binding: Arc<Binding>,
    fallback_version: SoapVersion,
}

impl InvokerStage {
    pub fn new(
        invoker: Arc<dyn Invoker>,
        binding: Arc<Binding>,
        fallback_version: SoapVersion,
    ) -> Self {
        Self {
            invoker,
            binding,
            fallback_version,
        }
    }

    pub fn factory(invoker: Arc<dyn Invoker>) -> impl StageFactory {
        stage_factory(move |context: &AssemblyContext, next| {
            require_terminal("invoker", next)?;
            Ok(Box::new(InvokerStage::new(
                invoker.clone(),
                context.binding.clone(),
                context.binding.version.unwrap_or(context.settings.version),
            )) as Box<dyn Stage>)
        })
    }
}

impl Stage for InvokerStage {
    fn name(&self) -> &str {
        "invoker"
    }

    fn process(
        &mut self,
        mut message: Message,
        _chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        let (version, one_way) = prepare(&mut message, &self.binding, self.fallback_version);
        let outcome = self.invoker.invoke(message);
        Ok(conclude(
            outcome,
            one_way,
            version,
            self.binding.version.is_some(),
        ))
    }

    fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        Ok(Box::new(InvokerStage::new(
            self.invoker.clone(),
            self.binding.clone(),
            self.fallback_version,
        )))
    }
}

/// Invocation de l'objet exporté désigné par la requête
///
/// La référence est résolue par le registre ; à défaut d'objet, l'instance
/// de repli reçoit l'appel, sinon la réponse est un fault `NoSuchObject`.
pub struct StatefulInvokerStage<T> {
    registry: Arc<StatefulRegistry<T>>,
    invoker: Arc<dyn StatefulInvoker<T>>,
    binding: Arc<Binding>,
    fallback_version: SoapVersion,
    base_address: String,
}

impl<T> StatefulInvokerStage<T>
where
    T: Eq + Hash + Send + Sync + 'static,
{
    pub fn new(
        registry: Arc<StatefulRegistry<T>>,
        invoker: Arc<dyn StatefulInvoker<T>>,
        binding: Arc<Binding>,
        fallback_version: SoapVersion,
        base_address: String,
    ) -> Self {
        Self {
            registry,
            invoker,
            binding,
            fallback_version,
            base_address,
        }
    }

    pub fn factory(
        registry: Arc<StatefulRegistry<T>>,
        invoker: Arc<dyn StatefulInvoker<T>>,
    ) -> impl StageFactory {
        stage_factory(move |context: &AssemblyContext, next| {
            require_terminal("stateful-invoker", next)?;
            Ok(Box::new(StatefulInvokerStage::new(
                registry.clone(),
                invoker.clone(),
                context.binding.clone(),
                context.binding.version.unwrap_or(context.settings.version),
                context.settings.base_address.clone(),
            )) as Box<dyn Stage>)
        })
    }
}

impl<T> Stage for StatefulInvokerStage<T>
where
    T: Eq + Hash + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "stateful-invoker"
    }

    fn process(
        &mut self,
        mut message: Message,
        _chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        let (version, one_way) = prepare(&mut message, &self.binding, self.fallback_version);
        let context = RequestContext::from_message(&message)
            .unwrap_or_else(|| RequestContext::new(self.base_address.clone()));

        let outcome = self
            .registry
            .resolve(&mut message)
            .and_then(|target| self.invoker.invoke(&target, message, &context));
        Ok(conclude(
            outcome,
            one_way,
            version,
            self.binding.version.is_some(),
        ))
    }

    fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        Ok(Box::new(StatefulInvokerStage::new(
            self.registry.clone(),
            self.invoker.clone(),
            self.binding.clone(),
            self.fallback_version,
            self.base_address.clone(),
        )))
    }
}
