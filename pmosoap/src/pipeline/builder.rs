//! Assemblage d'un pipeline à partir d'une recette

use std::sync::Arc;

use tracing::{debug, warn};

use super::stages::{AddressingStage, LoggingStage, MustUnderstandStage, Side};
use super::{Pipeline, Stage, StageId};
use crate::binding::Binding;
use crate::error::PipelineError;
use crate::settings::RuntimeSettings;
use crate::transport::{TransportRegistry, TransportResolverStage};

/// Tout ce dont une fabrique d'étape peut avoir besoin
#[derive(Clone)]
pub struct AssemblyContext {
    pub binding: Arc<Binding>,
    pub settings: Arc<RuntimeSettings>,
    pub transports: Arc<TransportRegistry>,
}

impl AssemblyContext {
    pub fn new(binding: Binding, settings: RuntimeSettings, transports: TransportRegistry) -> Self {
        Self {
            binding: Arc::new(binding),
            settings: Arc::new(settings),
            transports: Arc::new(transports),
        }
    }
}

/// Fabrique d'une étape
///
/// `next` désigne l'étape suivante déjà construite, ou `None` pour la
/// dernière étape de la recette.
pub trait StageFactory: Send + Sync {
    fn create(
        &self,
        context: &AssemblyContext,
        next: Option<StageId>,
    ) -> Result<Box<dyn Stage>, PipelineError>;
}

impl<F> StageFactory for F
where
    F: Fn(&AssemblyContext, Option<StageId>) -> Result<Box<dyn Stage>, PipelineError>
        + Send
        + Sync,
{
    fn create(
        &self,
        context: &AssemblyContext,
        next: Option<StageId>,
    ) -> Result<Box<dyn Stage>, PipelineError> {
        self(context, next)
    }
}

/// Fixe la signature d'une fermeture utilisée comme fabrique
pub fn stage_factory<F>(factory: F) -> F
where
    F: Fn(&AssemblyContext, Option<StageId>) -> Result<Box<dyn Stage>, PipelineError>
        + Send
        + Sync,
{
    factory
}

/// Successeur obligatoire d'une étape intermédiaire
pub fn require_next(stage: &str, next: Option<StageId>) -> Result<StageId, PipelineError> {
    next.ok_or_else(|| {
        PipelineError::configuration(format!("stage '{}' needs a successor", stage))
    })
}

/// Vérifie qu'une étape terminale est en fin de recette
pub fn require_terminal(stage: &str, next: Option<StageId>) -> Result<(), PipelineError> {
    match next {
        None => Ok(()),
        Some(_) => Err(PipelineError::configuration(format!(
            "terminal stage '{}' must be the last of the recipe",
            stage
        ))),
    }
}

/// Recette ordonnée de fabriques d'étapes
///
/// La construction se fait de la queue vers la tête, chaque étape
/// recevant l'identifiant de la suivante.
#[derive(Default)]
pub struct PipelineBuilder {
    factories: Vec<Box<dyn StageFactory>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une étape en fin de recette
    pub fn then(mut self, factory: impl StageFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Construit le pipeline
    ///
    /// # Returns
    ///
    /// Le pipeline, ou la première erreur de configuration rencontrée. En
    /// cas d'erreur, les étapes déjà construites sont libérées.
    pub fn build(&self, context: &AssemblyContext) -> Result<Pipeline, PipelineError> {
        if self.factories.is_empty() {
            return Err(PipelineError::configuration("empty pipeline recipe"));
        }

        let mut slots: Vec<Option<Box<dyn Stage>>> = Vec::with_capacity(self.factories.len());
        let mut next: Option<StageId> = None;
        for factory in self.factories.iter().rev() {
            match factory.create(context, next) {
                Ok(stage) => {
                    let id = StageId(slots.len());
                    slots.push(Some(stage));
                    next = Some(id);
                }
                Err(err) => {
                    warn!(error = %err, built = slots.len(), "pipeline assembly failed");
                    let head = StageId(slots.len().saturating_sub(1));
                    // libère la partie déjà construite
                    drop(Pipeline::from_parts(slots, head));
                    return Err(err);
                }
            }
        }

        let head = next.ok_or_else(|| PipelineError::configuration("empty pipeline recipe"))?;
        let pipeline = Pipeline::from_parts(slots, head);
        debug!(
            service = %context.binding.service,
            stages = ?pipeline.stage_names(),
            "pipeline assembled"
        );
        Ok(pipeline)
    }
}

/// Recette cliente : journal, mustUnderstand, adressage, transport
pub fn client_recipe() -> PipelineBuilder {
    PipelineBuilder::new()
        .then(LoggingStage::factory())
        .then(MustUnderstandStage::factory(Side::Client))
        .then(AddressingStage::factory(Side::Client))
        .then(TransportResolverStage::factory())
}

/// Recette serveur : journal, mustUnderstand, adressage, puis l'étape
/// terminale d'invocation fournie
pub fn server_recipe(invoker: impl StageFactory + 'static) -> PipelineBuilder {
    PipelineBuilder::new()
        .then(LoggingStage::factory())
        .then(MustUnderstandStage::factory(Side::Server))
        .then(AddressingStage::factory(Side::Server))
        .then(invoker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::pipeline::{Chain, StageCloner};
    use crate::version::SoapVersion;

    struct Terminal;

    impl Stage for Terminal {
        fn name(&self) -> &str {
            "terminal"
        }

        fn process(
            &mut self,
            message: Message,
            _chain: &mut Chain<'_>,
        ) -> Result<Message, PipelineError> {
            Ok(message)
        }

        fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
            Ok(Box::new(Terminal))
        }
    }

    fn terminal() -> impl StageFactory {
        stage_factory(|_context, next| {
            require_terminal("terminal", next)?;
            Ok(Box::new(Terminal) as Box<dyn Stage>)
        })
    }

    fn context() -> AssemblyContext {
        AssemblyContext::new(
            Binding::new("Test", Some(SoapVersion::Soap11)),
            RuntimeSettings::default(),
            TransportRegistry::new(),
        )
    }

    #[test]
    fn test_empty_recipe_fails() {
        let err = PipelineBuilder::new().build(&context()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_intermediate_stage_needs_successor() {
        let recipe = PipelineBuilder::new().then(LoggingStage::factory());
        let err = recipe.build(&context()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_terminal_stage_must_be_last() {
        let recipe = PipelineBuilder::new().then(terminal()).then(terminal());
        assert!(recipe.build(&context()).is_err());
    }

    #[test]
    fn test_server_recipe_builds_tail_first() {
        let pipeline = server_recipe(terminal()).build(&context()).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["terminal", "addressing", "must-understand", "logging"]
        );
        assert_eq!(pipeline.head(), StageId(3));
    }
}
