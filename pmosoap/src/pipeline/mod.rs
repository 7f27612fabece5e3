//! # Module Pipeline - chaîne d'étapes de traitement
//!
//! Un [`Pipeline`] est une arène d'étapes ([`Stage`]) adressées par un
//! [`StageId`]. Une étape traite un message en appelant ses successeurs à
//! travers un [`Chain`] ; la réponse remonte dans l'ordre inverse des appels.
//!
//! ## Concurrence
//!
//! Les étapes ne sont pas réentrantes et ne prennent aucun verrou. Une
//! seconde unité d'exécution obtient sa propre copie de la chaîne entière
//! par [`Pipeline::copy`]. La copie passe par un [`StageCloner`] qui
//! mémorise la correspondance origine → copie : une étape référencée
//! plusieurs fois (ou par un cycle) n'est copiée qu'une fois.
//!
//! ## Exemple
//!
//! ```rust
//! use pmosoap::message::Message;
//! use pmosoap::pipeline::{Chain, Pipeline, Stage, StageCloner};
//! use pmosoap::error::PipelineError;
//!
//! struct Echo;
//!
//! impl Stage for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn process(&mut self, message: Message, _chain: &mut Chain<'_>) -> Result<Message, PipelineError> {
//!         Ok(message)
//!     }
//!
//!     fn copy(&self, _cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
//!         Ok(Box::new(Echo))
//!     }
//! }
//!
//! let mut pipeline = Pipeline::single(Box::new(Echo));
//! let response = pipeline.process(Message::empty()).unwrap();
//! assert!(!response.has_payload());
//! ```

mod builder;
mod pool;
pub mod stages;

pub use builder::{
    AssemblyContext, PipelineBuilder, StageFactory, client_recipe, require_next, require_terminal,
    server_recipe, stage_factory,
};
pub use pool::{PipelineLease, PipelinePool};

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, trace};

use crate::error::PipelineError;
use crate::message::Message;

/// Position d'une étape dans l'arène d'un pipeline
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub(crate) usize);

impl StageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

/// Une étape du pipeline
pub trait Stage: Send {
    /// Nom court, pour les traces
    fn name(&self) -> &str;

    /// Traite une requête et retourne la réponse
    ///
    /// Une étape intermédiaire appelle son successeur par
    /// [`Chain::invoke`] puis post-traite la réponse.
    fn process(&mut self, message: Message, chain: &mut Chain<'_>)
    -> Result<Message, PipelineError>;

    /// Copie structurelle
    ///
    /// La configuration immuable est partagée, l'état propre à un échange
    /// est dupliqué. Les successeurs sont copiés via
    /// [`StageCloner::copy_stage`].
    fn copy(&self, cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError>;

    /// Étapes référencées par celle-ci
    fn successors(&self) -> Vec<StageId> {
        Vec::new()
    }

    /// Libère les ressources propres à cette copie
    ///
    /// Peut être appelée plusieurs fois, y compris sans qu'aucun
    /// `process` n'ait abouti.
    fn pre_destroy(&mut self) {}
}

type Slot = Option<Box<dyn Stage>>;

/// Accès aux étapes pendant un traitement
///
/// L'étape en cours d'exécution est retirée de son emplacement : l'appeler
/// à nouveau depuis la même chaîne est refusé.
pub struct Chain<'a> {
    slots: &'a mut [Slot],
}

impl Chain<'_> {
    /// Transmet un message à une étape et retourne sa réponse
    pub fn invoke(&mut self, id: StageId, message: Message) -> Result<Message, PipelineError> {
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or(PipelineError::UnknownStage(id))?;
        let mut stage = slot.take().ok_or(PipelineError::Reentrant(id))?;
        trace!(stage = stage.name(), %id, "entering stage");
        let result = stage.process(message, self);
        self.slots[id.0] = Some(stage);
        result
    }
}

/// Contexte d'une copie de pipeline
pub struct StageCloner<'a> {
    origin: &'a [Slot],
    copies: Vec<Slot>,
    mapping: HashMap<StageId, StageId>,
}

impl<'a> StageCloner<'a> {
    fn new(origin: &'a [Slot]) -> Self {
        Self {
            origin,
            copies: Vec::with_capacity(origin.len()),
            mapping: HashMap::new(),
        }
    }

    /// Identifiant, dans la copie, de l'étape d'origine `id`
    ///
    /// La première demande copie l'étape ; les suivantes retournent la même
    /// copie. L'emplacement est réservé avant la copie pour que les cycles
    /// se referment sur lui.
    pub fn copy_stage(&mut self, id: StageId) -> Result<StageId, PipelineError> {
        if let Some(copy) = self.mapping.get(&id) {
            return Ok(*copy);
        }
        let origin = self
            .origin
            .get(id.0)
            .ok_or(PipelineError::UnknownStage(id))?
            .as_ref()
            .ok_or(PipelineError::Reentrant(id))?;

        let new_id = StageId(self.copies.len());
        self.copies.push(None);
        self.mapping.insert(id, new_id);

        let copy = origin.copy(self)?;
        self.copies[new_id.0] = Some(copy);
        Ok(new_id)
    }

    /// Identifiant déjà attribué à une étape d'origine
    pub fn mapped(&self, id: StageId) -> Option<StageId> {
        self.mapping.get(&id).copied()
    }

    fn finish(self) -> Vec<Slot> {
        self.copies
    }
}

/// Une chaîne d'étapes
pub struct Pipeline {
    slots: Vec<Slot>,
    head: StageId,
    destroyed: bool,
}

impl Pipeline {
    pub(crate) fn from_parts(slots: Vec<Slot>, head: StageId) -> Self {
        Self {
            slots,
            head,
            destroyed: false,
        }
    }

    /// Pipeline réduit à une étape terminale
    pub fn single(stage: Box<dyn Stage>) -> Self {
        Self::from_parts(vec![Some(stage)], StageId(0))
    }

    pub fn head(&self) -> StageId {
        self.head
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Noms des étapes, dans l'ordre de l'arène
    pub fn stage_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .map(|s| s.name().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Fait traverser la chaîne à un message
    pub fn process(&mut self, message: Message) -> Result<Message, PipelineError> {
        if self.destroyed {
            return Err(PipelineError::Destroyed);
        }
        let mut chain = Chain {
            slots: &mut self.slots,
        };
        chain.invoke(self.head, message)
    }

    /// Copie indépendante de la chaîne, à partir de sa tête
    pub fn copy(&self) -> Result<Pipeline, PipelineError> {
        if self.destroyed {
            return Err(PipelineError::Destroyed);
        }
        let mut cloner = StageCloner::new(&self.slots);
        let head = cloner.copy_stage(self.head)?;
        let slots = cloner.finish();
        debug!(stages = slots.len(), "pipeline copied");
        Ok(Pipeline::from_parts(slots, head))
    }

    /// Libère les ressources de chaque étape, successeurs d'abord
    ///
    /// Idempotent. Les étapes non atteignables depuis la tête sont libérées
    /// ensuite, dans l'ordre inverse de leur création.
    pub fn pre_destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.slots.len());
        let mut stack = vec![(self.head, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            if let Some(Some(stage)) = self.slots.get(id.0) {
                for next in stage.successors().into_iter().rev() {
                    if !visited.contains(&next) {
                        stack.push((next, false));
                    }
                }
            }
        }
        for index in (0..self.slots.len()).rev() {
            let id = StageId(index);
            if !visited.contains(&id) {
                order.push(id);
            }
        }

        for id in order {
            if let Some(Some(stage)) = self.slots.get_mut(id.0) {
                trace!(stage = stage.name(), %id, "destroying stage");
                stage.pre_destroy();
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.pre_destroy();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("head", &self.head)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    /// Étape qui note son passage dans un journal partagé
    struct Tag {
        label: &'static str,
        next: Option<StageId>,
        journal: Arc<Mutex<Vec<String>>>,
        copies: Arc<AtomicUsize>,
    }

    impl Stage for Tag {
        fn name(&self) -> &str {
            self.label
        }

        fn process(
            &mut self,
            mut message: Message,
            chain: &mut Chain<'_>,
        ) -> Result<Message, PipelineError> {
            self.journal.lock().push(format!(">{}", self.label));
            if let Some(next) = self.next {
                message = chain.invoke(next, message)?;
            }
            self.journal.lock().push(format!("<{}", self.label));
            Ok(message)
        }

        fn copy(&self, cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            let next = match self.next {
                Some(next) => Some(cloner.copy_stage(next)?),
                None => None,
            };
            Ok(Box::new(Tag {
                label: self.label,
                next,
                journal: self.journal.clone(),
                copies: self.copies.clone(),
            }))
        }

        fn successors(&self) -> Vec<StageId> {
            self.next.into_iter().collect()
        }

        fn pre_destroy(&mut self) {
            self.journal.lock().push(format!("x{}", self.label));
        }
    }

    fn tag(
        label: &'static str,
        next: Option<usize>,
        journal: &Arc<Mutex<Vec<String>>>,
        copies: &Arc<AtomicUsize>,
    ) -> Slot {
        Some(Box::new(Tag {
            label,
            next: next.map(StageId),
            journal: journal.clone(),
            copies: copies.clone(),
        }))
    }

    #[test]
    fn test_nested_processing_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        let slots = vec![
            tag("c", None, &journal, &copies),
            tag("b", Some(0), &journal, &copies),
            tag("a", Some(1), &journal, &copies),
        ];
        let mut pipeline = Pipeline::from_parts(slots, StageId(2));
        pipeline.process(Message::empty()).unwrap();
        assert_eq!(*journal.lock(), vec![">a", ">b", ">c", "<c", "<b", "<a"]);
    }

    #[test]
    fn test_reentrant_invocation_is_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        // a -> b -> a
        let slots = vec![
            tag("a", Some(1), &journal, &copies),
            tag("b", Some(0), &journal, &copies),
        ];
        let mut pipeline = Pipeline::from_parts(slots, StageId(0));
        let err = pipeline.process(Message::empty()).unwrap_err();
        assert!(matches!(err, PipelineError::Reentrant(StageId(0))));
        // la chaîne reste utilisable après l'erreur
        assert!(matches!(
            pipeline.process(Message::empty()),
            Err(PipelineError::Reentrant(_))
        ));
    }

    #[test]
    fn test_copy_visits_each_stage_once_with_cycle() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        let slots = vec![
            tag("a", Some(1), &journal, &copies),
            tag("b", Some(2), &journal, &copies),
            tag("c", Some(0), &journal, &copies),
        ];
        let pipeline = Pipeline::from_parts(slots, StageId(0));
        let copy = pipeline.copy().unwrap();
        assert_eq!(copies.load(Ordering::SeqCst), 3);
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.stage_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_copy_drops_unreachable_stages() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        let slots = vec![
            tag("orphan", None, &journal, &copies),
            tag("tail", None, &journal, &copies),
            tag("head", Some(1), &journal, &copies),
        ];
        let pipeline = Pipeline::from_parts(slots, StageId(2));
        let copy = pipeline.copy().unwrap();
        assert_eq!(copy.stage_names(), vec!["head", "tail"]);
        assert_eq!(copy.head(), StageId(0));
    }

    #[test]
    fn test_pre_destroy_is_post_order_and_idempotent() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        let slots = vec![
            tag("c", None, &journal, &copies),
            tag("b", Some(0), &journal, &copies),
            tag("a", Some(1), &journal, &copies),
        ];
        let mut pipeline = Pipeline::from_parts(slots, StageId(2));
        pipeline.pre_destroy();
        pipeline.pre_destroy();
        drop(pipeline);
        assert_eq!(*journal.lock(), vec!["xc", "xb", "xa"]);
    }

    #[test]
    fn test_destroyed_pipeline_refuses_work() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let copies = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::from_parts(vec![tag("a", None, &journal, &copies)], StageId(0));
        pipeline.pre_destroy();
        assert!(matches!(
            pipeline.process(Message::empty()),
            Err(PipelineError::Destroyed)
        ));
        assert!(matches!(pipeline.copy(), Err(PipelineError::Destroyed)));
    }
}
