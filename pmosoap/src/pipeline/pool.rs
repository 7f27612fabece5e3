//! Réserve de copies de pipeline

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::Pipeline;
use crate::error::PipelineError;

/// Réserve de pipelines inactifs, copiés depuis un modèle
///
/// Un verrou n'est pris que pour emprunter ou rendre une copie, jamais
/// pendant le traitement d'un message.
pub struct PipelinePool {
    master: Mutex<Pipeline>,
    idle: Mutex<Vec<Pipeline>>,
    capacity: usize,
    drained: AtomicBool,
}

impl PipelinePool {
    /// # Arguments
    ///
    /// * `master` - Pipeline modèle, jamais utilisé directement
    /// * `capacity` - Nombre maximal de copies inactives conservées
    pub fn new(master: Pipeline, capacity: usize) -> Self {
        Self {
            master: Mutex::new(master),
            idle: Mutex::new(Vec::new()),
            capacity,
            drained: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Emprunte une copie, réutilisée ou fraîchement copiée du modèle
    pub fn lease(&self) -> Result<PipelineLease<'_>, PipelineError> {
        if self.is_drained() {
            return Err(PipelineError::Destroyed);
        }
        let reused = self.idle.lock().pop();
        let pipeline = match reused {
            Some(pipeline) => pipeline,
            None => {
                let copy = self.master.lock().copy()?;
                debug!("pipeline pool grew by one copy");
                copy
            }
        };
        Ok(PipelineLease {
            pool: self,
            pipeline: Some(pipeline),
        })
    }

    fn give_back(&self, pipeline: Pipeline) {
        if self.is_drained() || pipeline.is_destroyed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(pipeline);
        }
    }

    /// Libère toutes les copies et le modèle ; les emprunts en cours sont
    /// libérés à leur restitution
    pub fn drain(&self) {
        if self.drained.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle = std::mem::take(&mut *self.idle.lock());
        info!(idle = idle.len(), "draining pipeline pool");
        drop(idle);
        self.master.lock().pre_destroy();
    }
}

/// Pipeline emprunté à une réserve, rendu à la destruction
pub struct PipelineLease<'a> {
    pool: &'a PipelinePool,
    pipeline: Option<Pipeline>,
}

impl Deref for PipelineLease<'_> {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        // toujours présent hors de Drop
        self.pipeline.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PipelineLease<'_> {
    fn deref_mut(&mut self) -> &mut Pipeline {
        self.pipeline.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PipelineLease<'_> {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            self.pool.give_back(pipeline);
        }
    }
}
