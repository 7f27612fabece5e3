//! Registre des objets exportés

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::reference::{EndpointReference, OBJECT_ID};
use crate::message::{Message, RUNTIME_NAMESPACE, SoapFault, property};

/// Contexte de la requête en cours de traitement
///
/// Porte l'adresse du serveur telle que le client l'a contactée : le
/// serveur ne peut pas la deviner seul derrière un proxy ou sur un hôte à
/// plusieurs interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    address: String,
}

impl RequestContext {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Contexte tiré de la propriété posée par l'endpoint serveur
    pub fn from_message(message: &Message) -> Option<Self> {
        message.property(property::LOCAL_ADDRESS).map(Self::new)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Ressource vidée à l'arrêt d'un serveur
pub trait Drainable: Send + Sync {
    /// Libère tout ce qui est retenu ; retourne le nombre d'éléments libérés
    fn drain_all(&self) -> usize;
}

struct Entries<T> {
    by_id: HashMap<String, Arc<T>>,
    by_value: HashMap<Arc<T>, String>,
    fallback: Option<Arc<T>>,
}

/// Correspondance entre références d'endpoint et objets vivants
///
/// Les objets sont dédupliqués par égalité de valeur : exporter deux objets
/// égaux retient une seule instance, que toutes les références désignent.
/// Les objets sont retenus jusqu'à `unexport` ou `drain`.
pub struct StatefulRegistry<T> {
    service: String,
    entries: RwLock<Entries<T>>,
}

impl<T> StatefulRegistry<T>
where
    T: Eq + Hash + Send + Sync + 'static,
{
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: RwLock::new(Entries {
                by_id: HashMap::new(),
                by_value: HashMap::new(),
                fallback: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Exporte un objet et retourne une référence vers lui
    ///
    /// # Arguments
    ///
    /// * `object` - Objet à exporter ; un objet égal déjà exporté est réutilisé
    /// * `context` - Requête en cours, qui fournit l'adresse de la référence
    pub fn export(&self, object: T, context: &RequestContext) -> EndpointReference {
        self.export_shared(Arc::new(object), context)
    }

    /// Variante de [`export`](Self::export) pour un objet déjà partagé
    pub fn export_shared(&self, object: Arc<T>, context: &RequestContext) -> EndpointReference {
        let id = {
            let mut entries = self.entries.write();
            match entries.by_value.get(&object) {
                Some(id) => id.clone(),
                None => {
                    let id = Uuid::new_v4().to_string();
                    entries.by_id.insert(id.clone(), object.clone());
                    entries.by_value.insert(object, id.clone());
                    debug!(service = %self.service, %id, "object exported");
                    id
                }
            }
        };
        EndpointReference::for_object(context.address(), &id)
    }

    /// Référence d'un objet déjà exporté, sans l'exporter
    pub fn reference_for(&self, object: &T, context: &RequestContext) -> Option<EndpointReference> {
        let entries = self.entries.read();
        entries
            .by_value
            .get(object)
            .map(|id| EndpointReference::for_object(context.address(), id))
    }

    /// Retire un objet ; `None` est sans effet
    ///
    /// # Returns
    ///
    /// `true` si l'objet était exporté
    pub fn unexport(&self, object: Option<&T>) -> bool {
        let Some(object) = object else {
            return false;
        };
        let mut entries = self.entries.write();
        match entries.by_value.remove(object) {
            Some(id) => {
                entries.by_id.remove(&id);
                debug!(service = %self.service, %id, "object unexported");
                true
            }
            None => false,
        }
    }

    /// Instance recevant les appels dont la référence ne résout rien
    pub fn set_fallback_instance(&self, object: Option<T>) {
        self.entries.write().fallback = object.map(Arc::new);
    }

    pub fn fallback_instance(&self) -> Option<Arc<T>> {
        self.entries.read().fallback.clone()
    }

    pub fn lookup(&self, object_id: &str) -> Option<Arc<T>> {
        self.entries.read().by_id.get(object_id).cloned()
    }

    /// Objet visé par une requête entrante
    ///
    /// L'en-tête d'identifiant est marqué compris. À défaut d'objet
    /// exporté, l'instance de repli est retournée si elle existe.
    pub fn resolve(&self, message: &mut Message) -> Result<Arc<T>, SoapFault> {
        let object_id = message
            .headers_mut()
            .get(RUNTIME_NAMESPACE, OBJECT_ID, true)
            .map(|h| h.text_content().trim().to_string());

        let entries = self.entries.read();
        let found = object_id
            .as_deref()
            .and_then(|id| entries.by_id.get(id).cloned());
        if let Some(object) = found {
            return Ok(object);
        }
        if let Some(fallback) = &entries.fallback {
            debug!(
                service = %self.service,
                object_id = ?object_id,
                "reference not resolved, dispatching to fallback"
            );
            return Ok(fallback.clone());
        }
        Err(SoapFault::no_such_object(object_id.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire tous les objets exportés et l'instance de repli
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut entries = self.entries.write();
        entries.by_value.clear();
        entries.fallback = None;
        let released: Vec<Arc<T>> = entries.by_id.drain().map(|(_, object)| object).collect();
        info!(service = %self.service, released = released.len(), "registry drained");
        released
    }
}

impl<T> Drainable for StatefulRegistry<T>
where
    T: Eq + Hash + Send + Sync + 'static,
{
    fn drain_all(&self) -> usize {
        self.drain().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FaultCode;
    use crate::version::SoapVersion;

    #[derive(Debug, PartialEq, Eq, Hash)]
    struct Account {
        number: u32,
    }

    fn context() -> RequestContext {
        RequestContext::new("local://bank")
    }

    fn request_for(epr: &EndpointReference) -> Message {
        let mut message = Message::empty().with_version(SoapVersion::Soap11);
        epr.prepare(&mut message, SoapVersion::Soap11);
        message
    }

    #[test]
    fn test_equal_objects_share_one_instance() {
        let registry = StatefulRegistry::new("Bank");
        let first = registry.export(Account { number: 1 }, &context());
        let second = registry.export(Account { number: 1 }, &RequestContext::new("http://other"));

        assert_eq!(registry.len(), 1);
        assert_ne!(first.address(), second.address());
        let a = registry.resolve(&mut request_for(&first)).unwrap();
        let b = registry.resolve(&mut request_for(&second)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(registry.unexport(Some(&Account { number: 1 })));
        assert!(registry.resolve(&mut request_for(&first)).is_err());
        assert!(registry.resolve(&mut request_for(&second)).is_err());
    }

    #[test]
    fn test_unexport_none_is_noop() {
        let registry: StatefulRegistry<Account> = StatefulRegistry::new("Bank");
        registry.export(Account { number: 3 }, &context());
        assert!(!registry.unexport(None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fallback_and_fault() {
        let registry = StatefulRegistry::new("Bank");
        let stale = EndpointReference::for_object("local://bank", "gone");

        let fault = registry.resolve(&mut request_for(&stale)).unwrap_err();
        assert_eq!(fault.code, FaultCode::Sender);
        assert!(fault.reason.contains("gone"));

        registry.set_fallback_instance(Some(Account { number: 0 }));
        let target = registry.resolve(&mut request_for(&stale)).unwrap();
        assert_eq!(target.number, 0);
        let anonymous = registry.resolve(&mut Message::empty()).unwrap();
        assert_eq!(anonymous.number, 0);
    }

    #[test]
    fn test_resolve_marks_header_understood() {
        let registry = StatefulRegistry::new("Bank");
        let epr = registry.export(Account { number: 9 }, &context());
        let mut request = request_for(&epr);
        registry.resolve(&mut request).unwrap();
        assert!(request.headers().is_understood(RUNTIME_NAMESPACE, OBJECT_ID));
    }

    #[test]
    fn test_drain() {
        let registry = StatefulRegistry::new("Bank");
        registry.export(Account { number: 1 }, &context());
        registry.export(Account { number: 2 }, &context());
        registry.set_fallback_instance(Some(Account { number: 0 }));
        assert_eq!(registry.drain_all(), 2);
        assert!(registry.is_empty());
        assert!(registry.fallback_instance().is_none());
    }
}
