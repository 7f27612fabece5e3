//! Pile des déclarations d'espaces de noms visibles

/// Espace de noms réservé du préfixe `xml`
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Pile de portées d'espaces de noms
///
/// Chaque élément ouvert empile une trame contenant ses propres déclarations.
/// Le préfixe vide désigne l'espace de noms par défaut ; une URI vide
/// associée au préfixe vide annule l'espace par défaut (`xmlns=""`).
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Vec<(String, String)>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crée une portée dont la trame de base contient des liaisons héritées
    pub fn with_bindings(bindings: &[(String, String)]) -> Self {
        Self {
            frames: vec![bindings.to_vec()],
        }
    }

    pub fn push(&mut self, declarations: Vec<(String, String)>) {
        self.frames.push(declarations);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Résout un préfixe (`""` pour l'espace par défaut)
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        for frame in self.frames.iter().rev() {
            if let Some((_, uri)) = frame.iter().rev().find(|(p, _)| p == prefix) {
                return if uri.is_empty() { None } else { Some(uri) };
            }
        }
        None
    }

    /// Liaisons visibles, la plus récente l'emportant
    pub fn bindings(&self) -> Vec<(String, String)> {
        let mut result: Vec<(String, String)> = Vec::new();
        for frame in &self.frames {
            for (prefix, uri) in frame {
                match result.iter_mut().find(|(p, _)| p == prefix) {
                    Some(existing) => existing.1 = uri.clone(),
                    None => result.push((prefix.clone(), uri.clone())),
                }
            }
        }
        result.retain(|(_, uri)| !uri.is_empty());
        result
    }
}
