//! Pièces jointes binaires d'un message

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use xmltree::Element;

use crate::error::MessageError;
use crate::xml::parse_element;

type Loader = Box<dyn FnMut() -> io::Result<Bytes> + Send>;

/// Contenu chargé à la demande
///
/// Le chargeur n'est abandonné qu'après un chargement réussi : un échec
/// laisse la pièce jointe dans son état initial et l'accès suivant réessaie.
struct Deferred {
    cell: OnceCell<Bytes>,
    loader: Mutex<Option<Loader>>,
}

impl Deferred {
    fn get(&self) -> io::Result<Bytes> {
        self.cell
            .get_or_try_init(|| {
                let mut slot = self.loader.lock();
                let loader = slot.as_mut().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "attachment content is no longer available",
                    )
                })?;
                let bytes = loader()?;
                *slot = None;
                Ok(bytes)
            })
            .cloned()
    }
}

#[derive(Clone)]
enum Content {
    Eager(Bytes),
    Deferred(Arc<Deferred>),
}

/// Une pièce jointe : identifiant, type MIME et octets
///
/// Les copies d'une pièce jointe différée partagent le même chargement :
/// le contenu n'est récupéré qu'une seule fois, quelle que soit la copie
/// qui le demande la première.
#[derive(Clone)]
pub struct Attachment {
    content_id: String,
    content_type: String,
    content: Content,
}

/// Normalise un identifiant de contenu
///
/// Retire les chevrons et le schéma `cid:`, puis décode les séquences `%XX`.
pub fn normalize_content_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);
    let trimmed = match trimmed.get(..4) {
        Some(scheme) if scheme.eq_ignore_ascii_case("cid:") => &trimmed[4..],
        _ => trimmed,
    };
    percent_decode_str(trimmed).decode_utf8_lossy().into_owned()
}

impl Attachment {
    pub fn new(content_id: &str, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_id: normalize_content_id(content_id),
            content_type: content_type.into(),
            content: Content::Eager(data.into()),
        }
    }

    /// Pièce jointe dont les octets sont produits par `loader` au premier accès
    ///
    /// `loader` est rappelé tant qu'il échoue, puis n'est plus jamais appelé.
    pub fn deferred<F>(content_id: &str, content_type: impl Into<String>, loader: F) -> Self
    where
        F: FnMut() -> io::Result<Bytes> + Send + 'static,
    {
        Self {
            content_id: normalize_content_id(content_id),
            content_type: content_type.into(),
            content: Content::Deferred(Arc::new(Deferred {
                cell: OnceCell::new(),
                loader: Mutex::new(Some(Box::new(loader))),
            })),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn is_loaded(&self) -> bool {
        match &self.content {
            Content::Eager(_) => true,
            Content::Deferred(deferred) => deferred.cell.get().is_some(),
        }
    }

    pub fn as_bytes(&self) -> io::Result<Bytes> {
        match &self.content {
            Content::Eager(bytes) => Ok(bytes.clone()),
            Content::Deferred(deferred) => deferred.get(),
        }
    }

    pub fn as_reader(&self) -> io::Result<io::Cursor<Bytes>> {
        Ok(io::Cursor::new(self.as_bytes()?))
    }

    /// Interprète le contenu comme un document XML
    pub fn as_source(&self) -> Result<Element, MessageError> {
        let bytes = self.as_bytes()?;
        Ok(parse_element(&bytes)?)
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("content_id", &self.content_id)
            .field("content_type", &self.content_type)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Ensemble des pièces jointes d'un message, dans l'ordre d'insertion
#[derive(Debug, Clone, Default)]
pub struct AttachmentSet {
    items: Vec<Attachment>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une pièce jointe ; l'identifiant doit être unique
    pub fn add(&mut self, attachment: Attachment) -> Result<(), MessageError> {
        if self.contains(attachment.content_id()) {
            return Err(MessageError::DuplicateContentId(
                attachment.content_id().to_string(),
            ));
        }
        self.items.push(attachment);
        Ok(())
    }

    pub fn get(&self, content_id: &str) -> Option<&Attachment> {
        let id = normalize_content_id(content_id);
        self.items.iter().find(|a| a.content_id == id)
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.get(content_id).is_some()
    }

    pub fn remove(&mut self, content_id: &str) -> Option<Attachment> {
        let id = normalize_content_id(content_id);
        let index = self.items.iter().position(|a| a.content_id == id)?;
        Some(self.items.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_normalize_content_id() {
        assert_eq!(normalize_content_id("<part1@example.org>"), "part1@example.org");
        assert_eq!(normalize_content_id("cid:part%201@x"), "part 1@x");
        assert_eq!(normalize_content_id("CID:a"), "a");
    }

    #[test]
    fn test_duplicate_content_id_rejected() {
        let mut set = AttachmentSet::new();
        set.add(Attachment::new("<a@x>", "text/plain", "one")).unwrap();
        let err = set.add(Attachment::new("cid:a@x", "text/plain", "two"));
        assert!(matches!(err, Err(MessageError::DuplicateContentId(id)) if id == "a@x"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_deferred_loads_once_across_copies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let att = Attachment::deferred("img", "image/png", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"\x89PNG"))
        });
        let copy = att.clone();
        assert!(!att.is_loaded());

        assert_eq!(&copy.as_bytes().unwrap()[..], b"\x89PNG");
        let mut read = Vec::new();
        att.as_reader().unwrap().read_to_end(&mut read).unwrap();
        assert_eq!(read, b"\x89PNG");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let att = Attachment::deferred("doc", "text/plain", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(io::Error::new(io::ErrorKind::TimedOut, "connection reset"))
            } else {
                Ok(Bytes::from_static(b"body"))
            }
        });

        assert!(att.as_bytes().is_err());
        assert!(!att.is_loaded());
        assert_eq!(&att.as_bytes().unwrap()[..], b"body");
        assert_eq!(&att.clone().as_bytes().unwrap()[..], b"body");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_as_source() {
        let att = Attachment::new("doc", "text/xml", "<a><b>1</b></a>");
        assert_eq!(att.as_source().unwrap().name, "a");
    }
}
