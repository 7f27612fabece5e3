//! En-têtes SOAP et liste d'en-têtes d'un message

use once_cell::sync::OnceCell;
use xmltree::{Element, XMLNode};

use crate::version::{ENVELOPE_PREFIX, ROLE_NONE, SoapVersion};
use crate::xml::{
    QName, attribute, child, element_name, new_element, set_attribute, split_qualified,
    text_content,
};

/// Espace de noms WS-Addressing 1.0
pub const WSA_NAMESPACE: &str = "http://www.w3.org/2005/08/addressing";

/// Préfixe conventionnel de WS-Addressing
pub const WSA_PREFIX: &str = "wsa";

#[derive(Debug, Clone)]
struct HeaderFlags {
    must_understand: bool,
    role: String,
    relay: bool,
}

/// Un bloc d'en-tête SOAP
///
/// Les indicateurs dérivés (`mustUnderstand`, rôle, `relay`) sont calculés à
/// la première consultation puis mis en cache ; toute modification de
/// l'élément invalide le cache.
#[derive(Debug, Clone)]
pub struct Header {
    element: Element,
    name: QName,
    version: SoapVersion,
    flags: OnceCell<HeaderFlags>,
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1") | Some("true"))
}

fn remove_attribute(elem: &mut Element, namespace: &str, local: &str) {
    let namespaces = elem.namespaces.clone();
    elem.attributes.retain(|key, _| {
        let (prefix, name) = split_qualified(key);
        if name != local {
            return true;
        }
        let attr_ns = match prefix {
            Some(p) => namespaces.as_ref().and_then(|ns| ns.get(p)).unwrap_or_default(),
            None => "",
        };
        attr_ns != namespace
    });
}

impl Header {
    /// Crée un en-tête vide
    pub fn new(version: SoapVersion, name: QName) -> Self {
        let prefix = if name.namespace == WSA_NAMESPACE {
            Some(WSA_PREFIX)
        } else if name.namespace.is_empty() {
            None
        } else {
            Some("h")
        };
        let element = new_element(&name.namespace, prefix, &name.local);
        Self {
            element,
            name,
            version,
            flags: OnceCell::new(),
        }
    }

    /// Enveloppe un élément existant
    pub fn from_element(version: SoapVersion, element: Element) -> Self {
        Self {
            name: element_name(&element),
            element,
            version,
            flags: OnceCell::new(),
        }
    }

    fn touch(&mut self) {
        self.flags = OnceCell::new();
    }

    pub fn with_must_understand(mut self, value: bool) -> Self {
        let ns = self.version.namespace();
        remove_attribute(&mut self.element, ns, "mustUnderstand");
        if value {
            let literal = match self.version {
                SoapVersion::Soap11 => "1",
                SoapVersion::Soap12 => "true",
            };
            set_attribute(&mut self.element, ns, ENVELOPE_PREFIX, "mustUnderstand", literal);
        }
        self.touch();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        let ns = self.version.namespace();
        let local = self.version.role_attribute();
        remove_attribute(&mut self.element, ns, local);
        set_attribute(&mut self.element, ns, ENVELOPE_PREFIX, local, role);
        self.touch();
        self
    }

    /// Sans effet en SOAP 1.1, qui ne connaît pas `relay`
    pub fn with_relay(mut self, value: bool) -> Self {
        if self.version == SoapVersion::Soap12 {
            let ns = self.version.namespace();
            remove_attribute(&mut self.element, ns, "relay");
            if value {
                set_attribute(&mut self.element, ns, ENVELOPE_PREFIX, "relay", "true");
            }
            self.touch();
        }
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.element.children.retain(|n| !matches!(n, XMLNode::Text(_)));
        self.element.children.push(XMLNode::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.element.children.push(XMLNode::Element(child));
        self
    }

    fn flags(&self) -> &HeaderFlags {
        self.flags.get_or_init(|| {
            let ns = self.version.namespace();
            let must_understand = is_true(attribute(&self.element, ns, "mustUnderstand"));
            let raw_role = attribute(&self.element, ns, self.version.role_attribute());
            let relay = self.version == SoapVersion::Soap12
                && is_true(attribute(&self.element, ns, "relay"));
            HeaderFlags {
                must_understand,
                role: self.version.normalize_role(raw_role),
                relay,
            }
        })
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn namespace_uri(&self) -> &str {
        &self.name.namespace
    }

    pub fn local_part(&self) -> &str {
        &self.name.local
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn is_must_understood(&self) -> bool {
        self.flags().must_understand
    }

    /// Rôle normalisé en URI SOAP 1.2
    pub fn role(&self) -> &str {
        &self.flags().role
    }

    pub fn is_relay(&self) -> bool {
        self.flags().relay
    }

    pub fn text_content(&self) -> String {
        text_content(&self.element)
    }

    pub fn attribute(&self, namespace: &str, local: &str) -> Option<&str> {
        attribute(&self.element, namespace, local)
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }
}

/// Liste ordonnée des en-têtes d'un message
///
/// Chaque en-tête porte un marqueur « compris », positionné par les étages
/// qui le traitent, et consulté lors du contrôle `mustUnderstand`.
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    headers: Vec<Header>,
    understood: Vec<bool>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn add(&mut self, header: Header) {
        self.headers.push(header);
        self.understood.push(false);
    }

    /// Remplace les en-têtes de même nom, ou ajoute
    pub fn replace(&mut self, header: Header) {
        let name = header.name().clone();
        self.remove(&name.namespace, &name.local);
        self.add(header);
    }

    /// Premier en-tête portant ce nom, marqué compris si demandé
    pub fn get(&mut self, namespace: &str, local: &str, mark_understood: bool) -> Option<&Header> {
        let index = self.position(namespace, local)?;
        if mark_understood {
            self.understood[index] = true;
        }
        self.headers.get(index)
    }

    /// Consultation sans effet de bord
    pub fn find(&self, namespace: &str, local: &str) -> Option<&Header> {
        self.position(namespace, local).map(|i| &self.headers[i])
    }

    fn position(&self, namespace: &str, local: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.name().is(namespace, local))
    }

    pub fn remove(&mut self, namespace: &str, local: &str) -> Option<Header> {
        let mut removed = None;
        let mut index = 0;
        while index < self.headers.len() {
            if self.headers[index].name().is(namespace, local) {
                self.understood.remove(index);
                let header = self.headers.remove(index);
                removed.get_or_insert(header);
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn mark_understood(&mut self, namespace: &str, local: &str) {
        for (header, understood) in self.headers.iter().zip(self.understood.iter_mut()) {
            if header.name().is(namespace, local) {
                *understood = true;
            }
        }
    }

    pub fn is_understood(&self, namespace: &str, local: &str) -> bool {
        self.headers
            .iter()
            .zip(&self.understood)
            .any(|(h, understood)| *understood && h.name().is(namespace, local))
    }

    /// En-têtes obligatoires, destinés à l'un des rôles joués, que personne
    /// n'a compris
    ///
    /// # Arguments
    ///
    /// * `roles` - Rôles joués par ce nœud (URI normalisés)
    /// * `known` - En-têtes que le nœud sait traiter sans les avoir marqués
    pub fn not_understood(&self, roles: &[&str], known: &[QName]) -> Vec<QName> {
        self.headers
            .iter()
            .zip(&self.understood)
            .filter(|(h, understood)| {
                !**understood
                    && h.is_must_understood()
                    && h.role() != ROLE_NONE
                    && roles.contains(&h.role())
                    && !known.contains(h.name())
            })
            .map(|(h, _)| h.name().clone())
            .collect()
    }

    fn wsa_text(&self, local: &str) -> Option<String> {
        self.find(WSA_NAMESPACE, local)
            .map(|h| h.text_content().trim().to_string())
    }

    /// `wsa:To`
    pub fn to(&self) -> Option<String> {
        self.wsa_text("To")
    }

    /// `wsa:Action`
    pub fn action(&self) -> Option<String> {
        self.wsa_text("Action")
    }

    /// `wsa:MessageID`
    pub fn message_id(&self) -> Option<String> {
        self.wsa_text("MessageID")
    }

    /// `wsa:RelatesTo`
    pub fn relates_to(&self) -> Option<String> {
        self.wsa_text("RelatesTo")
    }

    /// Adresse de `wsa:ReplyTo`
    pub fn reply_to(&self) -> Option<String> {
        let header = self.find(WSA_NAMESPACE, "ReplyTo")?;
        child(header.element(), WSA_NAMESPACE, "Address")
            .map(|a| text_content(a).trim().to_string())
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{ROLE_NEXT, ROLE_ULTIMATE_RECEIVER, SOAP11_ACTOR_NEXT};
    use crate::xml::parse_element;

    #[test]
    fn test_soap11_must_understand_default_role() {
        let header = Header::new(SoapVersion::Soap11, QName::new("urn:x", "Foo"))
            .with_must_understand(true);
        assert!(header.is_must_understood());
        assert_eq!(header.role(), ROLE_ULTIMATE_RECEIVER);
        assert!(!header.is_relay());
    }

    #[test]
    fn test_flags_cache_is_invalidated() {
        let header = Header::new(SoapVersion::Soap12, QName::new("urn:x", "Foo"));
        assert!(!header.is_must_understood());
        let header = header.with_must_understand(true).with_relay(true);
        assert!(header.is_must_understood());
        assert!(header.is_relay());
        let header = header.with_must_understand(false);
        assert!(!header.is_must_understood());
    }

    #[test]
    fn test_relay_ignored_in_soap11() {
        let elem = parse_element(
            br#"<h:Foo xmlns:h="urn:x" xmlns:S="http://schemas.xmlsoap.org/soap/envelope/" S:relay="true" S:actor="http://schemas.xmlsoap.org/soap/actor/next"/>"#,
        )
        .unwrap();
        let header = Header::from_element(SoapVersion::Soap11, elem);
        assert!(!header.is_relay());
        assert_eq!(header.role(), ROLE_NEXT);
        assert_ne!(header.role(), SOAP11_ACTOR_NEXT);
    }

    #[test]
    fn test_not_understood_respects_roles_and_marks() {
        let mut list = HeaderList::new();
        list.add(
            Header::new(SoapVersion::Soap12, QName::new("urn:x", "A")).with_must_understand(true),
        );
        list.add(
            Header::new(SoapVersion::Soap12, QName::new("urn:x", "B"))
                .with_must_understand(true)
                .with_role(ROLE_NONE),
        );
        list.add(
            Header::new(SoapVersion::Soap12, QName::new("urn:x", "C"))
                .with_must_understand(true)
                .with_role("urn:other-node"),
        );
        list.add(Header::new(SoapVersion::Soap12, QName::new("urn:x", "D")));

        let roles = SoapVersion::Soap12.implicit_roles();
        assert_eq!(
            list.not_understood(&roles, &[]),
            vec![QName::new("urn:x", "A")]
        );

        assert!(list.get("urn:x", "A", true).is_some());
        assert!(list.not_understood(&roles, &[]).is_empty());
    }

    #[test]
    fn test_addressing_accessors() {
        let mut list = HeaderList::new();
        let v = SoapVersion::Soap12;
        list.add(Header::new(v, QName::new(WSA_NAMESPACE, "To")).with_text("local://bank"));
        list.add(Header::new(v, QName::new(WSA_NAMESPACE, "MessageID")).with_text("urn:uuid:1"));
        let mut address = new_element(WSA_NAMESPACE, Some(WSA_PREFIX), "Address");
        address.children.push(XMLNode::Text("local://client".into()));
        list.add(Header::new(v, QName::new(WSA_NAMESPACE, "ReplyTo")).with_child(address));

        assert_eq!(list.to().as_deref(), Some("local://bank"));
        assert_eq!(list.message_id().as_deref(), Some("urn:uuid:1"));
        assert_eq!(list.reply_to().as_deref(), Some("local://client"));
        assert_eq!(list.action(), None);

        assert!(list.remove(WSA_NAMESPACE, "To").is_some());
        assert_eq!(list.to(), None);
        assert_eq!(list.len(), 2);
    }
}
