//! Écrivain XML conscient des espaces de noms

use std::io::Write;

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use xmltree::{Element, XMLNode};

use super::{NamespaceScope, split_qualified};
use crate::error::XmlError;

/// Attribut à écrire sur une balise ouvrante
#[derive(Debug, Clone, Copy)]
pub struct Attr<'a> {
    pub prefix: Option<&'a str>,
    pub local: &'a str,
    pub namespace: &'a str,
    pub value: &'a str,
}

impl<'a> Attr<'a> {
    /// Attribut sans espace de noms
    pub fn plain(local: &'a str, value: &'a str) -> Self {
        Self {
            prefix: None,
            local,
            namespace: "",
            value,
        }
    }

    pub fn qualified(prefix: &'a str, namespace: &'a str, local: &'a str, value: &'a str) -> Self {
        Self {
            prefix: Some(prefix),
            local,
            namespace,
            value,
        }
    }
}

/// Écrivain XML qui ne déclare un espace de noms que s'il n'est pas visible
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
    scope: NamespaceScope,
    open: Vec<String>,
}

/// Déclarations en attente sur la balise en cours de construction
struct PendingTag<'s> {
    scope: &'s NamespaceScope,
    declarations: Vec<(String, String)>,
}

impl PendingTag<'_> {
    fn resolve(&self, prefix: &str) -> Option<&str> {
        match self.declarations.iter().rev().find(|(p, _)| p == prefix) {
            Some((_, uri)) if uri.is_empty() => None,
            Some((_, uri)) => Some(uri.as_str()),
            None => self.scope.resolve(prefix),
        }
    }

    /// Garantit que `prefix` désigne `uri` sur cette balise
    fn ensure(&mut self, prefix: &str, uri: &str) {
        if prefix == "xml" || prefix == "xmlns" {
            return;
        }
        if uri.is_empty() {
            if prefix.is_empty() && self.resolve("").is_some() {
                self.declarations.push((String::new(), String::new()));
            }
            return;
        }
        if self.resolve(prefix) != Some(uri) {
            self.declarations.retain(|(p, _)| p != prefix);
            self.declarations.push((prefix.to_string(), uri.to_string()));
        }
    }

    /// Préfixe à utiliser pour un attribut qualifié sans préfixe imposé
    fn prefix_for(&mut self, uri: &str) -> String {
        let existing = self
            .scope
            .bindings()
            .into_iter()
            .chain(self.declarations.iter().cloned())
            .find(|(p, u)| !p.is_empty() && u == uri)
            .map(|(p, _)| p);
        if let Some(prefix) = existing {
            return prefix;
        }
        let mut n = 0;
        loop {
            let candidate = format!("ns{}", n);
            if self.resolve(&candidate).is_none() {
                self.ensure(&candidate, uri);
                return candidate;
            }
            n += 1;
        }
    }
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
            scope: NamespaceScope::new(),
            open: Vec::new(),
        }
    }

    pub fn write_declaration(&mut self) -> Result<(), XmlError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(())
    }

    /// Ouvre un élément
    ///
    /// # Arguments
    ///
    /// * `prefix` - Préfixe souhaité (ignoré si l'élément n'a pas d'espace de noms)
    /// * `local` - Nom local
    /// * `namespace` - URI de l'espace de noms, vide pour aucun
    /// * `attributes` - Attributs de la balise
    /// * `bindings` - Liaisons supplémentaires à rendre visibles (préfixes utilisés dans du texte)
    pub fn start_element(
        &mut self,
        prefix: Option<&str>,
        local: &str,
        namespace: &str,
        attributes: &[Attr<'_>],
        bindings: &[(String, String)],
    ) -> Result<(), XmlError> {
        let mut pending = PendingTag {
            scope: &self.scope,
            declarations: Vec::new(),
        };
        for (p, uri) in bindings {
            pending.ensure(p, uri);
        }

        let qualified = if namespace.is_empty() {
            pending.ensure("", "");
            local.to_string()
        } else {
            let p = prefix.unwrap_or("");
            pending.ensure(p, namespace);
            if p.is_empty() {
                local.to_string()
            } else {
                format!("{}:{}", p, local)
            }
        };

        let mut written = Vec::with_capacity(attributes.len());
        for attr in attributes {
            let key = if attr.namespace.is_empty() {
                attr.local.to_string()
            } else {
                let p = match attr.prefix {
                    Some(p) if !p.is_empty() => {
                        pending.ensure(p, attr.namespace);
                        p.to_string()
                    }
                    _ => pending.prefix_for(attr.namespace),
                };
                format!("{}:{}", p, attr.local)
            };
            written.push((key, attr.value.to_string()));
        }

        let declarations = pending.declarations;
        self.open_tag(qualified, declarations, written, false)
    }

    fn open_tag(
        &mut self,
        qualified: String,
        declarations: Vec<(String, String)>,
        attributes: Vec<(String, String)>,
        empty: bool,
    ) -> Result<(), XmlError> {
        let mut start = BytesStart::new(qualified.as_str());
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                start.push_attribute(("xmlns", uri.as_str()));
            } else {
                let key = format!("xmlns:{}", prefix);
                start.push_attribute((key.as_str(), uri.as_str()));
            }
        }
        for (key, value) in &attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if empty {
            self.writer.write_event(Event::Empty(start))?;
        } else {
            self.writer.write_event(Event::Start(start))?;
            self.scope.push(declarations);
            self.open.push(qualified);
        }
        Ok(())
    }

    pub fn end_element(&mut self) -> Result<(), XmlError> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| XmlError::malformed("no element to close"))?;
        self.scope.pop();
        self.writer
            .write_event(Event::End(BytesEnd::new(name.as_str())))?;
        Ok(())
    }

    pub fn text(&mut self, text: &str) -> Result<(), XmlError> {
        if !text.is_empty() {
            self.writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        Ok(())
    }

    /// Nombre d'éléments ouverts
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Écrit un arbre complet, sans récursion
    pub fn write_element(&mut self, root: &Element) -> Result<(), XmlError> {
        let base = self.open.len();
        let mut stack: Vec<std::slice::Iter<'_, XMLNode>> = Vec::new();

        if self.open_tree_element(root)? {
            stack.push(root.children.iter());
        }

        while let Some(top) = stack.last_mut() {
            match top.next() {
                Some(XMLNode::Element(child)) => {
                    if self.open_tree_element(child)? {
                        stack.push(child.children.iter());
                    }
                }
                Some(XMLNode::Text(text)) => self.text(text)?,
                Some(XMLNode::CData(text)) => self.text(text)?,
                Some(_) => {}
                None => {
                    stack.pop();
                    self.end_element()?;
                }
            }
        }
        debug_assert_eq!(self.open.len(), base);
        Ok(())
    }

    /// Ouvre un élément d'arbre ; renvoie `false` s'il a été écrit vide
    fn open_tree_element(&mut self, elem: &Element) -> Result<bool, XmlError> {
        let mut pending = PendingTag {
            scope: &self.scope,
            declarations: Vec::new(),
        };

        // Liaisons portées par l'arbre, y compris sous forme d'attributs xmlns
        if let Some(namespaces) = &elem.namespaces {
            for (prefix, uri) in namespaces.0.iter() {
                if !uri.is_empty() {
                    pending.ensure(prefix, uri);
                }
            }
        }
        let mut attributes = Vec::with_capacity(elem.attributes.len());
        for (key, value) in &elem.attributes {
            if key == "xmlns" {
                pending.ensure("", value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                pending.ensure(prefix, value);
            } else {
                attributes.push((key.clone(), value.clone()));
            }
        }

        let namespace = elem.namespace.as_deref().unwrap_or("");
        let prefix = elem.prefix.as_deref().filter(|_| !namespace.is_empty());
        pending.ensure(prefix.unwrap_or(""), namespace);

        for (key, _) in &attributes {
            if let (Some(p), _) = split_qualified(key) {
                if pending.resolve(p).is_none() {
                    return Err(XmlError::UndeclaredPrefix(p.to_string()));
                }
            }
        }

        let qualified = match prefix {
            Some(p) if !p.is_empty() => format!("{}:{}", p, elem.name),
            _ => elem.name.clone(),
        };
        let declarations = pending.declarations;
        let empty = elem.children.is_empty();
        self.open_tag(qualified, declarations, attributes, empty)?;
        Ok(!empty)
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{new_element, parse_element, push_child};

    fn written(f: impl FnOnce(&mut XmlWriter<Vec<u8>>)) -> String {
        let mut writer = XmlWriter::new(Vec::new());
        f(&mut writer);
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_namespace_declared_once() {
        let out = written(|w| {
            w.start_element(Some("S"), "Envelope", "urn:env", &[], &[])
                .unwrap();
            w.start_element(Some("S"), "Body", "urn:env", &[], &[])
                .unwrap();
            w.end_element().unwrap();
            w.end_element().unwrap();
        });
        assert_eq!(
            out,
            r#"<S:Envelope xmlns:S="urn:env"><S:Body></S:Body></S:Envelope>"#
        );
    }

    #[test]
    fn test_default_namespace_is_undeclared_for_plain_child() {
        let mut root = new_element("urn:d", None, "root");
        push_child(&mut root, xmltree::Element::new("plain"));
        let out = written(|w| w.write_element(&root).unwrap());
        assert_eq!(out, r#"<root xmlns="urn:d"><plain xmlns=""/></root>"#);
    }

    #[test]
    fn test_parsed_tree_is_rewritten_faithfully() {
        let source = r#"<m:Add xmlns:m="urn:calc"><m:a m:unit="cm">1 &amp; 2</m:a></m:Add>"#;
        let root = parse_element(source.as_bytes()).unwrap();
        let out = written(|w| w.write_element(&root).unwrap());
        assert_eq!(out, source);
    }

    #[test]
    fn test_generated_attribute_prefix() {
        let out = written(|w| {
            let attr = Attr {
                prefix: None,
                local: "x",
                namespace: "urn:attr",
                value: "1",
            };
            w.start_element(None, "a", "", &[attr], &[]).unwrap();
            w.end_element().unwrap();
        });
        assert_eq!(out, r#"<a xmlns:ns0="urn:attr" ns0:x="1"></a>"#);
    }
}
