//! Construction d'arbres `xmltree::Element` sans récursion
//!
//! Les arbres produits ici portent leur nom résolu (`namespace`, `prefix`)
//! et, dans `namespaces`, l'ensemble des liaisons visibles au point de
//! l'élément. Les attributs sont indexés par leur nom qualifié tel qu'écrit.

use std::io::BufRead;

use xmltree::{Element, Namespace, XMLNode};

use super::cursor::{StartTag, Token, XmlCursor};
use super::{QName, split_qualified};
use crate::error::XmlError;

fn element_from(tag: StartTag, bindings: Vec<(String, String)>) -> Element {
    let mut elem = Element::new(&tag.name.local);
    elem.prefix = tag.prefix;
    if !tag.name.namespace.is_empty() {
        elem.namespace = Some(tag.name.namespace);
    }
    if !bindings.is_empty() {
        let mut namespaces = Namespace::empty();
        for (prefix, uri) in bindings {
            namespaces.force_put(prefix, uri);
        }
        elem.namespaces = Some(namespaces);
    }
    for attr in tag.attributes {
        elem.attributes.insert(attr.qualified, attr.value);
    }
    elem
}

fn push_text(elem: &mut Element, text: String) {
    if let Some(XMLNode::Text(previous)) = elem.children.last_mut() {
        previous.push_str(&text);
    } else {
        elem.children.push(XMLNode::Text(text));
    }
}

/// Lit l'élément dont la balise ouvrante vient d'être consommée
///
/// Le curseur est laissé juste après la balise fermante correspondante.
pub(crate) fn read_element<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    start: StartTag,
) -> Result<Element, XmlError> {
    let base = cursor.depth() - 1;
    let mut stack = vec![element_from(start, cursor.scope().bindings())];

    loop {
        match cursor.next_token()? {
            Token::Start(tag) => {
                let bindings = cursor.scope().bindings();
                stack.push(element_from(tag, bindings));
            }
            Token::End(_) => {
                let done = match stack.pop() {
                    Some(elem) => elem,
                    None => return Err(XmlError::malformed("unbalanced element stack")),
                };
                if cursor.depth() == base {
                    return Ok(done);
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XMLNode::Element(done)),
                    None => return Err(XmlError::malformed("unbalanced element stack")),
                }
            }
            Token::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    push_text(current, text);
                }
            }
            Token::Eof => return Err(XmlError::malformed("unexpected end of document")),
        }
    }
}

/// Analyse un document XML complet en arbre
///
/// # Arguments
///
/// * `bytes` - Le document, prologue éventuel compris
///
/// # Returns
///
/// L'élément racine
pub fn parse_element(bytes: &[u8]) -> Result<Element, XmlError> {
    let mut cursor = XmlCursor::new(bytes);
    let root = loop {
        match cursor.next_token()? {
            Token::Start(tag) => break read_element(&mut cursor, tag)?,
            Token::Eof => return Err(XmlError::malformed("document has no root element")),
            _ => continue,
        }
    };
    match cursor.next_token()? {
        Token::Eof => Ok(root),
        _ => Err(XmlError::malformed("content after the root element")),
    }
}

/// Nom résolu d'un élément
pub fn element_name(elem: &Element) -> QName {
    QName::new(elem.namespace.clone().unwrap_or_default(), elem.name.clone())
}

/// Crée un élément qualifié et déclare son préfixe
pub fn new_element(namespace: &str, prefix: Option<&str>, local: &str) -> Element {
    let mut elem = Element::new(local);
    if !namespace.is_empty() {
        elem.namespace = Some(namespace.to_string());
        elem.prefix = prefix.map(str::to_string);
        bind_prefix(&mut elem, prefix.unwrap_or(""), namespace);
    }
    elem
}

/// Ajoute une liaison préfixe → URI visible depuis cet élément
pub fn bind_prefix(elem: &mut Element, prefix: &str, uri: &str) {
    elem.namespaces
        .get_or_insert_with(Namespace::empty)
        .force_put(prefix, uri);
}

/// Valeur d'un attribut désigné par son nom résolu
pub fn attribute<'a>(elem: &'a Element, namespace: &str, local: &str) -> Option<&'a str> {
    elem.attributes.iter().find_map(|(key, value)| {
        let (prefix, name) = split_qualified(key);
        if name != local || prefix == Some("xmlns") || key == "xmlns" {
            return None;
        }
        let attr_ns = match prefix {
            Some(p) => elem
                .namespaces
                .as_ref()
                .and_then(|ns| ns.get(p))
                .unwrap_or_default(),
            None => "",
        };
        (attr_ns == namespace).then_some(value.as_str())
    })
}

/// Pose un attribut, en liant son préfixe si l'attribut est qualifié
pub fn set_attribute(
    elem: &mut Element,
    namespace: &str,
    prefix: &str,
    local: &str,
    value: impl Into<String>,
) {
    let key = if namespace.is_empty() {
        local.to_string()
    } else {
        bind_prefix(elem, prefix, namespace);
        format!("{}:{}", prefix, local)
    };
    elem.attributes.insert(key, value.into());
}

/// Premier enfant élément portant ce nom résolu
pub fn child<'a>(elem: &'a Element, namespace: &str, local: &str) -> Option<&'a Element> {
    child_elements(elem)
        .find(|c| c.name == local && c.namespace.as_deref().unwrap_or("") == namespace)
}

/// Enfants de type élément, dans l'ordre
pub fn child_elements(elem: &Element) -> impl Iterator<Item = &Element> {
    elem.children.iter().filter_map(XMLNode::as_element)
}

/// Résout un texte de la forme `prefixe:local` dans la portée de l'élément
pub fn resolve_qname(elem: &Element, text: &str) -> Option<QName> {
    let (prefix, local) = split_qualified(text.trim());
    let namespace = elem
        .namespaces
        .as_ref()
        .and_then(|ns| ns.get(prefix.unwrap_or("")));
    match (prefix, namespace) {
        (Some(_), None) => None,
        (_, namespace) => Some(QName::new(namespace.unwrap_or_default(), local)),
    }
}

/// Ajoute un enfant élément
pub fn push_child(parent: &mut Element, child: Element) {
    parent.children.push(XMLNode::Element(child));
}

/// Copie profonde d'un arbre, sans récursion
///
/// Le `Clone` dérivé de `Element` descend récursivement dans les enfants et
/// déborde la pile sur les arbres très profonds.
pub fn deep_clone(elem: &Element) -> Element {
    fn shell(elem: &Element) -> Element {
        Element {
            prefix: elem.prefix.clone(),
            namespace: elem.namespace.clone(),
            namespaces: elem.namespaces.clone(),
            name: elem.name.clone(),
            attributes: elem.attributes.clone(),
            children: Vec::with_capacity(elem.children.len()),
        }
    }

    let mut stack: Vec<(Element, std::slice::Iter<'_, XMLNode>)> =
        vec![(shell(elem), elem.children.iter())];
    let mut root = None;
    while let Some((current, children)) = stack.last_mut() {
        match children.next() {
            Some(XMLNode::Element(child)) => stack.push((shell(child), child.children.iter())),
            Some(other) => current.children.push(other.clone()),
            None => {
                if let Some((done, _)) = stack.pop() {
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(XMLNode::Element(done)),
                        None => root = Some(done),
                    }
                }
            }
        }
    }
    root.unwrap_or_else(|| shell(elem))
}

/// Concatène le texte de tous les descendants, dans l'ordre du document
pub fn text_content(elem: &Element) -> String {
    let mut out = String::new();
    let mut stack: Vec<std::slice::Iter<'_, XMLNode>> = vec![elem.children.iter()];
    while let Some(top) = stack.last_mut() {
        match top.next() {
            Some(XMLNode::Text(text)) | Some(XMLNode::CData(text)) => out.push_str(text),
            Some(XMLNode::Element(child)) => stack.push(child.children.iter()),
            Some(_) => {}
            None => {
                stack.pop();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{events_of, same_infoset};

    #[test]
    fn test_parse_keeps_resolved_names() {
        let root = parse_element(
            br#"<?xml version="1.0"?><m:Add xmlns:m="urn:calc"><a>1</a><b m:unit="x">2</b></m:Add>"#,
        )
        .unwrap();
        assert_eq!(element_name(&root), QName::new("urn:calc", "Add"));
        assert_eq!(root.prefix.as_deref(), Some("m"));

        let b = root.get_child("b").unwrap();
        assert_eq!(attribute(b, "urn:calc", "unit"), Some("x"));
        assert_eq!(attribute(b, "", "unit"), None);
        assert_eq!(text_content(&root), "12");
    }

    #[test]
    fn test_deep_nesting_does_not_recurse() {
        let depth = 2500;
        let mut xml = String::new();
        for _ in 0..depth {
            xml.push_str("<n>");
        }
        xml.push_str("leaf");
        for _ in 0..depth {
            xml.push_str("</n>");
        }
        let root = parse_element(xml.as_bytes()).unwrap();
        assert_eq!(text_content(&root), "leaf");

        let copy = deep_clone(&root);
        assert_eq!(text_content(&copy), "leaf");
        assert!(same_infoset(&events_of(&root), &events_of(&copy)));
    }

    #[test]
    fn test_deep_clone_keeps_everything() {
        let root = parse_element(
            br#"<m:Add xmlns:m="urn:calc" m:id="7"><a>1<![CDATA[<raw>]]></a><!--c--><b><c/>2</b></m:Add>"#,
        )
        .unwrap();
        assert_eq!(deep_clone(&root), root);
    }

    #[test]
    fn test_trailing_content_is_rejected() {
        assert!(parse_element(b"<a/><b/>").is_err());
    }

    #[test]
    fn test_resolve_qname_text() {
        let root = parse_element(br#"<c xmlns:S="urn:env">S:Sender</c>"#).unwrap();
        let text = text_content(&root);
        assert_eq!(resolve_qname(&root, &text), Some(QName::new("urn:env", "Sender")));
        assert_eq!(resolve_qname(&root, "x:Sender"), None);
    }

    #[test]
    fn test_set_attribute_binds_prefix() {
        let mut elem = new_element("urn:x", Some("x"), "Foo");
        set_attribute(&mut elem, "urn:env", "S", "mustUnderstand", "1");
        assert_eq!(attribute(&elem, "urn:env", "mustUnderstand"), Some("1"));
    }
}
