//! Curseur de lecture XML avec résolution des espaces de noms

use std::io::BufRead;

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use super::{NamespaceScope, QName, split_qualified};
use crate::error::XmlError;

/// Attribut lu sur une balise ouvrante
#[derive(Debug, Clone)]
pub(crate) struct TagAttribute {
    pub qualified: String,
    pub name: QName,
    pub value: String,
}

/// Balise ouvrante résolue
#[derive(Debug, Clone)]
pub(crate) struct StartTag {
    pub name: QName,
    pub prefix: Option<String>,
    pub attributes: Vec<TagAttribute>,
    pub declarations: Vec<(String, String)>,
    pub empty: bool,
}

impl StartTag {
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name.local),
            None => self.name.local.clone(),
        }
    }
}

/// Jeton produit par le curseur
#[derive(Debug, Clone)]
pub(crate) enum Token {
    Start(StartTag),
    End(QName),
    Text(String),
    Eof,
}

/// Curseur « pull » au-dessus de `quick_xml::Reader`
///
/// Un élément vide `<a/>` produit un `Start` suivi d'un `End`, de sorte que
/// l'appelant n'a qu'une seule forme à traiter. Le texte hors de l'élément
/// racine (prologue, blancs finaux) est ignoré.
pub(crate) struct XmlCursor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    scope: NamespaceScope,
    pending_end: Option<QName>,
    depth: usize,
}

impl<R: BufRead> XmlCursor<R> {
    pub fn new(source: R) -> Self {
        Self::with_bindings(source, &[])
    }

    /// Curseur dont les préfixes hérités d'ancêtres hors flux sont pré-déclarés
    pub fn with_bindings(source: R, bindings: &[(String, String)]) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::new(),
            scope: NamespaceScope::with_bindings(bindings),
            pending_end: None,
            depth: 0,
        }
    }

    /// Réutilise un tampon de travail existant
    pub fn with_buffer(mut self, mut buf: Vec<u8>) -> Self {
        buf.clear();
        self.buf = buf;
        self
    }

    /// Rend le tampon de travail pour un usage ultérieur
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    /// Position en octets après le dernier jeton lu
    pub fn position(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn next_token(&mut self) -> Result<Token, XmlError> {
        if let Some(name) = self.pending_end.take() {
            self.scope.pop();
            self.depth -= 1;
            return Ok(Token::End(name));
        }

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    let tag = open_tag(&mut self.scope, &e, false)?;
                    self.depth += 1;
                    return Ok(Token::Start(tag));
                }
                Event::Empty(e) => {
                    let tag = open_tag(&mut self.scope, &e, true)?;
                    self.depth += 1;
                    self.pending_end = Some(tag.name.clone());
                    return Ok(Token::Start(tag));
                }
                Event::End(e) => {
                    if self.depth == 0 {
                        return Err(XmlError::malformed("unexpected closing tag"));
                    }
                    let qualified = utf8(e.name().as_ref())?;
                    let name = resolve_element(&self.scope, &qualified)?.1;
                    self.scope.pop();
                    self.depth -= 1;
                    return Ok(Token::End(name));
                }
                Event::Text(e) => {
                    if self.depth == 0 {
                        continue;
                    }
                    let text = e
                        .decode()
                        .map_err(|err| XmlError::malformed(err.to_string()))?;
                    return Ok(Token::Text(text.into_owned()));
                }
                Event::CData(e) => {
                    if self.depth == 0 {
                        continue;
                    }
                    return Ok(Token::Text(String::from_utf8_lossy(&e[..]).into_owned()));
                }
                Event::GeneralRef(e) => {
                    if self.depth == 0 {
                        continue;
                    }
                    if let Some(ch) = e
                        .resolve_char_ref()
                        .map_err(|err| XmlError::malformed(err.to_string()))?
                    {
                        return Ok(Token::Text(ch.to_string()));
                    }
                    let entity = e
                        .decode()
                        .map_err(|err| XmlError::malformed(err.to_string()))?;
                    return match predefined_entity(&entity) {
                        Some(text) => Ok(Token::Text(text.to_string())),
                        None => Err(XmlError::malformed(format!(
                            "unknown entity '&{};'",
                            entity
                        ))),
                    };
                }
                Event::Eof => {
                    if self.depth != 0 {
                        return Err(XmlError::malformed("unexpected end of document"));
                    }
                    return Ok(Token::Eof);
                }
                _ => continue,
            }
        }
    }
}

fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

fn utf8(bytes: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| XmlError::malformed(err.to_string()))
}

fn resolve_element(
    scope: &NamespaceScope,
    qualified: &str,
) -> Result<(Option<String>, QName), XmlError> {
    let (prefix, local) = split_qualified(qualified);
    match prefix {
        Some(prefix) => {
            let namespace = scope
                .resolve(prefix)
                .ok_or_else(|| XmlError::UndeclaredPrefix(prefix.to_string()))?;
            Ok((Some(prefix.to_string()), QName::new(namespace, local)))
        }
        None => Ok((
            None,
            QName::new(scope.resolve("").unwrap_or_default(), local),
        )),
    }
}

fn open_tag(
    scope: &mut NamespaceScope,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<StartTag, XmlError> {
    let qualified = utf8(start.name().as_ref())?;

    let mut declarations = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XmlError::malformed(err.to_string()))?;
        let key = utf8(attr.key.as_ref())?;
        let raw = utf8(&attr.value)?;
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|err| XmlError::malformed(err.to_string()))?
            .into_owned();

        if key == "xmlns" {
            declarations.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    scope.push(declarations.clone());
    let (prefix, name) = resolve_element(scope, &qualified)?;

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let name = match split_qualified(&key) {
            (Some(p), local) => {
                let namespace = scope
                    .resolve(p)
                    .ok_or_else(|| XmlError::UndeclaredPrefix(p.to_string()))?;
                QName::new(namespace, local)
            }
            (None, local) => QName::unqualified(local),
        };
        attributes.push(TagAttribute {
            qualified: key,
            name,
            value,
        });
    }

    Ok(StartTag {
        name,
        prefix,
        attributes,
        declarations,
        empty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(xml: &str) -> Vec<Token> {
        let mut cursor = XmlCursor::new(xml.as_bytes());
        let mut out = Vec::new();
        loop {
            let token = cursor.next_token().unwrap();
            if matches!(token, Token::Eof) {
                break;
            }
            out.push(token);
        }
        out
    }

    #[test]
    fn test_resolves_prefixes_and_default() {
        let toks = tokens(r#"<a:root xmlns:a="urn:a" xmlns="urn:d"><child a:x="1"/></a:root>"#);
        match &toks[0] {
            Token::Start(tag) => {
                assert_eq!(tag.name, QName::new("urn:a", "root"));
                assert_eq!(tag.declarations.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &toks[1] {
            Token::Start(tag) => {
                assert_eq!(tag.name, QName::new("urn:d", "child"));
                assert!(tag.empty);
                assert_eq!(tag.attributes[0].name, QName::new("urn:a", "x"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&toks[2], Token::End(n) if n.local == "child"));
        assert!(matches!(&toks[3], Token::End(n) if n.local == "root"));
    }

    #[test]
    fn test_entities_are_resolved() {
        let toks = tokens("<a>x &amp; y &#65;</a>");
        let text: String = toks
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "x & y A");
    }

    #[test]
    fn test_undeclared_prefix_is_an_error() {
        let mut cursor = XmlCursor::new("<p:a/>".as_bytes());
        assert!(matches!(
            cursor.next_token(),
            Err(XmlError::UndeclaredPrefix(p)) if p == "p"
        ));
    }

    #[test]
    fn test_truncated_document() {
        let mut cursor = XmlCursor::new("<a><b>".as_bytes());
        let mut result = Ok(Token::Eof);
        for _ in 0..4 {
            result = cursor.next_token();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }
}
