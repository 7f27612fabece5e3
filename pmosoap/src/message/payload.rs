//! Représentations du contenu d'un message et lecteur d'événements

use std::io::{self, Write};
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use xmltree::Element;

use crate::error::XmlError;
use crate::xml::{
    Attr, PayloadEvent, QName, StartTag, Token, XmlCursor, XmlWriter, events_of, split_qualified,
};

/// Forme sous laquelle le contenu d'un message est détenu
///
/// Toutes les variantes reposent sur des données immuables et partagées :
/// la consommation est un état du message, pas une destruction des octets,
/// ce qui permet à `Message::copy` de toujours produire un contenu neuf.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Empty,
    /// Arbre construit par l'application
    Tree(Arc<Element>),
    /// Portion d'une enveloppe décodée, analysée à la demande
    Stream {
        buffer: Bytes,
        span: Range<usize>,
        inherited: Arc<Vec<(String, String)>>,
    },
    /// Document XML brut fourni par l'application
    Source(Bytes),
}

impl Payload {
    /// Curseur sur les octets d'une forme textuelle
    pub(crate) fn cursor(&self) -> Option<XmlCursor<io::Cursor<Bytes>>> {
        match self {
            Payload::Stream {
                buffer,
                span,
                inherited,
            } => Some(XmlCursor::with_bindings(
                io::Cursor::new(buffer.slice(span.clone())),
                inherited,
            )),
            Payload::Source(bytes) => Some(XmlCursor::new(io::Cursor::new(bytes.clone()))),
            _ => None,
        }
    }
}

fn event_from_tag(tag: StartTag) -> PayloadEvent {
    PayloadEvent::Start {
        name: tag.name,
        attributes: tag
            .attributes
            .into_iter()
            .map(|a| (a.name, a.value))
            .collect(),
    }
}

enum ReaderKind {
    Empty,
    Events(std::vec::IntoIter<PayloadEvent>),
    Cursor(XmlCursor<io::Cursor<Bytes>>),
}

/// Lecteur « pull » du contenu d'un message
///
/// Produit les événements du contenu, noms résolus. Une erreur de syntaxe
/// termine la lecture.
pub struct PayloadReader {
    kind: ReaderKind,
}

impl PayloadReader {
    pub(crate) fn new(payload: &Payload) -> Self {
        let kind = match payload {
            Payload::Empty => ReaderKind::Empty,
            Payload::Tree(root) => ReaderKind::Events(events_of(root).into_iter()),
            other => match other.cursor() {
                Some(cursor) => ReaderKind::Cursor(cursor),
                None => ReaderKind::Empty,
            },
        };
        Self { kind }
    }
}

impl Iterator for PayloadReader {
    type Item = Result<PayloadEvent, XmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.kind {
            ReaderKind::Empty => None,
            ReaderKind::Events(events) => events.next().map(Ok),
            ReaderKind::Cursor(cursor) => {
                let token = cursor.next_token();
                let event = match token {
                    Ok(Token::Start(tag)) => Ok(event_from_tag(tag)),
                    Ok(Token::End(name)) => Ok(PayloadEvent::End(name)),
                    Ok(Token::Text(text)) => Ok(PayloadEvent::Text(text)),
                    Ok(Token::Eof) => {
                        self.kind = ReaderKind::Empty;
                        return None;
                    }
                    Err(err) => {
                        self.kind = ReaderKind::Empty;
                        Err(err)
                    }
                };
                Some(event)
            }
        }
    }
}

/// Recopie les jetons d'un curseur dans un écrivain
///
/// Les liaisons héritées sont rendues visibles sur chaque élément de premier
/// niveau, de sorte que le résultat reste autonome hors de son enveloppe
/// d'origine.
pub(crate) fn copy_tokens<R: io::BufRead, W: Write>(
    cursor: &mut XmlCursor<R>,
    inherited: &[(String, String)],
    writer: &mut XmlWriter<W>,
) -> Result<(), XmlError> {
    loop {
        match cursor.next_token()? {
            Token::Start(tag) => {
                let mut bindings = if cursor.depth() == 1 {
                    inherited.to_vec()
                } else {
                    Vec::new()
                };
                bindings.extend(tag.declarations.iter().cloned());

                let prefixes: Vec<Option<&str>> = tag
                    .attributes
                    .iter()
                    .map(|a| split_qualified(&a.qualified).0)
                    .collect();
                let attributes: Vec<Attr<'_>> = tag
                    .attributes
                    .iter()
                    .zip(&prefixes)
                    .map(|(a, prefix)| Attr {
                        prefix: *prefix,
                        local: &a.name.local,
                        namespace: &a.name.namespace,
                        value: &a.value,
                    })
                    .collect();
                writer.start_element(
                    tag.prefix.as_deref(),
                    &tag.name.local,
                    &tag.name.namespace,
                    &attributes,
                    &bindings,
                )?;
            }
            Token::End(_) => writer.end_element()?,
            Token::Text(text) => writer.text(&text)?,
            Token::Eof => return Ok(()),
        }
    }
}

/// Nom du premier élément d'un flux, sans le consommer au-delà
pub(crate) fn first_element_name(payload: &Payload) -> Result<Option<QName>, XmlError> {
    let Some(mut cursor) = payload.cursor() else {
        return Ok(None);
    };
    loop {
        match cursor.next_token()? {
            Token::Start(tag) => return Ok(Some(tag.name)),
            Token::Eof => return Ok(None),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_reader_uses_inherited_bindings() {
        let doc = Bytes::from_static(br#"<m:Echo><m:v>1</m:v></m:Echo>"#);
        let payload = Payload::Stream {
            span: 0..doc.len(),
            buffer: doc,
            inherited: Arc::new(vec![("m".into(), "urn:echo".into())]),
        };
        let events: Vec<PayloadEvent> = PayloadReader::new(&payload)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], PayloadEvent::Start { name, .. } if name.is("urn:echo", "Echo")));
        assert_eq!(
            first_element_name(&payload).unwrap(),
            Some(QName::new("urn:echo", "Echo"))
        );
    }

    #[test]
    fn test_copy_tokens_is_self_contained() {
        let doc = Bytes::from_static(br#"<m:Echo a="1"><m:v>x</m:v></m:Echo>"#);
        let inherited = vec![("m".to_string(), "urn:echo".to_string())];
        let mut cursor = XmlCursor::with_bindings(io::Cursor::new(doc), &inherited);
        let mut writer = XmlWriter::new(Vec::new());
        copy_tokens(&mut cursor, &inherited, &mut writer).unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            out,
            r#"<m:Echo xmlns:m="urn:echo" a="1"><m:v>x</m:v></m:Echo>"#
        );
    }

    #[test]
    fn test_reader_stops_after_error() {
        let payload = Payload::Source(Bytes::from_static(b"<a><b></a>"));
        let results: Vec<_> = PayloadReader::new(&payload).collect();
        assert!(results.last().unwrap().is_err());
    }
}
