//! Vue canonique d'un contenu XML, indépendante des préfixes

use xmltree::{Element, XMLNode};

use super::{QName, element_name, split_qualified};

/// Événement d'un contenu XML, noms résolus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEvent {
    Start {
        name: QName,
        attributes: Vec<(QName, String)>,
    },
    Text(String),
    End(QName),
}

fn resolved_attributes(elem: &Element) -> Vec<(QName, String)> {
    elem.attributes
        .iter()
        .filter(|(key, _)| key.as_str() != "xmlns" && !key.starts_with("xmlns:"))
        .map(|(key, value)| {
            let name = match split_qualified(key) {
                (Some(prefix), local) => {
                    let namespace = elem
                        .namespaces
                        .as_ref()
                        .and_then(|ns| ns.get(prefix))
                        .unwrap_or(prefix);
                    QName::new(namespace, local)
                }
                (None, local) => QName::unqualified(local),
            };
            (name, value.clone())
        })
        .collect()
}

/// Aplatit un arbre en événements
pub fn events_of(root: &Element) -> Vec<PayloadEvent> {
    let mut events = vec![PayloadEvent::Start {
        name: element_name(root),
        attributes: resolved_attributes(root),
    }];
    let mut stack: Vec<(&Element, std::slice::Iter<'_, XMLNode>)> =
        vec![(root, root.children.iter())];

    while let Some((elem, children)) = stack.last_mut() {
        match children.next() {
            Some(XMLNode::Element(child)) => {
                events.push(PayloadEvent::Start {
                    name: element_name(child),
                    attributes: resolved_attributes(child),
                });
                stack.push((child, child.children.iter()));
            }
            Some(XMLNode::Text(text)) | Some(XMLNode::CData(text)) => {
                events.push(PayloadEvent::Text(text.clone()));
            }
            Some(_) => {}
            None => {
                events.push(PayloadEvent::End(element_name(elem)));
                stack.pop();
            }
        }
    }
    events
}

/// Forme canonique : attributs triés, textes adjacents fusionnés,
/// textes uniquement blancs supprimés
pub fn canonical(events: impl IntoIterator<Item = PayloadEvent>) -> Vec<PayloadEvent> {
    let mut out: Vec<PayloadEvent> = Vec::new();
    for event in events {
        match event {
            PayloadEvent::Start {
                name,
                mut attributes,
            } => {
                attributes.sort();
                out.push(PayloadEvent::Start { name, attributes });
            }
            PayloadEvent::Text(text) => {
                if let Some(PayloadEvent::Text(previous)) = out.last_mut() {
                    previous.push_str(&text);
                } else {
                    out.push(PayloadEvent::Text(text));
                }
            }
            end => out.push(end),
        }
    }
    out.retain(|event| !matches!(event, PayloadEvent::Text(t) if t.trim().is_empty()));
    out
}

/// Compare deux contenus sur leur forme canonique
pub fn same_infoset(a: &[PayloadEvent], b: &[PayloadEvent]) -> bool {
    canonical(a.iter().cloned()) == canonical(b.iter().cloned())
}
