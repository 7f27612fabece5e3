//! SOAP Faults, en SOAP 1.1 comme en SOAP 1.2

use std::fmt;

use xmltree::{Element, XMLNode};

use crate::error::MessageError;
use crate::version::{ENVELOPE_PREFIX, SoapVersion};
use crate::xml::{
    QName, XML_NAMESPACE, bind_prefix, child, child_elements, element_name, new_element,
    push_child, resolve_qname, set_attribute, text_content,
};

/// Espace de noms des codes propres au runtime
pub const RUNTIME_NAMESPACE: &str = "urn:pmosoap:stateful";

/// Code de fault normalisé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    VersionMismatch,
    MustUnderstand,
    DataEncodingUnknown,
    /// `Client` en SOAP 1.1
    Sender,
    /// `Server` en SOAP 1.1
    Receiver,
}

impl FaultCode {
    /// Nom local du code dans la version donnée
    pub fn local_name(self, version: SoapVersion) -> &'static str {
        match (self, version) {
            (FaultCode::VersionMismatch, _) => "VersionMismatch",
            (FaultCode::MustUnderstand, _) => "MustUnderstand",
            (FaultCode::DataEncodingUnknown, SoapVersion::Soap12) => "DataEncodingUnknown",
            (FaultCode::DataEncodingUnknown, SoapVersion::Soap11) => "Client",
            (FaultCode::Sender, SoapVersion::Soap11) => "Client",
            (FaultCode::Sender, SoapVersion::Soap12) => "Sender",
            (FaultCode::Receiver, SoapVersion::Soap11) => "Server",
            (FaultCode::Receiver, SoapVersion::Soap12) => "Receiver",
        }
    }

    /// Retrouve un code à partir de son nom local (1.1 ou 1.2)
    pub fn from_local_name(local: &str) -> Option<Self> {
        // Les codes 1.1 peuvent être raffinés par un suffixe pointé (Client.Auth)
        let base = local.split('.').next().unwrap_or(local);
        match base {
            "VersionMismatch" => Some(FaultCode::VersionMismatch),
            "MustUnderstand" => Some(FaultCode::MustUnderstand),
            "DataEncodingUnknown" => Some(FaultCode::DataEncodingUnknown),
            "Client" | "Sender" => Some(FaultCode::Sender),
            "Server" | "Receiver" => Some(FaultCode::Receiver),
            _ => None,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name(SoapVersion::Soap12))
    }
}

/// Erreur SOAP (Fault)
///
/// Un fault est à la fois une erreur Rust, remontée par les étages du
/// pipeline, et un contenu de message sérialisable dans l'une ou l'autre
/// version du protocole.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("SOAP fault ({code}): {reason}")]
pub struct SoapFault {
    /// Code normalisé
    pub code: FaultCode,

    /// Sous-code applicatif (SOAP 1.2 uniquement)
    pub subcode: Option<QName>,

    /// Message lisible
    pub reason: String,

    /// Nœud à l'origine du fault
    pub role: Option<String>,

    /// Entrées de détail
    pub detail: Vec<Element>,

    /// En-têtes obligatoires non compris
    pub not_understood: Vec<QName>,
}

impl SoapFault {
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            subcode: None,
            reason: reason.into(),
            role: None,
            detail: Vec::new(),
            not_understood: Vec::new(),
        }
    }

    /// Fault imputable à l'émetteur de la requête
    pub fn sender(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Sender, reason)
    }

    /// Fault imputable au récepteur
    pub fn receiver(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Receiver, reason)
    }

    pub fn version_mismatch(found: &str) -> Self {
        Self::new(
            FaultCode::VersionMismatch,
            format!("Unsupported envelope namespace '{}'", found),
        )
    }

    /// Fault pour des en-têtes `mustUnderstand` non compris
    pub fn must_understand(headers: Vec<QName>) -> Self {
        let names: Vec<String> = headers.iter().map(QName::to_string).collect();
        let mut fault = Self::new(
            FaultCode::MustUnderstand,
            format!("Mandatory header(s) not understood: {}", names.join(", ")),
        );
        fault.not_understood = headers;
        fault
    }

    /// Fault renvoyé quand une référence d'endpoint ne désigne aucun objet
    pub fn no_such_object(id: Option<&str>) -> Self {
        let reason = match id {
            Some(id) => format!("No exported object for reference '{}'", id),
            None => "Request carries no object reference".to_string(),
        };
        Self::sender(reason).with_subcode(QName::new(RUNTIME_NAMESPACE, "NoSuchObject"))
    }

    pub fn with_subcode(mut self, subcode: QName) -> Self {
        self.subcode = Some(subcode);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_detail(mut self, entry: Element) -> Self {
        self.detail.push(entry);
        self
    }

    /// Construit l'élément `Fault` pour la version donnée
    ///
    /// En SOAP 1.1 le sous-code n'a pas d'équivalent et n'est pas écrit.
    pub fn to_element(&self, version: SoapVersion) -> Element {
        let ns = version.namespace();
        let prefix = Some(ENVELOPE_PREFIX);
        let code_text = format!("{}:{}", ENVELOPE_PREFIX, self.code.local_name(version));
        let mut fault = new_element(ns, prefix, "Fault");

        match version {
            SoapVersion::Soap11 => {
                let mut faultcode = Element::new("faultcode");
                bind_prefix(&mut faultcode, ENVELOPE_PREFIX, ns);
                faultcode.children.push(XMLNode::Text(code_text));
                push_child(&mut fault, faultcode);

                let mut faultstring = Element::new("faultstring");
                faultstring.children.push(XMLNode::Text(self.reason.clone()));
                push_child(&mut fault, faultstring);

                if let Some(role) = &self.role {
                    let mut actor = Element::new("faultactor");
                    actor.children.push(XMLNode::Text(role.clone()));
                    push_child(&mut fault, actor);
                }

                if !self.detail.is_empty() {
                    let mut detail = Element::new("detail");
                    for entry in &self.detail {
                        push_child(&mut detail, entry.clone());
                    }
                    push_child(&mut fault, detail);
                }
            }
            SoapVersion::Soap12 => {
                let mut code = new_element(ns, prefix, "Code");
                let mut value = new_element(ns, prefix, "Value");
                value.children.push(XMLNode::Text(code_text));
                push_child(&mut code, value);

                if let Some(subcode) = &self.subcode {
                    let mut sub = new_element(ns, prefix, "Subcode");
                    let mut sub_value = new_element(ns, prefix, "Value");
                    if subcode.namespace.is_empty() {
                        sub_value.children.push(XMLNode::Text(subcode.local.clone()));
                    } else {
                        bind_prefix(&mut sub_value, "sc", &subcode.namespace);
                        sub_value
                            .children
                            .push(XMLNode::Text(format!("sc:{}", subcode.local)));
                    }
                    push_child(&mut sub, sub_value);
                    push_child(&mut code, sub);
                }
                push_child(&mut fault, code);

                let mut reason = new_element(ns, prefix, "Reason");
                let mut text = new_element(ns, prefix, "Text");
                set_attribute(&mut text, XML_NAMESPACE, "xml", "lang", "en");
                text.children.push(XMLNode::Text(self.reason.clone()));
                push_child(&mut reason, text);
                push_child(&mut fault, reason);

                if let Some(role) = &self.role {
                    let mut elem = new_element(ns, prefix, "Role");
                    elem.children.push(XMLNode::Text(role.clone()));
                    push_child(&mut fault, elem);
                }

                if !self.detail.is_empty() {
                    let mut detail = new_element(ns, prefix, "Detail");
                    for entry in &self.detail {
                        push_child(&mut detail, entry.clone());
                    }
                    push_child(&mut fault, detail);
                }
            }
        }
        fault
    }

    /// En-têtes `NotUnderstood` accompagnant un fault MustUnderstand en SOAP 1.2
    pub fn not_understood_headers(&self, version: SoapVersion) -> Vec<Element> {
        if version != SoapVersion::Soap12 {
            return Vec::new();
        }
        self.not_understood
            .iter()
            .map(|name| {
                let mut elem =
                    new_element(version.namespace(), Some(ENVELOPE_PREFIX), "NotUnderstood");
                let value = if name.namespace.is_empty() {
                    name.local.clone()
                } else {
                    bind_prefix(&mut elem, "nu", &name.namespace);
                    format!("nu:{}", name.local)
                };
                elem.attributes.insert("qname".to_string(), value);
                elem
            })
            .collect()
    }

    /// Relit un élément `Fault`
    pub fn from_element(elem: &Element) -> Result<Self, MessageError> {
        let name = element_name(elem);
        let version = SoapVersion::from_namespace(&name.namespace)
            .filter(|_| name.local == "Fault")
            .ok_or_else(|| MessageError::InvalidFault(format!("{} is not a SOAP fault", name)))?;

        let code_of = |value: &Element| -> Result<FaultCode, MessageError> {
            let text = text_content(value);
            resolve_qname(value, &text)
                .filter(|q| q.namespace == version.namespace())
                .and_then(|q| FaultCode::from_local_name(&q.local))
                .ok_or_else(|| MessageError::InvalidFault(format!("unknown fault code '{}'", text)))
        };

        match version {
            SoapVersion::Soap11 => {
                let code = child(elem, "", "faultcode")
                    .ok_or_else(|| MessageError::InvalidFault("missing faultcode".into()))?;
                let reason = child(elem, "", "faultstring")
                    .map(text_content)
                    .unwrap_or_default();
                let mut fault = Self::new(code_of(code)?, reason);
                fault.role = child(elem, "", "faultactor").map(text_content);
                if let Some(detail) = child(elem, "", "detail") {
                    fault.detail = child_elements(detail).cloned().collect();
                }
                Ok(fault)
            }
            SoapVersion::Soap12 => {
                let ns = version.namespace();
                let code = child(elem, ns, "Code")
                    .ok_or_else(|| MessageError::InvalidFault("missing Code".into()))?;
                let value = child(code, ns, "Value")
                    .ok_or_else(|| MessageError::InvalidFault("missing Code/Value".into()))?;
                let reason = child(elem, ns, "Reason")
                    .and_then(|r| child(r, ns, "Text"))
                    .map(text_content)
                    .unwrap_or_default();

                let mut fault = Self::new(code_of(value)?, reason);
                fault.subcode = child(code, ns, "Subcode")
                    .and_then(|s| child(s, ns, "Value"))
                    .and_then(|v| resolve_qname(v, &text_content(v)));
                fault.role = child(elem, ns, "Role").map(text_content);
                if let Some(detail) = child(elem, ns, "Detail") {
                    fault.detail = child_elements(detail).cloned().collect();
                }
                Ok(fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{XmlWriter, parse_element};

    fn reparse(fault: &SoapFault, version: SoapVersion) -> SoapFault {
        let mut writer = XmlWriter::new(Vec::new());
        writer.write_element(&fault.to_element(version)).unwrap();
        let bytes = writer.into_inner();
        SoapFault::from_element(&parse_element(&bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_soap11_fault_codes() {
        let fault = SoapFault::sender("bad request").with_role("urn:node");
        let back = reparse(&fault, SoapVersion::Soap11);
        assert_eq!(back.code, FaultCode::Sender);
        assert_eq!(back.reason, "bad request");
        assert_eq!(back.role.as_deref(), Some("urn:node"));

        let elem = fault.to_element(SoapVersion::Soap11);
        assert_eq!(text_content(child(&elem, "", "faultcode").unwrap()), "S:Client");
    }

    #[test]
    fn test_soap12_subcode_survives() {
        let fault = SoapFault::no_such_object(Some("42"));
        let back = reparse(&fault, SoapVersion::Soap12);
        assert_eq!(back.code, FaultCode::Sender);
        assert_eq!(
            back.subcode,
            Some(QName::new(RUNTIME_NAMESPACE, "NoSuchObject"))
        );
        assert!(back.reason.contains("42"));
    }

    #[test]
    fn test_detail_entries() {
        let mut entry = Element::new("errorCode");
        entry.children.push(XMLNode::Text("401".into()));
        let fault = SoapFault::receiver("boom").with_detail(entry);
        let back = reparse(&fault, SoapVersion::Soap11);
        assert_eq!(back.detail.len(), 1);
        assert_eq!(text_content(&back.detail[0]), "401");
    }

    #[test]
    fn test_not_understood_only_in_soap12() {
        let fault = SoapFault::must_understand(vec![QName::new("urn:x", "Foo")]);
        assert!(fault.not_understood_headers(SoapVersion::Soap11).is_empty());
        let headers = fault.not_understood_headers(SoapVersion::Soap12);
        assert_eq!(headers.len(), 1);
        assert_eq!(
            resolve_qname(&headers[0], headers[0].attributes.get("qname").unwrap()),
            Some(QName::new("urn:x", "Foo"))
        );
    }

    #[test]
    fn test_not_a_fault() {
        let elem = parse_element(b"<x/>").unwrap();
        assert!(SoapFault::from_element(&elem).is_err());
    }
}
