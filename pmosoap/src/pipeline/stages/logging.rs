//! Étape de journalisation des échanges

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::message::Message;
use crate::pipeline::{
    AssemblyContext, Chain, Stage, StageCloner, StageFactory, StageId, require_next,
    stage_factory,
};
use crate::xml::XmlWriter;

/// Journalise chaque requête et sa réponse
///
/// Quand le vidage est actif, l'enveloppe d'une *copie* du message est
/// sérialisée : le message d'origine n'est jamais consommé.
pub struct LoggingStage {
    next: StageId,
    dump_messages: bool,
    dump_limit: usize,
    exchanges: u64,
}

impl LoggingStage {
    pub fn new(next: StageId, dump_messages: bool, dump_limit: usize) -> Self {
        Self {
            next,
            dump_messages,
            dump_limit,
            exchanges: 0,
        }
    }

    pub fn factory() -> impl StageFactory {
        stage_factory(|context: &AssemblyContext, next| {
            let next = require_next("logging", next)?;
            Ok(Box::new(LoggingStage::new(
                next,
                context.settings.dump_messages,
                context.settings.dump_limit,
            )) as Box<dyn Stage>)
        })
    }

    fn dump(&self, direction: &str, message: &Message) {
        if self.dump_messages {
            debug!(
                exchange = self.exchanges,
                direction,
                "{}",
                render(message, self.dump_limit)
            );
        }
    }
}

/// Sérialise une copie du message, tronquée à `limit` octets
pub(crate) fn render(message: &Message, limit: usize) -> String {
    let mut copy = message.copy();
    let mut writer = XmlWriter::new(Vec::new());
    let written = match copy.version() {
        Some(version) => copy.write_envelope(version, &mut writer),
        None if copy.has_payload() => copy.write_payload_to(&mut writer),
        None => Ok(()),
    };
    if let Err(err) = written {
        return format!("<unprintable message: {}>", err);
    }
    let bytes = writer.into_inner();
    let text = String::from_utf8_lossy(&bytes);
    if text.len() <= limit {
        return text.into_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &text[..end], text.len())
}

impl Stage for LoggingStage {
    fn name(&self) -> &str {
        "logging"
    }

    fn process(
        &mut self,
        message: Message,
        chain: &mut Chain<'_>,
    ) -> Result<Message, PipelineError> {
        self.exchanges += 1;
        let started = Instant::now();
        info!(
            exchange = self.exchanges,
            payload = ?message.payload_name(),
            headers = message.headers().len(),
            attachments = message.attachments().len(),
            "processing request"
        );
        self.dump("request", &message);

        match chain.invoke(self.next, message) {
            Ok(response) => {
                info!(
                    exchange = self.exchanges,
                    payload = ?response.payload_name(),
                    fault = response.is_fault(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                self.dump("response", &response);
                Ok(response)
            }
            Err(err) => {
                warn!(
                    exchange = self.exchanges,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request failed"
                );
                Err(err)
            }
        }
    }

    fn copy(&self, cloner: &mut StageCloner<'_>) -> Result<Box<dyn Stage>, PipelineError> {
        let next = cloner.copy_stage(self.next)?;
        Ok(Box::new(LoggingStage::new(
            next,
            self.dump_messages,
            self.dump_limit,
        )))
    }

    fn successors(&self) -> Vec<StageId> {
        vec![self.next]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SoapVersion;
    use crate::xml::parse_element;

    #[test]
    fn test_render_does_not_consume() {
        let message = Message::from_tree(
            parse_element(br#"<q:Quote xmlns:q="urn:stock"><q:symbol>ACME</q:symbol></q:Quote>"#)
                .unwrap(),
        )
        .with_version(SoapVersion::Soap11);
        let text = render(&message, 4096);
        assert!(text.contains("Envelope"));
        assert!(text.contains("ACME"));
        assert!(!message.is_consumed());
    }

    #[test]
    fn test_render_truncates() {
        let message = Message::from_source("<note>ééééééééééééééééééé</note>").unwrap();
        let text = render(&message, 9);
        assert!(text.starts_with("<note>"));
        assert!(text.ends_with("bytes)"));
    }
}
