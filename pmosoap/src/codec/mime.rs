//! Lecture et écriture de `multipart/related`

use std::io::{self, Write};

use bytes::Bytes;
use uuid::Uuid;

use super::content_type_parameter;
use crate::error::{DecodeError, EncodeError};
use crate::message::{Attachment, AttachmentSet};

/// Content-ID de la partie racine écrite par le runtime
pub(crate) const ROOT_CONTENT_ID: &str = "rootpart@pmosoap";

/// Une partie d'un document multipart
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Part {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or("application/octet-stream")
    }
}

pub(crate) fn new_boundary() -> String {
    format!("uuid:{}", Uuid::new_v4())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Écrit une partie précédée de son délimiteur
pub(crate) fn write_part(
    sink: &mut dyn Write,
    boundary: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> io::Result<()> {
    write!(sink, "--{}\r\n", boundary)?;
    for (name, value) in headers {
        write!(sink, "{}: {}\r\n", name, value)?;
    }
    sink.write_all(b"\r\n")?;
    sink.write_all(body)?;
    sink.write_all(b"\r\n")
}

pub(crate) fn write_close(sink: &mut dyn Write, boundary: &str) -> io::Result<()> {
    write!(sink, "--{}--\r\n", boundary)
}

/// Découpe un corps multipart ; les parties partagent le tampon d'origine
pub(crate) fn parse_parts(body: &Bytes, boundary: &str) -> Result<Vec<Part>, DecodeError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut separator = b"\r\n".to_vec();
    separator.extend_from_slice(&delimiter);

    let mut position = find(body, &delimiter, 0)
        .ok_or_else(|| DecodeError::malformed("multipart boundary not found"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[position..].starts_with(b"--") {
            return Ok(parts);
        }
        // Espaces autorisés après le délimiteur, puis fin de ligne
        while position < body.len() && (body[position] == b' ' || body[position] == b'\t') {
            position += 1;
        }
        if !body[position..].starts_with(b"\r\n") {
            return Err(DecodeError::malformed("malformed multipart delimiter line"));
        }
        position += 2;

        // Une partie sans en-tête commence directement par une ligne vide
        let (raw_headers, content_start) = if body[position..].starts_with(b"\r\n") {
            ("", position + 2)
        } else {
            let headers_end = find(body, b"\r\n\r\n", position)
                .ok_or_else(|| DecodeError::malformed("unterminated part headers"))?;
            let raw = std::str::from_utf8(&body[position..headers_end])
                .map_err(|_| DecodeError::malformed("part headers are not UTF-8"))?;
            (raw, headers_end + 4)
        };
        let mut headers = Vec::new();
        for line in raw_headers.split("\r\n").filter(|l| !l.trim().is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| DecodeError::malformed(format!("bad part header '{}'", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let content_end = find(body, &separator, content_start)
            .ok_or_else(|| DecodeError::malformed("unterminated multipart body"))?;
        parts.push(Part {
            headers,
            body: body.slice(content_start..content_end),
        });
        position = content_end + separator.len();
    }
}

/// Sépare la partie racine des pièces jointes
///
/// La racine est désignée par le paramètre `start`, à défaut la première
/// partie.
pub(crate) fn split_related(
    body: &Bytes,
    content_type: &str,
) -> Result<(Part, AttachmentSet), DecodeError> {
    let boundary = content_type_parameter(content_type, "boundary")
        .ok_or_else(|| DecodeError::malformed("multipart content type without boundary"))?;
    let mut parts = parse_parts(body, &boundary)?;
    if parts.is_empty() {
        return Err(DecodeError::malformed("multipart message has no part"));
    }

    let root_index = content_type_parameter(content_type, "start")
        .and_then(|start| {
            let start = crate::message::normalize_content_id(&start);
            parts.iter().position(|p| {
                p.header("Content-ID")
                    .is_some_and(|id| crate::message::normalize_content_id(id) == start)
            })
        })
        .unwrap_or(0);
    let root = parts.remove(root_index);

    let mut attachments = AttachmentSet::new();
    for (index, part) in parts.into_iter().enumerate() {
        let id = part
            .header("Content-ID")
            .map(str::to_string)
            .unwrap_or_else(|| format!("part{}@pmosoap", index));
        let attachment = Attachment::new(&id, part.content_type(), part.body.clone());
        attachments.add(attachment)?;
    }
    Ok((root, attachments))
}

/// Écrit la racine puis chaque pièce jointe
pub(crate) fn write_related(
    sink: &mut dyn Write,
    boundary: &str,
    root_content_type: &str,
    root: &[u8],
    attachments: &AttachmentSet,
) -> Result<(), EncodeError> {
    let root_id = format!("<{}>", ROOT_CONTENT_ID);
    write_part(
        sink,
        boundary,
        &[
            ("Content-Type", root_content_type),
            ("Content-Transfer-Encoding", "binary"),
            ("Content-ID", &root_id),
        ],
        root,
    )?;
    for attachment in attachments.iter() {
        let data = attachment.as_bytes()?;
        let id = format!("<{}>", attachment.content_id());
        write_part(
            sink,
            boundary,
            &[
                ("Content-Type", attachment.content_type()),
                ("Content-Transfer-Encoding", "binary"),
                ("Content-ID", &id),
            ],
            &data,
        )?;
    }
    write_close(sink, boundary)?;
    Ok(())
}
