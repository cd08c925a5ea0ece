//! Raw RFC 5322 bytes to [`Message`].

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::error::{Result, SweepError};
use crate::model::{AttachmentMeta, EmailAddress, Header, Message, MessageBody};

/// Parse a complete raw message (headers + body).
///
/// `id` is assigned by the caller (the adapter that owns the mailbox).
/// `fallback_date` is used when the message has no parseable `Date`.
pub fn parse_message(id: &str, raw: &[u8], fallback_date: DateTime<Utc>) -> Result<Message> {
    let raw = skip_bom(raw);
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(SweepError::InvalidMessage(format!("'{id}' is empty")));
    }
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| SweepError::InvalidMessage(format!("'{id}' is not an RFC 5322 message")))?;

    let headers: Vec<Header> = parsed
        .headers_raw()
        .map(|(name, value)| Header::new(name, unfold(value)))
        .collect();

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| EmailAddress::new(a.name().unwrap_or_default(), a.address().unwrap_or_default()))
        .or_else(|| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("from"))
                .map(|h| EmailAddress::parse(&h.value))
        })
        .unwrap_or_else(|| EmailAddress::new("", ""));

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fallback_date);

    let body = MessageBody {
        text: parsed.body_text(0).map(|s| s.into_owned()),
        html: parsed.body_html(0).map(|s| s.into_owned()),
    };

    Ok(Message {
        id: id.to_string(),
        sender,
        headers,
        body,
        attachments: list_attachments(&parsed),
        received_at,
    })
}

/// Build attachment metadata from a parsed `mail_parser::Message`.
fn list_attachments(msg: &mail_parser::Message<'_>) -> Vec<AttachmentMeta> {
    msg.attachments()
        .enumerate()
        .map(|(idx, part)| {
            let filename = part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{idx}"));

            let mime_type = part
                .content_type()
                .map(|ct: &mail_parser::ContentType| match ct.subtype() {
                    Some(sub) => format!("{}/{sub}", ct.ctype()),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());

            AttachmentMeta {
                filename,
                mime_type,
                size: part.contents().len() as u64,
            }
        })
        .collect()
}

/// Undo header folding and trim the leading space after the colon.
fn unfold(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn skip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}
