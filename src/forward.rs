//! Forwarder
//!
//! Builds a `Fwd:` copy of a message and hands it to a [`Transport`].
//! Every leaf part of the original becomes a base64 part of a flat
//! `multipart/mixed` wrapper. The first inline `text/plain` and
//! `text/html` leaves get a "Forwarded message" block in front.
//!
//! Addresses already forwarded to are tracked in the
//! `X-Zostay-Forwarded` header of the original and dropped from the
//! envelope, so a message is delivered to each address at most once.

use crate::error::{Error, Result};
use crate::message::{Address, Message, join_addresses};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, ParsedMail};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Header on the original message listing addresses it was already
/// forwarded to.
pub const FORWARDED_HEADER: &str = "X-Zostay-Forwarded";

const BOUNDARY_LEN: usize = 30;
const BASE64_LINE: usize = 76;
const CRLF: &str = "\r\n";
const BANNER: &str = "---------- Forwarded message ---------";

/// Something that can deliver a finished message.
pub trait Transport {
    /// Submit `body` from `from` to every address in `to`.
    fn send(
        &self,
        from: &str,
        to: &[String],
        body: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// What a forward attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarded {
    /// Delivered to these envelope recipients.
    Sent(Vec<String>),
    /// Every destination was already in the dedupe header.
    AlreadyDone,
}

/// Forwards messages through a transport on behalf of one sender.
#[derive(Debug)]
pub struct Forwarder<T> {
    transport: T,
    sender: Address,
}

impl<T: Transport + Sync> Forwarder<T> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `sender` is not a single mailbox.
    pub fn new(transport: T, sender: &str) -> Result<Self> {
        let sender = Address::parse_list(sender)
            .ok()
            .and_then(|mut list| (list.len() == 1).then(|| list.remove(0)))
            .ok_or_else(|| Error::Config(format!("Invalid sender address {sender:?}")))?;
        Ok(Self { transport, sender })
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Envelope recipients `msg` has not been forwarded to yet,
    /// lowercased and sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read.
    pub fn pending(&self, msg: &Message, to: &[Address]) -> Result<Vec<String>> {
        let done = already_forwarded(msg)?;
        Ok(to
            .iter()
            .map(|a| a.email.to_lowercase())
            .filter(|email| !done.contains(email))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Forward `msg` to `to`, skipping addresses it already went to.
    ///
    /// On success the dedupe header is staged on `msg`; the caller
    /// persists it with [`Message::save`]. On failure `msg` is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the original cannot be parsed and
    /// whatever the transport returns if delivery fails.
    pub async fn forward(
        &self,
        msg: &mut Message,
        to: &[Address],
        now: DateTime<Utc>,
    ) -> Result<Forwarded> {
        let envelope = self.pending(msg, to)?;
        if envelope.is_empty() {
            debug!("{} already forwarded to {}", msg.entry().key(), join_addresses(to));
            return Ok(Forwarded::AlreadyDone);
        }

        let body = build_forward(msg, &self.sender, to, now)?;
        self.transport
            .send(&self.sender.email, &envelope, &body)
            .await?;
        info!("Forwarded {} to {}", msg.entry().key(), envelope.join(", "));

        let mut done = already_forwarded(msg)?;
        done.extend(envelope.iter().cloned());
        let header = done.into_iter().collect::<Vec<_>>().join(", ");
        msg.set_header(FORWARDED_HEADER, &header);

        Ok(Forwarded::Sent(envelope))
    }
}

fn already_forwarded(msg: &Message) -> Result<BTreeSet<String>> {
    Ok(msg
        .header_values(FORWARDED_HEADER)?
        .iter()
        .flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect())
}

/// Assemble the forwarded message.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the original cannot be parsed.
pub fn build_forward(
    msg: &Message,
    sender: &Address,
    to: &[Address],
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let raw = msg.raw()?;
    let parsed = mailparse::parse_mail(raw)?;
    let boundary = pick_boundary(raw, random_boundary);

    let original = OriginalHeaders::of(msg)?;
    let destination = join_addresses(to);

    let mut out = String::new();
    push_header(&mut out, "Date", &now.to_rfc2822());
    push_header(&mut out, "From", &sender.to_string());
    push_header(&mut out, "To", &destination);
    push_header(&mut out, "X-Forwarded-To", &destination);
    push_header(&mut out, "X-Forwarded-For", &sender.to_string());
    push_header(&mut out, "Subject", &encode_word(&format!("Fwd: {}", original.subject)));
    push_header(&mut out, "MIME-Version", "1.0");
    push_header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );
    out.push_str(CRLF);

    let mut leaves = Vec::new();
    collect_leaves(&parsed, &mut leaves);

    let mut plain_done = false;
    let mut html_done = false;

    for leaf in leaves {
        let inline = leaf.get_content_disposition().disposition == DispositionType::Inline;
        let mimetype = leaf.ctype.mimetype.to_ascii_lowercase();

        out.push_str(&format!("--{boundary}{CRLF}"));

        let body = if inline && mimetype == "text/plain" {
            let mut text = leaf.get_body()?;
            if !plain_done {
                text.insert_str(0, &original.text_block());
                plain_done = true;
            }
            push_header(&mut out, "Content-Type", "text/plain; charset=\"utf-8\"");
            text.into_bytes()
        } else if inline && mimetype == "text/html" {
            let mut html = leaf.get_body()?;
            if !html_done {
                insert_after_body_tag(&mut html, &original.html_block());
                html_done = true;
            }
            push_header(&mut out, "Content-Type", "text/html; charset=\"utf-8\"");
            html.into_bytes()
        } else {
            push_header(&mut out, "Content-Type", &content_type_of(leaf));
            leaf.get_body_raw()?
        };

        push_header(&mut out, "Content-Disposition", &disposition_of(leaf));
        push_header(&mut out, "Content-Transfer-Encoding", "base64");
        out.push_str(CRLF);
        push_base64(&mut out, &body);
    }

    out.push_str(&format!("--{boundary}--{CRLF}"));
    Ok(out.into_bytes())
}

/// Headers of the original quoted in the forwarded block.
struct OriginalHeaders {
    from: Vec<Address>,
    date: String,
    subject: String,
    to: Vec<Address>,
    cc: Vec<Address>,
}

impl OriginalHeaders {
    fn of(msg: &Message) -> Result<Self> {
        Ok(Self {
            // a malformed address header should not block the forward
            from: msg.address_list("From").unwrap_or_default(),
            date: msg.header("Date")?.unwrap_or_default(),
            subject: msg.subject()?,
            to: msg.address_list("To").unwrap_or_default(),
            cc: msg.address_list("Cc").unwrap_or_default(),
        })
    }

    fn text_block(&self) -> String {
        let mut block = format!("{BANNER}{CRLF}");
        block.push_str(&format!("From: {}{CRLF}", join_addresses(&self.from)));
        block.push_str(&format!("Date: {}{CRLF}", self.date));
        block.push_str(&format!("Subject: {}{CRLF}", self.subject));
        block.push_str(&format!("To: {}{CRLF}", join_addresses(&self.to)));
        if !self.cc.is_empty() {
            block.push_str(&format!("Cc: {}{CRLF}", join_addresses(&self.cc)));
        }
        block.push_str(CRLF);
        block
    }

    fn html_block(&self) -> String {
        let mut block = format!("<div class=\"forwarded\">{BANNER}<br>{CRLF}");
        block.push_str(&format!("From: {}<br>{CRLF}", html_addresses(&self.from)));
        block.push_str(&format!(
            "Date: {}<br>{CRLF}",
            html_escape::encode_text(&self.date)
        ));
        block.push_str(&format!(
            "Subject: {}<br>{CRLF}",
            html_escape::encode_text(&self.subject)
        ));
        block.push_str(&format!("To: {}<br>{CRLF}", html_addresses(&self.to)));
        if !self.cc.is_empty() {
            block.push_str(&format!("Cc: {}<br>{CRLF}", html_addresses(&self.cc)));
        }
        block.push_str(&format!("</div><br>{CRLF}"));
        block
    }
}

fn html_addresses(list: &[Address]) -> String {
    list.iter()
        .map(|a| {
            let link = format!(
                "<a href=\"mailto:{}\">{}</a>",
                html_escape::encode_double_quoted_attribute(&a.email),
                html_escape::encode_text(&a.email)
            );
            match &a.name {
                Some(name) if !name.is_empty() => format!(
                    "<strong>{}</strong> &lt;{link}&gt;",
                    html_escape::encode_text(name)
                ),
                _ => link,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_after_body_tag(html: &mut String, block: &str) {
    let lower = html.to_ascii_lowercase();
    let at = lower
        .find("<body")
        .and_then(|start| lower[start..].find('>').map(|end| start + end + 1))
        .unwrap_or(0);
    html.insert_str(at, block);
}

/// Depth-first list of single-part leaves.
fn collect_leaves<'a>(part: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        out.push(part);
    } else {
        for sub in &part.subparts {
            collect_leaves(sub, out);
        }
    }
}

fn content_type_of(leaf: &ParsedMail<'_>) -> String {
    let mut value = leaf.ctype.mimetype.clone();
    for (key, param) in &leaf.ctype.params {
        if key.eq_ignore_ascii_case("boundary") {
            continue;
        }
        value.push_str(&format!("; {key}=\"{}\"", param.replace('"', "")));
    }
    value
}

fn disposition_of(leaf: &ParsedMail<'_>) -> String {
    let disposition = leaf.get_content_disposition();
    let mut value = match disposition.disposition {
        DispositionType::Attachment => "attachment".to_string(),
        _ => "inline".to_string(),
    };
    if let Some(filename) = disposition.params.get("filename") {
        value.push_str(&format!("; filename=\"{}\"", filename.replace('"', "")));
    }
    value
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str(CRLF);
}

fn push_base64(out: &mut String, body: &[u8]) {
    let encoded = STANDARD.encode(body);
    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str(CRLF);
    }
}

/// RFC 2047 encode a header value when it is not plain ASCII.
fn encode_word(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

fn random_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

/// Draw boundaries until one does not occur in `raw`.
fn pick_boundary(raw: &[u8], mut generate: impl FnMut() -> String) -> String {
    loop {
        let candidate = generate();
        let needle = candidate.as_bytes();
        if !raw.windows(needle.len()).any(|w| w == needle) {
            return candidate;
        }
        debug!("Boundary collided with message body; drawing another");
    }
}
