//! RSS 2.0 channel parsing.
//!
//! Turns raw feed markup into a [`ParsedFeed`]. Only direct children of
//! `<channel>` and `<item>` are read, so nested elements such as
//! `<image><title>` never shadow the channel title. Items keep the order in
//! which they appear in the document.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while parsing feed markup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// A required element is absent.
    #[error("missing <{0}> element")]
    MissingElement(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub description: String,
    pub link: String,
}

#[derive(Default)]
struct Fields {
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
}

impl Fields {
    fn set(&mut self, name: &str, value: &str) {
        let slot = match name {
            "title" => &mut self.title,
            "description" => &mut self.description,
            "link" => &mut self.link,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.trim().to_string());
        }
    }
}

/// Tracks where the reader is relative to the first `<channel>`.
#[derive(Default)]
struct ChannelScan {
    /// Index of `<channel>` in the element path, once seen.
    depth: Option<usize>,
    closed: bool,
    fields: Fields,
    item: Option<Fields>,
    items: Vec<ParsedItem>,
}

impl ChannelScan {
    fn active(&self) -> Option<usize> {
        if self.closed {
            None
        } else {
            self.depth
        }
    }

    /// Called before `name` is pushed; `depth` is the current path length.
    fn open(&mut self, name: &str, depth: usize) {
        if self.depth.is_none() && name == "channel" {
            self.depth = Some(depth);
            return;
        }
        if let Some(channel) = self.active() {
            if name == "item" && depth == channel + 1 && self.item.is_none() {
                self.item = Some(Fields::default());
            }
        }
    }

    /// Called after `name` is popped; `depth` is the remaining path length.
    fn close(&mut self, name: &str, depth: usize, text: &str) {
        let Some(channel) = self.active() else {
            return;
        };

        if depth == channel {
            self.closed = true;
        } else if depth == channel + 1 && name == "item" {
            if let Some(item) = self.item.take() {
                self.finish_item(item);
            }
        } else if depth == channel + 2 {
            if let Some(item) = self.item.as_mut() {
                item.set(name, text);
            }
        } else if depth == channel + 1 {
            self.fields.set(name, text);
        }
    }

    fn finish_item(&mut self, item: Fields) {
        let title = item.title.unwrap_or_default();
        match item.link {
            Some(link) if !link.is_empty() => self.items.push(ParsedItem {
                title,
                description: item.description.unwrap_or_default(),
                link,
            }),
            _ => warn!("Skipping item with no link: {}", title),
        }
    }
}

/// Parse channel-based RSS markup.
///
/// # Errors
///
/// [`ParseError::Malformed`] when the markup is not well-formed, and
/// [`ParseError::MissingElement`] when there is no `<channel>` or the
/// channel has no `<title>`.
pub fn parse(raw: &str) -> Result<ParsedFeed, ParseError> {
    let mut reader = Reader::from_str(raw);
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut scan = ChannelScan::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Malformed(e.to_string()))?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                scan.open(&name, path.len());
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                scan.open(&name, path.len());
                scan.close(&name, path.len(), "");
                text.clear();
            }
            Event::End(_) => {
                let name = path
                    .pop()
                    .ok_or_else(|| ParseError::Malformed("unexpected closing tag".into()))?;
                scan.close(&name, path.len(), &text);
                text.clear();
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map_err(|e| ParseError::Malformed(e.to_string()))?;
                text.push_str(&value);
            }
            Event::CData(c) => {
                let value = c
                    .decode()
                    .map_err(|e| ParseError::Malformed(e.to_string()))?;
                text.push_str(&value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = path.last() {
        return Err(ParseError::Malformed(format!("unclosed element <{}>", open)));
    }
    if scan.depth.is_none() {
        return Err(ParseError::MissingElement("channel"));
    }

    let title = scan.fields.title.ok_or(ParseError::MissingElement("title"))?;

    Ok(ParsedFeed {
        title,
        description: scan.fields.description.unwrap_or_default(),
        items: scan.items,
    })
}
