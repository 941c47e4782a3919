use crate::models::{PageType, WikiPage};
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::warn;

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Title,
    Ns,
    Id,
    Timestamp,
    Text,
}

/// Streaming reader over a MediaWiki XML dump (`.xml` or `.xml.bz2`).
pub struct WikiReader {
    reader: Reader<BufReader<Box<dyn Read + Send>>>,
    buf: Vec<u8>,
    skip_text: bool,
}

impl WikiReader {
    pub fn new(path: &str, skip_text: bool) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open dump: {}", path))?;
        let inner: Box<dyn Read + Send> = if path.ends_with(".bz2") {
            Box::new(MultiBzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::from_reader(inner, skip_text))
    }

    pub fn from_reader(inner: Box<dyn Read + Send>, skip_text: bool) -> Self {
        let mut reader = Reader::from_reader(BufReader::with_capacity(256 * 1024, inner));
        reader.trim_text(false);
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            skip_text,
        }
    }

    fn redirect_target(e: &BytesStart) -> Option<String> {
        e.attributes()
            .flatten()
            .find(|a| a.key.as_ref() == b"title")
            .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
    }

    fn read_page(&mut self) -> Option<WikiPage> {
        let mut title = String::new();
        let mut ns: Option<i32> = None;
        let mut id: Option<u32> = None;
        let mut timestamp: Option<String> = None;
        let mut text: Option<String> = None;
        let mut redirect: Option<String> = None;
        let mut in_page = false;
        let mut in_revision = false;
        let mut field = Field::None;
        let mut scratch = String::new();

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(error = %e, position = self.reader.buffer_position(), "XML read error");
                    return None;
                }
            };
            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"page" => {
                        in_page = true;
                    }
                    b"revision" if in_page => in_revision = true,
                    b"title" if in_page => field = Field::Title,
                    b"ns" if in_page => field = Field::Ns,
                    b"id" if in_page && !in_revision && id.is_none() => field = Field::Id,
                    b"timestamp" if in_revision => field = Field::Timestamp,
                    b"text" if in_revision => {
                        field = Field::Text;
                        text = Some(String::new());
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"redirect" if in_page => redirect = Self::redirect_target(&e),
                    b"text" if in_revision => text = Some(String::new()),
                    _ => {}
                },
                Event::Text(e) if field != Field::None => {
                    let value = match e.unescape() {
                        Ok(v) => v,
                        Err(err) => {
                            warn!(error = %err, title = %title, "Bad XML escape in page");
                            continue;
                        }
                    };
                    match field {
                        Field::Title => title.push_str(&value),
                        Field::Ns | Field::Id => scratch.push_str(&value),
                        Field::Timestamp => {
                            timestamp.get_or_insert_with(String::new).push_str(&value)
                        }
                        Field::Text => {
                            if !self.skip_text {
                                if let Some(t) = text.as_mut() {
                                    t.push_str(&value);
                                }
                            }
                        }
                        Field::None => {}
                    }
                }
                Event::CData(e) if field == Field::Text && !self.skip_text => {
                    if let Some(t) = text.as_mut() {
                        t.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"ns" if field == Field::Ns => {
                        ns = scratch.trim().parse().ok();
                        scratch.clear();
                        field = Field::None;
                    }
                    b"id" if field == Field::Id => {
                        id = scratch.trim().parse().ok();
                        scratch.clear();
                        field = Field::None;
                    }
                    b"title" | b"timestamp" | b"text" => field = Field::None,
                    b"revision" => in_revision = false,
                    b"page" if in_page => {
                        let ns_id = ns.unwrap_or(0);
                        let page_type = match redirect.take() {
                            Some(target) => PageType::Redirect(target),
                            None if ns_id == 0 => PageType::Article,
                            None => PageType::Special,
                        };
                        return Some(WikiPage {
                            id: id.unwrap_or(0),
                            title,
                            ns,
                            page_type,
                            text: if self.skip_text { None } else { text },
                            timestamp,
                        });
                    }
                    _ => {}
                },
                Event::Eof => return None,
                _ => {}
            }
        }
    }
}

impl Iterator for WikiReader {
    type Item = WikiPage;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_page()
    }
}
