//! Structured bill XML (`<bill>`, `<title>`, `<official-title>`, `<section>`).

use legisync_shared::{LegisyncError, Result};
use quick_xml::events::Event;

use crate::ExtractedText;

/// Extract title, official title, every `section` and all text from bill XML.
pub(crate) fn extract_xml(bytes: &[u8]) -> Result<ExtractedText> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut saw_element = false;
    let mut chunks: Vec<String> = Vec::new();

    // Text of the first <title> / <official-title>, captured while open.
    let mut title = Capture::default();
    let mut official_title = Capture::default();

    // Every <section> in document order; nested sections also feed their parents.
    let mut sections: Vec<Vec<String>> = Vec::new();
    let mut open_sections: Vec<usize> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                saw_element = true;
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"title" => title.open(),
                    b"official-title" => official_title.open(),
                    b"section" => {
                        open_sections.push(sections.len());
                        sections.push(Vec::new());
                    }
                    _ => {}
                }
                title.enter();
                official_title.enter();
            }
            Ok(Event::Empty(_)) => saw_element = true,
            Ok(Event::End(ref e)) => {
                title.leave();
                official_title.leave();
                let name = e.name();
                if local_name(name.as_ref()) == b"section" {
                    open_sections.pop();
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned());
                title.push(&text);
                official_title.push(&text);
                for &i in &open_sections {
                    sections[i].push(text.clone());
                }
                chunks.push(text);
            }
            Ok(Event::CData(ref c)) => {
                let text = String::from_utf8_lossy(c).into_owned();
                for &i in &open_sections {
                    sections[i].push(text.clone());
                }
                chunks.push(text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LegisyncError::parsing(format!(
                    "invalid XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    if !saw_element {
        return Err(LegisyncError::parsing("document contains no XML elements"));
    }

    Ok(ExtractedText {
        title: title.text(),
        official_title: official_title.text(),
        sections: sections
            .into_iter()
            .map(|parts| parts.join(" ").trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        raw_text: chunks.join("\n"),
        ..Default::default()
    })
}

/// Collects the text of the first occurrence of one element.
#[derive(Debug, Default)]
struct Capture {
    depth: Option<usize>,
    done: bool,
    parts: Vec<String>,
}

impl Capture {
    fn open(&mut self) {
        if !self.done && self.depth.is_none() {
            self.depth = Some(0);
        }
    }

    fn enter(&mut self) {
        if let Some(d) = self.depth.as_mut() {
            *d += 1;
        }
    }

    fn leave(&mut self) {
        if let Some(d) = self.depth.as_mut() {
            *d -= 1;
            if *d == 0 {
                self.depth = None;
                self.done = true;
            }
        }
    }

    fn push(&mut self, text: &str) {
        if self.depth.is_some() {
            self.parts.push(text.to_string());
        }
    }

    fn text(&self) -> String {
        self.parts.join(" ").trim().to_string()
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
