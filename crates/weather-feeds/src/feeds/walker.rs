//! Depth-first walk over an XML document with a section stack, shared by the
//! XML feed parsers.
//!
//! The walker owns the "accumulate text, hand it over when the element
//! closes" loop; each feed supplies an [`ElementSink`] and optionally a
//! table of [`Leaf`] bindings that resolve leaves by their enclosing path.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::FeedError;
use crate::model::Units;

pub type Attributes = HashMap<String, String>;

/// Path of currently open elements, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionStack {
    path: Vec<String>,
}

impl SectionStack {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Name of the innermost open element.
    pub fn current(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<&str> {
        self.path
            .len()
            .checked_sub(2)
            .and_then(|index| self.path.get(index))
            .map(String::as_str)
    }

    pub fn within(&self, section: &str) -> bool {
        self.path.iter().any(|name| name == section)
    }

    pub fn ends_with(&self, suffix: &[&str]) -> bool {
        suffix.len() <= self.path.len()
            && self
                .path
                .iter()
                .rev()
                .zip(suffix.iter().rev())
                .all(|(open, expected)| open == expected)
    }

    fn push(&mut self, name: String) {
        self.path.push(name);
    }

    fn pop(&mut self) {
        self.path.pop();
    }
}

pub trait ElementSink {
    fn open(&mut self, _stack: &SectionStack, _attributes: &Attributes) -> Result<(), FeedError> {
        Ok(())
    }

    /// Called with the element still on the stack and its trimmed text.
    fn close(&mut self, stack: &SectionStack, text: &str) -> Result<(), FeedError>;
}

/// Binds an element path to a field of a per-section scratch record.
pub struct Leaf<S> {
    /// Section that must be open somewhere above the leaf.
    pub within: &'static str,
    /// Trailing element names, innermost last.
    pub path: &'static [&'static str],
    /// Only applies under this unit setting; `None` applies always.
    pub units: Option<Units>,
    pub apply: fn(&mut S, &str),
}

/// Applies the first binding matching the closing element. Returns `false`
/// when nothing matched (including unit-mismatched siblings).
pub fn apply_leaf<S>(
    table: &[Leaf<S>],
    stack: &SectionStack,
    units: Units,
    scratch: &mut S,
    text: &str,
) -> bool {
    let matched = table.iter().find(|leaf| {
        leaf.units.is_none_or(|required| required == units)
            && stack.within(leaf.within)
            && stack.ends_with(leaf.path)
    });

    match matched {
        Some(leaf) => {
            (leaf.apply)(scratch, text);
            true
        }
        None => false,
    }
}

pub fn walk<S: ElementSink>(document: &[u8], sink: &mut S) -> Result<(), FeedError> {
    let mut reader = Reader::from_reader(document);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack = SectionStack::default();
    let mut texts: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => {
                let (name, attributes) = element_parts(&element)?;
                stack.push(name);
                texts.push(String::new());
                sink.open(&stack, &attributes)?;
            }
            Ok(Event::Empty(element)) => {
                let (name, attributes) = element_parts(&element)?;
                stack.push(name);
                sink.open(&stack, &attributes)?;
                sink.close(&stack, "")?;
                stack.pop();
            }
            Ok(Event::End(_)) => {
                let text = texts.pop().unwrap_or_default();
                sink.close(&stack, text.trim())?;
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                let value = text.unescape().map_err(malformed)?;
                if let Some(open) = texts.last_mut() {
                    open.push_str(&value);
                }
            }
            Ok(Event::CData(data)) => {
                let bytes = data.into_inner();
                if let Some(open) = texts.last_mut() {
                    open.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => return Err(malformed(error)),
        }
        buf.clear();
    }

    Ok(())
}

fn element_parts(element: &BytesStart<'_>) -> Result<(String, Attributes), FeedError> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut attributes = Attributes::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(malformed)?.into_owned();
        attributes.insert(key, value);
    }
    Ok((name, attributes))
}

fn malformed(error: impl std::fmt::Display) -> FeedError {
    FeedError::Format(format!("malformed xml: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        opened: Vec<(String, Attributes)>,
        closed: Vec<(String, String)>,
    }

    impl ElementSink for Recorder {
        fn open(&mut self, stack: &SectionStack, attributes: &Attributes) -> Result<(), FeedError> {
            self.opened
                .push((stack.current().to_string(), attributes.clone()));
            Ok(())
        }

        fn close(&mut self, stack: &SectionStack, text: &str) -> Result<(), FeedError> {
            self.closed
                .push((stack.current().to_string(), text.to_string()));
            Ok(())
        }
    }

    #[test]
    fn walker_reports_trimmed_text_and_empty_elements() {
        let mut recorder = Recorder::default();
        walk(
            br#"<root><a>  one &amp; two </a><b kind="x"/><c><![CDATA[raw <text>]]></c></root>"#,
            &mut recorder,
        )
        .expect("walk");

        assert_eq!(
            recorder.closed,
            vec![
                ("a".to_string(), "one & two".to_string()),
                ("b".to_string(), String::new()),
                ("c".to_string(), "raw <text>".to_string()),
                ("root".to_string(), String::new()),
            ]
        );
        let b_attributes = &recorder.opened[2].1;
        assert_eq!(b_attributes.get("kind").map(String::as_str), Some("x"));
    }

    #[test]
    fn walker_rejects_mismatched_tags() {
        let mut recorder = Recorder::default();
        let error = walk(b"<root><a></b></root>", &mut recorder).expect_err("mismatch");
        assert!(matches!(error, FeedError::Format(_)));
    }

    #[test]
    fn section_stack_matches_paths_by_suffix() {
        let mut stack = SectionStack::default();
        for name in ["response", "current_observation", "display_location", "city"] {
            stack.push(name.to_string());
        }
        assert!(stack.ends_with(&["display_location", "city"]));
        assert!(!stack.ends_with(&["observation_location", "city"]));
        assert!(stack.within("current_observation"));
        assert_eq!(stack.parent(), Some("display_location"));
        assert_eq!(stack.depth(), 4);
    }

    #[derive(Default)]
    struct Scratch {
        temp: String,
    }

    const TEMPS: &[Leaf<Scratch>] = &[
        Leaf {
            within: "obs",
            path: &["temp_f"],
            units: Some(Units::Standard),
            apply: |scratch, text| scratch.temp = format!("{text}F"),
        },
        Leaf {
            within: "obs",
            path: &["temp_c"],
            units: Some(Units::Metric),
            apply: |scratch, text| scratch.temp = format!("{text}C"),
        },
    ];

    #[test]
    fn leaf_bindings_discard_unit_mismatched_siblings() {
        let mut stack = SectionStack::default();
        stack.push("obs".to_string());
        stack.push("temp_f".to_string());

        let mut scratch = Scratch::default();
        assert!(!apply_leaf(TEMPS, &stack, Units::Metric, &mut scratch, "70"));
        assert_eq!(scratch.temp, "");
        assert!(apply_leaf(TEMPS, &stack, Units::Standard, &mut scratch, "70"));
        assert_eq!(scratch.temp, "70F");
    }
}
