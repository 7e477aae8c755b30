//! Conversion of a loaded document into a `JobResult`.

use std::collections::BTreeMap;

use tracing::warn;

use rssformula_core::{AssertionCounts, JobKey, JobResult, now_seconds};

use crate::contract::{DocumentModel, OutputDocument};

/// Builds result records from successfully run documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultExtractor;

impl ResultExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Collect assertions, output document, and processing log of `document`.
    ///
    /// `attempts` is the number of engine attempts the job took.
    pub fn extract<D: DocumentModel + ?Sized>(
        &self,
        document: &D,
        key: &JobKey,
        is_inline_document: bool,
        attempts: u32,
    ) -> JobResult {
        let mut assertion_results: BTreeMap<String, AssertionCounts> = BTreeMap::new();
        for a in document.value_assertions() {
            let entry = assertion_results.entry(a.label).or_default();
            entry.satisfied_count += a.satisfied_count;
            entry.not_satisfied_count += a.not_satisfied_count;
        }

        let output_document = document.output_document().map(|doc| decode_output(&doc));

        JobResult {
            filing_id: key.filing_id.clone(),
            formula_id: key.formula_id,
            is_inline_document,
            output_document,
            assertion_results,
            processing_log: flatten_log(&document.processing_log()),
            processed_at: now_seconds(),
            errors: None,
            attempts,
        }
    }
}

/// Remove line breaks so the log fits one column/line.
pub fn flatten_log(log: &str) -> String {
    log.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// Decode an output document using its own declared encoding.
pub fn decode_output(doc: &OutputDocument) -> String {
    let label = doc
        .encoding
        .as_deref()
        .unwrap_or("utf-8")
        .trim()
        .to_ascii_lowercase()
        .replace(['-', '_'], "");

    match label.as_str() {
        "utf8" | "usascii" | "ascii" => decode_utf8(&doc.bytes),
        "iso88591" | "latin1" | "l1" => doc.bytes.iter().map(|&b| b as char).collect(),
        "utf16le" => decode_utf16(&doc.bytes, false),
        "utf16be" => decode_utf16(&doc.bytes, true),
        "utf16" => match doc.bytes.as_slice() {
            [0xFF, 0xFE, ..] => decode_utf16(&doc.bytes[2..], false),
            [0xFE, 0xFF, ..] => decode_utf16(&doc.bytes[2..], true),
            _ => decode_utf16(&doc.bytes, true),
        },
        other => {
            warn!(encoding = other, "unsupported output encoding; decoding as utf-8");
            String::from_utf8_lossy(&doc.bytes).into_owned()
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF_u8, 0xBB, 0xBF][..]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!(error = %e, "output document is not valid utf-8; decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ValueAssertion;
    use crate::scripted::ScriptedDocument;
    use rssformula_core::{FilingId, FormulaId};

    fn key() -> JobKey {
        JobKey::new(FilingId::from(101), FormulaId::new(7))
    }

    #[test]
    fn extracts_assertions_output_and_flat_log() {
        let doc = ScriptedDocument::default()
            .with_assertion(ValueAssertion::new("assets_eq", 4, 1))
            .with_assertion(ValueAssertion::new("liab_pos", 2, 0))
            .with_output(OutputDocument::utf8("<xbrl>\n<fact/>\n</xbrl>"))
            .with_log("<log>\n<entry>loaded</entry>\r\n</log>");

        let r = ResultExtractor::new().extract(&doc, &key(), true, 2);

        assert_eq!(r.filing_id, FilingId::from(101));
        assert_eq!(r.formula_id, FormulaId::new(7));
        assert!(r.is_inline_document);
        assert_eq!(r.assertion_results["assets_eq"], AssertionCounts::new(4, 1));
        assert_eq!(r.assertion_results["liab_pos"], AssertionCounts::new(2, 0));
        assert_eq!(r.output_document.as_deref(), Some("<xbrl>\n<fact/>\n</xbrl>"));
        assert_eq!(r.processing_log, "<log><entry>loaded</entry></log>");
        assert!(r.errors.is_none());
        assert_eq!(r.attempts, 2);
    }

    #[test]
    fn duplicate_labels_are_summed() {
        let doc = ScriptedDocument::default()
            .with_assertion(ValueAssertion::new("a", 1, 1))
            .with_assertion(ValueAssertion::new("a", 2, 3));
        let r = ResultExtractor::new().extract(&doc, &key(), false, 1);
        assert_eq!(r.assertion_results["a"], AssertionCounts::new(3, 4));
    }

    #[test]
    fn decodes_declared_encodings() {
        let latin1 = OutputDocument {
            bytes: vec![b'<', b'a', b'>', 0xE9, b'<', b'/', b'a', b'>'],
            encoding: Some("ISO-8859-1".into()),
        };
        assert_eq!(decode_output(&latin1), "<a>é</a>");

        let utf16 = OutputDocument {
            bytes: vec![0xFF, 0xFE, b'<', 0, b'a', 0, b'/', 0, b'>', 0],
            encoding: Some("UTF-16".into()),
        };
        assert_eq!(decode_output(&utf16), "<a/>");

        let bom_utf8 = OutputDocument {
            bytes: [&[0xEF_u8, 0xBB, 0xBF][..], &b"<a/>"[..]].concat(),
            encoding: None,
        };
        assert_eq!(decode_output(&bom_utf8), "<a/>");
    }
}
