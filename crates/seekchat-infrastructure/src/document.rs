//! Embedded payload of an exportable host document.
//!
//! A host document carries two tokens in its text:
//!
//! ```text
//! _DSDATA_="<URL-component-encoded JSON array of ConversationRecord>";_DSDATA_
//! _DSFILEKEY_="<identity>";_DSFILEKEY_
//! ```
//!
//! The data token is rewritten on export and read on load and import. The
//! identity token selects the local storage namespace.

use once_cell::sync::Lazy;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::{NoExpand, Regex};
use seekchat_core::conversation::ConversationRecord;
use seekchat_core::error::{ChatError, Result};

static DATA_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"_DSDATA_="([\s\S]*?)";_DSDATA_"#).expect("DATA_TOKEN pattern is valid")
});

static FILE_KEY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"_DSFILEKEY_="([\s\S]*?)";_DSFILEKEY_"#).expect("FILE_KEY_TOKEN pattern is valid")
});

/// Characters `encodeURIComponent` leaves untouched, besides alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Minimal host document used when the caller supplies no template.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>SeekChat</title>
<script>
window._DSFILEKEY_="";_DSFILEKEY_
window._DSDATA_="";_DSDATA_
</script>
</head>
<body></body>
</html>
"#;

pub fn encode_component(text: &str) -> String {
    utf8_percent_encode(text, URI_COMPONENT).to_string()
}

pub fn decode_component(text: &str) -> Result<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ChatError::payload(format!("payload is not valid UTF-8: {}", e)))
}

/// Text of a host document with accessors for its embedded tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDocument {
    text: String,
}

impl EmbeddedDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Identity token, or an empty string when the document carries none.
    pub fn file_key(&self) -> &str {
        FILE_KEY_TOKEN
            .captures(&self.text)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str())
    }

    pub fn has_payload(&self) -> bool {
        DATA_TOKEN.is_match(&self.text)
    }

    /// Decodes the embedded conversations.
    ///
    /// A missing or empty data token yields no records; a token that does not
    /// decode to a JSON array of records is a `ChatError::Payload`.
    pub fn records(&self) -> Result<Vec<ConversationRecord>> {
        let raw = DATA_TOKEN
            .captures(&self.text)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str());
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let json = decode_component(raw)?;
        serde_json::from_str(&json)
            .map_err(|e| ChatError::payload(format!("embedded data is not a conversation list: {}", e)))
    }

    /// Returns a copy whose data token holds `records`.
    pub fn with_records(&self, records: &[ConversationRecord]) -> Result<Self> {
        if !self.has_payload() {
            return Err(ChatError::payload("template has no _DSDATA_ token"));
        }
        let encoded = encode_component(&serde_json::to_string(records)?);
        let token = format!(r#"_DSDATA_="{encoded}";_DSDATA_"#);
        Ok(Self::new(DATA_TOKEN.replace(&self.text, NoExpand(&token))))
    }

    /// Returns a copy whose identity token is `file_key`.
    ///
    /// Documents without an identity token are returned unchanged.
    pub fn with_file_key(&self, file_key: &str) -> Self {
        if !FILE_KEY_TOKEN.is_match(&self.text) {
            tracing::warn!("Document has no _DSFILEKEY_ token; identity left unchanged");
            return self.clone();
        }
        let token = format!(r#"_DSFILEKEY_="{file_key}";_DSFILEKEY_"#);
        Self::new(FILE_KEY_TOKEN.replace(&self.text, NoExpand(&token)))
    }
}

impl Default for EmbeddedDocument {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekchat_core::conversation::{Message, Role};

    fn sample() -> ConversationRecord {
        let mut record = ConversationRecord::new(1700000000000, "Notes \"quoted\" 100%");
        record.first_key = Some(1700000000001);
        record.messages.insert(
            1700000000001,
            Message::new(1700000000001, 1700000000002, Role::User, "你好 $1 ${x}"),
        );
        record
    }

    #[test]
    fn test_encode_matches_uri_component() {
        assert_eq!(encode_component("a b&c/d"), "a%20b%26c%2Fd");
        assert_eq!(encode_component("-_.!~*'()"), "-_.!~*'()");
        assert_eq!(encode_component("\"{}\""), "%22%7B%7D%22");
        assert_eq!(encode_component("é"), "%C3%A9");
        assert_eq!(decode_component("%C3%A9%20x").unwrap(), "é x");
    }

    #[test]
    fn test_default_template_is_empty() {
        let document = EmbeddedDocument::default();
        assert!(document.has_payload());
        assert_eq!(document.file_key(), "");
        assert!(document.records().unwrap().is_empty());
    }

    #[test]
    fn test_records_survive_substitution() {
        let document = EmbeddedDocument::default()
            .with_records(&[sample()])
            .unwrap();
        assert!(!document.text().contains("你好"));
        assert_eq!(document.records().unwrap(), vec![sample()]);

        // Replacing again swaps the payload rather than appending.
        let replaced = document.with_records(&[]).unwrap();
        assert!(replaced.records().unwrap().is_empty());
        assert_eq!(replaced.text().matches("_DSDATA_=").count(), 1);
    }

    #[test]
    fn test_file_key_substitution() {
        let document = EmbeddedDocument::default().with_file_key("abc-123");
        assert_eq!(document.file_key(), "abc-123");
        assert_eq!(document.with_file_key("$0").file_key(), "$0");

        let bare = EmbeddedDocument::new("<html></html>");
        assert_eq!(bare.with_file_key("x"), bare);
    }

    #[test]
    fn test_missing_data_token() {
        let bare = EmbeddedDocument::new("<html></html>");
        assert!(bare.records().unwrap().is_empty());
        let err = bare.with_records(&[sample()]).unwrap_err();
        assert!(matches!(err, ChatError::Payload(_)));
    }

    #[test]
    fn test_malformed_payload() {
        let document = EmbeddedDocument::new(r#"_DSDATA_="%7Bnot%20json";_DSDATA_"#);
        let err = document.records().unwrap_err();
        assert!(matches!(err, ChatError::Payload(_)));
    }

    #[test]
    fn test_reads_browser_export_payload() {
        let json = r#"[{"key":5,"label":"a","firstKey":6,"messages":{"6":{"key":6,"groupKey":7,"role":"user","content":"hi"}},"inputText":"","openReasoning":true,"temperature":0.7}]"#;
        let text = format!(r#"<script>_DSDATA_="{}";_DSDATA_</script>"#, encode_component(json));
        let records = EmbeddedDocument::new(text).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].messages[&6].group_key, 7);
        assert!(records[0].open_reasoning);
    }
}
