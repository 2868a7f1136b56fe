use serde::{Deserialize, Serialize};

/// Identifies which provider's framing conventions an outgoing system
/// context fragment should follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Generic,
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderId {
    pub fn from_str_or_generic(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "openai" => ProviderId::OpenAi,
            "anthropic" => ProviderId::Anthropic,
            "google" => ProviderId::Google,
            _ => ProviderId::Generic,
        }
    }
}

/// A provider's framing convention: a header line, a per-item prefix/suffix,
/// and an optional outer wrapper applied around the whole joined body.
#[derive(Debug, Clone, Copy)]
pub struct FramingTemplate {
    pub header: &'static str,
    pub item_prefix: &'static str,
    pub item_suffix: &'static str,
    pub wrap_open: &'static str,
    pub wrap_close: &'static str,
}

impl FramingTemplate {
    pub fn frame(&self, lines: &[String]) -> String {
        let mut body = String::new();
        if !self.header.is_empty() {
            body.push_str(self.header);
            body.push('\n');
        }
        for line in lines {
            body.push_str(self.item_prefix);
            body.push_str(line);
            body.push_str(self.item_suffix);
            body.push('\n');
        }
        let body = body.trim_end().to_string();
        format!("{}{}{}", self.wrap_open, body, self.wrap_close)
    }
}

/// Closed (provider -> framing) dispatch table. `lookup` never fails: an
/// unrecognized provider id resolves to `Generic` before reaching here.
pub const FRAMING_TABLE: &[(ProviderId, FramingTemplate)] = &[
    (
        ProviderId::Generic,
        FramingTemplate {
            header: "Current context for this user:",
            item_prefix: "- ",
            item_suffix: "",
            wrap_open: "",
            wrap_close: "",
        },
    ),
    (
        ProviderId::OpenAi,
        FramingTemplate {
            header: "Current context for this user:",
            item_prefix: "- ",
            item_suffix: "",
            wrap_open: "",
            wrap_close: "",
        },
    ),
    (
        ProviderId::Anthropic,
        FramingTemplate {
            header: "",
            item_prefix: "- ",
            item_suffix: "",
            wrap_open: "<context>\n",
            wrap_close: "\n</context>",
        },
    ),
    (
        ProviderId::Google,
        FramingTemplate {
            header: "[User Context]",
            item_prefix: "- ",
            item_suffix: "",
            wrap_open: "",
            wrap_close: "\n[End Context]",
        },
    ),
];

impl ProviderId {
    pub fn framing(self) -> FramingTemplate {
        FRAMING_TABLE
            .iter()
            .find(|(id, _)| *id == self)
            .map(|(_, t)| *t)
            .unwrap_or_else(|| {
                FRAMING_TABLE
                    .iter()
                    .find(|(id, _)| *id == ProviderId::Generic)
                    .map(|(_, t)| *t)
                    .expect("generic framing always present")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_wraps_in_context_tags() {
        let template = ProviderId::Anthropic.framing();
        let out = template.frame(&["it is morning".to_string()]);
        assert!(out.starts_with("<context>"));
        assert!(out.ends_with("</context>"));
        assert!(out.contains("- it is morning"));
    }

    #[test]
    fn google_wraps_with_markers() {
        let template = ProviderId::Google.framing();
        let out = template.frame(&["it is morning".to_string()]);
        assert!(out.starts_with("[User Context]"));
        assert!(out.ends_with("[End Context]"));
    }

    #[test]
    fn unknown_provider_falls_back_to_generic() {
        assert_eq!(ProviderId::from_str_or_generic("mistral"), ProviderId::Generic);
    }
}
