use crate::fields::{FieldId, FieldLayout};
use crate::session::{SortDirection, SortField};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub headers: HeadersConfig,
}

/// Everything the headers list needs to know about presentation and query
/// defaults. Hooks are registered in code, not here.
#[derive(Debug, Clone)]
pub struct HeadersConfig {
    pub fields: FieldLayout,
    pub precise_alignment: bool,
    pub fancy_glyphs: bool,
    /// `None` means unlimited (`-1` in the file).
    pub results_limit: Option<u32>,
    pub show_threads: bool,
    pub skip_duplicates: bool,
    pub include_related: bool,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub history_depth: usize,
    pub date_format: String,
    pub time_format: String,
    pub full_date_format: String,
    pub from_prefix: String,
    pub to_prefix: String,
    pub my_email_regex: String,
    pub mailing_lists: BTreeMap<String, String>,
    pub custom_fields: Vec<CustomFieldConfig>,
    /// Words replaced by their expansion before a query reaches the index.
    pub query_aliases: BTreeMap<String, String>,
}

/// A custom column that shows one extra header of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldConfig {
    pub name: String,
    pub header: String,
    pub shortname: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    headers: RawHeadersConfig,
    #[serde(default)]
    mail: RawMailConfig,
    #[serde(default)]
    mailing_lists: BTreeMap<String, String>,
    #[serde(default)]
    custom_fields: BTreeMap<String, RawCustomField>,
    #[serde(default)]
    query_aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHeadersConfig {
    #[serde(default = "default_fields")]
    fields: Vec<RawField>,
    #[serde(default)]
    precise_alignment: bool,
    #[serde(default)]
    fancy_glyphs: bool,
    #[serde(default = "default_results_limit")]
    results_limit: i64,
    #[serde(default = "default_true")]
    show_threads: bool,
    #[serde(default = "default_true")]
    skip_duplicates: bool,
    #[serde(default)]
    include_related: bool,
    #[serde(default = "default_sort_field")]
    sort_field: String,
    #[serde(default = "default_sort_direction")]
    sort_direction: String,
    #[serde(default = "default_history_depth")]
    history_depth: usize,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default = "default_time_format")]
    time_format: String,
    #[serde(default = "default_full_date_format")]
    full_date_format: String,
    #[serde(default)]
    from_prefix: String,
    #[serde(default = "default_to_prefix")]
    to_prefix: String,
}

impl Default for RawHeadersConfig {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            precise_alignment: false,
            fancy_glyphs: false,
            results_limit: default_results_limit(),
            show_threads: true,
            skip_duplicates: true,
            include_related: false,
            sort_field: default_sort_field(),
            sort_direction: default_sort_direction(),
            history_depth: default_history_depth(),
            date_format: default_date_format(),
            time_format: default_time_format(),
            full_date_format: default_full_date_format(),
            from_prefix: String::new(),
            to_prefix: default_to_prefix(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    field: String,
    #[serde(default)]
    width: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMailConfig {
    #[serde(default = "default_my_email_regex")]
    my_email_regex: String,
}

impl Default for RawMailConfig {
    fn default() -> Self {
        Self {
            my_email_regex: default_my_email_regex(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCustomField {
    header: Option<String>,
    #[serde(default)]
    shortname: Option<String>,
}

fn default_fields() -> Vec<RawField> {
    [
        ("date", Some(12)),
        ("flags", Some(6)),
        ("mailing-list", Some(10)),
        ("from", Some(22)),
        ("subject", None),
    ]
    .into_iter()
    .map(|(field, width)| RawField {
        field: field.to_string(),
        width,
    })
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_results_limit() -> i64 {
    500
}

fn default_sort_field() -> String {
    "date".to_string()
}

fn default_sort_direction() -> String {
    "descending".to_string()
}

fn default_history_depth() -> usize {
    20
}

fn default_date_format() -> String {
    "%x".to_string()
}

fn default_time_format() -> String {
    "%X".to_string()
}

fn default_full_date_format() -> String {
    "%c".to_string()
}

fn default_to_prefix() -> String {
    "To ".to_string()
}

fn default_my_email_regex() -> String {
    "^$".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Regex::new(&raw.mail.my_email_regex).map_err(|e| {
            ConfigError::Parse(format!(
                "invalid regex '{}' for my_email_regex: {}",
                raw.mail.my_email_regex, e
            ))
        })?;

        let h = raw.headers;

        let entries = h
            .fields
            .into_iter()
            .map(|f| (FieldId::parse(&f.field), f.width))
            .collect();
        let fields = FieldLayout::new(entries).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let results_limit = match h.results_limit {
            -1 => None,
            n if n > 0 => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            n => {
                return Err(ConfigError::Parse(format!(
                    "results_limit must be positive or -1, got {}",
                    n
                )))
            }
        };

        let sort_field = SortField::parse(&h.sort_field).ok_or_else(|| {
            ConfigError::Parse(format!("unknown sort_field '{}'", h.sort_field))
        })?;
        let sort_direction = SortDirection::parse(&h.sort_direction).ok_or_else(|| {
            ConfigError::Parse(format!("unknown sort_direction '{}'", h.sort_direction))
        })?;

        if h.history_depth == 0 {
            return Err(ConfigError::Parse(
                "history_depth must be greater than 0".to_string(),
            ));
        }

        let mut custom_fields = Vec::new();
        for (name, field) in raw.custom_fields {
            let header = field.header.ok_or_else(|| {
                ConfigError::Parse(format!("missing header in [custom_fields.{}]", name))
            })?;
            custom_fields.push(CustomFieldConfig {
                shortname: field.shortname.unwrap_or_else(|| name.clone()),
                header: header.to_lowercase(),
                name,
            });
        }

        if let Some(name) = raw
            .query_aliases
            .keys()
            .find(|name| name.is_empty() || name.contains(char::is_whitespace))
        {
            return Err(ConfigError::Parse(format!(
                "query alias '{}' must be a single word",
                name
            )));
        }

        Ok(Config {
            headers: HeadersConfig {
                fields,
                precise_alignment: h.precise_alignment,
                fancy_glyphs: h.fancy_glyphs,
                results_limit,
                show_threads: h.show_threads,
                skip_duplicates: h.skip_duplicates,
                include_related: h.include_related,
                sort_field,
                sort_direction,
                history_depth: h.history_depth,
                date_format: h.date_format,
                time_format: h.time_format,
                full_date_format: h.full_date_format,
                from_prefix: h.from_prefix,
                to_prefix: h.to_prefix,
                my_email_regex: raw.mail.my_email_regex,
                mailing_lists: raw.mailing_lists,
                custom_fields,
                query_aliases: raw.query_aliases,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap().headers;
        assert_eq!(config.results_limit, Some(500));
        assert_eq!(config.history_depth, 20);
        assert!(config.show_threads);
        assert!(!config.precise_alignment);
        assert_eq!(config.sort_field, SortField::Date);
        assert_eq!(config.sort_direction, SortDirection::Descending);
        assert_eq!(config.fields.entries().len(), 5);
        assert_eq!(config.fields.entries()[4], (FieldId::Subject, None));
        assert_eq!(config.to_prefix, "To ");
    }

    #[test]
    fn test_parse_fields_and_flags() {
        let config = Config::parse(
            r#"
[headers]
fields = [
    { field = "date", width = 10 },
    { field = "from-or-to", width = 20 },
    { field = "thread-subject" },
]
precise_alignment = true
fancy_glyphs = true
results_limit = -1
history_depth = 5
"#,
        )
        .unwrap()
        .headers;

        assert!(config.precise_alignment);
        assert!(config.fancy_glyphs);
        assert_eq!(config.results_limit, None);
        assert_eq!(config.history_depth, 5);
        assert_eq!(
            config.fields.entries(),
            &[
                (FieldId::Date, Some(10)),
                (FieldId::FromOrTo, Some(20)),
                (FieldId::ThreadSubject, None),
            ]
        );
    }

    #[test]
    fn test_unrestricted_width_only_last() {
        let err = Config::parse(
            r#"
[headers]
fields = [{ field = "from" }, { field = "subject", width = 30 }]
"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Parse(msg) => assert!(msg.contains("'from'"), "got: {}", msg),
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn test_unknown_key_errors() {
        let err = Config::parse("[headers]\ncolour = true\n").unwrap_err();
        match err {
            ConfigError::Parse(msg) => assert!(msg.contains("unknown field"), "got: {}", msg),
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn test_invalid_regex_validation() {
        let err = Config::parse("[mail]\nmy_email_regex = \"(\"").unwrap_err();
        match err {
            ConfigError::Parse(msg) => {
                assert!(msg.contains("invalid regex"), "got: {}", msg);
                assert!(msg.contains("my_email_regex"), "got: {}", msg);
            }
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn test_bad_sort_and_limit() {
        assert!(Config::parse("[headers]\nsort_field = \"colour\"").is_err());
        assert!(Config::parse("[headers]\nsort_direction = \"up\"").is_err());
        assert!(Config::parse("[headers]\nresults_limit = 0").is_err());
        assert!(Config::parse("[headers]\nhistory_depth = 0").is_err());
    }

    #[test]
    fn test_custom_fields_and_mailing_lists() {
        let config = Config::parse(
            r#"
[mailing_lists]
"emacs-devel.gnu.org" = "EmacsDev"

[custom_fields.mailer]
header = "X-Mailer"
shortname = "Mailer"

[custom_fields.spam]
header = "X-Spam-Score"
"#,
        )
        .unwrap()
        .headers;

        assert_eq!(
            config.mailing_lists.get("emacs-devel.gnu.org").map(String::as_str),
            Some("EmacsDev")
        );
        assert_eq!(config.custom_fields.len(), 2);
        assert_eq!(config.custom_fields[0].name, "mailer");
        assert_eq!(config.custom_fields[0].header, "x-mailer");
        assert_eq!(config.custom_fields[1].shortname, "spam");
    }

    #[test]
    fn test_custom_field_requires_header() {
        let err = Config::parse("[custom_fields.broken]\nshortname = \"B\"").unwrap_err();
        match err {
            ConfigError::Parse(msg) => assert!(msg.contains("missing header"), "got: {}", msg),
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn test_query_aliases() {
        let config = Config::parse("[query_aliases]\ninbox = \"maildir:/inbox\"")
            .unwrap()
            .headers;
        assert_eq!(
            config.query_aliases.get("inbox").map(String::as_str),
            Some("maildir:/inbox")
        );
        assert!(Config::parse("").unwrap().headers.query_aliases.is_empty());

        let err = Config::parse("[query_aliases]\n\"two words\" = \"x\"").unwrap_err();
        assert!(err.to_string().contains("single word"), "got: {}", err);
    }
}
