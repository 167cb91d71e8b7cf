//! Column rendering for header rows.
//!
//! A [`HeaderFormatter`] turns one [`MessageRecord`] into a line of fixed and
//! variable width columns. Two alignment strategies exist: the fast one
//! counts grapheme clusters and is approximate for wide glyphs, the precise
//! one measures display cells and pads every column to its exact boundary.

use crate::config::{CustomFieldConfig, HeadersConfig};
use crate::error::HeadersError;
use crate::message::{Contact, Flag, Mark, MessageRecord};
use chrono::{Local, NaiveDate, TimeZone};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

pub const ELLIPSIS: &str = "…";
/// Width of the mark indicator column in front of every row.
pub const MARK_WIDTH: usize = 2;
const SUBJECT_CAP: usize = 600;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldId {
    Date,
    FullDate,
    Flags,
    MailingList,
    From,
    Subject,
    To,
    Cc,
    FromOrTo,
    ThreadSubject,
    Size,
    Maildir,
    Path,
    MessageId,
    Tags,
    Custom(String),
}

impl FieldId {
    /// Unknown names become custom fields; whether a resolver exists is
    /// checked when the formatter is built.
    pub fn parse(name: &str) -> FieldId {
        match name {
            "date" => FieldId::Date,
            "full-date" => FieldId::FullDate,
            "flags" => FieldId::Flags,
            "mailing-list" => FieldId::MailingList,
            "from" => FieldId::From,
            "subject" => FieldId::Subject,
            "to" => FieldId::To,
            "cc" => FieldId::Cc,
            "from-or-to" => FieldId::FromOrTo,
            "thread-subject" => FieldId::ThreadSubject,
            "size" => FieldId::Size,
            "maildir" => FieldId::Maildir,
            "path" => FieldId::Path,
            "message-id" => FieldId::MessageId,
            "tags" => FieldId::Tags,
            other => FieldId::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FieldId::Date => "date",
            FieldId::FullDate => "full-date",
            FieldId::Flags => "flags",
            FieldId::MailingList => "mailing-list",
            FieldId::From => "from",
            FieldId::Subject => "subject",
            FieldId::To => "to",
            FieldId::Cc => "cc",
            FieldId::FromOrTo => "from-or-to",
            FieldId::ThreadSubject => "thread-subject",
            FieldId::Size => "size",
            FieldId::Maildir => "maildir",
            FieldId::Path => "path",
            FieldId::MessageId => "message-id",
            FieldId::Tags => "tags",
            FieldId::Custom(name) => name,
        }
    }

    fn short_name(&self) -> &'static str {
        match self {
            FieldId::Date | FieldId::FullDate => "Date",
            FieldId::Flags => "Flgs",
            FieldId::MailingList => "List",
            FieldId::From => "From",
            FieldId::Subject | FieldId::ThreadSubject => "Subject",
            FieldId::To => "To",
            FieldId::Cc => "Cc",
            FieldId::FromOrTo => "From/To",
            FieldId::Size => "Size",
            FieldId::Maildir => "Maildir",
            FieldId::Path => "Path",
            FieldId::MessageId => "Message-Id",
            FieldId::Tags => "Tags",
            FieldId::Custom(_) => "",
        }
    }

    fn style(&self) -> StyleTag {
        match self {
            FieldId::Date | FieldId::FullDate => StyleTag::Date,
            FieldId::Flags => StyleTag::Flags,
            FieldId::MailingList => StyleTag::MailingList,
            FieldId::From | FieldId::To | FieldId::Cc | FieldId::FromOrTo => StyleTag::Contact,
            FieldId::Subject | FieldId::ThreadSubject => StyleTag::Subject,
            FieldId::Size => StyleTag::Size,
            FieldId::Maildir | FieldId::Path => StyleTag::Location,
            FieldId::MessageId => StyleTag::MessageId,
            FieldId::Tags => StyleTag::Tags,
            FieldId::Custom(_) => StyleTag::Custom,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered columns with their widths. `None` is unrestricted and only
/// allowed on the last column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    entries: Vec<(FieldId, Option<usize>)>,
}

impl FieldLayout {
    pub fn new(entries: Vec<(FieldId, Option<usize>)>) -> Result<Self, HeadersError> {
        let last = entries.len().saturating_sub(1);
        for (idx, (field, width)) in entries.iter().enumerate() {
            match width {
                None if idx != last => {
                    return Err(HeadersError::config(
                        field.name(),
                        "only the last field may have unrestricted width",
                    ))
                }
                Some(0) => return Err(HeadersError::config(field.name(), "width must be > 0")),
                _ => {}
            }
        }
        Ok(FieldLayout { entries })
    }

    pub fn entries(&self) -> &[(FieldId, Option<usize>)] {
        &self.entries
    }
}

/// Style classes attached to spans of a rendered row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StyleTag {
    Header,
    Unread,
    Flagged,
    Draft,
    Trashed,
    Replied,
    Forwarded,
    Mark,
    ThreadPrefix,
    Date,
    Flags,
    MailingList,
    Contact,
    Subject,
    Size,
    Location,
    MessageId,
    Tags,
    Custom,
    Extra(String),
}

impl StyleTag {
    /// Whole-line style derived from the message state.
    pub fn for_message(msg: &MessageRecord) -> StyleTag {
        if msg.has_flag(Flag::Trashed) {
            StyleTag::Trashed
        } else if msg.has_flag(Flag::Draft) {
            StyleTag::Draft
        } else if msg.is_unread() {
            StyleTag::Unread
        } else if msg.has_flag(Flag::Flagged) {
            StyleTag::Flagged
        } else if msg.has_flag(Flag::Replied) {
            StyleTag::Replied
        } else if msg.has_flag(Flag::Passed) {
            StyleTag::Forwarded
        } else {
            StyleTag::Header
        }
    }
}

/// Byte range of `text` in a rendered line and its style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRange {
    pub start: usize,
    pub end: usize,
    pub tag: StyleTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub text: String,
    pub style_ranges: Vec<StyleRange>,
    /// Display columns each precisely aligned field was padded to.
    pub column_stops: Vec<usize>,
}

pub type FieldResolver = Box<dyn Fn(&MessageRecord) -> String + Send + Sync>;
pub type FieldPropertiesHook = Box<dyn Fn(&FieldId, &MessageRecord) -> Option<StyleTag> + Send + Sync>;

/// Extra style for contact columns that name one of the user's addresses.
pub const PERSONAL: &str = "personal";

pub fn personal_contacts_hook(my_email: Regex) -> FieldPropertiesHook {
    Box::new(move |field: &FieldId, msg: &MessageRecord| {
        let mine = |list: &[Contact]| {
            list.iter()
                .filter_map(|c| c.email.as_deref())
                .any(|email| my_email.is_match(email))
        };
        let personal = match field {
            FieldId::From => mine(&msg.from),
            FieldId::To => mine(&msg.to),
            FieldId::Cc => mine(&msg.cc),
            FieldId::FromOrTo => mine(&msg.from) || mine(&msg.to),
            _ => false,
        };
        personal.then(|| StyleTag::Extra(PERSONAL.to_string()))
    })
}

struct CustomField {
    shortname: String,
    resolver: FieldResolver,
}

/// Resolvers for custom fields, keyed by field name.
#[derive(Default)]
pub struct FieldRegistry {
    fields: HashMap<String, CustomField>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one header-reading resolver per configured custom field.
    pub fn from_config(custom: &[CustomFieldConfig]) -> Self {
        let mut registry = Self::new();
        for field in custom {
            let header = field.header.clone();
            registry.register(&field.name, &field.shortname, move |msg| {
                msg.headers.get(&header).cloned().unwrap_or_default()
            });
        }
        registry
    }

    pub fn register<F>(&mut self, name: &str, shortname: &str, resolver: F)
    where
        F: Fn(&MessageRecord) -> String + Send + Sync + 'static,
    {
        self.fields.insert(
            name.to_string(),
            CustomField {
                shortname: shortname.to_string(),
                resolver: Box::new(resolver),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

fn flag_glyph(flag: Flag, fancy: bool) -> &'static str {
    let (ascii, unicode) = match flag {
        Flag::Draft => ("D", "⚒"),
        Flag::Flagged => ("F", "✚"),
        Flag::New => ("N", "✱"),
        Flag::Passed => ("P", "❯"),
        Flag::Replied => ("R", "❮"),
        Flag::Seen => ("S", "✔"),
        Flag::Trashed => ("T", "⏚"),
        Flag::Attach => ("a", "⚓"),
        Flag::Encrypted => ("x", "⚴"),
        Flag::Signed => ("s", "☡"),
        Flag::Unread => ("u", "⎕"),
        Flag::List => ("l", "ⓛ"),
        Flag::Personal => ("p", "ⓟ"),
        Flag::Calendar => ("c", "Ⓒ"),
    };
    if fancy {
        unicode
    } else {
        ascii
    }
}

pub struct HeaderFormatter {
    layout: FieldLayout,
    precise: bool,
    fancy: bool,
    date_format: String,
    time_format: String,
    full_date_format: String,
    from_prefix: String,
    to_prefix: String,
    my_email: Regex,
    mailing_lists: BTreeMap<String, String>,
    registry: FieldRegistry,
    properties_hook: Option<FieldPropertiesHook>,
    today: Option<NaiveDate>,
}

impl HeaderFormatter {
    /// Fails when a configured custom field has no resolver in `registry`.
    pub fn new(config: &HeadersConfig, registry: FieldRegistry) -> Result<Self, HeadersError> {
        for (field, _) in config.fields.entries() {
            if let FieldId::Custom(name) = field {
                if !registry.contains(name) {
                    return Err(HeadersError::config(name, "no renderer registered"));
                }
            }
        }
        let my_email = Regex::new(&config.my_email_regex)
            .map_err(|e| HeadersError::config("my_email_regex", e.to_string()))?;

        Ok(HeaderFormatter {
            layout: config.fields.clone(),
            precise: config.precise_alignment,
            fancy: config.fancy_glyphs,
            date_format: config.date_format.clone(),
            time_format: config.time_format.clone(),
            full_date_format: config.full_date_format.clone(),
            from_prefix: config.from_prefix.clone(),
            to_prefix: config.to_prefix.clone(),
            my_email,
            mailing_lists: config.mailing_lists.clone(),
            registry,
            properties_hook: None,
            today: None,
        })
    }

    pub fn set_properties_hook(&mut self, hook: FieldPropertiesHook) {
        self.properties_hook = Some(hook);
    }

    pub fn fancy(&self) -> bool {
        self.fancy
    }

    #[cfg(test)]
    fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Value of one field, before any width handling. `prefix` is the
    /// row's thread prefix.
    pub fn field_value(
        &self,
        field: &FieldId,
        msg: &MessageRecord,
        prefix: &str,
    ) -> Result<String, HeadersError> {
        let value = match field {
            FieldId::Date => self.human_date(msg),
            FieldId::FullDate => self.format_date(msg, &self.full_date_format),
            FieldId::Flags => Flag::CANONICAL
                .iter()
                .filter(|f| msg.has_flag(**f))
                .map(|f| flag_glyph(*f, self.fancy))
                .collect(),
            FieldId::MailingList => self.mailing_list(msg),
            FieldId::From => contacts(&msg.from),
            FieldId::To => contacts(&msg.to),
            FieldId::Cc => contacts(&msg.cc),
            FieldId::FromOrTo => self.from_or_to(msg),
            FieldId::Subject => capped_subject(prefix, &msg.subject),
            FieldId::ThreadSubject => {
                let shows_subject = match &msg.thread {
                    None => true,
                    Some(t) => t.is_root() || t.is_empty_parent,
                };
                if shows_subject {
                    capped_subject(prefix, &msg.subject)
                } else {
                    prefix.to_string()
                }
            }
            FieldId::Size => human_size(msg.size),
            FieldId::Maildir => msg.maildir.clone(),
            FieldId::Path => msg.path.clone(),
            FieldId::MessageId => msg.message_id.clone(),
            FieldId::Tags => msg.tags.join(", "),
            FieldId::Custom(name) => {
                let custom = self
                    .registry
                    .fields
                    .get(name)
                    .ok_or_else(|| HeadersError::config(name, "no renderer registered"))?;
                (custom.resolver)(msg)
            }
        };
        Ok(value)
    }

    /// Render one field fitted to `width`, the way it appears in a row.
    /// A zero width renders nothing.
    pub fn render(
        &self,
        field: &FieldId,
        msg: &MessageRecord,
        prefix: &str,
        width: Option<usize>,
    ) -> Result<String, HeadersError> {
        let value = self.field_value(field, msg, prefix)?;
        Ok(match width {
            None => value,
            Some(0) => String::new(),
            Some(w) if self.precise => format!("{} ", fit_cells(&value, w - 1)),
            Some(w) => format!("{} ", fit_graphemes(&value, w)),
        })
    }

    /// Build the complete row line: mark column followed by every field.
    pub fn render_line(
        &self,
        msg: &MessageRecord,
        prefix: &str,
        mark: Option<Mark>,
    ) -> Result<RenderedLine, HeadersError> {
        let mut builder = LineBuilder::new(self.precise);
        builder.push_mark(mark.map(|m| m.glyph(self.fancy)));

        for (field, width) in self.layout.entries() {
            let value = self.field_value(field, msg, prefix)?;
            let start = builder.text.len();
            builder.push_field(&value, *width);
            let end = builder.text.len();
            builder.ranges.push(StyleRange {
                start,
                end,
                tag: field.style(),
            });
            if matches!(field, FieldId::Subject | FieldId::ThreadSubject)
                && !prefix.is_empty()
                && builder.text[start..].starts_with(prefix)
            {
                builder.ranges.push(StyleRange {
                    start,
                    end: start + prefix.len(),
                    tag: StyleTag::ThreadPrefix,
                });
            }
            if let Some(tag) = self.properties_hook.as_ref().and_then(|hook| hook(field, msg)) {
                builder.ranges.push(StyleRange { start, end, tag });
            }
        }

        Ok(builder.finish(StyleTag::for_message(msg)))
    }

    /// Column titles aligned like the rows.
    pub fn header_line(&self) -> String {
        let mut builder = LineBuilder::new(self.precise);
        builder.push_mark(None);
        for (field, width) in self.layout.entries() {
            let title = match field {
                FieldId::Custom(name) => self
                    .registry
                    .fields
                    .get(name)
                    .map(|c| c.shortname.as_str())
                    .unwrap_or(name.as_str()),
                other => other.short_name(),
            };
            builder.push_field(title, *width);
        }
        builder.text.trim_end().to_string()
    }

    fn format_date(&self, msg: &MessageRecord, pattern: &str) -> String {
        msg.date
            .and_then(|secs| Local.timestamp_opt(secs, 0).single())
            .map(|dt| dt.format(pattern).to_string())
            .unwrap_or_default()
    }

    fn human_date(&self, msg: &MessageRecord) -> String {
        let Some(dt) = msg.date.and_then(|secs| Local.timestamp_opt(secs, 0).single()) else {
            return String::new();
        };
        if dt.date_naive() == self.today() {
            dt.format(&self.time_format).to_string()
        } else {
            dt.format(&self.date_format).to_string()
        }
    }

    fn from_or_to(&self, msg: &MessageRecord) -> String {
        let from_me = msg
            .from
            .first()
            .and_then(|c| c.email.as_deref())
            .is_some_and(|email| !email.is_empty() && self.my_email.is_match(email));
        if from_me {
            format!("{}{}", self.to_prefix, contacts(&msg.to))
        } else {
            format!("{}{}", self.from_prefix, contacts(&msg.from))
        }
    }

    fn mailing_list(&self, msg: &MessageRecord) -> String {
        let Some(list) = msg.list.as_deref() else {
            return String::new();
        };
        let list_id = list.trim().trim_start_matches('<').trim_end_matches('>');
        if let Some(short) = self.mailing_lists.get(list_id) {
            return short.clone();
        }
        list_id.split('.').next().unwrap_or(list_id).to_string()
    }
}

struct LineBuilder {
    precise: bool,
    text: String,
    column: usize,
    ranges: Vec<StyleRange>,
    stops: Vec<usize>,
}

impl LineBuilder {
    fn new(precise: bool) -> Self {
        LineBuilder {
            precise,
            text: String::new(),
            column: 0,
            ranges: Vec::new(),
            stops: Vec::new(),
        }
    }

    fn push_mark(&mut self, glyph: Option<&str>) {
        let glyph = glyph.unwrap_or("");
        let rendered = pad_cells(glyph, MARK_WIDTH);
        if !glyph.is_empty() {
            self.ranges.push(StyleRange {
                start: 0,
                end: glyph.len(),
                tag: StyleTag::Mark,
            });
        }
        self.text.push_str(&rendered);
        self.column = MARK_WIDTH;
    }

    fn push_field(&mut self, value: &str, width: Option<usize>) {
        match width {
            None => self.text.push_str(value),
            Some(0) => {}
            Some(w) if self.precise => {
                self.text.push_str(&fit_cells(value, w - 1));
                self.text.push(' ');
                self.column += w;
                let current = self.text.width();
                if current < self.column {
                    self.text.push_str(&" ".repeat(self.column - current));
                }
                self.stops.push(self.column);
            }
            Some(w) => {
                self.text.push_str(&fit_graphemes(value, w));
                self.text.push(' ');
            }
        }
    }

    fn finish(self, line_tag: StyleTag) -> RenderedLine {
        let mut style_ranges = Vec::with_capacity(self.ranges.len() + 1);
        style_ranges.push(StyleRange {
            start: 0,
            end: self.text.len(),
            tag: line_tag,
        });
        style_ranges.extend(self.ranges);
        RenderedLine {
            text: self.text,
            style_ranges,
            column_stops: self.stops,
        }
    }
}

fn contacts(list: &[Contact]) -> String {
    list.iter()
        .map(Contact::display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn capped_subject(prefix: &str, subject: &str) -> String {
    format!("{}{}", prefix, subject)
        .chars()
        .take(SUBJECT_CAP)
        .collect()
}

fn human_size(size: u64) -> String {
    if size >= 1_000_000 {
        format!("{:.1}M", size as f64 / 1_000_000.0)
    } else if size >= 1000 {
        format!("{:.1}K", size as f64 / 1000.0)
    } else {
        size.to_string()
    }
}

/// Fast truncation: `width` grapheme clusters, ellipsis when cut, space padded.
fn fit_graphemes(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let count = value.graphemes(true).count();
    if count > width {
        let mut out: String = value.graphemes(true).take(width.saturating_sub(1)).collect();
        out.push_str(ELLIPSIS);
        out
    } else {
        let mut out = value.to_string();
        out.push_str(&" ".repeat(width - count));
        out
    }
}

/// Precise truncation: at most `cells` display columns, ellipsis when cut,
/// space padded to exactly `cells`.
fn fit_cells(value: &str, cells: usize) -> String {
    if value.width() <= cells {
        return pad_cells(value, cells);
    }
    let budget = cells.saturating_sub(ELLIPSIS.width());
    let mut out = String::new();
    let mut used = 0;
    for g in value.graphemes(true) {
        let w = g.width();
        if used + w > budget {
            break;
        }
        out.push_str(g);
        used += w;
    }
    if cells > 0 {
        out.push_str(ELLIPSIS);
    }
    pad_cells(&out, cells)
}

fn pad_cells(value: &str, cells: usize) -> String {
    let w = value.width();
    if w >= cells {
        value.to_string()
    } else {
        format!("{}{}", value, " ".repeat(cells - w))
    }
}
