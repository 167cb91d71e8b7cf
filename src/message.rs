use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Index document id. Stable for the lifetime of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub u32);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.email.as_deref())
            .unwrap_or("")
    }
}

/// Message flags as reported by the index. The declaration order is the
/// canonical order used when drawing the flags column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Draft,
    Flagged,
    New,
    Passed,
    Replied,
    Seen,
    Trashed,
    Attach,
    Encrypted,
    Signed,
    Unread,
    List,
    Personal,
    Calendar,
}

impl Flag {
    pub const CANONICAL: [Flag; 14] = [
        Flag::Draft,
        Flag::Flagged,
        Flag::New,
        Flag::Passed,
        Flag::Replied,
        Flag::Seen,
        Flag::Trashed,
        Flag::Attach,
        Flag::Encrypted,
        Flag::Signed,
        Flag::Unread,
        Flag::List,
        Flag::Personal,
        Flag::Calendar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Flag::Draft => "draft",
            Flag::Flagged => "flagged",
            Flag::New => "new",
            Flag::Passed => "passed",
            Flag::Replied => "replied",
            Flag::Seen => "seen",
            Flag::Trashed => "trashed",
            Flag::Attach => "attach",
            Flag::Encrypted => "encrypted",
            Flag::Signed => "signed",
            Flag::Unread => "unread",
            Flag::List => "list",
            Flag::Personal => "personal",
            Flag::Calendar => "calendar",
        }
    }

    pub fn parse(s: &str) -> Option<Flag> {
        Flag::CANONICAL.into_iter().find(|f| f.name() == s)
    }
}

/// Position of a message in the conversation tree reconstructed by the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDescriptor {
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub has_child: bool,
    #[serde(default)]
    pub is_last_child: bool,
    #[serde(default)]
    pub is_empty_parent: bool,
    #[serde(default)]
    pub is_first_child: bool,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default, alias = "path")]
    pub sort_path: String,
}

impl ThreadDescriptor {
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Path of the thread root this row belongs to.
    pub fn root_path(&self) -> &str {
        self.sort_path
            .split(':')
            .next()
            .unwrap_or(self.sort_path.as_str())
    }

    /// Whether `self` lies at or below the node at `path`.
    pub fn is_within(&self, path: &str) -> bool {
        match self.sort_path.strip_prefix(path) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }
}

/// One message summary as delivered by the index. Owned by the caller; the
/// headers core only borrows it, apart from re-attaching thread info onto
/// update events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub docid: DocId,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<Contact>,
    #[serde(default)]
    pub to: Vec<Contact>,
    #[serde(default)]
    pub cc: Vec<Contact>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub maildir: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thread: Option<ThreadDescriptor>,
    /// Extra headers requested by custom fields, keyed by lowercase name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl MessageRecord {
    pub fn new(docid: DocId) -> Self {
        MessageRecord {
            docid,
            message_id: String::new(),
            subject: String::new(),
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            date: None,
            flags: Vec::new(),
            size: 0,
            maildir: String::new(),
            path: String::new(),
            list: None,
            tags: Vec::new(),
            thread: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_unread(&self) -> bool {
        self.has_flag(Flag::Unread) || self.has_flag(Flag::New)
    }
}

/// Mark indicator drawn in the leftmost column. Bookkeeping of what a mark
/// means belongs to the marking subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Delete,
    Flag,
    Move,
    Read,
    Refile,
    Tag,
    Trash,
    Unflag,
    Unread,
    Untrash,
    Something,
}

impl Mark {
    pub fn glyph(self, fancy: bool) -> &'static str {
        match (self, fancy) {
            (Mark::Delete, false) => "D",
            (Mark::Delete, true) => "✖",
            (Mark::Flag, false) => "+",
            (Mark::Flag, true) => "✚",
            (Mark::Move, false) => "m",
            (Mark::Move, true) => "▷",
            (Mark::Read, false) => "!",
            (Mark::Read, true) => "◼",
            (Mark::Refile, false) => "r",
            (Mark::Refile, true) => "▶",
            (Mark::Tag, false) => "g",
            (Mark::Tag, true) => "✓",
            (Mark::Trash, false) => "d",
            (Mark::Trash, true) => "♻",
            (Mark::Unflag, false) => "-",
            (Mark::Unflag, true) => "➖",
            (Mark::Unread, false) => "?",
            (Mark::Unread, true) => "□",
            (Mark::Untrash, false) => "=",
            (Mark::Untrash, true) => "▲",
            (Mark::Something, false) => "*",
            (Mark::Something, true) => "✱",
        }
    }

    pub fn parse(s: &str) -> Option<Mark> {
        let mark = match s {
            "delete" => Mark::Delete,
            "flag" => Mark::Flag,
            "move" => Mark::Move,
            "read" => Mark::Read,
            "refile" => Mark::Refile,
            "tag" => Mark::Tag,
            "trash" => Mark::Trash,
            "unflag" => Mark::Unflag,
            "unread" => Mark::Unread,
            "untrash" => Mark::Untrash,
            "something" => Mark::Something,
            _ => return None,
        };
        Some(mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_at(path: &str) -> ThreadDescriptor {
        ThreadDescriptor {
            sort_path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let msg: MessageRecord = serde_json::from_str(
            r#"{"docid": 7, "subject": "hi", "flags": ["unread", "attach"],
                "thread": {"depth": 1, "is_last_child": true, "path": "0001:0002"}}"#,
        )
        .unwrap();
        assert_eq!(msg.docid, DocId(7));
        assert!(msg.is_unread());
        assert!(msg.has_flag(Flag::Attach));
        let thread = msg.thread.unwrap();
        assert_eq!(thread.depth, 1);
        assert_eq!(thread.sort_path, "0001:0002");
        assert_eq!(thread.root_path(), "0001");
    }

    #[test]
    fn test_is_within_respects_path_components() {
        assert!(thread_at("0001:0002").is_within("0001"));
        assert!(thread_at("0001").is_within("0001"));
        assert!(!thread_at("00012").is_within("0001"));
        assert!(!thread_at("0002:0001").is_within("0001"));
    }

    #[test]
    fn test_contact_display_name_falls_back_to_email() {
        let named = Contact {
            name: Some("Ann".into()),
            email: Some("ann@example.com".into()),
        };
        let bare = Contact {
            name: Some(String::new()),
            email: Some("bob@example.com".into()),
        };
        assert_eq!(named.display_name(), "Ann");
        assert_eq!(bare.display_name(), "bob@example.com");
    }

    #[test]
    fn test_flag_parse_round_trips_names() {
        for flag in Flag::CANONICAL {
            assert_eq!(Flag::parse(flag.name()), Some(flag));
        }
        assert_eq!(Flag::parse("bogus"), None);
    }
}
