use crate::fields::{StyleRange, StyleTag, PERSONAL};
use crate::surface::{DisplaySurface, Row};
use std::io::{self, Write};

const RESET: &str = "\x1b[0m";
const REVERSE: &str = "\x1b[7m";

/// Writes a display surface to a terminal or pipe, one line per row.
pub struct AnsiWriter<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> AnsiWriter<W> {
    pub fn new(out: W, color: bool) -> Self {
        AnsiWriter { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_header(&mut self, line: &str) -> io::Result<()> {
        if self.color {
            writeln!(self.out, "\x1b[1;4m{}{}", line, RESET)
        } else {
            writeln!(self.out, "{}", line)
        }
    }

    pub fn write_row(&mut self, row: &Row, highlighted: bool) -> io::Result<()> {
        let text = row.rendered_text();
        if !self.color {
            return writeln!(self.out, "{}", text);
        }
        let base = if highlighted { REVERSE } else { "" };
        for (start, end) in segments(text.len(), row.style_ranges()) {
            let codes: String = row
                .style_ranges()
                .iter()
                .filter(|r| r.start <= start && end <= r.end)
                .filter_map(|r| sgr(&r.tag))
                .collect();
            write!(self.out, "{}{}{}{}", RESET, base, codes, &text[start..end])?;
        }
        writeln!(self.out, "{}", RESET)
    }

    pub fn write_surface(
        &mut self,
        surface: &DisplaySurface,
        header: Option<&str>,
    ) -> io::Result<()> {
        if let Some(header) = header {
            self.write_header(header)?;
        }
        let highlighted = surface.highlighted();
        for row in surface.rows() {
            self.write_row(row, highlighted == Some(row.doc_id()))?;
        }
        if let Some(banner) = surface.banner() {
            if self.color {
                writeln!(self.out, "\x1b[2m{}{}", banner, RESET)?;
            } else {
                writeln!(self.out, "{}", banner)?;
            }
        }
        self.out.flush()
    }
}

/// Split `0..len` at every range boundary.
fn segments(len: usize, ranges: &[StyleRange]) -> Vec<(usize, usize)> {
    let mut cuts: Vec<usize> = ranges
        .iter()
        .flat_map(|r| [r.start, r.end])
        .filter(|&p| p < len)
        .collect();
    cuts.push(0);
    cuts.push(len);
    cuts.sort_unstable();
    cuts.dedup();
    cuts.windows(2).map(|w| (w[0], w[1])).collect()
}

fn sgr(tag: &StyleTag) -> Option<&'static str> {
    let code = match tag {
        StyleTag::Unread => "\x1b[1m",
        StyleTag::Flagged => "\x1b[33m",
        StyleTag::Draft => "\x1b[3m",
        StyleTag::Trashed => "\x1b[9;2m",
        StyleTag::Replied | StyleTag::Forwarded => "\x1b[2m",
        StyleTag::Mark => "\x1b[1;31m",
        StyleTag::ThreadPrefix => "\x1b[34m",
        StyleTag::Date => "\x1b[36m",
        StyleTag::MailingList => "\x1b[35m",
        StyleTag::Contact => "\x1b[32m",
        StyleTag::Tags => "\x1b[33m",
        StyleTag::Extra(name) if name == PERSONAL => "\x1b[4m",
        _ => return None,
    };
    Some(code)
}
