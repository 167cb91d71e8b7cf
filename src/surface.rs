use crate::error::HeadersError;
use crate::fields::{RenderedLine, StyleRange};
use crate::message::{DocId, Mark, MessageRecord, ThreadDescriptor};
use crate::row_index::RowIndex;
use crate::session::Frontend;

/// Builds the text of a row. The thread prefix is computed once when the
/// row first arrives and handed back on every rebuild.
pub trait RowRenderer {
    fn render_row(
        &self,
        msg: &MessageRecord,
        prefix: &str,
        mark: Option<Mark>,
    ) -> Result<RenderedLine, HeadersError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    message: MessageRecord,
    prefix: String,
    line: RenderedLine,
    mark: Option<Mark>,
}

impl Row {
    pub fn build(
        message: MessageRecord,
        prefix: String,
        renderer: &dyn RowRenderer,
    ) -> Result<Row, HeadersError> {
        let line = renderer.render_row(&message, &prefix, None)?;
        Ok(Row {
            message,
            prefix,
            line,
            mark: None,
        })
    }

    pub fn doc_id(&self) -> DocId {
        self.message.docid
    }

    pub fn message(&self) -> &MessageRecord {
        &self.message
    }

    pub fn thread(&self) -> Option<&ThreadDescriptor> {
        self.message.thread.as_ref()
    }

    pub fn rendered_text(&self) -> &str {
        &self.line.text
    }

    pub fn style_ranges(&self) -> &[StyleRange] {
        &self.line.style_ranges
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn mark(&self) -> Option<Mark> {
        self.mark
    }
}

/// The ordered list of header rows plus the highlighted row, the view
/// cursor and an optional banner line below the rows.
#[derive(Debug, Clone)]
pub struct DisplaySurface {
    rows: RowIndex<Row>,
    highlighted: Option<DocId>,
    cursor: Option<DocId>,
    banner: Option<String>,
    live: bool,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface {
    pub fn new() -> Self {
        DisplaySurface {
            rows: RowIndex::new(),
            highlighted: None,
            cursor: None,
            banner: None,
            live: true,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Detach the surface; later inserts are ignored until the next clear.
    pub fn teardown(&mut self) {
        self.live = false;
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.rows.contains(doc_id)
    }

    pub fn get(&self, doc_id: DocId) -> Option<&Row> {
        self.rows.get(doc_id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|(_, row)| row)
    }

    pub fn first(&self) -> Option<DocId> {
        self.rows.first()
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn set_banner(&mut self, banner: Option<&str>) {
        self.banner = banner.map(str::to_string);
    }

    pub fn highlighted(&self) -> Option<DocId> {
        self.highlighted
    }

    pub fn cursor(&self) -> Option<DocId> {
        self.cursor
    }

    pub fn insert(&mut self, row: Row, at: Option<DocId>) {
        if !self.live {
            return;
        }
        self.rows.insert(row.doc_id(), row, at);
    }

    /// Rebuild the row for an update event. Absent ids are ignored.
    pub fn update(
        &mut self,
        mut msg: MessageRecord,
        came_from_move: bool,
        may_autoview: bool,
        renderer: &dyn RowRenderer,
        frontend: &mut dyn Frontend,
    ) -> Result<(), HeadersError> {
        if !self.live {
            return Ok(());
        }
        let doc_id = msg.docid;
        let Some(old) = self.rows.get(doc_id) else {
            return Ok(());
        };
        // update events carry no thread context
        msg.thread = old.message.thread.clone();
        let prefix = old.prefix.clone();
        let previous_highlight = self.highlighted;

        if came_from_move {
            self.remove(doc_id, frontend);
        } else {
            let rebuilt = Row::build(msg, prefix, renderer)?;
            let anchor = self.rows.next_id(doc_id);
            self.rows.remove(doc_id);
            self.rows.insert(doc_id, rebuilt, anchor);
            if may_autoview && frontend.viewed_message() == Some(doc_id) {
                if let Some(row) = self.rows.get(doc_id) {
                    frontend.view_message(&row.message);
                }
            }
        }

        match previous_highlight {
            Some(prev) if self.rows.contains(prev) => self.highlight(prev),
            _ => self.highlight(doc_id),
        }
        Ok(())
    }

    /// Remove a row if present; closes the detail view if it shows it.
    pub fn remove(&mut self, doc_id: DocId, frontend: &mut dyn Frontend) {
        let fallback = self.rows.prev_id(doc_id);
        let Some((_, next)) = self.rows.remove(doc_id) else {
            return;
        };
        if self.cursor == Some(doc_id) {
            self.cursor = next.or(fallback);
        }
        if frontend.viewed_message() == Some(doc_id) {
            frontend.close_message_view();
        }
    }

    /// User-facing removal: an absent row is an error.
    pub fn remove_header(
        &mut self,
        doc_id: DocId,
        frontend: &mut dyn Frontend,
    ) -> Result<(), HeadersError> {
        if !self.rows.contains(doc_id) {
            return Err(HeadersError::NotFound(doc_id));
        }
        self.remove(doc_id, frontend);
        Ok(())
    }

    /// Set or clear the mark indicator of a row.
    pub fn set_mark(
        &mut self,
        doc_id: DocId,
        mark: Option<Mark>,
        renderer: &dyn RowRenderer,
    ) -> Result<(), HeadersError> {
        let row = self
            .rows
            .get_mut(doc_id)
            .ok_or(HeadersError::NotFound(doc_id))?;
        if row.mark == mark {
            return Ok(());
        }
        row.line = renderer.render_row(&row.message, &row.prefix, mark)?;
        row.mark = mark;
        Ok(())
    }

    /// First row after (or before) `from` whose message satisfies `pred`.
    pub fn find_next<P>(&self, pred: P, from: Option<DocId>, backward: bool) -> Option<DocId>
    where
        P: Fn(&MessageRecord) -> bool,
    {
        self.rows
            .iter_from(from, backward)
            .find(|(_, row)| pred(&row.message))
            .map(|(id, _)| id)
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&MessageRecord),
    {
        for (_, row) in self.rows.iter() {
            f(&row.message);
        }
    }

    /// The previous highlight is dropped; the id is remembered even when no
    /// such row is currently shown.
    pub fn highlight(&mut self, doc_id: DocId) {
        self.highlighted = Some(doc_id);
    }

    pub fn set_cursor(&mut self, doc_id: DocId) -> bool {
        if self.rows.contains(doc_id) {
            self.cursor = Some(doc_id);
            true
        } else {
            false
        }
    }

    /// Move the cursor by `delta` rows, clamped to the list. Without a
    /// cursor, movement starts from the first row.
    pub fn move_cursor(&mut self, delta: isize) -> Option<DocId> {
        let start = self.cursor.filter(|id| self.rows.contains(*id));
        let mut current = match start {
            Some(id) => id,
            None => {
                self.cursor = self.rows.first();
                return self.cursor;
            }
        };
        let steps = delta.unsigned_abs();
        for _ in 0..steps {
            let step = if delta < 0 {
                self.rows.prev_id(current)
            } else {
                self.rows.next_id(current)
            };
            match step {
                Some(id) => current = id,
                None => break,
            }
        }
        self.cursor = Some(current);
        self.cursor
    }

    pub fn clear(&mut self, banner: Option<&str>) {
        self.rows.clear();
        self.highlighted = None;
        self.cursor = None;
        self.live = true;
        self.set_banner(banner);
    }

    /// Plain text of the surface: one line per row, then the banner.
    #[cfg(test)]
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.rows().map(|r| r.rendered_text().to_string()).collect();
        if let Some(banner) = &self.banner {
            lines.push(banner.clone());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingFrontend;
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct PlainRenderer;

    impl RowRenderer for PlainRenderer {
        fn render_row(
            &self,
            msg: &MessageRecord,
            prefix: &str,
            mark: Option<Mark>,
        ) -> Result<RenderedLine, HeadersError> {
            let mark = mark.map(|m| m.glyph(false)).unwrap_or(" ");
            let text = format!("{} {}{}", mark, prefix, msg.subject);
            Ok(RenderedLine {
                style_ranges: Vec::new(),
                column_stops: Vec::new(),
                text,
            })
        }
    }

    fn msg(id: u32, subject: &str) -> MessageRecord {
        let mut m = MessageRecord::new(DocId(id));
        m.subject = subject.to_string();
        m
    }

    fn row(id: u32, subject: &str) -> Row {
        Row::build(msg(id, subject), String::new(), &PlainRenderer).unwrap()
    }

    fn surface_with(ids: &[u32]) -> DisplaySurface {
        let mut surface = DisplaySurface::new();
        for &id in ids {
            surface.insert(row(id, &format!("m{}", id)), None);
        }
        surface
    }

    fn order(surface: &DisplaySurface) -> Vec<u32> {
        surface.rows().map(|r| r.doc_id().0).collect()
    }

    #[test]
    fn test_insert_before_anchor_or_end() {
        let mut surface = surface_with(&[1, 2]);
        surface.insert(row(3, "m3"), Some(DocId(2)));
        surface.insert(row(4, "m4"), Some(DocId(42)));
        assert_eq!(order(&surface), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_insert_ignored_after_teardown() {
        let mut surface = surface_with(&[1]);
        surface.teardown();
        surface.insert(row(2, "m2"), None);
        assert_eq!(order(&surface), vec![1]);
        surface.clear(None);
        assert!(surface.is_live());
    }

    #[test]
    fn test_update_ignored_after_teardown() {
        let mut surface = surface_with(&[1]);
        let before = surface.get(DocId(1)).unwrap().rendered_text().to_string();
        let mut frontend = RecordingFrontend::viewing(DocId(1));
        surface.teardown();
        surface
            .update(msg(1, "new"), false, true, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(surface.get(DocId(1)).unwrap().rendered_text(), before);
        assert!(frontend.shown.is_empty());
        assert_eq!(surface.highlighted(), None);
    }

    #[test]
    fn test_update_rebuilds_in_place_and_keeps_thread() {
        let mut surface = DisplaySurface::new();
        let mut threaded = msg(2, "old");
        threaded.thread = Some(ThreadDescriptor {
            depth: 1,
            is_last_child: true,
            ..Default::default()
        });
        surface.insert(row(1, "m1"), None);
        surface.insert(Row::build(threaded, "L".into(), &PlainRenderer).unwrap(), None);
        surface.insert(row(3, "m3"), None);

        let mut frontend = RecordingFrontend::default();
        surface
            .update(msg(2, "new"), false, true, &PlainRenderer, &mut frontend)
            .unwrap();

        assert_eq!(order(&surface), vec![1, 2, 3]);
        let updated = surface.get(DocId(2)).unwrap();
        assert_eq!(updated.rendered_text(), "  Lnew");
        assert_eq!(updated.thread().map(|t| t.depth), Some(1));
        assert_eq!(surface.highlighted(), Some(DocId(2)));
    }

    #[test]
    fn test_update_identical_message_is_idempotent() {
        let mut surface = surface_with(&[1, 2]);
        let before = surface.get(DocId(2)).unwrap().clone();
        let mut frontend = RecordingFrontend::default();
        surface
            .update(msg(2, "m2"), false, false, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(surface.get(DocId(2)), Some(&before));
    }

    #[test]
    fn test_update_restores_previous_highlight() {
        let mut surface = surface_with(&[1, 2]);
        surface.highlight(DocId(1));
        let mut frontend = RecordingFrontend::default();
        surface
            .update(msg(2, "x"), false, false, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(surface.highlighted(), Some(DocId(1)));
    }

    #[test]
    fn test_update_absent_is_noop() {
        let mut surface = surface_with(&[1]);
        let mut frontend = RecordingFrontend::default();
        surface
            .update(msg(9, "x"), false, true, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(order(&surface), vec![1]);
        assert_eq!(surface.highlighted(), None);
    }

    #[test]
    fn test_update_from_move_removes_and_closes_view() {
        let mut surface = surface_with(&[5, 7, 9]);
        let mut frontend = RecordingFrontend::viewing(DocId(7));
        surface
            .update(msg(7, "m7"), true, true, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(order(&surface), vec![5, 9]);
        assert_eq!(frontend.closed, 1);
        assert_eq!(frontend.viewed, None);
    }

    #[test]
    fn test_update_redisplays_viewed_message() {
        let mut surface = surface_with(&[7]);
        let mut frontend = RecordingFrontend::viewing(DocId(7));
        surface
            .update(msg(7, "fresh"), false, true, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(frontend.shown, vec![DocId(7)]);

        surface
            .update(msg(7, "again"), false, false, &PlainRenderer, &mut frontend)
            .unwrap();
        assert_eq!(frontend.shown.len(), 1);
    }

    #[test]
    fn test_remove_moves_cursor_to_neighbour() {
        let mut surface = surface_with(&[1, 2, 3]);
        let mut frontend = RecordingFrontend::default();
        surface.set_cursor(DocId(2));
        surface.remove(DocId(2), &mut frontend);
        assert_eq!(surface.cursor(), Some(DocId(3)));
        surface.remove(DocId(3), &mut frontend);
        assert_eq!(surface.cursor(), Some(DocId(1)));
        surface.remove(DocId(42), &mut frontend);
        assert_eq!(order(&surface), vec![1]);
    }

    #[test]
    fn test_user_entry_points_report_not_found() {
        let mut surface = surface_with(&[1]);
        let mut frontend = RecordingFrontend::default();
        assert_eq!(
            surface.remove_header(DocId(2), &mut frontend),
            Err(HeadersError::NotFound(DocId(2)))
        );
        assert_eq!(
            surface.set_mark(DocId(2), Some(Mark::Delete), &PlainRenderer),
            Err(HeadersError::NotFound(DocId(2)))
        );
        surface.set_mark(DocId(1), Some(Mark::Delete), &PlainRenderer).unwrap();
        assert_eq!(surface.get(DocId(1)).unwrap().rendered_text(), "D m1");
        assert!(surface.remove_header(DocId(1), &mut frontend).is_ok());
    }

    #[test]
    fn test_find_next_forward_and_backward() {
        let surface = surface_with(&[1, 2, 3, 4]);
        let even = |m: &MessageRecord| m.docid.0 % 2 == 0;
        assert_eq!(surface.find_next(even, Some(DocId(2)), false), Some(DocId(4)));
        assert_eq!(surface.find_next(even, Some(DocId(4)), true), Some(DocId(2)));
        assert_eq!(surface.find_next(even, Some(DocId(4)), false), None);
        assert_eq!(surface.find_next(even, None, false), Some(DocId(2)));
    }

    #[test]
    fn test_move_cursor_clamps() {
        let mut surface = surface_with(&[1, 2, 3]);
        assert_eq!(surface.move_cursor(1), Some(DocId(1)));
        assert_eq!(surface.move_cursor(5), Some(DocId(3)));
        assert_eq!(surface.move_cursor(-1), Some(DocId(2)));
        assert_eq!(surface.move_cursor(-10), Some(DocId(1)));
    }

    #[test]
    fn test_clear_resets_state_and_sets_banner() {
        let mut surface = surface_with(&[1, 2]);
        surface.highlight(DocId(1));
        surface.set_cursor(DocId(2));
        surface.clear(Some("Searching…"));
        assert_eq!(surface.len(), 0);
        assert_eq!(surface.highlighted(), None);
        assert_eq!(surface.cursor(), None);
        assert_eq!(surface.lines(), vec!["Searching…".to_string()]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Found(u32, u8),
        Updated(u32, u8),
        Removed(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8, any::<u8>()).prop_map(|(id, v)| Op::Found(id, v)),
            (0u32..8, any::<u8>()).prop_map(|(id, v)| Op::Updated(id, v)),
            (0u32..8).prop_map(Op::Removed),
        ]
    }

    proptest! {
        #[test]
        fn prop_rows_match_event_history(ops in proptest::collection::vec(op(), 0..60)) {
            let mut surface = DisplaySurface::new();
            let mut frontend = RecordingFrontend::default();
            let mut expected: HashMap<u32, String> = HashMap::new();

            for op in ops {
                match op {
                    Op::Found(id, v) => {
                        let subject = format!("found {}", v);
                        surface.insert(row(id, &subject), None);
                        expected.insert(id, subject);
                    }
                    Op::Updated(id, v) => {
                        let subject = format!("updated {}", v);
                        surface
                            .update(msg(id, &subject), false, false, &PlainRenderer, &mut frontend)
                            .unwrap();
                        if let Some(s) = expected.get_mut(&id) {
                            *s = subject;
                        }
                    }
                    Op::Removed(id) => {
                        surface.remove(DocId(id), &mut frontend);
                        expected.remove(&id);
                    }
                }
            }

            prop_assert_eq!(surface.len(), expected.len());
            for (id, subject) in &expected {
                let row = surface.get(DocId(*id));
                prop_assert!(row.is_some());
                prop_assert_eq!(row.map(|r| r.message().subject.clone()), Some(subject.clone()));
            }
        }
    }
}
