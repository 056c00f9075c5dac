//! Scroll offset and cursor bookkeeping for the rendered surface.
//!
//! The surface is header lines followed by one line per entry plus a
//! trailing blank; the window shows `height` consecutive surface lines
//! starting at `scroll_offset`. Every transition re-establishes the same
//! two invariants: the cursor stays within the entry range and the offset
//! stays within `[0, max(0, n + h + 1 - height)]`, with the cursor inside
//! the visible band afterwards.

#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub scroll_offset: usize,
    pub cursor_row: usize,
    pub width: u16,
    pub height: u16,
    pub header_lines: usize,
    pub entries: usize,
    /// Fixed single-window mode: every navigation command is a no-op.
    pub no_scroll: bool,
}

impl Viewport {
    pub fn new(width: u16, height: u16, no_scroll: bool) -> Viewport {
        Viewport {
            scroll_offset: 0,
            cursor_row: 0,
            width,
            height,
            header_lines: 3,
            entries: 0,
            no_scroll,
        }
    }

    /// Largest legal scroll offset for the current surface.
    pub fn max_offset(&self) -> usize {
        (self.entries + self.header_lines + 1).saturating_sub(self.height as usize)
    }

    fn surface_line_of_cursor(&self) -> usize {
        self.header_lines + self.cursor_row
    }

    /// Slide the offset the minimal distance that brings the cursor into
    /// the visible band; single-row cursor moves therefore scroll by at
    /// most one line.
    fn keep_cursor_visible(&mut self) {
        if self.no_scroll {
            self.scroll_offset = 0;
            return;
        }
        let line = self.surface_line_of_cursor();
        let height = self.height as usize;
        if line < self.scroll_offset {
            self.scroll_offset = line;
        } else if height > 0 && line >= self.scroll_offset + height {
            self.scroll_offset = line + 1 - height;
        }
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    /// New cycle: entry count and header height may both have changed.
    pub fn refresh(&mut self, entries: usize, header_lines: usize) {
        self.entries = entries;
        self.header_lines = header_lines;
        self.cursor_row = if entries == 0 {
            0
        } else {
            self.cursor_row.min(entries - 1)
        };
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
        if self.no_scroll {
            self.scroll_offset = 0;
        }
    }

    /// Window geometry changed; rebuild at the new size, then re-clamp.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.refresh(self.entries, self.header_lines);
    }

    pub fn cursor_down(&mut self) {
        if self.no_scroll || self.entries == 0 {
            return;
        }
        self.cursor_row = (self.cursor_row + 1).min(self.entries - 1);
        self.keep_cursor_visible();
    }

    pub fn cursor_up(&mut self) {
        if self.no_scroll {
            return;
        }
        self.cursor_row = self.cursor_row.saturating_sub(1);
        self.keep_cursor_visible();
    }

    fn content_fits(&self) -> bool {
        self.entries + self.header_lines + 1 <= self.height as usize
    }

    pub fn page_down(&mut self) {
        if self.no_scroll || self.content_fits() || self.entries == 0 {
            return;
        }
        let page = self.height as usize;
        self.scroll_offset = (self.scroll_offset + page).min(self.max_offset());
        self.cursor_row = (self.cursor_row + page).min(self.entries - 1);
        self.keep_cursor_visible();
    }

    pub fn page_up(&mut self) {
        if self.no_scroll || self.content_fits() {
            return;
        }
        let page = self.height as usize;
        self.scroll_offset = self.scroll_offset.saturating_sub(page);
        self.cursor_row = self.cursor_row.saturating_sub(page);
        self.keep_cursor_visible();
    }

    pub fn home(&mut self) {
        if self.no_scroll {
            return;
        }
        self.scroll_offset = 0;
        self.cursor_row = 0;
    }

    pub fn end(&mut self) {
        if self.no_scroll {
            return;
        }
        self.cursor_row = self.entries.saturating_sub(1);
        self.scroll_offset = self.max_offset();
    }

    /// Surface lines currently in the window, for the renderer.
    pub fn visible_lines(&self) -> std::ops::Range<usize> {
        let total = self.entries + self.header_lines + 1;
        let start = self.scroll_offset.min(total);
        let end = (start + self.height as usize).min(total);
        start..end
    }

    #[cfg(test)]
    fn invariants_hold(&self) -> bool {
        self.cursor_row <= self.entries && self.scroll_offset <= self.max_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(entries: usize, height: u16) -> Viewport {
        let mut v = Viewport::new(100, height, false);
        v.refresh(entries, 3);
        v
    }

    #[test]
    fn refresh_clamps_cursor_and_offset() {
        let mut v = viewport(50, 20);
        v.cursor_row = 49;
        v.end();
        v.refresh(10, 3);
        assert_eq!(v.cursor_row, 9);
        assert!(v.scroll_offset <= v.max_offset());
        v.refresh(0, 3);
        assert_eq!(v.cursor_row, 0);
        assert_eq!(v.scroll_offset, 0);
    }

    #[test]
    fn cursor_down_scrolls_one_line_at_the_band_edge() {
        let mut v = viewport(50, 10);
        // rows 0..=6 visible (3 header lines), cursor at the last one
        for _ in 0..6 {
            v.cursor_down();
        }
        assert_eq!(v.cursor_row, 6);
        assert_eq!(v.scroll_offset, 0);
        v.cursor_down();
        assert_eq!(v.cursor_row, 7);
        assert_eq!(v.scroll_offset, 1);
        v.cursor_down();
        assert_eq!(v.scroll_offset, 2);
    }

    #[test]
    fn cursor_up_scrolls_back_one_line() {
        let mut v = viewport(50, 10);
        v.end();
        let off = v.scroll_offset;
        v.cursor_up();
        assert_eq!(v.scroll_offset, off, "cursor still in band");
        for _ in 0..20 {
            v.cursor_up();
        }
        assert!(v.scroll_offset < off);
        assert!(v.invariants_hold());
    }

    #[test]
    fn cursor_stops_at_the_ends() {
        let mut v = viewport(3, 20);
        v.cursor_up();
        assert_eq!(v.cursor_row, 0);
        for _ in 0..10 {
            v.cursor_down();
        }
        assert_eq!(v.cursor_row, 2);
    }

    #[test]
    fn page_moves_jump_a_window_and_clamp() {
        let mut v = viewport(100, 20);
        v.page_down();
        assert_eq!(v.scroll_offset, 20);
        assert_eq!(v.cursor_row, 20);
        for _ in 0..20 {
            v.page_down();
        }
        assert_eq!(v.scroll_offset, v.max_offset());
        assert_eq!(v.cursor_row, 99);
        v.page_up();
        assert!(v.invariants_hold());
        for _ in 0..20 {
            v.page_up();
        }
        assert_eq!(v.scroll_offset, 0);
        assert_eq!(v.cursor_row, 0);
    }

    #[test]
    fn page_moves_are_noops_when_content_fits() {
        let mut v = viewport(5, 40);
        v.page_down();
        assert_eq!(v.scroll_offset, 0);
        assert_eq!(v.cursor_row, 0);
        v.page_up();
        assert_eq!(v.scroll_offset, 0);
    }

    #[test]
    fn home_and_end_hit_the_absolute_bounds() {
        let mut v = viewport(100, 20);
        v.end();
        assert_eq!(v.cursor_row, 99);
        assert_eq!(v.scroll_offset, 100 + 3 + 1 - 20);
        v.home();
        assert_eq!((v.scroll_offset, v.cursor_row), (0, 0));
    }

    #[test]
    fn resize_reruns_the_refresh_clamp() {
        let mut v = viewport(100, 40);
        v.end();
        v.resize(80, 10);
        assert!(v.invariants_hold());
        assert_eq!(v.max_offset(), 100 + 3 + 1 - 10);
        v.resize(80, 200);
        assert_eq!(v.scroll_offset, 0);
    }

    #[test]
    fn no_scroll_mode_ignores_navigation() {
        let mut v = Viewport::new(100, 10, true);
        v.refresh(50, 3);
        v.cursor_down();
        v.page_down();
        v.end();
        assert_eq!((v.scroll_offset, v.cursor_row), (0, 0));
    }

    #[test]
    fn invariants_survive_arbitrary_transition_sequences() {
        let mut v = viewport(37, 12);
        let script: &[u8] = b"jjjjkkGdduuggjjddGkkuu";
        for op in script {
            match op {
                b'j' => v.cursor_down(),
                b'k' => v.cursor_up(),
                b'd' => v.page_down(),
                b'u' => v.page_up(),
                b'g' => v.home(),
                b'G' => v.end(),
                _ => unreachable!(),
            }
            assert!(v.invariants_hold(), "after {}", *op as char);
            let line = v.header_lines + v.cursor_row;
            assert!(line >= v.scroll_offset && line < v.scroll_offset + v.height as usize);
        }
        v.refresh(2, 5);
        assert!(v.invariants_hold());
    }

    #[test]
    fn visible_lines_cover_the_window() {
        let mut v = viewport(50, 10);
        assert_eq!(v.visible_lines(), 0..10);
        v.end();
        let r = v.visible_lines();
        assert_eq!(r.end, 50 + 3 + 1);
        assert_eq!(r.end - r.start, 10);
    }
}
