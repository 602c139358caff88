use vte::{Params, Parser, Perform};

/// Plain-text snapshot of a session's visible screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub cols: u16,
    pub rows: u16,
    pub lines: Vec<String>,
}

impl ScreenSnapshot {
    /// Joined screen content, trailing blank lines removed. This is what a
    /// late-joining observer receives as its initial terminal state.
    pub fn render(&self) -> String {
        let last_used = self
            .lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.lines[..last_used].join("\n")
    }

    /// Case-sensitive substring search over the visible screen, used by
    /// readiness probes to spot an agent's CLI banner.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    ch: char,
}

impl Default for Cell {
    fn default() -> Self {
        Self { ch: ' ' }
    }
}

#[derive(Debug)]
struct Grid {
    cols: usize,
    rows: usize,
    cursor_x: usize,
    cursor_y: usize,
    cells: Vec<Cell>,
}

impl Grid {
    fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            cursor_x: 0,
            cursor_y: 0,
            cells: vec![Cell::default(); cols * rows],
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.cols + x
    }

    fn put_char(&mut self, ch: char) {
        if self.cursor_x >= self.cols {
            self.line_feed();
        }
        let idx = self.index(self.cursor_x, self.cursor_y);
        self.cells[idx].ch = ch;
        self.cursor_x += 1;
    }

    fn line_feed(&mut self) {
        self.cursor_x = 0;
        if self.cursor_y + 1 < self.rows {
            self.cursor_y += 1;
            return;
        }
        self.scroll_up();
    }

    fn scroll_up(&mut self) {
        self.cells.copy_within(self.cols.., 0);
        let start = self.index(0, self.rows - 1);
        for cell in &mut self.cells[start..] {
            *cell = Cell::default();
        }
    }

    fn clear_all(&mut self) {
        for cell in &mut self.cells {
            *cell = Cell::default();
        }
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn clear_line_to_end(&mut self) {
        for col in self.cursor_x..self.cols {
            let idx = self.index(col, self.cursor_y);
            self.cells[idx] = Cell::default();
        }
    }

    fn move_cursor(&mut self, row: usize, col: usize) {
        self.cursor_y = row.min(self.rows.saturating_sub(1));
        self.cursor_x = col.min(self.cols.saturating_sub(1));
    }

    fn line(&self, row: usize) -> String {
        let start = row * self.cols;
        let mut line: String = self.cells[start..start + self.cols]
            .iter()
            .map(|cell| cell.ch)
            .collect();
        while line.ends_with(' ') {
            line.pop();
        }
        line
    }
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        self.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.line_feed(),
            b'\r' => self.cursor_x = 0,
            0x08 => self.cursor_x = self.cursor_x.saturating_sub(1),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'H' | 'f' => {
                let row = param_or(params, 0, 1).saturating_sub(1);
                let col = param_or(params, 1, 1).saturating_sub(1);
                self.move_cursor(row, col);
            }
            'J' => self.clear_all(),
            'K' => self.clear_line_to_end(),
            _ => {}
        }
    }
}

fn param_or(params: &Params, index: usize, default: usize) -> usize {
    params
        .iter()
        .nth(index)
        .and_then(|param| param.first())
        .map(|v| usize::from(*v))
        .unwrap_or(default)
}

/// Incremental VT interpreter over a session's output stream.
///
/// Deliberately minimal: enough cursor and erase handling to keep a readable
/// text picture of the screen for snapshots and banner probing, not a full
/// terminal emulation.
pub struct ScreenBuffer {
    parser: Parser,
    grid: Grid,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::new(usize::from(cols), usize::from(rows)),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.grid, bytes);
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        let lines = (0..self.grid.rows).map(|row| self.grid.line(row)).collect();
        ScreenSnapshot {
            cols: u16::try_from(self.grid.cols).unwrap_or(u16::MAX),
            rows: u16::try_from(self.grid.rows).unwrap_or(u16::MAX),
            lines,
        }
    }
}
