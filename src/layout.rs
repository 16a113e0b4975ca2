use crate::config::ProductionConfig;
use crate::types::{Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// 3 x 2 card backgrounds on landscape letter.
    Background,
    /// 2 x 2 foreground prints and cut sheets on portrait letter.
    Foreground,
    /// Hero column left, frame column right, three rows.
    Ganged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFill {
    LeaveBlank,
    RepeatFirst,
}

/// One placement on a sheet, in inches from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SheetSlot {
    pub page: usize,
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub x_in: f64,
    pub y_in: f64,
    pub width_in: f64,
    pub height_in: f64,
}

impl SheetSlot {
    pub fn rect(&self) -> Rect {
        Rect::from_inches(self.x_in, self.y_in, self.width_in, self.height_in)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotCell<T> {
    pub slot: SheetSlot,
    /// Which of the item's consecutive slots this is (left = 0).
    pub part: usize,
    pub item: Option<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetPage<T> {
    pub number: usize,
    pub cells: Vec<SlotCell<T>>,
}

impl<T> SheetPage<T> {
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.item.is_some()).count()
    }
}

/// Grid geometry for one layout mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub mode: LayoutMode,
    pub page_width_in: f64,
    pub page_height_in: f64,
    pub cols: usize,
    pub rows: usize,
    pub cell_width_in: f64,
    pub cell_height_in: f64,
    pub col_pitch_in: f64,
    pub row_pitch_in: f64,
}

impl GridSpec {
    pub fn capacity(&self) -> usize {
        self.cols * self.rows
    }

    pub fn page_size(&self) -> Size {
        Size::from_inches(self.page_width_in, self.page_height_in)
    }

    pub fn content_size(&self) -> (f64, f64) {
        (
            self.col_pitch_in * (self.cols as f64 - 1.0) + self.cell_width_in,
            self.row_pitch_in * (self.rows as f64 - 1.0) + self.cell_height_in,
        )
    }

    /// Left and top margins that centre the content.
    pub fn margins(&self) -> (f64, f64) {
        let (cw, ch) = self.content_size();
        (
            (self.page_width_in - cw) / 2.0,
            (self.page_height_in - ch) / 2.0,
        )
    }

    /// Row-major slot position.
    pub fn slot(&self, page: usize, index: usize) -> SheetSlot {
        let (left, top) = self.margins();
        let row = index / self.cols;
        let col = index % self.cols;
        SheetSlot {
            page,
            index,
            row,
            col,
            x_in: left + col as f64 * self.col_pitch_in,
            y_in: top + row as f64 * self.row_pitch_in,
            width_in: self.cell_width_in,
            height_in: self.cell_height_in,
        }
    }
}

/// Slot math for every sheet the pipeline produces.
#[derive(Debug, Clone)]
pub struct SheetLayoutEngine {
    cell_width_in: f64,
    cell_height_in: f64,
    ganged_pitch_in: f64,
}

impl SheetLayoutEngine {
    pub fn new(config: &ProductionConfig) -> Self {
        Self {
            cell_width_in: config.cell_width_in(),
            cell_height_in: config.cell_height_in(),
            ganged_pitch_in: config.ganged_column_pitch_in,
        }
    }

    pub fn grid(&self, mode: LayoutMode) -> GridSpec {
        let (page_w, page_h, cols, rows, col_pitch) = match mode {
            LayoutMode::Background => (11.0, 8.5, 3, 2, self.cell_width_in),
            LayoutMode::Foreground => (8.5, 11.0, 2, 2, self.cell_width_in),
            LayoutMode::Ganged => (8.5, 11.0, 2, 3, self.ganged_pitch_in),
        };
        GridSpec {
            mode,
            page_width_in: page_w,
            page_height_in: page_h,
            cols,
            rows,
            cell_width_in: self.cell_width_in,
            cell_height_in: self.cell_height_in,
            col_pitch_in: col_pitch,
            row_pitch_in: self.cell_height_in,
        }
    }

    /// Chunks `items` onto pages, giving each item `span` consecutive slots.
    ///
    /// A short final chunk is left blank or padded by repeating the first
    /// item of that chunk.
    pub fn paginate<T: Clone>(
        &self,
        mode: LayoutMode,
        items: &[T],
        span: usize,
        fill: PageFill,
    ) -> Vec<SheetPage<T>> {
        let grid = self.grid(mode);
        let span = span.clamp(1, grid.capacity());
        let per_page = grid.capacity() / span;
        items
            .chunks(per_page)
            .enumerate()
            .map(|(page, chunk)| {
                let mut cells = Vec::with_capacity(grid.capacity());
                for slot_in_page in 0..per_page {
                    let item = match chunk.get(slot_in_page) {
                        Some(item) => Some(item.clone()),
                        None => match fill {
                            PageFill::LeaveBlank => None,
                            PageFill::RepeatFirst => chunk.first().cloned(),
                        },
                    };
                    for part in 0..span {
                        cells.push(SlotCell {
                            slot: grid.slot(page, slot_in_page * span + part),
                            part,
                            item: item.clone(),
                        });
                    }
                }
                SheetPage {
                    number: page + 1,
                    cells,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SheetLayoutEngine {
        SheetLayoutEngine::new(&ProductionConfig::default())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn background_grid_is_centred_on_landscape_letter() {
        let grid = engine().grid(LayoutMode::Background);
        assert_eq!(grid.capacity(), 6);
        let (left, top) = grid.margins();
        assert!(close(left, (11.0 - 3.0 * 2.625) / 2.0));
        assert!(close(top, (8.5 - 2.0 * 3.625) / 2.0));
        let last = grid.slot(0, 5);
        assert_eq!((last.row, last.col), (1, 2));
        assert!(close(last.x_in, left + 2.0 * 2.625));
        assert!(close(last.y_in, top + 3.625));
    }

    #[test]
    fn ganged_grid_uses_column_pitch_and_fits_page() {
        let grid = engine().grid(LayoutMode::Ganged);
        let (left, top) = grid.margins();
        assert!(close(left, (8.5 - (3.5 + 2.625)) / 2.0));
        assert!(top >= 0.0);
        let frame_slot = grid.slot(0, 5);
        assert_eq!((frame_slot.row, frame_slot.col), (2, 1));
        assert!(close(frame_slot.x_in - left, 3.5));
        assert!(frame_slot.y_in + frame_slot.height_in <= 11.0);
    }

    #[test]
    fn ganged_padding_repeats_first_card() {
        for count in [1usize, 2] {
            let cards: Vec<usize> = (10..10 + count).collect();
            let pages = engine().paginate(LayoutMode::Ganged, &cards, 2, PageFill::RepeatFirst);
            assert_eq!(pages.len(), 1);
            let rows: Vec<usize> = pages[0]
                .cells
                .iter()
                .filter(|c| c.part == 0)
                .map(|c| c.item.expect("filled"))
                .collect();
            assert_eq!(rows.len(), 3);
            for (i, card) in rows.iter().enumerate() {
                let expected = if i < count { 10 + i } else { 10 };
                assert_eq!(*card, expected);
            }
        }
    }

    #[test]
    fn five_cards_in_pairs_need_three_pages() {
        let cards: Vec<usize> = (0..5).collect();
        let pages = engine().paginate(LayoutMode::Foreground, &cards, 2, PageFill::LeaveBlank);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].filled(), 4);
        assert_eq!(pages[2].filled(), 2);
        assert!(pages[2].cells[2].item.is_none());
        assert_eq!(pages[2].cells[1].part, 1);
        assert_eq!(pages[2].cells[1].slot.col, 1);
    }

    #[test]
    fn exact_multiple_has_no_blank_page() {
        let items: Vec<u8> = vec![0; 12];
        let pages = engine().paginate(LayoutMode::Background, &items, 1, PageFill::LeaveBlank);
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.filled() == 6));
        assert!(engine()
            .paginate::<u8>(LayoutMode::Background, &[], 1, PageFill::LeaveBlank)
            .is_empty());
    }
}
