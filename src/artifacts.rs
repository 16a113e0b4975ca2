use std::fmt::Write as _;
use std::sync::Arc;

use image::RgbaImage;

use crate::canvas::Canvas;
use crate::config::ProductionConfig;
use crate::error::ProductionError;
use crate::layout::{GridSpec, LayoutMode, PageFill, SheetLayoutEngine, SheetPage};
use crate::path::{path_element, CutPath, CUT_STROKE_WIDTH};
use crate::pdf::{document_to_pdf_with_perf, PdfOptions};
use crate::perf::PerfLogger;
use crate::types::{Color, Pt, Rect, Size, POINTS_PER_INCH};

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MISSING_SLOT_GRAY: f32 = 0.9;
const OUTLINE_GRAY: f32 = 0.5;

/// What goes into the two slots one card occupies on a paired sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPair<T> {
    pub left: Option<T>,
    pub right: Option<T>,
}

impl<T> SlotPair<T> {
    pub fn new(left: Option<T>, right: Option<T>) -> Self {
        Self { left, right }
    }

    fn part(&self, part: usize) -> Option<&T> {
        if part == 0 {
            self.left.as_ref()
        } else {
            self.right.as_ref()
        }
    }
}

/// Draws marks, images and paths onto paged sheets.
#[derive(Clone)]
pub struct ArtifactBuilder {
    layout: SheetLayoutEngine,
    pdf_options: PdfOptions,
    crop_mark_inset_in: f64,
    registration_offset_in: f64,
    registration_mark_in: f64,
    perf: Option<PerfLogger>,
}

impl ArtifactBuilder {
    pub fn new(config: &ProductionConfig) -> Self {
        Self {
            layout: SheetLayoutEngine::new(config),
            pdf_options: PdfOptions {
                color_space: config.mark_color_space,
            },
            crop_mark_inset_in: config.crop_mark_inset_in,
            registration_offset_in: config.registration_offset_in,
            registration_mark_in: config.registration_mark_in,
            perf: None,
        }
    }

    pub fn with_perf(mut self, perf: Option<PerfLogger>) -> Self {
        self.perf = perf;
        self
    }

    pub fn layout(&self) -> &SheetLayoutEngine {
        &self.layout
    }

    /// 3 x 2 backgrounds per landscape page with guillotine crop marks.
    /// A card whose background is missing gets a light grey placeholder.
    pub fn background_sheet(
        &self,
        backgrounds: &[Option<Arc<RgbaImage>>],
    ) -> Result<Vec<u8>, ProductionError> {
        let indices: Vec<usize> = (0..backgrounds.len()).collect();
        let pages = self
            .layout
            .paginate(LayoutMode::Background, &indices, 1, PageFill::LeaveBlank);
        if pages.is_empty() {
            return Err(ProductionError::Layout(
                "background sheet has no cards".to_string(),
            ));
        }
        let grid = self.layout.grid(LayoutMode::Background);
        let mut canvas = Canvas::new(grid.page_size());
        for (n, page) in pages.iter().enumerate() {
            if n > 0 {
                canvas.show_page();
            }
            self.crop_marks(&mut canvas);
            for cell in &page.cells {
                let Some(index) = cell.item else {
                    continue;
                };
                let rect = cell.slot.rect();
                match &backgrounds[index] {
                    Some(image) => {
                        let id = format!("bg{index}");
                        canvas.register_image(id.clone(), Arc::clone(image));
                        canvas.draw_image(rect.x, rect.y, rect.width, rect.height, id);
                    }
                    None => {
                        log::warn!("card {index} has no background; slot left grey");
                        canvas.set_fill_color(Color::gray(MISSING_SLOT_GRAY));
                        canvas.fill_rect(rect);
                    }
                }
            }
        }
        self.finish_pdf(canvas, "sheet.background")
    }

    /// Two cards per portrait page: left slot and right slot per card, with
    /// registration marks and a grey outline on every slot.
    pub fn foreground_sheet(
        &self,
        cards: &[SlotPair<Arc<RgbaImage>>],
    ) -> Result<Vec<u8>, ProductionError> {
        let indices: Vec<usize> = (0..cards.len()).collect();
        let pages = self
            .layout
            .paginate(LayoutMode::Foreground, &indices, 2, PageFill::LeaveBlank);
        if pages.is_empty() {
            return Err(ProductionError::Layout(
                "foreground sheet has no cards".to_string(),
            ));
        }
        let grid = self.layout.grid(LayoutMode::Foreground);
        let mut canvas = Canvas::new(grid.page_size());
        for (n, page) in pages.iter().enumerate() {
            if n > 0 {
                canvas.show_page();
            }
            self.registration_marks(&mut canvas);
            self.place_pairs(&mut canvas, page, cards, "fg");
            canvas.set_stroke_color(Color::gray(OUTLINE_GRAY));
            canvas.set_line_width(Pt::from_f32(0.5));
            for cell in &page.cells {
                canvas.stroke_rect(cell.slot.rect());
            }
        }
        self.finish_pdf(canvas, "sheet.foreground")
    }

    /// One PDF per ganged sheet: three cards, hero column left, frame column
    /// right. Short chunks repeat their first card.
    pub fn ganged_print_sheets(
        &self,
        cards: &[SlotPair<Arc<RgbaImage>>],
    ) -> Result<Vec<Vec<u8>>, ProductionError> {
        let indices: Vec<usize> = (0..cards.len()).collect();
        let pages = self
            .layout
            .paginate(LayoutMode::Ganged, &indices, 2, PageFill::RepeatFirst);
        let grid = self.layout.grid(LayoutMode::Ganged);
        let mut sheets = Vec::with_capacity(pages.len());
        for page in &pages {
            let mut canvas = Canvas::new(grid.page_size());
            self.registration_marks(&mut canvas);
            let missing = self.place_pairs(&mut canvas, page, cards, "gang");
            if !missing.is_empty() {
                canvas.set_stroke_color(Color::gray(OUTLINE_GRAY));
                canvas.set_line_width(Pt::from_f32(0.5));
                for rect in missing {
                    canvas.stroke_rect(rect);
                }
            }
            sheets.push(self.finish_pdf(canvas, "sheet.ganged")?);
        }
        Ok(sheets)
    }

    /// One SVG document per page of paired cut paths, 1:1 with the matching
    /// print sheet.
    pub fn cut_sheets(
        &self,
        mode: LayoutMode,
        cards: &[SlotPair<&CutPath>],
        fill: PageFill,
    ) -> Vec<String> {
        let indices: Vec<usize> = (0..cards.len()).collect();
        let grid = self.layout.grid(mode);
        self.layout
            .paginate(mode, &indices, 2, fill)
            .iter()
            .map(|page| cut_sheet_svg(&grid, page, cards))
            .collect()
    }

    /// Draws each filled cell's image; returns the rects of cells that had a
    /// card but no image for that part.
    fn place_pairs(
        &self,
        canvas: &mut Canvas,
        page: &SheetPage<usize>,
        cards: &[SlotPair<Arc<RgbaImage>>],
        prefix: &str,
    ) -> Vec<Rect> {
        let mut missing = Vec::new();
        for cell in &page.cells {
            let Some(index) = cell.item else {
                continue;
            };
            let rect = cell.slot.rect();
            match cards[index].part(cell.part) {
                Some(image) => {
                    let id = format!("{prefix}{index}_{}", cell.part);
                    canvas.register_image(id.clone(), Arc::clone(image));
                    canvas.draw_image(rect.x, rect.y, rect.width, rect.height, id);
                }
                None => missing.push(rect),
            }
        }
        missing
    }

    fn crop_marks(&self, canvas: &mut Canvas) {
        let Size { width, height } = canvas.page_size();
        let s = Pt::from_inches(self.crop_mark_inset_in);
        canvas.set_stroke_color(Color::BLACK);
        canvas.set_line_width(Pt::from_f32(0.5));
        for (cx, edge_x) in [(s, Pt::ZERO), (width - s, width)] {
            for (cy, edge_y) in [(s, Pt::ZERO), (height - s, height)] {
                canvas.line(cx, cy, edge_x, cy);
                canvas.line(cx, cy, cx, edge_y);
            }
        }
    }

    /// Filled square at the top-left corner, L-brackets at the other three.
    fn registration_marks(&self, canvas: &mut Canvas) {
        let Size { width, height } = canvas.page_size();
        let off = Pt::from_inches(self.registration_offset_in);
        let m = Pt::from_inches(self.registration_mark_in);
        canvas.set_fill_color(Color::BLACK);
        canvas.set_stroke_color(Color::BLACK);
        canvas.set_line_width(Pt::from_f32(1.0));
        canvas.draw_rect(off, off, m, m);

        let right = width - off;
        let bottom = height - off;
        // top-right opens down-left, bottom corners open upward
        canvas.line(right - m, off, right, off);
        canvas.line(right, off, right, off + m);
        canvas.line(off, bottom, off + m, bottom);
        canvas.line(off, bottom, off, bottom - m);
        canvas.line(right - m, bottom, right, bottom);
        canvas.line(right, bottom, right, bottom - m);
    }

    fn finish_pdf(&self, canvas: Canvas, span: &str) -> Result<Vec<u8>, ProductionError> {
        let started = std::time::Instant::now();
        let document = canvas.finish();
        let bytes = document_to_pdf_with_perf(&document, &self.pdf_options, self.perf.as_ref())
            .map_err(|err| ProductionError::Pdf(err.to_string()))?;
        if let Some(perf) = &self.perf {
            perf.log_span_ms(span, None, started.elapsed().as_secs_f64() * 1000.0);
            perf.log_counts(
                span,
                None,
                &[
                    ("pages", document.page_count() as u64),
                    ("bytes", bytes.len() as u64),
                ],
            );
        }
        Ok(bytes)
    }
}

fn cut_sheet_svg(grid: &GridSpec, page: &SheetPage<usize>, cards: &[SlotPair<&CutPath>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n");
    let _ = write!(
        out,
        "<svg xmlns=\"{}\" version=\"1.1\" baseProfile=\"full\" width=\"{}in\" height=\"{}in\" viewBox=\"0 0 {} {}\"><defs />",
        SVG_NS,
        fmt_units(grid.page_width_in),
        fmt_units(grid.page_height_in),
        fmt_units(grid.page_width_in * POINTS_PER_INCH),
        fmt_units(grid.page_height_in * POINTS_PER_INCH)
    );
    for cell in &page.cells {
        let _ = write!(
            out,
            "<g transform=\"translate({}, {})\" stroke=\"black\" stroke-width=\"{}\">",
            fmt_units(cell.slot.x_in * POINTS_PER_INCH),
            fmt_units(cell.slot.y_in * POINTS_PER_INCH),
            CUT_STROKE_WIDTH
        );
        let data = cell
            .item
            .and_then(|index| cards[index].part(cell.part))
            .and_then(|path| path.data.as_deref());
        if let Some(data) = data {
            out.push_str(&path_element(data));
        }
        out.push_str("</g>");
    }
    out.push_str("</svg>\n");
    out
}

/// Up to four decimals, trailing zeros dropped.
fn fmt_units(value: f64) -> String {
    let mut s = format!("{:.4}", value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" { "0".to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::pdf_page_count;
    use image::Rgba;

    fn builder() -> ArtifactBuilder {
        ArtifactBuilder::new(&ProductionConfig::default())
    }

    fn count_token(bytes: &[u8], token: &[u8]) -> usize {
        bytes.windows(token.len()).filter(|w| *w == token).count()
    }

    fn image(shade: u8) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(8, 11, Rgba([shade, shade, shade, 255])))
    }

    fn cut(name: &str, data: &str) -> CutPath {
        CutPath {
            name: name.to_string(),
            data: Some(data.to_string()),
            width: 189,
            height: 261,
        }
    }

    #[test]
    fn seven_backgrounds_take_two_landscape_pages() {
        let backgrounds: Vec<Option<Arc<RgbaImage>>> = (0..7).map(|i| Some(image(i))).collect();
        let bytes = builder().background_sheet(&backgrounds).expect("pdf");
        assert_eq!(pdf_page_count(&bytes).expect("pages"), 2);
        assert_eq!(count_token(&bytes, b"/MediaBox [0 0 792 612]"), 2);
        // four L-marks of two strokes each, per page
        assert_eq!(count_token(&bytes, b"\nS\n"), 16);
    }

    #[test]
    fn missing_background_is_grey_not_fatal() {
        let bytes = builder()
            .background_sheet(&[Some(image(10)), None])
            .expect("pdf");
        assert_eq!(count_token(&bytes, b"0.9 0.9 0.9 rg"), 1);
        assert_eq!(count_token(&bytes, b" Do\n"), 1);
    }

    #[test]
    fn foreground_sheet_paginates_pairs_and_outlines_slots() {
        let cards: Vec<SlotPair<Arc<RgbaImage>>> = (0..5)
            .map(|i| SlotPair::new(Some(image(i)), Some(image(100 + i))))
            .collect();
        let bytes = builder().foreground_sheet(&cards).expect("pdf");
        assert_eq!(pdf_page_count(&bytes).expect("pages"), 3);
        assert_eq!(count_token(&bytes, b" Do\n"), 10);
        assert_eq!(count_token(&bytes, b"0.5 0.5 0.5 RG"), 3);
        // registration square on each page: x = 36, y = 792 - 36 - 14.4
        assert_eq!(count_token(&bytes, b"36 741.6 14.4 14.4 re"), 3);
    }

    #[test]
    fn ganged_sheet_repeats_first_card() {
        let cards = vec![SlotPair::new(Some(image(1)), Some(image(2)))];
        let sheets = builder().ganged_print_sheets(&cards).expect("pdf");
        assert_eq!(sheets.len(), 1);
        let bytes = &sheets[0];
        assert_eq!(count_token(bytes, b"/Im1 Do"), 3);
        assert_eq!(count_token(bytes, b"/Im2 Do"), 3);
        assert_eq!(count_token(bytes, b"/Subtype /Image"), 2);
    }

    #[test]
    fn cut_sheet_svg_uses_page_view_box_and_slot_offsets() {
        let a = cut("hero_frame_cut", "M 0 0 L 1 0 L 1 1 Z");
        let b = cut("frame_cut", "M 2 2 L 3 2 L 3 3 Z");
        let cards = vec![
            SlotPair::new(Some(&a), Some(&b)),
            SlotPair::new(Some(&a), Some(&b)),
            SlotPair::new(Some(&a), None),
        ];
        let svgs = builder().cut_sheets(LayoutMode::Foreground, &cards, PageFill::LeaveBlank);
        assert_eq!(svgs.len(), 2);
        let first = &svgs[0];
        assert!(first.contains("width=\"8.5in\" height=\"11in\" viewBox=\"0 0 612 792\""));
        assert_eq!(first.matches("<g ").count(), 4);
        assert_eq!(first.matches("<path ").count(), 4);
        // margins (8.5 - 5.25) / 2 and (11 - 7.25) / 2 inches
        assert!(first.contains("translate(117, 135)"));
        assert!(first.contains("translate(306, 396)"));
        let second = &svgs[1];
        assert_eq!(second.matches("<g ").count(), 4);
        assert_eq!(second.matches("<path ").count(), 1);
        assert!(roxmltree::Document::parse(second).is_ok());
    }

    #[test]
    fn empty_background_sheet_is_a_layout_error() {
        assert!(matches!(
            builder().background_sheet(&[]),
            Err(ProductionError::Layout(_))
        ));
    }

    #[test]
    fn units_are_trimmed() {
        assert_eq!(fmt_units(117.0), "117");
        assert_eq!(fmt_units(85.5), "85.5");
        assert_eq!(fmt_units(4.49999999), "4.5");
    }
}
