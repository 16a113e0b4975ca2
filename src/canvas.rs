use std::collections::BTreeMap;
use std::sync::Arc;

use image::RgbaImage;

use crate::types::{Color, Pt, Rect, Size};

/// Drawing operations in top-left-origin page space. The PDF writer flips
/// them into PDF user space.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Stroke,
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
    /// Raster resources referenced by `DrawImage`.
    pub images: BTreeMap<String, Arc<RgbaImage>>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
        }
    }
}

pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    current_state: GraphicsState,
    images: BTreeMap<String, Arc<RgbaImage>>,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::default(),
            current_state: GraphicsState::default(),
            images: BTreeMap::new(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    /// Makes `image` drawable under `resource_id`. Re-registering an id keeps
    /// the first image.
    pub fn register_image(&mut self, resource_id: impl Into<String>, image: Arc<RgbaImage>) {
        self.images.entry(resource_id.into()).or_insert(image);
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = if width < Pt::ZERO { Pt::ZERO } else { width };
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::LineTo { x, y });
    }

    pub fn close_path(&mut self) {
        self.current.commands.push(Command::ClosePath);
    }

    pub fn stroke(&mut self) {
        self.current.commands.push(Command::Stroke);
    }

    /// Filled rectangle in the current fill colour.
    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn fill_rect(&mut self, rect: Rect) {
        self.draw_rect(rect.x, rect.y, rect.width, rect.height);
    }

    /// Closed rectangular outline in the current stroke colour.
    pub fn stroke_rect(&mut self, rect: Rect) {
        let right = rect.x + rect.width;
        let bottom = rect.y + rect.height;
        self.move_to(rect.x, rect.y);
        self.line_to(right, rect.y);
        self.line_to(right, bottom);
        self.line_to(rect.x, bottom);
        self.close_path();
        self.stroke();
    }

    pub fn line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.move_to(x1, y1);
        self.line_to(x2, y2);
        self.stroke();
    }

    pub fn draw_image(
        &mut self,
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: impl Into<String>,
    ) {
        self.current.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            resource_id: resource_id.into(),
        });
    }

    pub fn show_page(&mut self) {
        let current = std::mem::take(&mut self.current);
        self.pages.push(current);
        self.current_state = GraphicsState::default();
    }

    pub fn finish(mut self) -> Document {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document {
            page_size: self.page_size,
            pages: self.pages,
            images: self.images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_dropped() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.set_fill_color(Color::BLACK);
        canvas.set_fill_color(Color::gray(0.9));
        canvas.set_fill_color(Color::gray(0.9));
        canvas.set_line_width(Pt::from_f32(1.0));
        let doc = canvas.finish();
        assert_eq!(
            doc.pages[0].commands,
            vec![Command::SetFillColor(Color::gray(0.9))]
        );
    }

    #[test]
    fn new_page_resets_colours() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.set_stroke_color(Color::gray(0.5));
        canvas.show_page();
        // black again after the break, so no command is needed
        canvas.set_stroke_color(Color::BLACK);
        canvas.stroke_rect(Rect::from_inches(0.0, 0.0, 1.0, 1.0));
        let doc = canvas.finish();
        assert_eq!(doc.pages[0].commands.len(), 1);
        assert_eq!(doc.pages[1].commands.len(), 6);
        assert_eq!(doc.pages[1].commands[5], Command::Stroke);
    }

    #[test]
    fn empty_canvas_still_has_one_page() {
        let doc = Canvas::new(Size::letter()).finish();
        assert_eq!(doc.page_count(), 1);

        let mut canvas = Canvas::new(Size::letter());
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f64(10.0), Pt::from_f64(10.0));
        canvas.show_page();
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f64(10.0), Pt::from_f64(10.0));
        canvas.show_page();
        assert_eq!(canvas.finish().page_count(), 2);
    }

    #[test]
    fn first_registered_image_wins() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.register_image("a", Arc::new(RgbaImage::new(2, 2)));
        canvas.register_image("a", Arc::new(RgbaImage::new(3, 3)));
        let doc = canvas.finish();
        assert_eq!(doc.images["a"].width(), 2);
    }
}
