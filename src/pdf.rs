use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};
use std::sync::Arc;

use fixed::types::I32F32;
use image::RgbaImage;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::canvas::{Command, Document, Page};
use crate::perf::PerfLogger;
use crate::types::{Color, ColorSpace, Pt};

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfOptions {
    /// Colour operators for vector marks and fills. Images stay DeviceRGB.
    pub color_space: ColorSpace,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Rgb,
        }
    }
}

pub fn document_to_pdf(document: &Document, options: &PdfOptions) -> io::Result<Vec<u8>> {
    document_to_pdf_with_perf(document, options, None)
}

pub fn document_to_pdf_with_perf(
    document: &Document,
    options: &PdfOptions,
    perf: Option<&PerfLogger>,
) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = PdfStreamWriter::new(&mut out, *options)?;
    writer.add_images(document, perf)?;
    for page in &document.pages {
        writer.add_page(document, page)?;
    }
    writer.finish()?;
    Ok(out)
}

/// Image data ready to embed: zlib-compressed RGB plus an optional alpha plane.
struct EncodedImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

pub(crate) struct PdfStreamWriter<'a, W: Write> {
    writer: &'a mut W,
    offset: usize,
    offsets: Vec<usize>, // index by object id; 0 is the free object.
    next_id: usize,
    options: PdfOptions,

    image_resources: Vec<(String, usize)>,
    image_name_map: HashMap<String, String>,

    page_ids: Vec<usize>,
}

impl<'a, W: Write> PdfStreamWriter<'a, W> {
    pub(crate) fn new(writer: &'a mut W, options: PdfOptions) -> io::Result<Self> {
        let mut offset: usize = 0;
        write_bytes(writer, b"%PDF-1.7\n", &mut offset)?;
        write_bytes(writer, b"%\xE2\xE3\xCF\xD3\n", &mut offset)?;
        Ok(Self {
            writer,
            offset,
            offsets: vec![0; PDF_RESOURCES_ID + 1],
            next_id: PDF_RESOURCES_ID + 1,
            options,
            image_resources: Vec::new(),
            image_name_map: HashMap::new(),
            page_ids: Vec::new(),
        })
    }

    fn alloc_ids(&mut self, count: usize) -> usize {
        let start = self.next_id;
        self.next_id = self.next_id.saturating_add(count);
        if self.offsets.len() < self.next_id {
            self.offsets.resize(self.next_id, 0);
        }
        start
    }

    fn write_object(&mut self, obj_id: usize, body: &str) -> io::Result<()> {
        write_pdf_object(
            self.writer,
            &mut self.offset,
            &mut self.offsets,
            obj_id,
            body.as_bytes(),
        )
    }

    fn write_stream(&mut self, obj_id: usize, dict: &str, data: &[u8]) -> io::Result<()> {
        let mut body = Vec::with_capacity(dict.len() + data.len() + 32);
        body.extend_from_slice(dict.as_bytes());
        body.extend_from_slice(b"\nstream\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        write_pdf_object(
            self.writer,
            &mut self.offset,
            &mut self.offsets,
            obj_id,
            &body,
        )
    }

    /// Embeds every image the pages draw. Identical pixel content is written
    /// once and shared between resource ids.
    pub(crate) fn add_images(
        &mut self,
        document: &Document,
        perf: Option<&PerfLogger>,
    ) -> io::Result<()> {
        let used = referenced_images(&document.pages);
        let mut unique: Vec<(String, Arc<RgbaImage>)> = Vec::new();
        let mut by_hash: HashMap<[u8; 32], String> = HashMap::new();
        let mut aliases: Vec<(String, String)> = Vec::new();
        for resource_id in used {
            let Some(image) = document.images.get(&resource_id) else {
                log::warn!("sheet references unregistered image {resource_id}");
                continue;
            };
            let hash = hash_image(image);
            if let Some(first) = by_hash.get(&hash) {
                aliases.push((resource_id, first.clone()));
                continue;
            }
            by_hash.insert(hash, resource_id.clone());
            unique.push((resource_id, Arc::clone(image)));
        }

        let started = std::time::Instant::now();
        let encoded: Vec<EncodedImage> = unique
            .par_iter()
            .map(|(_, image)| encode_image(image))
            .collect();
        if let Some(perf) = perf {
            perf.log_span_ms(
                "pdf.images.encode",
                None,
                started.elapsed().as_secs_f64() * 1000.0,
            );
            perf.log_counts(
                "pdf.images",
                None,
                &[
                    ("unique", unique.len() as u64),
                    ("reused", aliases.len() as u64),
                ],
            );
        }

        for ((resource_id, _), image) in unique.iter().zip(&encoded) {
            let smask_id = image.alpha.as_ref().map(|_| self.alloc_ids(1));
            let obj_id = self.alloc_ids(1);
            let name = format!("Im{}", self.image_resources.len() + 1);
            if let (Some(alpha), Some(mask_id)) = (image.alpha.as_ref(), smask_id) {
                let dict = format!(
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Length {} /Filter /FlateDecode >>",
                    image.width,
                    image.height,
                    alpha.len()
                );
                self.write_stream(mask_id, &dict, alpha)?;
            }
            let smask = smask_id
                .map(|id| format!(" /SMask {} 0 R", id))
                .unwrap_or_default();
            let dict = format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Length {} /Filter /FlateDecode{} >>",
                image.width,
                image.height,
                image.rgb.len(),
                smask
            );
            self.write_stream(obj_id, &dict, &image.rgb)?;
            self.image_resources.push((name.clone(), obj_id));
            self.image_name_map.insert(resource_id.clone(), name);
        }
        for (alias, first) in aliases {
            if let Some(name) = self.image_name_map.get(&first).cloned() {
                self.image_name_map.insert(alias, name);
            }
        }
        Ok(())
    }

    pub(crate) fn add_page(&mut self, document: &Document, page: &Page) -> io::Result<()> {
        let content = self.render_commands(document, &page.commands);
        let content_id = self.alloc_ids(1);
        self.write_object(content_id, &stream_object(&content))?;
        let page_id = self.alloc_ids(1);
        let body = format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
            PDF_PAGES_ID,
            fmt_pt(document.page_size.width),
            fmt_pt(document.page_size.height),
            PDF_RESOURCES_ID,
            content_id
        );
        self.write_object(page_id, &body)?;
        self.page_ids.push(page_id);
        Ok(())
    }

    fn render_commands(&self, document: &Document, commands: &[Command]) -> String {
        let page_height = document.page_size.height;
        let space = self.options.color_space;
        let mut out = String::new();
        for command in commands {
            match command {
                Command::SetFillColor(color) => out.push_str(&color_to_pdf_fill(*color, space)),
                Command::SetStrokeColor(color) => {
                    out.push_str(&color_to_pdf_stroke(*color, space))
                }
                Command::SetLineWidth(width) => {
                    out.push_str(&format!("{} w\n", fmt_pt(*width)));
                }
                Command::MoveTo { x, y } => {
                    out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
                }
                Command::LineTo { x, y } => {
                    out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
                }
                Command::ClosePath => out.push_str("h\n"),
                Command::Stroke => out.push_str("S\n"),
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = page_height - *y - *height;
                    out.push_str(&format!(
                        "{} {} {} {} re\nf\n",
                        fmt_pt(*x),
                        fmt_pt(draw_y),
                        fmt_pt(*width),
                        fmt_pt(*height)
                    ));
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => {
                    let Some(name) = self.image_name_map.get(resource_id) else {
                        continue;
                    };
                    let draw_y = page_height - *y - *height;
                    out.push_str("q\n");
                    out.push_str(&format!(
                        "{} 0 0 {} {} {} cm\n",
                        fmt_pt(*width),
                        fmt_pt(*height),
                        fmt_pt(*x),
                        fmt_pt(draw_y)
                    ));
                    out.push_str(&format!("/{} Do\nQ\n", name));
                }
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> io::Result<usize> {
        let xobjects = self
            .image_resources
            .iter()
            .map(|(name, id)| format!("/{} {} 0 R", name, id))
            .collect::<Vec<_>>()
            .join(" ");
        let resources = if xobjects.is_empty() {
            "<< /ProcSet [/PDF /ImageC] >>".to_string()
        } else {
            format!("<< /ProcSet [/PDF /ImageC] /XObject << {} >> >>", xobjects)
        };
        self.write_object(PDF_RESOURCES_ID, &resources)?;

        let kids = self
            .page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids,
            self.page_ids.len()
        );
        self.write_object(PDF_PAGES_ID, &pages)?;
        let catalog = format!("<< /Type /Catalog /Pages {} 0 R >>", PDF_PAGES_ID);
        self.write_object(PDF_CATALOG_ID, &catalog)?;

        let total_objects = self.next_id.saturating_sub(1);
        let xref_start = self.offset;
        write_str(
            self.writer,
            &format!("xref\n0 {}\n", total_objects + 1),
            &mut self.offset,
        )?;
        write_bytes(self.writer, b"0000000000 65535 f \n", &mut self.offset)?;
        for id in 1..=total_objects {
            let obj_offset = self.offsets.get(id).copied().unwrap_or(0);
            write_str(
                self.writer,
                &format!("{:010} 00000 n \n", obj_offset),
                &mut self.offset,
            )?;
        }
        let trailer = format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            total_objects + 1,
            PDF_CATALOG_ID,
            xref_start
        );
        write_str(self.writer, &trailer, &mut self.offset)?;
        Ok(self.offset)
    }
}

/// Image ids in first-use order across all pages.
fn referenced_images(pages: &[Page]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for page in pages {
        for cmd in &page.commands {
            if let Command::DrawImage { resource_id, .. } = cmd {
                if seen.insert(resource_id.clone()) {
                    out.push(resource_id.clone());
                }
            }
        }
    }
    out
}

fn hash_image(image: &RgbaImage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_be_bytes());
    hasher.update(image.height().to_be_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().into()
}

fn encode_image(image: &RgbaImage) -> EncodedImage {
    let pixels = image.width() as usize * image.height() as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for px in image.pixels() {
        rgb.extend_from_slice(&px.0[..3]);
        alpha.push(px.0[3]);
    }
    let opaque = alpha.iter().all(|a| *a == 255);
    EncodedImage {
        width: image.width(),
        height: image.height(),
        rgb: flate_compress(&rgb),
        alpha: if opaque {
            None
        } else {
            Some(flate_compress(&alpha))
        },
    }
}

fn flate_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn stream_object(content: &str) -> String {
    let length = content.len();
    format!("<< /Length {} >>\nstream\n{}\nendstream", length, content)
}

fn write_pdf_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    body: &[u8],
) -> io::Result<()> {
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(writer, &format!("{} 0 obj\n", obj_id), offset)?;
    write_bytes(writer, body, offset)?;
    write_bytes(writer, b"\nendobj\n", offset)?;
    Ok(())
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli())
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn rgb_to_cmyk(color: Color) -> (f32, f32, f32, f32) {
    let r = clamp_unit(color.r);
    let g = clamp_unit(color.g);
    let b = clamp_unit(color.b);
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 - 1e-6 {
        return (0.0, 0.0, 0.0, 1.0);
    }
    let c = (1.0 - r - k) / (1.0 - k);
    let m = (1.0 - g - k) / (1.0 - k);
    let y = (1.0 - b - k) / (1.0 - k);
    (clamp_unit(c), clamp_unit(m), clamp_unit(y), clamp_unit(k))
}

fn color_to_pdf_fill(color: Color, space: ColorSpace) -> String {
    match space {
        ColorSpace::Rgb => format!("{} {} {} rg\n", fmt(color.r), fmt(color.g), fmt(color.b)),
        ColorSpace::Cmyk => {
            let (c, m, y, k) = rgb_to_cmyk(color);
            format!("{} {} {} {} k\n", fmt(c), fmt(m), fmt(y), fmt(k))
        }
    }
}

fn color_to_pdf_stroke(color: Color, space: ColorSpace) -> String {
    match space {
        ColorSpace::Rgb => format!("{} {} {} RG\n", fmt(color.r), fmt(color.g), fmt(color.b)),
        ColorSpace::Cmyk => {
            let (c, m, y, k) = rgb_to_cmyk(color);
            format!("{} {} {} {} K\n", fmt(c), fmt(m), fmt(y), fmt(k))
        }
    }
}

/// Page count of a PDF written by this module (or any other), read back with
/// lopdf.
pub fn pdf_page_count(bytes: &[u8]) -> Result<usize, crate::ProductionError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|err| crate::ProductionError::Pdf(err.to_string()))?;
    Ok(doc.get_pages().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::types::Size;
    use image::Rgba;

    fn count_token(bytes: &[u8], token: &[u8]) -> usize {
        if token.is_empty() || bytes.len() < token.len() {
            return 0;
        }
        bytes.windows(token.len()).filter(|w| *w == token).count()
    }

    fn solid(w: u32, h: u32, px: [u8; 4]) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    #[test]
    fn pages_load_back_with_lopdf() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.draw_rect(Pt::from_f64(10.0), Pt::from_f64(10.0), Pt::from_f64(50.0), Pt::from_f64(50.0));
        canvas.show_page();
        canvas.draw_rect(Pt::from_f64(10.0), Pt::from_f64(10.0), Pt::from_f64(50.0), Pt::from_f64(50.0));
        let bytes = document_to_pdf(&canvas.finish(), &PdfOptions::default()).expect("pdf");
        assert!(bytes.starts_with(b"%PDF-1.7"));
        assert_eq!(pdf_page_count(&bytes).expect("load"), 2);
    }

    #[test]
    fn rect_is_flipped_to_bottom_left_origin() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.draw_rect(Pt::from_f64(36.0), Pt::from_f64(36.0), Pt::from_f64(72.0), Pt::from_f64(100.0));
        let bytes = document_to_pdf(&canvas.finish(), &PdfOptions::default()).expect("pdf");
        // 792 - 36 - 100
        assert_eq!(count_token(&bytes, b"36 656 72 100 re"), 1);
    }

    #[test]
    fn identical_images_are_embedded_once() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.register_image("a", solid(4, 4, [255, 0, 0, 255]));
        canvas.register_image("b", solid(4, 4, [255, 0, 0, 255]));
        canvas.register_image("c", solid(4, 4, [0, 0, 255, 128]));
        for id in ["a", "b", "c"] {
            canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f64(4.0), Pt::from_f64(4.0), id);
        }
        let bytes = document_to_pdf(&canvas.finish(), &PdfOptions::default()).expect("pdf");
        assert_eq!(count_token(&bytes, b"/Subtype /Image"), 3);
        assert_eq!(count_token(&bytes, b"/SMask"), 1);
        assert_eq!(count_token(&bytes, b"/Im1 Do"), 2);
        assert_eq!(count_token(&bytes, b"/Im2 Do"), 1);
    }

    #[test]
    fn cmyk_marks_use_pure_black() {
        let mut canvas = Canvas::new(Size::letter());
        canvas.set_fill_color(Color::gray(0.5));
        canvas.set_fill_color(Color::BLACK);
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f64(10.0), Pt::from_f64(10.0));
        let options = PdfOptions {
            color_space: ColorSpace::Cmyk,
        };
        let bytes = document_to_pdf(&canvas.finish(), &options).expect("pdf");
        assert_eq!(count_token(&bytes, b"0 0 0 1 k"), 1);
        assert_eq!(count_token(&bytes, b"0 0 0 0.5 k"), 1);
        assert_eq!(count_token(&bytes, b" rg"), 0);
    }

    #[test]
    fn output_is_deterministic() {
        let build = || {
            let mut canvas = Canvas::new(Size::letter());
            canvas.register_image("x", solid(3, 2, [1, 2, 3, 200]));
            canvas.draw_image(Pt::ZERO, Pt::ZERO, Pt::from_f64(30.0), Pt::from_f64(20.0), "x");
            document_to_pdf(&canvas.finish(), &PdfOptions::default()).expect("pdf")
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn milli_formatting_trims_zeros() {
        assert_eq!(format_milli(612_000), "612");
        assert_eq!(format_milli(-1_500), "-1.5");
        assert_eq!(fmt(0.9), "0.9");
    }
}
