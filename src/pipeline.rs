use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::artifacts::{ArtifactBuilder, SlotPair};
use crate::assets::{fetch_design_assets, AssetStore};
use crate::config::ProductionConfig;
use crate::design::DesignSnapshot;
use crate::error::{GeometryWarning, ProductionError};
use crate::font::CardFont;
use crate::geometry::{GeometryProcessor, GeometrySet, ProcessedGeometry};
use crate::layout::{LayoutMode, PageFill};
use crate::orders::{order_path_component, short_order_id, OrderStore};
use crate::path::{CutPath, PathEmitter};
use crate::pdf::pdf_page_count;
use crate::perf::{timed, PerfLogger};
use crate::render::{CardLayers, LayerRenderer, RenderSource};
use crate::trace::ContourTracer;

pub const MANIFEST_FILE: &str = "manifest.json";

/// The six vector artifacts derived from one card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardCutPaths {
    pub hero_cut: CutPath,
    pub hero_spacer: CutPath,
    pub frame_cut: CutPath,
    pub frame_spacer: CutPath,
    pub hero_frame_cut: CutPath,
    pub hero_frame_spacer: CutPath,
}

impl CardCutPaths {
    pub fn all(&self) -> [&CutPath; 6] {
        [
            &self.hero_cut,
            &self.hero_spacer,
            &self.frame_cut,
            &self.frame_spacer,
            &self.hero_frame_cut,
            &self.hero_frame_spacer,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct CardOutput {
    pub index: usize,
    pub dir: PathBuf,
    pub layers: CardLayers,
    pub cut_paths: CardCutPaths,
    pub warnings: Vec<GeometryWarning>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutput {
    pub order_id: String,
    pub short_id: String,
    pub dir: PathBuf,
    pub produced: Vec<usize>,
    pub skipped: Vec<usize>,
    pub warnings: usize,
    pub top_sheets: Vec<PathBuf>,
    pub spacer_sheets: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub dir: PathBuf,
    pub produced: Vec<usize>,
    pub sheets: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    order_id: &'a str,
    short_id: &'a str,
    cards: usize,
    skipped: &'a [usize],
    files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    name: String,
    bytes: u64,
    sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<usize>,
}

pub struct PipelineBuilder {
    config: ProductionConfig,
    assets: Option<Arc<dyn AssetStore>>,
    font: Option<Option<CardFont>>,
    perf: Option<PerfLogger>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: ProductionConfig::default(),
            assets: None,
            font: None,
            perf: None,
        }
    }

    pub fn config(mut self, config: ProductionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn assets(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(store);
        self
    }

    pub fn asset_store(self, store: impl AssetStore + 'static) -> Self {
        self.assets(Arc::new(store))
    }

    /// Pins the text font instead of running discovery. `None` disables
    /// lettering.
    pub fn font(mut self, font: Option<CardFont>) -> Self {
        self.font = Some(font);
        self
    }

    pub fn perf_logger(mut self, perf: PerfLogger) -> Self {
        self.perf = Some(perf);
        self
    }

    pub fn build(self) -> Result<ProductionPipeline, ProductionError> {
        self.config.validate()?;
        let assets = self.assets.ok_or_else(|| {
            ProductionError::InvalidConfiguration("pipeline needs an asset store".to_string())
        })?;
        let perf = match (self.perf, &self.config.perf_log) {
            (Some(perf), _) => Some(perf),
            (None, Some(path)) => Some(PerfLogger::new(path)?),
            (None, None) => None,
        };
        let config = self.config;
        let renderer = match self.font {
            Some(font) => LayerRenderer::with_font(&config, font),
            None => LayerRenderer::new(&config),
        };
        Ok(ProductionPipeline {
            tracer: ContourTracer::from_config(&config),
            geometry: GeometryProcessor::from_config(&config),
            emitter: PathEmitter::from_config(&config),
            artifacts: ArtifactBuilder::new(&config).with_perf(perf.clone()),
            renderer,
            assets,
            perf,
            config,
        })
    }
}

/// Drives cards through render, trace, geometry and emission, then gathers
/// per-card results into order or batch sheets.
pub struct ProductionPipeline {
    config: ProductionConfig,
    assets: Arc<dyn AssetStore>,
    renderer: LayerRenderer,
    tracer: ContourTracer,
    geometry: GeometryProcessor,
    emitter: PathEmitter,
    artifacts: ArtifactBuilder,
    perf: Option<PerfLogger>,
}

impl ProductionPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &ProductionConfig {
        &self.config
    }

    /// `<out_root>/<order_id>`. Ids that would resolve outside `out_root`
    /// are rejected before anything touches the filesystem.
    pub fn order_dir(out_root: &Path, order_id: &str) -> Result<PathBuf, ProductionError> {
        let id = order_path_component(order_id).ok_or_else(|| {
            ProductionError::InvalidConfiguration(format!(
                "order id {order_id:?} is not a plain directory name"
            ))
        })?;
        Ok(out_root.join(id))
    }

    /// Renders and traces one card into `<out_dir>/card_{index}`. Errors come
    /// back wrapped with the card index.
    pub fn process_card(
        &self,
        index: usize,
        design: &DesignSnapshot,
        out_dir: &Path,
    ) -> Result<CardOutput, ProductionError> {
        self.process_card_inner(index, design, out_dir)
            .map_err(|err| ProductionError::card(index, err))
    }

    fn process_card_inner(
        &self,
        index: usize,
        design: &DesignSnapshot,
        out_dir: &Path,
    ) -> Result<CardOutput, ProductionError> {
        let perf = self.perf.as_ref();
        let card = Some(index);
        let bundle = timed(perf, "card.assets", card, || {
            fetch_design_assets(design, &*self.assets, self.config.derived_background_mix)
        })?;
        let source = RenderSource::resolve(&bundle, design)?;
        let layers = timed(perf, "card.render", card, || self.renderer.render(&source));

        let (hero, frame, union) = timed(perf, "card.trace", card, || {
            (
                self.tracer.trace(&layers.hero),
                self.tracer.trace(&layers.frame),
                self.tracer.trace_union(&[&layers.hero, &layers.frame]),
            )
        });
        let mut warnings = Vec::new();
        warnings.extend(hero.warnings);
        warnings.extend(frame.warnings);
        warnings.extend(union.warnings);

        let (hero, frame, union) = timed(perf, "card.geometry", card, || {
            (
                self.geometry.process(&hero.geometry, "hero"),
                self.geometry.process(&frame.geometry, "frame"),
                self.geometry.process(&union.geometry, "hero_frame"),
            )
        });
        let canvas = self.renderer.canvas();
        let mut emit = |name: &str, processed: ProcessedGeometry| {
            warnings.extend(processed.warnings);
            (
                self.emit(&format!("{name}_cut"), &processed.cut, canvas),
                self.emit(&format!("{name}_spacer"), &processed.spacer, canvas),
            )
        };
        let (hero_cut, hero_spacer) = emit("hero", hero);
        let (frame_cut, frame_spacer) = emit("frame", frame);
        let (hero_frame_cut, hero_frame_spacer) = emit("hero_frame", union);
        let cut_paths = CardCutPaths {
            hero_cut,
            hero_spacer,
            frame_cut,
            frame_spacer,
            hero_frame_cut,
            hero_frame_spacer,
        };

        let dir = out_dir.join(format!("card_{index}"));
        let files = timed(perf, "card.write", card, || {
            let mut files = layers.write_to(&dir)?;
            for path in cut_paths.all() {
                files.push(path.write_to(&dir)?);
            }
            Ok::<_, ProductionError>(files)
        })?;
        if let Some(perf) = perf {
            perf.log_counts(
                "card.geometry",
                card,
                &[
                    ("warnings", warnings.len() as u64),
                    ("empty_paths", cut_paths.all().iter().filter(|p| p.is_empty()).count() as u64),
                ],
            );
        }
        log::info!(
            "card {} done ({} source, {} warnings)",
            index,
            if layers.from_snapshots { "snapshot" } else { "raw" },
            warnings.len()
        );
        Ok(CardOutput {
            index,
            dir,
            layers,
            cut_paths,
            warnings,
            files,
        })
    }

    fn emit(&self, name: &str, geometry: &GeometrySet, canvas: (u32, u32)) -> CutPath {
        self.emitter.emit(name, geometry, canvas)
    }

    /// Produces every card of `order_id`, then the order sheets and manifest
    /// in `<out_root>/<order_id>`.
    pub fn process_order(
        &self,
        orders: &dyn OrderStore,
        order_id: &str,
        out_root: &Path,
    ) -> Result<OrderOutput, ProductionError> {
        let order = orders.load(order_id)?;
        if order.cards.is_empty() {
            return Err(ProductionError::NoCards(order_id.to_string()));
        }
        let dir = Self::order_dir(out_root, order_id)?;
        std::fs::create_dir_all(&dir)?;
        log::info!("order {}: {} cards -> {}", order_id, order.cards.len(), dir.display());

        let designs: Vec<&DesignSnapshot> = order.cards.iter().map(|c| &c.design).collect();
        let (cards, skipped) = self.produce_cards(&designs, &dir)?;

        let short_id = short_order_id(order_id);
        let mut files = Vec::new();
        let mut backgrounds = Vec::with_capacity(cards.len());
        let mut foregrounds = Vec::with_capacity(cards.len());
        let mut cut_paths = Vec::with_capacity(cards.len());
        let mut produced = Vec::with_capacity(cards.len());
        let mut warnings = 0;
        for card in cards {
            produced.push(card.index);
            warnings += card.warnings.len();
            files.extend(card.files);
            backgrounds.push(Some(Arc::new(card.layers.background)));
            foregrounds.push(SlotPair::new(
                Some(Arc::new(card.layers.hero)),
                Some(Arc::new(card.layers.frame_text)),
            ));
            cut_paths.push(card.cut_paths);
        }

        let bg = self.artifacts.background_sheet(&backgrounds)?;
        files.push(write_file(&dir, &format!("ord_{short_id}_bg_6up.pdf"), &bg)?);
        let fg = self.artifacts.foreground_sheet(&foregrounds)?;
        files.push(write_file(&dir, &format!("ord_{short_id}_fg_4up.pdf"), &fg)?);

        let top: Vec<SlotPair<&CutPath>> = cut_paths
            .iter()
            .map(|c| SlotPair::new(Some(&c.hero_frame_cut), Some(&c.frame_cut)))
            .collect();
        let top_sheets = self.write_cut_sheets(&dir, &short_id, "top", &top)?;
        // spacer stock is laid twice per card
        let spacer: Vec<SlotPair<&CutPath>> = cut_paths
            .iter()
            .flat_map(|c| {
                let pair = SlotPair::new(Some(&c.hero_frame_spacer), Some(&c.frame_spacer));
                [pair.clone(), pair]
            })
            .collect();
        let spacer_sheets = self.write_cut_sheets(&dir, &short_id, "spacer", &spacer)?;
        files.extend(top_sheets.iter().cloned());
        files.extend(spacer_sheets.iter().cloned());

        let manifest = timed(self.perf.as_ref(), "order.manifest", None, || {
            write_manifest(&dir, order_id, &short_id, produced.len(), &skipped, &files)
        })?;
        files.push(manifest);
        if let Some(perf) = &self.perf {
            perf.flush();
        }
        log::info!(
            "order {}: {} cards produced, {} skipped, {} files",
            order_id,
            produced.len(),
            skipped.len(),
            files.len()
        );
        Ok(OrderOutput {
            order_id: order_id.to_string(),
            short_id,
            dir,
            produced,
            skipped,
            warnings,
            top_sheets,
            spacer_sheets,
            files,
        })
    }

    /// Gangs designs three to a sheet: `sheet_{NNN}.pdf` plus matching cut
    /// and spacer SVGs.
    pub fn process_batch(
        &self,
        designs: &[DesignSnapshot],
        out_dir: &Path,
    ) -> Result<BatchOutput, ProductionError> {
        if designs.is_empty() {
            return Err(ProductionError::NoCards("batch".to_string()));
        }
        std::fs::create_dir_all(out_dir)?;
        let refs: Vec<&DesignSnapshot> = designs.iter().collect();
        let (cards, _skipped) = self.produce_cards(&refs, out_dir)?;

        let mut files = Vec::new();
        let mut prints = Vec::with_capacity(cards.len());
        let mut cut_paths = Vec::with_capacity(cards.len());
        let mut produced = Vec::with_capacity(cards.len());
        for card in cards {
            produced.push(card.index);
            files.extend(card.files);
            prints.push(SlotPair::new(
                Some(Arc::new(card.layers.hero)),
                Some(Arc::new(card.layers.frame)),
            ));
            cut_paths.push(card.cut_paths);
        }

        let sheets = self.artifacts.ganged_print_sheets(&prints)?;
        let cut_pairs: Vec<SlotPair<&CutPath>> = cut_paths
            .iter()
            .map(|c| SlotPair::new(Some(&c.hero_cut), Some(&c.frame_cut)))
            .collect();
        let spacer_pairs: Vec<SlotPair<&CutPath>> = cut_paths
            .iter()
            .map(|c| SlotPair::new(Some(&c.hero_spacer), Some(&c.frame_spacer)))
            .collect();
        let cuts = self
            .artifacts
            .cut_sheets(LayoutMode::Ganged, &cut_pairs, PageFill::RepeatFirst);
        let spacers =
            self.artifacts
                .cut_sheets(LayoutMode::Ganged, &spacer_pairs, PageFill::RepeatFirst);
        if cuts.len() != sheets.len() || spacers.len() != sheets.len() {
            return Err(ProductionError::Layout(format!(
                "ganged sheets out of step: {} print, {} cut, {} spacer",
                sheets.len(),
                cuts.len(),
                spacers.len()
            )));
        }
        for (n, ((pdf, cut), spacer)) in sheets.iter().zip(&cuts).zip(&spacers).enumerate() {
            let stem = format!("sheet_{:03}", n + 1);
            files.push(write_file(out_dir, &format!("{stem}.pdf"), pdf)?);
            files.push(write_file(out_dir, &format!("{stem}_cut.svg"), cut.as_bytes())?);
            files.push(write_file(out_dir, &format!("{stem}_spacer.svg"), spacer.as_bytes())?);
        }
        log::info!("batch: {} cards on {} sheets", produced.len(), sheets.len());
        Ok(BatchOutput {
            dir: out_dir.to_path_buf(),
            produced,
            sheets: sheets.len(),
            files,
        })
    }

    /// All-or-nothing unless `skip_failed_cards` is set; even then at least
    /// one card has to make it.
    fn produce_cards(
        &self,
        designs: &[&DesignSnapshot],
        dir: &Path,
    ) -> Result<(Vec<CardOutput>, Vec<usize>), ProductionError> {
        let mut cards = Vec::with_capacity(designs.len());
        let mut skipped = Vec::new();
        let mut first_error = None;
        for (index, design) in designs.iter().enumerate() {
            match self.process_card(index, design, dir) {
                Ok(card) => cards.push(card),
                Err(err) if self.config.skip_failed_cards => {
                    log::warn!("skipping {}", err);
                    skipped.push(index);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        if cards.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| ProductionError::NoCards("no designs".to_string())));
        }
        Ok((cards, skipped))
    }

    fn write_cut_sheets(
        &self,
        dir: &Path,
        short_id: &str,
        kind: &str,
        pairs: &[SlotPair<&CutPath>],
    ) -> Result<Vec<PathBuf>, ProductionError> {
        let pages = self
            .artifacts
            .cut_sheets(LayoutMode::Foreground, pairs, PageFill::LeaveBlank);
        let total = pages.len();
        pages
            .iter()
            .enumerate()
            .map(|(n, svg)| {
                let name = if total > 1 {
                    format!("ord_{short_id}_{kind}_{}.svg", n + 1)
                } else {
                    format!("ord_{short_id}_{kind}.svg")
                };
                write_file(dir, &name, svg.as_bytes())
            })
            .collect()
    }
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, ProductionError> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    log::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

fn relative_name(dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_manifest(
    dir: &Path,
    order_id: &str,
    short_id: &str,
    cards: usize,
    skipped: &[usize],
    files: &[PathBuf],
) -> Result<PathBuf, ProductionError> {
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)?;
        let is_pdf = path.extension().is_some_and(|ext| ext == "pdf");
        let pages = if is_pdf {
            Some(pdf_page_count(&bytes)?)
        } else {
            None
        };
        entries.push(ManifestEntry {
            name: relative_name(dir, path),
            bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
            pages,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let manifest = Manifest {
        order_id,
        short_id,
        cards,
        skipped,
        files: entries,
    };
    let mut text = serde_json::to_vec_pretty(&manifest)?;
    text.push(b'\n');
    write_file(dir, MANIFEST_FILE, &text)
}
