mod artifacts;
mod assets;
mod canvas;
mod config;
mod design;
mod error;
mod font;
mod geometry;
mod jobs;
mod layout;
mod mask;
mod orders;
mod path;
mod pdf;
mod perf;
mod pipeline;
mod raster;
mod render;
mod trace;
mod types;

pub use artifacts::{ArtifactBuilder, SlotPair};
pub use assets::{
    Asset, AssetBundle, AssetKind, AssetOrigin, AssetStore, DirAssetStore, MemoryAssetStore,
    fetch_design_assets,
};
pub use canvas::{Canvas, Command, Document, Page};
pub use config::{NestedContours, ProductionConfig};
pub use design::{DesignFields, DesignSnapshot, ImageRef, PlayerTransform, parse_hex_color};
pub use error::{GeometryWarning, ProductionError};
pub use font::{CardFont, InkBox};
pub use geometry::{
    Bounds, GeometryProcessor, GeometrySet, Point, Polygon, ProcessedGeometry, Ring, Variant,
};
pub use jobs::{JobRegistry, JobStatus};
pub use layout::{GridSpec, LayoutMode, PageFill, SheetLayoutEngine, SheetPage, SheetSlot, SlotCell};
pub use mask::Mask;
pub use orders::{
    CardRecord, DirOrderStore, MemoryOrderStore, OrderRecord, OrderStore, order_path_component,
    short_order_id,
};
pub use path::{CutPath, PathEmitter};
pub use pdf::{PdfOptions, document_to_pdf, pdf_page_count};
pub use perf::PerfLogger;
pub use pipeline::{
    BatchOutput, CardCutPaths, CardOutput, MANIFEST_FILE, OrderOutput, PipelineBuilder,
    ProductionPipeline,
};
pub use render::{CardLayers, LayerRenderer, RenderSource};
pub use trace::{ContourKind, ContourNode, ContourTracer, ContourTree, TraceResult};
pub use types::{Color, ColorSpace, POINTS_PER_INCH, Pt, Rect, Size};
