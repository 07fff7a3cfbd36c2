//! Slip rasterization: a primary box painter and a structural fallback that
//! wraps the region as XHTML inside an SVG and decodes it.

use async_trait::async_trait;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use resvg::tiny_skia::{self, FilterQuality, Pixmap, PixmapPaint, Transform};
use resvg::usvg;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{SlipError, SlipResult};
use crate::format::escape_html;
use crate::logging::PerformanceTimer;
use crate::slip::{Element, Node, SlipRegion, SlipTheme};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Options handed to a primary renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub background: Rgba<u8>,
    pub scale: f64,
    /// Request cross-origin images with CORS
    pub use_cors: bool,
    /// Permit drawing content that taints the canvas
    pub allow_taint: bool,
}

impl RenderOptions {
    pub fn cors_safe(scale: f64) -> Self {
        Self {
            background: WHITE,
            scale,
            use_cors: true,
            allow_taint: false,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the message names a tainted canvas, a security restriction or
    /// a cross-origin resource
    pub fn is_taint(&self) -> bool {
        is_taint_message(&self.message)
    }
}

pub fn is_taint_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["taint", "security", "cross-origin"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Canvas-producing renderer used as the primary capture path
#[async_trait]
pub trait CanvasRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, region: &SlipRegion, options: &RenderOptions) -> Result<RgbaImage, RenderError>;
}

/// Decodes an SVG document into pixels of the given size
#[async_trait]
pub trait VectorDecoder: Send + Sync {
    async fn decode(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError>;
}

/// SVG decoding through resvg. Crisp edges, nearest-neighbour compositing.
#[derive(Clone)]
pub struct ResvgDecoder {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl Default for ResvgDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResvgDecoder {
    pub fn new() -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        debug!("🔤 Loaded {} font faces", fontdb.len());
        Self {
            fontdb: Arc::new(fontdb),
        }
    }

    /// Decoder without any fonts; text is dropped, boxes still paint
    pub fn without_fonts() -> Self {
        Self {
            fontdb: Arc::new(usvg::fontdb::Database::new()),
        }
    }

    fn decode_blocking(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
        let options = usvg::Options {
            fontdb: self.fontdb.clone(),
            shape_rendering: usvg::ShapeRendering::CrispEdges,
            image_rendering: usvg::ImageRendering::OptimizeSpeed,
            ..usvg::Options::default()
        };

        let tree = usvg::Tree::from_str(svg, &options)
            .map_err(|e| RenderError::new(format!("invalid slip svg: {}", e)))?;

        let mut layer = Pixmap::new(width, height)
            .ok_or_else(|| RenderError::new(format!("cannot allocate {}x{} surface", width, height)))?;

        let size = tree.size();
        let transform = Transform::from_scale(width as f32 / size.width(), height as f32 / size.height());
        resvg::render(&tree, transform, &mut layer.as_mut());

        // Smoothing off when the decoded layer lands on the white surface
        let mut surface = Pixmap::new(width, height)
            .ok_or_else(|| RenderError::new("cannot allocate output surface"))?;
        surface.fill(tiny_skia::Color::WHITE);
        let paint = PixmapPaint {
            quality: FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        surface.draw_pixmap(0, 0, layer.as_ref(), &paint, Transform::identity(), None);

        // Opaque surface, so premultiplied and straight alpha agree
        RgbaImage::from_raw(width, height, surface.take())
            .ok_or_else(|| RenderError::new("decoded buffer has the wrong size"))
    }
}

#[async_trait]
impl VectorDecoder for ResvgDecoder {
    async fn decode(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
        self.decode_blocking(svg, width, height)
    }
}

/// Walks the laid-out boxes and paints borders and text, html2canvas style.
/// Refuses regions holding cross-origin images without a CORS grant.
#[derive(Clone, Default)]
pub struct BoxPainter {
    decoder: ResvgDecoder,
}

impl BoxPainter {
    pub fn new(decoder: ResvgDecoder) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl CanvasRenderer for BoxPainter {
    fn name(&self) -> &str {
        "box-painter"
    }

    async fn render(&self, region: &SlipRegion, options: &RenderOptions) -> Result<RgbaImage, RenderError> {
        if !options.allow_taint {
            if let Some(src) = region.tainting_images().first() {
                return Err(RenderError::new(format!(
                    "SecurityError: the canvas has been tainted by cross-origin data ({})",
                    src
                )));
            }
        }

        let (width, height) = scaled_size(region.width, region.height, options.scale)
            .ok_or_else(|| RenderError::new("region has no layout box"))?;

        let svg = svg_document(region, width, height, &paint_boxes(&region.root, &region.theme));
        self.decoder.decode_blocking(&svg, width, height)
    }
}

/// Captured slip: pixels plus their PNG encoding
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub image: RgbaImage,
    pub png: Vec<u8>,
}

impl ExportArtifact {
    pub fn from_image(image: RgbaImage) -> SlipResult<Self> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| SlipError::rasterization_with_source("PNG encoding failed", e))?;
        Ok(Self { image, png })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Region to pixels with the taint-aware fallback policy
#[derive(Clone)]
pub struct Rasterizer {
    primary: Option<Arc<dyn CanvasRenderer>>,
    decoder: Arc<dyn VectorDecoder>,
    device_pixel_ratio: f64,
}

impl Rasterizer {
    pub fn new(decoder: Arc<dyn VectorDecoder>) -> Self {
        Self {
            primary: None,
            decoder,
            device_pixel_ratio: 1.0,
        }
    }

    pub fn with_primary(mut self, primary: Arc<dyn CanvasRenderer>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub async fn rasterize(&self, region: &SlipRegion, scale_multiplier: f64) -> SlipResult<ExportArtifact> {
        let _timer = PerformanceTimer::start("rasterize slip");
        let scale = self.device_pixel_ratio * scale_multiplier;
        let (width, height) = scaled_size(region.width, region.height, scale)
            .ok_or_else(|| SlipError::rasterization("could not produce image: empty region"))?;

        if let Some(primary) = &self.primary {
            match primary.render(region, &RenderOptions::cors_safe(scale)).await {
                Ok(canvas) => {
                    info!("🖼️  Captured {}x{} with {}", width, height, primary.name());
                    return ExportArtifact::from_image(flatten_onto_white(canvas, width, height));
                }
                Err(e) if e.is_taint() => {
                    warn!("🚫 Capture blocked: {}", e);
                    return Err(SlipError::RasterizationTaint { message: e.message });
                }
                Err(e) => {
                    warn!("{} failed, using structural fallback: {}", primary.name(), e);
                }
            }
        }

        let svg = structural_svg(region, width, height);
        let canvas = self.decoder.decode(&svg, width, height).await.map_err(|e| {
            SlipError::rasterization_with_source("could not produce image", e)
        })?;

        info!("🖼️  Captured {}x{} with structural fallback", width, height);
        ExportArtifact::from_image(flatten_onto_white(canvas, width, height))
    }
}

/// Pixel size of a layout box at `scale`, rounded up
pub fn scaled_size(width: f64, height: f64, scale: f64) -> Option<(u32, u32)> {
    let w = (width * scale).ceil();
    let h = (height * scale).ceil();
    if !w.is_finite() || !h.is_finite() || w < 1.0 || h < 1.0 || w > u32::MAX as f64 || h > u32::MAX as f64 {
        return None;
    }
    Some((w as u32, h as u32))
}

/// The structural fallback document: the region's snapshot as XHTML in a
/// `foreignObject`, sized to the scaled pixels over an unscaled view box.
/// Painted boxes sit in the `switch` alternative for decoders that cannot
/// lay out HTML.
pub fn structural_svg(region: &SlipRegion, width: u32, height: u32) -> String {
    let snapshot = region.snapshot();

    let mut body = snapshot.root.clone();
    let css = snapshot.same_origin_css();
    if !css.is_empty() {
        body.children
            .insert(0, Node::Element(Element::new("style").with_text(css)));
    }

    let content = format!(
        "<switch><foreignObject x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\" \
         requiredExtensions=\"http://www.w3.org/1999/xhtml\">{xhtml}</foreignObject>{boxes}</switch>",
        w = snapshot.width,
        h = snapshot.height,
        xhtml = body.to_xhtml(),
        boxes = paint_boxes(&snapshot.root, &snapshot.theme),
    );
    svg_document(&snapshot, width, height, &content)
}

fn svg_document(region: &SlipRegion, width: u32, height: u32, content: &str) -> String {
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\" \
         shape-rendering=\"crispEdges\" image-rendering=\"optimizeSpeed\">\
         <rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>{}</svg>",
        width, height, region.width, region.height, content
    )
}

/// SVG group with a framed rect per grid cell and the text each box shows
fn paint_boxes(root: &Element, theme: &SlipTheme) -> String {
    let mut out = String::from("<g>");
    root.walk(&mut |element| {
        let Some(frame) = element.frame else {
            return;
        };

        if element.tag == "td" {
            out.push_str(&format!(
                "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"1\"/>",
                frame.x, frame.y, frame.width, frame.height, escape_html(&theme.border_color)
            ));
        }

        let text = if element.is_form_control() {
            element.value.clone().unwrap_or_default()
        } else {
            element.own_text()
        };
        if text.is_empty() {
            return;
        }

        let color = if element.has_class("neg") {
            &theme.shortage_color
        } else if element.has_class("pos") {
            &theme.excess_color
        } else if element.has_class("label") {
            &theme.label_color
        } else {
            &theme.text_color
        };
        let bold = element.has_class("label") || element.has_class("title");
        let (x, anchor) = if element.has_class("title") {
            (frame.x + frame.width / 2.0, "middle")
        } else if element.has_class("num") {
            (frame.x + frame.width - 4.0, "end")
        } else {
            (frame.x + 4.0, "start")
        };
        let y = frame.y + frame.height / 2.0 + theme.font_size * 0.35;

        out.push_str(&format!(
            "<text x=\"{}\" y=\"{}\" fill=\"{}\" font-family=\"{}\" font-size=\"{}\" font-weight=\"{}\" text-anchor=\"{}\">{}</text>",
            x,
            y,
            escape_html(color),
            escape_html(&theme.font_family),
            theme.font_size,
            if bold { "bold" } else { "normal" },
            anchor,
            escape_html(&text)
        ));
    });
    out.push_str("</g>");
    out
}

/// Resize to the target when a renderer disagrees on size, then blend every
/// pixel over white so the result is fully opaque
fn flatten_onto_white(canvas: RgbaImage, width: u32, height: u32) -> RgbaImage {
    let canvas = if canvas.dimensions() == (width, height) {
        canvas
    } else {
        debug!(
            "Renderer returned {:?}, resizing to {}x{}",
            canvas.dimensions(),
            width,
            height
        );
        imageops::resize(&canvas, width, height, imageops::FilterType::Nearest)
    };

    let mut out = RgbaImage::from_pixel(width, height, WHITE);
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgba([blend(r), blend(g), blend(b), 255]));
    }
    out
}
