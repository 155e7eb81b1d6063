//! # Pages
//!
//! A page builds the container tree for one sheet: body columns wired to
//! the document chain in construction order (which fixes multi-column
//! reading order), a float region at the top of the content area, a
//! footnote region growing upward from its bottom, and header/footer
//! bands in the margins.
//!
//! The float and footnote regions own growable height literals; the
//! columns' position and height are expressions over them, so a float or
//! footnote arriving mid-render shrinks every column at its next advance.

use serde::{Deserialize, Serialize};

use crate::backend::{Orientation, PageOutput};
use crate::dimension::Dim;
use crate::document::RenderCtx;
use crate::error::Fatal;
use crate::flowable::Flowable;
use crate::layout::{ContainerArena, ContainerId, ContainerKind};
use crate::style::StyleDecl;

/// Standard sheet sizes in points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSize {
    #[default]
    A4,
    A3,
    A5,
    Letter,
    Legal,
    Custom {
        width: f64,
        height: f64,
    },
}

impl PageSize {
    /// Portrait (width, height) in points.
    pub fn dimensions(&self) -> (f64, f64) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::A3 => (841.89, 1190.55),
            PageSize::A5 => (419.53, 595.28),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
            PageSize::Custom { width, height } => (*width, *height),
        }
    }
}

/// Edge distances in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(v: f64) -> Self {
        Margins { top: v, right: v, bottom: v, left: v }
    }
}

impl Default for Margins {
    fn default() -> Self {
        Margins::uniform(54.0)
    }
}

/// Sheet geometry and page furniture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageOptions {
    pub size: PageSize,
    pub orientation: Orientation,
    pub margin: Margins,
    /// Body columns; content flows through them left to right.
    pub columns: usize,
    pub column_gap: f64,
    /// Header/footer template; `{page}` expands to the page number.
    pub header: Option<String>,
    pub footer: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        PageOptions {
            size: PageSize::A4,
            orientation: Orientation::Portrait,
            margin: Margins::default(),
            columns: 1,
            column_gap: 18.0,
            header: None,
            footer: None,
        }
    }
}

/// One sheet under construction: the arena plus the ids of its regions.
pub struct Page {
    pub arena: ContainerArena,
    pub root: ContainerId,
    pub columns: Vec<ContainerId>,
    pub float_region: ContainerId,
    pub footnote_region: ContainerId,
    header: ContainerId,
    footer: ContainerId,
    header_text: Option<String>,
    footer_text: Option<String>,
    pub number: usize,
    width: f64,
    height: f64,
    orientation: Orientation,
}

impl Page {
    /// Build the container tree for page `number`.
    pub fn build(options: &PageOptions, number: usize) -> Page {
        let (pw, ph) = options.size.dimensions();
        let (width, height) = match options.orientation {
            Orientation::Portrait => (pw, ph),
            Orientation::Landscape => (ph, pw),
        };
        let margin = options.margin;
        let content_width = (width - margin.left - margin.right).max(0.0);
        let content_height = (height - margin.top - margin.bottom).max(0.0);

        let mut arena = ContainerArena::new();
        let root = arena.add_root(Dim::pt(width), Dim::pt(height), ContainerKind::Fixed);
        let content = arena.new_child(
            root,
            Dim::pt(margin.left),
            Dim::pt(margin.top),
            Dim::pt(content_width),
            Dim::pt(content_height),
            ContainerKind::Fixed,
        );

        // Float space at the top of the content area; grows as floats land.
        let float_height = Dim::pt(0.0);
        let float_region = arena.new_child(
            content,
            Dim::zero(),
            Dim::zero(),
            Dim::pt(content_width),
            float_height.clone(),
            ContainerKind::DownExpanding { max_height: Some(content_height * 0.6) },
        );

        // Footnote space anchored at the content bottom; grows upward.
        let note_height = Dim::pt(0.0);
        let footnote_region = arena.new_child(
            content,
            Dim::zero(),
            Dim::pt(content_height) - note_height.clone(),
            Dim::pt(content_width),
            note_height.clone(),
            ContainerKind::UpExpanding { max_height: Some(content_height * 0.5) },
        );

        // Body columns between the two, sharing their height expressions.
        let columns_n = options.columns.max(1);
        let gap = options.column_gap;
        let column_width =
            ((content_width - gap * (columns_n - 1) as f64) / columns_n as f64).max(0.0);
        let mut columns = Vec::with_capacity(columns_n);
        for i in 0..columns_n {
            let left = i as f64 * (column_width + gap);
            let column_height =
                Dim::pt(content_height) - float_height.clone() - note_height.clone();
            let column = arena.new_child(
                content,
                Dim::pt(left),
                float_height.clone(),
                Dim::pt(column_width),
                column_height,
                ContainerKind::Fixed,
            );
            columns.push(column);
        }

        // Header and footer bands in the margins. They grow without a
        // limit: page furniture is drawn even on sheets with margins
        // narrower than a line, never forced onto another page.
        let header = arena.new_child(
            root,
            Dim::pt(margin.left),
            Dim::pt(margin.top * 0.25),
            Dim::pt(content_width),
            Dim::pt(0.0),
            ContainerKind::DownExpanding { max_height: None },
        );
        let footer = arena.new_child(
            root,
            Dim::pt(margin.left),
            Dim::pt(height - margin.bottom * 0.85),
            Dim::pt(content_width),
            Dim::pt(0.0),
            ContainerKind::DownExpanding { max_height: None },
        );

        Page {
            arena,
            root,
            columns,
            float_region,
            footnote_region,
            header,
            footer,
            header_text: options.header.clone(),
            footer_text: options.footer.clone(),
            number,
            width,
            height,
            orientation: options.orientation,
        }
    }

    /// Render the header/footer templates. Overflowing a band truncates
    /// it; page furniture never forces a new page.
    pub fn render_decorations(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), Fatal> {
        let bands = [
            (self.header, self.header_text.clone(), "header"),
            (self.footer, self.footer_text.clone(), "footer"),
        ];
        for (container, template, style) in bands {
            let Some(template) = template else { continue };
            let text = template.replace("{page}", &self.number.to_string());
            let para = Flowable::paragraph(&text).with_style(StyleDecl::named(style));
            para.flow(ctx, &mut self.arena, container, None, 0.0, None)?;
        }
        Ok(())
    }

    /// Composite the container tree and hand the page to the backend
    /// layer. Consumes the page; drawing is never partially visible.
    pub fn into_output(mut self) -> PageOutput {
        self.arena.place(self.root);
        PageOutput {
            number: self.number,
            width: self.width,
            height: self.height,
            orientation: self.orientation,
            commands: self.arena.take_draw(self.root),
        }
    }
}
