//! Typed paint property tables.
//!
//! Paint properties of a layer are resolved once into a fixed struct before the per-feature loop
//! runs, so no property is looked up by name while buffers are filled.

use csscolorparser::Color;

use crate::{
    style::{
        expression::PaintValue,
        layer::{FillPaint, LinePaint, StyleLayer, StyleProperty, TranslateAnchor},
    },
    vector::decoder::FeatureProperties,
};

/// Paint properties of line layers which are stored per vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinePaintProperty {
    Color,
    Width,
    Opacity,
    Blur,
    Offset,
    GapWidth,
    Pattern,
}

impl LinePaintProperty {
    pub const ALL: [LinePaintProperty; 7] = [
        LinePaintProperty::Color,
        LinePaintProperty::Width,
        LinePaintProperty::Opacity,
        LinePaintProperty::Blur,
        LinePaintProperty::Offset,
        LinePaintProperty::GapWidth,
        LinePaintProperty::Pattern,
    ];

    /// Name of the shader attribute and of its `u_` uniform counterpart.
    pub fn attribute_name(self) -> &'static str {
        match self {
            LinePaintProperty::Color => "color",
            LinePaintProperty::Width => "width",
            LinePaintProperty::Opacity => "opacity",
            LinePaintProperty::Blur => "blur",
            LinePaintProperty::Offset => "offset",
            LinePaintProperty::GapWidth => "gapwidth",
            LinePaintProperty::Pattern => "pattern",
        }
    }
}

/// Paint properties of fill layers which are stored per vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FillPaintProperty {
    Color,
    Opacity,
}

impl FillPaintProperty {
    pub const ALL: [FillPaintProperty; 2] = [FillPaintProperty::Color, FillPaintProperty::Opacity];

    pub fn attribute_name(self) -> &'static str {
        match self {
            FillPaintProperty::Color => "color",
            FillPaintProperty::Opacity => "opacity",
        }
    }
}

/// A paint value which is either already known for the whole layer or which has to be evaluated
/// for every feature.
#[derive(Debug, Clone)]
pub enum PossiblyEvaluated<T> {
    Constant(T),
    DataDriven {
        expression: StyleProperty<T>,
        default: T,
    },
}

impl<T: PaintValue> PossiblyEvaluated<T> {
    fn resolve(property: Option<&StyleProperty<T>>, default: T) -> Self {
        match property {
            None => PossiblyEvaluated::Constant(default),
            Some(StyleProperty::Constant(value)) => PossiblyEvaluated::Constant(value.clone()),
            Some(expression) => PossiblyEvaluated::DataDriven {
                expression: expression.clone(),
                default,
            },
        }
    }

    pub fn is_data_driven(&self) -> bool {
        matches!(self, PossiblyEvaluated::DataDriven { .. })
    }

    pub fn evaluate(&self, properties: &FeatureProperties) -> T {
        match self {
            PossiblyEvaluated::Constant(value) => value.clone(),
            PossiblyEvaluated::DataDriven {
                expression,
                default,
            } => expression
                .evaluate(properties)
                .unwrap_or_else(|| default.clone()),
        }
    }
}

/// Converts a color into the premultiplied RGBA form which the shaders expect.
pub fn premultiplied(color: &Color) -> [f32; 4] {
    let a = color.a as f32;
    [
        color.r as f32 * a,
        color.g as f32 * a,
        color.b as f32 * a,
        a,
    ]
}

fn black() -> Color {
    Color::new(0.0, 0.0, 0.0, 1.0)
}

/// Line paint of one layer, resolved once per layer.
#[derive(Debug, Clone)]
pub struct ResolvedLinePaint {
    pub color: PossiblyEvaluated<Color>,
    pub width: PossiblyEvaluated<f32>,
    pub opacity: PossiblyEvaluated<f32>,
    pub blur: PossiblyEvaluated<f32>,
    pub offset: PossiblyEvaluated<f32>,
    pub gap_width: PossiblyEvaluated<f32>,
    pub pattern: Option<PossiblyEvaluated<String>>,
}

impl ResolvedLinePaint {
    pub fn new(paint: &LinePaint) -> Self {
        Self {
            color: PossiblyEvaluated::resolve(paint.line_color.as_ref(), black()),
            width: PossiblyEvaluated::resolve(paint.line_width.as_ref(), 1.0),
            opacity: PossiblyEvaluated::resolve(paint.line_opacity.as_ref(), 1.0),
            blur: PossiblyEvaluated::resolve(paint.line_blur.as_ref(), 0.0),
            offset: PossiblyEvaluated::resolve(paint.line_offset.as_ref(), 0.0),
            gap_width: PossiblyEvaluated::resolve(paint.line_gap_width.as_ref(), 0.0),
            pattern: paint
                .line_pattern
                .as_ref()
                .map(|pattern| PossiblyEvaluated::resolve(Some(pattern), String::new())),
        }
    }

    pub fn is_data_driven(&self, property: LinePaintProperty) -> bool {
        match property {
            LinePaintProperty::Color => self.color.is_data_driven(),
            LinePaintProperty::Width => self.width.is_data_driven(),
            LinePaintProperty::Opacity => self.opacity.is_data_driven(),
            LinePaintProperty::Blur => self.blur.is_data_driven(),
            LinePaintProperty::Offset => self.offset.is_data_driven(),
            LinePaintProperty::GapWidth => self.gap_width.is_data_driven(),
            LinePaintProperty::Pattern => self
                .pattern
                .as_ref()
                .map_or(false, PossiblyEvaluated::is_data_driven),
        }
    }
}

/// Fill paint of one layer, resolved once per layer.
#[derive(Debug, Clone)]
pub struct ResolvedFillPaint {
    pub color: PossiblyEvaluated<Color>,
    pub opacity: PossiblyEvaluated<f32>,
}

impl ResolvedFillPaint {
    pub fn new(paint: &FillPaint) -> Self {
        Self {
            color: PossiblyEvaluated::resolve(paint.fill_color.as_ref(), black()),
            opacity: PossiblyEvaluated::resolve(paint.fill_opacity.as_ref(), 1.0),
        }
    }

    pub fn is_data_driven(&self, property: FillPaintProperty) -> bool {
        match property {
            FillPaintProperty::Color => self.color.is_data_driven(),
            FillPaintProperty::Opacity => self.opacity.is_data_driven(),
        }
    }
}

/// A value which cross-fades between two zoom-dependent values.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossFaded<T> {
    pub from: T,
    pub to: T,
    pub from_scale: f32,
    pub to_scale: f32,
    /// Fade fraction between `from` and `to`.
    pub t: f32,
}

impl<T: Clone> CrossFaded<T> {
    pub fn constant(value: T) -> Self {
        Self {
            from: value.clone(),
            to: value,
            from_scale: 1.0,
            to_scale: 1.0,
            t: 1.0,
        }
    }
}

/// The paint of a line layer for the current frame, as resolved by the style transition system.
#[derive(Debug, Clone)]
pub struct EvaluatedLinePaint {
    pub color: [f32; 4],
    pub width: f32,
    pub opacity: f32,
    pub blur: f32,
    pub offset: f32,
    pub gap_width: f32,
    pub translate: [f32; 2],
    pub translate_anchor: TranslateAnchor,
    pub dasharray: Option<CrossFaded<Vec<f32>>>,
    pub pattern: Option<CrossFaded<String>>,
    /// The pattern image differs per feature and is read from the paint buffers.
    pub pattern_data_driven: bool,
}

impl EvaluatedLinePaint {
    /// Evaluates a line layer without any running transition. Data-driven properties evaluate
    /// to their defaults, per-feature values are read from the paint buffers.
    pub fn at_rest(layer: &StyleLayer) -> Option<Self> {
        let paint = layer.line_paint()?;
        let resolved = ResolvedLinePaint::new(paint);
        let empty = FeatureProperties::default();

        Some(Self {
            color: premultiplied(&resolved.color.evaluate(&empty)),
            width: resolved.width.evaluate(&empty),
            opacity: resolved.opacity.evaluate(&empty),
            blur: resolved.blur.evaluate(&empty),
            offset: resolved.offset.evaluate(&empty),
            gap_width: resolved.gap_width.evaluate(&empty),
            translate: paint.line_translate.unwrap_or([0.0, 0.0]),
            translate_anchor: paint.line_translate_anchor.unwrap_or_default(),
            dasharray: paint.line_dasharray.clone().map(CrossFaded::constant),
            pattern: resolved
                .pattern
                .as_ref()
                .map(|pattern| CrossFaded::constant(pattern.evaluate(&empty))),
            pattern_data_driven: resolved.is_data_driven(LinePaintProperty::Pattern),
        })
    }
}
