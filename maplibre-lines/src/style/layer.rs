//! Vector tile layer styles.

use csscolorparser::Color;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    style::expression::{self, PaintValue},
    vector::decoder::FeatureProperties,
};

/// A style value which is either constant or depends on the properties of each feature.
#[derive(Debug, Clone)]
pub enum StyleProperty<T> {
    Constant(T),
    Expression(Value),
}

impl<T: PaintValue> StyleProperty<T> {
    pub fn from_json(value: Value) -> Option<Self> {
        if value.is_array() && T::from_json(&value).is_none() {
            return Some(StyleProperty::Expression(value));
        }
        T::from_json(&value).map(StyleProperty::Constant)
    }

    pub fn deserialize_or_none<'de, D>(deserializer: D) -> Result<Option<StyleProperty<T>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(Self::from_json(v))
    }

    pub fn is_data_driven(&self) -> bool {
        matches!(self, StyleProperty::Expression(_))
    }

    pub fn constant(&self) -> Option<&T> {
        match self {
            StyleProperty::Constant(value) => Some(value),
            StyleProperty::Expression(_) => None,
        }
    }

    pub fn evaluate(&self, feature_properties: &FeatureProperties) -> Option<T> {
        match self {
            StyleProperty::Constant(value) => Some(value.clone()),
            StyleProperty::Expression(expr) => {
                expression::evaluate(expr, feature_properties).and_then(|v| T::from_json(&v))
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    #[serde(rename = "butt")]
    Butt,
    #[serde(rename = "round")]
    Round,
    #[serde(rename = "square")]
    Square,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[serde(rename = "bevel")]
    Bevel,
    #[serde(rename = "round")]
    Round,
    #[default]
    #[serde(rename = "miter")]
    Miter,
}

fn default_miter_limit() -> f32 {
    2.0
}

fn default_round_limit() -> f32 {
    1.05
}

/// Layout properties of a line layer. Two line layers can share geometry buffers only if these
/// are equal.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LineLayout {
    #[serde(rename = "line-cap", default)]
    pub line_cap: LineCap,
    #[serde(rename = "line-join", default)]
    pub line_join: LineJoin,
    #[serde(rename = "line-miter-limit", default = "default_miter_limit")]
    pub line_miter_limit: f32,
    #[serde(rename = "line-round-limit", default = "default_round_limit")]
    pub line_round_limit: f32,
}

impl Default for LineLayout {
    fn default() -> Self {
        Self {
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            line_miter_limit: default_miter_limit(),
            line_round_limit: default_round_limit(),
        }
    }
}

/// The layout which decides how geometry is tessellated.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerLayout {
    Line(LineLayout),
    Fill,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslateAnchor {
    #[default]
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "viewport")]
    Viewport,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LinePaint {
    #[serde(
        rename = "line-color",
        default,
        deserialize_with = "StyleProperty::<Color>::deserialize_or_none"
    )]
    pub line_color: Option<StyleProperty<Color>>,
    #[serde(
        rename = "line-width",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub line_width: Option<StyleProperty<f32>>,
    #[serde(
        rename = "line-opacity",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub line_opacity: Option<StyleProperty<f32>>,
    #[serde(
        rename = "line-blur",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub line_blur: Option<StyleProperty<f32>>,
    #[serde(
        rename = "line-offset",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub line_offset: Option<StyleProperty<f32>>,
    #[serde(
        rename = "line-gap-width",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub line_gap_width: Option<StyleProperty<f32>>,
    #[serde(rename = "line-translate", default)]
    pub line_translate: Option<[f32; 2]>,
    #[serde(rename = "line-translate-anchor", default)]
    pub line_translate_anchor: Option<TranslateAnchor>,
    #[serde(rename = "line-dasharray", default)]
    pub line_dasharray: Option<Vec<f32>>,
    #[serde(
        rename = "line-pattern",
        default,
        deserialize_with = "StyleProperty::<String>::deserialize_or_none"
    )]
    pub line_pattern: Option<StyleProperty<String>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FillPaint {
    #[serde(
        rename = "fill-color",
        default,
        deserialize_with = "StyleProperty::<Color>::deserialize_or_none"
    )]
    pub fill_color: Option<StyleProperty<Color>>,
    #[serde(
        rename = "fill-opacity",
        default,
        deserialize_with = "StyleProperty::<f32>::deserialize_or_none"
    )]
    pub fill_opacity: Option<StyleProperty<f32>>,
}

/// The different types of paints.
#[derive(Debug, Clone)]
pub enum LayerPaint {
    Line(LinePaint),
    Fill(FillPaint),
}

/// Stores all the styles for a specific layer.
#[derive(Debug, Clone)]
pub struct StyleLayer {
    pub id: String,
    pub type_: String,
    pub maxzoom: Option<u8>,
    pub minzoom: Option<u8>,
    pub source: Option<String>,
    pub source_layer: Option<String>,
    pub layout: Option<LayerLayout>,
    pub paint: Option<LayerPaint>,
}

impl StyleLayer {
    pub fn line(id: &str, source_layer: &str, layout: LineLayout, paint: LinePaint) -> Self {
        Self {
            id: id.to_string(),
            type_: "line".to_string(),
            maxzoom: None,
            minzoom: None,
            source: None,
            source_layer: Some(source_layer.to_string()),
            layout: Some(LayerLayout::Line(layout)),
            paint: Some(LayerPaint::Line(paint)),
        }
    }

    pub fn fill(id: &str, source_layer: &str, paint: FillPaint) -> Self {
        Self {
            id: id.to_string(),
            type_: "fill".to_string(),
            maxzoom: None,
            minzoom: None,
            source: None,
            source_layer: Some(source_layer.to_string()),
            layout: Some(LayerLayout::Fill),
            paint: Some(LayerPaint::Fill(paint)),
        }
    }

    pub fn line_paint(&self) -> Option<&LinePaint> {
        match &self.paint {
            Some(LayerPaint::Line(paint)) => Some(paint),
            _ => None,
        }
    }

    pub fn line_layout(&self) -> Option<&LineLayout> {
        match &self.layout {
            Some(LayerLayout::Line(layout)) => Some(layout),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct StyleLayerDef {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    maxzoom: Option<u8>,
    minzoom: Option<u8>,
    source: Option<String>,
    #[serde(rename = "source-layer")]
    source_layer: Option<String>,
    paint: Option<Value>,
    layout: Option<Value>,
}

impl<'de> Deserialize<'de> for StyleLayer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let def = StyleLayerDef::deserialize(deserializer)?;
        let paint = def.paint.unwrap_or(Value::Object(Default::default()));
        let layout = def.layout.unwrap_or(Value::Object(Default::default()));

        let (layout, paint) = match def.type_.as_str() {
            "line" => {
                let layout = serde_json::from_value(layout)
                    .map_err(|e| log::error!("line layout failed {}: {:?}", def.id, e))
                    .unwrap_or_default();
                let paint = serde_json::from_value(paint)
                    .map_err(|e| log::error!("line paint failed {}: {:?}", def.id, e))
                    .unwrap_or_default();
                (
                    Some(LayerLayout::Line(layout)),
                    Some(LayerPaint::Line(paint)),
                )
            }
            "fill" => {
                let paint = serde_json::from_value(paint)
                    .map_err(|e| log::error!("fill paint failed {}: {:?}", def.id, e))
                    .unwrap_or_default();
                (Some(LayerLayout::Fill), Some(LayerPaint::Fill(paint)))
            }
            _ => (None, None),
        };

        Ok(StyleLayer {
            id: def.id,
            type_: def.type_,
            maxzoom: def.maxzoom,
            minzoom: def.minzoom,
            source: def.source,
            source_layer: def.source_layer,
            layout,
            paint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_layer_from_json() {
        let json = r##"{
            "id": "roads",
            "type": "line",
            "source": "openmaptiles",
            "source-layer": "transportation",
            "layout": { "line-cap": "round", "line-join": "bevel" },
            "paint": {
                "line-color": ["match", ["get", "class"], ["motorway"], "#ff0000", "#ffffff"],
                "line-width": 3,
                "line-dasharray": [2, 1],
                "line-translate-anchor": "viewport"
            }
        }"##;
        let layer: StyleLayer = serde_json::from_str(json).unwrap();

        let layout = layer.line_layout().unwrap();
        assert_eq!(layout.line_cap, LineCap::Round);
        assert_eq!(layout.line_join, LineJoin::Bevel);
        assert_eq!(layout.line_miter_limit, 2.0);

        let paint = layer.line_paint().unwrap();
        assert!(paint.line_color.as_ref().unwrap().is_data_driven());
        assert_eq!(paint.line_width.as_ref().unwrap().constant(), Some(&3.0));
        assert_eq!(paint.line_dasharray, Some(vec![2.0, 1.0]));
        assert_eq!(paint.line_translate_anchor, Some(TranslateAnchor::Viewport));
        assert!(paint.line_pattern.is_none());
    }

    #[test]
    fn test_broken_paint_falls_back_to_default() {
        let json = r#"{
            "id": "roads",
            "type": "line",
            "source-layer": "transportation",
            "paint": { "line-translate": "not an array" }
        }"#;
        let layer: StyleLayer = serde_json::from_str(json).unwrap();

        assert!(layer.line_paint().unwrap().line_translate.is_none());
    }

    #[test]
    fn test_other_layer_types_have_no_bucket_layout() {
        let json = r#"{ "id": "bg", "type": "background" }"#;
        let layer: StyleLayer = serde_json::from_str(json).unwrap();

        assert!(layer.layout.is_none());
        assert!(layer.paint.is_none());
    }
}
