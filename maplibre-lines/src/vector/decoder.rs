//! Decodes vector tile payloads into typed geometry per named layer.

use std::{collections::HashMap, sync::Arc};

use cgmath::Point2;
use geozero::mvt::{tile, Message, Tile};

use crate::{coords::EXTENT_UINT, error::DecodeError};

pub(crate) const CMD_MOVE_TO: u32 = 1;
pub(crate) const CMD_LINE_TO: u32 = 2;
pub(crate) const CMD_CLOSE_PATH: u32 = 7;

/// A typed property value of a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl PropertyValue {
    fn from_proto(value: &tile::Value) -> Option<Self> {
        if let Some(b) = value.bool_value {
            Some(PropertyValue::Bool(b))
        } else if let Some(s) = &value.string_value {
            Some(PropertyValue::String(s.clone()))
        } else if let Some(f) = value.float_value {
            Some(PropertyValue::Double(f as f64))
        } else if let Some(d) = value.double_value {
            Some(PropertyValue::Double(d))
        } else if let Some(i) = value.int_value {
            Some(PropertyValue::Int(i))
        } else if let Some(i) = value.sint_value {
            Some(PropertyValue::Int(i))
        } else {
            value.uint_value.map(PropertyValue::UInt)
        }
    }
}

pub type FeatureProperties = HashMap<String, PropertyValue>;

/// Geometry in tile-local integer coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Unknown,
    Points(Vec<Point2<i32>>),
    LineStrings(Vec<Vec<Point2<i32>>>),
    /// Rings are closed explicitly, the first point is repeated at the end.
    Polygons(Vec<Vec<Point2<i32>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<u64>,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLayer {
    pub name: String,
    pub extent: u32,
    pub features: Vec<Feature>,
}

/// A decoded tile. Layers keep the order of the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTile {
    pub layers: Vec<DecodedLayer>,
}

impl DecodedTile {
    pub fn layer(&self, name: &str) -> Option<&DecodedLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// Captures the feature properties of every layer so that paint buffers can be regenerated
    /// later without decoding the payload again.
    pub fn property_data(&self) -> PropertyData {
        PropertyData {
            layers: Arc::new(
                self.layers
                    .iter()
                    .map(|layer| {
                        (
                            layer.name.clone(),
                            layer
                                .features
                                .iter()
                                .map(|feature| feature.properties.clone())
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// Feature properties by layer name and feature index. Captured once per tile and never
/// mutated afterwards, clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct PropertyData {
    layers: Arc<HashMap<String, Vec<FeatureProperties>>>,
}

impl PropertyData {
    pub fn layer(&self, name: &str) -> Option<&[FeatureProperties]> {
        self.layers.get(name).map(Vec::as_slice)
    }

    pub fn feature(&self, layer: &str, index: usize) -> Option<&FeatureProperties> {
        self.layer(layer).and_then(|features| features.get(index))
    }
}

fn zagzig(value: u32) -> i32 {
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

/// Splits a command stream into parts. Every `MoveTo` starts a new part, `ClosePath` repeats the
/// first point of the current part.
fn decode_commands(
    commands: &[u32],
    layer: &str,
    feature: usize,
) -> Result<Vec<Vec<Point2<i32>>>, DecodeError> {
    let truncated = || DecodeError::TruncatedGeometry {
        layer: layer.to_string(),
        feature,
    };
    let overflow = || DecodeError::CoordinateOverflow {
        layer: layer.to_string(),
        feature,
    };

    let mut parts: Vec<Vec<Point2<i32>>> = Vec::new();
    let mut cursor: Point2<i32> = Point2::new(0, 0);
    let mut i = 0;

    while i < commands.len() {
        let command = commands[i] & 0x7;
        let count = (commands[i] >> 3) as usize;
        i += 1;

        match command {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if commands.len() < i + count * 2 {
                    return Err(truncated());
                }
                for _ in 0..count {
                    cursor.x = cursor
                        .x
                        .checked_add(zagzig(commands[i]))
                        .ok_or_else(overflow)?;
                    cursor.y = cursor
                        .y
                        .checked_add(zagzig(commands[i + 1]))
                        .ok_or_else(overflow)?;
                    i += 2;

                    if command == CMD_MOVE_TO || parts.is_empty() {
                        parts.push(vec![cursor]);
                    } else if let Some(part) = parts.last_mut() {
                        part.push(cursor);
                    }
                }
            }
            CMD_CLOSE_PATH => {
                let part = parts.last_mut().ok_or_else(truncated)?;
                if let Some(first) = part.first().copied() {
                    part.push(first);
                }
            }
            _ => {
                return Err(DecodeError::UnknownCommand {
                    layer: layer.to_string(),
                    feature,
                    command,
                })
            }
        }
    }

    Ok(parts)
}

fn decode_feature(
    layer: &tile::Layer,
    index: usize,
    feature: &tile::Feature,
) -> Result<Feature, DecodeError> {
    if feature.tags.len() % 2 != 0 {
        return Err(DecodeError::OddTagCount {
            layer: layer.name.clone(),
            feature: index,
        });
    }

    let mut properties = FeatureProperties::with_capacity(feature.tags.len() / 2);
    for chunk in feature.tags.chunks(2) {
        let out_of_range = |tag: u32| DecodeError::TagOutOfRange {
            layer: layer.name.clone(),
            feature: index,
            index: tag,
        };
        let key = layer
            .keys
            .get(chunk[0] as usize)
            .ok_or_else(|| out_of_range(chunk[0]))?;
        let value = layer
            .values
            .get(chunk[1] as usize)
            .ok_or_else(|| out_of_range(chunk[1]))?;

        if let Some(value) = PropertyValue::from_proto(value) {
            properties.insert(key.clone(), value);
        }
    }

    let parts = decode_commands(&feature.geometry, &layer.name, index)?;
    let geometry = match feature.r#type {
        Some(t) if t == tile::GeomType::Point as i32 => {
            Geometry::Points(parts.into_iter().flatten().collect())
        }
        Some(t) if t == tile::GeomType::Linestring as i32 => Geometry::LineStrings(parts),
        Some(t) if t == tile::GeomType::Polygon as i32 => Geometry::Polygons(parts),
        _ => Geometry::Unknown,
    };

    Ok(Feature {
        id: feature.id,
        geometry,
        properties,
    })
}

/// Decodes a vector tile payload. Any malformed record fails the whole tile.
#[tracing::instrument(skip_all)]
pub fn decode_tile(data: &[u8]) -> Result<DecodedTile, DecodeError> {
    let tile = Tile::decode(data).map_err(|e| DecodeError::Protobuf(e.to_string()))?;

    let layers = tile
        .layers
        .iter()
        .map(|layer| {
            let features = layer
                .features
                .iter()
                .enumerate()
                .map(|(index, feature)| decode_feature(layer, index, feature))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(DecodedLayer {
                name: layer.name.clone(),
                extent: layer.extent.unwrap_or(EXTENT_UINT),
                features,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    tracing::trace!("decoded {} layers", layers.len());

    Ok(DecodedTile { layers })
}
