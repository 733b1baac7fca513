//! Encoder for vector tile geometry and layers. Used to produce tiles for the demo, tests and
//! benchmarks.

use geozero::mvt::{tile, Message, Tile};

use crate::{
    coords::EXTENT_UINT,
    vector::decoder::{PropertyValue, CMD_CLOSE_PATH, CMD_LINE_TO, CMD_MOVE_TO},
};

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

/// Builds a geometry command stream. Coordinates are absolute, the encoder writes the deltas.
#[derive(Default)]
pub struct GeometryEncoder {
    x: i32,
    y: i32,
    data: Vec<u32>,
}

impl GeometryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn param(&mut self, x: i32, y: i32) {
        self.data.push(zigzag(x - self.x));
        self.data.push(zigzag(y - self.y));
        self.x = x;
        self.y = y;
    }

    pub fn move_to(mut self, x: i32, y: i32) -> Self {
        self.data.push(command(CMD_MOVE_TO, 1));
        self.param(x, y);
        self
    }

    pub fn line_to(mut self, points: &[(i32, i32)]) -> Self {
        if points.is_empty() {
            return self;
        }
        self.data.push(command(CMD_LINE_TO, points.len() as u32));
        for &(x, y) in points {
            self.param(x, y);
        }
        self
    }

    pub fn close_path(mut self) -> Self {
        self.data.push(command(CMD_CLOSE_PATH, 1));
        self
    }

    /// Encodes a line string with the given points.
    pub fn line_string(points: &[(i32, i32)]) -> Vec<u32> {
        match points.split_first() {
            Some((&(x, y), rest)) => Self::new().move_to(x, y).line_to(rest).encode(),
            None => Vec::new(),
        }
    }

    pub fn encode(self) -> Vec<u32> {
        self.data
    }
}

/// Builds one layer of a tile, deduplicating keys and values.
pub struct LayerBuilder {
    layer: tile::Layer,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            layer: tile::Layer {
                version: 2,
                name: name.to_string(),
                extent: Some(EXTENT_UINT),
                ..Default::default()
            },
        }
    }

    fn key_index(&mut self, key: &str) -> u32 {
        match self.layer.keys.iter().position(|k| k == key) {
            Some(index) => index as u32,
            None => {
                self.layer.keys.push(key.to_string());
                (self.layer.keys.len() - 1) as u32
            }
        }
    }

    fn value_index(&mut self, value: &PropertyValue) -> u32 {
        let value = match value {
            PropertyValue::String(s) => tile::Value {
                string_value: Some(s.clone()),
                ..Default::default()
            },
            PropertyValue::Double(d) => tile::Value {
                double_value: Some(*d),
                ..Default::default()
            },
            PropertyValue::Int(i) => tile::Value {
                int_value: Some(*i),
                ..Default::default()
            },
            PropertyValue::UInt(u) => tile::Value {
                uint_value: Some(*u),
                ..Default::default()
            },
            PropertyValue::Bool(b) => tile::Value {
                bool_value: Some(*b),
                ..Default::default()
            },
        };

        match self.layer.values.iter().position(|v| *v == value) {
            Some(index) => index as u32,
            None => {
                self.layer.values.push(value);
                (self.layer.values.len() - 1) as u32
            }
        }
    }

    pub fn add_feature(
        &mut self,
        geom_type: tile::GeomType,
        geometry: Vec<u32>,
        properties: &[(&str, PropertyValue)],
    ) -> &mut Self {
        let mut tags = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            tags.push(self.key_index(key));
            tags.push(self.value_index(value));
        }

        let id = self.layer.features.len() as u64;
        self.layer.features.push(tile::Feature {
            id: Some(id),
            tags,
            r#type: Some(geom_type as i32),
            geometry,
        });
        self
    }

    pub fn into_proto(self) -> tile::Layer {
        self.layer
    }

    /// Encodes the layers into a tile payload.
    pub fn encode_tile(layers: Vec<LayerBuilder>) -> Vec<u8> {
        Tile {
            layers: layers.into_iter().map(LayerBuilder::into_proto).collect(),
        }
        .encode_to_vec()
    }
}
