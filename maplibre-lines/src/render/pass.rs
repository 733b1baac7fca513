//! The GPU binding surface used by the line renderer.

use std::ops::Range;

use crate::vector::bucket::{LineBufferGroup, ProgramOptions};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Mat2([[f32; 2]; 2]),
    Mat4([[f32; 4]; 4]),
}

/// Receives the state changes and draw calls of the line pass.
pub trait LinePass {
    fn set_program(&mut self, name: &'static str, options: &ProgramOptions);
    fn set_uniform(&mut self, name: &'static str, value: UniformValue);
    fn set_depth_mask(&mut self, enabled: bool);
    /// Enables the tile clipping stencil test for the given tile reference value.
    fn set_stencil_reference(&mut self, reference: u8);
    /// Binds the layout, index and paint buffers of `group` for the layer at `layer_index`.
    fn bind_buffers(&mut self, group: &LineBufferGroup, layer_index: usize);
    fn draw_indexed(&mut self, indices: Range<u32>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    SetProgram {
        name: &'static str,
        defines: Vec<String>,
    },
    SetUniform {
        name: &'static str,
        value: UniformValue,
    },
    SetDepthMask(bool),
    SetStencilReference(u8),
    BindBuffers {
        vertices: usize,
        layer_index: usize,
    },
    DrawIndexed(Range<u32>),
}

/// Records the commands of a pass instead of submitting them to a device.
#[derive(Debug, Default, Clone)]
pub struct CommandRecorder {
    pub commands: Vec<DrawCommand>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last value set for `name`.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.commands.iter().rev().find_map(|command| match command {
            DrawCommand::SetUniform { name: n, value } if *n == name => Some(*value),
            _ => None,
        })
    }

    pub fn programs(&self) -> Vec<&'static str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::SetProgram { name, .. } => Some(*name),
                _ => None,
            })
            .collect()
    }

    pub fn draw_calls(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, DrawCommand::DrawIndexed(_)))
            .count()
    }
}

impl LinePass for CommandRecorder {
    fn set_program(&mut self, name: &'static str, options: &ProgramOptions) {
        self.commands.push(DrawCommand::SetProgram {
            name,
            defines: options.defines().to_vec(),
        });
    }

    fn set_uniform(&mut self, name: &'static str, value: UniformValue) {
        self.commands.push(DrawCommand::SetUniform { name, value });
    }

    fn set_depth_mask(&mut self, enabled: bool) {
        self.commands.push(DrawCommand::SetDepthMask(enabled));
    }

    fn set_stencil_reference(&mut self, reference: u8) {
        self.commands.push(DrawCommand::SetStencilReference(reference));
    }

    fn bind_buffers(&mut self, group: &LineBufferGroup, layer_index: usize) {
        self.commands.push(DrawCommand::BindBuffers {
            vertices: group.layout.vertices.len(),
            layer_index,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>) {
        self.commands.push(DrawCommand::DrawIndexed(indices));
    }
}
