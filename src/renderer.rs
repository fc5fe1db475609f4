//! GPU resource registry and per-frame draw protocol.
//!
//! The [`Renderer`] exclusively owns every driver-side object: shaders,
//! programs, buffers and draw objects all live in its registries, handed
//! out as index newtypes. Geometry goes up once at startup; per frame the
//! renderer polls shader files for edits, relinks affected programs,
//! streams the view-projection block and replays the registered draws in
//! registration order.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use glam::Mat4;
use glow::HasContext;

use crate::mesh::GlobeMesh;
use crate::resources::{
    BufferKind, BufferUsage, DrawObject, GlBuffer, Primitive, Shader, ShaderProgram,
    ShaderStage, VertexSpec,
};

/// Binding slot of the shared `ViewProjection` uniform block.
const VIEW_PROJECTION_BINDING: u32 = 0;
const VIEW_PROJECTION_BLOCK: &str = "ViewProjection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShaderId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProgramId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawId(usize);

/// Everything that varies per frame, supplied by the shell.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub view_projection: Mat4,
    /// Framebuffer size in physical pixels.
    pub viewport: (i32, i32),
    pub wireframe: bool,
}

struct ProgramEntry {
    program: ShaderProgram,
    vertex: ShaderId,
    fragment: ShaderId,
}

struct DrawEntry {
    object: DrawObject,
    program: ProgramId,
    color: [f32; 4],
}

pub struct Renderer {
    gl: Arc<glow::Context>,
    shaders: Vec<Shader>,
    programs: Vec<ProgramEntry>,
    draws: Vec<DrawEntry>,
    /// Shared vertex buffer for all globe draw objects.
    vertex_buffer: Option<GlBuffer>,
    view_projection: GlBuffer,
}

impl Renderer {
    /// Set up fixed pipeline state and the view-projection block buffer.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context; `gl` must belong to the
    /// calling thread's context for the renderer's whole lifetime.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Result<Self, String> {
        unsafe {
            gl.enable(glow::DEPTH_TEST);
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.enable(glow::MULTISAMPLE);
            gl.enable(glow::FRAMEBUFFER_SRGB);
            // Outlines draw over coplanar fill without z-fighting.
            gl.enable(glow::POLYGON_OFFSET_LINE);
            gl.polygon_offset(-1.0, -1.0);
            gl.enable(glow::LINE_SMOOTH);
            gl.disable(glow::DITHER);
            gl.clear_color(0.02, 0.02, 0.05, 1.0);
        }

        let view_projection =
            unsafe { GlBuffer::new(&gl, BufferKind::Uniform, BufferUsage::Streaming) }?;

        Ok(Self {
            gl,
            shaders: Vec::new(),
            programs: Vec::new(),
            draws: Vec::new(),
            vertex_buffer: None,
            view_projection,
        })
    }

    /// Load and compile a shader file, tracking it for hot reload.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn load_shader(
        &mut self,
        stage: ShaderStage,
        path: PathBuf,
    ) -> Result<ShaderId, String> {
        let shader = unsafe { Shader::load(&self.gl, stage, path) }?;
        self.shaders.push(shader);
        Ok(ShaderId(self.shaders.len() - 1))
    }

    /// Link a program from two loaded shaders and route its
    /// `ViewProjection` block to the shared binding slot.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn create_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, String> {
        let program = unsafe {
            ShaderProgram::new(&self.gl, &self.shaders[vertex.0], &self.shaders[fragment.0])
        }?;
        unsafe {
            program.bind_uniform_block(&self.gl, VIEW_PROJECTION_BLOCK, VIEW_PROJECTION_BINDING)
        };
        self.programs.push(ProgramEntry {
            program,
            vertex,
            fragment,
        });
        Ok(ProgramId(self.programs.len() - 1))
    }

    /// Upload the globe's vertex stream once and register its two draws:
    /// filled triangles, then ring outlines on top. Draw order follows
    /// registration order.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn upload_globe(
        &mut self,
        mesh: &GlobeMesh,
        fill_program: ProgramId,
        outline_program: ProgramId,
        fill_color: [f32; 4],
        outline_color: [f32; 4],
    ) -> Result<(), String> {
        let mut vertex_buffer =
            unsafe { GlBuffer::new(&self.gl, BufferKind::Vertex, BufferUsage::Static) }?;
        unsafe {
            vertex_buffer.upload_realloc(&self.gl, bytemuck::cast_slice(&mesh.vertices))
        };
        self.vertex_buffer = Some(vertex_buffer);

        unsafe {
            self.add_draw(&mesh.triangles, Primitive::Triangles, fill_program, fill_color)?;
            self.add_draw(&mesh.lines, Primitive::Lines, outline_program, outline_color)?;
        }
        log::info!(
            "globe uploaded: {} vertices, {} triangles, {} outline segments",
            mesh.vertices.len(),
            mesh.triangle_count(),
            mesh.line_count()
        );
        Ok(())
    }

    /// Register a draw over the shared vertex buffer.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context; [`Self::upload_globe`]
    /// must have created the vertex buffer.
    unsafe fn add_draw(
        &mut self,
        indices: &[u32],
        primitive: Primitive,
        program: ProgramId,
        color: [f32; 4],
    ) -> Result<DrawId, String> {
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .ok_or("no vertex buffer uploaded")?;
        let object = unsafe {
            DrawObject::new(
                &self.gl,
                vertex_buffer,
                &[VertexSpec::position_3f()],
                indices,
                primitive,
            )
        }?;
        self.draws.push(DrawEntry {
            object,
            program,
            color,
        });
        Ok(DrawId(self.draws.len() - 1))
    }

    /// Poll every tracked shader file and relink each program that
    /// references a reloaded shader, once per program.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn poll_shaders(&mut self) {
        let mut reloaded: Vec<ShaderId> = Vec::new();
        for (index, shader) in self.shaders.iter_mut().enumerate() {
            if unsafe { shader.reload(&self.gl) } {
                log::info!("reloaded shader {}", shader.path().display());
                reloaded.push(ShaderId(index));
            }
        }
        if reloaded.is_empty() {
            return;
        }

        let users: Vec<(ShaderId, ShaderId)> = self
            .programs
            .iter()
            .map(|entry| (entry.vertex, entry.fragment))
            .collect();
        for index in programs_to_relink(&users, &reloaded) {
            let entry = &mut self.programs[index];
            unsafe {
                entry.program.relink(&self.gl);
                entry.program.bind_uniform_block(
                    &self.gl,
                    VIEW_PROJECTION_BLOCK,
                    VIEW_PROJECTION_BINDING,
                );
            }
        }
    }

    /// Draw one frame: shader polling, global state, clear, camera block
    /// upload, then every registered draw in order. The caller presents.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn render(&mut self, frame: &FrameContext) {
        unsafe { self.poll_shaders() };

        let gl = &*self.gl;
        unsafe {
            let mode = if frame.wireframe {
                glow::LINE
            } else {
                glow::FILL
            };
            gl.polygon_mode(glow::FRONT_AND_BACK, mode);

            gl.viewport(0, 0, frame.viewport.0, frame.viewport.1);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);

            self.view_projection
                .upload(gl, bytemuck::bytes_of(&frame.view_projection));
            self.view_projection.bind_base(gl, VIEW_PROJECTION_BINDING);
        }

        for entry in &self.draws {
            let program = &mut self.programs[entry.program.0].program;
            unsafe {
                program.bind(gl);
                program.set_vec4(gl, "u_color", entry.color);
                entry.object.draw(gl);
            }
        }
    }

    /// Drain the driver error flag after presentation. Debug builds only;
    /// errors are reported, never fatal.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn check_errors(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        loop {
            let error = unsafe { self.gl.get_error() };
            if error == glow::NO_ERROR {
                break;
            }
            log::error!("GL error after present: {error:#x}");
        }
    }

    /// Delete every owned GPU object.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self) {
        let gl = &*self.gl;
        unsafe {
            for entry in self.draws {
                entry.object.destroy(gl);
            }
            for entry in self.programs {
                entry.program.destroy(gl);
            }
            for shader in self.shaders {
                shader.destroy(gl);
            }
            if let Some(buffer) = self.vertex_buffer {
                buffer.destroy(gl);
            }
            self.view_projection.destroy(gl);
        }
    }
}

/// Indices of programs referencing any reloaded shader, each exactly once,
/// in registry order.
fn programs_to_relink(users: &[(ShaderId, ShaderId)], reloaded: &[ShaderId]) -> Vec<usize> {
    let mut affected = BTreeSet::new();
    for &shader in reloaded {
        for (index, &(vertex, fragment)) in users.iter().enumerate() {
            if vertex == shader || fragment == shader {
                affected.insert(index);
            }
        }
    }
    affected.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_shader_relinks_each_user_once() {
        // Programs 0 and 1 share a vertex shader; program 2 is unrelated.
        let users = [
            (ShaderId(0), ShaderId(1)),
            (ShaderId(0), ShaderId(2)),
            (ShaderId(3), ShaderId(4)),
        ];
        assert_eq!(programs_to_relink(&users, &[ShaderId(0)]), vec![0, 1]);
    }

    #[test]
    fn program_hit_by_both_stages_relinks_once() {
        let users = [(ShaderId(0), ShaderId(1))];
        assert_eq!(
            programs_to_relink(&users, &[ShaderId(0), ShaderId(1)]),
            vec![0]
        );
    }

    #[test]
    fn unaffected_programs_stay_put() {
        let users = [(ShaderId(0), ShaderId(1)), (ShaderId(2), ShaderId(3))];
        assert!(programs_to_relink(&users, &[ShaderId(4)]).is_empty());
        assert_eq!(programs_to_relink(&users, &[ShaderId(3)]), vec![1]);
    }

    #[test]
    fn relink_order_follows_the_registry() {
        let users = [
            (ShaderId(0), ShaderId(5)),
            (ShaderId(1), ShaderId(5)),
            (ShaderId(2), ShaderId(5)),
        ];
        // Reload report order must not leak into relink order.
        assert_eq!(
            programs_to_relink(&users, &[ShaderId(5), ShaderId(0)]),
            vec![0, 1, 2]
        );
    }
}
