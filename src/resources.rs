//! Thin ownership wrappers over raw GL objects.
//!
//! Every type here owns exactly one driver-side object and is destroyed by
//! value, so use-after-destroy is a compile error instead of a runtime
//! check. All functions that issue GL calls are `unsafe` and require a
//! valid, current OpenGL context on the calling thread.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glow::HasContext;

/// What a buffer binds as. Replaces a subclass-per-target hierarchy with a
/// plain tag on one buffer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    fn target(self) -> u32 {
        match self {
            BufferKind::Vertex => glow::ARRAY_BUFFER,
            BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
            BufferKind::Uniform => glow::UNIFORM_BUFFER,
        }
    }
}

/// Upload discipline for a buffer.
///
/// `Static` buffers are filled once through [`GlBuffer::upload_realloc`];
/// `Streaming` buffers are rewritten every frame through
/// [`GlBuffer::upload`], which only reallocates when the data outgrows the
/// current allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    Streaming,
}

impl BufferUsage {
    fn gl_usage(self) -> u32 {
        match self {
            BufferUsage::Static => glow::STATIC_DRAW,
            BufferUsage::Streaming => glow::STREAM_DRAW,
        }
    }
}

/// Decision for a streaming upload against the current allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadPlan {
    /// Reallocate to exactly the new length, then write.
    Grow(usize),
    /// Write into the existing allocation, capacity unchanged.
    Overwrite,
}

pub(crate) fn plan_upload(capacity: usize, len: usize) -> UploadPlan {
    if len > capacity {
        UploadPlan::Grow(len)
    } else {
        UploadPlan::Overwrite
    }
}

/// One GL buffer object with its kind, usage and allocated size.
#[derive(Debug)]
pub struct GlBuffer {
    raw: glow::Buffer,
    kind: BufferKind,
    usage: BufferUsage,
    capacity: usize,
}

impl GlBuffer {
    /// Create a buffer with no storage allocated yet.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn new(
        gl: &glow::Context,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> Result<Self, String> {
        let raw = unsafe { gl.create_buffer() }?;
        Ok(Self {
            raw,
            kind,
            usage,
            capacity: 0,
        })
    }

    pub fn raw(&self) -> glow::Buffer {
        self.raw
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Streaming upload. Grows the allocation to exactly `data.len()` when
    /// the data no longer fits, otherwise overwrites the front of the
    /// existing allocation and leaves the capacity alone.
    ///
    /// Panics if the buffer is static; static data goes through
    /// [`Self::upload_realloc`] exactly once.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn upload(&mut self, gl: &glow::Context, data: &[u8]) {
        assert!(
            self.usage == BufferUsage::Streaming,
            "growth-aware upload on a static buffer"
        );
        let target = self.kind.target();
        unsafe {
            gl.bind_buffer(target, Some(self.raw));
            match plan_upload(self.capacity, data.len()) {
                UploadPlan::Grow(len) => {
                    gl.buffer_data_u8_slice(target, data, self.usage.gl_usage());
                    self.capacity = len;
                }
                UploadPlan::Overwrite => {
                    gl.buffer_sub_data_u8_slice(target, 0, data);
                }
            }
        }
    }

    /// Discard the current allocation and reallocate to exactly
    /// `data.len()`.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn upload_realloc(&mut self, gl: &glow::Context, data: &[u8]) {
        let target = self.kind.target();
        unsafe {
            gl.bind_buffer(target, Some(self.raw));
            gl.buffer_data_u8_slice(target, data, self.usage.gl_usage());
        }
        self.capacity = data.len();
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn bind(&self, gl: &glow::Context) {
        unsafe { gl.bind_buffer(self.kind.target(), Some(self.raw)) };
    }

    /// Bind a uniform buffer to an indexed binding slot.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn bind_base(&self, gl: &glow::Context, binding: u32) {
        debug_assert_eq!(self.kind, BufferKind::Uniform);
        unsafe { gl.bind_buffer_base(self.kind.target(), binding, Some(self.raw)) };
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe { gl.delete_buffer(self.raw) };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn gl_stage(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

/// Return the file's modification time if it is strictly newer than
/// `since`. Unreadable metadata reads as "not newer" so a file mid-save
/// never kills the frame loop.
pub fn newer_modification(path: &Path, since: SystemTime) -> Option<SystemTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    (modified > since).then_some(modified)
}

/// A shader stage compiled from a file on disk, tracked for hot reload.
#[derive(Debug)]
pub struct Shader {
    raw: glow::Shader,
    stage: ShaderStage,
    path: PathBuf,
    modified: SystemTime,
}

impl Shader {
    /// Read, create and compile a shader from `path`. A compile error is
    /// logged and the (empty) shader object kept; the file can be fixed
    /// and picked up by [`Self::reload`].
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn load(
        gl: &glow::Context,
        stage: ShaderStage,
        path: PathBuf,
    ) -> Result<Self, String> {
        let source =
            fs::read_to_string(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());

        let raw = unsafe { gl.create_shader(stage.gl_stage()) }?;
        let shader = Self {
            raw,
            stage,
            path,
            modified,
        };
        unsafe { shader.compile(gl, &source) };
        Ok(shader)
    }

    pub fn raw(&self) -> glow::Shader {
        self.raw
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll the source file and recompile in place if it changed since the
    /// last poll. Returns `true` exactly once per on-disk change; the
    /// timestamp advances even when the new source fails to compile, so a
    /// broken save is reported once rather than every frame.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn reload(&mut self, gl: &glow::Context) -> bool {
        let Some(modified) = newer_modification(&self.path, self.modified) else {
            return false;
        };
        self.modified = modified;

        match fs::read_to_string(&self.path) {
            Ok(source) => unsafe { self.compile(gl, &source) },
            Err(e) => log::error!("failed to re-read {}: {e}", self.path.display()),
        }
        true
    }

    unsafe fn compile(&self, gl: &glow::Context, source: &str) {
        unsafe {
            gl.shader_source(self.raw, source);
            gl.compile_shader(self.raw);
            if !gl.get_shader_compile_status(self.raw) {
                let info = gl.get_shader_info_log(self.raw);
                log::error!("shader compile error in {}: {info}", self.path.display());
            }
        }
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe { gl.delete_shader(self.raw) };
    }
}

/// A linked program with a per-name uniform location cache.
#[derive(Debug)]
pub struct ShaderProgram {
    raw: glow::Program,
    uniforms: HashMap<String, glow::UniformLocation>,
    linked: bool,
}

/// Apply a relink outcome to the uniform location cache. A successful link
/// may move every location, so the cache is dropped; after a failed link
/// the driver keeps the last-good executable, for which the cached
/// locations stay valid.
fn apply_relink_outcome<L>(uniforms: &mut HashMap<String, L>, link_succeeded: bool) {
    if link_succeeded {
        uniforms.clear();
    }
}

impl ShaderProgram {
    /// Create and link a program from two compiled stages. A link failure
    /// is logged and the handle stays live; until the next successful
    /// relink the program keeps whatever executable it last linked, so
    /// draws through it are best-effort.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn new(
        gl: &glow::Context,
        vertex: &Shader,
        fragment: &Shader,
    ) -> Result<Self, String> {
        let raw = unsafe { gl.create_program() }?;
        unsafe {
            gl.attach_shader(raw, vertex.raw());
            gl.attach_shader(raw, fragment.raw());
        }
        let mut program = Self {
            raw,
            uniforms: HashMap::new(),
            linked: false,
        };
        unsafe { program.relink(gl) };
        Ok(program)
    }

    pub fn raw(&self) -> glow::Program {
        self.raw
    }

    /// Whether the most recent link succeeded.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Link (or relink after a shader reload) the attached stages. Only a
    /// successful link invalidates the uniform location cache; a failed
    /// one leaves the last-good executable and its locations in place.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn relink(&mut self, gl: &glow::Context) {
        unsafe {
            gl.link_program(self.raw);
            self.linked = gl.get_program_link_status(self.raw);
            if !self.linked {
                let info = gl.get_program_info_log(self.raw);
                log::error!("program link error: {info}");
            }
        }
        apply_relink_outcome(&mut self.uniforms, self.linked);
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn bind(&self, gl: &glow::Context) {
        unsafe { gl.use_program(Some(self.raw)) };
    }

    /// Route a named uniform block to an indexed binding slot. A block the
    /// program does not declare is skipped; the linker may also strip a
    /// block that is declared but unused.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn bind_uniform_block(&self, gl: &glow::Context, name: &str, binding: u32) {
        if let Some(index) = unsafe { gl.get_uniform_block_index(self.raw, name) } {
            unsafe { gl.uniform_block_binding(self.raw, index, binding) };
        }
    }

    /// Cached uniform location lookup. Asking a linked program for a
    /// uniform it does not declare is a programming error and panics.
    /// While the last link has failed there is no executable to query, so
    /// an uncached name resolves to `None` and draws stay best-effort.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn uniform_location(
        &mut self,
        gl: &glow::Context,
        name: &str,
    ) -> Option<glow::UniformLocation> {
        if let Some(location) = self.uniforms.get(name) {
            return Some(location.clone());
        }
        if !self.linked {
            return None;
        }
        let location = unsafe { gl.get_uniform_location(self.raw, name) }
            .unwrap_or_else(|| panic!("uniform {name} missing"));
        self.uniforms.insert(name.to_owned(), location.clone());
        Some(location)
    }

    /// Set a `vec4` uniform on the currently bound program.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context; the program must be bound.
    pub unsafe fn set_vec4(&mut self, gl: &glow::Context, name: &str, value: [f32; 4]) {
        if let Some(location) = unsafe { self.uniform_location(gl, name) } {
            unsafe { gl.uniform_4_f32(Some(&location), value[0], value[1], value[2], value[3]) };
        }
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe { gl.delete_program(self.raw) };
    }
}

/// One vertex attribute binding: tightly packed floats at a shader
/// location.
#[derive(Debug, Clone, Copy)]
pub struct VertexSpec {
    pub location: u32,
    pub components: i32,
    pub stride: i32,
    pub offset: i32,
}

impl VertexSpec {
    /// Position as 3 floats at location 0, the layout every globe shader
    /// shares.
    pub fn position_3f() -> Self {
        Self {
            location: 0,
            components: 3,
            stride: 12,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    Lines,
}

impl Primitive {
    fn gl_mode(self) -> u32 {
        match self {
            Primitive::Triangles => glow::TRIANGLES,
            Primitive::Lines => glow::LINES,
        }
    }
}

/// A VAO plus the index buffer it draws with. Vertex data is borrowed from
/// a buffer owned elsewhere; several draw objects can share one vertex
/// buffer with different index lists.
#[derive(Debug)]
pub struct DrawObject {
    vao: glow::VertexArray,
    index_buffer: GlBuffer,
    primitive: Primitive,
    index_count: i32,
}

impl DrawObject {
    /// Capture the attribute layout of `vertex_buffer` and upload `indices`
    /// into an element buffer recorded in the VAO.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn new(
        gl: &glow::Context,
        vertex_buffer: &GlBuffer,
        attributes: &[VertexSpec],
        indices: &[u32],
        primitive: Primitive,
    ) -> Result<Self, String> {
        debug_assert_eq!(vertex_buffer.kind(), BufferKind::Vertex);

        let vao = unsafe { gl.create_vertex_array() }?;
        unsafe {
            gl.bind_vertex_array(Some(vao));
            vertex_buffer.bind(gl);
            for attr in attributes {
                gl.enable_vertex_attrib_array(attr.location);
                gl.vertex_attrib_pointer_f32(
                    attr.location,
                    attr.components,
                    glow::FLOAT,
                    false,
                    attr.stride,
                    attr.offset,
                );
            }
        }

        // The element binding is VAO state, so the upload happens while the
        // VAO is still bound.
        let mut index_buffer =
            unsafe { GlBuffer::new(gl, BufferKind::Index, BufferUsage::Static) }?;
        unsafe {
            index_buffer.upload_realloc(gl, bytemuck::cast_slice(indices));
            gl.bind_vertex_array(None);
        }

        Ok(Self {
            vao,
            index_buffer,
            primitive,
            index_count: indices.len() as i32,
        })
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn index_count(&self) -> i32 {
        self.index_count
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context; the intended program must
    /// be bound.
    pub unsafe fn draw(&self, gl: &glow::Context) {
        unsafe {
            gl.bind_vertex_array(Some(self.vao));
            gl.draw_elements(
                self.primitive.gl_mode(),
                self.index_count,
                glow::UNSIGNED_INT,
                0,
            );
        }
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe {
            gl.delete_vertex_array(self.vao);
            self.index_buffer.destroy(gl);
        }
    }
}

/// A multisampled color+depth framebuffer for off-screen rendering.
#[derive(Debug)]
pub struct OffscreenTarget {
    fbo: glow::Framebuffer,
    color: glow::Renderbuffer,
    depth: glow::Renderbuffer,
    width: i32,
    height: i32,
}

impl OffscreenTarget {
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn new(
        gl: &glow::Context,
        width: i32,
        height: i32,
        samples: i32,
    ) -> Result<Self, String> {
        unsafe {
            let fbo = gl.create_framebuffer()?;
            let color = gl.create_renderbuffer()?;
            let depth = gl.create_renderbuffer()?;

            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(color));
            gl.renderbuffer_storage_multisample(
                glow::RENDERBUFFER,
                samples,
                glow::SRGB8_ALPHA8,
                width,
                height,
            );
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
            gl.renderbuffer_storage_multisample(
                glow::RENDERBUFFER,
                samples,
                glow::DEPTH_COMPONENT24,
                width,
                height,
            );

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::RENDERBUFFER,
                Some(color),
            );
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(depth),
            );

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_renderbuffer(color);
                gl.delete_renderbuffer(depth);
                return Err(format!("framebuffer incomplete: {status:#x}"));
            }

            Ok(Self {
                fbo,
                color,
                depth,
                width,
                height,
            })
        }
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn bind(&self, gl: &glow::Context) {
        unsafe { gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo)) };
    }

    /// Resolve the multisampled content onto the default framebuffer.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn blit_to_default(&self, gl: &glow::Context) {
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(self.fbo));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
            gl.blit_framebuffer(
                0,
                0,
                self.width,
                self.height,
                0,
                0,
                self.width,
                self.height,
                glow::COLOR_BUFFER_BIT,
                glow::NEAREST,
            );
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    pub unsafe fn destroy(self, gl: &glow::Context) {
        unsafe {
            gl.delete_framebuffer(self.fbo);
            gl.delete_renderbuffer(self.color);
            gl.delete_renderbuffer(self.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use std::time::Duration;

    #[test]
    fn streaming_upload_grows_only_past_capacity() {
        assert_eq!(plan_upload(0, 48), UploadPlan::Grow(48));
        assert_eq!(plan_upload(48, 48), UploadPlan::Overwrite);
        assert_eq!(plan_upload(48, 12), UploadPlan::Overwrite);
        assert_eq!(plan_upload(48, 49), UploadPlan::Grow(49));
    }

    #[test]
    fn growth_is_exact_not_amortized() {
        // Allocation tracks the largest upload seen, nothing more.
        let mut capacity = 0usize;
        for len in [16, 8, 64, 64, 32] {
            if let UploadPlan::Grow(new) = plan_upload(capacity, len) {
                assert_eq!(new, len);
                capacity = new;
            }
        }
        assert_eq!(capacity, 64);
    }

    #[test]
    fn modification_polling_fires_once_per_change() {
        let path = std::env::temp_dir().join(format!(
            "orbis-reload-test-{}.frag",
            std::process::id()
        ));
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(b"void main() {}").expect("write temp file");
        drop(file);

        let baseline = fs::metadata(&path)
            .and_then(|m| m.modified())
            .expect("read mtime");
        assert!(newer_modification(&path, baseline).is_none());

        let touched = baseline + Duration::from_secs(2);
        File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(touched))
            .expect("advance mtime");

        let seen = newer_modification(&path, baseline).expect("change detected");
        // After recording the new stamp, the same change never re-fires.
        assert!(newer_modification(&path, seen).is_none());

        fs::remove_file(&path).expect("remove temp file");
    }

    #[test]
    fn missing_file_reads_as_unchanged() {
        let path = Path::new("/nonexistent/orbis/shader.vert");
        assert!(newer_modification(path, SystemTime::UNIX_EPOCH).is_none());
    }

    #[test]
    fn failed_relink_keeps_the_cached_uniform_locations() {
        // After an unsuccessful link the driver retains the last-good
        // executable; the locations cached for it must survive so draws
        // keep working against that executable.
        let mut cache: HashMap<String, u32> = HashMap::new();
        cache.insert("u_color".to_owned(), 3);

        apply_relink_outcome(&mut cache, false);
        assert_eq!(cache.get("u_color"), Some(&3));

        // A successful relink may move every location.
        apply_relink_outcome(&mut cache, true);
        assert!(cache.is_empty());
    }

    #[test]
    fn position_layout_is_tightly_packed_vec3() {
        let spec = VertexSpec::position_3f();
        assert_eq!(spec.location, 0);
        assert_eq!(spec.components, 3);
        assert_eq!(spec.stride, 12);
        assert_eq!(spec.offset, 0);
    }
}
