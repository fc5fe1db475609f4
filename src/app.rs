//! Window, GL context and input shell around the renderer.
//!
//! The shell owns the winit event loop and the glutin surface/context pair.
//! Input events only accumulate deltas; camera state advances in a fixed
//! 60 Hz update step driven by an accumulator, and every redraw hands the
//! renderer a fresh [`FrameContext`].

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context as _};
use glam::Vec2;
use glutin::config::{ConfigTemplateBuilder, GlConfig};
use glutin::context::{ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, Version};
use glutin::display::{GetGlDisplay, GlDisplay};
use glutin::surface::{GlSurface, SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::{DisplayBuilder, GlWindow};
use raw_window_handle::HasRawWindowHandle;
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use crate::camera::OrbitCamera;
use crate::geometry::read_features;
use crate::mesh::build_globe_mesh;
use crate::optimize::{optimize_mesh, OptimizeSettings};
use crate::renderer::{FrameContext, Renderer};
use crate::resources::ShaderStage;

const UPDATE_STEP: f64 = 1.0 / 60.0;
const MAX_UPDATES_PER_FRAME: u32 = 5;
const MAX_SAMPLES: u8 = 8;

const FILL_COLOR: [f32; 4] = [0.24, 0.52, 0.34, 1.0];
const OUTLINE_COLOR: [f32; 4] = [0.93, 0.94, 0.96, 1.0];

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Dataset path; defaults to `boundaries.geojson` in the data
    /// directory.
    pub dataset: Option<PathBuf>,
    pub optimize: bool,
    pub wireframe: bool,
}

/// Resources live next to the executable in release layouts; `cargo run`
/// falls back to the working directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("data");
            if candidate.is_dir() {
                return candidate;
            }
        }
    }
    PathBuf::from("data")
}

/// Build the globe, open the window and run the event loop until the user
/// quits.
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    let data_dir = resolve_data_dir();
    let dataset = config
        .dataset
        .unwrap_or_else(|| data_dir.join("boundaries.geojson"));

    let features = read_features(&dataset)?;
    log::info!("loaded {} features from {}", features.len(), dataset.display());

    let mut mesh = build_globe_mesh(&features);
    if config.optimize {
        optimize_mesh(&mut mesh, &OptimizeSettings::default());
    }
    if mesh.vertices.is_empty() {
        log::warn!("dataset produced an empty mesh");
    }

    let event_loop = EventLoop::new()?;
    let window_builder = WindowBuilder::new()
        .with_title("orbis")
        .with_maximized(true);

    // Pick the config with the most MSAA samples up to the cap, preferring
    // sRGB-capable ones.
    let template = ConfigTemplateBuilder::new().with_depth_size(24);
    let (window, gl_config) = DisplayBuilder::new()
        .with_window_builder(Some(window_builder))
        .build(&event_loop, template, |configs| {
            configs
                .reduce(|best, candidate| {
                    let score = |c: &glutin::config::Config| {
                        let samples = c.num_samples().min(MAX_SAMPLES);
                        (samples, c.srgb_capable())
                    };
                    if score(&candidate) > score(&best) {
                        candidate
                    } else {
                        best
                    }
                })
                .expect("no OpenGL configs available")
        })
        .map_err(|e| anyhow!("window creation failed: {e}"))?;
    let window = window.context("display builder returned no window")?;
    log::info!(
        "GL config: {} samples, sRGB capable: {}",
        gl_config.num_samples(),
        gl_config.srgb_capable()
    );

    let raw_window_handle = window.raw_window_handle();
    let gl_display = gl_config.display();
    let context_attributes = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::OpenGl(Some(Version::new(4, 3))))
        .with_profile(GlProfile::Core)
        .build(Some(raw_window_handle));
    let not_current = unsafe { gl_display.create_context(&gl_config, &context_attributes) }
        .context("failed to create a 4.3 core context")?;

    let surface_attributes =
        window.build_surface_attributes(SurfaceAttributesBuilder::<WindowSurface>::new());
    let surface = unsafe { gl_display.create_window_surface(&gl_config, &surface_attributes) }?;
    let gl_context = not_current.make_current(&surface)?;

    if let Err(e) = surface.set_swap_interval(
        &gl_context,
        SwapInterval::Wait(NonZeroU32::new(1).expect("nonzero")),
    ) {
        log::warn!("failed to enable vsync: {e}");
    }

    let gl = Arc::new(unsafe {
        glow::Context::from_loader_function_cstr(|name| gl_display.get_proc_address(name))
    });

    let mut renderer =
        unsafe { Renderer::new(gl) }.map_err(|e| anyhow!("renderer init failed: {e}"))?;
    let shader_dir = data_dir.join("shaders");
    let fail = |e: String| anyhow!("shader setup failed: {e}");
    let (fill_program, outline_program) = unsafe {
        let planet_vert = renderer
            .load_shader(ShaderStage::Vertex, shader_dir.join("planet.vert"))
            .map_err(fail)?;
        let planet_frag = renderer
            .load_shader(ShaderStage::Fragment, shader_dir.join("planet.frag"))
            .map_err(fail)?;
        let outline_frag = renderer
            .load_shader(ShaderStage::Fragment, shader_dir.join("outline.frag"))
            .map_err(fail)?;
        (
            renderer.create_program(planet_vert, planet_frag).map_err(fail)?,
            renderer.create_program(planet_vert, outline_frag).map_err(fail)?,
        )
    };
    unsafe {
        renderer.upload_globe(&mesh, fill_program, outline_program, FILL_COLOR, OUTLINE_COLOR)
    }
    .map_err(|e| anyhow!("globe upload failed: {e}"))?;
    drop(mesh);

    let mut renderer = Some(renderer);
    let mut camera = OrbitCamera::default();
    let mut wireframe = config.wireframe;
    let mut viewport = {
        let size = window.inner_size();
        (size.width as i32, size.height as i32)
    };

    let mut orbiting = false;
    let mut last_cursor: Option<(f64, f64)> = None;
    let mut pending_orbit = Vec2::ZERO;
    let mut pending_zoom = 0.0f32;

    let mut previous = Instant::now();
    let mut accumulator = 0.0f64;

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state == ElementState::Pressed && !event.repeat {
                        match event.physical_key {
                            PhysicalKey::Code(KeyCode::Escape) => elwt.exit(),
                            PhysicalKey::Code(KeyCode::KeyW) => wireframe = !wireframe,
                            _ => {}
                        }
                    }
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Right,
                    ..
                } => {
                    orbiting = state == ElementState::Pressed;
                }
                WindowEvent::CursorMoved { position, .. } => {
                    if orbiting {
                        if let Some((x, y)) = last_cursor {
                            pending_orbit.x += (position.x - x) as f32;
                            pending_orbit.y += (position.y - y) as f32;
                        }
                    }
                    last_cursor = Some((position.x, position.y));
                }
                WindowEvent::MouseWheel { delta, .. } => {
                    pending_zoom += match delta {
                        MouseScrollDelta::LineDelta(_, y) => y,
                        MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                    };
                }
                WindowEvent::Resized(size) => {
                    if let (Some(w), Some(h)) =
                        (NonZeroU32::new(size.width), NonZeroU32::new(size.height))
                    {
                        surface.resize(&gl_context, w, h);
                        viewport = (size.width as i32, size.height as i32);
                    }
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    accumulator += (now - previous).as_secs_f64();
                    previous = now;

                    let mut steps = 0;
                    while accumulator >= UPDATE_STEP && steps < MAX_UPDATES_PER_FRAME {
                        camera.orbit(pending_orbit.x, pending_orbit.y);
                        camera.zoom(pending_zoom);
                        pending_orbit = Vec2::ZERO;
                        pending_zoom = 0.0;
                        accumulator -= UPDATE_STEP;
                        steps += 1;
                    }
                    // A long stall must not replay as a burst of updates.
                    if steps == MAX_UPDATES_PER_FRAME {
                        accumulator = 0.0;
                    }

                    if let Some(renderer) = renderer.as_mut() {
                        let aspect = if viewport.1 > 0 {
                            viewport.0 as f32 / viewport.1 as f32
                        } else {
                            1.0
                        };
                        let frame = FrameContext {
                            view_projection: camera.view_projection(aspect),
                            viewport,
                            wireframe,
                        };
                        unsafe { renderer.render(&frame) };
                        if let Err(e) = surface.swap_buffers(&gl_context) {
                            log::error!("swap failed: {e}");
                        }
                        unsafe { renderer.check_errors() };
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            Event::LoopExiting => {
                if let Some(renderer) = renderer.take() {
                    unsafe { renderer.destroy() };
                }
            }
            _ => {}
        }
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_is_named_data() {
        assert!(resolve_data_dir().ends_with("data"));
    }
}
