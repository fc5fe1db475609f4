//! A navigable 3D globe renderer built on OpenGL via [glow].
//!
//! The library covers two halves of the application:
//!
//! - **Geometry pipeline**: GeoJSON multipolygon ingestion ([`geometry`]),
//!   ear-clipping triangulation with hole support ([`triangulate`]),
//!   unit-sphere projection ([`sphere`]), mesh assembly ([`mesh`]) and
//!   optional GPU-locality optimization ([`optimize`]).
//! - **GPU lifecycle**: typed wrappers over raw GL objects ([`resources`]),
//!   the owning registry with hot shader reload and the per-frame draw
//!   protocol ([`renderer`]), plus the orbit camera ([`camera`]) and the
//!   windowing shell ([`app`]).
//!
//! # Safety
//!
//! Everything that issues raw GL calls is `unsafe` and requires a valid,
//! current OpenGL context on the calling thread.
//!
//! [glow]: https://docs.rs/glow

pub mod app;
pub mod camera;
pub mod geometry;
pub mod mesh;
pub mod optimize;
pub mod renderer;
pub mod resources;
pub mod sphere;
pub mod triangulate;

pub use camera::OrbitCamera;
pub use geometry::{read_features, GeometryError, Point, Polygon};
pub use mesh::{build_globe_mesh, GlobeMesh};
pub use optimize::{optimize_mesh, OptimizeSettings};
pub use renderer::{FrameContext, Renderer};
pub use sphere::project;
pub use triangulate::triangulate;
