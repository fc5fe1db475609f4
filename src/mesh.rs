//! Assembly of validated polygons into GPU-ready globe meshes.
//!
//! One vertex stream is shared by two index lists: a triangle list covering
//! the polygon interiors and a line list tracing every ring as a closed
//! loop. Positions are unit-sphere points; the transient `Polygon` data is
//! dropped once the mesh is built and uploaded.

use glam::Vec3;

use crate::geometry::Polygon;
use crate::sphere::project;
use crate::triangulate::triangulate;

/// Triangulated, sphere-projected geometry for the whole dataset.
///
/// Invariants (checked in debug builds): every index is below the vertex
/// count, the triangle list length is a multiple of 3, and the line list
/// length is a multiple of 2.
#[derive(Debug, Default, Clone)]
pub struct GlobeMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<u32>,
    pub lines: Vec<u32>,
}

impl GlobeMesh {
    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn line_count(&self) -> usize {
        self.lines.len() / 2
    }

    fn debug_validate(&self) {
        debug_assert_eq!(self.triangles.len() % 3, 0);
        debug_assert_eq!(self.lines.len() % 2, 0);
        let count = self.vertices.len() as u32;
        debug_assert!(self.triangles.iter().all(|&i| i < count));
        debug_assert!(self.lines.iter().all(|&i| i < count));
    }
}

/// Build the globe mesh from every feature's polygon list.
///
/// Each polygon is triangulated in 2D and its local indices offset by the
/// running vertex base; each ring contributes one closed outline loop
/// (first vertex once, interior vertices doubled, final segment back to
/// the ring start). Every input point is projected exactly once.
pub fn build_globe_mesh(features: &[Vec<Polygon>]) -> GlobeMesh {
    let mut mesh = GlobeMesh::default();

    for polygons in features {
        for polygon in polygons {
            let polygon_base = mesh.vertices.len() as u32;

            for index in triangulate(polygon) {
                mesh.triangles.push(polygon_base + index);
            }

            for ring in &polygon.rings {
                let ring_base = mesh.vertices.len() as u32;
                let mut first_vertex = true;

                for point in ring {
                    let i = mesh.vertices.len() as u32;
                    if first_vertex {
                        mesh.lines.push(i);
                        first_vertex = false;
                    } else {
                        mesh.lines.push(i);
                        mesh.lines.push(i);
                    }
                    let v = project(point.longitude, point.latitude);
                    mesh.vertices.push(v.as_vec3());
                }
                mesh.lines.push(ring_base);
            }
        }
    }

    mesh.debug_validate();
    mesh
}
