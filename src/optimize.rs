//! Optional mesh post-processing for GPU locality.
//!
//! Four passes over the assembled mesh, all pure permutations of index
//! order and vertex addressing: welding identical vertices, transform-cache
//! aware triangle reordering, overdraw-oriented cluster sorting, and
//! fetch-order vertex renumbering. The rendered triangle set is unchanged
//! by every pass; only order and addressing move.

use std::collections::HashMap;

use glam::Vec3;

use crate::mesh::GlobeMesh;

/// Modeled FIFO transform-cache size used by the reordering passes.
const CACHE_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy)]
pub struct OptimizeSettings {
    /// How much simulated cache efficiency the overdraw pass may give up,
    /// as a ratio of the pre-sort miss rate.
    pub overdraw_threshold: f32,
}

impl Default for OptimizeSettings {
    fn default() -> Self {
        Self {
            overdraw_threshold: 1.05,
        }
    }
}

/// Run all four passes over a mesh. The outline list shares the vertex
/// buffer with the triangles, so the addressing passes remap it too.
pub fn optimize_mesh(mesh: &mut GlobeMesh, settings: &OptimizeSettings) {
    let GlobeMesh {
        vertices,
        triangles,
        lines,
    } = mesh;

    weld_vertices(vertices, triangles, lines);
    optimize_vertex_cache(triangles, vertices.len());
    optimize_overdraw(triangles, vertices, settings.overdraw_threshold);
    optimize_vertex_fetch(vertices, triangles, lines);
}

/// Deduplicate vertices by exact bit pattern and reindex both index lists
/// through the resulting remap. Comparison is never by epsilon: only
/// vertices that projected to identical floats collapse.
pub fn weld_vertices(vertices: &mut Vec<Vec3>, triangles: &mut [u32], lines: &mut [u32]) {
    let mut unique: Vec<Vec3> = Vec::new();
    let mut seen: HashMap<[u32; 3], u32> = HashMap::with_capacity(vertices.len());
    let mut remap: Vec<u32> = Vec::with_capacity(vertices.len());

    for v in vertices.iter() {
        let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
        let index = *seen.entry(key).or_insert_with(|| {
            unique.push(*v);
            (unique.len() - 1) as u32
        });
        remap.push(index);
    }

    for i in triangles.iter_mut() {
        *i = remap[*i as usize];
    }
    for i in lines.iter_mut() {
        *i = remap[*i as usize];
    }
    *vertices = unique;
}

/// Reorder the triangle list to maximize reuse of recently transformed
/// vertices in a FIFO cache (the tipsify scheme: fan out from a focus
/// vertex, preferring candidates that will still be cached when their
/// remaining triangles are emitted).
pub fn optimize_vertex_cache(triangles: &mut Vec<u32>, vertex_count: usize) {
    let triangle_count = triangles.len() / 3;
    if triangle_count == 0 || vertex_count == 0 {
        return;
    }

    // Vertex -> triangle adjacency in CSR form.
    let mut valence = vec![0u32; vertex_count];
    for &i in triangles.iter() {
        valence[i as usize] += 1;
    }
    let mut offsets = vec![0u32; vertex_count + 1];
    for v in 0..vertex_count {
        offsets[v + 1] = offsets[v] + valence[v];
    }
    let mut adjacency = vec![0u32; triangles.len()];
    let mut cursor = offsets.clone();
    for (t, tri) in triangles.chunks_exact(3).enumerate() {
        for &v in tri {
            adjacency[cursor[v as usize] as usize] = t as u32;
            cursor[v as usize] += 1;
        }
    }

    let mut live = valence;
    let mut emitted = vec![false; triangle_count];
    let mut stamps = vec![0u32; vertex_count];
    let mut time = CACHE_SIZE + 1;
    let mut dead_end: Vec<u32> = Vec::new();
    let mut scan_cursor = 0usize;
    let mut output: Vec<u32> = Vec::with_capacity(triangles.len());

    let mut focus: Option<u32> = Some(0);
    while let Some(f) = focus {
        let f = f as usize;
        let mut candidates: Vec<u32> = Vec::new();

        for &t in &adjacency[offsets[f] as usize..offsets[f + 1] as usize] {
            if emitted[t as usize] {
                continue;
            }
            emitted[t as usize] = true;
            for k in 0..3 {
                let v = triangles[t as usize * 3 + k];
                output.push(v);
                dead_end.push(v);
                candidates.push(v);
                live[v as usize] -= 1;
                if time - stamps[v as usize] > CACHE_SIZE {
                    // Cache miss: insert, FIFO position fixed until evicted.
                    stamps[v as usize] = time;
                    time += 1;
                }
            }
        }

        // Next focus: the touched vertex with the highest cache position
        // that can still emit all its triangles before being evicted.
        let mut best: Option<u32> = None;
        let mut best_priority = -1i64;
        for &v in &candidates {
            if live[v as usize] == 0 {
                continue;
            }
            let age = time - stamps[v as usize];
            let priority = if age + 2 * live[v as usize] <= CACHE_SIZE {
                age as i64
            } else {
                0
            };
            if priority > best_priority {
                best_priority = priority;
                best = Some(v);
            }
        }

        focus = best.or_else(|| {
            while let Some(v) = dead_end.pop() {
                if live[v as usize] > 0 {
                    return Some(v);
                }
            }
            while scan_cursor < vertex_count {
                if live[scan_cursor] > 0 {
                    return Some(scan_cursor as u32);
                }
                scan_cursor += 1;
            }
            None
        });
    }

    *triangles = output;
}

/// Simulated FIFO-cache misses per triangle for an index list.
fn cache_miss_ratio(triangles: &[u32], vertex_count: usize) -> f32 {
    let triangle_count = triangles.len() / 3;
    if triangle_count == 0 {
        return 0.0;
    }
    let mut stamps = vec![0u32; vertex_count];
    let mut time = CACHE_SIZE + 1;
    let mut misses = 0u32;
    for &i in triangles {
        if time - stamps[i as usize] > CACHE_SIZE {
            stamps[i as usize] = time;
            time += 1;
            misses += 1;
        }
    }
    misses as f32 / triangle_count as f32
}

/// Sort locality clusters so outward-facing geometry draws first, keeping
/// the permutation only while the simulated cache-miss ratio stays within
/// `threshold` of the pre-sort value.
///
/// Clusters are cut where a triangle hits the simulated cache completely
/// cold, which lines up with the restart points the cache pass produces.
pub fn optimize_overdraw(triangles: &mut Vec<u32>, vertices: &[Vec3], threshold: f32) {
    let triangle_count = triangles.len() / 3;
    if triangle_count < 2 || vertices.is_empty() {
        return;
    }

    let before = cache_miss_ratio(triangles, vertices.len());

    // Cluster boundaries at cold-cache triangles.
    let mut boundaries: Vec<usize> = vec![0];
    {
        let mut stamps = vec![0u32; vertices.len()];
        let mut time = CACHE_SIZE + 1;
        for (t, tri) in triangles.chunks_exact(3).enumerate() {
            let mut tri_misses = 0;
            for &i in tri {
                if time - stamps[i as usize] > CACHE_SIZE {
                    stamps[i as usize] = time;
                    time += 1;
                    tri_misses += 1;
                }
            }
            if tri_misses == 3 && t != 0 {
                boundaries.push(t);
            }
        }
    }
    if boundaries.len() < 2 {
        return;
    }
    boundaries.push(triangle_count);

    let mesh_centroid: Vec3 = vertices.iter().sum::<Vec3>() / vertices.len() as f32;

    struct Cluster {
        start: usize,
        end: usize,
        key: f32,
    }
    let mut clusters: Vec<Cluster> = boundaries
        .windows(2)
        .map(|window| {
            let (start, end) = (window[0], window[1]);
            let mut centroid = Vec3::ZERO;
            let mut normal = Vec3::ZERO;
            for tri in triangles[start * 3..end * 3].chunks_exact(3) {
                let a = vertices[tri[0] as usize];
                let b = vertices[tri[1] as usize];
                let c = vertices[tri[2] as usize];
                centroid += (a + b + c) / 3.0;
                normal += (b - a).cross(c - a);
            }
            centroid /= (end - start) as f32;
            let key = normal
                .normalize_or_zero()
                .dot((centroid - mesh_centroid).normalize_or_zero());
            Cluster { start, end, key }
        })
        .collect();

    // Stable sort: equal keys keep their cache-friendly relative order.
    clusters.sort_by(|a, b| {
        b.key
            .partial_cmp(&a.key)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut reordered: Vec<u32> = Vec::with_capacity(triangles.len());
    for cluster in &clusters {
        reordered.extend_from_slice(&triangles[cluster.start * 3..cluster.end * 3]);
    }

    if cache_miss_ratio(&reordered, vertices.len()) <= threshold * before {
        *triangles = reordered;
    }
}

/// Renumber vertices to match the final triangle traversal order so vertex
/// fetches walk memory sequentially. Vertices only the outline references
/// keep their relative order at the end of the buffer.
pub fn optimize_vertex_fetch(vertices: &mut Vec<Vec3>, triangles: &mut [u32], lines: &mut [u32]) {
    let count = vertices.len();
    let mut remap = vec![u32::MAX; count];
    let mut order: Vec<u32> = Vec::with_capacity(count);

    for &i in triangles.iter() {
        let slot = &mut remap[i as usize];
        if *slot == u32::MAX {
            *slot = order.len() as u32;
            order.push(i);
        }
    }
    for v in 0..count as u32 {
        if remap[v as usize] == u32::MAX {
            remap[v as usize] = order.len() as u32;
            order.push(v);
        }
    }

    *vertices = order.iter().map(|&i| vertices[i as usize]).collect();
    for i in triangles.iter_mut() {
        *i = remap[*i as usize];
    }
    for i in lines.iter_mut() {
        *i = remap[*i as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon};
    use crate::mesh::build_globe_mesh;

    /// Sorted multiset of triangles, each as position bit patterns sorted
    /// within the triangle so index renumbering cancels out.
    fn triangle_multiset(vertices: &[Vec3], triangles: &[u32]) -> Vec<[[u32; 3]; 3]> {
        let mut set: Vec<[[u32; 3]; 3]> = triangles
            .chunks_exact(3)
            .map(|tri| {
                let mut corners = [[0u32; 3]; 3];
                for (corner, &i) in corners.iter_mut().zip(tri) {
                    let v = vertices[i as usize];
                    *corner = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
                }
                corners.sort_unstable();
                corners
            })
            .collect();
        set.sort_unstable();
        set
    }

    fn line_positions(vertices: &[Vec3], lines: &[u32]) -> Vec<[u32; 3]> {
        lines
            .iter()
            .map(|&i| {
                let v = vertices[i as usize];
                [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
            })
            .collect()
    }

    fn sample_mesh() -> GlobeMesh {
        let to_points = |coords: &[(f64, f64)]| -> Vec<Point> {
            coords
                .iter()
                .map(|&(longitude, latitude)| Point {
                    longitude,
                    latitude,
                })
                .collect()
        };
        // Two adjacent polygons sharing an edge (duplicated vertices to
        // weld) plus a hole.
        let features = vec![vec![
            Polygon {
                rings: vec![
                    to_points(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]),
                    to_points(&[(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0)]),
                ],
            },
            Polygon {
                rings: vec![to_points(&[
                    (10.0, 0.0),
                    (20.0, 0.0),
                    (20.0, 10.0),
                    (10.0, 10.0),
                ])],
            },
        ]];
        build_globe_mesh(&features)
    }

    #[test]
    fn welding_collapses_shared_positions() {
        let mut mesh = sample_mesh();
        let before = mesh.vertices.len();
        let triangles_before = triangle_multiset(&mesh.vertices, &mesh.triangles);

        let GlobeMesh {
            vertices,
            triangles,
            lines,
        } = &mut mesh;
        weld_vertices(vertices, triangles, lines);

        // The shared edge's two vertices deduplicate.
        assert_eq!(mesh.vertices.len(), before - 2);
        assert_eq!(
            triangle_multiset(&mesh.vertices, &mesh.triangles),
            triangles_before
        );
    }

    #[test]
    fn full_optimization_preserves_geometry() {
        let mut mesh = sample_mesh();
        let triangles_before = triangle_multiset(&mesh.vertices, &mesh.triangles);
        let lines_before = line_positions(&mesh.vertices, &mesh.lines);
        let triangle_count = mesh.triangles.len();

        optimize_mesh(&mut mesh, &OptimizeSettings::default());

        assert_eq!(mesh.triangles.len(), triangle_count);
        let count = mesh.vertices.len() as u32;
        assert!(mesh.triangles.iter().all(|&i| i < count));
        assert!(mesh.lines.iter().all(|&i| i < count));
        assert_eq!(
            triangle_multiset(&mesh.vertices, &mesh.triangles),
            triangles_before
        );
        // The outline visits the exact same positions in the same order.
        assert_eq!(line_positions(&mesh.vertices, &mesh.lines), lines_before);
    }

    /// A regular grid with a deliberately scattered triangle order.
    fn scattered_grid() -> (Vec<Vec3>, Vec<u32>) {
        let n = 9;
        let mut vertices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                vertices.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let mut ordered: Vec<[u32; 3]> = Vec::new();
        for y in 0..n - 1 {
            for x in 0..n - 1 {
                let i = (y * n + x) as u32;
                let nn = n as u32;
                ordered.push([i, i + 1, i + nn]);
                ordered.push([i + 1, i + nn + 1, i + nn]);
            }
        }
        let count = ordered.len();
        let mut triangles = Vec::with_capacity(count * 3);
        // Stride through the list with a coprime step to wreck locality.
        for k in 0..count {
            triangles.extend_from_slice(&ordered[(k * 17) % count]);
        }
        (vertices, triangles)
    }

    #[test]
    fn cache_pass_reduces_miss_ratio() {
        let (vertices, mut triangles) = scattered_grid();
        let before = cache_miss_ratio(&triangles, vertices.len());
        let multiset_before = triangle_multiset(&vertices, &triangles);

        optimize_vertex_cache(&mut triangles, vertices.len());

        let after = cache_miss_ratio(&triangles, vertices.len());
        assert!(after < before, "ACMR {after} not below {before}");
        assert_eq!(triangle_multiset(&vertices, &triangles), multiset_before);
    }

    #[test]
    fn cache_pass_preserves_winding() {
        let (vertices, mut triangles) = scattered_grid();
        let sorted_before: std::collections::HashSet<[u32; 3]> = triangles
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        optimize_vertex_cache(&mut triangles, vertices.len());

        // Every output triangle appears with its original vertex order.
        for t in triangles.chunks_exact(3) {
            assert!(sorted_before.contains(&[t[0], t[1], t[2]]));
        }
    }

    #[test]
    fn overdraw_pass_respects_the_cache_threshold() {
        let (vertices, mut triangles) = scattered_grid();
        optimize_vertex_cache(&mut triangles, vertices.len());
        let before = cache_miss_ratio(&triangles, vertices.len());
        let multiset_before = triangle_multiset(&vertices, &triangles);

        let threshold = 1.05;
        optimize_overdraw(&mut triangles, &vertices, threshold);

        let after = cache_miss_ratio(&triangles, vertices.len());
        assert!(after <= threshold * before + 1e-6);
        assert_eq!(triangle_multiset(&vertices, &triangles), multiset_before);
    }

    #[test]
    fn fetch_pass_orders_vertices_by_first_use() {
        let mut mesh = sample_mesh();
        let GlobeMesh {
            vertices,
            triangles,
            lines,
        } = &mut mesh;
        weld_vertices(vertices, triangles, lines);
        optimize_vertex_cache(triangles, vertices.len());
        let multiset_before = triangle_multiset(vertices, triangles);

        optimize_vertex_fetch(vertices, triangles, lines);

        // Scanning the triangle list, a new index is always the next
        // unseen number.
        let mut highest_seen: i64 = -1;
        for &i in mesh.triangles.iter() {
            assert!(i64::from(i) <= highest_seen + 1);
            highest_seen = highest_seen.max(i64::from(i));
        }
        assert_eq!(
            triangle_multiset(&mesh.vertices, &mesh.triangles),
            multiset_before
        );
    }

    #[test]
    fn empty_mesh_is_a_no_op() {
        let mut mesh = GlobeMesh::default();
        optimize_mesh(&mut mesh, &OptimizeSettings::default());
        assert!(mesh.vertices.is_empty());
        assert!(mesh.triangles.is_empty());
    }
}
