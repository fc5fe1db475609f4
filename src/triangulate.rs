//! Ear-clipping triangulation of polygons with holes.
//!
//! Operates purely in 2D (longitude, latitude) before sphere projection.
//! Hole rings are bridged into the exterior traversal through their
//! leftmost vertex, then the combined boundary is clipped one ear at a
//! time. For a simple polygon with `n` distinct exterior vertices and no
//! holes the output is exactly `n - 2` triangles.
//!
//! Output indices are local to the ring-concatenated point order of the
//! input polygon (closing duplicates included in the numbering); callers
//! merging several polygons into one mesh offset the indices themselves.
//!
//! Self-intersecting input is not diagnosed: clipping stops when no ear
//! can be found and the (possibly incomplete) triangle list is returned.

use crate::geometry::Polygon;

#[derive(Clone, Copy)]
struct Node {
    /// Index into the ring-concatenated input point order.
    i: u32,
    x: f64,
    y: f64,
    prev: usize,
    next: usize,
}

struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn node(&self, at: usize) -> Node {
        self.nodes[at]
    }

    /// Append `node` after `at` in the circular list, returning its slot.
    fn insert_after(&mut self, at: usize, i: u32, x: f64, y: f64) -> usize {
        let slot = self.nodes.len();
        let next = self.nodes[at].next;
        self.nodes.push(Node {
            i,
            x,
            y,
            prev: at,
            next,
        });
        self.nodes[at].next = slot;
        self.nodes[next].prev = slot;
        slot
    }

    fn push_single(&mut self, i: u32, x: f64, y: f64) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node {
            i,
            x,
            y,
            prev: slot,
            next: slot,
        });
        slot
    }

    fn unlink(&mut self, at: usize) {
        let Node { prev, next, .. } = self.nodes[at];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }
}

/// Cross product of (p - o) and (q - o); positive for a left turn (y-up).
fn cross(o: Node, p: Node, q: Node) -> f64 {
    (p.x - o.x) * (q.y - o.y) - (p.y - o.y) * (q.x - o.x)
}

/// Shoelace area of a ring as given; positive for counter-clockwise.
fn signed_area(ring: &[(f64, f64)]) -> f64 {
    let mut sum = 0.0;
    for (i, &(x0, y0)) in ring.iter().enumerate() {
        let (x1, y1) = ring[(i + 1) % ring.len()];
        sum += x0 * y1 - x1 * y0;
    }
    0.5 * sum
}

/// Inclusive point-in-triangle test, winding-agnostic.
fn point_in_triangle(a: Node, b: Node, c: Node, p: Node) -> bool {
    let d1 = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let d2 = (c.x - b.x) * (p.y - b.y) - (c.y - b.y) * (p.x - b.x);
    let d3 = (a.x - c.x) * (p.y - c.y) - (a.y - c.y) * (p.x - c.x);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Whether the segment from `a` towards `b` starts into the polygon
/// interior at `a`. The combined boundary winds counter-clockwise.
fn locally_inside(arena: &Arena, a: usize, b: usize) -> bool {
    let node = arena.node(a);
    let prev = arena.node(node.prev);
    let next = arena.node(node.next);
    let target = arena.node(b);
    if cross(prev, node, next) >= 0.0 {
        cross(node, next, target) >= 0.0 && cross(node, target, prev) >= 0.0
    } else {
        cross(node, next, target) >= 0.0 || cross(node, target, prev) >= 0.0
    }
}

/// Build a circular list for one ring, skipping exact consecutive
/// duplicates and the closing repeat of the first point. `base` is the
/// ring's offset in the concatenated point order; `clockwise` selects the
/// traversal direction the list should have.
fn link_ring(
    arena: &mut Arena,
    ring: &[(f64, f64)],
    base: u32,
    clockwise: bool,
) -> Option<usize> {
    let ccw = signed_area(ring) >= 0.0;
    let mut head: Option<usize> = None;

    let indices: Vec<usize> = if ccw == clockwise {
        (0..ring.len()).rev().collect()
    } else {
        (0..ring.len()).collect()
    };

    for pos in indices {
        let (x, y) = ring[pos];
        let i = base + pos as u32;
        match head {
            None => head = Some(arena.push_single(i, x, y)),
            Some(start) => {
                let tail = arena.node(start).prev;
                let last = arena.node(tail);
                if last.x == x && last.y == y {
                    continue;
                }
                arena.insert_after(tail, i, x, y);
            }
        }
    }

    // Drop a closing point that repeats the ring start.
    if let Some(start) = head {
        let first = arena.node(start);
        let tail = first.prev;
        if tail != start {
            let last = arena.node(tail);
            if last.x == first.x && last.y == first.y {
                arena.unlink(tail);
            }
        }
    }

    head
}

fn list_len(arena: &Arena, start: usize) -> usize {
    let mut count = 1;
    let mut at = arena.node(start).next;
    while at != start {
        count += 1;
        at = arena.node(at).next;
    }
    count
}

/// Find a vertex of the outer boundary that the hole's leftmost vertex can
/// be bridged to without crossing any edge. `None` when the hole lies
/// outside the boundary (degenerate input).
fn find_hole_bridge(arena: &Arena, hole: usize, outer: usize) -> Option<usize> {
    let h = arena.node(hole);
    let mut qx = f64::NEG_INFINITY;
    let mut best: Option<usize> = None;

    // Phase 1: leftward ray from the hole vertex; remember the rightmost
    // boundary-edge crossing that stays left of the hole.
    let mut at = outer;
    loop {
        let p = arena.node(at);
        let n = arena.node(p.next);
        if (p.y > h.y) != (n.y > h.y) && n.y != p.y {
            let x = p.x + (h.y - p.y) * (n.x - p.x) / (n.y - p.y);
            if x <= h.x && x > qx {
                qx = x;
                best = Some(if p.x < n.x { at } else { p.next });
                if x == h.x {
                    // Hole touches the outline at a vertex.
                    return best;
                }
            }
        }
        at = p.next;
        if at == outer {
            break;
        }
    }

    let mut m = best?;

    // Phase 2: the candidate may be occluded; pick the visible vertex
    // inside the triangle (hole point, crossing, candidate) that makes the
    // smallest angle with the ray.
    let q = Node {
        i: 0,
        x: qx,
        y: h.y,
        prev: 0,
        next: 0,
    };
    let stop = m;
    let m0 = arena.node(m);
    let mut tan_min = f64::INFINITY;

    let mut at = m0.next;
    while at != stop {
        let p = arena.node(at);
        if h.x >= p.x && p.x >= m0.x && h.x != p.x && point_in_triangle(h, m0, q, p) {
            let tan = (h.y - p.y).abs() / (h.x - p.x);
            if locally_inside(arena, at, hole)
                && (tan < tan_min || (tan == tan_min && p.x > arena.node(m).x))
            {
                m = at;
                tan_min = tan;
            }
        }
        at = p.next;
    }

    Some(m)
}

/// Splice the circular lists at `a` and `b` together through a bridge,
/// duplicating both endpoints so each side keeps a closed boundary.
fn split_polygon(arena: &mut Arena, a: usize, b: usize) {
    let an = arena.node(a).next;
    let bp = arena.node(b).prev;

    let node_a = arena.node(a);
    let node_b = arena.node(b);

    let a2 = arena.nodes.len();
    arena.nodes.push(Node {
        prev: a2 + 1,
        next: an,
        ..node_a
    });
    let b2 = a2 + 1;
    arena.nodes.push(Node {
        prev: bp,
        next: a2,
        ..node_b
    });

    arena.nodes[a].next = b;
    arena.nodes[b].prev = a;
    arena.nodes[an].prev = a2;
    arena.nodes[bp].next = b2;
}

/// Bridge every hole into the outer boundary, leftmost holes first.
fn eliminate_holes(arena: &mut Arena, holes: Vec<usize>, outer: usize) {
    let mut leftmost: Vec<usize> = holes
        .into_iter()
        .map(|start| {
            let mut best = start;
            let mut at = arena.node(start).next;
            while at != start {
                let p = arena.node(at);
                let b = arena.node(best);
                if p.x < b.x || (p.x == b.x && p.y < b.y) {
                    best = at;
                }
                at = p.next;
            }
            best
        })
        .collect();
    leftmost.sort_by(|&a, &b| {
        let (na, nb) = (arena.node(a), arena.node(b));
        na.x.partial_cmp(&nb.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(na.y.partial_cmp(&nb.y).unwrap_or(std::cmp::Ordering::Equal))
    });

    for hole in leftmost {
        if let Some(bridge) = find_hole_bridge(arena, hole, outer) {
            split_polygon(arena, bridge, hole);
        }
    }
}

/// Whether `ear` can be clipped: convex (or collinear) corner with no
/// reflex vertex of the remaining boundary inside its triangle.
fn is_ear(arena: &Arena, ear: usize) -> bool {
    let b = arena.node(ear);
    let a = arena.node(b.prev);
    let c = arena.node(b.next);

    if cross(a, b, c) < 0.0 {
        return false;
    }

    let mut at = arena.node(b.next).next;
    while at != b.prev {
        let p = arena.node(at);
        let reflex = cross(arena.node(p.prev), p, arena.node(p.next)) < 0.0;
        if reflex && point_in_triangle(a, b, c, p) {
            return false;
        }
        at = p.next;
    }
    true
}

/// Triangulate a polygon with holes into a flat triangle-index list.
pub fn triangulate(polygon: &Polygon) -> Vec<u32> {
    let rings: Vec<Vec<(f64, f64)>> = polygon
        .rings
        .iter()
        .map(|ring| {
            ring.iter()
                .map(|p| (p.longitude, p.latitude))
                .collect()
        })
        .collect();

    let mut arena = Arena { nodes: Vec::new() };

    let mut base = 0u32;
    let mut outer: Option<usize> = None;
    let mut holes = Vec::new();
    for (ring_index, ring) in rings.iter().enumerate() {
        let is_outer = ring_index == 0;
        let start = link_ring(&mut arena, ring, base, !is_outer);
        base += ring.len() as u32;
        match (is_outer, start) {
            (true, start) => outer = start,
            (false, Some(start)) => {
                if list_len(&arena, start) >= 3 {
                    holes.push(start);
                }
            }
            (false, None) => {}
        }
    }

    let Some(outer) = outer else {
        return Vec::new();
    };
    if list_len(&arena, outer) < 3 {
        return Vec::new();
    }

    if !holes.is_empty() {
        eliminate_holes(&mut arena, holes, outer);
    }

    let mut triangles = Vec::new();
    let mut ear = outer;
    let mut stop = outer;
    loop {
        let node = arena.node(ear);
        if node.prev == node.next {
            break;
        }
        if is_ear(&arena, ear) {
            let a = arena.node(node.prev);
            let c = arena.node(node.next);
            triangles.push(a.i);
            triangles.push(node.i);
            triangles.push(c.i);
            arena.unlink(ear);
            ear = c.next;
            stop = ear;
            continue;
        }
        ear = node.next;
        if ear == stop {
            // No clippable ear left: self-intersecting or otherwise
            // degenerate input. Return what was produced so far.
            break;
        }
    }

    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn polygon(rings: &[&[(f64, f64)]]) -> Polygon {
        Polygon {
            rings: rings
                .iter()
                .map(|ring| {
                    ring.iter()
                        .map(|&(longitude, latitude)| Point {
                            longitude,
                            latitude,
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Sum of unsigned triangle areas over the concatenated input points.
    fn triangle_area_sum(poly: &Polygon, triangles: &[u32]) -> f64 {
        let points: Vec<Point> = poly.rings.iter().flatten().copied().collect();
        triangles
            .chunks(3)
            .map(|t| {
                let (a, b, c) = (
                    points[t[0] as usize],
                    points[t[1] as usize],
                    points[t[2] as usize],
                );
                0.5 * ((b.longitude - a.longitude) * (c.latitude - a.latitude)
                    - (b.latitude - a.latitude) * (c.longitude - a.longitude))
                    .abs()
            })
            .sum()
    }

    #[test]
    fn square_yields_two_triangles() {
        let poly = polygon(&[&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len(), 6);
        assert!(triangles.iter().all(|&i| i < 4));
        assert!((triangle_area_sum(&poly, &triangles) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn closed_ring_ignores_the_repeated_point() {
        let poly = polygon(&[&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len(), 6);
        // The closing duplicate (index 4) never appears in the output.
        assert!(triangles.iter().all(|&i| i < 4));
    }

    #[test]
    fn simple_polygon_has_n_minus_two_triangles() {
        for n in 3..=24usize {
            let ring: Vec<(f64, f64)> = (0..n)
                .map(|k| {
                    let angle = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
                    (10.0 * angle.cos(), 10.0 * angle.sin())
                })
                .collect();
            let triangles = triangulate(&polygon(&[&ring]));
            assert_eq!(triangles.len() / 3, n - 2, "n = {n}");
        }
    }

    #[test]
    fn clockwise_input_is_normalized() {
        let poly = polygon(&[&[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len(), 6);
        assert!((triangle_area_sum(&poly, &triangles) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_vertex_still_counts() {
        let poly = polygon(&[&[
            (0.0, 0.0),
            (5.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
        ]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len() / 3, 3);
        assert!((triangle_area_sum(&poly, &triangles) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn concave_polygon_is_covered() {
        // An L-shape: area 10*10 - 5*5 = 75.
        let poly = polygon(&[&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 5.0),
            (5.0, 5.0),
            (5.0, 10.0),
            (0.0, 10.0),
        ]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len() / 3, 4);
        assert!((triangle_area_sum(&poly, &triangles) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn hole_is_clipped_out() {
        let poly = polygon(&[
            &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
            &[(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0)],
        ]);
        let triangles = triangulate(&poly);
        // Bridging adds two duplicate vertices: (4 + 4 + 2) - 2 triangles.
        assert_eq!(triangles.len() / 3, 8);
        assert!(triangles.iter().all(|&i| i < 8));
        assert!((triangle_area_sum(&poly, &triangles) - 96.0).abs() < 1e-9);
    }

    #[test]
    fn two_holes() {
        let poly = polygon(&[
            &[(0.0, 0.0), (20.0, 0.0), (20.0, 10.0), (0.0, 10.0)],
            &[(2.0, 4.0), (4.0, 4.0), (4.0, 6.0), (2.0, 6.0)],
            &[(12.0, 4.0), (14.0, 4.0), (14.0, 6.0), (12.0, 6.0)],
        ]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len() % 3, 0);
        assert!((triangle_area_sum(&poly, &triangles) - 192.0).abs() < 1e-9);
    }

    #[test]
    fn output_is_deterministic() {
        let poly = polygon(&[
            &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
            &[(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0)],
        ]);
        assert_eq!(triangulate(&poly), triangulate(&poly));
    }

    #[test]
    fn degenerate_rings_do_not_panic() {
        assert!(triangulate(&polygon(&[&[(0.0, 0.0)]])).is_empty());
        assert!(triangulate(&polygon(&[&[(0.0, 0.0), (1.0, 1.0)]])).is_empty());
        assert!(triangulate(&polygon(&[&[
            (0.0, 0.0),
            (0.0, 0.0),
            (0.0, 0.0)
        ]]))
        .is_empty());
    }

    #[test]
    fn self_intersecting_input_fails_safely() {
        // A bowtie; the result may be incomplete but must be well-formed.
        let poly = polygon(&[&[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]]);
        let triangles = triangulate(&poly);
        assert_eq!(triangles.len() % 3, 0);
        assert!(triangles.iter().all(|&i| i < 4));
    }
}
