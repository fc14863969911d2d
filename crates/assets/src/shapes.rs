//! Procedural unit shapes.

use glam::{Vec2, Vec3};
use lumen_common::{MeshData, Vertex};
use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};

const HALF: f32 = 0.5;

/// Fewest segments a cylinder can have.
pub const MIN_CYLINDER_QUALITY: u32 = 3;

/// A parametric shape generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Unit square in the XY plane, facing +Z.
    Quad,
    Box,
    /// Box with the top sliced from the -X top edge down to the +X bottom edge.
    Wedge,
    /// Box with the +X+Y+Z corner cut off.
    CornerWedgeInner,
    /// Tetrahedron at the -X-Y-Z corner.
    CornerWedgeOuter,
    /// Y-aligned cylinder with `quality` segments (at least 3).
    Cylinder { quality: u32 },
    /// Icosahedron subdivided `level` times, projected onto the sphere.
    Icosphere { level: u32 },
}

impl Shape {
    pub fn generate(self) -> MeshData {
        match self {
            Shape::Quad => quad(),
            Shape::Box => cube(),
            Shape::Wedge => wedge(),
            Shape::CornerWedgeInner => corner_wedge_inner(),
            Shape::CornerWedgeOuter => corner_wedge_outer(),
            Shape::Cylinder { quality } => cylinder(quality),
            Shape::Icosphere { level } => icosphere(level),
        }
    }
}

#[derive(Default)]
struct Builder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl Builder {
    fn push(&mut self, position: Vec3, normal: Vec3, uv: Vec2) -> u32 {
        self.vertices.push(Vertex::new(position, normal, uv));
        self.vertices.len() as u32 - 1
    }

    /// Planar convex polygon as a triangle fan with a flat normal. The
    /// winding is flipped if needed so the face looks away from `inside`.
    fn face(&mut self, inside: Vec3, corners: &[(Vec3, Vec2)]) {
        let [(a, _), (b, _), (c, _), ..] = corners else {
            return;
        };
        let mut normal = (*b - *a).cross(*c - *a).normalize_or_zero();
        let flip = normal.dot(*a - inside) < 0.0;
        if flip {
            normal = -normal;
        }

        let base = self.vertices.len() as u32;
        for &(position, uv) in corners {
            self.push(position, normal, uv);
        }
        for i in 1..corners.len() as u32 - 1 {
            if flip {
                self.indices.extend([base, base + i + 1, base + i]);
            } else {
                self.indices.extend([base, base + i, base + i + 1]);
            }
        }
    }

    fn finish(self) -> MeshData {
        MeshData::new(self.vertices, self.indices)
    }
}

fn centroid(points: &[Vec3]) -> Vec3 {
    points.iter().copied().sum::<Vec3>() / points.len().max(1) as f32
}

const UV00: Vec2 = Vec2::new(0.0, 0.0);
const UV10: Vec2 = Vec2::new(1.0, 0.0);
const UV11: Vec2 = Vec2::new(1.0, 1.0);
const UV01: Vec2 = Vec2::new(0.0, 1.0);

fn quad() -> MeshData {
    let mut b = Builder::default();
    b.face(
        Vec3::NEG_Z,
        &[
            (Vec3::new(-HALF, -HALF, 0.0), UV00),
            (Vec3::new(HALF, -HALF, 0.0), UV10),
            (Vec3::new(HALF, HALF, 0.0), UV11),
            (Vec3::new(-HALF, HALF, 0.0), UV01),
        ],
    );
    b.finish()
}

fn cube() -> MeshData {
    let p = |x: f32, y: f32, z: f32| Vec3::new(x * HALF, y * HALF, z * HALF);
    let faces = [
        [p(-1., -1., 1.), p(1., -1., 1.), p(1., 1., 1.), p(-1., 1., 1.)],
        [p(1., -1., -1.), p(-1., -1., -1.), p(-1., 1., -1.), p(1., 1., -1.)],
        [p(1., -1., 1.), p(1., -1., -1.), p(1., 1., -1.), p(1., 1., 1.)],
        [p(-1., -1., -1.), p(-1., -1., 1.), p(-1., 1., 1.), p(-1., 1., -1.)],
        [p(-1., 1., 1.), p(1., 1., 1.), p(1., 1., -1.), p(-1., 1., -1.)],
        [p(-1., -1., -1.), p(1., -1., -1.), p(1., -1., 1.), p(-1., -1., 1.)],
    ];
    let mut b = Builder::default();
    for [c0, c1, c2, c3] in faces {
        b.face(Vec3::ZERO, &[(c0, UV00), (c1, UV10), (c2, UV11), (c3, UV01)]);
    }
    b.finish()
}

fn wedge() -> MeshData {
    let top_front = Vec3::new(-HALF, HALF, HALF);
    let bottom_front_left = Vec3::new(-HALF, -HALF, HALF);
    let bottom_front_right = Vec3::new(HALF, -HALF, HALF);
    let top_back = Vec3::new(-HALF, HALF, -HALF);
    let bottom_back_right = Vec3::new(HALF, -HALF, -HALF);
    let bottom_back_left = Vec3::new(-HALF, -HALF, -HALF);
    let inside = centroid(&[
        top_front,
        bottom_front_left,
        bottom_front_right,
        top_back,
        bottom_back_right,
        bottom_back_left,
    ]);

    let mut b = Builder::default();
    b.face(
        inside,
        &[(top_front, UV01), (bottom_front_left, UV00), (bottom_front_right, UV10)],
    );
    b.face(
        inside,
        &[(top_back, UV01), (bottom_back_right, UV00), (bottom_back_left, UV10)],
    );
    b.face(
        inside,
        &[
            (bottom_front_left, UV00),
            (bottom_back_left, UV10),
            (bottom_back_right, UV11),
            (bottom_front_right, UV01),
        ],
    );
    b.face(
        inside,
        &[
            (top_front, UV10),
            (top_back, UV00),
            (bottom_back_left, UV01),
            (bottom_front_left, UV11),
        ],
    );
    b.face(
        inside,
        &[
            (top_front, UV00),
            (bottom_front_right, UV10),
            (bottom_back_right, UV11),
            (top_back, UV01),
        ],
    );
    b.finish()
}

fn corner_wedge_inner() -> MeshData {
    // corners of the cut
    let s1 = Vec3::new(-HALF, HALF, HALF);
    let s2 = Vec3::new(HALF, -HALF, HALF);
    let s3 = Vec3::new(HALF, HALF, -HALF);
    let bbl = Vec3::new(-HALF, -HALF, -HALF);
    let bbr = Vec3::new(HALF, -HALF, -HALF);
    let btl = Vec3::new(-HALF, HALF, -HALF);
    let fbl = Vec3::new(-HALF, -HALF, HALF);
    let inside = centroid(&[s1, s2, s3, bbl, bbr, btl, fbl]);

    let mut b = Builder::default();
    b.face(inside, &[(s1, UV01), (s2, UV10), (s3, UV00)]);
    b.face(inside, &[(bbl, UV00), (fbl, UV01), (s2, UV11), (bbr, UV10)]);
    b.face(inside, &[(bbl, UV00), (bbr, UV10), (s3, UV11), (btl, UV01)]);
    b.face(inside, &[(bbl, UV10), (btl, UV11), (s1, UV01), (fbl, UV00)]);
    b.face(inside, &[(btl, UV00), (s1, UV01), (s3, UV10)]);
    b.face(inside, &[(fbl, UV00), (s2, UV01), (s1, UV10)]);
    b.face(inside, &[(bbr, UV00), (s3, UV11), (s2, UV01)]);
    b.finish()
}

fn corner_wedge_outer() -> MeshData {
    let apex = Vec3::new(-HALF, -HALF, -HALF);
    let x = Vec3::new(HALF, -HALF, -HALF);
    let y = Vec3::new(-HALF, HALF, -HALF);
    let z = Vec3::new(-HALF, -HALF, HALF);
    let inside = centroid(&[apex, x, y, z]);
    let tip = Vec2::new(0.5, 1.0);

    let mut b = Builder::default();
    b.face(inside, &[(x, UV00), (y, UV10), (z, UV01)]);
    b.face(inside, &[(apex, tip), (x, UV10), (z, UV00)]);
    b.face(inside, &[(apex, tip), (y, UV00), (x, UV10)]);
    b.face(inside, &[(apex, tip), (z, UV00), (y, UV10)]);
    b.finish()
}

fn cylinder(quality: u32) -> MeshData {
    let quality = quality.max(MIN_CYLINDER_QUALITY);
    let mut b = Builder::default();
    let top_center = b.push(Vec3::new(0.0, HALF, 0.0), Vec3::Y, Vec2::splat(0.5));
    let bottom_center = b.push(Vec3::new(0.0, -HALF, 0.0), Vec3::NEG_Y, Vec2::splat(0.5));

    // four vertices per ring step: top cap, bottom cap, side top, side bottom
    let ring = b.vertices.len() as u32;
    for i in 0..=quality {
        let u = i as f32 / quality as f32;
        let (sin, cos) = (u * TAU).sin_cos();
        let (x, z) = (cos * HALF, sin * HALF);
        let top = Vec3::new(x, HALF, z);
        let bottom = Vec3::new(x, -HALF, z);
        let cap_uv = Vec2::new(0.5 + cos * 0.5, 0.5 + sin * 0.5);
        let side = Vec3::new(cos, 0.0, sin);

        b.push(top, Vec3::Y, cap_uv);
        b.push(bottom, Vec3::NEG_Y, cap_uv);
        b.push(top, side, Vec2::new(u, 1.0));
        b.push(bottom, side, Vec2::new(u, 0.0));
    }

    for i in 0..quality {
        let cur = ring + i * 4;
        let next = cur + 4;
        b.indices.extend([top_center, next, cur]);
        b.indices.extend([bottom_center, cur + 1, next + 1]);
        b.indices.extend([next + 3, cur + 3, next + 2]);
        b.indices.extend([cur + 3, cur + 2, next + 2]);
    }
    b.finish()
}

fn sphere_vertex(direction: Vec3) -> Vertex {
    let normal = direction.normalize();
    let uv = Vec2::new(
        0.5 + normal.z.atan2(normal.x) / TAU,
        0.5 - normal.y.asin() / PI,
    );
    Vertex::new(normal * HALF, normal, uv)
}

fn icosphere(level: u32) -> MeshData {
    let phi = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let mut vertices: Vec<Vertex> = [
        (-1.0, phi, 0.0),
        (1.0, phi, 0.0),
        (-1.0, -phi, 0.0),
        (1.0, -phi, 0.0),
        (0.0, -1.0, phi),
        (0.0, 1.0, phi),
        (0.0, -1.0, -phi),
        (0.0, 1.0, -phi),
        (phi, 0.0, -1.0),
        (phi, 0.0, 1.0),
        (-phi, 0.0, -1.0),
        (-phi, 0.0, 1.0),
    ]
    .into_iter()
    .map(|(x, y, z)| sphere_vertex(Vec3::new(x, y, z)))
    .collect();

    let mut faces: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..level {
        let mut midpoints: BTreeMap<(u32, u32), u32> = BTreeMap::new();
        let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<Vertex>| -> u32 {
            *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                let mid = (vertices[a as usize].position() + vertices[b as usize].position()) / 2.0;
                vertices.push(sphere_vertex(mid));
                vertices.len() as u32 - 1
            })
        };

        let mut next = Vec::with_capacity(faces.len() * 4);
        for [v1, v2, v3] in faces {
            let m12 = midpoint(v1, v2, &mut vertices);
            let m23 = midpoint(v2, v3, &mut vertices);
            let m31 = midpoint(v3, v1, &mut vertices);
            next.extend([[v1, m12, m31], [v2, m23, m12], [v3, m31, m23], [m12, m23, m31]]);
        }
        faces = next;
    }

    MeshData::new(vertices, faces.into_iter().flatten().collect())
}
