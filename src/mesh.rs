//! The rabbit: positions, derived normals and triangle cells. Built once at startup and
//! shared read-only afterwards.
use crate::Vertex;
use nalgebra::Vector3;
use std::f32::consts::{PI, TAU};

/// Rings between the poles of each ellipsoid part
const STACKS: u16 = 12;
/// Segments around each ellipsoid part
const SLICES: u16 = 16;

/// Center and radii of one ellipsoid making up the rabbit
struct Part {
    center: [f32; 3],
    radii: [f32; 3],
}

/// The rabbit faces +x, sitting on its feet along -y. Units are roughly centimeters.
const RABBIT: [Part; 8] = [
    // Body
    Part { center: [0.0, 0.0, 0.0], radii: [4.6, 3.8, 3.5] },
    // Head
    Part { center: [4.2, 3.5, 0.0], radii: [2.5, 2.2, 2.0] },
    // Snout
    Part { center: [6.3, 3.0, 0.0], radii: [0.9, 0.8, 0.8] },
    // Ears
    Part { center: [3.4, 7.2, 0.9], radii: [0.7, 2.8, 0.45] },
    Part { center: [3.4, 7.2, -0.9], radii: [0.7, 2.8, 0.45] },
    // Tail
    Part { center: [-4.7, 0.9, 0.0], radii: [1.1, 1.1, 1.1] },
    // Hind feet
    Part { center: [-1.2, -3.4, 1.9], radii: [2.6, 0.8, 1.0] },
    Part { center: [-1.2, -3.4, -1.9], radii: [2.6, 0.8, 1.0] },
];

/// Immutable triangle mesh with per-vertex normals
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub cells: Vec<[u16; 3]>,
}

impl Mesh {
    /// Derive normals for the given triangles, then center the positions on their bounding box.
    pub fn new(positions: Vec<[f32; 3]>, cells: Vec<[u16; 3]>) -> Self {
        let normals = vertex_normals(&cells, &positions);
        let positions = center(&positions);
        Self {
            positions,
            normals,
            cells,
        }
    }

    /// The built-in rabbit
    pub fn rabbit() -> Self {
        let mut positions = Vec::new();
        let mut cells = Vec::new();
        for part in RABBIT.iter() {
            ellipsoid(part, &mut positions, &mut cells);
        }
        Self::new(positions, cells)
    }

    /// Interleaved vertex data for upload
    pub fn vertices(&self) -> Vec<Vertex> {
        self.positions
            .iter()
            .zip(&self.normals)
            .map(|(&pos, &normal)| Vertex::new(pos, normal))
            .collect()
    }

    /// Flattened index list
    pub fn indices(&self) -> Vec<u16> {
        self.cells.iter().flatten().copied().collect()
    }
}

/// Append a UV ellipsoid wound counter-clockwise when seen from outside
fn ellipsoid(part: &Part, positions: &mut Vec<[f32; 3]>, cells: &mut Vec<[u16; 3]>) {
    let base = positions.len() as u16;
    let [cx, cy, cz] = part.center;
    let [rx, ry, rz] = part.radii;

    for stack in 0..=STACKS {
        let phi = PI * stack as f32 / STACKS as f32;
        for slice in 0..=SLICES {
            let theta = TAU * slice as f32 / SLICES as f32;
            positions.push([
                cx + rx * phi.sin() * theta.cos(),
                cy + ry * phi.cos(),
                cz + rz * phi.sin() * theta.sin(),
            ]);
        }
    }

    let row = SLICES + 1;
    for stack in 0..STACKS {
        for slice in 0..SLICES {
            let a = base + stack * row + slice;
            let b = a + row;
            let c = a + 1;
            let d = b + 1;
            cells.push([a, c, b]);
            cells.push([c, d, b]);
        }
    }
}

/// Area-weighted vertex normals. Vertices touched only by degenerate triangles get a zero normal.
pub fn vertex_normals(cells: &[[u16; 3]], positions: &[[f32; 3]]) -> Vec<[f32; 3]> {
    let mut sums = vec![Vector3::<f32>::zeros(); positions.len()];
    let point = |i: u16| Vector3::from(positions[i as usize]);

    for &[a, b, c] in cells {
        let face = (point(b) - point(a)).cross(&(point(c) - point(a)));
        for &i in &[a, b, c] {
            sums[i as usize] += face;
        }
    }

    sums.into_iter()
        .map(|sum| {
            sum.try_normalize(f32::EPSILON)
                .map(Into::into)
                .unwrap_or([0.0; 3])
        })
        .collect()
}

/// Translate `positions` so the midpoint of their bounding box is the origin
pub fn center(positions: &[[f32; 3]]) -> Vec<[f32; 3]> {
    let mut iter = positions.iter().map(|&p| Vector3::from(p));
    let first = match iter.next() {
        Some(first) => first,
        None => return Vec::new(),
    };
    let (min, max) = iter.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
    let mid = (min + max) / 2.0;
    positions
        .iter()
        .map(|&p| (Vector3::from(p) - mid).into())
        .collect()
}
