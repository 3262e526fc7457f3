use glam::Vec3;

use super::vertex::{v, SkinnedVertex, Vertex};

const FACE_NORMALS: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
const SIDE_NORMALS: [Vec3; 4] = [Vec3::X, Vec3::Z, Vec3::NEG_X, Vec3::NEG_Z];

/// Unit cube centred on the origin, 4 vertices per face, counter-clockwise
/// front faces.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for normal in FACE_NORMALS {
        let up = if normal.y.abs() > 0.5 { Vec3::Z } else { Vec3::Y };
        // right x up == normal
        let right = up.cross(normal);
        let base = vertices.len() as u32;
        let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
        for (x, y) in corners {
            let pos = normal * 0.5 + right * x + up * y;
            vertices.push(v(pos.to_array(), normal.to_array(), [x + 0.5, 0.5 - y]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

/// Open square column of `height` along +Y cut into `segments` rings, for
/// bending with a bone chain. Ring `r` is bound rigidly to joint
/// `r * joints / (segments + 1)`.
pub fn bar_mesh(segments: u32, joints: u32, width: f32, height: f32) -> (Vec<SkinnedVertex>, Vec<u32>) {
    let segments = segments.max(1);
    let joints = joints.max(1);
    let rings = segments + 1;
    let mut vertices = Vec::with_capacity((SIDE_NORMALS.len() as u32 * rings * 2) as usize);
    let mut indices = Vec::with_capacity((SIDE_NORMALS.len() as u32 * segments * 6) as usize);

    for normal in SIDE_NORMALS {
        let right = Vec3::Y.cross(normal);
        let base = vertices.len() as u32;
        for ring in 0..rings {
            let t = ring as f32 / segments as f32;
            let joint = (ring * joints / rings).min(joints - 1);
            for side in [-0.5f32, 0.5] {
                let pos = normal * 0.5 * width + right * side * width + Vec3::Y * t * height;
                let vertex = v(pos.to_array(), normal.to_array(), [side + 0.5, 1.0 - t]);
                vertices.push(SkinnedVertex::rigid(vertex, joint));
            }
        }
        for ring in 0..segments {
            let a = base + ring * 2;
            let (b, c, d) = (a + 1, a + 3, a + 2);
            indices.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }

    (vertices, indices)
}
