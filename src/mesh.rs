//! Distortion warp mesh construction.
//!
//! For each eye a fixed-topology grid maps undistorted texture space onto
//! distorted screen space: each vertex samples the offscreen texture at its
//! grid position and lands on the screen where the lens will bend that
//! sample back to the right place. Building is pure CPU work; the
//! compositor uploads the result into GPU buffers.

use bytemuck::{Pod, Zeroable};

use crate::distortion::RadialDistortion;
use crate::geometry::TextureViewport;

/// Grid resolution per eye. 40x40 is dense enough that the piecewise-linear
/// warp stays under a pixel of error at phone-scale resolutions.
pub const MESH_ROWS: usize = 40;
pub const MESH_COLS: usize = 40;

/// `MESH_ROWS * MESH_COLS`.
pub const MESH_VERTEX_COUNT: usize = MESH_ROWS * MESH_COLS;

/// Single triangle strip across all rows, with one degenerate bridging
/// index between consecutive rows.
pub const MESH_INDEX_COUNT: usize = (MESH_ROWS - 1) * (MESH_COLS * 2) + (MESH_ROWS - 2);

/// Vignette fade margin at the viewport edge, meters on the screen.
const VIGNETTE_SIZE_M: f32 = 0.002;

/// One warp vertex: clip-space position, vignette factor, texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 2],
    pub vignette: f32,
    pub tex_coord: [f32; 2],
}

/// Warp geometry for one eye. Rebuilt wholesale on any optical change,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionMesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl DistortionMesh {
    /// Builds the warp mesh for one eye.
    ///
    /// `screen_*`/`x_eye_offset_screen_m`/`y_eye_offset_screen_m` describe
    /// the real display and the lens center position on it;
    /// `texture_*` describe the shared offscreen texture; `viewport` is the
    /// eye's rectangle (and optical center) inside that texture. All
    /// lengths are meters.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        distortion: &RadialDistortion,
        screen_width_m: f32,
        screen_height_m: f32,
        x_eye_offset_screen_m: f32,
        y_eye_offset_screen_m: f32,
        texture_width_m: f32,
        texture_height_m: f32,
        viewport: &TextureViewport,
    ) -> Self {
        let mut vertices = Vec::with_capacity(MESH_VERTEX_COUNT);

        for row in 0..MESH_ROWS {
            for col in 0..MESH_COLS {
                let u_texture = col as f32 / (MESH_COLS - 1) as f32 * (viewport.width / texture_width_m)
                    + viewport.x / texture_width_m;
                let v_texture = row as f32 / (MESH_ROWS - 1) as f32
                    * (viewport.height / texture_height_m)
                    + viewport.y / texture_height_m;

                // Radial offset from the optical center, in texture space.
                let x_texture = u_texture * texture_width_m;
                let y_texture = v_texture * texture_height_m;
                let x_texture_eye = x_texture - viewport.eye_x;
                let y_texture_eye = y_texture - viewport.eye_y;
                let r_texture = (x_texture_eye * x_texture_eye + y_texture_eye * y_texture_eye).sqrt();

                // The mesh samples distorted texture content to paint the
                // correct screen pixel, so texture space maps to screen
                // space through the inverse distortion.
                let texture_to_screen = if r_texture > 0.0 {
                    distortion.distort_inverse(r_texture) / r_texture
                } else {
                    1.0
                };

                let x_screen = x_texture_eye * texture_to_screen + x_eye_offset_screen_m;
                let y_screen = y_texture_eye * texture_to_screen + y_eye_offset_screen_m;
                let u_screen = x_screen / screen_width_m;
                let v_screen = y_screen / screen_height_m;

                // Fade width in texture space follows the local warp scale,
                // so the fade is a constant 2mm on the physical screen.
                let vignette_size_m_texture = VIGNETTE_SIZE_M / texture_to_screen;
                let dx_texture = x_texture
                    - clamp(
                        x_texture,
                        viewport.x + vignette_size_m_texture,
                        viewport.x + viewport.width - vignette_size_m_texture,
                    );
                let dy_texture = y_texture
                    - clamp(
                        y_texture,
                        viewport.y + vignette_size_m_texture,
                        viewport.y + viewport.height - vignette_size_m_texture,
                    );
                let dr_texture = (dx_texture * dx_texture + dy_texture * dy_texture).sqrt();
                let vignette = 1.0 - clamp(dr_texture / vignette_size_m_texture, 0.0, 1.0);

                vertices.push(MeshVertex {
                    position: [2.0 * u_screen - 1.0, 2.0 * v_screen - 1.0],
                    vignette,
                    tex_coord: [u_texture, v_texture],
                });
            }
        }

        Self {
            vertices,
            indices: strip_indices(),
        }
    }
}

/// Triangle-strip index buffer over the grid: rows are stitched boustrophedon
/// (alternating direction) with one repeated index between rows producing
/// degenerate triangles instead of extra draw calls.
fn strip_indices() -> Vec<u32> {
    let mut indices = Vec::with_capacity(MESH_INDEX_COUNT);
    let mut vertex = 0i32;
    for row in 0..MESH_ROWS - 1 {
        if row > 0 {
            indices.push(*indices.last().unwrap());
        }
        for col in 0..MESH_COLS {
            if col > 0 {
                if row % 2 == 0 {
                    vertex += 1;
                } else {
                    vertex -= 1;
                }
            }
            indices.push(vertex as u32);
            indices.push(vertex as u32 + MESH_COLS as u32);
        }
        vertex += MESH_COLS as i32;
    }
    debug_assert_eq!(indices.len(), MESH_INDEX_COUNT);
    indices
}

fn clamp(val: f32, min: f32, max: f32) -> f32 {
    min.max(max.min(val))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mesh() -> DistortionMesh {
        let viewport = TextureViewport {
            x: 0.0,
            y: 0.0,
            width: 0.06,
            height: 0.06,
            eye_x: 0.03,
            eye_y: 0.03,
        };
        DistortionMesh::build(
            &RadialDistortion::default(),
            0.12,
            0.07,
            0.03,
            0.032,
            0.12,
            0.06,
            &viewport,
        )
    }

    #[test]
    fn mesh_has_fixed_topology() {
        let mesh = test_mesh();
        assert_eq!(mesh.vertices.len(), 1600);
        assert_eq!(mesh.indices.len(), 3158);
        assert_eq!(MESH_VERTEX_COUNT, 1600);
        assert_eq!(MESH_INDEX_COUNT, 3158);
    }

    #[test]
    fn indices_stay_in_range_and_bridge_rows() {
        let mesh = test_mesh();
        assert!(mesh
            .indices
            .iter()
            .all(|&i| (i as usize) < MESH_VERTEX_COUNT));
        // Each row bridge repeats the previous index and the next row
        // re-enters on the same vertex, so every interior row boundary
        // contributes a run of three equal indices (two adjacent pairs).
        let degenerate_pairs = mesh
            .indices
            .windows(2)
            .filter(|pair| pair[0] == pair[1])
            .count();
        assert_eq!(degenerate_pairs, 2 * (MESH_ROWS - 2));
    }

    #[test]
    fn rebuilding_is_bit_identical() {
        let a = test_mesh();
        let b = test_mesh();
        assert_eq!(
            bytemuck::cast_slice::<MeshVertex, u8>(&a.vertices),
            bytemuck::cast_slice::<MeshVertex, u8>(&b.vertices)
        );
        assert_eq!(a.indices, b.indices);
    }

    #[test]
    fn vignette_is_full_inside_and_zero_at_edges() {
        let mesh = test_mesh();
        for row in 0..MESH_ROWS {
            for col in 0..MESH_COLS {
                let v = mesh.vertices[row * MESH_COLS + col].vignette;
                let edge = row == 0 || row == MESH_ROWS - 1 || col == 0 || col == MESH_COLS - 1;
                if edge {
                    assert!(v.abs() < 1e-6, "edge vertex ({row},{col}) vignette {v}");
                } else if (2..MESH_ROWS - 2).contains(&row) && (2..MESH_COLS - 2).contains(&col) {
                    // Two cells in, the 2mm margin is cleared on this
                    // geometry and the vignette saturates.
                    assert_eq!(v, 1.0, "interior vertex ({row},{col}) vignette {v}");
                } else {
                    assert!((0.0..=1.0).contains(&v));
                }
            }
        }
    }

    #[test]
    fn vignette_decreases_toward_the_boundary() {
        let mesh = test_mesh();
        let mid = MESH_ROWS / 2;
        // Walk from the center column to the right edge along the middle row.
        let values: Vec<f32> = (MESH_COLS / 2..MESH_COLS)
            .map(|col| mesh.vertices[mid * MESH_COLS + col].vignette)
            .collect();
        for pair in values.windows(2) {
            assert!(pair[1] <= pair[0], "vignette increased: {values:?}");
        }
        assert_eq!(values[0], 1.0);
        assert!(values[values.len() - 1].abs() < 1e-6);
    }

    #[test]
    fn positions_are_clip_space() {
        let mesh = test_mesh();
        // The warp contracts texture space onto the screen, so positions
        // stay within clip bounds with this geometry.
        for v in &mesh.vertices {
            assert!(v.position[0].is_finite() && v.position[1].is_finite());
            assert!(v.tex_coord[0] >= -1e-6 && v.tex_coord[0] <= 1.0 + 1e-6);
            assert!(v.tex_coord[1] >= -1e-6 && v.tex_coord[1] <= 1.0 + 1e-6);
        }
    }
}
