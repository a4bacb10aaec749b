//! Index buffers shared by every terrain tile of a given grid size.
//!
//! A tile's vertex grid has `(w + 1) * (h + 1)` vertices, row-major from
//! the south-west corner. Its triangles are split into the interior cells
//! and four border strips. Each strip exists at full resolution and at half
//! resolution; the half-resolution strip skips every odd vertex along the
//! outer edge so that it mates with the edge of a neighbor one level coarser
//! without a crack. All triangles wind counter-clockwise when viewed from
//! above.

use crate::error::ConfigurationError;
use crate::tile::{Edge, TerrainTile};

/// Resolution of a tile edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderResolution {
    /// Every edge vertex is used.
    Full,
    /// Only even edge vertices are used, matching a coarser neighbor.
    Half,
}

/// A contiguous run of indices within [`SharedTileGeometry::indices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRange {
    pub offset: usize,
    pub count: usize,
}

/// Triangle indices, texture coordinates and line indices shared by all
/// terrain tiles of one grid size.
#[derive(Debug, Clone)]
pub struct SharedTileGeometry {
    tile_width: usize,
    tile_height: usize,
    texcoords: Vec<f32>,
    indices: Vec<u32>,
    core_range: IndexRange,
    /// Indexed by edge, then `[Full, Half]`.
    border_ranges: [[IndexRange; 2]; 4],
    wireframe_indices: Vec<u32>,
    outline_indices: Vec<u32>,
}

impl SharedTileGeometry {
    /// Builds the buffers for tiles of `tile_width` x `tile_height` cells.
    /// Both must be even and at least 2.
    pub fn new(tile_width: u32, tile_height: u32) -> Result<Self, ConfigurationError> {
        if tile_width < 2 || tile_height < 2 || tile_width % 2 != 0 || tile_height % 2 != 0 {
            return Err(ConfigurationError::OddTerrainTileSize {
                width: tile_width,
                height: tile_height,
            });
        }

        let w = tile_width as usize;
        let h = tile_height as usize;
        let mut geometry = Self {
            tile_width: w,
            tile_height: h,
            texcoords: build_texcoords(w, h),
            indices: Vec::new(),
            core_range: IndexRange::default(),
            border_ranges: [[IndexRange::default(); 2]; 4],
            wireframe_indices: build_wireframe(w, h),
            outline_indices: build_outline(w, h),
        };

        let core = build_core(w, h);
        geometry.core_range = geometry.append(core);

        for edge in Edge::ALL {
            for (slot, resolution) in [BorderResolution::Full, BorderResolution::Half]
                .into_iter()
                .enumerate()
            {
                let strip = build_border(w, h, edge, resolution);
                geometry.border_ranges[edge_slot(edge)][slot] = geometry.append(strip);
            }
        }

        Ok(geometry)
    }

    fn append(&mut self, indices: Vec<u32>) -> IndexRange {
        let range = IndexRange {
            offset: self.indices.len(),
            count: indices.len(),
        };
        self.indices.extend(indices);
        range
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_height(&self) -> usize {
        self.tile_height
    }

    pub fn vertex_count(&self) -> usize {
        (self.tile_width + 1) * (self.tile_height + 1)
    }

    /// `(s, t)` pairs per vertex, spanning [0, 1] across the tile.
    pub fn texcoords(&self) -> &[f32] {
        &self.texcoords
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn core_range(&self) -> IndexRange {
        self.core_range
    }

    pub fn border_range(&self, edge: Edge, resolution: BorderResolution) -> IndexRange {
        let slot = match resolution {
            BorderResolution::Full => 0,
            BorderResolution::Half => 1,
        };
        self.border_ranges[edge_slot(edge)][slot]
    }

    /// The core range followed by each border strip at the resolution the
    /// tile's neighbors require.
    pub fn draw_ranges(&self, tile: &TerrainTile) -> [IndexRange; 5] {
        let mut ranges = [self.core_range; 5];
        for (i, edge) in Edge::ALL.into_iter().enumerate() {
            ranges[i + 1] = self.border_range(edge, tile.border_resolution(edge));
        }
        ranges
    }

    /// Slice of [`indices`](Self::indices) covered by `range`.
    pub fn range_indices(&self, range: IndexRange) -> &[u32] {
        &self.indices[range.offset..range.offset + range.count]
    }

    /// Line-list indices of every grid row and column segment.
    pub fn wireframe_indices(&self) -> &[u32] {
        &self.wireframe_indices
    }

    /// Line-loop indices around the tile boundary, counter-clockwise from
    /// the south-west corner.
    pub fn outline_indices(&self) -> &[u32] {
        &self.outline_indices
    }
}

fn edge_slot(edge: Edge) -> usize {
    match edge {
        Edge::North => 0,
        Edge::South => 1,
        Edge::East => 2,
        Edge::West => 3,
    }
}

fn vertex_index(w: usize, col: usize, row: usize) -> u32 {
    (col + row * (w + 1)) as u32
}

fn build_texcoords(w: usize, h: usize) -> Vec<f32> {
    let mut texcoords = Vec::with_capacity(2 * (w + 1) * (h + 1));
    for row in 0..=h {
        let t = if row == h { 1.0 } else { row as f32 / h as f32 };
        for col in 0..=w {
            let s = if col == w { 1.0 } else { col as f32 / w as f32 };
            texcoords.push(s);
            texcoords.push(t);
        }
    }
    texcoords
}

/// Two triangles per interior cell, split along the lower-right to
/// upper-left diagonal.
fn build_core(w: usize, h: usize) -> Vec<u32> {
    let mut indices = Vec::new();
    for row in 1..h.saturating_sub(1) {
        for col in 1..w.saturating_sub(1) {
            let ll = vertex_index(w, col, row);
            let lr = vertex_index(w, col + 1, row);
            let ur = vertex_index(w, col + 1, row + 1);
            let ul = vertex_index(w, col, row + 1);
            indices.extend_from_slice(&[ll, lr, ul, lr, ur, ul]);
        }
    }
    indices
}

/// A strip between the outer edge and the first inner row or column.
///
/// The strip is described as if it were the south edge: `outer(k)` walks
/// the boundary counter-clockwise for `k` in `0..=n`, `inner(k)` walks the
/// parallel interior line for `k` in `1..n`. The other edges are rotations
/// of it, which keeps the winding counter-clockwise.
fn build_border(w: usize, h: usize, edge: Edge, resolution: BorderResolution) -> Vec<u32> {
    let (n, outer, inner): (usize, Box<dyn Fn(usize) -> u32>, Box<dyn Fn(usize) -> u32>) = match edge
    {
        Edge::South => (
            w,
            Box::new(move |k| vertex_index(w, k, 0)),
            Box::new(move |k| vertex_index(w, k, 1)),
        ),
        Edge::East => (
            h,
            Box::new(move |k| vertex_index(w, w, k)),
            Box::new(move |k| vertex_index(w, w - 1, k)),
        ),
        Edge::North => (
            w,
            Box::new(move |k| vertex_index(w, w - k, h)),
            Box::new(move |k| vertex_index(w, w - k, h - 1)),
        ),
        Edge::West => (
            h,
            Box::new(move |k| vertex_index(w, 0, h - k)),
            Box::new(move |k| vertex_index(w, 1, h - k)),
        ),
    };

    let snap = |k: usize| match resolution {
        BorderResolution::Full => k,
        BorderResolution::Half => k - (k % 2),
    };
    let o = |k: usize| outer(snap(k));
    let i = |k: usize| inner(k);

    let mut triangles = vec![[o(0), o(1), i(1)]];
    for k in 1..n - 1 {
        triangles.push([o(k), o(k + 1), i(k)]);
        triangles.push([o(k + 1), i(k + 1), i(k)]);
    }
    triangles.push([o(n - 1), o(n), i(n - 1)]);

    triangles
        .into_iter()
        .filter(|[a, b, c]| a != b && b != c && a != c)
        .flatten()
        .collect()
}

fn build_wireframe(w: usize, h: usize) -> Vec<u32> {
    let mut indices = Vec::new();
    for row in 0..=h {
        for col in 0..w {
            indices.push(vertex_index(w, col, row));
            indices.push(vertex_index(w, col + 1, row));
        }
    }
    for col in 0..=w {
        for row in 0..h {
            indices.push(vertex_index(w, col, row));
            indices.push(vertex_index(w, col, row + 1));
        }
    }
    indices
}

fn build_outline(w: usize, h: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity(2 * (w + h));
    indices.extend((0..w).map(|col| vertex_index(w, col, 0)));
    indices.extend((0..h).map(|row| vertex_index(w, w, row)));
    indices.extend((1..=w).rev().map(|col| vertex_index(w, col, h)));
    indices.extend((1..=h).rev().map(|row| vertex_index(w, 0, row)));
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(geometry: &SharedTileGeometry, index: u32) -> (f64, f64) {
        let stride = geometry.tile_width() + 1;
        let index = index as usize;
        ((index % stride) as f64, (index / stride) as f64)
    }

    /// Signed area of each triangle in grid space.
    fn triangle_areas(geometry: &SharedTileGeometry, indices: &[u32]) -> Vec<f64> {
        indices
            .chunks(3)
            .map(|tri| {
                let (ax, ay) = position(geometry, tri[0]);
                let (bx, by) = position(geometry, tri[1]);
                let (cx, cy) = position(geometry, tri[2]);
                0.5 * ((bx - ax) * (cy - ay) - (by - ay) * (cx - ax))
            })
            .collect()
    }

    fn total_area(geometry: &SharedTileGeometry, resolutions: [BorderResolution; 4]) -> f64 {
        let mut areas = triangle_areas(geometry, geometry.range_indices(geometry.core_range()));
        for (edge, resolution) in Edge::ALL.into_iter().zip(resolutions) {
            let range = geometry.border_range(edge, resolution);
            areas.extend(triangle_areas(geometry, geometry.range_indices(range)));
        }
        assert!(areas.iter().all(|&a| a > 0.0), "triangle wound clockwise or degenerate");
        areas.iter().sum()
    }

    #[test]
    fn test_rejects_odd_and_tiny_sizes() {
        assert!(SharedTileGeometry::new(31, 32).is_err());
        assert!(SharedTileGeometry::new(32, 0).is_err());
        assert!(SharedTileGeometry::new(2, 2).is_ok());
    }

    #[test]
    fn test_full_resolution_covers_tile() {
        for (w, h) in [(2, 2), (4, 6), (32, 32)] {
            let geometry = SharedTileGeometry::new(w, h).unwrap();
            let area = total_area(&geometry, [BorderResolution::Full; 4]);
            assert!((area - (w * h) as f64).abs() < 1e-9, "{w}x{h}: {area}");
        }
    }

    #[test]
    fn test_mixed_resolutions_cover_tile() {
        let geometry = SharedTileGeometry::new(8, 6).unwrap();
        let mixed = [
            BorderResolution::Half,
            BorderResolution::Full,
            BorderResolution::Half,
            BorderResolution::Full,
        ];
        assert!((total_area(&geometry, mixed) - 48.0).abs() < 1e-9);
        assert!((total_area(&geometry, [BorderResolution::Half; 4]) - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_half_resolution_uses_only_even_edge_vertices() {
        let geometry = SharedTileGeometry::new(8, 8).unwrap();
        let range = geometry.border_range(Edge::South, BorderResolution::Half);
        for &index in geometry.range_indices(range) {
            let (col, row) = position(&geometry, index);
            if row == 0.0 {
                assert_eq!(col % 2.0, 0.0, "odd south vertex {col}");
            }
        }

        let range = geometry.border_range(Edge::West, BorderResolution::Half);
        for &index in geometry.range_indices(range) {
            let (col, row) = position(&geometry, index);
            if col == 0.0 {
                assert_eq!(row % 2.0, 0.0, "odd west vertex {row}");
            }
        }
    }

    #[test]
    fn test_texcoords_and_lines() {
        let geometry = SharedTileGeometry::new(4, 2).unwrap();
        let texcoords = geometry.texcoords();
        assert_eq!(texcoords.len(), 2 * geometry.vertex_count());
        assert_eq!(&texcoords[texcoords.len() - 2..], &[1.0, 1.0]);
        assert_eq!(&texcoords[..2], &[0.0, 0.0]);

        assert_eq!(geometry.outline_indices().len(), 12);
        assert_eq!(geometry.outline_indices()[0], 0);
        // rows: 3 * 4 segments, columns: 5 * 2 segments
        assert_eq!(geometry.wireframe_indices().len(), 2 * (12 + 10));
    }
}
