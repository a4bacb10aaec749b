//! Decoded elevation tiles.

use crate::error::RetrievalError;
use crate::geom::Sector;

use super::ElevationFormat;

/// Sample value that marks a missing elevation.
pub const NO_DATA: f64 = 0.0;

fn is_no_data(samples: [f64; 4]) -> bool {
    samples.iter().all(|&v| v == NO_DATA)
}

/// A grid of elevation samples covering a sector.
///
/// Samples are stored row-major with row 0 at the sector's north edge, as
/// they arrive in a BIL payload.
#[derive(Debug, Clone)]
pub struct ElevationImage {
    sector: Sector,
    width: usize,
    height: usize,
    samples: Vec<f32>,
    size_in_bytes: usize,
    min_elevation: f64,
    max_elevation: f64,
    has_data: bool,
    has_missing_data: bool,
}

impl ElevationImage {
    /// Builds an image from samples in storage order.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Malformed`] when the sample count does not
    /// match the dimensions.
    pub fn from_samples(
        sector: Sector,
        width: usize,
        height: usize,
        samples: Vec<f32>,
        bytes_per_sample: usize,
    ) -> Result<Self, RetrievalError> {
        if width == 0 || height == 0 || samples.len() != width * height {
            return Err(RetrievalError::Malformed(format!(
                "expected {}x{} elevation samples, got {}",
                width,
                height,
                samples.len()
            )));
        }

        let mut image = Self {
            sector,
            width,
            height,
            size_in_bytes: samples.len() * bytes_per_sample,
            samples,
            min_elevation: 0.0,
            max_elevation: 0.0,
            has_data: false,
            has_missing_data: false,
        };
        image.find_min_and_max_elevation();
        Ok(image)
    }

    /// Decodes a little-endian BIL payload.
    pub fn decode(
        sector: Sector,
        width: usize,
        height: usize,
        format: ElevationFormat,
        bytes: &[u8],
    ) -> Result<Self, RetrievalError> {
        let sample_size = format.bytes_per_sample();
        if bytes.len() != width * height * sample_size {
            return Err(RetrievalError::Malformed(format!(
                "{} payload of {} bytes does not hold {}x{} samples",
                format.mime_type(),
                bytes.len(),
                width,
                height
            )));
        }

        let samples = match format {
            ElevationFormat::Bil16 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
                .collect(),
            ElevationFormat::Bil32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };
        Self::from_samples(sector, width, height, samples, sample_size)
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    /// True when at least one sample has data.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// True when at least one sample is [`NO_DATA`].
    pub fn has_missing_data(&self) -> bool {
        self.has_missing_data
    }

    pub fn min_elevation(&self) -> f64 {
        self.min_elevation
    }

    pub fn max_elevation(&self) -> f64 {
        self.max_elevation
    }

    fn sample(&self, x: usize, row: usize) -> f64 {
        self.samples[x + row * self.width] as f64
    }

    /// Sample at `(x, y)` with `y` counted from the south edge. Zero outside
    /// the image.
    pub fn pixel(&self, x: usize, y: usize) -> f64 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.sample(x, self.height - y - 1)
    }

    /// Bilinear row/column lookup shared by point and grid queries.
    fn interpolate(&self, x: f64, y: f64) -> f64 {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x0 = x.clamp(0.0, max_x).floor();
        let x1 = (x0 + 1.0).clamp(0.0, max_x);
        let y0 = y.clamp(0.0, max_y).floor();
        let y1 = (y0 + 1.0).clamp(0.0, max_y);
        let xf = x - x0;
        let yf = y - y0;

        let (x0, x1, y0, y1) = (x0 as usize, x1 as usize, y0 as usize, y1 as usize);
        let samples = [
            self.sample(x0, y0),
            self.sample(x1, y0),
            self.sample(x0, y1),
            self.sample(x1, y1),
        ];
        if is_no_data(samples) {
            return f64::NAN;
        }

        (1.0 - xf) * (1.0 - yf) * samples[0]
            + xf * (1.0 - yf) * samples[1]
            + (1.0 - xf) * yf * samples[2]
            + xf * yf * samples[3]
    }

    fn image_x(&self, longitude: f64) -> f64 {
        (self.width - 1) as f64 * (longitude - self.sector.min_longitude)
            / self.sector.delta_longitude()
    }

    fn image_y(&self, latitude: f64) -> f64 {
        (self.height - 1) as f64 * (self.sector.max_latitude - latitude)
            / self.sector.delta_latitude()
    }

    /// Bilinearly interpolated elevation, or `NaN` when all four
    /// surrounding samples are [`NO_DATA`].
    pub fn elevation_at_location(&self, latitude: f64, longitude: f64) -> f64 {
        self.interpolate(self.image_x(longitude), self.image_y(latitude))
    }

    /// Fills the `NaN` entries of `result` whose grid location falls inside
    /// the image. Entries where the image has no data stay `NaN`.
    pub fn elevations_for_grid(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        result: &mut [f64],
    ) {
        let own = &self.sector;
        for (index, location) in sector.grid_locations(num_lat, num_lon).iter().enumerate() {
            let Some(slot) = result.get_mut(index) else {
                break;
            };
            if !slot.is_nan() {
                continue;
            }
            let (lat, lon) = (location.latitude, location.longitude);
            if lat >= own.min_latitude
                && lat <= own.max_latitude
                && lon >= own.min_longitude
                && lon <= own.max_longitude
            {
                *slot = self.interpolate(self.image_x(lon), self.image_y(lat));
            }
        }
    }

    /// Extreme sample values within `sector`, or the image's own extremes
    /// when `sector` contains the whole image. `None` when the image has no
    /// data.
    pub fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> Option<(f64, f64)> {
        if !self.has_data {
            return None;
        }
        if sector.contains(&self.sector) {
            return Some((self.min_elevation, self.max_elevation));
        }

        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let min_y = self.image_y(sector.max_latitude).floor().clamp(0.0, max_y) as usize;
        let max_row = self.image_y(sector.min_latitude).ceil().clamp(0.0, max_y) as usize;
        let min_x = self.image_x(sector.min_longitude).floor().clamp(0.0, max_x) as usize;
        let max_col = self.image_x(sector.max_longitude).ceil().clamp(0.0, max_x) as usize;

        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for row in min_y..=max_row {
            for x in min_x..=max_col {
                let value = self.sample(x, row);
                min = min.min(value);
                max = max.max(value);
            }
        }
        Some((min, max))
    }

    fn find_min_and_max_elevation(&mut self) {
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for &value in &self.samples {
            let value = value as f64;
            if value == NO_DATA {
                self.has_missing_data = true;
            } else {
                self.has_data = true;
                min = min.min(value);
                max = max.max(value);
            }
        }

        if self.has_data {
            self.min_elevation = min;
            self.max_elevation = max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2x2 image over (0..1, 0..1): north row 10, 20; south row 30, 40.
    fn image() -> ElevationImage {
        ElevationImage::from_samples(
            Sector::new(0.0, 1.0, 0.0, 1.0),
            2,
            2,
            vec![10.0, 20.0, 30.0, 40.0],
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_pixel_counts_rows_from_south() {
        let image = image();
        assert_eq!(image.pixel(0, 0), 30.0);
        assert_eq!(image.pixel(1, 1), 20.0);
        assert_eq!(image.pixel(2, 0), 0.0);
    }

    #[test]
    fn test_bilinear_interpolation() {
        let image = image();
        assert_eq!(image.elevation_at_location(1.0, 0.0), 10.0);
        assert_eq!(image.elevation_at_location(0.0, 1.0), 40.0);
        assert_eq!(image.elevation_at_location(0.5, 0.5), 25.0);
    }

    #[test]
    fn test_all_no_data_yields_nan() {
        let image = ElevationImage::from_samples(
            Sector::new(0.0, 1.0, 0.0, 1.0),
            2,
            2,
            vec![0.0; 4],
            2,
        )
        .unwrap();
        assert!(image.elevation_at_location(0.5, 0.5).is_nan());
        assert!(!image.has_data());
        assert!(image.has_missing_data());
        assert_eq!(image.min_and_max_elevations_for_sector(&Sector::FULL_SPHERE), None);
    }

    #[test]
    fn test_grid_only_fills_missing_entries_inside_image() {
        let image = image();
        let sector = Sector::new(0.0, 2.0, 0.0, 1.0);
        let mut grid = vec![f64::NAN, 5.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN];
        image.elevations_for_grid(&sector, 3, 2, &mut grid);

        assert_eq!(grid[0], 30.0);
        assert_eq!(grid[1], 5.0);
        assert_eq!(grid[2], 10.0);
        assert_eq!(grid[3], 20.0);
        assert!(grid[4].is_nan() && grid[5].is_nan());
    }

    #[test]
    fn test_min_and_max() {
        let image = image();
        assert_eq!(image.min_elevation(), 10.0);
        assert_eq!(image.max_elevation(), 40.0);
        assert_eq!(
            image.min_and_max_elevations_for_sector(&Sector::FULL_SPHERE),
            Some((10.0, 40.0))
        );
        assert_eq!(
            image.min_and_max_elevations_for_sector(&Sector::new(0.0, 0.2, 0.0, 0.2)),
            Some((10.0, 40.0))
        );
    }

    #[test]
    fn test_decode_bil16_and_bil32() {
        let sector = Sector::new(0.0, 1.0, 0.0, 1.0);
        let bil16: Vec<u8> = [-5i16, 100, 0, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let image = ElevationImage::decode(sector, 2, 2, ElevationFormat::Bil16, &bil16).unwrap();
        assert_eq!(image.pixel(0, 1), -5.0);
        assert_eq!(image.size_in_bytes(), 8);
        assert!(image.has_missing_data());

        let bil32: Vec<u8> = [1.5f32, 2.5, 3.5, 4.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let image = ElevationImage::decode(sector, 2, 2, ElevationFormat::Bil32, &bil32).unwrap();
        assert_eq!(image.pixel(1, 0), 4.5);
        assert_eq!(image.size_in_bytes(), 16);

        assert!(matches!(
            ElevationImage::decode(sector, 2, 2, ElevationFormat::Bil32, &bil16),
            Err(RetrievalError::Malformed(_))
        ));
    }
}
