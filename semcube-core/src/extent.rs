//! The spatio-temporal extent a query is evaluated over.
//!
//! The extent defines the `time` and `space` dimensions every retrieved
//! layer is subset to, and it produces the canvas array that sits at the
//! bottom of each evaluation context.

use chrono::{DateTime, Utc};

use crate::value::{Cell, DataArray, Dimension};

pub const TIME: &str = "time";
pub const SPACE: &str = "space";

#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    /// Observation timestamps, ascending.
    pub time: Vec<DateTime<Utc>>,
    /// Pixel center coordinates, row-major over the spatial grid.
    pub space: Vec<[f64; 2]>,
    /// Spatial bounds as `[xmin, ymin, xmax, ymax]`.
    pub bounds: [f64; 4],
    /// Pixel size in coordinate units.
    pub resolution: f64,
}

impl Extent {
    pub fn new(
        time: Vec<DateTime<Utc>>,
        space: Vec<[f64; 2]>,
        bounds: [f64; 4],
        resolution: f64,
    ) -> Self {
        Extent {
            time,
            space,
            bounds,
            resolution,
        }
    }

    /// A regular grid of pixel centers covering `bounds` at `resolution`.
    pub fn grid(time: Vec<DateTime<Utc>>, bounds: [f64; 4], resolution: f64) -> Self {
        let [xmin, ymin, xmax, ymax] = bounds;
        let cols = ((xmax - xmin) / resolution).ceil().max(1.0) as usize;
        let rows = ((ymax - ymin) / resolution).ceil().max(1.0) as usize;
        let mut space = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                space.push([
                    xmin + (c as f64 + 0.5) * resolution,
                    ymin + (r as f64 + 0.5) * resolution,
                ]);
            }
        }
        Extent::new(time, space, bounds, resolution)
    }

    pub fn time_dim(&self) -> Dimension {
        Dimension::new(TIME, self.time.iter().map(|t| Cell::Time(*t)).collect())
    }

    pub fn space_dim(&self) -> Dimension {
        Dimension::new(SPACE, self.space.iter().map(|p| Cell::Coords(*p)).collect())
    }

    /// The untyped all-present canvas array over `time` and `space`.
    pub fn canvas(&self) -> DataArray {
        let data = vec![Some(Cell::Int(1)); self.time.len() * self.space.len()];
        DataArray {
            name: None,
            dims: vec![self.time_dim(), self.space_dim()],
            data,
            value_type: None,
            value_labels: None,
        }
    }

    /// A copy narrowed to the timestamps in `keep`, preserving order.
    pub fn with_time_subset(&self, keep: &[DateTime<Utc>]) -> Self {
        let time = self
            .time
            .iter()
            .filter(|t| keep.contains(t))
            .copied()
            .collect();
        Extent {
            time,
            space: self.space.clone(),
            bounds: self.bounds,
            resolution: self.resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn grid_covers_bounds() {
        let extent = Extent::grid(vec![t(1)], [0.0, 0.0, 2.0, 1.0], 1.0);
        assert_eq!(extent.space, vec![[0.5, 0.5], [1.5, 0.5]]);
        let canvas = extent.canvas();
        assert_eq!(canvas.shape(), vec![1, 2]);
        assert!(!canvas.is_empty());
        assert_eq!(canvas.value_type, None);
    }

    #[test]
    fn time_subset_keeps_order() {
        let extent = Extent::grid(vec![t(1), t(2), t(3)], [0.0, 0.0, 1.0, 1.0], 1.0);
        let narrowed = extent.with_time_subset(&[t(3), t(1)]);
        assert_eq!(narrowed.time, vec![t(1), t(3)]);
    }
}
