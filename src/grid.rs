use serde::Serialize;
use thiserror::Error;

use crate::config::GridGeometry;

/// A screen-space pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("grid needs at least one row and one column, got {rows}x{columns}")]
    Empty { rows: u32, columns: u32 },

    #[error("slot size must be positive, got {width}x{height}")]
    SlotSize { width: i32, height: i32 },

    #[error("grid of {rows}x{columns} slots does not fit on screen")]
    TooLarge { rows: u32, columns: u32 },
}

/// Far above any real inventory; bounds the slot list allocation.
const MAX_SLOTS: u64 = 10_000;

/// Slot centers in row-major order, computed once from the grid geometry.
/// The list is only ever replaced as a whole.
pub fn slot_centers(geometry: &GridGeometry) -> Result<Vec<Point>, GridError> {
    if geometry.rows == 0 || geometry.columns == 0 {
        return Err(GridError::Empty {
            rows: geometry.rows,
            columns: geometry.columns,
        });
    }
    if geometry.slot_width <= 0 || geometry.slot_height <= 0 {
        return Err(GridError::SlotSize {
            width: geometry.slot_width,
            height: geometry.slot_height,
        });
    }

    let too_large = GridError::TooLarge {
        rows: geometry.rows,
        columns: geometry.columns,
    };
    if u64::from(geometry.rows) * u64::from(geometry.columns) > MAX_SLOTS {
        return Err(too_large);
    }

    // i64 cannot overflow here: every operand is within i32 and the counts are bounded.
    let center = |origin: i32, index: u32, size: i32| {
        let value = i64::from(origin) + i64::from(index) * i64::from(size) + i64::from(size / 2);
        i32::try_from(value).ok()
    };

    let mut centers = Vec::with_capacity((geometry.rows * geometry.columns) as usize);
    for row in 0..geometry.rows {
        let y = center(geometry.origin_y, row, geometry.slot_height).ok_or(too_large.clone())?;
        for col in 0..geometry.columns {
            let x =
                center(geometry.origin_x, col, geometry.slot_width).ok_or(too_large.clone())?;
            centers.push(Point::new(x, y));
        }
    }
    Ok(centers)
}
