//! Print job parameters.

use crate::bitmap::Bitmap;
use crate::models::ModelProfile;
use crate::{NiimbotError, Result};

/// Valid print density range.
pub const DENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// How copies beyond the first are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Send the full page sequence once per copy.
    PerCopy,
    /// Send the page once with a quantity; firmware repeats it.
    Streaming,
}

/// A single print invocation. Only constructible through [`PrintJob::new`],
/// so density and quantity are always in range.
#[derive(Debug, Clone)]
pub struct PrintJob {
    bitmap: Bitmap,
    density: u8,
    quantity: u16,
    model: String,
}

impl PrintJob {
    pub fn new(bitmap: Bitmap, density: u8, quantity: u16, model: impl Into<String>) -> Result<Self> {
        if !DENSITY_RANGE.contains(&density) {
            return Err(NiimbotError::InvalidParameter(format!(
                "density must be between 1 and 5, got {density}"
            )));
        }
        if quantity == 0 {
            return Err(NiimbotError::InvalidParameter(
                "quantity must be at least 1".into(),
            ));
        }
        Ok(Self {
            bitmap,
            density,
            quantity,
            model: model.into(),
        })
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn density(&self) -> u8 {
        self.density
    }

    pub fn quantity(&self) -> u16 {
        self.quantity
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn strategy(&self) -> CopyStrategy {
        if ModelProfile::lookup(&self.model).streaming {
            CopyStrategy::Streaming
        } else {
            CopyStrategy::PerCopy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap() -> Bitmap {
        Bitmap::from_packed(8, 1, vec![0xff]).unwrap()
    }

    #[test]
    fn validates_density_and_quantity() {
        assert!(PrintJob::new(bitmap(), 0, 1, "d110").is_err());
        assert!(PrintJob::new(bitmap(), 6, 1, "d110").is_err());
        assert!(PrintJob::new(bitmap(), 3, 0, "d110").is_err());
        assert!(PrintJob::new(bitmap(), 5, 1, "d110").is_ok());
    }

    #[test]
    fn accessors_expose_validated_values() {
        let job = PrintJob::new(bitmap(), 4, 3, "D110").unwrap();
        assert_eq!(job.density(), 4);
        assert_eq!(job.quantity(), 3);
        assert_eq!(job.model(), "D110");
        assert_eq!(job.bitmap().width(), 8);
    }

    #[test]
    fn strategy_follows_model() {
        let d110 = PrintJob::new(bitmap(), 3, 2, "d110").unwrap();
        assert_eq!(d110.strategy(), CopyStrategy::PerCopy);
        let b1 = PrintJob::new(bitmap(), 3, 2, "B1").unwrap();
        assert_eq!(b1.strategy(), CopyStrategy::Streaming);
    }
}
