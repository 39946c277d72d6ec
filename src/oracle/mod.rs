//! Visibility estimation: the estimate contract plus client implementations.

use std::path::Path;

pub mod openai;

pub use openai::VisibilityOracle;

/// One visibility estimate for a snapshot.
///
/// `visibility_ft` is NaN when the image could not be measured at all; the
/// description then says why. A low numeric estimate and the NaN sentinel are
/// deliberately distinct outcomes.
#[derive(Clone, Debug)]
pub struct Estimate {
    /// Estimated visibility distance in feet, or NaN when unmeasurable.
    pub visibility_ft: f64,
    /// Free-text description of the observed conditions (or the failure).
    pub conditions: String,
}

impl Estimate {
    /// Builds the "could not measure" sentinel with an explanatory description.
    pub fn unusable(conditions: impl Into<String>) -> Self {
        Self {
            visibility_ft: f64::NAN,
            conditions: conditions.into(),
        }
    }

    /// Whether this estimate carries the sentinel rather than a measurement.
    pub fn is_unusable(&self) -> bool {
        self.visibility_ft.is_nan()
    }
}

/// Converts an on-disk snapshot into a visibility estimate.
///
/// Implementations degrade to the sentinel instead of failing; callers never
/// see an error from this seam.
pub trait Estimator: Send + Sync {
    /// Estimates visibility for the image at `image`.
    fn estimate(&self, image: &Path) -> Estimate;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trip() {
        let estimate = Estimate::unusable("camera offline");
        assert!(estimate.is_unusable());
        assert_eq!(estimate.conditions, "camera offline");

        let measured = Estimate {
            visibility_ft: 12.5,
            conditions: "hazy".into(),
        };
        assert!(!measured.is_unusable());
    }
}
