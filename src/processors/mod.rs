//! Analysis stages: density filtering, hull volume and growth.

pub mod filtering;
pub mod growth;
pub mod hull;
pub mod volume;

pub use filtering::{filter_by_opacity, remove_statistical_outliers, FilteredPointSet};
pub use growth::{compare, GrowthError, GrowthReport};
pub use hull::{convex_hull, ConvexHull, HullError};
pub use volume::{bounding_box_volume, estimate, VolumeReport};
