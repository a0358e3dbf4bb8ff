pub mod keypoint;
pub mod region;

pub use keypoint::{
    is_undetected, row_is_valid, undetected_matrix, KeypointIndex, KeypointMatrix, MAX_COORD_WIDTH,
    MIN_COORD_WIDTH,
};
pub use region::BodyRegion;

#[cfg(test)]
pub(crate) use keypoint::nose_at;
