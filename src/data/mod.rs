//! Data shaping for discriminator consumption
//!
//! This module provides:
//! - 2D profile extraction from volumetric tensors
//! - Overpass-mask based path slicing with fixed-length padding

mod profiles;

pub use profiles::{
    avg_profiles, padded_profiles, profiles_2d, CropMode, MAX_PROFILE_LENGTH, PROFILE_PAD_VALUE,
};
