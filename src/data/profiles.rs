//! 2D profile extraction from volumetric data
//!
//! Reduces a (batch, depth, height, width) volume to 2D profiles the
//! discriminator can consume, either by averaging out horizontal axes or by
//! slicing along a satellite overpass track and padding to a fixed length.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

/// Fixed path-axis length padded profiles are brought to.
pub const MAX_PROFILE_LENGTH: i64 = 96;

/// Sentinel value filling the padded tail of a profile.
pub const PROFILE_PAD_VALUE: f64 = -1.0;

/// How a volume is reduced to 2D profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Mean over width and mean over height, stacked as two channels.
    AvgDimensions,
    /// Masked overpass columns, right-padded to a fixed path length.
    Padding,
}

/// Reduce a volume to 2D profiles using the given mode.
///
/// `overpass_mask` is only consulted in [`CropMode::Padding`], where it is
/// mandatory; `max_length` and `pad_value` likewise only apply there.
pub fn profiles_2d(
    volume: &Tensor,
    mode: CropMode,
    overpass_mask: Option<&Tensor>,
    max_length: i64,
    pad_value: f64,
) -> Result<Tensor> {
    match mode {
        CropMode::AvgDimensions => Ok(avg_profiles(volume)),
        CropMode::Padding => {
            let mask = overpass_mask
                .context("padding crop mode requires an overpass mask")?;
            padded_profiles(volume, mask, max_length, pad_value)
        }
    }
}

/// Average a (batch, depth, height, width) volume over its width and height
/// axes, returning (batch, 2, depth, height) with the two means as channels.
pub fn avg_profiles(volume: &Tensor) -> Tensor {
    Tensor::stack(
        &[
            volume.mean_dim(-1, false, Kind::Float),
            volume.mean_dim(-2, false, Kind::Float),
        ],
        1,
    )
}

/// Extract the overpass path from each batch element and pad it to a fixed
/// length.
///
/// The mask selects, per depth level, the positions along the overpass track.
/// The selected elements must form a rectangular (depth, path_length) profile
/// and the path must fit within `max_length`; anything else is an error, never
/// a silent truncation.
///
/// Returns (batch, 1, depth, max_length).
pub fn padded_profiles(
    volume: &Tensor,
    overpass_mask: &Tensor,
    max_length: i64,
    pad_value: f64,
) -> Result<Tensor> {
    let size = volume.size();
    ensure!(
        size.len() == 4,
        "expected a (batch, depth, height, width) volume, got shape {:?}",
        size
    );
    ensure!(
        overpass_mask.size() == size,
        "overpass mask shape {:?} does not match volume shape {:?}",
        overpass_mask.size(),
        size
    );

    let (batch_size, depth) = (size[0], size[1]);
    let mut padded = Vec::with_capacity(batch_size as usize);

    for idx in 0..batch_size {
        let selected = volume
            .get(idx)
            .masked_select(&overpass_mask.get(idx).to_kind(Kind::Bool));
        let count = selected.size()[0];
        ensure!(
            count % depth == 0,
            "overpass mask selects {} elements for batch element {}, \
             not divisible into {} depth levels",
            count,
            idx,
            depth
        );
        let path_length = count / depth;
        ensure!(
            path_length <= max_length,
            "overpass path length {} exceeds the maximum profile length {}",
            path_length,
            max_length
        );

        let profile = selected
            .reshape([depth, path_length])
            .pad([0, max_length - path_length], "constant", pad_value);
        padded.push(profile.unsqueeze(0).unsqueeze(0));
    }

    Ok(Tensor::cat(&padded, 0))
}
