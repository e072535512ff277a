//! Per-group construction pipeline.
//!
//! A group is the set of base points coarse-assigned to one centroid `μ`.
//! The pipeline fits the group's alpha, places the sub-centroids
//! `S_s = μ + α·(ν_s − μ)` along the neighbor-centroid directions
//! `ν_s − μ`, assigns every point to its nearest sub-centroid, and
//! compresses the per-point residual plus the reconstructed norm.

use super::lists::{CentroidLists, ListBuilder};
use crate::error::Result;
use crate::pq::ProductQuantizer;
use crate::reader::Group;
use crate::simd;

/// Everything `add` keeps from one processed group.
pub(crate) struct GroupBuild {
    /// Fitted alpha for the centroid (0 for an empty group).
    pub alpha: f32,
    /// Frozen inverted lists for the centroid.
    pub lists: CentroidLists,
    /// Sum of squared point-to-centroid distances.
    pub baseline_distortion: f64,
    /// Sum of squared point-to-assigned-sub-centroid distances.
    pub adapted_distortion: f64,
}

/// Computes the flat `nsubc * dimension` direction matrix `ν_s − μ`.
pub(crate) fn neighbor_directions(
    centroid: &[f32],
    neighbors: &[Vec<f32>],
    dimension: usize,
) -> Vec<f32> {
    let mut directions = vec![0.0f32; neighbors.len() * dimension];
    for (s, neighbor) in neighbors.iter().enumerate() {
        simd::sub_into(
            &mut directions[s * dimension..(s + 1) * dimension],
            neighbor,
            centroid,
        );
    }
    directions
}

/// Fits the group's alpha.
///
/// For each point `p`, `α_s = ⟨v_s, p − μ⟩ / ‖v_s‖²` is the least-squares
/// projection of `p − μ` onto direction `v_s`; the direction minimizing
/// the remaining error `‖(p − μ) − α_s·v_s‖²` contributes its `α_s`.
/// Per-point winners are averaged separately by sign and the mean of the
/// larger bucket is returned (ties go to the positive bucket), keeping two
/// opposite modes from cancelling each other.
///
/// Directions with zero squared norm (duplicate centroids) are skipped;
/// a point with no usable direction contributes to neither bucket. Empty
/// groups yield 0.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn fit_alpha(
    directions: &[f32],
    direction_norms: &[f32],
    points: &[f32],
    centroid: &[f32],
    dimension: usize,
) -> f32 {
    let nsubc = direction_norms.len();
    let mut positive_sum = 0.0f64;
    let mut negative_sum = 0.0f64;
    let mut positive_count = 0usize;
    let mut negative_count = 0usize;

    let mut offset = vec![0.0f32; dimension];
    let mut remainder = vec![0.0f32; dimension];

    for point in points.chunks_exact(dimension) {
        simd::sub_into(&mut offset, point, centroid);

        let mut best: Option<(f32, f32)> = None;
        for s in 0..nsubc {
            let norm = direction_norms[s];
            if norm <= 0.0 || !norm.is_finite() {
                continue;
            }
            let direction = &directions[s * dimension..(s + 1) * dimension];
            let alpha = simd::inner_product(direction, &offset) / norm;

            simd::scaled_add_into(&mut remainder, direction, &offset, -alpha);
            let dist = simd::squared_norm(&remainder);

            if best.is_none_or(|(best_dist, _)| dist < best_dist) {
                best = Some((dist, alpha));
            }
        }

        let Some((_, alpha)) = best else { continue };
        if alpha < 0.0 {
            negative_count += 1;
            negative_sum += f64::from(alpha);
        } else {
            positive_count += 1;
            positive_sum += f64::from(alpha);
        }
    }

    if positive_count >= negative_count {
        if positive_count == 0 {
            0.0
        } else {
            (positive_sum / positive_count as f64) as f32
        }
    } else {
        (negative_sum / negative_count as f64) as f32
    }
}

/// Materializes the `nsubc` sub-centroids `S_s = α·v_s + μ`.
pub(crate) fn materialize_subcentroids(
    directions: &[f32],
    centroid: &[f32],
    alpha: f32,
    dimension: usize,
) -> Vec<f32> {
    let nsubc = directions.len() / dimension;
    let mut subcentroids = vec![0.0f32; nsubc * dimension];
    for s in 0..nsubc {
        simd::scaled_add_into(
            &mut subcentroids[s * dimension..(s + 1) * dimension],
            &directions[s * dimension..(s + 1) * dimension],
            centroid,
            alpha,
        );
    }
    subcentroids
}

/// Assigns every point to its nearest sub-centroid, smallest index
/// winning ties.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn assign_subcentroids(
    points: &[f32],
    subcentroids: &[f32],
    dimension: usize,
) -> Vec<u32> {
    let nsubc = subcentroids.len() / dimension;
    points
        .chunks_exact(dimension)
        .map(|point| {
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for s in 0..nsubc {
                let dist =
                    simd::squared_l2(point, &subcentroids[s * dimension..(s + 1) * dimension]);
                if dist < best_dist {
                    best = s;
                    best_dist = dist;
                }
            }
            best as u32
        })
        .collect()
}

/// Computes per-point residuals `p − S(s(p))` as a flat row-major buffer.
pub(crate) fn compute_residuals(
    points: &[f32],
    subcentroids: &[f32],
    assignments: &[u32],
    dimension: usize,
) -> Vec<f32> {
    let mut residuals = vec![0.0f32; points.len()];
    for (i, (point, &s)) in points.chunks_exact(dimension).zip(assignments).enumerate() {
        let sub = &subcentroids[s as usize * dimension..(s as usize + 1) * dimension];
        simd::sub_into(&mut residuals[i * dimension..(i + 1) * dimension], point, sub);
    }
    residuals
}

/// Residual codes and norm codes for one group.
pub(crate) struct EncodedGroup {
    pub codes: Vec<u8>,
    pub norm_codes: Vec<u8>,
}

/// Encodes residuals and returns the codes together with the squared
/// norms of the reconstructions.
///
/// The reconstruction adds the decoded residual onto the *same*
/// sub-centroid the residual was taken against; the norms therefore match
/// what the search-time decomposition expects. The norm-quantizer trainer
/// uses this directly, before any norm codebook exists.
pub(crate) fn encode_residuals_with_norms(
    pq: &ProductQuantizer,
    points: &[f32],
    subcentroids: &[f32],
    assignments: &[u32],
    dimension: usize,
) -> Result<(Vec<u8>, Vec<f32>)> {
    let residuals = compute_residuals(points, subcentroids, assignments, dimension);
    let codes = pq.encode(&residuals)?;
    let decoded = pq.decode(&codes)?;

    let mut reconstructed = vec![0.0f32; points.len()];
    for (i, &s) in assignments.iter().enumerate() {
        let sub = &subcentroids[s as usize * dimension..(s as usize + 1) * dimension];
        simd::scaled_add_into(
            &mut reconstructed[i * dimension..(i + 1) * dimension],
            &decoded[i * dimension..(i + 1) * dimension],
            sub,
            1.0,
        );
    }

    Ok((codes, simd::batch_squared_norms(&reconstructed, dimension)))
}

/// Runs the full compression tail: residual codes plus norm codes.
pub(crate) fn encode_group(
    pq: &ProductQuantizer,
    norm_pq: &ProductQuantizer,
    points: &[f32],
    subcentroids: &[f32],
    assignments: &[u32],
    dimension: usize,
) -> Result<EncodedGroup> {
    let (codes, norms) =
        encode_residuals_with_norms(pq, points, subcentroids, assignments, dimension)?;
    let norm_codes = norm_pq.encode(&norms)?;
    Ok(EncodedGroup { codes, norm_codes })
}

/// Full pipeline for one group: alpha, assignment, compression, freeze.
pub(crate) fn build_group(
    pq: &ProductQuantizer,
    norm_pq: &ProductQuantizer,
    nsubc: usize,
    dimension: usize,
    centroid: &[f32],
    neighbors: &[Vec<f32>],
    neighbor_distances: &[f32],
    group: &Group,
) -> Result<GroupBuild> {
    if group.is_empty() {
        return Ok(GroupBuild {
            alpha: 0.0,
            lists: CentroidLists::empty(nsubc, pq.code_size()),
            baseline_distortion: 0.0,
            adapted_distortion: 0.0,
        });
    }

    let directions = neighbor_directions(centroid, neighbors, dimension);
    let alpha = fit_alpha(
        &directions,
        neighbor_distances,
        &group.vectors,
        centroid,
        dimension,
    );
    let subcentroids = materialize_subcentroids(&directions, centroid, alpha, dimension);
    let assignments = assign_subcentroids(&group.vectors, &subcentroids, dimension);
    let encoded = encode_group(
        pq,
        norm_pq,
        &group.vectors,
        &subcentroids,
        &assignments,
        dimension,
    )?;

    let code_size = pq.code_size();
    let mut builder = ListBuilder::new(nsubc, code_size);
    let mut baseline_distortion = 0.0f64;
    let mut adapted_distortion = 0.0f64;

    for (i, (point, &s)) in group
        .vectors
        .chunks_exact(dimension)
        .zip(&assignments)
        .enumerate()
    {
        builder.push(
            s as usize,
            group.ids[i],
            &encoded.codes[i * code_size..(i + 1) * code_size],
            encoded.norm_codes[i],
        );
        let sub = &subcentroids[s as usize * dimension..(s as usize + 1) * dimension];
        baseline_distortion += f64::from(simd::squared_l2(point, centroid));
        adapted_distortion += f64::from(simd::squared_l2(point, sub));
    }

    Ok(GroupBuild {
        alpha,
        lists: builder.freeze(),
        baseline_distortion,
        adapted_distortion,
    })
}
