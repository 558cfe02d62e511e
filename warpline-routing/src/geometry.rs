//! Horizontal-plane beam geometry.
//!
//! A send travels in a straight line from source to partner. Only X and Z
//! matter; height never affects interception.

use warpline_core::{CoordinateKey, Position};

/// Distance from `point` to the segment `a`–`b` in the horizontal plane.
///
/// The projection parameter is clamped to `[0, 1]`, so points beyond either
/// end measure to that endpoint. A degenerate segment (same X/Z at both ends)
/// measures to `a`.
pub fn distance_to_segment(point: Position, a: Position, b: Position) -> f64 {
    let (px, pz) = point.horizontal();
    let (ax, az) = a.horizontal();
    let (bx, bz) = b.horizontal();

    let (dx, dz) = (bx - ax, bz - az);
    let length_sq = dx * dx + dz * dz;
    if length_sq == 0.0 {
        return (px - ax).hypot(pz - az);
    }

    let t = (((px - ax) * dx + (pz - az) * dz) / length_sq).clamp(0.0, 1.0);
    let (cx, cz) = (ax + t * dx, az + t * dz);
    (px - cx).hypot(pz - cz)
}

/// Whether an interceptor at `interceptor` lies within `radius` of the beam
/// `from`–`to`. The boundary counts as inside.
pub fn catches_beam(interceptor: Position, from: Position, to: Position, radius: f64) -> bool {
    distance_to_segment(interceptor, from, to) <= radius
}

/// Interceptors that lie on the beam, nearest to `source` first.
///
/// Ties in horizontal distance are broken by coordinate key so the order is
/// identical on every evaluation.
pub fn beam_candidates<'a, I>(
    source: Position,
    destination: Position,
    radius: f64,
    interceptors: I,
) -> Vec<CoordinateKey>
where
    I: IntoIterator<Item = &'a CoordinateKey>,
{
    let mut candidates: Vec<(f64, CoordinateKey)> = interceptors
        .into_iter()
        .filter_map(|key| {
            let position = key.position();
            catches_beam(position, source, destination, radius)
                .then(|| (source.horizontal_distance(&position), key.clone()))
        })
        .collect();

    candidates.sort_by(|(da, ka), (db, kb)| da.total_cmp(db).then_with(|| ka.cmp(kb)));
    candidates.into_iter().map(|(_, key)| key).collect()
}
