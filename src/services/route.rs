// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route helpers: polyline decoding, route fingerprints and GPS track
//! similarity.

use crate::models::GpsTrack;
use geo::{Distance, Haversine, Point};
use sha2::{Digest, Sha256};

/// Coordinates are rounded to this many decimal places (~11 m) before
/// fingerprinting, so small sampling jitter maps to the same route.
const FINGERPRINT_DECIMALS: i32 = 4;

/// Decode an encoded polyline (precision 5) into a GPS track.
///
/// Returns `None` for empty or malformed input.
pub fn decode_polyline(encoded: &str) -> Option<GpsTrack> {
    if encoded.is_empty() {
        return None;
    }
    match polyline::decode_polyline(encoded, 5) {
        Ok(line) if line.0.is_empty() => None,
        Ok(line) => Some(GpsTrack::from_line_string(&line)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to decode polyline");
            None
        }
    }
}

/// Stable hash of a track's shape.
///
/// Points are rounded and consecutive repeats collapsed before hashing.
pub fn route_fingerprint(track: &GpsTrack) -> Option<String> {
    if track.is_empty() {
        return None;
    }
    let scale = 10f64.powi(FINGERPRINT_DECIMALS);
    let mut hasher = Sha256::new();
    let mut last: Option<(i64, i64)> = None;

    for [lon, lat] in &track.coordinates {
        let point = ((lon * scale).round() as i64, (lat * scale).round() as i64);
        if last == Some(point) {
            continue;
        }
        hasher.update(point.0.to_le_bytes());
        hasher.update(point.1.to_le_bytes());
        last = Some(point);
    }

    Some(hex::encode(&hasher.finalize()[..16]))
}

/// Great-circle distance between two `[lon, lat]` points in meters.
pub fn haversine_meters(a: [f64; 2], b: [f64; 2]) -> f64 {
    Haversine.distance(Point::new(a[0], a[1]), Point::new(b[0], b[1]))
}

/// Fraction of index-aligned point pairs within `tolerance_m` meters.
///
/// The denominator is the shorter track's length, so the measure is
/// symmetric in its arguments. Empty tracks have similarity 0.
pub fn gps_similarity(a: &GpsTrack, b: &GpsTrack, tolerance_m: f64) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let matches = a
        .coordinates
        .iter()
        .zip(&b.coordinates)
        .filter(|(p, q)| haversine_meters(**p, **q) <= tolerance_m)
        .count();
    matches as f64 / len as f64
}
