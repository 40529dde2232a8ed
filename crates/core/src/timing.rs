//! Human-mode timing engine.
//!
//! Pure, stateless helpers producing the randomized delays and Bezier mouse
//! paths used when the daemon runs in `human` or `stealth` mode. Every
//! function takes the RNG by parameter so a seeded RNG reproduces paths
//! bitwise; `fast` mode never calls into this module.

use std::time::Duration;

use rand::Rng;

/// A path point with the pause to take before moving on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
	pub x: f64,
	pub y: f64,
	pub delay_ms: u64,
}

/// Pre-navigation pause: uniform 800–2500ms.
pub fn navigation_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(800..=2500))
}

/// Pause before the final click: uniform 100–400ms.
pub fn pre_click_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(100..=400))
}

/// Pause before typing into a focused field: uniform 200–600ms.
pub fn pre_type_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(200..=600))
}

/// Inter-keystroke delay: clamp(30, 250, round(N(100, 40))) ms.
pub fn inter_key_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	let sample = gaussian(rng, 100.0, 40.0).round();
	Duration::from_millis(sample.clamp(30.0, 250.0) as u64)
}

/// Pause before a scroll gesture: uniform 500–1500ms.
pub fn pre_scroll_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(500..=1500))
}

/// Settle time after a page load: uniform 1000–3000ms.
pub fn post_load_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(1000..=3000))
}

/// Idle pause between unrelated actions: uniform 1000–4000ms.
pub fn idle_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
	Duration::from_millis(rng.random_range(1000..=4000))
}

/// Small offset from an element's center for the click point: ±3px each axis.
pub fn click_offset<R: Rng + ?Sized>(rng: &mut R) -> (f64, f64) {
	(rng.random_range(-3.0..=3.0), rng.random_range(-3.0..=3.0))
}

/// Cubic-Bezier mouse path from `(sx, sy)` to `(ex, ey)`.
///
/// Sampled at `clamp(10, 30, round(dist / 15))` points. Both control points
/// sit at 33% and 67% of the straight line, displaced perpendicular to it by
/// up to ±0.3·dist. Degenerate moves (dist < 5) skip the curve entirely.
pub fn human_mouse_path<R: Rng + ?Sized>(rng: &mut R, sx: f64, sy: f64, ex: f64, ey: f64) -> Vec<(f64, f64)> {
	let dx = ex - sx;
	let dy = ey - sy;
	let dist = (dx * dx + dy * dy).sqrt();
	if dist < 5.0 {
		return vec![(sx, sy), (ex, ey)];
	}

	let steps = ((dist / 15.0).round()).clamp(10.0, 30.0) as usize;

	// Unit perpendicular to the straight line.
	let (px, py) = (-dy / dist, dx / dist);
	let spread = 0.3 * dist;
	let o1 = rng.random_range(-spread..=spread);
	let o2 = rng.random_range(-spread..=spread);
	let c1 = (sx + dx * 0.33 + px * o1, sy + dy * 0.33 + py * o1);
	let c2 = (sx + dx * 0.67 + px * o2, sy + dy * 0.67 + py * o2);

	(0..=steps)
		.map(|i| {
			let t = i as f64 / steps as f64;
			cubic_bezier(t, (sx, sy), c1, c2, (ex, ey))
		})
		.collect()
}

/// Drag path: a mouse path with per-point delays, small vertical wobble on
/// interior points, an overshoot 5–15px past the target in the drag
/// direction, and a corrective point back on the target.
pub fn human_drag_path<R: Rng + ?Sized>(rng: &mut R, sx: f64, sy: f64, ex: f64, ey: f64) -> Vec<PathPoint> {
	let base = human_mouse_path(rng, sx, sy, ex, ey);
	let last = base.len().saturating_sub(1);

	let mut points: Vec<PathPoint> = base
		.iter()
		.enumerate()
		.map(|(i, &(x, y))| {
			let wobble = if i == 0 || i == last { 0.0 } else { rng.random_range(-2.0..=2.0) };
			PathPoint {
				x,
				y: y + wobble,
				delay_ms: rng.random_range(10..=30),
			}
		})
		.collect();

	let dx = ex - sx;
	let dy = ey - sy;
	let dist = (dx * dx + dy * dy).sqrt();
	if dist > 0.0 {
		let over = rng.random_range(5.0..=15.0);
		points.push(PathPoint {
			x: ex + dx / dist * over,
			y: ey + dy / dist * over,
			delay_ms: rng.random_range(30..=60),
		});
	}
	points.push(PathPoint {
		x: ex,
		y: ey,
		delay_ms: rng.random_range(50..=120),
	});
	points
}

fn cubic_bezier(t: f64, p0: (f64, f64), p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)) -> (f64, f64) {
	let u = 1.0 - t;
	let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
	(
		a * p0.0 + b * p1.0 + c * p2.0 + d * p3.0,
		a * p0.1 + b * p1.1 + c * p2.1 + d * p3.1,
	)
}

/// Box-Muller normal sample.
fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
	let u1: f64 = rng.random_range(f64::EPSILON..1.0);
	let u2: f64 = rng.random_range(0.0..1.0);
	let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
	mean + std_dev * z
}

#[cfg(test)]
mod tests {
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use super::*;

	#[test]
	fn delays_stay_in_bounds() {
		let mut rng = StdRng::seed_from_u64(7);
		for _ in 0..200 {
			let nav = navigation_delay(&mut rng).as_millis();
			assert!((800..=2500).contains(&nav));
			let key = inter_key_delay(&mut rng).as_millis();
			assert!((30..=250).contains(&key), "inter-key {key} out of range");
			let (ox, oy) = click_offset(&mut rng);
			assert!(ox.abs() <= 3.0 && oy.abs() <= 3.0);
		}
	}

	#[test]
	fn mouse_path_endpoints_are_exact() {
		let mut rng = StdRng::seed_from_u64(42);
		let path = human_mouse_path(&mut rng, 10.0, 20.0, 400.0, 300.0);
		let first = path.first().unwrap();
		let last = path.last().unwrap();
		assert!((first.0 - 10.0).abs() < 1e-9 && (first.1 - 20.0).abs() < 1e-9);
		assert!((last.0 - 400.0).abs() < 1e-9 && (last.1 - 300.0).abs() < 1e-9);
		assert!(path.len() >= 11 && path.len() <= 31, "sample count {}", path.len());
	}

	#[test]
	fn short_moves_skip_the_curve() {
		let mut rng = StdRng::seed_from_u64(1);
		let path = human_mouse_path(&mut rng, 5.0, 5.0, 7.0, 6.0);
		assert_eq!(path, vec![(5.0, 5.0), (7.0, 6.0)]);
	}

	#[test]
	fn seeded_paths_are_bitwise_reproducible() {
		let mut a = StdRng::seed_from_u64(99);
		let mut b = StdRng::seed_from_u64(99);
		let pa = human_mouse_path(&mut a, 0.0, 0.0, 640.0, 480.0);
		let pb = human_mouse_path(&mut b, 0.0, 0.0, 640.0, 480.0);
		assert_eq!(pa, pb);

		let mut a = StdRng::seed_from_u64(99);
		let mut b = StdRng::seed_from_u64(99);
		let da = human_drag_path(&mut a, 0.0, 0.0, 200.0, 0.0);
		let db = human_drag_path(&mut b, 0.0, 0.0, 200.0, 0.0);
		assert_eq!(da, db);
	}

	#[test]
	fn drag_path_overshoots_then_corrects() {
		let mut rng = StdRng::seed_from_u64(3);
		let path = human_drag_path(&mut rng, 0.0, 100.0, 300.0, 100.0);
		let n = path.len();
		let overshoot = path[n - 2];
		let final_point = path[n - 1];
		assert!(overshoot.x > 300.0 && overshoot.x <= 315.0, "overshoot x {}", overshoot.x);
		assert!((30..=60).contains(&overshoot.delay_ms));
		assert_eq!((final_point.x, final_point.y), (300.0, 100.0));
		assert!((50..=120).contains(&final_point.delay_ms));
		for p in &path[1..n - 2] {
			assert!((p.y - 100.0).abs() <= 2.0, "wobble exceeded: {}", p.y);
			assert!((10..=30).contains(&p.delay_ms));
		}
	}

	#[test]
	fn gaussian_centers_near_mean() {
		let mut rng = StdRng::seed_from_u64(11);
		let mean: f64 = (0..2000).map(|_| gaussian(&mut rng, 100.0, 40.0)).sum::<f64>() / 2000.0;
		assert!((mean - 100.0).abs() < 5.0, "sample mean {mean}");
	}
}
