use std::collections::VecDeque;
use std::f64::consts::PI;

use api_types::{GeoPosition, GeoSample};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::geodesy::{haversine_km, km_to_degrees};

/// Step radius used when none is configured (100 meters).
pub const DEFAULT_MAX_STEP_KM: f64 = 0.1;

/// Supplies the `(u, v)` pair, both in `[0, 1)`, behind each step.
///
/// `u` picks the distance from the center of the step disc and `v` the
/// direction.
pub trait StepSource: Send {
    fn next_step(&mut self) -> (f64, f64);
}

/// Steps drawn from a random number generator.
pub struct RandomSteps<R>(pub R);

impl RandomSteps<StdRng> {
    pub fn from_os_rng() -> Self {
        Self(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> StepSource for RandomSteps<R> {
    fn next_step(&mut self) -> (f64, f64) {
        let u = self.0.random::<f64>();
        let v = self.0.random::<f64>();
        (u, v)
    }
}

/// Replays a fixed list of steps, cycling once it runs out.
#[derive(Clone, Debug)]
pub struct ScriptedSteps {
    steps: VecDeque<(f64, f64)>,
}

impl ScriptedSteps {
    pub fn new(steps: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }
}

impl StepSource for ScriptedSteps {
    fn next_step(&mut self) -> (f64, f64) {
        // An empty script stands still.
        let Some(step) = self.steps.pop_front() else {
            return (0.0, 0.0);
        };
        self.steps.push_back(step);
        step
    }
}

/// A random walk over geographic coordinates.
///
/// The walker keeps the settled position and the candidate it will move to
/// on the next [`advance`](Self::advance). A sample pairs the settled
/// position with the distance to that candidate, so the distance reported
/// with sample `n` is the leg between the coordinates of samples `n` and
/// `n + 1`.
pub struct PositionWalker<S = RandomSteps<StdRng>> {
    curr: GeoPosition,
    next: GeoPosition,
    steps: S,
}

impl PositionWalker {
    pub fn new(origin: GeoPosition) -> Self {
        Self::with_steps(origin, RandomSteps::from_os_rng())
    }
}

impl<S: StepSource> PositionWalker<S> {
    pub fn with_steps(origin: GeoPosition, steps: S) -> Self {
        Self {
            curr: origin,
            next: origin,
            steps,
        }
    }

    pub fn current(&self) -> GeoPosition {
        self.curr
    }

    pub fn candidate(&self) -> GeoPosition {
        self.next
    }

    /// Great-circle distance in kilometers from the settled position to the
    /// pending candidate.
    pub fn distance(&self) -> f64 {
        haversine_km(self.curr, self.next)
    }

    /// Settles on the pending candidate and draws a new one uniformly from
    /// the disc of radius `max_step_km` around it.
    pub fn advance(&mut self, max_step_km: f64) {
        let step_deg = km_to_degrees(max_step_km.max(0.0));
        let (u, v) = self.steps.next_step();

        let w = step_deg * u.sqrt();
        let t = 2.0 * PI * v;

        let base = self.next;
        self.curr = base;
        self.next = GeoPosition {
            latitude: base.latitude + w * t.sin(),
            longitude: base.longitude + w * t.cos(),
        };
    }

    pub fn sample(&self) -> GeoSample {
        GeoSample {
            coords: self.curr,
            distance: self.distance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    const MOSCOW: GeoPosition = GeoPosition::new(55.75, 37.62);

    // The 111 km/degree approximation is 0.18% short of a haversine degree,
    // so a full-radius step can overshoot the radius by that much.
    const STEP_TOLERANCE: f64 = 1.0 + 0.005;

    #[test]
    fn test_new_walker_is_at_rest() {
        let walker = PositionWalker::with_steps(MOSCOW, ScriptedSteps::new([]));

        assert_eq!(walker.current(), MOSCOW);
        assert_eq!(walker.candidate(), MOSCOW);
        assert_eq!(walker.distance(), 0.0);
        assert_eq!(
            walker.sample(),
            GeoSample {
                coords: MOSCOW,
                distance: 0.0
            }
        );
    }

    #[test]
    fn test_step_offsets_stay_inside_disc() {
        let mut walker = PositionWalker::with_steps(MOSCOW, RandomSteps::seeded(7));
        let step_deg = km_to_degrees(DEFAULT_MAX_STEP_KM);

        for _ in 0..1_000 {
            let base = walker.candidate();
            walker.advance(DEFAULT_MAX_STEP_KM);
            let next = walker.candidate();

            let dlat = next.latitude - base.latitude;
            let dlon = next.longitude - base.longitude;
            let offset = (dlat * dlat + dlon * dlon).sqrt();

            assert!(offset >= 0.0);
            assert!(offset <= step_deg * (1.0 + 1e-9), "offset {offset} > {step_deg}");
        }
    }

    #[test]
    fn test_successive_positions_respect_step_bound() {
        for max_step in [0.0, 0.05, DEFAULT_MAX_STEP_KM, 1.5] {
            let mut walker = PositionWalker::with_steps(MOSCOW, RandomSteps::seeded(42));
            let mut previous = walker.current();

            for _ in 0..500 {
                walker.advance(max_step);
                let current = walker.current();
                let leg = haversine_km(previous, current);

                assert!(leg <= max_step * STEP_TOLERANCE, "leg {leg} > {max_step}");
                assert!(walker.distance() <= max_step * STEP_TOLERANCE);
                previous = current;
            }
        }
    }

    #[test]
    fn test_zero_step_never_moves() {
        let mut walker = PositionWalker::with_steps(MOSCOW, RandomSteps::seeded(3));

        for _ in 0..10 {
            walker.advance(0.0);
            assert_eq!(walker.sample().coords, MOSCOW);
            assert_eq!(walker.sample().distance, 0.0);
        }
    }

    #[test]
    fn test_sample_distance_is_the_upcoming_leg() {
        let mut walker = PositionWalker::with_steps(MOSCOW, RandomSteps::seeded(11));

        let samples: Vec<GeoSample> = (0..50)
            .map(|_| {
                walker.advance(DEFAULT_MAX_STEP_KM);
                walker.sample()
            })
            .collect();

        // The first tick settles on the origin itself.
        assert_eq!(samples[0].coords, MOSCOW);

        for pair in samples.windows(2) {
            let leg = haversine_km(pair[0].coords, pair[1].coords);
            assert_abs_diff_eq!(leg, pair[0].distance, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_scripted_walk_matches_hand_computed_path() {
        let mut walker = PositionWalker::with_steps(
            MOSCOW,
            ScriptedSteps::new([(0.25, 0.5), (0.81, 0.1), (0.09, 0.9)]),
        );

        // u = 0.25, v = 0.5: half the radius, due west.
        walker.advance(DEFAULT_MAX_STEP_KM);
        let first = walker.sample();
        assert_eq!(first.coords, MOSCOW);
        assert_relative_eq!(walker.candidate().latitude, 55.75, epsilon = 1e-12);
        assert_relative_eq!(
            walker.candidate().longitude,
            37.62 - 0.05 / 111.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(first.distance, 0.028_189_663_355_953, epsilon = 1e-9);

        walker.advance(DEFAULT_MAX_STEP_KM);
        let second = walker.sample();
        assert_relative_eq!(second.coords.longitude, 37.619_549_549_549_55, epsilon = 1e-12);
        assert_relative_eq!(second.distance, 0.067_033_229_760_697, epsilon = 1e-9);

        walker.advance(DEFAULT_MAX_STEP_KM);
        let third = walker.sample();
        assert_relative_eq!(third.coords.latitude, 55.750_476_582_636_99, epsilon = 1e-12);
        assert_relative_eq!(third.coords.longitude, 37.620_205_509_274_72, epsilon = 1e-12);
        assert_relative_eq!(third.distance, 0.022_344_375_796_921, epsilon = 1e-9);
    }

    #[test]
    fn test_scripted_steps_cycle() {
        let mut steps = ScriptedSteps::new([(0.1, 0.2), (0.3, 0.4)]);

        assert_eq!(steps.next_step(), (0.1, 0.2));
        assert_eq!(steps.next_step(), (0.3, 0.4));
        assert_eq!(steps.next_step(), (0.1, 0.2));
        assert_eq!(ScriptedSteps::new([]).next_step(), (0.0, 0.0));
    }
}
