//! Deduplication of pipeline configurations into captured state objects.
//!
//! Each unique [`StateFingerprint`] is realized at most once: on a miss the
//! described state is applied to the live context and captured into a
//! driver state object, and the pair is appended to the cache. The cache
//! is a plain list: the number of distinct configurations in a scene is
//! tiny compared to its object count, and a linear scan keeps equality
//! explicit.

use crate::driver::{Driver, ProgramHandle, StateHandle, StippleParams};
use crate::mesh::{AttribMask, TopologyClass};

/// Everything that distinguishes one captured pipeline state from another.
///
/// Equality is field-wise. Stipple state is a single `Option`, so two
/// solid-line fingerprints cannot differ in dormant stipple parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateFingerprint {
    pub topology: TopologyClass,
    pub program: ProgramHandle,
    pub stipple: Option<StippleParams>,
    pub attrib_mask: AttribMask,
}

impl StateFingerprint {
    pub fn new(topology: TopologyClass, program: ProgramHandle, attrib_mask: AttribMask) -> Self {
        Self {
            topology,
            program,
            stipple: None,
            attrib_mask,
        }
    }

    pub fn with_stipple(mut self, stipple: Option<StippleParams>) -> Self {
        self.stipple = stipple;
        self
    }
}

struct RealizedState {
    fingerprint: StateFingerprint,
    handle: StateHandle,
}

/// The at-most-one-state-object-per-fingerprint cache.
#[derive(Default)]
pub struct StateCache {
    realized: Vec<RealizedState>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct realized states.
    pub fn len(&self) -> usize {
        self.realized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realized.is_empty()
    }

    /// Returns the captured state for `fingerprint`, realizing it first if
    /// this is the first time it is seen.
    ///
    /// Realization applies the described state to the live context before
    /// capturing, so callers must not assume program/stipple/attribute
    /// bindings survive a `resolve` call.
    pub fn resolve(&mut self, driver: &mut dyn Driver, fingerprint: StateFingerprint) -> StateHandle {
        if let Some(realized) = self
            .realized
            .iter()
            .find(|realized| realized.fingerprint == fingerprint)
        {
            return realized.handle;
        }

        driver.use_program(fingerprint.program);
        driver.set_line_stipple(fingerprint.stipple);
        driver.configure_vertex_attribs(fingerprint.attrib_mask);
        let handle = driver.capture_state(fingerprint.topology);

        self.realized.push(RealizedState {
            fingerprint,
            handle,
        });
        handle
    }

    /// Releases every realized state object in one batched driver call.
    pub fn finalize(&mut self, driver: &mut dyn Driver) {
        if self.realized.is_empty() {
            return;
        }
        let handles: Vec<StateHandle> = self
            .realized
            .iter()
            .map(|realized| realized.handle)
            .collect();
        driver.delete_states(&handles);
        self.realized.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDriver;

    fn fingerprint() -> StateFingerprint {
        StateFingerprint::new(
            TopologyClass::Lines,
            ProgramHandle(3),
            AttribMask::POSITION,
        )
        .with_stipple(Some(StippleParams {
            factor: 1,
            pattern: 0x00ff,
        }))
    }

    #[test]
    fn resolve_is_idempotent_for_equal_fingerprints() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();

        let first = cache.resolve(&mut driver, fingerprint());
        let second = cache.resolve(&mut driver, fingerprint());

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn one_field_difference_realizes_a_distinct_state() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();

        let first = cache.resolve(&mut driver, fingerprint());
        let second = cache.resolve(
            &mut driver,
            fingerprint().with_stipple(Some(StippleParams {
                factor: 1,
                pattern: 0x0f0f,
            })),
        );

        assert_ne!(first, second);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn capture_sees_the_applied_state() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();

        let handle = cache.resolve(&mut driver, fingerprint());
        let captured = driver.captured_state(handle).unwrap();

        assert_eq!(captured.program, ProgramHandle(3));
        assert_eq!(captured.topology, TopologyClass::Lines);
        assert_eq!(captured.stipple.unwrap().pattern, 0x00ff);
    }

    #[test]
    fn finalize_releases_all_handles_in_one_call() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();

        cache.resolve(&mut driver, fingerprint());
        cache.resolve(
            &mut driver,
            StateFingerprint::new(
                TopologyClass::Triangles,
                ProgramHandle(4),
                AttribMask::POSITION.union(AttribMask::UV),
            ),
        );
        cache.finalize(&mut driver);

        assert!(cache.is_empty());
        assert_eq!(driver.deleted_state_batches(), 1);
        assert_eq!(driver.live_state_count(), 0);
    }
}
