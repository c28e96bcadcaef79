use super::*;

/// Clamps a requested replay window to the sequence length: `start` into
/// `[0, len]`, `end` into `[start, len]`.
fn clamp_range(range: Range<usize>, len: usize) -> Range<usize> {
    let start = range.start.min(len);
    let end = range.end.clamp(start, len);
    start..end
}

impl TokenEngine {
    /// Replays the whole compiled sequence in one driver submission.
    pub fn replay(&mut self, driver: &mut dyn Driver) {
        self.replay_range(driver, 0..self.sequence.len());
    }

    /// Replays a contiguous sub-range of the compiled sequence, for
    /// isolating draws without recompiling. The range is clamped to the
    /// sequence; an empty clamped range submits nothing.
    ///
    /// Replaying `[0, k)` then `[k, n)` is equivalent in aggregate draw
    /// count and order to replaying `[0, n)`.
    pub fn replay_range(&mut self, driver: &mut dyn Driver, range: Range<usize>) {
        if !self.compiled {
            warn!("replay requested before compile, nothing to submit");
            return;
        }
        let range = clamp_range(range, self.sequence.len());
        if range.is_empty() {
            return;
        }

        // Stipple is applied per draw from within captured states, never
        // from the live context.
        driver.set_line_stipple(None);
        driver.draw_token_segments(self.stream_buffer.id(), self.sequence.segments(range));
    }

    /// Bakes the compiled stream into a native driver command list.
    /// Memoized until [`TokenEngine::invalidate`]. Returns `None` when
    /// nothing has been compiled yet.
    pub fn build_command_list(&mut self, driver: &mut dyn Driver) -> Option<CommandListHandle> {
        if !self.compiled || self.sequence.is_empty() {
            warn!("command list requested before compile, nothing to bake");
            return None;
        }
        if let Some(list) = self.native_list {
            return Some(list);
        }

        let list = driver.create_command_list();
        driver.list_token_segments(
            list,
            self.writer.bytes(),
            self.sequence.segments(0..self.sequence.len()),
        );
        driver.compile_command_list(list);
        self.native_list = Some(list);
        Some(list)
    }

    /// Replays via the baked command list, building it on first use.
    pub fn call_command_list(&mut self, driver: &mut dyn Driver) {
        let Some(list) = self.build_command_list(driver) else {
            return;
        };
        driver.set_line_stipple(None);
        driver.call_command_list(list);
    }
}
