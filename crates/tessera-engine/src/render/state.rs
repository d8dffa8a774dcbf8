use crate::device::{Backend, PixelRect, StencilState};
use crate::paint::BlendMode;

/// Mirrors fixed-function state so redundant changes never reach the
/// backend.
///
/// `None` means "unknown": the next set always goes through. Everything
/// becomes unknown again after [`StateSystem::reset`].
#[derive(Debug, Default)]
pub struct StateSystem {
    blend: Option<BlendMode>,
    color_write: Option<bool>,
    stencil: Option<StencilState>,
    scissor: Option<Option<PixelRect>>,
}

impl StateSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the backend state changed.
    pub fn set_blend_mode(&mut self, backend: &mut dyn Backend, mode: BlendMode) -> bool {
        if self.blend == Some(mode) {
            return false;
        }
        let factors = match mode {
            BlendMode::None => None,
            m => Some(m.factors()),
        };
        backend.set_blend(factors);
        self.blend = Some(mode);
        true
    }

    pub fn blend_mode(&self) -> Option<BlendMode> {
        self.blend
    }

    pub fn set_color_write(&mut self, backend: &mut dyn Backend, enabled: bool) {
        if self.color_write != Some(enabled) {
            backend.set_color_write(enabled);
            self.color_write = Some(enabled);
        }
    }

    pub fn set_stencil(&mut self, backend: &mut dyn Backend, state: StencilState) {
        if self.stencil != Some(state) {
            backend.set_stencil(state);
            self.stencil = Some(state);
        }
    }

    pub fn set_scissor(&mut self, backend: &mut dyn Backend, rect: Option<PixelRect>) {
        if self.scissor != Some(rect) {
            backend.set_scissor(rect);
            self.scissor = Some(rect);
        }
    }

    /// Forces every piece of state back to the frame defaults.
    pub fn apply_defaults(&mut self, backend: &mut dyn Backend) {
        self.set_blend_mode(backend, BlendMode::Normal);
        self.set_color_write(backend, true);
        self.set_stencil(backend, StencilState::DISABLED);
        self.set_scissor(backend, None);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareBackend;

    #[test]
    fn repeated_blend_mode_is_coalesced() {
        let mut backend = SoftwareBackend::new(2, 2);
        let mut state = StateSystem::new();
        assert!(state.set_blend_mode(&mut backend, BlendMode::Add));
        assert!(!state.set_blend_mode(&mut backend, BlendMode::Add));
        assert!(state.set_blend_mode(&mut backend, BlendMode::Normal));
        assert_eq!(backend.stats().blend_changes, 2);
    }

    #[test]
    fn reset_forgets_known_state() {
        let mut backend = SoftwareBackend::new(2, 2);
        let mut state = StateSystem::new();
        state.set_scissor(&mut backend, Some(PixelRect::new(0, 0, 1, 1)));
        state.reset();
        state.set_scissor(&mut backend, Some(PixelRect::new(0, 0, 1, 1)));
        assert_eq!(backend.stats().scissor_changes, 2);
    }
}
