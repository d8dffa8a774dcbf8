use crate::device::{PixelRect, StencilFunc, StencilOp, StencilState};

use super::context::RenderContext;
use super::error::RenderError;

/// How a pushed mask clips.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MaskKind {
    /// Axis-aligned rectangle clipped by the scissor test.
    Scissor,
    /// Arbitrary shape written into the stencil buffer.
    Stencil,
    /// Mask source was unavailable; nothing is clipped.
    Skipped,
}

#[derive(Debug, Copy, Clone)]
enum MaskEntry {
    Scissor { previous: Option<PixelRect> },
    Stencil,
    Skipped,
}

/// Stack of active masks.
///
/// Scissor masks nest by intersection. Stencil masks nest by level: the
/// mask at depth `n` increments the stencil where it equals `n - 1`, and
/// content is then drawn where it equals `n`. Popping redraws the mask
/// with a decrement, so a balanced push/pop sequence leaves the stencil
/// buffer as it found it.
#[derive(Debug, Default)]
pub struct MaskSystem {
    stack: Vec<MaskEntry>,
    scissor: Option<PixelRect>,
    stencil_level: u32,
}

impl MaskSystem {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn stencil_level(&self) -> u32 {
        self.stencil_level
    }

    #[inline]
    pub fn scissor(&self) -> Option<PixelRect> {
        self.scissor
    }

    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty() && self.stencil_level == 0 && self.scissor.is_none()
    }

    /// Highest stencil level `stencil_bits` can hold.
    pub fn max_stencil_level(stencil_bits: u32) -> u32 {
        (1u32 << stencil_bits.min(8)) - 1
    }

    pub fn push_scissor(&mut self, ctx: &mut RenderContext, rect: PixelRect) {
        let clipped = match self.scissor {
            Some(current) => current.intersect(rect),
            None => rect,
        };
        self.stack.push(MaskEntry::Scissor { previous: self.scissor });
        self.scissor = Some(clipped);
        ctx.state.set_scissor(ctx.backend.as_mut(), Some(clipped));
    }

    /// Keeps the stack balanced for a mask that cannot be applied.
    pub fn push_skipped(&mut self) {
        self.stack.push(MaskEntry::Skipped);
    }

    /// Prepares writing the next stencil level. The caller draws the mask
    /// shape, then calls [`MaskSystem::end_stencil_push`].
    pub fn begin_stencil_push(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        let max = Self::max_stencil_level(ctx.stencil_bits());
        let depth = self.stencil_level + 1;
        if depth > max {
            log::error!("mask: stencil depth {depth} exceeds {max}");
            return Err(RenderError::MaskOverflow { depth, max });
        }
        if self.stencil_level == 0 {
            ctx.backend.clear(None, Some(0))?;
        }
        let backend = ctx.backend.as_mut();
        ctx.state.set_color_write(backend, false);
        ctx.state.set_stencil(backend, stencil(StencilFunc::Equal, self.stencil_level, StencilOp::IncrementClamp));
        Ok(())
    }

    pub fn end_stencil_push(&mut self, ctx: &mut RenderContext) {
        self.stencil_level += 1;
        self.stack.push(MaskEntry::Stencil);
        self.apply_stencil(ctx);
    }

    /// Pops the innermost mask.
    ///
    /// For [`MaskKind::Stencil`] the decrement state is set up and the caller
    /// must redraw the same mask shape, then call
    /// [`MaskSystem::end_stencil_pop`].
    pub fn begin_pop(&mut self, ctx: &mut RenderContext) -> Result<MaskKind, RenderError> {
        match self.stack.pop() {
            None => Err(RenderError::MaskUnderflow),
            Some(MaskEntry::Skipped) => Ok(MaskKind::Skipped),
            Some(MaskEntry::Scissor { previous }) => {
                self.scissor = previous;
                ctx.state.set_scissor(ctx.backend.as_mut(), previous);
                Ok(MaskKind::Scissor)
            }
            Some(MaskEntry::Stencil) => {
                let backend = ctx.backend.as_mut();
                ctx.state.set_color_write(backend, false);
                ctx.state.set_stencil(backend, stencil(StencilFunc::Equal, self.stencil_level, StencilOp::DecrementClamp));
                Ok(MaskKind::Stencil)
            }
        }
    }

    pub fn end_stencil_pop(&mut self, ctx: &mut RenderContext) {
        self.stencil_level = self.stencil_level.saturating_sub(1);
        self.apply_stencil(ctx);
    }

    /// Drops every mask without touching the backend (frame aborted).
    pub fn reset(&mut self) {
        if !self.is_balanced() {
            log::debug!("mask: discarding {} unbalanced masks", self.stack.len());
        }
        *self = Self::default();
    }

    fn apply_stencil(&self, ctx: &mut RenderContext) {
        let backend = ctx.backend.as_mut();
        ctx.state.set_color_write(backend, true);
        let state = match self.stencil_level {
            0 => StencilState::DISABLED,
            level => stencil(StencilFunc::Equal, level, StencilOp::Keep),
        };
        ctx.state.set_stencil(backend, state);
    }
}

fn stencil(func: StencilFunc, level: u32, pass_op: StencilOp) -> StencilState {
    StencilState { enabled: true, func, reference: level.min(u8::MAX as u32) as u8, pass_op }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareBackend;
    use crate::render::RendererOptions;

    fn context(stencil_bits: u32) -> RenderContext {
        let backend = SoftwareBackend::new(8, 8).with_stencil_bits(stencil_bits);
        RenderContext::new(Box::new(backend), RendererOptions::sized(8.0, 8.0))
    }

    #[test]
    fn nested_scissors_intersect_and_restore() {
        let mut ctx = context(8);
        let mut masks = MaskSystem::new();
        masks.push_scissor(&mut ctx, PixelRect::new(0, 0, 6, 6));
        masks.push_scissor(&mut ctx, PixelRect::new(2, 2, 6, 6));
        assert_eq!(masks.scissor(), Some(PixelRect::new(2, 2, 4, 4)));

        assert_eq!(masks.begin_pop(&mut ctx).unwrap(), MaskKind::Scissor);
        assert_eq!(masks.scissor(), Some(PixelRect::new(0, 0, 6, 6)));
        assert_eq!(masks.begin_pop(&mut ctx).unwrap(), MaskKind::Scissor);
        assert!(masks.is_balanced());
    }

    #[test]
    fn stencil_levels_count_up_and_down() {
        let mut ctx = context(8);
        let mut masks = MaskSystem::new();
        for _ in 0..3 {
            masks.begin_stencil_push(&mut ctx).unwrap();
            masks.end_stencil_push(&mut ctx);
        }
        assert_eq!(masks.stencil_level(), 3);
        for _ in 0..3 {
            assert_eq!(masks.begin_pop(&mut ctx).unwrap(), MaskKind::Stencil);
            masks.end_stencil_pop(&mut ctx);
        }
        assert!(masks.is_balanced());
    }

    #[test]
    fn overflow_is_reported() {
        let mut ctx = context(2);
        let mut masks = MaskSystem::new();
        for _ in 0..3 {
            masks.begin_stencil_push(&mut ctx).unwrap();
            masks.end_stencil_push(&mut ctx);
        }
        let err = masks.begin_stencil_push(&mut ctx).unwrap_err();
        assert!(matches!(err, RenderError::MaskOverflow { depth: 4, max: 3 }));
    }

    #[test]
    fn pop_without_push_underflows() {
        let mut ctx = context(8);
        let mut masks = MaskSystem::new();
        assert!(matches!(masks.begin_pop(&mut ctx), Err(RenderError::MaskUnderflow)));
    }

    #[test]
    fn skipped_masks_keep_the_stack_balanced() {
        let mut ctx = context(8);
        let mut masks = MaskSystem::new();
        masks.push_skipped();
        assert_eq!(masks.depth(), 1);
        assert_eq!(masks.begin_pop(&mut ctx).unwrap(), MaskKind::Skipped);
        assert!(masks.is_balanced());
    }
}
