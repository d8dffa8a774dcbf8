/// Source/destination weighting for one blend equation term.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Resolved blend function (additive equation) for color and alpha.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlendFactors {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendFactors {
    #[inline]
    pub const fn uniform(src: BlendFactor, dst: BlendFactor) -> Self {
        Self { src_rgb: src, dst_rgb: dst, src_alpha: src, dst_alpha: dst }
    }
}

/// Compositing mode of a renderable.
///
/// All factors assume premultiplied source colors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    /// Punches the source alpha out of the destination.
    Erase,
    /// Overwrites the destination.
    None,
}

impl BlendMode {
    pub const fn factors(self) -> BlendFactors {
        use BlendFactor::*;
        match self {
            BlendMode::Normal => BlendFactors::uniform(One, OneMinusSrcAlpha),
            BlendMode::Add => BlendFactors::uniform(One, One),
            BlendMode::Multiply => BlendFactors {
                src_rgb: DstColor,
                dst_rgb: OneMinusSrcAlpha,
                src_alpha: One,
                dst_alpha: OneMinusSrcAlpha,
            },
            BlendMode::Screen => BlendFactors {
                src_rgb: One,
                dst_rgb: OneMinusSrcColor,
                src_alpha: One,
                dst_alpha: OneMinusSrcAlpha,
            },
            BlendMode::Erase => BlendFactors::uniform(Zero, OneMinusSrcAlpha),
            BlendMode::None => BlendFactors::uniform(One, Zero),
        }
    }
}
