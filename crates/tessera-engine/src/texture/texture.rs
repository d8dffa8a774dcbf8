use crate::coords::Rect;
use crate::device::ScaleMode;

use super::{BaseTexture, BaseTextureOptions};

/// Normalized UVs of a frame's corners: top-left, top-right, bottom-right,
/// bottom-left, as `[u0, v0, u1, v1, u2, v2, u3, v3]`.
pub type TextureUvs = [f32; 8];

const FULL_UVS: TextureUvs = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

/// A rectangular view onto a [`BaseTexture`].
///
/// - `frame`: region of the base that is sampled, in logical units
/// - `orig`: untrimmed size of the logical image
/// - `trim`: where the frame sits inside `orig` when transparent borders
///   were cropped away
///
/// Cloning a view counts as a new reference to the base; dropping the last
/// view destroys the base.
#[derive(Debug)]
pub struct Texture {
    base: BaseTexture,
    frame: Option<Rect>,
    orig: Option<Rect>,
    trim: Option<Rect>,
    uvs: TextureUvs,
    update_id: u64,
}

thread_local! {
    static WHITE: Texture = Texture::from_base(BaseTexture::from_pixels(
        1,
        1,
        vec![255; 4],
        BaseTextureOptions { scale_mode: ScaleMode::Nearest, ..Default::default() },
    ));
    static EMPTY: Texture = Texture::from_base(BaseTexture::pending(BaseTextureOptions::default()));
}

impl Texture {
    /// View over the whole base; follows the base size if it changes.
    pub fn from_base(base: BaseTexture) -> Self {
        base.acquire_view();
        Self {
            base,
            frame: None,
            orig: None,
            trim: None,
            uvs: FULL_UVS,
            update_id: 1,
        }
    }

    /// View over `frame` of `base` (e.g. a spritesheet cell).
    pub fn from_frame(base: &BaseTexture, frame: Rect, orig: Option<Rect>, trim: Option<Rect>) -> Self {
        base.acquire_view();
        let mut t = Self {
            base: base.clone(),
            frame: Some(frame),
            orig,
            trim,
            uvs: FULL_UVS,
            update_id: 0,
        };
        t.update_uvs();
        t
    }

    /// Shared opaque white 1×1 texture used by untextured geometry.
    pub fn white() -> Texture {
        WHITE.with(Texture::clone)
    }

    /// Shared texture that is never drawable.
    pub fn empty() -> Texture {
        EMPTY.with(Texture::clone)
    }

    #[inline]
    pub fn base(&self) -> &BaseTexture {
        &self.base
    }

    pub fn frame(&self) -> Rect {
        self.frame
            .unwrap_or_else(|| Rect::from_size(self.base.width(), self.base.height()))
    }

    pub fn orig(&self) -> Rect {
        self.orig.unwrap_or_else(|| {
            let f = self.frame();
            Rect::from_size(f.width(), f.height())
        })
    }

    #[inline]
    pub fn trim(&self) -> Option<Rect> {
        self.trim
    }

    /// Logical width of the (untrimmed) image.
    #[inline]
    pub fn width(&self) -> f32 {
        self.orig().width()
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.orig().height()
    }

    #[inline]
    pub fn uvs(&self) -> &TextureUvs {
        &self.uvs
    }

    /// Changes whenever the frame or the base pixels change.
    #[inline]
    pub fn update_id(&self) -> u64 {
        self.update_id + self.base.dirty_id()
    }

    pub fn set_frame(&mut self, frame: Rect) {
        self.frame = Some(frame);
        self.update_uvs();
    }

    pub fn set_trim(&mut self, orig: Option<Rect>, trim: Option<Rect>) {
        self.orig = orig;
        self.trim = trim;
        self.update_id += 1;
    }

    /// Recomputes UVs from the frame and the base size.
    pub fn update_uvs(&mut self) {
        self.uvs = match self.frame {
            None => FULL_UVS,
            Some(f) => {
                let (bw, bh) = (self.base.width(), self.base.height());
                if bw <= 0.0 || bh <= 0.0 {
                    FULL_UVS
                } else {
                    let (u0, v0) = (f.x() / bw, f.y() / bh);
                    let (u1, v1) = ((f.x() + f.width()) / bw, (f.y() + f.height()) / bh);
                    [u0, v0, u1, v0, u1, v1, u0, v1]
                }
            }
        };
        self.update_id += 1;
    }

    /// Drawable now: the base is valid and the frame lies inside it.
    pub fn is_valid(&self) -> bool {
        if !self.base.is_valid() {
            return false;
        }
        let f = self.frame();
        let bounds = Rect::from_size(self.base.width(), self.base.height());
        !f.is_empty() && bounds.contains_rect(f)
    }

    /// Releases this view. Equivalent to dropping it.
    pub fn destroy(self) {}
}

impl Clone for Texture {
    fn clone(&self) -> Self {
        self.base.acquire_view();
        Self {
            base: self.base.clone(),
            frame: self.frame,
            orig: self.orig,
            trim: self.trim,
            uvs: self.uvs,
            update_id: self.update_id,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.base.release_view();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> BaseTexture {
        BaseTexture::from_pixels(64, 32, vec![0; 64 * 32 * 4], BaseTextureOptions::default())
    }

    #[test]
    fn frame_uvs_are_normalized() {
        let t = Texture::from_frame(&sheet(), Rect::new(16.0, 8.0, 16.0, 8.0), None, None);
        assert_eq!(t.uvs(), &[0.25, 0.25, 0.5, 0.25, 0.5, 0.5, 0.25, 0.5]);
    }

    #[test]
    fn set_frame_bumps_update_id() {
        let mut t = Texture::from_frame(&sheet(), Rect::new(0.0, 0.0, 8.0, 8.0), None, None);
        let id = t.update_id();
        t.set_frame(Rect::new(8.0, 0.0, 8.0, 8.0));
        assert!(t.update_id() > id);
    }

    // ── reference counting ────────────────────────────────────────────────

    #[test]
    fn base_survives_until_last_view_is_destroyed() {
        let base = sheet();
        let a = Texture::from_frame(&base, Rect::new(0.0, 0.0, 8.0, 8.0), None, None);
        let b = Texture::from_frame(&base, Rect::new(8.0, 0.0, 8.0, 8.0), None, None);
        assert_eq!(base.view_count(), 2);

        a.destroy();
        assert_eq!(base.view_count(), 1);
        assert!(!base.is_destroyed());
        assert!(b.is_valid());

        b.destroy();
        assert_eq!(base.view_count(), 0);
        assert!(base.is_destroyed());
        assert!(!base.is_valid());
    }

    #[test]
    fn clone_counts_as_a_view() {
        let base = sheet();
        let a = Texture::from_base(base.clone());
        let b = a.clone();
        drop(a);
        assert!(!base.is_destroyed());
        drop(b);
        assert!(base.is_destroyed());
    }

    #[test]
    fn out_of_bounds_frame_is_invalid() {
        let t = Texture::from_frame(&sheet(), Rect::new(60.0, 0.0, 8.0, 8.0), None, None);
        assert!(!t.is_valid());
    }

    #[test]
    fn pending_base_becomes_valid_after_decode() {
        let base = BaseTexture::pending(BaseTextureOptions::default());
        let t = Texture::from_base(base.clone());
        assert!(!t.is_valid());
        let id = t.update_id();
        base.set_pixels(2, 2, vec![255; 16]);
        assert!(t.is_valid());
        assert!(t.update_id() > id);
        assert_eq!(t.frame(), Rect::from_size(2.0, 2.0));
    }

    #[test]
    fn white_is_shared_and_valid() {
        let w = Texture::white();
        assert!(w.is_valid());
        assert!(w.base().ptr_eq(Texture::white().base()));
    }
}
