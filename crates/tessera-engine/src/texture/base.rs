use std::cell::{Cell, Ref, RefCell};
use std::rc::{Rc, Weak};

use crate::device::{ScaleMode, WrapMode};
use crate::resource::{ResourceId, TrackedResource};

/// How the color channels of the source pixels are stored.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum AlphaMode {
    #[default]
    Premultiplied,
    /// Straight alpha; batches use the premultiplying shader variant.
    Unpremultiplied,
}

/// Pixel source of a [`BaseTexture`].
#[derive(Debug, Clone, Default)]
pub enum TextureSource {
    /// Not decoded yet; the texture is not drawable.
    #[default]
    Pending,
    /// Tightly packed RGBA8 rows, top row first.
    Pixels(Vec<u8>),
    /// Contents are produced on the GPU by rendering into it.
    RenderTarget { stencil: bool },
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BaseTextureOptions {
    pub scale_mode: ScaleMode,
    pub wrap_mode: WrapMode,
    pub alpha_mode: AlphaMode,
    pub mipmap: bool,
    /// Pixels per logical unit.
    pub resolution: f32,
}

impl Default for BaseTextureOptions {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::Linear,
            wrap_mode: WrapMode::Clamp,
            alpha_mode: AlphaMode::Premultiplied,
            mipmap: false,
            resolution: 1.0,
        }
    }
}

/// One uploadable pixel source shared by any number of [`Texture`] views.
///
/// `dirty_id` increases on every change that needs a re-upload. The view
/// count is maintained by `Texture` clones and drops; the base is destroyed
/// when the last view goes away or when `destroy` is called.
///
/// [`Texture`]: super::Texture
#[derive(Debug, Clone)]
pub struct BaseTexture {
    inner: Rc<BaseInner>,
}

#[derive(Debug)]
struct BaseInner {
    id: ResourceId,
    source: RefCell<TextureSource>,
    pixel_width: Cell<u32>,
    pixel_height: Cell<u32>,
    options: Cell<BaseTextureOptions>,
    dirty_id: Cell<u64>,
    views: Cell<u32>,
    destroyed: Cell<bool>,
}

impl TrackedResource for BaseInner {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

impl BaseTexture {
    fn with_source(source: TextureSource, width: u32, height: u32, options: BaseTextureOptions) -> Self {
        Self {
            inner: Rc::new(BaseInner {
                id: ResourceId::next(),
                source: RefCell::new(source),
                pixel_width: Cell::new(width),
                pixel_height: Cell::new(height),
                options: Cell::new(options),
                dirty_id: Cell::new(1),
                views: Cell::new(0),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// Wraps decoded RGBA8 pixels (`width * height * 4` bytes).
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>, options: BaseTextureOptions) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self::with_source(TextureSource::Pixels(pixels), width, height, options)
    }

    /// A texture whose pixels are still being decoded.
    pub fn pending(options: BaseTextureOptions) -> Self {
        Self::with_source(TextureSource::Pending, 0, 0, options)
    }

    pub(crate) fn render_target(width: u32, height: u32, stencil: bool, options: BaseTextureOptions) -> Self {
        Self::with_source(TextureSource::RenderTarget { stencil }, width, height, options)
    }

    /// Replaces the pixels, e.g. once decoding finished.
    pub fn set_pixels(&self, width: u32, height: u32, pixels: Vec<u8>) {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        *self.inner.source.borrow_mut() = TextureSource::Pixels(pixels);
        self.inner.pixel_width.set(width);
        self.inner.pixel_height.set(height);
        self.update();
    }

    /// Flags the source as changed so it is uploaded again.
    pub fn update(&self) {
        self.inner.dirty_id.set(self.inner.dirty_id.get() + 1);
    }

    pub(crate) fn resize(&self, width: u32, height: u32) {
        if (width, height) == (self.pixel_width(), self.pixel_height()) {
            return;
        }
        self.inner.pixel_width.set(width);
        self.inner.pixel_height.set(height);
        self.update();
    }

    pub fn set_scale_mode(&self, mode: ScaleMode) {
        let mut o = self.inner.options.get();
        if o.scale_mode != mode {
            o.scale_mode = mode;
            self.inner.options.set(o);
            self.update();
        }
    }

    pub fn set_wrap_mode(&self, mode: WrapMode) {
        let mut o = self.inner.options.get();
        if o.wrap_mode != mode {
            o.wrap_mode = mode;
            self.inner.options.set(o);
            self.update();
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn dirty_id(&self) -> u64 {
        self.inner.dirty_id.get()
    }

    #[inline]
    pub fn options(&self) -> BaseTextureOptions {
        self.inner.options.get()
    }

    #[inline]
    pub fn alpha_mode(&self) -> AlphaMode {
        self.options().alpha_mode
    }

    #[inline]
    pub fn resolution(&self) -> f32 {
        self.options().resolution
    }

    #[inline]
    pub fn pixel_width(&self) -> u32 {
        self.inner.pixel_width.get()
    }

    #[inline]
    pub fn pixel_height(&self) -> u32 {
        self.inner.pixel_height.get()
    }

    /// Width in logical units.
    #[inline]
    pub fn width(&self) -> f32 {
        self.pixel_width() as f32 / self.resolution()
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.pixel_height() as f32 / self.resolution()
    }

    pub fn source(&self) -> Ref<'_, TextureSource> {
        self.inner.source.borrow()
    }

    pub fn is_render_target(&self) -> bool {
        matches!(*self.inner.source.borrow(), TextureSource::RenderTarget { .. })
    }

    /// Drawable: not destroyed, sized, and not waiting for pixels.
    pub fn is_valid(&self) -> bool {
        !self.is_destroyed()
            && self.pixel_width() > 0
            && self.pixel_height() > 0
            && !matches!(*self.inner.source.borrow(), TextureSource::Pending)
    }

    #[inline]
    pub fn view_count(&self) -> u32 {
        self.inner.views.get()
    }

    /// Marks the texture destroyed; its native texture is released on the
    /// next garbage sweep and the pixels are dropped.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        log::debug!("base texture {} destroyed", self.id());
        *self.inner.source.borrow_mut() = TextureSource::Pending;
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub(crate) fn acquire_view(&self) {
        self.inner.views.set(self.inner.views.get() + 1);
    }

    pub(crate) fn release_view(&self) {
        let n = self.inner.views.get().saturating_sub(1);
        self.inner.views.set(n);
        if n == 0 {
            self.destroy();
        }
    }

    pub(crate) fn tracker(&self) -> Weak<dyn TrackedResource> {
        Rc::downgrade(&self.inner) as Weak<dyn TrackedResource>
    }

    #[inline]
    pub fn ptr_eq(&self, other: &BaseTexture) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
