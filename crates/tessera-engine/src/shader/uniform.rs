use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::texture::Texture;

use super::UniformType;

/// CPU-side uniform value.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    /// Column-major.
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    /// Packed elements of a float/vector/matrix array.
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    /// Texture unit read by a sampler uniform.
    Sampler(u32),
}

impl UniformValue {
    /// True when this value can be uploaded to a uniform of type `ty`.
    pub fn matches(&self, ty: UniformType, size: u32) -> bool {
        use UniformValue as V;
        match (self, ty) {
            (V::Float(_), UniformType::Float)
            | (V::Vec2(_), UniformType::Vec2)
            | (V::Vec3(_), UniformType::Vec3)
            | (V::Vec4(_), UniformType::Vec4)
            | (V::Int(_), UniformType::Int)
            | (V::IVec2(_), UniformType::IVec2)
            | (V::IVec3(_), UniformType::IVec3)
            | (V::IVec4(_), UniformType::IVec4)
            | (V::UInt(_), UniformType::UInt)
            | (V::Mat2(_), UniformType::Mat2)
            | (V::Mat3(_), UniformType::Mat3)
            | (V::Mat4(_), UniformType::Mat4)
            | (V::Sampler(_), UniformType::Texture2D) => true,
            (V::Floats(v), t) => {
                !matches!(t, UniformType::Int | UniformType::IVec2 | UniformType::IVec3 | UniformType::IVec4 | UniformType::UInt | UniformType::Texture2D)
                    && v.len() as u32 <= t.components() * size
            }
            (V::Ints(v), UniformType::Int | UniformType::IVec2 | UniformType::IVec3 | UniformType::IVec4) => {
                v.len() as u32 <= ty.components() * size
            }
            _ => false,
        }
    }

    /// Flat float view, ints converted. Used by backends that interpret
    /// uniforms on the CPU.
    pub fn as_floats(&self) -> Vec<f32> {
        use UniformValue as V;
        match self {
            V::Float(v) => vec![*v],
            V::Vec2(v) => v.to_vec(),
            V::Vec3(v) => v.to_vec(),
            V::Vec4(v) => v.to_vec(),
            V::Int(v) => vec![*v as f32],
            V::IVec2(v) => v.iter().map(|x| *x as f32).collect(),
            V::IVec3(v) => v.iter().map(|x| *x as f32).collect(),
            V::IVec4(v) => v.iter().map(|x| *x as f32).collect(),
            V::UInt(v) | V::Sampler(v) => vec![*v as f32],
            V::Mat2(v) => v.to_vec(),
            V::Mat3(v) => v.to_vec(),
            V::Mat4(v) => v.to_vec(),
            V::Floats(v) => v.clone(),
            V::Ints(v) => v.iter().map(|x| *x as f32).collect(),
        }
    }
}

/// Value stored in a [`UniformGroup`].
#[derive(Debug, Clone)]
pub enum GroupEntry {
    Value(UniformValue),
    /// Bound to a texture unit chosen at sync time.
    Texture(Texture),
}

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Named uniform values uploaded together.
///
/// Every mutation bumps `dirty_id`; a program that already synced the
/// current `dirty_id` of a group skips its values on the next bind. Static
/// groups are expected to be set once.
#[derive(Debug)]
pub struct UniformGroup {
    id: u64,
    entries: BTreeMap<String, GroupEntry>,
    dirty_id: u64,
    is_static: bool,
}

impl Default for UniformGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformGroup {
    pub fn new() -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            entries: BTreeMap::new(),
            dirty_id: 0,
            is_static: false,
        }
    }

    pub fn new_static() -> Self {
        Self { is_static: true, ..Self::new() }
    }

    pub fn with(mut self, name: &str, value: UniformValue) -> Self {
        self.set(name, value);
        self
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn dirty_id(&self) -> u64 {
        self.dirty_id
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Sets a value; unchanged values do not dirty the group.
    pub fn set(&mut self, name: &str, value: UniformValue) {
        if let Some(GroupEntry::Value(old)) = self.entries.get(name) {
            if *old == value {
                return;
            }
        }
        self.entries.insert(name.to_string(), GroupEntry::Value(value));
        self.dirty_id += 1;
    }

    /// Sets a texture entry; re-setting the same base texture is a no-op.
    pub fn set_texture(&mut self, name: &str, texture: Texture) {
        if let Some(GroupEntry::Texture(old)) = self.entries.get(name) {
            if old.base().ptr_eq(texture.base()) {
                return;
            }
        }
        self.entries.insert(name.to_string(), GroupEntry::Texture(texture));
        self.dirty_id += 1;
    }

    pub fn get(&self, name: &str) -> Option<&GroupEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&UniformValue> {
        match self.entries.get(name) {
            Some(GroupEntry::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_set_keeps_dirty_id() {
        let mut g = UniformGroup::new();
        g.set("uColor", UniformValue::Vec4([1.0; 4]));
        let id = g.dirty_id();
        g.set("uColor", UniformValue::Vec4([1.0; 4]));
        assert_eq!(g.dirty_id(), id);
        g.set("uColor", UniformValue::Vec4([0.5; 4]));
        assert_eq!(g.dirty_id(), id + 1);
    }

    #[test]
    fn value_type_matching() {
        assert!(UniformValue::Mat3([0.0; 9]).matches(UniformType::Mat3, 1));
        assert!(!UniformValue::Vec4([0.0; 4]).matches(UniformType::Mat3, 1));
        assert!(UniformValue::Floats(vec![0.0; 8]).matches(UniformType::Vec4, 2));
        assert!(!UniformValue::Floats(vec![0.0; 9]).matches(UniformType::Vec4, 2));
        assert!(UniformValue::Sampler(3).matches(UniformType::Texture2D, 1));
    }
}
