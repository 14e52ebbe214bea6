// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Type descriptors: the shape of a step's output tree.
//!
//! A descriptor names, per nesting level, the child arrays, any object-valued
//! synthesized properties, and the set of *mutable properties* — the
//! properties some upstream step may emit `modified` events for at that
//! level. Steps compute their descriptor bottom-up at construction and never
//! mutate another step's descriptor; `type_descriptor()` is pure.
use std::collections::BTreeSet;

use grove_tree::SegPath;

/// The shape of one nesting level and everything beneath it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeDescriptor {
    arrays: Vec<ArrayDescriptor>,
    objects: Vec<ObjectDescriptor>,
    mutable_properties: BTreeSet<String>,
}

/// A child keyed array exposed at some level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayDescriptor {
    /// Array-property name (the segment name in segment paths).
    pub name: String,
    /// Item type of the array's rows.
    pub ty: TypeDescriptor,
}

/// An object-valued property exposed at some level (a picked child row).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Property name.
    pub name: String,
    /// Shape of the object value.
    pub ty: TypeDescriptor,
}

impl TypeDescriptor {
    /// A leaf level: no child arrays, no objects, no mutable properties.
    #[must_use]
    pub fn leaf() -> Self {
        Self::default()
    }

    /// Child array descriptors at this level.
    #[must_use]
    pub fn arrays(&self) -> &[ArrayDescriptor] {
        &self.arrays
    }

    /// Object-property descriptors at this level.
    #[must_use]
    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    /// The child array named `name`, when present.
    #[must_use]
    pub fn array(&self, name: &str) -> Option<&ArrayDescriptor> {
        self.arrays.iter().find(|array| array.name == name)
    }

    /// Properties that can change at this level without the row being
    /// removed and re-added.
    #[must_use]
    pub fn mutable_properties(&self) -> &BTreeSet<String> {
        &self.mutable_properties
    }

    /// Returns true when `name` is a mutable property at this level.
    #[must_use]
    pub fn is_mutable(&self, name: &str) -> bool {
        self.mutable_properties.contains(name)
    }

    /// The descriptor of the level at `path`, when every segment resolves.
    #[must_use]
    pub fn at_path(&self, path: &SegPath) -> Option<&TypeDescriptor> {
        let mut level = self;
        for segment in path.segments() {
            level = &level.array(segment)?.ty;
        }
        Some(level)
    }

    /// Mutable access to the level at `path`, for construction-time rewrites.
    pub fn at_path_mut(&mut self, path: &SegPath) -> Option<&mut TypeDescriptor> {
        let mut level = self;
        for segment in path.segments() {
            level = &mut level
                .arrays
                .iter_mut()
                .find(|array| array.name == *segment)?
                .ty;
        }
        Some(level)
    }

    /// Adds (or replaces) a child array at this level.
    pub fn set_array(&mut self, name: impl Into<String>, ty: TypeDescriptor) {
        let name = name.into();
        if let Some(existing) = self.arrays.iter_mut().find(|array| array.name == name) {
            existing.ty = ty;
        } else {
            self.arrays.push(ArrayDescriptor { name, ty });
        }
    }

    /// Adds (or replaces) an object property at this level.
    pub fn set_object(&mut self, name: impl Into<String>, ty: TypeDescriptor) {
        let name = name.into();
        if let Some(existing) = self.objects.iter_mut().find(|object| object.name == name) {
            existing.ty = ty;
        } else {
            self.objects.push(ObjectDescriptor { name, ty });
        }
    }

    /// Marks a property mutable at this level.
    pub fn add_mutable(&mut self, name: impl Into<String>) {
        self.mutable_properties.insert(name.into());
    }

    /// Unmarks a property at this level.
    pub fn remove_mutable(&mut self, name: &str) {
        self.mutable_properties.remove(name);
    }

    /// Every array level this descriptor exposes, root first, parents before
    /// children. The output binder registers at each of these.
    #[must_use]
    pub fn array_levels(&self) -> Vec<(SegPath, &TypeDescriptor)> {
        let mut levels = Vec::new();
        self.collect_levels(SegPath::root(), &mut levels);
        levels
    }

    fn collect_levels<'desc>(
        &'desc self,
        path: SegPath,
        out: &mut Vec<(SegPath, &'desc TypeDescriptor)>,
    ) {
        out.push((path.clone(), self));
        for array in &self.arrays {
            array.ty.collect_levels(path.child(&array.name), out);
        }
    }
}
