// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::compartment::{Compartment, Stored};
use crate::types::TagType;

/// An exception tag instance.
///
/// Identity is the whole point: two tags compare unequal unless they are the
/// same instance, and `catch` matches a thrown exception only against the
/// identical tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub(crate) Stored<TagData>);

#[derive(Debug)]
pub(crate) struct TagData {
    ty: TagType,
}

// ===== impl TagData =====

impl TagData {
    pub(crate) fn new(ty: TagType) -> Self {
        Self { ty }
    }

    pub(crate) fn ty(&self) -> TagType {
        self.ty
    }
}

// ===== impl Tag =====

impl Tag {
    /// The tag's type.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not denote a live tag of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> TagType {
        compartment
            .lock()
            .tags
            .get(self.0)
            .expect("tag is not a live object of this compartment")
            .ty()
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().tags.contains(self.0)
    }
}
