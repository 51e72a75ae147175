use crate::jvm::class_graph::ClassId;
use crate::util::RefId;
use std::collections::HashSet;

/// Subtyping relationship between types
pub trait Assignable {
    /// Is the first type assignable to the second?
    fn is_assignable(&self, super_type: &Self) -> bool;
}

/// Walks the superclass chain (and super-interfaces, when the target is an interface)
///
/// Catch types are always classes, so when the dispatcher asks whether a thrown class is caught by
/// a handler only the superclass chain is visited. Interface targets are still answered so the
/// relation stays usable as a general `instanceof`.
impl<'g> Assignable for ClassId<'g> {
    fn is_assignable(&self, super_type: &ClassId<'g>) -> bool {
        if !super_type.is_interface() {
            let mut current = Some(*self);
            while let Some(class) = current {
                if class == *super_type {
                    return true;
                }
                current = class.superclass;
            }
            return false;
        }

        let mut pending: Vec<ClassId<'g>> = vec![*self];
        let mut seen: HashSet<ClassId<'g>> = HashSet::new();
        seen.insert(*self);
        while let Some(class) = pending.pop() {
            if class == *super_type {
                return true;
            }
            let data = class.0;
            let parents = data
                .superclass
                .into_iter()
                .chain(data.interfaces.iter().map(RefId));
            for parent in parents {
                if seen.insert(parent) {
                    pending.push(parent);
                }
            }
        }

        false
    }
}
