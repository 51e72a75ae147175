use super::metadata::{exception_entry_offset, MethodMetadata};
use crate::jvm::class_graph::{ClassHandle, ClassId};
use crate::jvm::BinaryName;
use crate::runtime::{Address, Error};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Catch-type word of a catch-all entry (`finally` blocks, synchronized regions)
pub(super) const CATCH_ALL_WORD: usize = 0;

/// Resolved catch types are even: the class handle shifted left
pub(super) fn encode_resolved(class: ClassId) -> usize {
    class.handle().0 << 1
}

/// Unresolved catch types are odd: the index of the symbolic reference shifted left, plus one
pub(super) fn encode_unresolved(index: usize) -> usize {
    (index << 1) | 1
}

/// Catch type as code generation hands it to [`super::MetadataBuilder`]
pub enum CatchTarget<'g> {
    /// Catches every exception
    Any,

    /// Class the handler catches, known only by name until an exception first reaches the entry
    Symbolic(BinaryName),

    /// Class the handler catches, already resolved
    Class(ClassId<'g>),
}

/// Decoded catch-type word of an exception-table entry
#[derive(Copy, Clone, Debug)]
pub enum CatchType<'r, 'g> {
    Any,
    Unresolved(&'r BinaryName),
    Resolved(ClassId<'g>),
}

/// One entry of a method's exception table
///
/// The range `[start, end)` and the handler are fixed once emitted. The catch-type word starts
/// out unresolved for handlers of classes not yet loaded and is overwritten once, atomically,
/// with the resolved class.
#[derive(Copy, Clone)]
pub struct ExceptionEntry<'r, 'g> {
    metadata: MethodMetadata<'r, 'g>,
    index: usize,
}

impl<'r, 'g> ExceptionEntry<'r, 'g> {
    pub(super) fn new(metadata: MethodMetadata<'r, 'g>, index: usize) -> Self {
        ExceptionEntry { metadata, index }
    }

    fn slot(&self, word: usize) -> &'r AtomicUsize {
        let base = self.metadata.entry() - exception_entry_offset(self.index);
        self.metadata
            .region()
            .slot(base.add_words(word))
            .expect("exception entry inside its region")
    }

    /// Position in declaration order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Option<Address> {
        Address::from_word(self.slot(0).load(Ordering::Relaxed))
    }

    pub fn end(&self) -> Option<Address> {
        Address::from_word(self.slot(1).load(Ordering::Relaxed))
    }

    pub fn handler(&self) -> Address {
        Address(self.slot(2).load(Ordering::Relaxed))
    }

    /// Call trampolines carry one entry with neither start nor end, matching everything
    pub fn is_trampoline_marker(&self) -> bool {
        self.start().is_none() && self.end().is_none()
    }

    pub fn covers(&self, pc: Address) -> bool {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => start <= pc && pc < end,
            _ => false,
        }
    }

    pub fn catch_type(&self) -> Result<CatchType<'r, 'g>, Error> {
        self.decode(self.slot(3).load(Ordering::Acquire))
    }

    fn decode(&self, word: usize) -> Result<CatchType<'r, 'g>, Error> {
        if word == CATCH_ALL_WORD {
            Ok(CatchType::Any)
        } else if word & 1 == 1 {
            let code = self.metadata.code();
            code.symbolic_refs
                .get(word >> 1)
                .map(CatchType::Unresolved)
                .ok_or_else(|| {
                    Error::MalformedMetadata(format!(
                        "{:?} has no symbolic reference {}",
                        code.handle,
                        word >> 1
                    ))
                })
        } else {
            self.metadata
                .registry()
                .classes()
                .class_by_handle(ClassHandle(word >> 1))
                .map(CatchType::Resolved)
                .ok_or_else(|| {
                    Error::MalformedMetadata(format!("no class with handle {}", word >> 1))
                })
        }
    }

    /// Record the class an unresolved catch type resolved to
    ///
    /// This is a single compare-and-swap of the catch-type word, so concurrent resolvers of the
    /// same entry agree: the first store wins and everyone returns the class it stored.
    pub fn cache_resolved(&self, class: ClassId<'g>) -> Result<ClassId<'g>, Error> {
        let slot = self.slot(3);
        let current = slot.load(Ordering::Acquire);
        if current & 1 == 1 {
            let resolved = encode_resolved(class);
            match slot.compare_exchange(current, resolved, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    log::debug!(
                        "Cached catch type {:?} in entry {} of {:?}",
                        class,
                        self.index,
                        self.metadata.code_handle()
                    );
                    return Ok(class);
                }
                Err(winner) => return self.expect_resolved(winner),
            }
        }
        self.expect_resolved(current)
    }

    fn expect_resolved(&self, word: usize) -> Result<ClassId<'g>, Error> {
        match self.decode(word)? {
            CatchType::Resolved(class) => Ok(class),
            other => Err(Error::MalformedMetadata(format!(
                "catch type {:?} of entry {} is not a resolved class",
                other, self.index
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas, MethodData};
    use crate::jvm::{MethodAccessFlags, Name, UnqualifiedName};
    use crate::runtime::code::{CodeRegistry, MetadataBuilder};

    #[test]
    fn resolution_is_cached_once() {
        let arenas = ClassGraphArenas::new();
        let classes = ClassGraph::new(&arenas);
        let java = classes.insert_java_library_types().unwrap();
        let method = classes.add_method(MethodData {
            class: java.lang.thread,
            name: UnqualifiedName::RUN,
            descriptor: String::from("()V"),
            access_flags: MethodAccessFlags::PUBLIC,
        });
        let name = BinaryName::from_string(String::from("java/lang/ArithmeticException")).unwrap();
        let registry = CodeRegistry::new(&classes);
        let metadata = registry
            .install(MetadataBuilder::method(method, 32).handler(
                0,
                16,
                20,
                CatchTarget::Symbolic(name),
            ))
            .unwrap();

        // Two resolvers read the unresolved word before either stores
        let first_view = metadata.exception_entries().next().unwrap();
        let second_view = metadata.exception_entries().next().unwrap();
        assert!(matches!(
            first_view.catch_type().unwrap(),
            CatchType::Unresolved(_)
        ));

        let winner = java.lang.arithmetic_exception;
        let loser = java.lang.runtime_exception;
        assert_eq!(first_view.cache_resolved(winner).unwrap(), winner);
        assert_eq!(
            second_view.cache_resolved(loser).unwrap(),
            winner,
            "the second resolver adopts the stored class"
        );
        assert!(matches!(
            second_view.catch_type().unwrap(),
            CatchType::Resolved(class) if class == winner
        ));
    }

    #[test]
    fn trampoline_marker() {
        let arenas = ClassGraphArenas::new();
        let classes = ClassGraph::new(&arenas);
        let registry = CodeRegistry::new(&classes);
        let metadata = registry
            .install(MetadataBuilder::trampoline(32, 16))
            .unwrap();

        let marker = metadata.exception_entries().next().unwrap();
        assert!(marker.is_trampoline_marker());
        assert!(!marker.covers(metadata.entry()));
        assert_eq!(marker.handler(), metadata.entry() + 16);
        assert_eq!(metadata.method(), None);
    }
}
