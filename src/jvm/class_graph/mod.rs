use super::{BinaryName, ClassAccessFlags, Error, MethodAccessFlags, Name, UnqualifiedName};
use crate::util::RefId;
use elsa::sync::{FrozenMap, FrozenVec};
use std::fmt;
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError, RwLock};

mod assignable;
mod java_classes;

pub use assignable::*;
pub use java_classes::*;

pub type ClassId<'g> = RefId<'g, ClassData<'g>>;
pub type MethodId<'g> = RefId<'g, MethodData<'g>>;

/// Backing storage for classes and methods
///
/// Entries are boxed and never removed, so references handed out live as long as the arenas.
pub struct ClassGraphArenas<'g> {
    class_arena: FrozenVec<Box<ClassData<'g>>>,
    method_arena: FrozenVec<Box<MethodData<'g>>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: FrozenVec::new(),
            method_arena: FrozenVec::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies the class loader that defined a class
///
/// The runtime only ever compares loaders, so an opaque number is enough.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u32);

impl LoaderId {
    pub const BOOTSTRAP: LoaderId = LoaderId(0);

    pub fn is_bootstrap(self) -> bool {
        self == LoaderId::BOOTSTRAP
    }
}

/// Word-sized handle of a class, as stored in machine words (eg. resolved catch types)
///
/// Handles are assigned in order of insertion into the graph starting from 1, so a handle is never
/// zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassHandle(pub usize);

/// How far along linking a class is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Loaded,
    Linked,

    /// Linking was attempted and failed, so every future attempt fails the same way
    Erroneous(String),
}

/// Tracks every class/interface known to the runtime and the methods on those classes
///
/// Classes are keyed by their defining loader and their name: two loaders can each define a
/// class with the same name and those are different classes.
///
/// The graph is shared by every thread of the runtime. Lookups only take read locks; additions
/// are serialized so that handles are dense and a class is never defined twice.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<(LoaderId, BinaryName), &'g ClassData<'g>>,
    by_handle: FrozenVec<&'g ClassData<'g>>,
    additions: Mutex<()>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
            by_handle: FrozenVec::new(),
            additions: Mutex::new(()),
        }
    }

    /// Find the class a loader defined under some name
    pub fn lookup_class(&'g self, loader: LoaderId, name: &BinaryName) -> Option<ClassId<'g>> {
        self.classes.get(&(loader, name.clone())).map(RefId)
    }

    /// Find a class from its word-sized handle
    pub fn class_by_handle(&'g self, handle: ClassHandle) -> Option<ClassId<'g>> {
        let index = handle.0.checked_sub(1)?;
        self.by_handle.get(index).map(RefId)
    }

    /// Add a new class to the class graph, assigning it a handle
    pub fn add_class(&self, data: ClassData<'g>) -> Result<ClassId<'g>, Error> {
        let _additions = self.additions.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (data.loader, data.name.clone());
        if self.classes.get(&key).is_some() {
            return Err(Error::DuplicateClass(key.1));
        }

        let mut data = data;
        data.handle = ClassHandle(self.by_handle.len() + 1);
        let data: &'g ClassData<'g> = self.arenas.class_arena.push_get(Box::new(data));
        self.classes.insert(key, data);
        self.by_handle.push(data);
        Ok(RefId(data))
    }

    /// Add a method to the class graph and to its class
    ///
    /// If the class already has a method with the same name and descriptor, that method is
    /// returned instead.
    pub fn add_method(&self, method: MethodData<'g>) -> MethodId<'g> {
        let _additions = self.additions.lock().unwrap_or_else(PoisonError::into_inner);
        let class: &'g ClassData<'g> = method.class.0;
        for existing in &class.methods {
            if existing.name == method.name && existing.descriptor == method.descriptor {
                return RefId(existing);
            }
        }

        let data: &'g MethodData<'g> = self.arenas.method_arena.push_get(Box::new(method));
        class.methods.push(RefId(data));
        RefId(data)
    }

    /// Number of classes in the graph
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Add the standard classes the runtime itself depends on
    pub fn insert_java_library_types(&self) -> Result<JavaClasses<'g>, Error> {
        JavaClasses::add_to_graph(self)
    }
}

pub struct ClassData<'g> {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself (and interfaces)
    pub superclass: Option<ClassId<'g>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<ClassId<'g>>,

    /// Access flags
    pub access_flags: ClassAccessFlags,

    /// Loader that defined the class
    pub loader: LoaderId,

    /// Source file name (eg. `Main.java`), used when printing stack traces
    pub source_file: Option<String>,

    /// Methods
    pub methods: FrozenVec<MethodId<'g>>,

    handle: ClassHandle,
    link_state: RwLock<LinkState>,
}

impl<'g> ClassData<'g> {
    pub fn new(
        name: BinaryName,
        superclass: Option<ClassId<'g>>,
        access_flags: ClassAccessFlags,
        loader: LoaderId,
    ) -> ClassData<'g> {
        ClassData {
            name,
            superclass,
            interfaces: FrozenVec::new(),
            access_flags,
            loader,
            source_file: None,
            methods: FrozenVec::new(),
            handle: ClassHandle(0),
            link_state: RwLock::new(LinkState::Loaded),
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Handle assigned when the class was added to the graph
    pub fn handle(&self) -> ClassHandle {
        self.handle
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Is this class `java/lang/Throwable` or one of its subclasses?
    pub fn is_throwable(&self) -> bool {
        let mut next_class = Some(self);
        while let Some(class) = next_class {
            if class.name == BinaryName::THROWABLE && class.loader.is_bootstrap() {
                return true;
            }
            next_class = class.superclass.map(|superclass| superclass.0);
        }

        false
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_link_state(&self, state: LinkState) {
        *self.link_state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Find a method declared on this class
    pub fn find_method(&self, name: &UnqualifiedName) -> Option<&MethodData<'g>> {
        (&self.methods).into_iter().find(|method| &method.name == name)
    }
}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

pub struct MethodData<'g> {
    /// Class
    ///
    /// Note: this is a pointer back to the class (so don't derive `Debug`)
    pub class: ClassId<'g>,

    /// Name of the method
    pub name: UnqualifiedName,

    /// Type of the method (eg. `(I)V`)
    pub descriptor: String,

    /// Access flags
    pub access_flags: MethodAccessFlags,
}

impl<'g> MethodData<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }
}

impl<'g> Debug for MethodData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}:{}",
            self.class.name.as_str(),
            self.name.as_str(),
            self.descriptor,
        ))
    }
}
