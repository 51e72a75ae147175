use crate::jvm::class_graph::{ClassGraph, ClassId, LinkState, LoaderId};
use crate::jvm::BinaryName;
use crate::util::RefId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// No class with this name is visible to the loader
    NotFound(BinaryName),

    /// The class exists but could not be linked
    LinkFailed { class: BinaryName, reason: String },
}

/// Class loading, as far as exception handling needs it
///
/// Loading proper (parsing, verification, initialization) happens elsewhere. The runtime only
/// needs to find classes by name and make sure they are linked before testing `instanceof`
/// against them.
pub trait ClassLoader<'g>: Send + Sync {
    /// Find a class defined by the bootstrap loader
    fn load_bootstrap(&self, name: &BinaryName) -> Result<ClassId<'g>, LoadError>;

    /// Resolve a symbolic class reference made from code defined by `loader`
    fn resolve(&self, name: &BinaryName, loader: LoaderId) -> Result<ClassId<'g>, LoadError>;

    /// Link a class (and its super types), if it isn't already
    fn link(&self, class: ClassId<'g>) -> Result<(), LoadError>;
}

/// Loader backed by the classes already declared in a [`ClassGraph`]
///
/// Every loader delegates to the bootstrap loader first, then looks at its own classes.
pub struct GraphLoader<'g> {
    classes: &'g ClassGraph<'g>,
}

impl<'g> GraphLoader<'g> {
    pub fn new(classes: &'g ClassGraph<'g>) -> GraphLoader<'g> {
        GraphLoader { classes }
    }
}

impl<'g> ClassLoader<'g> for GraphLoader<'g> {
    fn load_bootstrap(&self, name: &BinaryName) -> Result<ClassId<'g>, LoadError> {
        self.classes
            .lookup_class(LoaderId::BOOTSTRAP, name)
            .ok_or_else(|| LoadError::NotFound(name.clone()))
    }

    fn resolve(&self, name: &BinaryName, loader: LoaderId) -> Result<ClassId<'g>, LoadError> {
        if let Some(class) = self.classes.lookup_class(LoaderId::BOOTSTRAP, name) {
            return Ok(class);
        }
        if !loader.is_bootstrap() {
            if let Some(class) = self.classes.lookup_class(loader, name) {
                return Ok(class);
            }
        }
        Err(LoadError::NotFound(name.clone()))
    }

    fn link(&self, class: ClassId<'g>) -> Result<(), LoadError> {
        match class.link_state() {
            LinkState::Linked => return Ok(()),
            LinkState::Erroneous(reason) => {
                return Err(LoadError::LinkFailed {
                    class: class.name.clone(),
                    reason,
                })
            }
            LinkState::Loaded => (),
        }

        let mut super_types: Vec<ClassId<'g>> = class.superclass.into_iter().collect();
        super_types.extend((&class.0.interfaces).into_iter().map(RefId));
        for super_type in super_types {
            if let Err(err) = self.link(super_type) {
                let reason = format!("super type {:?} failed to link", super_type.name);
                class.set_link_state(LinkState::Erroneous(reason));
                return Err(err);
            }
        }

        log::debug!("Linked {:?}", class);
        class.set_link_state(LinkState::Linked);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassData, ClassGraphArenas};
    use crate::jvm::{ClassAccessFlags, Name};

    #[test]
    fn bootstrap_first_delegation() {
        let arenas = ClassGraphArenas::new();
        let classes = ClassGraph::new(&arenas);
        let java = classes.insert_java_library_types().unwrap();
        let app = LoaderId(1);
        let app_exception = BinaryName::from_string(String::from("app/AppException")).unwrap();
        let defined = classes
            .add_class(ClassData::new(
                app_exception.clone(),
                Some(java.lang.runtime_exception),
                ClassAccessFlags::PUBLIC,
                app,
            ))
            .unwrap();
        let loader = GraphLoader::new(&classes);

        assert_eq!(
            loader.resolve(&BinaryName::THROWABLE, app),
            Ok(java.lang.throwable)
        );
        assert_eq!(loader.resolve(&app_exception, app), Ok(defined));
        assert_eq!(
            loader.resolve(&app_exception, LoaderId::BOOTSTRAP),
            Err(LoadError::NotFound(app_exception.clone()))
        );
        assert!(loader.load_bootstrap(&app_exception).is_err());
    }

    #[test]
    fn linking_is_sticky() {
        let arenas = ClassGraphArenas::new();
        let classes = ClassGraph::new(&arenas);
        let java = classes.insert_java_library_types().unwrap();
        let loader = GraphLoader::new(&classes);

        let npe = java.lang.null_pointer_exception;
        assert_eq!(npe.link_state(), LinkState::Loaded);
        loader.link(npe).unwrap();
        assert_eq!(npe.link_state(), LinkState::Linked);
        assert_eq!(java.lang.throwable.link_state(), LinkState::Linked);

        let broken = java.lang.illegal_argument_exception;
        broken.set_link_state(LinkState::Erroneous(String::from("verification failed")));
        let err = loader.link(broken).unwrap_err();
        assert_eq!(
            err,
            LoadError::LinkFailed {
                class: BinaryName::ILLEGALARGUMENTEXCEPTION,
                reason: String::from("verification failed"),
            }
        );
    }
}
