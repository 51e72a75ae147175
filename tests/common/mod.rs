#![allow(dead_code)]

use jvm_unwind::jvm::class_graph::{
    ClassData, ClassGraph, ClassGraphArenas, ClassId, JavaClasses, LoaderId, MethodData, MethodId,
};
use jvm_unwind::jvm::{BinaryName, ClassAccessFlags, MethodAccessFlags, Name, UnqualifiedName};
use jvm_unwind::runtime::arch::{AArch64, Architecture, X86_64};
use jvm_unwind::runtime::code::{CodeHandle, MetadataBuilder};
use jvm_unwind::runtime::{
    Activation, Address, FatalError, FatalHandler, Runtime, Settings, ThreadContext,
};

/// Loader of the application classes tests declare
pub const APP_LOADER: LoaderId = LoaderId(1);

/// Panic instead of aborting, so that fatal paths can be tested with `#[should_panic]`
pub struct PanicOnFatal;

impl FatalHandler for PanicOnFatal {
    fn fatal(&self, error: &FatalError) -> ! {
        panic!("fatal runtime error: {:?}", error)
    }
}

pub fn architectures() -> Vec<Box<dyn Architecture>> {
    vec![Box::new(X86_64), Box::new(AArch64)]
}

pub fn test_settings(architecture: Box<dyn Architecture>) -> Settings {
    let mut settings = Settings::new();
    settings.architecture = architecture;
    settings.fatal_handler = Box::new(PanicOnFatal);
    settings.stack_words = 1024;
    settings
}

/// Run `body` against a fresh runtime (with the Java library classes) and a fresh `main` thread
pub fn run<F>(architecture: Box<dyn Architecture>, body: F)
where
    F: for<'g> FnOnce(&Runtime<'g>, &JavaClasses<'g>, &mut ThreadContext<'g>),
{
    let arenas = ClassGraphArenas::new();
    let classes = ClassGraph::new(&arenas);
    let java = classes.insert_java_library_types().unwrap();
    let runtime = Runtime::new(&classes, test_settings(architecture));
    let mut thread = runtime.attach_thread("main");
    body(&runtime, &java, &mut thread);
}

/// Application class and the code of its methods
pub struct App<'r, 'g> {
    pub runtime: &'r Runtime<'g>,
    pub class: ClassId<'g>,
}

impl<'r, 'g> App<'r, 'g> {
    pub fn new(runtime: &'r Runtime<'g>, java: &JavaClasses<'g>) -> Self {
        let class = define_class(runtime, "app/App", java.lang.object, APP_LOADER);
        App { runtime, class }
    }

    pub fn method(&self, name: &str) -> MethodId<'g> {
        self.method_with(name, MethodAccessFlags::STATIC)
    }

    pub fn method_with(&self, name: &str, access_flags: MethodAccessFlags) -> MethodId<'g> {
        self.runtime.classes.add_method(MethodData {
            class: self.class,
            name: UnqualifiedName::from_string(name.to_owned()).unwrap(),
            descriptor: String::from("()V"),
            access_flags,
        })
    }

    pub fn install(&self, builder: MetadataBuilder<'g>) -> CodeHandle {
        self.runtime.code.install(builder).unwrap().code_handle()
    }

    pub fn entry(&self, code: CodeHandle) -> Address {
        self.runtime.entry_of(code).unwrap()
    }

    /// Call trampoline through which native code enters compiled code
    pub fn trampoline(&self) -> CodeHandle {
        self.install(MetadataBuilder::trampoline(16, 8))
    }

    /// Frame of a fresh trampoline, as if native code had just called into compiled code
    pub fn enter(&self, thread: &mut ThreadContext<'g>) -> Activation {
        let trampoline = self.trampoline();
        self.runtime.enter(thread, trampoline).unwrap()
    }
}

pub fn define_class<'g>(
    runtime: &Runtime<'g>,
    name: &str,
    superclass: ClassId<'g>,
    loader: LoaderId,
) -> ClassId<'g> {
    runtime
        .classes
        .add_class(
            ClassData::new(
                BinaryName::from_string(name.to_owned()).unwrap(),
                Some(superclass),
                ClassAccessFlags::PUBLIC,
                loader,
            )
            .with_source_file(format!("{}.java", name.rsplit('/').next().unwrap())),
        )
        .unwrap()
}
