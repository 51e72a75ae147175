mod common;

use common::{define_class, App, APP_LOADER};
use jvm_unwind::jvm::class_graph::{
    ClassGraph, ClassGraphArenas, ClassId, JavaClasses, LinkState, LoaderId,
};
use jvm_unwind::jvm::{BinaryName, MethodAccessFlags, Name};
use jvm_unwind::runtime::arch::{AArch64, X86_64};
use jvm_unwind::runtime::code::{CatchTarget, CatchType, CodeKind, MetadataBuilder};
use jvm_unwind::runtime::{
    Address, BuiltinException, ClassLoader, Dispatch, GraphLoader, Error, ExceptionInit, HardwareFault,
    LoadError, MonitorState, ObjectHandle, Runtime, ThreadContext,
};
use std::thread;

#[test]
fn handler_ranges_are_half_open() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let code = app.install(
            MetadataBuilder::method(app.method("ranges"), 64)
                .frame_size(2)
                .handler(16, 32, 48, CatchTarget::Any),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let sp = thread.registers.sp;

        let expectations = [
            (0, Dispatch::Unwind),
            (15, Dispatch::Unwind),
            (16, Dispatch::Handler(entry + 48)),
            (31, Dispatch::Handler(entry + 48)),
            (32, Dispatch::Unwind),
            (63, Dispatch::Unwind),
        ];
        for (offset, expected) in expectations {
            let dispatch = runtime
                .find_handler(thread, npe, entry + offset, metadata, sp)
                .unwrap();
            assert_eq!(dispatch, expected, "throw at offset {}", offset);
        }
    });
}

#[test]
fn innermost_handler_wins() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let code = app.install(
            MetadataBuilder::method(app.method("nested"), 64)
                .frame_size(2)
                .handler(0, 32, 40, CatchTarget::Class(java.lang.runtime_exception))
                .handler(8, 24, 44, CatchTarget::Class(java.lang.null_pointer_exception)),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();
        let sp = thread.registers.sp;
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let arithmetic = runtime
            .new_exception(thread, BuiltinException::ArithmeticException, ExceptionInit::None)
            .unwrap();
        let error = runtime
            .new_exception(thread, BuiltinException::InternalError, ExceptionInit::None)
            .unwrap();

        assert_eq!(
            runtime.find_handler(thread, npe, entry + 10, metadata, sp).unwrap(),
            Dispatch::Handler(entry + 44)
        );
        assert_eq!(
            runtime.find_handler(thread, npe, entry + 28, metadata, sp).unwrap(),
            Dispatch::Handler(entry + 40)
        );
        assert_eq!(
            runtime.find_handler(thread, arithmetic, entry + 10, metadata, sp).unwrap(),
            Dispatch::Handler(entry + 40)
        );
        assert_eq!(
            runtime.find_handler(thread, error, entry + 10, metadata, sp).unwrap(),
            Dispatch::Unwind
        );
    });
}

#[test]
fn catch_all_cleanup_wins_over_user_catch() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let locked = app.method_with(
            "locked",
            MethodAccessFlags::STATIC | MethodAccessFlags::SYNCHRONIZED,
        );
        let code = app.install(
            MetadataBuilder::method(locked, 64)
                .frame_size(4)
                .synchronized(16)
                .handler(0, 32, 40, CatchTarget::Class(java.lang.null_pointer_exception))
                .handler(0, 48, 56, CatchTarget::Any),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();

        assert_eq!(
            runtime
                .find_handler(thread, npe, entry + 8, metadata, thread.registers.sp)
                .unwrap(),
            Dispatch::Handler(entry + 56)
        );
    });
}

#[test]
fn catch_all_wins_whatever_the_declaration_order() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let locked = app.method_with(
            "locked",
            MethodAccessFlags::STATIC | MethodAccessFlags::SYNCHRONIZED,
        );
        let npe_class = java.lang.null_pointer_exception;
        let code = app.install(
            MetadataBuilder::method(locked, 64)
                .frame_size(4)
                .synchronized(16)
                .handler(0, 32, 56, CatchTarget::Any)
                .handler(0, 32, 40, CatchTarget::Class(npe_class))
                .handler(8, 16, 44, CatchTarget::Class(npe_class)),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let sp = thread.registers.sp;

        // Same range as the catch-all, declared after it
        assert_eq!(
            runtime.find_handler(thread, npe, entry + 4, metadata, sp).unwrap(),
            Dispatch::Handler(entry + 56)
        );

        // A narrower range nested inside is still the innermost handler
        assert_eq!(
            runtime.find_handler(thread, npe, entry + 8, metadata, sp).unwrap(),
            Dispatch::Handler(entry + 44)
        );
    });
}

#[test]
fn unwinding_synchronized_frame_releases_monitor() {
    for architecture in common::architectures() {
        common::run(architecture, |runtime, java, thread| {
            let app = App::new(runtime, java);
            let locked = app.method_with(
                "locked",
                MethodAccessFlags::STATIC | MethodAccessFlags::SYNCHRONIZED,
            );
            let locked_code = app.install(
                MetadataBuilder::method(locked, 32)
                    .frame_size(4)
                    .synchronized(16)
                    .handler(0, 8, 24, CatchTarget::Class(java.lang.arithmetic_exception)),
            );
            let caller_code = app.install(
                MetadataBuilder::method(app.method("caller"), 32)
                    .frame_size(2)
                    .handler(0, 16, 24, CatchTarget::Any),
            );

            // Held once already, by the code that called into compiled code
            let lock = runtime.heap.allocate(java.lang.object);
            let lock_object = runtime.heap.object(lock).unwrap();
            runtime.monitors.acquire(lock_object, thread.id).unwrap();

            let entered = app.enter(thread);
            let caller = runtime.call(thread, entered, 4, caller_code).unwrap();
            let locked = runtime
                .call_synchronized(thread, caller, 12, locked_code, lock)
                .unwrap();
            assert_eq!(
                lock_object.monitor_state(),
                MonitorState {
                    owner: Some(thread.id),
                    count: 2
                }
            );

            // No handler in the synchronized method: the monitor is released
            let npe = runtime
                .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
                .unwrap();
            let metadata = runtime.code.metadata(locked_code).unwrap();
            assert_eq!(
                runtime
                    .find_handler(thread, npe, locked.pc(12), metadata, locked.sp)
                    .unwrap(),
                Dispatch::Unwind
            );
            assert_eq!(
                lock_object.monitor_state(),
                MonitorState {
                    owner: Some(thread.id),
                    count: 1
                }
            );

            // Same through the unwinder, which goes on to the caller's handler
            runtime.monitors.acquire(lock_object, thread.id).unwrap();
            let resume = runtime.throw(thread, npe, locked.pc(12), locked.sp);
            assert_eq!(resume.pc, caller.pc(24));
            assert_eq!(resume.sp, caller.sp);
            assert_eq!(lock_object.monitor_state().count, 1);
        });
    }
}

#[test]
fn catch_types_resolve_with_the_method_loader() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let app_exception = define_class(
            runtime,
            "app/AppException",
            java.lang.runtime_exception,
            APP_LOADER,
        );
        let name = app_exception.name.clone();
        let code = app.install(
            MetadataBuilder::method(app.method("handles"), 32)
                .frame_size(2)
                .handler(0, 16, 20, CatchTarget::Symbolic(name.clone()))
                .handler(0, 16, 24, CatchTarget::Symbolic(name.clone())),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();
        assert_eq!(metadata.code().symbolic_refs, vec![name.clone()]);

        let thrown = runtime
            .new_exception_by_name(thread, &name, APP_LOADER, ExceptionInit::None)
            .unwrap();
        let sp = thread.registers.sp;
        for _ in 0..2 {
            assert_eq!(
                runtime.find_handler(thread, thrown, entry + 4, metadata, sp).unwrap(),
                Dispatch::Handler(entry + 24)
            );
        }

        let entries: Vec<_> = metadata.exception_entries().collect();
        assert!(matches!(
            entries[1].catch_type().unwrap(),
            CatchType::Resolved(class) if class == app_exception
        ));
        assert!(matches!(
            entries[0].catch_type().unwrap(),
            CatchType::Unresolved(unresolved) if *unresolved == name
        ));

        // A second resolver losing the race adopts the cached class
        assert_eq!(entries[1].cache_resolved(app_exception).unwrap(), app_exception);
        assert_eq!(entries[0].cache_resolved(app_exception).unwrap(), app_exception);
        assert!(matches!(
            entries[0].catch_type().unwrap(),
            CatchType::Resolved(class) if class == app_exception
        ));
    });
}

fn assert_sync<T: Sync>() {}

#[test]
fn threads_resolve_a_shared_catch_type() {
    assert_sync::<Runtime<'static>>();

    common::run(Box::new(X86_64), |runtime, java, _thread| {
        let app = App::new(runtime, java);
        let app_exception = define_class(
            runtime,
            "app/AppException",
            java.lang.runtime_exception,
            APP_LOADER,
        );
        let name = app_exception.name.clone();
        let code = app.install(
            MetadataBuilder::method(app.method("shared"), 32)
                .frame_size(2)
                .handler(0, 16, 20, CatchTarget::Symbolic(name.clone())),
        );
        let metadata = runtime.code.metadata(code).unwrap();
        let entry = metadata.entry();

        let resolved: Vec<Option<ClassId<'_>>> = thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|index| {
                    let name = &name;
                    scope.spawn(move || {
                        let mut worker = runtime.attach_thread(&format!("worker-{}", index));
                        let thrown = runtime
                            .new_exception_by_name(&worker, name, APP_LOADER, ExceptionInit::None)
                            .unwrap();
                        let sp = worker.registers.sp;
                        let dispatch = runtime
                            .find_handler(&mut worker, thrown, entry + 4, metadata, sp)
                            .unwrap();
                        assert_eq!(dispatch, Dispatch::Handler(entry + 20));

                        let cached = metadata.exception_entries().next().unwrap();
                        match cached.catch_type().unwrap() {
                            CatchType::Resolved(class) => Some(class),
                            _ => None,
                        }
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect()
        });

        assert_eq!(resolved, vec![Some(app_exception); 4]);
    });
}

#[test]
fn unresolvable_catch_type_replaces_exception() {
    for architecture in common::architectures() {
        common::run(architecture, |runtime, java, thread| {
            let app = App::new(runtime, java);
            let missing = BinaryName::from_string(String::from("app/Missing")).unwrap();
            let main = app.method("main");
            let main_code = app.install(
                MetadataBuilder::method(main, 64)
                    .frame_size(3)
                    .line(0, 5)
                    .handler(0, 32, 40, CatchTarget::Symbolic(missing)),
            );
            let outer_code = app.install(
                MetadataBuilder::method(app.method("outer"), 32)
                    .frame_size(2)
                    .handler(0, 16, 24, CatchTarget::Any),
            );

            let entered = app.enter(thread);
            let outer = runtime.call(thread, entered, 4, outer_code).unwrap();
            let main = runtime.call(thread, outer, 12, main_code).unwrap();
            let npe = runtime
                .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
                .unwrap();

            let resume = runtime.throw(thread, npe, main.pc(8), main.sp);
            assert_eq!(resume.pc, outer.pc(24));
            assert_ne!(resume.exception, npe);
            assert_eq!(
                runtime.heap.describe(resume.exception).unwrap(),
                "java.lang.NoClassDefFoundError: app/Missing"
            );
            assert!(thread.frames().is_empty());
            assert_eq!(thread.pending_exception(), None);

            // The replacement appears to come from the frame with the broken catch clause
            let trace = runtime
                .heap
                .object(resume.exception)
                .unwrap()
                .stack_trace()
                .unwrap();
            let first = trace.java_entries().next().unwrap();
            assert_eq!(first.method.map(|method| method.0.name.as_str()), Some("main"));
            assert_eq!(first.pc, main.pc(8));
            assert_eq!(first.line, 5);
        });
    }
}

#[test]
fn unlinkable_catch_type_replaces_exception() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let broken = define_class(
            runtime,
            "app/Broken",
            java.lang.runtime_exception,
            APP_LOADER,
        );
        broken.set_link_state(LinkState::Erroneous(String::from("verification failed")));
        let code = app.install(
            MetadataBuilder::method(app.method("main"), 32)
                .frame_size(2)
                .handler(0, 16, 24, CatchTarget::Class(broken)),
        );

        let entered = app.enter(thread);
        let main = runtime.call(thread, entered, 4, code).unwrap();
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let metadata = runtime.code.metadata(code).unwrap();

        let replaced = match runtime
            .find_handler(thread, npe, main.pc(4), metadata, main.sp)
            .unwrap()
        {
            Dispatch::Replaced(replaced) => replaced,
            other => panic!("expected a replacement, got {:?}", other),
        };
        assert_eq!(thread.pending_exception(), Some(replaced));
        assert_eq!(
            runtime.heap.describe(replaced).unwrap(),
            "java.lang.LinkageError: app.Broken: verification failed"
        );
        assert!(thread.frames().is_empty());
    });
}

#[test]
fn unwinding_restores_callee_saved_registers() {
    for architecture in common::architectures() {
        common::run(architecture, |runtime, java, thread| {
            let app = App::new(runtime, java);
            let main_code = app.install(
                MetadataBuilder::method(app.method("main"), 64)
                    .frame_size(3)
                    .saved_registers(2, 0)
                    .handler(16, 24, 40, CatchTarget::Any),
            );
            let callee_code = app.install(
                MetadataBuilder::method(app.method("callee"), 32)
                    .frame_size(4)
                    .saved_registers(2, 1),
            );

            let entered = app.enter(thread);
            thread.registers.int[0] = 1;
            thread.registers.int[1] = 2;
            let main = runtime.call(thread, entered, 4, main_code).unwrap();
            thread.registers.int[0] = 11;
            thread.registers.int[1] = 22;
            thread.registers.float[0] = 33;
            let callee = runtime.call(thread, main, 20, callee_code).unwrap();
            thread.registers.int = [999; 8];
            thread.registers.float = [999; 8];

            let npe = runtime
                .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
                .unwrap();
            let resume = runtime.throw(thread, npe, callee.pc(4), callee.sp);

            assert_eq!(resume.pc, main.pc(40));
            assert_eq!(resume.sp, main.sp);
            assert_eq!(resume.exception, npe);
            assert!(!resume.at_trampoline);
            assert_eq!(thread.registers.sp, main.sp);
            assert_eq!(&thread.registers.int[..2], &[11, 22]);
            assert_eq!(thread.registers.float[0], 33);
            assert_eq!(thread.pending_exception(), None);
        });
    }
}

#[test]
fn uncaught_exception_stops_at_trampoline() {
    for architecture in common::architectures() {
        common::run(architecture, |runtime, java, thread| {
            let app = App::new(runtime, java);
            let main_code =
                app.install(MetadataBuilder::method(app.method("main"), 32).frame_size(2));
            let leaf_code = app.install(
                MetadataBuilder::method(app.method("leaf"), 16)
                    .frame_size(1)
                    .leaf(true),
            );

            let entered = app.enter(thread);
            let main = runtime.call(thread, entered, 4, main_code).unwrap();
            let leaf = runtime.call(thread, main, 8, leaf_code).unwrap();
            let npe = runtime
                .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
                .unwrap();

            let resume = runtime.throw(thread, npe, leaf.pc(2), leaf.sp);
            assert!(resume.at_trampoline);
            assert_eq!(resume.pc, entered.pc(8));
            assert_eq!(resume.sp, entered.sp);
            assert_eq!(
                runtime.code.lookup(resume.pc).unwrap().code().kind,
                CodeKind::CallTrampoline
            );
            assert_eq!(thread.pending_exception(), Some(npe));
        });
    }
}

#[test]
fn wrapped_targets_have_no_message() {
    common::run(Box::new(X86_64), |runtime, _java, thread| {
        let cause = runtime
            .new_exception(
                thread,
                BuiltinException::IllegalArgumentException,
                ExceptionInit::Message(String::from("bad flag")),
            )
            .unwrap();

        let target = runtime
            .new_exception(
                thread,
                BuiltinException::ExceptionInInitializerError,
                ExceptionInit::Target(cause),
            )
            .unwrap();
        let target_object = runtime.heap.object(target).unwrap();
        assert_eq!(target_object.cause(), Some(cause));
        assert_eq!(target_object.detail_message(), None);
        assert_eq!(
            runtime.heap.describe(target).unwrap(),
            "java.lang.ExceptionInInitializerError"
        );

        // Plain cause wrapping takes the cause's description as the message
        let wrapped = runtime
            .new_exception(thread, BuiltinException::InternalError, ExceptionInit::Cause(cause))
            .unwrap();
        assert_eq!(runtime.heap.object(wrapped).unwrap().cause(), Some(cause));
        assert_eq!(
            runtime.heap.describe(wrapped).unwrap(),
            "java.lang.InternalError: java.lang.IllegalArgumentException: bad flag"
        );

        assert!(matches!(
            runtime.new_exception(
                thread,
                BuiltinException::InvocationTargetException,
                ExceptionInit::Target(ObjectHandle(999)),
            ),
            Err(Error::UnknownObject(ObjectHandle(999)))
        ));
    });
}

#[test]
fn method_errors_name_the_method() {
    common::run(Box::new(X86_64), |runtime, java, thread| {
        let app = App::new(runtime, java);
        let helper = app.method("helper");

        let error = runtime
            .throw_method_error(thread, BuiltinException::AbstractMethodError, helper)
            .unwrap();
        assert_eq!(thread.pending_exception(), Some(error));
        assert_eq!(
            runtime.heap.describe(error).unwrap(),
            "java.lang.AbstractMethodError: app.App.helper()V"
        );

        let missing = runtime
            .throw_method_error(thread, BuiltinException::NoSuchMethodError, helper)
            .unwrap();
        assert_ne!(missing, error);
        assert_eq!(
            runtime.heap.object(missing).unwrap().detail_message().as_deref(),
            Some("app.App.helper()V")
        );
    });
}

#[test]
fn hardware_faults_map_to_exceptions() {
    for architecture in common::architectures() {
        common::run(architecture, |runtime, java, thread| {
            let app = App::new(runtime, java);
            let main_code = app.install(
                MetadataBuilder::method(app.method("main"), 64)
                    .frame_size(2)
                    .handler(0, 32, 48, CatchTarget::Any),
            );
            let string = runtime.heap.allocate(java.lang.string);

            let entered = app.enter(thread);
            let main = runtime.call(thread, entered, 4, main_code).unwrap();

            let cases = [
                (HardwareFault::NULL_POINTER, 0, "java.lang.NullPointerException"),
                (
                    HardwareFault::DIVIDE_BY_ZERO,
                    0,
                    "java.lang.ArithmeticException: / by zero",
                ),
                (
                    HardwareFault::ARRAY_BOUNDS,
                    7,
                    "java.lang.ArrayIndexOutOfBoundsException: Array index out of range: 7",
                ),
                (
                    HardwareFault::CLASS_CAST,
                    string.to_word(),
                    "java.lang.ClassCastException: java.lang.String",
                ),
                (
                    HardwareFault::NEGATIVE_ARRAY_SIZE,
                    (-3i32) as usize,
                    "java.lang.NegativeArraySizeException: -3",
                ),
                (HardwareFault::STACK_OVERFLOW, 0, "java.lang.StackOverflowError"),
            ];
            for (code, value, expected) in cases {
                let resume =
                    runtime.handle_hardware_fault(thread, code, value, main.pc(8), main.sp);
                assert_eq!(resume.pc, main.pc(48));
                assert_eq!(runtime.heap.describe(resume.exception).unwrap(), expected);
                assert!(thread.frames().is_empty());
                assert_eq!(thread.pending_exception(), None);
            }

            let resume = runtime.handle_hardware_fault(
                thread,
                HardwareFault::ARRAY_BOUNDS,
                12,
                main.pc(8),
                main.sp,
            );
            let exception = runtime.heap.object(resume.exception).unwrap();
            assert_eq!(exception.payload(), Some(12));
        });
    }
}

#[test]
#[should_panic(expected = "UnknownFault(42)")]
fn unknown_fault_is_fatal() {
    common::run(Box::new(X86_64), |runtime, _java, thread| {
        let sp = thread.registers.sp;
        runtime.handle_hardware_fault(thread, 42, 0, Address(0x1000_0000), sp);
    });
}

#[test]
fn throw_outside_of_code_is_an_invalid_stack() {
    common::run(Box::new(X86_64), |runtime, _java, thread| {
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let sp = thread.registers.sp;
        assert!(matches!(
            runtime.try_throw(thread, npe, Address(0x10), sp),
            Err(Error::UnmappedPc(Address(0x10)))
        ));
    });
}

#[test]
#[should_panic(expected = "InvalidStack")]
fn throw_outside_of_code_is_fatal() {
    common::run(Box::new(X86_64), |runtime, _java, thread| {
        let npe = runtime
            .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
            .unwrap();
        let sp = thread.registers.sp;
        runtime.throw(thread, npe, Address(0x10), sp);
    });
}

/// `main` claims to be a leaf (no frame, return address in the link register) yet calls `leaf`
fn leaf_calling_leaf<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> (ObjectHandle, Address, Address) {
    let app = App::new(runtime, java);
    let main_code = app.install(
        MetadataBuilder::method(app.method("main"), 32)
            .frame_size(0)
            .leaf(true),
    );
    let leaf_code = app.install(
        MetadataBuilder::method(app.method("leaf"), 16)
            .frame_size(0)
            .leaf(true),
    );

    let entered = app.enter(thread);
    let main = runtime.call(thread, entered, 4, main_code).unwrap();
    let leaf = runtime.call(thread, main, 8, leaf_code).unwrap();
    let npe = runtime
        .new_exception(thread, BuiltinException::NullPointerException, ExceptionInit::None)
        .unwrap();
    (npe, leaf.pc(2), leaf.sp)
}

#[test]
fn leaf_reached_as_a_caller_is_an_invalid_stack() {
    common::run(Box::new(AArch64), |runtime, java, thread| {
        let (npe, xpc, sp) = leaf_calling_leaf(runtime, java, thread);
        assert!(matches!(
            runtime.try_throw(thread, npe, xpc, sp),
            Err(Error::InvalidFrame { caller_sp, .. }) if caller_sp == sp
        ));
    });
}

#[test]
#[should_panic(expected = "InvalidStack")]
fn leaf_reached_as_a_caller_is_fatal() {
    common::run(Box::new(AArch64), |runtime, java, thread| {
        let (npe, xpc, sp) = leaf_calling_leaf(runtime, java, thread);
        runtime.throw(thread, npe, xpc, sp);
    });
}

/// Loader pretending some bootstrap classes do not exist
struct WithoutClasses<'g> {
    inner: GraphLoader<'g>,
    missing: Vec<BinaryName>,
}

impl<'g> ClassLoader<'g> for WithoutClasses<'g> {
    fn load_bootstrap(&self, name: &BinaryName) -> Result<ClassId<'g>, LoadError> {
        if self.missing.contains(name) {
            Err(LoadError::NotFound(name.clone()))
        } else {
            self.inner.load_bootstrap(name)
        }
    }

    fn resolve(&self, name: &BinaryName, loader: LoaderId) -> Result<ClassId<'g>, LoadError> {
        if self.missing.contains(name) {
            Err(LoadError::NotFound(name.clone()))
        } else {
            self.inner.resolve(name, loader)
        }
    }

    fn link(&self, class: ClassId<'g>) -> Result<(), LoadError> {
        self.inner.link(class)
    }
}

#[test]
fn missing_exception_class_degrades() {
    let arenas = ClassGraphArenas::new();
    let classes = ClassGraph::new(&arenas);
    classes.insert_java_library_types().unwrap();
    let runtime = Runtime::new(&classes, common::test_settings(Box::new(X86_64))).with_loader(
        Box::new(WithoutClasses {
            inner: GraphLoader::new(&classes),
            missing: vec![BinaryName::NULLPOINTEREXCEPTION],
        }),
    );
    let mut thread = runtime.attach_thread("main");

    // Nothing pending: the missing class is reported instead
    let replacement = runtime
        .new_exception(&thread, BuiltinException::NullPointerException, ExceptionInit::None)
        .unwrap();
    assert_eq!(
        runtime.heap.describe(replacement).unwrap(),
        "java.lang.NoClassDefFoundError: java/lang/NullPointerException"
    );

    // Something pending: that is what comes back
    let pending = runtime
        .throw_exception(
            &mut thread,
            BuiltinException::IllegalArgumentException,
            ExceptionInit::None,
        )
        .unwrap();
    let exception = runtime
        .new_exception(&thread, BuiltinException::NullPointerException, ExceptionInit::None)
        .unwrap();
    assert_eq!(exception, pending);

    // Classes that are not exceptions are rejected
    assert!(matches!(
        runtime.new_exception_by_name(
            &thread,
            &BinaryName::STRING,
            LoaderId::BOOTSTRAP,
            ExceptionInit::None
        ),
        Err(Error::NotThrowable(_))
    ));
}

#[test]
#[should_panic(expected = "Bootstrap")]
fn missing_bootstrap_class_is_fatal() {
    let arenas = ClassGraphArenas::new();
    let classes = ClassGraph::new(&arenas);
    classes.insert_java_library_types().unwrap();
    let runtime = Runtime::new(&classes, common::test_settings(Box::new(X86_64))).with_loader(
        Box::new(WithoutClasses {
            inner: GraphLoader::new(&classes),
            missing: vec![
                BinaryName::NULLPOINTEREXCEPTION,
                BinaryName::NOCLASSDEFFOUNDERROR,
            ],
        }),
    );
    let thread = runtime.attach_thread("main");
    let _ = runtime.new_exception(
        &thread,
        BuiltinException::NullPointerException,
        ExceptionInit::None,
    );
}
