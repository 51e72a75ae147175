//! Small programs laid out on a simulated stack, to watch exceptions propagate
//!
//! Every scenario declares a `demo/Demo` class, installs code for its methods, builds the frames
//! a run would have built so far and then raises an exception. Whatever escapes `main` is reported
//! by the run harness.

use jvm_unwind::jvm::class_graph::{
    ClassData, ClassId, JavaClasses, LoaderId, MethodData, MethodId,
};
use jvm_unwind::jvm::{self, BinaryName, ClassAccessFlags, MethodAccessFlags, Name, UnqualifiedName};
use jvm_unwind::runtime::code::{CatchTarget, CodeHandle, MetadataBuilder};
use jvm_unwind::runtime::{
    Activation, BuiltinException, Error, ExceptionInit, HardwareFault, Resume, Runtime,
    ThreadContext,
};
use std::io;

pub type ScenarioFn =
    for<'g> fn(&Runtime<'g>, &JavaClasses<'g>, &mut ThreadContext<'g>) -> Result<(), Error>;

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub run: ScenarioFn,
}

pub static SCENARIOS: [Scenario; 6] = [
    Scenario {
        name: "uncaught",
        description: "null pointer fault three frames deep, caught nowhere",
        run: uncaught,
    },
    Scenario {
        name: "nested-catch",
        description: "divide by zero skipping a non-matching handler, caught by the caller",
        run: nested_catch,
    },
    Scenario {
        name: "synchronized",
        description: "fault in a synchronized method releases its monitor while unwinding",
        run: synchronized,
    },
    Scenario {
        name: "unresolved-catch",
        description: "catch clause naming a missing class turns into NoClassDefFoundError",
        run: unresolved_catch,
    },
    Scenario {
        name: "native",
        description: "exception raised in native code, rethrown in its compiled caller",
        run: native,
    },
    Scenario {
        name: "initializer",
        description: "static initializer failure wrapped in ExceptionInInitializerError",
        run: initializer,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|scenario| scenario.name == name)
}

/// `demo/Demo` and helpers to declare its methods
struct Demo<'r, 'g> {
    runtime: &'r Runtime<'g>,
    class: ClassId<'g>,
}

impl<'r, 'g> Demo<'r, 'g> {
    fn new(runtime: &'r Runtime<'g>, java: &JavaClasses<'g>) -> Result<Self, Error> {
        let name = BinaryName::from_string(String::from("demo/Demo"))
            .map_err(jvm::Error::MalformedName)?;
        let class = runtime.classes.add_class(
            ClassData::new(
                name,
                Some(java.lang.object),
                ClassAccessFlags::PUBLIC,
                LoaderId(1),
            )
            .with_source_file("Demo.java"),
        )?;
        Ok(Demo { runtime, class })
    }

    fn method(&self, name: &str, access_flags: MethodAccessFlags) -> Result<MethodId<'g>, Error> {
        let name =
            UnqualifiedName::from_string(name.to_owned()).map_err(jvm::Error::MalformedName)?;
        Ok(self.runtime.classes.add_method(MethodData {
            class: self.class,
            name,
            descriptor: String::from("()V"),
            access_flags,
        }))
    }

    fn install(&self, builder: MetadataBuilder<'g>) -> Result<CodeHandle, Error> {
        Ok(self.runtime.code.install(builder)?.code_handle())
    }

    fn trampoline(&self) -> Result<CodeHandle, Error> {
        self.install(MetadataBuilder::trampoline(16, 8))
    }

    /// `public static void main()`, calling out at offset 20 (line 4)
    fn main(
        &self,
        handlers: Vec<(usize, usize, usize, CatchTarget<'g>)>,
    ) -> Result<CodeHandle, Error> {
        let main = self.method("main", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC)?;
        let mut builder = MetadataBuilder::method(main, 64)
            .frame_size(4)
            .saved_registers(1, 0)
            .line(0, 3)
            .line(16, 4)
            .line(32, 5);
        for (start, end, handler, catch_type) in handlers {
            builder = builder.handler(start, end, handler, catch_type);
        }
        self.install(builder)
    }
}

/// Offset of the call instruction's return address in `main`
const MAIN_CALL_RETURN: usize = 20;

fn start<'g>(
    runtime: &Runtime<'g>,
    thread: &mut ThreadContext<'g>,
    demo: &Demo<'_, 'g>,
    main: CodeHandle,
) -> Result<Activation, Error> {
    let trampoline = demo.trampoline()?;
    let entered = runtime.enter(thread, trampoline)?;
    runtime.call(thread, entered, 4, main)
}

fn report_caught(runtime: &Runtime<'_>, caught: Resume) -> Result<(), Error> {
    let handler = runtime.code.lookup(caught.pc).ok_or(Error::UnmappedPc(caught.pc))?;
    let method = match handler.method() {
        Some(method) => method.name.as_str().to_owned(),
        None => String::from("<stub>"),
    };
    println!(
        "Caught {} in {} (handler at line {})",
        runtime.heap.describe(caught.exception)?,
        method,
        handler.line_for_pc(caught.pc)
    );
    runtime.print_stack_trace(caught.exception, &mut io::stdout().lock())
}

fn uncaught<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let main = demo.main(vec![])?;
    let a = demo.method("a", MethodAccessFlags::STATIC)?;
    let a = demo.install(MetadataBuilder::method(a, 32).frame_size(3).line(0, 7).line(8, 8))?;
    let b = demo.method("b", MethodAccessFlags::STATIC)?;
    let b = demo.install(
        MetadataBuilder::method(b, 16)
            .frame_size(2)
            .leaf(true)
            .line(0, 12)
            .line(4, 13),
    )?;

    let main = start(runtime, thread, &demo, main)?;
    let a = runtime.call(thread, main, MAIN_CALL_RETURN, a)?;
    let b = runtime.call(thread, a, 12, b)?;
    let resume =
        runtime.handle_hardware_fault(thread, HardwareFault::NULL_POINTER, 0, b.pc(6), b.sp);
    log::info!("Returned to native code: {}", resume.at_trampoline);
    Ok(())
}

fn nested_catch<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let arithmetic = BinaryName::ARITHMETICEXCEPTION;
    let main = demo.main(vec![(16, 24, 40, CatchTarget::Symbolic(arithmetic))])?;
    let divide = demo.method("divide", MethodAccessFlags::STATIC)?;
    let divide = demo.install(
        MetadataBuilder::method(divide, 32)
            .frame_size(2)
            .saved_registers(1, 0)
            .line(0, 9)
            .handler(0, 16, 24, CatchTarget::Class(java.lang.null_pointer_exception)),
    )?;

    let main = start(runtime, thread, &demo, main)?;
    let divide = runtime.call(thread, main, MAIN_CALL_RETURN, divide)?;
    let caught = runtime.handle_hardware_fault(
        thread,
        HardwareFault::DIVIDE_BY_ZERO,
        0,
        divide.pc(4),
        divide.sp,
    );
    report_caught(runtime, caught)
}

fn synchronized<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let main = demo.main(vec![(16, 24, 40, CatchTarget::Class(java.lang.throwable))])?;
    let increment = demo.method(
        "increment",
        MethodAccessFlags::STATIC | MethodAccessFlags::SYNCHRONIZED,
    )?;
    let increment = demo.install(
        MetadataBuilder::method(increment, 32)
            .frame_size(4)
            .synchronized(8)
            .line(0, 15),
    )?;
    let lock = runtime.heap.allocate(java.lang.object);

    let main = start(runtime, thread, &demo, main)?;
    let increment = runtime.call_synchronized(thread, main, MAIN_CALL_RETURN, increment, lock)?;
    println!("Monitor before: {:?}", runtime.heap.object(lock)?.monitor_state());
    let caught = runtime.handle_hardware_fault(
        thread,
        HardwareFault::NULL_POINTER,
        0,
        increment.pc(8),
        increment.sp,
    );
    println!("Monitor after: {:?}", runtime.heap.object(lock)?.monitor_state());
    report_caught(runtime, caught)
}

fn unresolved_catch<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let missing = BinaryName::from_string(String::from("demo/Missing"))
        .map_err(jvm::Error::MalformedName)?;
    let main = demo.main(vec![(16, 24, 40, CatchTarget::Symbolic(missing))])?;
    let get = demo.method("get", MethodAccessFlags::STATIC)?;
    let get = demo.install(MetadataBuilder::method(get, 16).frame_size(2).line(0, 20))?;

    let main = start(runtime, thread, &demo, main)?;
    let get = runtime.call(thread, main, MAIN_CALL_RETURN, get)?;
    runtime.handle_hardware_fault(thread, HardwareFault::ARRAY_BOUNDS, 5, get.pc(4), get.sp);
    Ok(())
}

fn native<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let main = demo.main(vec![(16, 24, 40, CatchTarget::Any)])?;
    let check = demo.method(
        "check",
        MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
    )?;
    let stub = demo.install(MetadataBuilder::native_stub(check, 16).frame_size(2))?;

    let main = start(runtime, thread, &demo, main)?;
    let mut native = runtime.call_native(thread, main, MAIN_CALL_RETURN, Some(stub))?;
    runtime.throw_exception(
        &mut native,
        BuiltinException::IllegalArgumentException,
        ExceptionInit::Message(String::from("negative input")),
    )?;
    native.finish()?;

    // Back in compiled code, which checks for a pending exception after the call
    if let Some(exception) = thread.take_pending_exception() {
        let call_site = runtime.settings.architecture.call_site(main.pc(MAIN_CALL_RETURN));
        let caught = runtime.throw(thread, exception, call_site, main.sp);
        report_caught(runtime, caught)?;
    }
    Ok(())
}

fn initializer<'g>(
    runtime: &Runtime<'g>,
    java: &JavaClasses<'g>,
    thread: &mut ThreadContext<'g>,
) -> Result<(), Error> {
    let demo = Demo::new(runtime, java)?;
    let main = demo.main(vec![])?;
    let clinit = demo.method("<clinit>", MethodAccessFlags::STATIC)?;
    let clinit = demo.install(MetadataBuilder::method(clinit, 16).frame_size(2).line(0, 30))?;

    let main = start(runtime, thread, &demo, main)?;

    // The runtime initializes the class from native code, calling back into compiled code
    let mut native = runtime.call_native(thread, main, MAIN_CALL_RETURN, None)?;
    let trampoline = demo.trampoline()?;
    let entered = runtime.enter(&mut native, trampoline)?;
    let clinit = runtime.call(&mut native, entered, 4, clinit)?;
    let resume = runtime.handle_hardware_fault(
        &mut native,
        HardwareFault::DIVIDE_BY_ZERO,
        0,
        clinit.pc(2),
        clinit.sp,
    );
    if resume.at_trampoline {
        if let Some(cause) = native.take_pending_exception() {
            runtime.throw_exception(
                &mut native,
                BuiltinException::ExceptionInInitializerError,
                ExceptionInit::Target(cause),
            )?;
        }
    }
    native.finish()?;

    if let Some(exception) = thread.take_pending_exception() {
        let call_site = runtime.settings.architecture.call_site(main.pc(MAIN_CALL_RETURN));
        runtime.throw(thread, exception, call_site, main.sp);
    }
    Ok(())
}
