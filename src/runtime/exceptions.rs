//! Exceptions the runtime raises on its own behalf
//!
//! Java code never sees these being constructed: they appear as if thrown from the frame that was
//! running (a faulting instruction, a call into the runtime). Their stack trace is therefore
//! captured from the frame descriptor chain at construction.

use super::{Address, Error, FatalError, LoadError, ObjectHandle, Resume, Runtime, ThreadContext};
use crate::jvm::class_graph::{ClassId, LoaderId, MethodId};
use crate::jvm::{BinaryName, Name};

/// Classes of the exceptions the runtime creates itself
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinException {
    Throwable,
    ArithmeticException,
    ArrayIndexOutOfBoundsException,
    ArrayStoreException,
    ClassCastException,
    ClassNotFoundException,
    IllegalArgumentException,
    IllegalMonitorStateException,
    NegativeArraySizeException,
    NullPointerException,
    InvocationTargetException,
    AbstractMethodError,
    ExceptionInInitializerError,
    IncompatibleClassChangeError,
    InternalError,
    LinkageError,
    NoClassDefFoundError,
    NoSuchFieldError,
    NoSuchMethodError,
    OutOfMemoryError,
    StackOverflowError,
}

impl BuiltinException {
    pub fn class_name(self) -> BinaryName {
        match self {
            BuiltinException::Throwable => BinaryName::THROWABLE,
            BuiltinException::ArithmeticException => BinaryName::ARITHMETICEXCEPTION,
            BuiltinException::ArrayIndexOutOfBoundsException => {
                BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION
            }
            BuiltinException::ArrayStoreException => BinaryName::ARRAYSTOREEXCEPTION,
            BuiltinException::ClassCastException => BinaryName::CLASSCASTEXCEPTION,
            BuiltinException::ClassNotFoundException => BinaryName::CLASSNOTFOUNDEXCEPTION,
            BuiltinException::IllegalArgumentException => BinaryName::ILLEGALARGUMENTEXCEPTION,
            BuiltinException::IllegalMonitorStateException => {
                BinaryName::ILLEGALMONITORSTATEEXCEPTION
            }
            BuiltinException::NegativeArraySizeException => {
                BinaryName::NEGATIVEARRAYSIZEEXCEPTION
            }
            BuiltinException::NullPointerException => BinaryName::NULLPOINTEREXCEPTION,
            BuiltinException::InvocationTargetException => BinaryName::INVOCATIONTARGETEXCEPTION,
            BuiltinException::AbstractMethodError => BinaryName::ABSTRACTMETHODERROR,
            BuiltinException::ExceptionInInitializerError => {
                BinaryName::EXCEPTIONININITIALIZERERROR
            }
            BuiltinException::IncompatibleClassChangeError => {
                BinaryName::INCOMPATIBLECLASSCHANGEERROR
            }
            BuiltinException::InternalError => BinaryName::INTERNALERROR,
            BuiltinException::LinkageError => BinaryName::LINKAGEERROR,
            BuiltinException::NoClassDefFoundError => BinaryName::NOCLASSDEFFOUNDERROR,
            BuiltinException::NoSuchFieldError => BinaryName::NOSUCHFIELDERROR,
            BuiltinException::NoSuchMethodError => BinaryName::NOSUCHMETHODERROR,
            BuiltinException::OutOfMemoryError => BinaryName::OUTOFMEMORYERROR,
            BuiltinException::StackOverflowError => BinaryName::STACKOVERFLOWERROR,
        }
    }

    /// Without these classes the runtime cannot even report that something is missing
    pub fn is_bootstrap_critical(self) -> bool {
        matches!(
            self,
            BuiltinException::Throwable
                | BuiltinException::OutOfMemoryError
                | BuiltinException::NoClassDefFoundError
                | BuiltinException::InternalError
        )
    }
}

/// Constructor arguments of a runtime-created exception
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExceptionInit {
    /// No detail message
    None,

    /// Detail message
    Message(String),

    /// Offending array index (`Array index out of range: <index>`)
    Index(i32),

    /// Wrap a cause, using its description as the detail message
    Cause(ObjectHandle),

    /// Wrap a cause without a detail message (initializer errors, invocation targets)
    Target(ObjectHandle),

    /// Detail message assembled by the runtime
    Utf(Utf8Buffer),
}

/// Detail message assembled from raw names
///
/// Class and member names come straight from the class graph, in their internal form. They are
/// put in the form Java code expects (`java.lang.Object` rather than `java/lang/Object`) as they
/// are appended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Utf8Buffer {
    bytes: Vec<u8>,
}

impl Utf8Buffer {
    pub fn new() -> Utf8Buffer {
        Utf8Buffer { bytes: vec![] }
    }

    pub fn push_str(mut self, text: &str) -> Self {
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    /// Append bytes that should be, but may not be, valid UTF-8
    pub fn push_utf8(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn push_class_name(self, name: &BinaryName) -> Self {
        self.push_str(&name.to_java_name())
    }

    /// Append `pkg.Class.name` followed by the method descriptor
    pub fn push_method(self, method: MethodId<'_>) -> Self {
        self.push_class_name(&method.class.name)
            .push_str(".")
            .push_str(method.name.as_str())
            .push_str(&method.descriptor)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the message, replacing invalid sequences
    pub fn into_string(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(message) => message,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }
}

/// Hardware fault delivered to compiled code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HardwareFault {
    NullPointer,
    DivideByZero,

    /// Index out of the bounds of an array
    ArrayBounds(i32),

    /// Failed checked cast of this object
    ClassCast(Option<ObjectHandle>),

    NegativeArraySize(i32),
    StackOverflow,
}

impl HardwareFault {
    pub const NULL_POINTER: usize = 0;
    pub const DIVIDE_BY_ZERO: usize = 1;
    pub const ARRAY_BOUNDS: usize = 2;
    pub const CLASS_CAST: usize = 3;
    pub const NEGATIVE_ARRAY_SIZE: usize = 4;
    pub const STACK_OVERFLOW: usize = 5;

    /// Fault from the code and value a fault handler receives
    pub fn decode(code: usize, value: usize) -> Option<HardwareFault> {
        match code {
            Self::NULL_POINTER => Some(HardwareFault::NullPointer),
            Self::DIVIDE_BY_ZERO => Some(HardwareFault::DivideByZero),
            Self::ARRAY_BOUNDS => Some(HardwareFault::ArrayBounds(value as i32)),
            Self::CLASS_CAST => Some(HardwareFault::ClassCast(ObjectHandle::from_word(value))),
            Self::NEGATIVE_ARRAY_SIZE => Some(HardwareFault::NegativeArraySize(value as i32)),
            Self::STACK_OVERFLOW => Some(HardwareFault::StackOverflow),
            _ => None,
        }
    }
}

impl<'g> Runtime<'g> {
    /// Create one of the runtime's own exceptions
    ///
    /// If the exception class is unavailable, the exception describing that failure is returned
    /// instead (whatever is already pending, or else a `NoClassDefFoundError`). Failing to load a
    /// class needed to report errors at all is fatal.
    pub fn new_exception(
        &self,
        thread: &ThreadContext<'g>,
        kind: BuiltinException,
        init: ExceptionInit,
    ) -> Result<ObjectHandle, Error> {
        let class = self
            .loader
            .load_bootstrap(&kind.class_name())
            .and_then(|class| self.loader.link(class).map(|()| class));
        match class {
            Ok(class) => self.instantiate(thread, class, init),
            Err(err) => self.exception_class_unavailable(thread, err, kind.is_bootstrap_critical()),
        }
    }

    /// Create an exception of a class visible to `loader`
    pub fn new_exception_by_name(
        &self,
        thread: &ThreadContext<'g>,
        name: &BinaryName,
        loader: LoaderId,
        init: ExceptionInit,
    ) -> Result<ObjectHandle, Error> {
        let class = self
            .loader
            .resolve(name, loader)
            .and_then(|class| self.loader.link(class).map(|()| class));
        match class {
            Ok(class) => self.instantiate(thread, class, init),
            Err(err) => self.exception_class_unavailable(thread, err, false),
        }
    }

    /// Create one of the runtime's own exceptions and make it pending
    pub fn throw_exception(
        &self,
        thread: &mut ThreadContext<'g>,
        kind: BuiltinException,
        init: ExceptionInit,
    ) -> Result<ObjectHandle, Error> {
        let exception = self.new_exception(thread, kind, init)?;
        thread.set_pending_exception(exception);
        Ok(exception)
    }

    /// Raise an error naming a method that cannot be called (eg. `AbstractMethodError`)
    ///
    /// The message is the method's class, name and descriptor, as in `app.Main.run()V`.
    pub fn throw_method_error(
        &self,
        thread: &mut ThreadContext<'g>,
        kind: BuiltinException,
        method: MethodId<'g>,
    ) -> Result<ObjectHandle, Error> {
        let message = Utf8Buffer::new().push_method(method);
        self.throw_exception(thread, kind, ExceptionInit::Utf(message))
    }

    fn exception_class_unavailable(
        &self,
        thread: &ThreadContext<'g>,
        err: LoadError,
        critical: bool,
    ) -> Result<ObjectHandle, Error> {
        log::warn!("Exception class unavailable: {:?}", err);
        let message = match err {
            LoadError::NotFound(name) if critical => self.fatal(FatalError::Bootstrap(name)),
            LoadError::LinkFailed { class, .. } if critical => {
                self.fatal(FatalError::Bootstrap(class))
            }
            LoadError::NotFound(name) => name.as_str().to_owned(),
            LoadError::LinkFailed { class, reason } => {
                format!("{}: {}", class.to_java_name(), reason)
            }
        };

        match thread.pending_exception() {
            Some(pending) => Ok(pending),
            None => self.new_exception(
                thread,
                BuiltinException::NoClassDefFoundError,
                ExceptionInit::Message(message),
            ),
        }
    }

    fn instantiate(
        &self,
        thread: &ThreadContext<'g>,
        class: ClassId<'g>,
        init: ExceptionInit,
    ) -> Result<ObjectHandle, Error> {
        if !class.is_throwable() {
            return Err(Error::NotThrowable(class.name.clone()));
        }

        let handle = self.heap.allocate(class);
        let object = self.heap.object(handle)?;
        match init {
            ExceptionInit::None => (),
            ExceptionInit::Message(message) => object.set_detail_message(Some(message)),
            ExceptionInit::Index(index) => {
                object.set_detail_message(Some(format!("Array index out of range: {}", index)));
                object.set_payload(Some(index));
            }
            ExceptionInit::Cause(cause) => {
                object.set_detail_message(Some(self.heap.describe(cause)?));
                object.set_cause(Some(cause));
            }
            ExceptionInit::Target(cause) => {
                self.heap.object(cause)?;
                object.set_cause(Some(cause));
            }
            ExceptionInit::Utf(buffer) => object.set_detail_message(Some(buffer.into_string())),
        }

        object.attach_stack_trace(self.capture(thread)?);
        log::debug!("Created {}", self.heap.describe(handle)?);
        Ok(handle)
    }

    /// Exception a hardware fault turns into
    pub fn fault_exception(
        &self,
        thread: &ThreadContext<'g>,
        fault: HardwareFault,
    ) -> Result<ObjectHandle, Error> {
        let (kind, init) = match fault {
            HardwareFault::NullPointer => {
                (BuiltinException::NullPointerException, ExceptionInit::None)
            }
            HardwareFault::DivideByZero => (
                BuiltinException::ArithmeticException,
                ExceptionInit::Message(String::from("/ by zero")),
            ),
            HardwareFault::ArrayBounds(index) => (
                BuiltinException::ArrayIndexOutOfBoundsException,
                ExceptionInit::Index(index),
            ),
            HardwareFault::ClassCast(object) => {
                let init = match object {
                    Some(object) => ExceptionInit::Utf(
                        Utf8Buffer::new().push_class_name(&self.heap.object(object)?.class.name),
                    ),
                    None => ExceptionInit::None,
                };
                (BuiltinException::ClassCastException, init)
            }
            HardwareFault::NegativeArraySize(size) => (
                BuiltinException::NegativeArraySizeException,
                ExceptionInit::Message(size.to_string()),
            ),
            HardwareFault::StackOverflow => {
                (BuiltinException::StackOverflowError, ExceptionInit::None)
            }
        };
        self.new_exception(thread, kind, init)
    }

    /// Entry point of fault handlers: raise the exception for a fault at `xpc` and dispatch it
    ///
    /// The faulting frame is described by an extern frame descriptor while the exception is
    /// created, so that its trace starts at the faulting instruction. Unknown fault codes are
    /// fatal.
    pub fn handle_hardware_fault(
        &self,
        thread: &mut ThreadContext<'g>,
        code: usize,
        value: usize,
        xpc: Address,
        sp: Address,
    ) -> Resume {
        let fault = match HardwareFault::decode(code, value) {
            Some(fault) => fault,
            None => self.fatal(FatalError::UnknownFault(code)),
        };
        log::debug!("{:?} at {:?}", fault, xpc);

        let exception = self
            .extern_scope(thread, None, sp, None, xpc)
            .and_then(|scope| {
                let exception = self.fault_exception(&scope, fault);
                scope.finish()?;
                exception
            });
        match exception {
            Ok(exception) => self.throw(thread, exception, xpc, sp),
            Err(err) => self.fatal(FatalError::InvalidStack(err)),
        }
    }
}
