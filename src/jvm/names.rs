use std::borrow::Cow;
use std::fmt::{Debug, Error as FmtError, Formatter};

/// Names of methods and fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces, in internal form (eg. `java/lang/Object`)
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extract the raw underlying string data
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extract the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if (name.contains('<') || name.contains('>'))
            && name != "<init>"
            && name != "<clinit>"
        {
            Err(format!(
                "Unqualified name '{}' can only use angle brackets for '<init>' or '<clinit>'",
                name
            ))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else {
            name.split('/').try_for_each(UnqualifiedName::check_valid)
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
    pub const FILLINSTACKTRACE: Self = Self::name("fillInStackTrace");
    pub const MAIN: Self = Self::name("main");
    pub const RUN: Self = Self::name("run");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    /// Name as it appears in Java source and in stack traces (eg. `java.lang.Object`)
    pub fn to_java_name(&self) -> String {
        self.as_str().replace('/', ".")
    }

    /// Last segment of the name (eg. `Object` for `java/lang/Object`)
    pub fn simple_name(&self) -> &str {
        let name = self.as_str();
        match name.rfind('/') {
            Some(idx) => &name[idx + 1..],
            None => name,
        }
    }

    // Core library
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const THREAD: Self = Self::name("java/lang/Thread");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");

    // Throwable hierarchy
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
    pub const ERROR: Self = Self::name("java/lang/Error");
    pub const EXCEPTION: Self = Self::name("java/lang/Exception");
    pub const RUNTIMEEXCEPTION: Self = Self::name("java/lang/RuntimeException");

    pub const ARITHMETICEXCEPTION: Self = Self::name("java/lang/ArithmeticException");
    pub const ARRAYINDEXOUTOFBOUNDSEXCEPTION: Self =
        Self::name("java/lang/ArrayIndexOutOfBoundsException");
    pub const ARRAYSTOREEXCEPTION: Self = Self::name("java/lang/ArrayStoreException");
    pub const CLASSCASTEXCEPTION: Self = Self::name("java/lang/ClassCastException");
    pub const CLASSNOTFOUNDEXCEPTION: Self = Self::name("java/lang/ClassNotFoundException");
    pub const ILLEGALARGUMENTEXCEPTION: Self = Self::name("java/lang/IllegalArgumentException");
    pub const ILLEGALMONITORSTATEEXCEPTION: Self =
        Self::name("java/lang/IllegalMonitorStateException");
    pub const INDEXOUTOFBOUNDSEXCEPTION: Self = Self::name("java/lang/IndexOutOfBoundsException");
    pub const INVOCATIONTARGETEXCEPTION: Self =
        Self::name("java/lang/reflect/InvocationTargetException");
    pub const NEGATIVEARRAYSIZEEXCEPTION: Self =
        Self::name("java/lang/NegativeArraySizeException");
    pub const NULLPOINTEREXCEPTION: Self = Self::name("java/lang/NullPointerException");
    pub const REFLECTIVEOPERATIONEXCEPTION: Self =
        Self::name("java/lang/ReflectiveOperationException");

    pub const ABSTRACTMETHODERROR: Self = Self::name("java/lang/AbstractMethodError");
    pub const EXCEPTIONININITIALIZERERROR: Self =
        Self::name("java/lang/ExceptionInInitializerError");
    pub const INCOMPATIBLECLASSCHANGEERROR: Self =
        Self::name("java/lang/IncompatibleClassChangeError");
    pub const INTERNALERROR: Self = Self::name("java/lang/InternalError");
    pub const LINKAGEERROR: Self = Self::name("java/lang/LinkageError");
    pub const NOCLASSDEFFOUNDERROR: Self = Self::name("java/lang/NoClassDefFoundError");
    pub const NOSUCHFIELDERROR: Self = Self::name("java/lang/NoSuchFieldError");
    pub const NOSUCHMETHODERROR: Self = Self::name("java/lang/NoSuchMethodError");
    pub const OUTOFMEMORYERROR: Self = Self::name("java/lang/OutOfMemoryError");
    pub const STACKOVERFLOWERROR: Self = Self::name("java/lang/StackOverflowError");
    pub const VIRTUALMACHINEERROR: Self = Self::name("java/lang/VirtualMachineError");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validates_names() {
        assert!(BinaryName::from_string(String::from("foo/bar/Baz")).is_ok());
        assert!(BinaryName::from_string(String::from("foo//Baz")).is_err());
        assert!(BinaryName::from_string(String::from("")).is_err());
        assert!(UnqualifiedName::from_string(String::from("run")).is_ok());
        assert!(UnqualifiedName::from_string(String::from("a.b")).is_err());
        assert!(UnqualifiedName::from_string(String::from("<init>")).is_ok());
        assert!(UnqualifiedName::from_string(String::from("<main>")).is_err());
    }

    #[test]
    fn java_names() {
        assert_eq!(
            BinaryName::NULLPOINTEREXCEPTION.to_java_name(),
            "java.lang.NullPointerException"
        );
        assert_eq!(BinaryName::INVOCATIONTARGETEXCEPTION.simple_name(), "InvocationTargetException");
        let top_level = BinaryName::from_string(String::from("Main")).unwrap();
        assert_eq!(top_level.simple_name(), "Main");
        assert_eq!(top_level.to_java_name(), "Main");
    }
}
