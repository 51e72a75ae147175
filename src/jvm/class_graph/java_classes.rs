use super::{BinaryName, ClassAccessFlags, ClassData, ClassGraph, ClassId, LoaderId};
use crate::jvm::Error;

/// Classes inside `java.*` that the runtime depends on
pub struct JavaClasses<'g> {
    pub lang: LangClasses<'g>,
    pub io: IoClasses<'g>,
    pub reflect: ReflectClasses<'g>,
}

/// Classes inside `java.lang.*`
pub struct LangClasses<'g> {
    pub object: ClassId<'g>,
    pub cloneable: ClassId<'g>,
    pub string: ClassId<'g>,
    pub class: ClassId<'g>,
    pub thread: ClassId<'g>,

    pub throwable: ClassId<'g>,
    pub exception: ClassId<'g>,
    pub runtime_exception: ClassId<'g>,
    pub arithmetic_exception: ClassId<'g>,
    pub array_store_exception: ClassId<'g>,
    pub class_cast_exception: ClassId<'g>,
    pub illegal_argument_exception: ClassId<'g>,
    pub illegal_monitor_state_exception: ClassId<'g>,
    pub index_out_of_bounds_exception: ClassId<'g>,
    pub array_index_out_of_bounds_exception: ClassId<'g>,
    pub negative_array_size_exception: ClassId<'g>,
    pub null_pointer_exception: ClassId<'g>,
    pub reflective_operation_exception: ClassId<'g>,
    pub class_not_found_exception: ClassId<'g>,

    pub error: ClassId<'g>,
    pub linkage_error: ClassId<'g>,
    pub no_class_def_found_error: ClassId<'g>,
    pub exception_in_initializer_error: ClassId<'g>,
    pub incompatible_class_change_error: ClassId<'g>,
    pub abstract_method_error: ClassId<'g>,
    pub no_such_field_error: ClassId<'g>,
    pub no_such_method_error: ClassId<'g>,
    pub virtual_machine_error: ClassId<'g>,
    pub internal_error: ClassId<'g>,
    pub out_of_memory_error: ClassId<'g>,
    pub stack_overflow_error: ClassId<'g>,
}

/// Classes inside `java.io.*`
pub struct IoClasses<'g> {
    pub serializable: ClassId<'g>,
}

/// Classes inside `java.lang.reflect.*`
pub struct ReflectClasses<'g> {
    pub invocation_target_exception: ClassId<'g>,
}

impl<'g> JavaClasses<'g> {
    pub fn add_to_graph(class_graph: &ClassGraph<'g>) -> Result<JavaClasses<'g>, Error> {
        let object = add_bootstrap_class(class_graph, BinaryName::OBJECT, None)?;
        let io = IoClasses::add_to_graph(class_graph, object)?;
        let lang = LangClasses::add_to_graph(class_graph, object, &io)?;
        let reflect = ReflectClasses::add_to_graph(class_graph, &lang)?;

        Ok(JavaClasses { lang, io, reflect })
    }
}

impl<'g> IoClasses<'g> {
    pub fn add_to_graph(
        class_graph: &ClassGraph<'g>,
        object: ClassId<'g>,
    ) -> Result<IoClasses<'g>, Error> {
        let serializable = class_graph.add_class(
            ClassData::new(
                BinaryName::SERIALIZABLE,
                Some(object),
                ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
                LoaderId::BOOTSTRAP,
            )
            .with_source_file("Serializable.java"),
        )?;

        Ok(IoClasses { serializable })
    }
}

impl<'g> LangClasses<'g> {
    pub fn add_to_graph(
        class_graph: &ClassGraph<'g>,
        object: ClassId<'g>,
        io: &IoClasses<'g>,
    ) -> Result<LangClasses<'g>, Error> {
        let class = |name: BinaryName, superclass: ClassId<'g>| {
            add_bootstrap_class(class_graph, name, Some(superclass))
        };

        let cloneable = class_graph.add_class(
            ClassData::new(
                BinaryName::CLONEABLE,
                Some(object),
                ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
                LoaderId::BOOTSTRAP,
            )
            .with_source_file("Cloneable.java"),
        )?;
        let string = class(BinaryName::STRING, object)?;
        string.interfaces.push(io.serializable);
        let class_cls = class(BinaryName::CLASS, object)?;
        let thread = class(BinaryName::THREAD, object)?;

        let throwable = class(BinaryName::THROWABLE, object)?;
        throwable.interfaces.push(io.serializable);

        let exception = class(BinaryName::EXCEPTION, throwable)?;
        let runtime_exception = class(BinaryName::RUNTIMEEXCEPTION, exception)?;
        let index_out_of_bounds_exception =
            class(BinaryName::INDEXOUTOFBOUNDSEXCEPTION, runtime_exception)?;
        let reflective_operation_exception =
            class(BinaryName::REFLECTIVEOPERATIONEXCEPTION, exception)?;

        let error = class(BinaryName::ERROR, throwable)?;
        let linkage_error = class(BinaryName::LINKAGEERROR, error)?;
        let incompatible_class_change_error =
            class(BinaryName::INCOMPATIBLECLASSCHANGEERROR, linkage_error)?;
        let virtual_machine_error = class(BinaryName::VIRTUALMACHINEERROR, error)?;

        Ok(LangClasses {
            object,
            cloneable,
            string,
            class: class_cls,
            thread,
            throwable,
            exception,
            runtime_exception,
            arithmetic_exception: class(BinaryName::ARITHMETICEXCEPTION, runtime_exception)?,
            array_store_exception: class(BinaryName::ARRAYSTOREEXCEPTION, runtime_exception)?,
            class_cast_exception: class(BinaryName::CLASSCASTEXCEPTION, runtime_exception)?,
            illegal_argument_exception: class(
                BinaryName::ILLEGALARGUMENTEXCEPTION,
                runtime_exception,
            )?,
            illegal_monitor_state_exception: class(
                BinaryName::ILLEGALMONITORSTATEEXCEPTION,
                runtime_exception,
            )?,
            index_out_of_bounds_exception,
            array_index_out_of_bounds_exception: class(
                BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION,
                index_out_of_bounds_exception,
            )?,
            negative_array_size_exception: class(
                BinaryName::NEGATIVEARRAYSIZEEXCEPTION,
                runtime_exception,
            )?,
            null_pointer_exception: class(BinaryName::NULLPOINTEREXCEPTION, runtime_exception)?,
            reflective_operation_exception,
            class_not_found_exception: class(
                BinaryName::CLASSNOTFOUNDEXCEPTION,
                reflective_operation_exception,
            )?,
            error,
            linkage_error,
            no_class_def_found_error: class(BinaryName::NOCLASSDEFFOUNDERROR, linkage_error)?,
            exception_in_initializer_error: class(
                BinaryName::EXCEPTIONININITIALIZERERROR,
                linkage_error,
            )?,
            incompatible_class_change_error,
            abstract_method_error: class(
                BinaryName::ABSTRACTMETHODERROR,
                incompatible_class_change_error,
            )?,
            no_such_field_error: class(
                BinaryName::NOSUCHFIELDERROR,
                incompatible_class_change_error,
            )?,
            no_such_method_error: class(
                BinaryName::NOSUCHMETHODERROR,
                incompatible_class_change_error,
            )?,
            virtual_machine_error,
            internal_error: class(BinaryName::INTERNALERROR, virtual_machine_error)?,
            out_of_memory_error: class(BinaryName::OUTOFMEMORYERROR, virtual_machine_error)?,
            stack_overflow_error: class(BinaryName::STACKOVERFLOWERROR, virtual_machine_error)?,
        })
    }
}

impl<'g> ReflectClasses<'g> {
    pub fn add_to_graph(
        class_graph: &ClassGraph<'g>,
        lang: &LangClasses<'g>,
    ) -> Result<ReflectClasses<'g>, Error> {
        let invocation_target_exception = add_bootstrap_class(
            class_graph,
            BinaryName::INVOCATIONTARGETEXCEPTION,
            Some(lang.reflective_operation_exception),
        )?;

        Ok(ReflectClasses {
            invocation_target_exception,
        })
    }
}

fn add_bootstrap_class<'g>(
    class_graph: &ClassGraph<'g>,
    name: BinaryName,
    superclass: Option<ClassId<'g>>,
) -> Result<ClassId<'g>, Error> {
    let source_file = format!("{}.java", name.simple_name());
    class_graph.add_class(
        ClassData::new(
            name,
            superclass,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            LoaderId::BOOTSTRAP,
        )
        .with_source_file(source_file),
    )
}
