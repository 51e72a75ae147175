use super::exception_table::{encode_resolved, encode_unresolved, CatchTarget, CATCH_ALL_WORD};
use super::{CodeHandle, CodeInfo, CodeKind, CodeRegion, CodeRegistry, ExceptionEntry};
use crate::jvm::class_graph::MethodId;
use crate::jvm::BinaryName;
use crate::runtime::arch::FrameShape;
use crate::runtime::{
    Address, Error, CALLEE_SAVED_FLOAT_REGISTERS, CALLEE_SAVED_INT_REGISTERS, WORD_SIZE,
};
use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Result as IoResult;

// Byte offsets of the header fields, counted down from the entry point
pub const CODE_OBJECT_OFFSET: usize = 8;
pub const FRAME_SIZE_OFFSET: usize = 16;
pub const FLAGS_OFFSET: usize = 24;
pub const SYNC_SLOT_OFFSET: usize = 32;
pub const INT_SAVED_OFFSET: usize = 40;
pub const FLOAT_SAVED_OFFSET: usize = 48;
pub const LINE_TABLE_START_OFFSET: usize = 56;
pub const LINE_TABLE_LENGTH_OFFSET: usize = 64;
pub const EXCEPTION_COUNT_OFFSET: usize = 72;

/// Words in the fixed part of the metadata
pub const METADATA_HEADER_WORDS: usize = EXCEPTION_COUNT_OFFSET / WORD_SIZE;

/// Words per exception-table entry: start, end, handler, catch type
pub const EXCEPTION_ENTRY_WORDS: usize = 4;

/// Words per line-number table entry: pc, line
pub const LINE_ENTRY_WORDS: usize = 2;

/// Byte offset below the entry point of exception-table entry `index`
pub fn exception_entry_offset(index: usize) -> usize {
    EXCEPTION_COUNT_OFFSET + EXCEPTION_ENTRY_WORDS * WORD_SIZE * (index + 1)
}

bitflags! {
    /// Flags word of the metadata
    pub struct MetadataFlags: usize {
        const SYNCHRONIZED = 0x1;
        const LEAF = 0x2;
    }
}

/// Method Metadata Block: typed view of the metadata in front of an entry point
///
/// This is only a view: the words themselves live in the code region. Apart from the catch-type
/// words of the exception table (see [`ExceptionEntry::cache_resolved`]) they never change after
/// installation.
#[derive(Copy, Clone)]
pub struct MethodMetadata<'r, 'g> {
    pub(super) registry: &'r CodeRegistry<'g>,
    pub(super) code: &'r CodeInfo<'g>,
    pub(super) region: &'r CodeRegion,
}

impl<'r, 'g> MethodMetadata<'r, 'g> {
    fn word(&self, offset: usize) -> usize {
        self.region
            .read(self.region.entry - offset)
            .expect("metadata header inside its region")
    }

    /// Code object owning the region
    pub fn code(&self) -> &'r CodeInfo<'g> {
        self.code
    }

    pub fn registry(&self) -> &'r CodeRegistry<'g> {
        self.registry
    }

    pub(super) fn region(&self) -> &'r CodeRegion {
        self.region
    }

    pub fn method(&self) -> Option<MethodId<'g>> {
        self.code.method
    }

    pub fn entry(&self) -> Address {
        self.region.entry
    }

    pub fn end(&self) -> Address {
        self.region.end
    }

    /// Is the program counter inside the code (not the metadata) of the region?
    pub fn contains(&self, pc: Address) -> bool {
        self.region.entry <= pc && pc < self.region.end
    }

    /// Back-pointer to the owning code object
    pub fn code_handle(&self) -> CodeHandle {
        CodeHandle(self.word(CODE_OBJECT_OFFSET))
    }

    /// Frame size, in words
    pub fn frame_size(&self) -> usize {
        self.word(FRAME_SIZE_OFFSET)
    }

    pub fn flags(&self) -> MetadataFlags {
        MetadataFlags::from_bits_truncate(self.word(FLAGS_OFFSET))
    }

    pub fn is_synchronized(&self) -> bool {
        self.flags().contains(MetadataFlags::SYNCHRONIZED)
    }

    pub fn is_leaf(&self) -> bool {
        self.flags().contains(MetadataFlags::LEAF)
    }

    /// Offset in bytes from the stack pointer of the slot holding the lock object
    pub fn sync_slot_offset(&self) -> Option<usize> {
        if self.is_synchronized() {
            Some(self.word(SYNC_SLOT_OFFSET))
        } else {
            None
        }
    }

    pub fn int_saved_count(&self) -> usize {
        self.word(INT_SAVED_OFFSET)
    }

    pub fn float_saved_count(&self) -> usize {
        self.word(FLOAT_SAVED_OFFSET)
    }

    pub fn frame_shape(&self) -> FrameShape {
        FrameShape {
            frame_size: self.frame_size(),
            leaf: self.is_leaf(),
            int_saved: self.int_saved_count(),
            float_saved: self.float_saved_count(),
        }
    }

    pub fn line_table_start(&self) -> Address {
        Address(self.word(LINE_TABLE_START_OFFSET))
    }

    pub fn line_table_len(&self) -> usize {
        self.word(LINE_TABLE_LENGTH_OFFSET)
    }

    /// Entries of the line number table, sorted by program counter
    pub fn line_table(&self) -> impl Iterator<Item = (Address, u32)> + 'r {
        let region = self.region;
        let start = self.line_table_start();
        (0..self.line_table_len()).map(move |index| {
            let entry = start.add_words(index * LINE_ENTRY_WORDS);
            let pc = region.read(entry).expect("line table inside its region");
            let line = region
                .read(entry.add_words(1))
                .expect("line table inside its region");
            (Address(pc), line as u32)
        })
    }

    /// Source line of a program counter: the line of the last entry at or before it (0 if none)
    pub fn line_for_pc(&self, pc: Address) -> u32 {
        let mut found = 0;
        for (entry_pc, line) in self.line_table() {
            if entry_pc > pc {
                break;
            }
            found = line;
        }
        found
    }

    pub fn exception_count(&self) -> usize {
        self.word(EXCEPTION_COUNT_OFFSET)
    }

    /// Exception table entries, in declaration order
    pub fn exception_entries(
        &self,
    ) -> impl DoubleEndedIterator<Item = ExceptionEntry<'r, 'g>> + ExactSizeIterator {
        let metadata = *self;
        (0..self.exception_count()).map(move |index| ExceptionEntry::new(metadata, index))
    }
}

/// Serialize into the little-endian word layout of installed metadata
pub trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()>;
}

impl Serialize for usize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_u64::<LittleEndian>(*self as u64)
    }
}

impl Serialize for Address {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for Option<Address> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.unwrap_or(Address::NULL).serialize(writer)
    }
}

struct EncodedLine {
    pc: Address,
    line: u32,
}

impl Serialize for EncodedLine {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.pc.serialize(writer)?;
        (self.line as usize).serialize(writer)
    }
}

struct EncodedEntry {
    start: Option<Address>,
    end: Option<Address>,
    handler: Address,
    catch_type: usize,
}

impl Serialize for EncodedEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.start.serialize(writer)?;
        self.end.serialize(writer)?;
        self.handler.serialize(writer)?;
        self.catch_type.serialize(writer)
    }
}

/// Header words, written from the lowest address (`entry - 72`) up to `entry - 8`
struct EncodedHeader {
    exception_count: usize,
    line_table_len: usize,
    line_table_start: Address,
    float_saved: usize,
    int_saved: usize,
    sync_slot: usize,
    flags: MetadataFlags,
    frame_size: usize,
    code_object: CodeHandle,
}

impl Serialize for EncodedHeader {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        self.exception_count.serialize(writer)?;
        self.line_table_len.serialize(writer)?;
        self.line_table_start.serialize(writer)?;
        self.float_saved.serialize(writer)?;
        self.int_saved.serialize(writer)?;
        self.sync_slot.serialize(writer)?;
        self.flags.bits().serialize(writer)?;
        self.frame_size.serialize(writer)?;
        self.code_object.0.serialize(writer)
    }
}

struct HandlerEntry<'g> {
    start: Option<usize>,
    end: Option<usize>,
    handler: usize,
    catch_type: CatchTarget<'g>,
}

/// Collects what code generation knows about a method and emits its metadata
///
/// Offsets (of code ranges, handlers, lines) are in bytes relative to the entry point, since the
/// entry point is only known once the registry places the region.
///
/// ```
/// # use jvm_unwind::runtime::code::{CatchTarget, MetadataBuilder};
/// # fn builder<'g>(method: jvm_unwind::jvm::class_graph::MethodId<'g>) -> MetadataBuilder<'g> {
/// MetadataBuilder::method(method, 64)
///     .frame_size(4)
///     .saved_registers(1, 0)
///     .line(0, 10)
///     .line(24, 11)
///     .handler(8, 32, 48, CatchTarget::Any)
/// # }
/// ```
pub struct MetadataBuilder<'g> {
    method: Option<MethodId<'g>>,
    kind: CodeKind,
    code_size: usize,
    frame_size: usize,
    flags: MetadataFlags,
    sync_slot: usize,
    int_saved: usize,
    float_saved: usize,
    lines: Vec<(usize, u32)>,
    handlers: Vec<HandlerEntry<'g>>,
}

impl<'g> MetadataBuilder<'g> {
    fn new(method: Option<MethodId<'g>>, kind: CodeKind, code_size: usize) -> Self {
        MetadataBuilder {
            method,
            kind,
            code_size,
            frame_size: 1,
            flags: MetadataFlags::empty(),
            sync_slot: 0,
            int_saved: 0,
            float_saved: 0,
            lines: vec![],
            handlers: vec![],
        }
    }

    /// Compiled code of a Java method (at the base tier)
    pub fn method(method: MethodId<'g>, code_size: usize) -> Self {
        Self::new(Some(method), CodeKind::Compiled { tier: 0 }, code_size)
    }

    /// Stub calling a native method
    pub fn native_stub(method: MethodId<'g>, code_size: usize) -> Self {
        Self::new(Some(method), CodeKind::NativeStub, code_size)
    }

    /// Stub through which native code calls compiled code
    ///
    /// Its only exception entry is the marker entry: any exception reaching the trampoline goes
    /// to `handler` (which returns to the native caller with the exception pending).
    pub fn trampoline(code_size: usize, handler: usize) -> Self {
        let mut builder = Self::new(None, CodeKind::CallTrampoline, code_size);
        builder.frame_size = 2;
        builder.handlers.push(HandlerEntry {
            start: None,
            end: None,
            handler,
            catch_type: CatchTarget::Any,
        });
        builder
    }

    /// Optimization tier of compiled code
    pub fn tier(mut self, tier: u8) -> Self {
        if let CodeKind::Compiled { .. } = self.kind {
            self.kind = CodeKind::Compiled { tier };
        }
        self
    }

    /// Frame size, in words
    pub fn frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn leaf(mut self, leaf: bool) -> Self {
        self.flags.set(MetadataFlags::LEAF, leaf);
        self
    }

    /// Mark the method synchronized, with the lock object saved `slot` bytes above sp
    pub fn synchronized(mut self, slot: usize) -> Self {
        self.flags.insert(MetadataFlags::SYNCHRONIZED);
        self.sync_slot = slot;
        self
    }

    /// Number of callee-saved integer and float registers the prologue spills
    pub fn saved_registers(mut self, int_saved: usize, float_saved: usize) -> Self {
        self.int_saved = int_saved;
        self.float_saved = float_saved;
        self
    }

    /// Code from `offset` onwards comes from source line `line`
    pub fn line(mut self, offset: usize, line: u32) -> Self {
        self.lines.push((offset, line));
        self
    }

    /// Add an exception-table entry covering `[start, end)`
    ///
    /// Entries are scanned in reverse order of addition, so inner handlers must be added after
    /// the handlers enclosing them.
    pub fn handler(
        mut self,
        start: usize,
        end: usize,
        handler: usize,
        catch_type: CatchTarget<'g>,
    ) -> Self {
        self.handlers.push(HandlerEntry {
            start: Some(start),
            end: Some(end),
            handler,
            catch_type,
        });
        self
    }

    pub fn method_id(&self) -> Option<MethodId<'g>> {
        self.method
    }

    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Number of metadata words emitted in front of the entry point
    pub fn emitted_words(&self) -> usize {
        METADATA_HEADER_WORDS
            + EXCEPTION_ENTRY_WORDS * self.handlers.len()
            + LINE_ENTRY_WORDS * self.lines.len()
    }

    pub fn validate(&self) -> Result<(), Error> {
        let malformed = |message: String| Err(Error::MalformedMetadata(message));

        if self.code_size == 0 {
            return malformed(String::from("code must not be empty"));
        }
        if self.int_saved > CALLEE_SAVED_INT_REGISTERS
            || self.float_saved > CALLEE_SAVED_FLOAT_REGISTERS
        {
            return malformed(format!(
                "cannot save {} integer and {} float registers",
                self.int_saved, self.float_saved
            ));
        }

        let return_address_words = if self.flags.contains(MetadataFlags::LEAF) {
            0
        } else {
            1
        };
        if self.frame_size < self.int_saved + self.float_saved + return_address_words {
            return malformed(format!(
                "frame of {} words is too small to save {} registers",
                self.frame_size,
                self.int_saved + self.float_saved
            ));
        }

        if self.flags.contains(MetadataFlags::SYNCHRONIZED)
            && (self.sync_slot % WORD_SIZE != 0 || self.sync_slot >= self.frame_size * WORD_SIZE)
        {
            return malformed(format!(
                "lock slot {} is not a word inside the frame",
                self.sync_slot
            ));
        }

        for handler in &self.handlers {
            match (handler.start, handler.end) {
                (None, None) if self.kind == CodeKind::CallTrampoline => (),
                (Some(start), Some(end)) if start <= end && end <= self.code_size => (),
                (start, end) => {
                    return malformed(format!("bad exception range {:?}..{:?}", start, end));
                }
            }
            if handler.handler >= self.code_size {
                return malformed(format!("handler {} is outside the code", handler.handler));
            }
        }

        for (offset, _) in &self.lines {
            if *offset >= self.code_size {
                return malformed(format!("line entry {} is outside the code", offset));
            }
        }

        Ok(())
    }

    /// Encode the metadata for code whose entry point is `entry`
    ///
    /// Returns the bytes (from the lowest address up to the entry point) and the symbolic class
    /// references unresolved catch types index into.
    pub fn emit(
        &self,
        entry: Address,
        code_object: CodeHandle,
    ) -> Result<(Vec<u8>, Vec<BinaryName>), Error> {
        let mut bytes: Vec<u8> = Vec::with_capacity(self.emitted_words() * WORD_SIZE);
        let mut symbolic_refs: Vec<BinaryName> = vec![];

        let mut lines = self.lines.clone();
        lines.sort_by_key(|(offset, _)| *offset);
        let line_table_start = entry.sub_words(self.emitted_words());
        for (offset, line) in lines {
            EncodedLine {
                pc: entry + offset,
                line,
            }
            .serialize(&mut bytes)?;
        }

        // Last entry first, since entry `i` sits at `entry - 72 - 32 * (i + 1)`
        for handler in self.handlers.iter().rev() {
            let catch_type = match &handler.catch_type {
                CatchTarget::Any => CATCH_ALL_WORD,
                CatchTarget::Class(class) => encode_resolved(*class),
                CatchTarget::Symbolic(name) => {
                    let index = match symbolic_refs.iter().position(|known| known == name) {
                        Some(index) => index,
                        None => {
                            symbolic_refs.push(name.clone());
                            symbolic_refs.len() - 1
                        }
                    };
                    encode_unresolved(index)
                }
            };
            EncodedEntry {
                start: handler.start.map(|start| entry + start),
                end: handler.end.map(|end| entry + end),
                handler: entry + handler.handler,
                catch_type,
            }
            .serialize(&mut bytes)?;
        }

        EncodedHeader {
            exception_count: self.handlers.len(),
            line_table_len: self.lines.len(),
            line_table_start,
            float_saved: self.float_saved,
            int_saved: self.int_saved,
            sync_slot: self.sync_slot,
            flags: self.flags,
            frame_size: self.frame_size,
            code_object,
        }
        .serialize(&mut bytes)?;

        Ok((bytes, symbolic_refs))
    }
}
