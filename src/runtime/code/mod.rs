//! Installed code and the metadata blocks in front of it
//!
//! Every installed region of code is laid out as
//!
//! ```text
//!   start ->  line number table         (2 words per line)
//!             exception table           (4 words per entry, last entry lowest)
//!             metadata header           (9 words)
//!   entry ->  code
//!     end ->
//! ```
//!
//! so that the metadata of a method is always found at fixed negative offsets from its entry
//! point. See [`MethodMetadata`] for the exact offsets.

use crate::jvm::class_graph::{ClassGraph, MethodId};
use crate::jvm::BinaryName;
use crate::runtime::{Address, Error, WORD_SIZE};
use byteorder::{LittleEndian, ReadBytesExt};
use elsa::sync::FrozenVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

mod exception_table;
mod metadata;

pub use exception_table::*;
pub use metadata::*;

/// First address handed out to installed code
pub const CODE_SPACE_START: Address = Address(0x1000_0000);

/// Unmapped bytes left between consecutive regions
const REGION_GAP: usize = 64;

/// Word-sized handle of a runtime code object, as stored in the metadata back-pointer
///
/// Handles are assigned from 1 in order of installation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodeKind {
    /// Compiled Java method, at some optimization tier
    Compiled { tier: u8 },

    /// Stub through which compiled code calls a native method
    NativeStub,

    /// Stub through which native code calls into compiled code
    ///
    /// Its frame marks the boundary of a run of compiled frames: unwinding stops there and hands
    /// the exception back to the native caller.
    CallTrampoline,
}

/// Runtime code object owning one installed region
#[repr(C)]
pub struct CodeInfo<'g> {
    /// Owning method (kept first: the metadata back-pointer leads here)
    ///
    /// Call trampolines have no method.
    pub method: Option<MethodId<'g>>,

    pub kind: CodeKind,
    pub handle: CodeHandle,
    pub entry: Address,
    pub end: Address,

    /// Code installed for the same method before this one, if any
    pub previous_version: Option<CodeHandle>,

    /// Classes referred to by unresolved catch types, by index
    pub symbolic_refs: Vec<BinaryName>,

    valid: AtomicBool,
}

impl<'g> CodeInfo<'g> {
    /// Code stops being valid once it is unloaded
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

/// Memory of one installed region
///
/// Only the metadata part of the region (`[start, entry)`) has backing words: the runtime never
/// reads the instructions themselves.
pub struct CodeRegion {
    pub start: Address,
    pub entry: Address,
    pub end: Address,
    words: Box<[AtomicUsize]>,
}

impl CodeRegion {
    /// Load the little-endian encoded metadata words
    pub fn from_bytes(
        start: Address,
        entry: Address,
        end: Address,
        mut bytes: &[u8],
    ) -> Result<CodeRegion, Error> {
        if bytes.len() != entry.0 - start.0 || bytes.len() % WORD_SIZE != 0 {
            return Err(Error::MalformedMetadata(format!(
                "{} bytes of metadata do not fill {:?}..{:?}",
                bytes.len(),
                start,
                entry
            )));
        }

        let mut words = Vec::with_capacity(bytes.len() / WORD_SIZE);
        while !bytes.is_empty() {
            words.push(AtomicUsize::new(bytes.read_u64::<LittleEndian>()? as usize));
        }

        Ok(CodeRegion {
            start,
            entry,
            end,
            words: words.into_boxed_slice(),
        })
    }

    /// Metadata word at an address
    pub fn slot(&self, address: Address) -> Option<&AtomicUsize> {
        if address < self.start || address >= self.entry || !address.is_word_aligned() {
            return None;
        }
        self.words.get((address.0 - self.start.0) / WORD_SIZE)
    }

    pub fn read(&self, address: Address) -> Option<usize> {
        self.slot(address).map(|word| word.load(Ordering::Acquire))
    }
}

/// Mutable part of the registry, guarded by one lock so installs and unloads are atomic
struct CodeIndex<'g> {
    /// Entry point to index of valid regions
    by_entry: BTreeMap<Address, usize>,

    /// Most recently installed compiled version of each method
    latest_versions: HashMap<MethodId<'g>, CodeHandle>,

    next_address: Address,
}

/// All code installed in the runtime, searchable by program counter
///
/// Lookups from any number of threads only take a read lock.
pub struct CodeRegistry<'g> {
    classes: &'g ClassGraph<'g>,
    code_objects: FrozenVec<Box<CodeInfo<'g>>>,
    regions: FrozenVec<Box<CodeRegion>>,
    index: RwLock<CodeIndex<'g>>,
}

impl<'g> CodeRegistry<'g> {
    pub fn new(classes: &'g ClassGraph<'g>) -> CodeRegistry<'g> {
        CodeRegistry {
            classes,
            code_objects: FrozenVec::new(),
            regions: FrozenVec::new(),
            index: RwLock::new(CodeIndex {
                by_entry: BTreeMap::new(),
                latest_versions: HashMap::new(),
                next_address: CODE_SPACE_START,
            }),
        }
    }

    fn read_index(&self) -> RwLockReadGuard<'_, CodeIndex<'g>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, CodeIndex<'g>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Class graph that resolved catch types refer into
    pub fn classes(&self) -> &'g ClassGraph<'g> {
        self.classes
    }

    /// Emit the metadata of a method and install its region
    ///
    /// Installing a compiled method that already has code links the new code object to the
    /// previous one.
    pub fn install(&self, builder: MetadataBuilder<'g>) -> Result<MethodMetadata<'_, 'g>, Error> {
        builder.validate()?;

        let mut code_index = self.write_index();
        let start = code_index.next_address;
        let entry = start.add_words(builder.emitted_words());
        let code_words = (builder.code_size() + WORD_SIZE - 1) / WORD_SIZE;
        let end = entry.add_words(code_words);

        let index = self.code_objects.len();
        let handle = CodeHandle(index + 1);
        let (bytes, symbolic_refs) = builder.emit(entry, handle)?;
        let region = CodeRegion::from_bytes(start, entry, end, &bytes)?;
        code_index.next_address = end + REGION_GAP;

        let method = builder.method_id();
        let kind = builder.kind();
        let previous_version = match (method, kind) {
            (Some(method), CodeKind::Compiled { .. }) => {
                code_index.latest_versions.insert(method, handle)
            }
            _ => None,
        };

        self.code_objects.push(Box::new(CodeInfo {
            method,
            kind,
            handle,
            entry,
            end,
            previous_version,
            symbolic_refs,
            valid: AtomicBool::new(true),
        }));
        self.regions.push(Box::new(region));
        code_index.by_entry.insert(entry, index);
        drop(code_index);
        log::debug!(
            "Installed {:?} for {:?} at {:?}..{:?}",
            handle,
            method,
            entry,
            end
        );

        self.metadata_at(index).ok_or_else(|| {
            Error::MalformedMetadata(format!("installed code {:?} went missing", handle))
        })
    }

    fn metadata_at(&self, index: usize) -> Option<MethodMetadata<'_, 'g>> {
        Some(MethodMetadata {
            registry: self,
            code: self.code_objects.get(index)?,
            region: self.regions.get(index)?,
        })
    }

    /// Find the metadata of the valid code containing a program counter
    pub fn lookup(&self, pc: Address) -> Option<MethodMetadata<'_, 'g>> {
        let index = {
            let code_index = self.read_index();
            let (_, index) = code_index.by_entry.range(..=pc).next_back()?;
            *index
        };
        let metadata = self.metadata_at(index)?;
        if metadata.contains(pc) {
            Some(metadata)
        } else {
            None
        }
    }

    /// Code object from its handle (valid or not)
    pub fn code(&self, handle: CodeHandle) -> Option<&CodeInfo<'g>> {
        self.code_objects.get(handle.0.checked_sub(1)?)
    }

    /// Metadata of valid code from its handle
    pub fn metadata(&self, handle: CodeHandle) -> Option<MethodMetadata<'_, 'g>> {
        let metadata = self.metadata_at(handle.0.checked_sub(1)?)?;
        if metadata.code().is_valid() {
            Some(metadata)
        } else {
            None
        }
    }

    /// Latest valid compiled code of a method
    pub fn latest_version(&self, method: MethodId<'g>) -> Option<CodeHandle> {
        self.read_index().latest_versions.get(&method).copied()
    }

    /// Invalidate a region: program counters in it no longer map to any code
    pub fn unload(&self, handle: CodeHandle) -> Result<(), Error> {
        let code = self.code(handle).ok_or(Error::UnknownCode(handle))?;
        let mut code_index = self.write_index();
        if !code.is_valid() {
            return Ok(());
        }

        code.valid.store(false, Ordering::Release);
        code_index.by_entry.remove(&code.entry);

        if let Some(method) = code.method {
            let latest_versions = &mut code_index.latest_versions;
            if latest_versions.get(&method) == Some(&handle) {
                let previous = code
                    .previous_version
                    .filter(|previous| self.code(*previous).map_or(false, CodeInfo::is_valid));
                match previous {
                    Some(previous) => latest_versions.insert(method, previous),
                    None => latest_versions.remove(&method),
                };
            }
        }

        log::debug!("Unloaded {:?} at {:?}", handle, code.entry);
        Ok(())
    }
}
