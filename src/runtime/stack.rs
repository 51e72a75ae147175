use super::{Address, Error, WORD_SIZE};

/// Number of callee-saved integer registers
pub const CALLEE_SAVED_INT_REGISTERS: usize = 8;

/// Number of callee-saved floating point registers
pub const CALLEE_SAVED_FLOAT_REGISTERS: usize = 8;

/// Address one past the top of every thread's machine stack
pub const DEFAULT_STACK_BASE: Address = Address(0x7fff_0000);

/// Word-addressed machine stack, growing downwards from `base`
///
/// Valid addresses are the aligned addresses in `[limit, base)`.
pub struct MachineStack {
    limit: Address,
    base: Address,
    words: Vec<usize>,
}

impl MachineStack {
    pub fn new(base: Address, size_words: usize) -> MachineStack {
        MachineStack {
            limit: base.sub_words(size_words),
            base,
            words: vec![0; size_words],
        }
    }

    /// One past the highest valid address
    pub fn base(&self) -> Address {
        self.base
    }

    /// Lowest valid address
    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn contains(&self, address: Address) -> bool {
        self.limit <= address && address < self.base
    }

    fn index(&self, address: Address) -> Result<usize, Error> {
        if !address.is_word_aligned() {
            Err(Error::UnalignedStackAccess(address))
        } else if !self.contains(address) {
            Err(Error::StackOutOfBounds(address))
        } else {
            Ok((address.0 - self.limit.0) / WORD_SIZE)
        }
    }

    pub fn read(&self, address: Address) -> Result<usize, Error> {
        let index = self.index(address)?;
        Ok(self.words[index])
    }

    pub fn write(&mut self, address: Address, value: usize) -> Result<(), Error> {
        let index = self.index(address)?;
        self.words[index] = value;
        Ok(())
    }
}

/// Registers the runtime needs to see
///
/// This is a shadow of the hardware registers: the stack pointer, the link register (only used
/// on architectures where calls do not push the return address), and the callee-saved registers
/// which unwinding has to restore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    pub sp: Address,
    pub link: Address,
    pub int: [usize; CALLEE_SAVED_INT_REGISTERS],
    pub float: [u64; CALLEE_SAVED_FLOAT_REGISTERS],
}

impl RegisterFile {
    pub fn new(sp: Address) -> RegisterFile {
        RegisterFile {
            sp,
            link: Address::NULL,
            int: [0; CALLEE_SAVED_INT_REGISTERS],
            float: [0; CALLEE_SAVED_FLOAT_REGISTERS],
        }
    }
}
