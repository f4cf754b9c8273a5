//! Memory handling for the LC-3 emulator.
//!
//! This module consists of:
//! - [`Mem`]: the 65,536-word address space, including the device-mapped
//!   region at `xFE00` and above.
//! - [`RegFile`]: the register file.

use rand::Rng;

use crate::ast::Reg;

use super::io::{IODevice, IO_START};
use super::{SimErr, SimIOwCtl};

const N: usize = 1 << 16;

/// The range of addresses accessible to user-mode code.
///
/// Everything below is the vector tables and supervisor ROM; everything at
/// or above [`IO_START`] is device-mapped. A user-mode access outside this
/// range is an access control violation.
pub const USER_RANGE: std::ops::Range<u16> = 0x3000..IO_START;

/// Context behind a memory access.
///
/// This struct is used by [`Mem::read`] and [`Mem::write`] to perform checks
/// against memory accesses. A default memory access context for the given
/// simulator can be constructed with [`Simulator::default_mem_ctx`].
///
/// [`Simulator::default_mem_ctx`]: super::Simulator::default_mem_ctx
#[derive(Clone, Copy)]
pub struct MemAccessCtx {
    /// Whether this access is privileged (false = user, true = supervisor).
    pub privileged: bool,
}

/// Memory.
///
/// This can be addressed with any `u16` (16-bit address).
///
/// Note that this struct provides two methods of accessing memory:
/// - [`Mem::get_raw`] and [`Mem::set_raw`]: direct access to memory values
/// - [`Mem::read`] and [`Mem::write`]: memory access with privilege checks
///   and IO effects
///
/// `get_raw` and `set_raw` simply access the stored word. They do not
/// trigger IO side effects (a raw read of the KBDR does not consume input)
/// and they do not perform access violation checks. They are meant for the
/// loader and the debugger, which inspect and patch the machine rather than
/// run on it.
///
/// In contrast, `read` and `write` simulate an access made by an executing
/// instruction: the address is checked against [`USER_RANGE`] for
/// unprivileged accesses, and addresses in the device region are routed
/// through the connected [`IODevice`].
#[derive(Debug)]
pub struct Mem {
    data: Box<[u16; N]>,
    pub(super) io: SimIOwCtl,
}
impl Mem {
    /// Creates a new, zero-filled memory.
    pub fn new() -> Self {
        Self {
            data: vec![0u16; N]
                .into_boxed_slice()
                .try_into()
                .unwrap_or_else(|_| unreachable!("vec should have had {N} elements")),
            io: Default::default(),
        }
    }

    /// Copies a block of words into this memory, starting at `start`.
    ///
    /// Blocks that run past the top of the address space wrap around to
    /// address 0.
    pub fn copy_block(&mut self, start: u16, data: &[u16]) {
        assert!(data.len() <= N, "block cannot exceed the address space");

        let si = usize::from(start);
        let end = si + data.len();
        if end <= N {
            self.data[si..end].copy_from_slice(data);
        } else {
            let (left, right) = data.split_at(N - si);
            self.data[si..].copy_from_slice(left);
            self.data[..end - N].copy_from_slice(right);
        }
    }

    /// Gets the word at the given address from the memory's current state.
    ///
    /// This is **only** meant to be used to query the state of the memory,
    /// not to simulate a read: no IO effects are triggered and no access
    /// violation checks are performed. See [`Mem::read`] for those.
    pub fn get_raw(&self, addr: u16) -> u16 {
        self.data[usize::from(addr)]
    }

    /// Sets the word at the given address in the memory's current state.
    ///
    /// This is **only** meant to be used to edit the state of the memory,
    /// not to simulate a write: no IO effects are triggered and no access
    /// violation checks are performed. See [`Mem::write`] for those.
    pub fn set_raw(&mut self, addr: u16, data: u16) {
        self.data[usize::from(addr)] = data;
    }

    /// Fallibly reads the word at the provided address, erroring if not possible.
    ///
    /// The [`MemAccessCtx`] flags are used as follows:
    /// - `privileged`: if false, this access errors with
    ///   [`SimErr::AccessViolation`] if the address is outside [`USER_RANGE`].
    ///
    /// Reads of device-mapped addresses query the connected [`IODevice`] and
    /// mirror its response into the backing store, so a status register read
    /// always reflects the device's current state.
    pub fn read(&mut self, addr: u16, ctx: MemAccessCtx) -> Result<u16, SimErr> {
        if !ctx.privileged && !USER_RANGE.contains(&addr) { return Err(SimErr::AccessViolation) };

        if addr >= IO_START {
            if let Some(new_data) = self.io.io_read(addr) {
                self.data[usize::from(addr)] = new_data;
            }
        }
        Ok(self.data[usize::from(addr)])
    }

    /// Fallibly writes the word at the provided address, erroring if not possible.
    ///
    /// The [`MemAccessCtx`] flags are used as follows:
    /// - `privileged`: if false, this access errors with
    ///   [`SimErr::AccessViolation`] if the address is outside [`USER_RANGE`].
    ///
    /// Writes to device-mapped addresses are offered to the connected
    /// [`IODevice`] (this is how a store to the DDR emits a character); the
    /// backing store is updated only if the device accepts the write.
    pub fn write(&mut self, addr: u16, data: u16, ctx: MemAccessCtx) -> Result<(), SimErr> {
        if !ctx.privileged && !USER_RANGE.contains(&addr) { return Err(SimErr::AccessViolation) };

        let write_to_mem = if addr >= IO_START {
            self.io.io_write(addr, data)
        } else {
            true
        };
        if write_to_mem {
            self.data[usize::from(addr)] = data;
        }
        Ok(())
    }
}
impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or
/// via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use lc3sim::sim::mem::RegFile;
/// use lc3sim::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new();
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file with all registers cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all registers to zero.
    pub fn clear(&mut self) {
        self.0 = [0; 8];
    }

    /// Fills every register from the provided random number generator.
    pub fn randomize(&mut self, rng: &mut impl Rng) {
        self.0.fill_with(|| rng.gen());
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::ast::reg_consts::{R0, R7};
    use crate::sim::io::{BufferedIO, DDR, KBDR, KBSR};
    use crate::sim::SimErr;

    use super::{Mem, MemAccessCtx, RegFile};

    const USER: MemAccessCtx = MemAccessCtx { privileged: false };
    const SUPERVISOR: MemAccessCtx = MemAccessCtx { privileged: true };

    #[test]
    fn user_mode_bounds() {
        let mut mem = Mem::new();

        assert!(matches!(mem.read(0x2FFF, USER), Err(SimErr::AccessViolation)));
        assert!(matches!(mem.read(0xFE00, USER), Err(SimErr::AccessViolation)));
        assert!(matches!(mem.write(0x0000, 1, USER), Err(SimErr::AccessViolation)));
        assert!(matches!(mem.write(0xFFFE, 1, USER), Err(SimErr::AccessViolation)));
        assert!(mem.read(0x3000, USER).is_ok());
        assert!(mem.write(0xFDFF, 1, USER).is_ok());

        // supervisor mode is unrestricted
        assert!(mem.read(0x0000, SUPERVISOR).is_ok());
        assert!(mem.write(0x2FFF, 1, SUPERVISOR).is_ok());
    }

    #[test]
    fn rejected_store_leaves_memory_unchanged() {
        let mut mem = Mem::new();
        mem.set_raw(0x0000, 0x1234);

        assert!(mem.write(0x0000, 0xBEEF, USER).is_err());
        assert_eq!(mem.get_raw(0x0000), 0x1234);
    }

    #[test]
    fn device_reads_and_writes() {
        let mut mem = Mem::new();
        let io = BufferedIO::new();
        io.get_input().write().unwrap().extend(*b"ab");
        mem.io.inner = io.clone().into();

        // key ready; reading KBDR consumes one character at a time
        assert_eq!(mem.read(KBSR, SUPERVISOR).unwrap(), 0x8000);
        assert_eq!(mem.read(KBDR, SUPERVISOR).unwrap(), u16::from(b'a'));
        assert_eq!(mem.read(KBSR, SUPERVISOR).unwrap(), 0x8000);
        assert_eq!(mem.read(KBDR, SUPERVISOR).unwrap(), u16::from(b'b'));
        assert_eq!(mem.read(KBSR, SUPERVISOR).unwrap(), 0x0000);

        // DDR writes emit the low byte
        mem.write(DDR, 0xFF48, SUPERVISOR).unwrap();
        mem.write(DDR, u16::from(b'i'), SUPERVISOR).unwrap();
        assert_eq!(*io.get_output().read().unwrap(), b"Hi");

        // raw accesses have no side effects
        let _ = mem.get_raw(KBDR);
        assert_eq!(*io.get_output().read().unwrap(), b"Hi");
    }

    #[test]
    fn copy_block() {
        let mut mem = Mem::new();
        mem.copy_block(0x3000, &[1, 2, 3]);
        assert_eq!(mem.get_raw(0x3000), 1);
        assert_eq!(mem.get_raw(0x3002), 3);

        // wrapping block
        mem.copy_block(0xFFFF, &[7, 8]);
        assert_eq!(mem.get_raw(0xFFFF), 7);
        assert_eq!(mem.get_raw(0x0000), 8);
    }

    #[test]
    fn reg_file_randomize() {
        let mut a = RegFile::new();
        let mut b = RegFile::new();
        a.randomize(&mut StdRng::seed_from_u64(140));
        b.randomize(&mut StdRng::seed_from_u64(140));
        assert_eq!(a[R0], b[R0]);
        assert_eq!(a[R7], b[R7]);

        a.clear();
        assert_eq!(a[R0], 0);
    }
}
