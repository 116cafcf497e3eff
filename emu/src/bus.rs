//! # Memory access shim
//!
//! The exception model reads and writes guest memory only through
//! [`MemoryBus`]. A failed access reports one of three [`AccessFault`]
//! kinds; turning them into fault status bits and pended exceptions is
//! the stacking code's job, not the bus's.
//!
//! [`FlatMemory`] is the reference bus: a set of RAM regions, an SAU
//! region list, an MPU region list and ranges that answer with a bus
//! error.

use serde::{Deserialize, Serialize};

/// Translation regime of an access: security state, privilege, and
/// whether the requester runs at negative priority (which bypasses the
/// MPU).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MmuIndex {
    pub secure: bool,
    pub privileged: bool,
    pub negative_priority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// SAU/IDAU: Non-secure access to Secure memory.
    Security,
    /// MPU permission check failed.
    Permission,
    /// The bus returned an error.
    Bus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

/// Result of the security attribution lookup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SecurityAttributes {
    pub ns: bool,
    /// Secure, Non-secure callable.
    pub nsc: bool,
    pub irvalid: bool,
    pub iregion: u8,
    pub srvalid: bool,
    pub sregion: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MpuLookup {
    /// Matching region, `None` for the default memory map.
    pub region: Option<u8>,
    pub readable: bool,
    pub writable: bool,
}

impl MpuLookup {
    #[must_use]
    pub const fn permits(self, access: AccessType) -> bool {
        match access {
            AccessType::Read | AccessType::Execute => self.readable,
            AccessType::Write => self.writable,
        }
    }
}

pub trait MemoryBus {
    /// Data load through the SAU and MPU.
    fn load_word(&mut self, addr: u32, mmu: MmuIndex) -> Result<u32, AccessFault>;

    /// Data store through the SAU and MPU.
    fn store_word(&mut self, addr: u32, value: u32, mmu: MmuIndex) -> Result<(), AccessFault>;

    /// Load with the default memory map, which permits every read: only
    /// [`AccessFault::Bus`] can come back. Used for vector fetches.
    fn load_word_physical(&mut self, addr: u32, secure: bool) -> Result<u32, AccessFault>;

    /// Instruction fetch with the MPU check only; the caller has
    /// already done the security attribution.
    fn fetch_halfword(&mut self, addr: u32, mmu: MmuIndex) -> Result<u16, AccessFault>;

    fn classify(&self, addr: u32, secure: bool, access: AccessType) -> SecurityAttributes;

    fn mpu_lookup(&self, addr: u32, mmu: MmuIndex) -> MpuLookup;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamRegion {
    pub base: u32,
    pub data: Vec<u8>,
}

impl RamRegion {
    fn offset(&self, addr: u32, len: u32) -> Option<usize> {
        let offset = addr.checked_sub(self.base)? as usize;
        (offset + len as usize <= self.data.len()).then_some(offset)
    }
}

/// SAU region: Non-secure, or Secure and Non-secure callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SauRegion {
    pub base: u32,
    /// Inclusive.
    pub limit: u32,
    pub nsc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpuRegion {
    pub base: u32,
    /// Inclusive.
    pub limit: u32,
    /// Which security state's MPU owns the region.
    pub secure: bool,
    pub privileged_only: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatMemory {
    /// Without the Security Extension everything is Non-secure.
    security: bool,
    ram: Vec<RamRegion>,
    sau: Vec<SauRegion>,
    mpu: Vec<MpuRegion>,
    /// Inclusive ranges that answer with a bus error.
    bus_errors: Vec<(u32, u32)>,
}

impl FlatMemory {
    #[must_use]
    pub const fn new(security: bool) -> Self {
        Self {
            security,
            ram: Vec::new(),
            sau: Vec::new(),
            mpu: Vec::new(),
            bus_errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ram(mut self, base: u32, size: u32) -> Self {
        self.ram.push(RamRegion {
            base,
            data: vec![0; size as usize],
        });
        self
    }

    #[must_use]
    pub fn with_sau_region(mut self, base: u32, limit: u32, nsc: bool) -> Self {
        self.sau.push(SauRegion { base, limit, nsc });
        self
    }

    #[must_use]
    pub fn with_mpu_region(mut self, region: MpuRegion) -> Self {
        self.mpu.push(region);
        self
    }

    #[must_use]
    pub fn with_bus_error(mut self, base: u32, limit: u32) -> Self {
        self.bus_errors.push((base, limit));
        self
    }

    fn locate(&self, addr: u32, len: u32) -> Option<(usize, usize)> {
        if self
            .bus_errors
            .iter()
            .any(|&(base, limit)| (base..=limit).contains(&addr))
        {
            return None;
        }
        self.ram
            .iter()
            .enumerate()
            .find_map(|(i, region)| region.offset(addr, len).map(|offset| (i, offset)))
    }

    /// Backdoor read: no security, MPU or fault handling.
    #[must_use]
    pub fn read_word(&self, addr: u32) -> Option<u32> {
        let (i, offset) = self.locate(addr, 4)?;
        let bytes = &self.ram[i].data[offset..offset + 4];
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Backdoor write. Returns false when nothing is mapped at `addr`.
    pub fn write_word(&mut self, addr: u32, value: u32) -> bool {
        let Some((i, offset)) = self.locate(addr, 4) else {
            return false;
        };
        self.ram[i].data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        true
    }

    #[must_use]
    pub fn read_halfword(&self, addr: u32) -> Option<u16> {
        let (i, offset) = self.locate(addr, 2)?;
        let bytes = &self.ram[i].data[offset..offset + 2];
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn write_halfword(&mut self, addr: u32, value: u16) -> bool {
        let Some((i, offset)) = self.locate(addr, 2) else {
            return false;
        };
        self.ram[i].data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        true
    }

    fn check(&self, addr: u32, mmu: MmuIndex, access: AccessType) -> Result<(), AccessFault> {
        if self.security && !mmu.secure && !self.classify(addr, false, access).ns {
            return Err(AccessFault::Security);
        }
        if !self.mpu_lookup(addr, mmu).permits(access) {
            return Err(AccessFault::Permission);
        }
        Ok(())
    }
}

impl MemoryBus for FlatMemory {
    fn load_word(&mut self, addr: u32, mmu: MmuIndex) -> Result<u32, AccessFault> {
        self.check(addr, mmu, AccessType::Read)?;
        self.read_word(addr).ok_or(AccessFault::Bus)
    }

    fn store_word(&mut self, addr: u32, value: u32, mmu: MmuIndex) -> Result<(), AccessFault> {
        self.check(addr, mmu, AccessType::Write)?;
        if self.write_word(addr, value) {
            Ok(())
        } else {
            Err(AccessFault::Bus)
        }
    }

    fn load_word_physical(&mut self, addr: u32, _secure: bool) -> Result<u32, AccessFault> {
        self.read_word(addr).ok_or(AccessFault::Bus)
    }

    fn fetch_halfword(&mut self, addr: u32, mmu: MmuIndex) -> Result<u16, AccessFault> {
        if !self.mpu_lookup(addr, mmu).permits(AccessType::Execute) {
            return Err(AccessFault::Permission);
        }
        self.read_halfword(addr).ok_or(AccessFault::Bus)
    }

    fn classify(&self, addr: u32, _secure: bool, _access: AccessType) -> SecurityAttributes {
        if !self.security {
            return SecurityAttributes {
                ns: true,
                ..SecurityAttributes::default()
            };
        }

        match self
            .sau
            .iter()
            .position(|r| (r.base..=r.limit).contains(&addr))
        {
            Some(i) => {
                let region = self.sau[i];
                SecurityAttributes {
                    ns: !region.nsc,
                    nsc: region.nsc,
                    srvalid: true,
                    sregion: i as u8,
                    ..SecurityAttributes::default()
                }
            }
            None => SecurityAttributes::default(),
        }
    }

    fn mpu_lookup(&self, addr: u32, mmu: MmuIndex) -> MpuLookup {
        let default_map = MpuLookup {
            region: None,
            readable: true,
            writable: true,
        };

        if mmu.negative_priority {
            return default_map;
        }

        self.mpu
            .iter()
            .enumerate()
            .find(|(_, r)| r.secure == mmu.secure && (r.base..=r.limit).contains(&addr))
            .map_or(default_map, |(i, r)| {
                let readable = mmu.privileged || !r.privileged_only;
                MpuLookup {
                    region: Some(i as u8),
                    readable,
                    writable: readable && !r.read_only,
                }
            })
    }
}
