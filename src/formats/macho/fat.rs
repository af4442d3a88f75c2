//! Multi-architecture ("fat") container handling.
//!
//! A fat file is a big-endian `fat_header` followed by `nfat_arch`
//! `fat_arch` records, each pointing at a complete thin Mach-O slice. Thin
//! files are treated as a container with a single slice at offset 0.

use tracing::{debug, warn};

use crate::core::binary::CpuType;
use crate::formats::macho::types::*;
use crate::formats::macho::utils::{record, EndianRead};
use crate::formats::macho::MachoBinary;
use crate::io::ByteSource;

/// Decode the `fat_arch` table, or `None` if `data` is not a fat file.
pub fn parse_fat_header(data: &[u8]) -> Result<Option<Vec<FatArch>>> {
    if data.read_u32(0, ByteOrder::Big, "fat_header")? != FAT_MAGIC {
        return Ok(None);
    }
    let order = ByteOrder::Big;
    let nfat_arch = data.read_u32(4, order, "fat_header")? as usize;
    let table = record(
        data,
        FAT_HEADER_SIZE,
        nfat_arch.saturating_mul(FAT_ARCH_SIZE),
        "fat_arch",
    )?;
    table
        .chunks_exact(FAT_ARCH_SIZE)
        .map(|raw| {
            Ok(FatArch {
                cputype: raw.read_u32(0, order, "fat_arch")?,
                cpusubtype: raw.read_u32(4, order, "fat_arch")?,
                offset: raw.read_u32(8, order, "fat_arch")?,
                size: raw.read_u32(12, order, "fat_arch")?,
                align: raw.read_u32(16, order, "fat_arch")?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Every parsable slice of a file.
#[derive(Debug)]
pub struct MachoContainer {
    archs: Vec<FatArch>,
    slices: Vec<MachoBinary>,
}

impl MachoContainer {
    /// Parse a thin or fat file.
    ///
    /// For fat files, slices that fail to parse are skipped with a warning.
    /// For thin files the single slice's error is returned.
    pub fn parse(source: ByteSource) -> Result<Self> {
        let archs = match parse_fat_header(source.as_slice())? {
            Some(archs) => archs,
            None => {
                let slice = MachoBinary::parse(source, 0)?;
                return Ok(Self {
                    archs: Vec::new(),
                    slices: vec![slice],
                });
            }
        };

        debug!(count = archs.len(), "Parsing fat container");
        let mut slices = Vec::with_capacity(archs.len());
        for arch in &archs {
            match MachoBinary::parse(source.clone(), u64::from(arch.offset)) {
                Ok(slice) => slices.push(slice),
                Err(e) => warn!(
                    cpu = %arch.cpu_type(),
                    offset = arch.offset,
                    error = %e,
                    "Skipping unparsable slice"
                ),
            }
        }
        Ok(Self { archs, slices })
    }

    pub fn is_fat(&self) -> bool {
        !self.archs.is_empty()
    }

    /// The `fat_arch` records as declared, including skipped slices.
    pub fn archs(&self) -> &[FatArch] {
        &self.archs
    }

    pub fn slices(&self) -> &[MachoBinary] {
        &self.slices
    }

    pub fn into_slices(self) -> Vec<MachoBinary> {
        self.slices
    }

    pub fn slice_for_cpu(&self, cpu: CpuType) -> Option<&MachoBinary> {
        self.slices.iter().find(|s| s.cpu_type() == cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thin_slice(cputype: u32) -> Vec<u8> {
        let mut b = Vec::new();
        for v in [MH_MAGIC_64, cputype, 0, 2, 0, 0, 0, 0] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        b
    }

    fn fat_file(slices: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        out.extend_from_slice(&(slices.len() as u32).to_be_bytes());
        let mut offset = 0x1000u32;
        let mut bodies = Vec::new();
        for (cpu, body) in slices {
            for v in [*cpu, 0, offset, body.len() as u32, 12] {
                out.extend_from_slice(&v.to_be_bytes());
            }
            bodies.push((offset, body));
            offset += 0x1000;
        }
        for (offset, body) in bodies {
            out.resize(offset as usize, 0);
            out.extend_from_slice(body);
        }
        out
    }

    #[test]
    fn test_fat_header_table() {
        let data = fat_file(&[(12, thin_slice(12)), (0x0100_000c, thin_slice(0x0100_000c))]);
        let archs = parse_fat_header(&data).unwrap().unwrap();
        assert_eq!(archs.len(), 2);
        assert_eq!(archs[1].cpu_type(), CpuType::Arm64);
        assert_eq!(archs[1].offset, 0x2000);

        assert!(parse_fat_header(&thin_slice(12)).unwrap().is_none());
    }

    #[test]
    fn test_fat_container_slices() {
        let mut broken = thin_slice(12);
        broken[0] = 0; // not a Mach-O magic any more
        let data = fat_file(&[(12, broken), (0x0100_000c, thin_slice(0x0100_000c))]);
        let container = MachoContainer::parse(ByteSource::from_bytes(data)).unwrap();
        assert!(container.is_fat());
        assert_eq!(container.archs().len(), 2);
        assert_eq!(container.slices().len(), 1);
        let arm64 = container.slice_for_cpu(CpuType::Arm64).unwrap();
        assert_eq!(arm64.offset_within_container(), 0x2000);
        assert!(container.slice_for_cpu(CpuType::ArmV7).is_none());
    }

    #[test]
    fn test_thin_container() {
        let container =
            MachoContainer::parse(ByteSource::from_bytes(thin_slice(0x0100_000c))).unwrap();
        assert!(!container.is_fat());
        assert_eq!(container.into_slices().len(), 1);

        let err = MachoContainer::parse(ByteSource::from_bytes(vec![0u8; 32])).unwrap_err();
        assert!(matches!(err, MachoError::InvalidMagic(0)));
    }

    #[test]
    fn test_truncated_fat_table() {
        let mut data = Vec::new();
        data.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        data.extend_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(
            parse_fat_header(&data),
            Err(MachoError::MalformedStructure { .. })
        ));
    }
}
