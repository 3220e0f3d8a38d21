//! Mach-O file parsing.
//!
//! [`MachOFile`] reads a thin or universal Mach-O, walks its load commands
//! and collects what the metadata decoders need: the section table, defined
//! symbols, bound-symbol relocations and a handful of image facts. The
//! result is handed to the decoders as a [`BinaryImage`].

use std::borrow::Cow;
use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};
use zerocopy::FromBytes;

use super::bind::{parse_bind_info, BindKind};
use super::constants::*;
use super::fixups::apply_chained_fixups;
use super::structs::*;
use crate::error::{Error, Result};
use crate::objc::{BinaryImage, Endian, PointerWidth, Section, Symbol};
use crate::util::c_str_lossy;

// =============================================================================
// Segment Info
// =============================================================================

/// Parsed segment information.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// The segment command, widened to 64 bits
    pub command: SegmentCommand64,
    /// Sections in this segment
    pub sections: Vec<Section64>,
}

impl SegmentInfo {
    /// Returns the segment name.
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&Section64> {
        self.sections.iter().find(|s| s.name() == name)
    }
}

// =============================================================================
// Struct Reading
// =============================================================================

/// Returns true if structures stored in `endian` need swapping on this host.
#[inline]
fn needs_swap(endian: Endian) -> bool {
    (endian == Endian::Big) != cfg!(target_endian = "big")
}

/// Reads a structure at `offset`, swapping it into host order if needed.
fn read_struct<T: FromBytes + SwapBytes>(data: &[u8], offset: usize, swap: bool) -> Result<T> {
    let size = std::mem::size_of::<T>();
    let bytes = data
        .get(offset..)
        .ok_or_else(|| Error::buffer_too_small(offset + size, data.len()))?;
    let value = T::read_from_prefix(bytes)
        .map_err(|_| Error::buffer_too_small(offset + size, data.len()))?
        .0;
    Ok(if swap { value.swap_bytes() } else { value })
}

/// Returns `len` bytes at `offset`, or `None` if the range leaves `data`.
#[inline]
fn range(data: &[u8], offset: u32, len: u32) -> Option<&[u8]> {
    let start = offset as usize;
    data.get(start..start.checked_add(len as usize)?)
}

/// Picks the slice of a universal binary matching `arch`, or the first one.
///
/// Thin files are returned unchanged.
fn select_slice<'d>(data: &'d [u8], arch: Option<&str>) -> Result<&'d [u8]> {
    if data.len() < 4 || BigEndian::read_u32(data) != FAT_MAGIC {
        return Ok(data);
    }

    let swap = needs_swap(Endian::Big);
    let header: FatHeader = read_struct(data, 0, swap)?;
    debug!("Universal binary with {} slices", header.nfat_arch);

    for i in 0..header.nfat_arch as usize {
        let fat_arch: FatArch = read_struct(data, FatHeader::SIZE + i * FatArch::SIZE, swap)?;
        let Some(slice) = range(data, fat_arch.offset, fat_arch.size) else {
            return Err(Error::buffer_too_small(
                fat_arch.offset as usize + fat_arch.size as usize,
                data.len(),
            ));
        };
        trace!(
            "Slice {} at {:#x}+{:#x}",
            fat_arch.arch_name(),
            fat_arch.offset,
            fat_arch.size
        );
        match arch {
            None => return Ok(slice),
            Some(name) if fat_arch.arch_name() == name => return Ok(slice),
            Some(_) => {}
        }
    }

    Err(Error::UnsupportedArch(arch.unwrap_or_default().to_string()))
}

// =============================================================================
// Mach-O File
// =============================================================================

/// A parsed Mach-O image.
///
/// The raw bytes are borrowed unless chained fixups had to be applied, in
/// which case the file owns a rewritten copy.
#[derive(Debug)]
pub struct MachOFile<'a> {
    data: Cow<'a, [u8]>,
    header: MachHeader64,
    pointer_width: PointerWidth,
    endian: Endian,
    segments: Vec<SegmentInfo>,
    symbols: Vec<Symbol>,
    relocations: Option<BTreeMap<u64, String>>,
    encrypted: bool,
}

/// Load commands the parser acts on after the walk.
#[derive(Default)]
struct Commands {
    symtab: Option<SymtabCommand>,
    dyld_info: Option<DyldInfoCommand>,
    chained_fixups: Option<LinkeditDataCommand>,
}

impl<'a> MachOFile<'a> {
    /// Parses a thin or universal Mach-O.
    ///
    /// # Arguments
    /// * `data` - The raw file contents
    /// * `arch` - Architecture to select (e.g. "arm64"). Universal binaries
    ///   default to their first slice.
    pub fn parse(data: &'a [u8], arch: Option<&str>) -> Result<Self> {
        let slice = select_slice(data, arch)?;
        let file = Self::parse_slice(slice)?;

        if let Some(name) = arch {
            if file.arch_name() != name {
                return Err(Error::UnsupportedArch(name.to_string()));
            }
        }
        Ok(file)
    }

    /// Parses a single-architecture Mach-O.
    pub fn parse_slice(data: &'a [u8]) -> Result<Self> {
        if data.len() < MachHeader::SIZE {
            return Err(Error::buffer_too_small(MachHeader::SIZE, data.len()));
        }

        let (pointer_width, endian) = match LittleEndian::read_u32(data) {
            MH_MAGIC_64 => (PointerWidth::Bits64, Endian::Little),
            MH_CIGAM_64 => (PointerWidth::Bits64, Endian::Big),
            MH_MAGIC => (PointerWidth::Bits32, Endian::Little),
            MH_CIGAM => (PointerWidth::Bits32, Endian::Big),
            magic => return Err(Error::InvalidMachoMagic(magic)),
        };
        let swap = needs_swap(endian);

        let (header, header_size) = match pointer_width {
            PointerWidth::Bits64 => (
                read_struct::<MachHeader64>(data, 0, swap)?,
                MachHeader64::SIZE,
            ),
            PointerWidth::Bits32 => (
                read_struct::<MachHeader>(data, 0, swap)?.into(),
                MachHeader::SIZE,
            ),
        };
        debug!("{}", header);

        let mut file = Self {
            data: Cow::Borrowed(data),
            header,
            pointer_width,
            endian,
            segments: Vec::new(),
            symbols: Vec::new(),
            relocations: None,
            encrypted: false,
        };

        let commands = file.parse_load_commands(data, header_size, swap)?;

        if let Some(symtab) = &commands.symtab {
            file.symbols = file.parse_symbols(data, symtab, swap);
        }
        if let Some(dyld_info) = &commands.dyld_info {
            file.relocations = Some(file.parse_binds(data, dyld_info));
        }
        if let Some(fixups) = &commands.chained_fixups {
            file.apply_fixups(data, fixups);
        }

        Ok(file)
    }

    /// Walks the load commands, recording segments and facts.
    fn parse_load_commands(
        &mut self,
        data: &[u8],
        header_size: usize,
        swap: bool,
    ) -> Result<Commands> {
        let mut commands = Commands::default();
        let mut offset = header_size;
        let end_offset = header_size + self.header.sizeofcmds as usize;

        for _ in 0..self.header.ncmds {
            if offset + LoadCommand::SIZE > end_offset || offset + LoadCommand::SIZE > data.len() {
                return Err(Error::LoadCommandOverflow { offset });
            }

            let lc: LoadCommand = read_struct(data, offset, swap)?;
            let cmd_end = offset + lc.cmdsize as usize;
            if (lc.cmdsize as usize) < LoadCommand::SIZE
                || cmd_end > end_offset
                || cmd_end > data.len()
            {
                return Err(Error::LoadCommandOverflow { offset });
            }

            match lc.cmd {
                LC_SEGMENT_64 => {
                    let command: SegmentCommand64 = read_struct(data, offset, swap)?;
                    let sections = read_sections::<Section64>(
                        data,
                        offset + SegmentCommand64::SIZE,
                        command.nsects,
                        cmd_end,
                        swap,
                    )?;
                    self.push_segment(command, sections);
                }

                LC_SEGMENT => {
                    let command: SegmentCommand = read_struct(data, offset, swap)?;
                    let sections = read_sections::<Section32>(
                        data,
                        offset + SegmentCommand::SIZE,
                        command.nsects,
                        cmd_end,
                        swap,
                    )?;
                    self.push_segment(command.into(), sections);
                }

                LC_SYMTAB => {
                    commands.symtab = Some(read_struct(data, offset, swap)?);
                }

                LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                    commands.dyld_info = Some(read_struct(data, offset, swap)?);
                }

                LC_DYLD_CHAINED_FIXUPS => {
                    commands.chained_fixups = Some(read_struct(data, offset, swap)?);
                }

                LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                    let info: EncryptionInfoCommand = read_struct(data, offset, swap)?;
                    if info.cryptid != 0 {
                        debug!(
                            "Encrypted range {:#x}+{:#x} (cryptid {})",
                            info.cryptoff, info.cryptsize, info.cryptid
                        );
                        self.encrypted = true;
                    }
                }

                cmd => trace!("Skipping load command {:#x} at {:#x}", cmd, offset),
            }

            offset = cmd_end;
        }

        debug!(
            "Parsed {} load commands, {} segments",
            self.header.ncmds,
            self.segments.len()
        );
        Ok(commands)
    }

    fn push_segment<S: Into<Section64>>(&mut self, command: SegmentCommand64, sections: Vec<S>) {
        trace!("{}", command);
        self.segments.push(SegmentInfo {
            command,
            sections: sections.into_iter().map(Into::into).collect(),
        });
    }

    /// Reads defined, non-debug symbols.
    fn parse_symbols(&self, data: &[u8], symtab: &SymtabCommand, swap: bool) -> Vec<Symbol> {
        let Some(strings) = range(data, symtab.stroff, symtab.strsize) else {
            warn!(
                "String table {:#x}+{:#x} is outside the image",
                symtab.stroff, symtab.strsize
            );
            return Vec::new();
        };

        let entry_size = match self.pointer_width {
            PointerWidth::Bits64 => Nlist64::SIZE,
            PointerWidth::Bits32 => Nlist::SIZE,
        };
        let start = symtab.symoff as usize;
        let available = data.len().saturating_sub(start) / entry_size;
        let count = (symtab.nsyms as usize).min(available);
        if count < symtab.nsyms as usize {
            warn!(
                "Symbol table truncated: {} of {} entries",
                count, symtab.nsyms
            );
        }

        let mut symbols = Vec::new();
        for i in 0..count {
            let offset = start + i * entry_size;
            let nlist = match self.pointer_width {
                PointerWidth::Bits64 => read_struct::<Nlist64>(data, offset, swap),
                PointerWidth::Bits32 => read_struct::<Nlist>(data, offset, swap).map(Into::into),
            };
            let Ok(nlist) = nlist else {
                break;
            };
            if nlist.is_debug() || !nlist.is_defined() {
                continue;
            }
            let name = strings
                .get(nlist.n_strx as usize..)
                .map(c_str_lossy)
                .unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            symbols.push(Symbol {
                name,
                vaddr: nlist.n_value,
            });
        }

        debug!("Loaded {} symbols", symbols.len());
        symbols
    }

    /// Collects bound symbol names from the dyld bind streams.
    fn parse_binds(&self, data: &[u8], info: &DyldInfoCommand) -> BTreeMap<u64, String> {
        let streams = [
            (BindKind::Regular, info.bind_off, info.bind_size),
            (BindKind::Weak, info.weak_bind_off, info.weak_bind_size),
            (BindKind::Lazy, info.lazy_bind_off, info.lazy_bind_size),
        ];
        let pointer_size = self.pointer_width.size() as u64;

        let mut relocations = BTreeMap::new();
        for (kind, offset, size) in streams {
            if size == 0 {
                continue;
            }
            let Some(stream) = range(data, offset, size) else {
                warn!("{:?} bind info at {:#x}+{:#x} is outside the image", kind, offset, size);
                continue;
            };
            let records = match parse_bind_info(stream, pointer_size, kind) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Skipping {:?} bind info: {}", kind, e);
                    continue;
                }
            };
            for record in records {
                let Some(segment) = self.segments.get(record.segment_index as usize) else {
                    trace!("Bind to missing segment {}", record.segment_index);
                    continue;
                };
                let addr = segment.command.vmaddr.wrapping_add(record.segment_offset);
                relocations.entry(addr).or_insert(record.symbol_name);
            }
        }

        debug!("Collected {} bound symbols", relocations.len());
        relocations
    }

    /// Rewrites chained pointers into an owned copy of the image.
    fn apply_fixups(&mut self, data: &[u8], fixups: &LinkeditDataCommand) {
        let Some(blob) = range(data, fixups.dataoff, fixups.datasize) else {
            warn!(
                "Chained fixups at {:#x}+{:#x} are outside the image",
                fixups.dataoff, fixups.datasize
            );
            return;
        };

        let commands: Vec<SegmentCommand64> =
            self.segments.iter().map(|s| s.command).collect();
        let mut owned = data.to_vec();
        match apply_chained_fixups(&mut owned, blob, &commands, self.base_address()) {
            Ok(binds) => {
                debug!("Applied chained fixups, {} binds", binds.len());
                self.relocations.get_or_insert_with(BTreeMap::new).extend(binds);
                self.data = Cow::Owned(owned);
            }
            Err(e) => warn!("Failed to apply chained fixups: {}", e),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the image bytes (with fixups applied, if any).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the Mach-O header, widened to 64 bits.
    pub fn header(&self) -> &MachHeader64 {
        &self.header
    }

    /// Returns the architecture name.
    pub fn arch_name(&self) -> &'static str {
        self.header.arch_name()
    }

    /// Returns the pointer width.
    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Returns the byte order.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns true if any encryption command has a non-zero cryptid.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns true for Thumb-coded (armv7) images.
    pub fn is_thumb(&self) -> bool {
        self.header.is_thumb()
    }

    /// Returns the vmaddr of the segment mapped at file offset zero.
    pub fn base_address(&self) -> u64 {
        self.segments
            .iter()
            .find(|s| s.command.fileoff == 0 && s.command.filesize != 0)
            .map_or(0, |s| s.command.vmaddr)
    }

    /// Returns the segments in load command order.
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    /// Returns a segment by name.
    pub fn segment(&self, name: &str) -> Option<&SegmentInfo> {
        self.segments.iter().find(|s| s.name() == name)
    }

    /// Returns the defined symbols.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Returns the bound symbol table, if the image has bind info or fixups.
    pub fn relocations(&self) -> Option<&BTreeMap<u64, String>> {
        self.relocations.as_ref()
    }

    /// Returns the file-backed sections as named `SEGMENT,section`.
    ///
    /// Zero-fill sections have no file contents and are left out.
    pub fn image_sections(&self) -> Vec<Section> {
        self.segments
            .iter()
            .flat_map(|seg| &seg.sections)
            .filter(|s| !s.is_zerofill())
            .map(|s| {
                Section::new(
                    format!("{},{}", s.segment_name(), s.name()),
                    s.addr,
                    s.offset as u64,
                    s.size,
                )
            })
            .collect()
    }

    /// Builds the image the metadata decoders consume.
    pub fn to_image(&self) -> BinaryImage<'_> {
        let image = BinaryImage::new(&self.data, self.pointer_width, self.endian)
            .with_sections(self.image_sections())
            .with_encryption(self.encrypted)
            .with_thumb(self.is_thumb())
            .with_base_address(self.base_address())
            .with_symbols(self.symbols.clone());
        match &self.relocations {
            Some(relocations) => image.with_relocations(relocations.clone()),
            None => image,
        }
    }
}

/// Reads `count` section headers starting at `offset`, staying before `end`.
fn read_sections<T: FromBytes + SwapBytes>(
    data: &[u8],
    offset: usize,
    count: u32,
    end: usize,
    swap: bool,
) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if offset + count as usize * size > end {
        return Err(Error::LoadCommandOverflow { offset });
    }
    (0..count as usize)
        .map(|i| read_struct(data, offset + i * size, swap))
        .collect()
}
