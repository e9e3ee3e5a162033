use goblin::container::{Container, Ctx};
use goblin::elf::dynamic::{DT_RPATH, DT_RUNPATH, DT_STRSZ, DT_STRTAB};
use goblin::elf::header::{Header, ET_REL};
use goblin::elf::program_header::{ProgramHeader, PF_R, PT_DYNAMIC, PT_INTERP, PT_LOAD, PT_PHDR};
use goblin::elf::section_header::{SectionHeader, SHT_PROGBITS, SHT_STRTAB};
use goblin::elf::{dynamic::Dyn, Elf};
use scroll::ctx::{SizeWith, TryIntoCtx};
use scroll::Endian;

use super::ElfError;

const PAGE_SIZE: u64 = 0x1000;

const fn align8(value: usize) -> usize {
    value.wrapping_add(7) & !7
}

const fn align_page(value: u64) -> u64 {
    value.wrapping_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A parsed ELF image with pending interpreter/rpath edits.
///
/// Edits accumulate against working copies of the dynamic string table
/// and the headers; [`ElfImage::build`] decides the layout. When a
/// replacement string fits its old slot everything is rewritten in
/// place. When something grew, the affected tables move into a new
/// page-aligned `PT_LOAD` segment appended to the image, together with
/// the enlarged program header table, and every referring header is
/// repointed. Load-segment addresses and alignment of the original
/// segments are never disturbed.
#[derive(Debug)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    ctx: Ctx,
    header: Header,
    program_headers: Vec<ProgramHeader>,
    section_headers: Vec<SectionHeader>,
    dynamic: Option<Vec<Dyn>>,
    dynstr: Vec<u8>,
    dynstr_offset: usize,
    dynstr_size: usize,
    dynstr_dirty: bool,
    interp_offset: usize,
    interp_size: usize,
    new_interp: Option<Vec<u8>>,
}

impl<'a> ElfImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let elf = Elf::parse(data)?;
        if elf.header.e_type == ET_REL {
            return Err(ElfError::Unsupported);
        }

        let container = if elf.is_64 {
            Container::Big
        } else {
            Container::Little
        };
        let endian = if elf.little_endian {
            Endian::Little
        } else {
            Endian::Big
        };
        let ctx = Ctx::new(container, endian);

        let mut dynstr = Vec::new();
        let mut dynstr_offset = 0;
        let mut dynstr_size = 0;
        if let Some(dynamic) = &elf.dynamic {
            dynstr_offset = dynamic.info.strtab;
            dynstr_size = dynamic.info.strsz;
            let end = dynstr_offset
                .checked_add(dynstr_size)
                .ok_or(ElfError::Layout("dynamic string table overflows"))?;
            if end > data.len() {
                return Err(ElfError::Layout("dynamic string table out of bounds"));
            }
            dynstr.extend_from_slice(&data[dynstr_offset..end]);
        }

        let (interp_offset, interp_size) = elf
            .program_headers
            .iter()
            .find(|ph| ph.p_type == PT_INTERP)
            .map(|ph| (ph.p_offset as usize, ph.p_filesz as usize))
            .unwrap_or((0, 0));
        if interp_offset.saturating_add(interp_size) > data.len() {
            return Err(ElfError::Layout("interpreter segment out of bounds"));
        }

        Ok(ElfImage {
            data,
            ctx,
            header: elf.header,
            program_headers: elf.program_headers.clone(),
            section_headers: elf.section_headers.clone(),
            dynamic: elf.dynamic.as_ref().map(|d| d.dyns.clone()),
            dynstr,
            dynstr_offset,
            dynstr_size,
            dynstr_dirty: false,
            interp_offset,
            interp_size,
            new_interp: None,
        })
    }

    /// The `PT_INTERP` string, without its terminator.
    pub fn interpreter(&self) -> Option<&[u8]> {
        if self.interp_size == 0 {
            return None;
        }
        let raw = &self.data[self.interp_offset..self.interp_offset + self.interp_size];
        let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Some(&raw[..len])
    }

    fn rpath_entry(&self) -> Option<&Dyn> {
        let dyns = self.dynamic.as_ref()?;
        dyns.iter()
            .find(|d| d.d_tag == DT_RUNPATH)
            .or_else(|| dyns.iter().find(|d| d.d_tag == DT_RPATH))
    }

    fn string_at(&self, offset: usize) -> &[u8] {
        let tail = self.dynstr.get(offset..).unwrap_or_default();
        let len = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        &tail[..len]
    }

    /// The `DT_RUNPATH` (preferred) or `DT_RPATH` string.
    pub fn rpath(&self) -> Option<Vec<u8>> {
        let entry = self.rpath_entry()?;
        Some(self.string_at(entry.d_val as usize).to_vec())
    }

    pub fn set_interpreter(&mut self, interp: &[u8]) {
        self.new_interp = Some(interp.to_vec());
    }

    /// Replace the existing rpath string, keeping its tag. The new
    /// string reuses the old slot when it fits; otherwise it is appended
    /// to the working string table, which forces relocation on build.
    pub fn set_rpath(&mut self, rpath: &[u8]) -> Result<(), ElfError> {
        let entry = self.rpath_entry().ok_or(ElfError::NoRpath)?;
        let offset = entry.d_val as usize;
        let tag = entry.d_tag;
        if offset > self.dynstr.len() {
            return Err(ElfError::Layout("rpath string offset out of bounds"));
        }
        let old_len = self.string_at(offset).len() + 1;

        // Abandoned bytes are overwritten, not left dangling.
        let taint_end = (offset + old_len - 1).min(self.dynstr.len());
        for byte in &mut self.dynstr[offset..taint_end] {
            *byte = b'X';
        }

        let new_offset = if rpath.len() + 1 <= old_len && offset + rpath.len() < self.dynstr.len() {
            self.dynstr[offset..offset + rpath.len()].copy_from_slice(rpath);
            self.dynstr[offset + rpath.len()] = 0;
            offset
        } else {
            let appended = self.dynstr.len();
            self.dynstr.extend_from_slice(rpath);
            self.dynstr.push(0);
            appended
        };
        self.dynstr_dirty = true;

        if let Some(dyns) = self.dynamic.as_mut() {
            for entry in dyns.iter_mut() {
                if entry.d_tag == tag {
                    entry.d_val = new_offset as u64;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Unused bytes between the end of the string table and the next
    /// section, available for in-place growth.
    fn slack_after_dynstr(&self) -> usize {
        let end = self.dynstr_offset + self.dynstr_size;
        self.section_headers
            .iter()
            .filter(|sh| sh.sh_offset as usize >= end && sh.sh_offset > 0)
            .map(|sh| sh.sh_offset as usize)
            .min()
            .map(|next| next - end)
            .unwrap_or(0)
    }

    pub fn build(self) -> Result<Vec<u8>, ElfError> {
        let interp_grew = match &self.new_interp {
            Some(interp) => self.interp_size == 0 || interp.len() + 1 > self.interp_size,
            None => false,
        };
        let dynstr_growth = self.dynstr.len().saturating_sub(self.dynstr_size);
        if interp_grew || dynstr_growth > self.slack_after_dynstr() {
            self.build_relocated(interp_grew)
        } else {
            self.build_in_place()
        }
    }

    fn write_dynamic(&self, out: &mut [u8], entries: &[Dyn]) -> Result<(), ElfError> {
        let Some(segment) = self
            .program_headers
            .iter()
            .find(|ph| ph.p_type == PT_DYNAMIC)
        else {
            return Ok(());
        };
        let entry_size = Dyn::size_with(&self.ctx);
        let base = segment.p_offset as usize;
        if base + entries.len() * entry_size > out.len() {
            return Err(ElfError::Layout("dynamic section extends beyond file"));
        }
        for (idx, entry) in entries.iter().enumerate() {
            entry
                .clone()
                .try_into_ctx(&mut out[base + idx * entry_size..], self.ctx)?;
        }
        Ok(())
    }

    fn write_section_header(&self, out: &mut [u8], idx: usize) -> Result<(), ElfError> {
        let sh_size = SectionHeader::size_with(&self.ctx);
        let at = self.header.e_shoff as usize + idx * sh_size;
        if at + sh_size > out.len() {
            return Err(ElfError::Layout("section header table out of bounds"));
        }
        self.section_headers[idx]
            .clone()
            .try_into_ctx(&mut out[at..], self.ctx)?;
        Ok(())
    }

    fn dynstr_section_index(&self) -> Option<usize> {
        self.section_headers
            .iter()
            .position(|sh| sh.sh_type == SHT_STRTAB && sh.sh_offset as usize == self.dynstr_offset)
    }

    fn interp_section_index(&self) -> Option<usize> {
        self.section_headers.iter().position(|sh| {
            sh.sh_type == SHT_PROGBITS && sh.sh_offset as usize == self.interp_offset
        })
    }

    /// Every replacement fits its slot (or the slack after `.dynstr`):
    /// overwrite the image in place.
    fn build_in_place(mut self) -> Result<Vec<u8>, ElfError> {
        let mut out = self.data.to_vec();

        if let Some(interp) = &self.new_interp {
            let slot = &mut out[self.interp_offset..self.interp_offset + self.interp_size];
            slot.fill(0);
            slot[..interp.len()].copy_from_slice(interp);
        }

        if self.dynstr_dirty {
            let end = self.dynstr_offset + self.dynstr.len();
            if end > out.len() {
                return Err(ElfError::Layout("string table grows past end of file"));
            }
            out[self.dynstr_offset..end].copy_from_slice(&self.dynstr);

            if let Some(dyns) = &self.dynamic {
                let mut dyns = dyns.clone();
                if self.dynstr.len() != self.dynstr_size {
                    for entry in &mut dyns {
                        if entry.d_tag == DT_STRSZ {
                            entry.d_val = self.dynstr.len() as u64;
                        }
                    }
                }
                self.write_dynamic(&mut out, &dyns)?;
            }

            if self.dynstr.len() != self.dynstr_size {
                if let Some(idx) = self.dynstr_section_index() {
                    self.section_headers[idx].sh_size = self.dynstr.len() as u64;
                    self.write_section_header(&mut out, idx)?;
                }
            }
        }

        Ok(out)
    }

    /// Something grew: move the grown tables and the program header
    /// table into a fresh `PT_LOAD` segment appended past the end of the
    /// image.
    fn build_relocated(mut self, move_interp: bool) -> Result<Vec<u8>, ElfError> {
        let ph_size = ProgramHeader::size_with(&self.ctx);
        let new_ph_count = self.program_headers.len() + 1;
        let move_dynstr = self.dynstr.len() > self.dynstr_size;

        // Segment layout: program headers, then the relocated tables.
        let mut cursor = new_ph_count * ph_size;
        let interp_len = self.new_interp.as_ref().map(|i| i.len() + 1).unwrap_or(0);
        let interp_rel = if move_interp {
            cursor = align8(cursor);
            let rel = cursor;
            cursor += interp_len;
            Some(rel)
        } else {
            None
        };
        let dynstr_rel = if move_dynstr {
            cursor = align8(cursor);
            let rel = cursor;
            cursor += self.dynstr.len();
            Some(rel)
        } else {
            None
        };
        let segment_size = align8(cursor);

        let file_offset = align_page(self.data.len() as u64) as usize;
        let vaddr = align_page(
            self.program_headers
                .iter()
                .filter(|ph| ph.p_type == PT_LOAD)
                .map(|ph| ph.p_vaddr + ph.p_memsz)
                .max()
                .unwrap_or(0),
        );

        let mut out = vec![0u8; file_offset + segment_size];
        out[..self.data.len()].copy_from_slice(self.data);

        if let Some(interp) = &self.new_interp {
            match interp_rel {
                Some(rel) => {
                    let at = file_offset + rel;
                    out[at..at + interp.len()].copy_from_slice(interp);
                }
                None => {
                    // The interpreter still fits its old slot even though
                    // something else forced relocation.
                    let slot = &mut out[self.interp_offset..self.interp_offset + self.interp_size];
                    slot.fill(0);
                    slot[..interp.len()].copy_from_slice(interp);
                }
            }
        }
        match dynstr_rel {
            Some(rel) => {
                let at = file_offset + rel;
                out[at..at + self.dynstr.len()].copy_from_slice(&self.dynstr);
                // The abandoned table stays mapped; taint it so stale
                // reads are visible instead of silently valid.
                for byte in &mut out[self.dynstr_offset..self.dynstr_offset + self.dynstr_size] {
                    *byte = b'X';
                }
            }
            None if self.dynstr_dirty => {
                out[self.dynstr_offset..self.dynstr_offset + self.dynstr.len()]
                    .copy_from_slice(&self.dynstr);
            }
            None => {}
        }

        for ph in &mut self.program_headers {
            match ph.p_type {
                PT_PHDR => {
                    ph.p_offset = file_offset as u64;
                    ph.p_vaddr = vaddr;
                    ph.p_paddr = vaddr;
                    ph.p_filesz = (new_ph_count * ph_size) as u64;
                    ph.p_memsz = ph.p_filesz;
                }
                PT_INTERP => {
                    if let Some(rel) = interp_rel {
                        ph.p_offset = (file_offset + rel) as u64;
                        ph.p_vaddr = vaddr + rel as u64;
                        ph.p_paddr = ph.p_vaddr;
                        ph.p_filesz = interp_len as u64;
                        ph.p_memsz = ph.p_filesz;
                    }
                }
                _ => {}
            }
        }
        self.program_headers.push(ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_R,
            p_offset: file_offset as u64,
            p_vaddr: vaddr,
            p_paddr: vaddr,
            p_filesz: segment_size as u64,
            p_memsz: segment_size as u64,
            p_align: PAGE_SIZE,
        });

        self.header.e_phoff = file_offset as u64;
        self.header.e_phnum = new_ph_count as u16;
        self.header.try_into_ctx(&mut out[..], self.ctx.le)?;
        for (idx, ph) in self.program_headers.iter().enumerate() {
            ph.clone()
                .try_into_ctx(&mut out[file_offset + idx * ph_size..], self.ctx)?;
        }

        if let Some(rel) = interp_rel {
            if let Some(idx) = self.interp_section_index() {
                let section = &mut self.section_headers[idx];
                section.sh_offset = (file_offset + rel) as u64;
                section.sh_addr = vaddr + rel as u64;
                section.sh_size = interp_len as u64;
                self.write_section_header(&mut out, idx)?;
            }
        }
        if let Some(rel) = dynstr_rel {
            if let Some(idx) = self.dynstr_section_index() {
                let section = &mut self.section_headers[idx];
                section.sh_offset = (file_offset + rel) as u64;
                section.sh_addr = vaddr + rel as u64;
                section.sh_size = self.dynstr.len() as u64;
                section.sh_addralign = 8;
                self.write_section_header(&mut out, idx)?;
            }
        }

        if let Some(dyns) = &self.dynamic {
            let mut dyns = dyns.clone();
            if let Some(rel) = dynstr_rel {
                for entry in &mut dyns {
                    match entry.d_tag {
                        DT_STRTAB => entry.d_val = vaddr + rel as u64,
                        DT_STRSZ => entry.d_val = self.dynstr.len() as u64,
                        _ => {}
                    }
                }
            }
            self.write_dynamic(&mut out, &dyns)?;
        }

        Ok(out)
    }
}
