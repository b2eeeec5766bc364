//! PSI/SI table handlers: how PAT, PMT, SDT, EIT and SCTE-35 sections
//! update the demuxer.

use super::demuxer::{program_pcr, DemuxState};
use super::descriptor::{
    apply_descriptors, find_stream_identifier, program_registration, IOD_DESCRIPTOR,
};
use super::mp4::{read_iod, Mp4Descr, MAX_MP4_DESCR_COUNT};
use super::parser::DescriptorIter;
use super::program::Program;
use super::section::{Section, SectionFilter, SectionKind};
use super::stream_type::{find_stream_type, is_pes_stream, set_stream_info, SCTE_TYPES};
use super::types::*;
use crate::av::{fourcc, CodecId, MediaType, Packet};
use crate::error::Result;
use crate::utils::ByteReader;
use log::{debug, info, trace, warn};

impl DemuxState {
    /// Feeds a payload fragment to a section filter and handles every
    /// section it completes. Stops early when a handler closes the filter.
    pub(super) fn write_section(
        &mut self,
        pid: u16,
        filter: &mut SectionFilter,
        data: &[u8],
        is_start: bool,
        pos: u64,
    ) {
        let sections = filter.write(data, is_start, self.filters.crc_validity_mut(pid));
        for section in sections {
            self.handle_section(pid, filter, &section, pos);
            if self.filters.taken_closed() {
                break;
            }
        }
    }

    fn handle_section(&mut self, pid: u16, filter: &mut SectionFilter, section: &Section, pos: u64) {
        let result = match filter.kind {
            SectionKind::Pat => self.handle_pat(pid, filter, section),
            SectionKind::Pmt => self.handle_pmt(pid, filter, section),
            SectionKind::Sdt => self.handle_sdt(filter, section),
            SectionKind::Eit => self.handle_eit(section, pos),
            SectionKind::Scte35 => self.handle_scte35(pid, section, pos),
        };
        if let Err(e) = result {
            debug!("pid {:#x}: dropped {:?} section: {}", pid, filter.kind, e);
        }
        if section.crc_forced {
            // let a correct copy of this version through later
            filter.forget_version();
        }
    }

    fn handle_pat(&mut self, pid: u16, filter: &mut SectionFilter, section: &Section) -> Result<()> {
        let mut r = ByteReader::new(section_body(section));
        let header = self.parser.parse_section_header(&mut r)?;
        if header.table_id != TABLE_ID_PAT || !header.current_next {
            return Ok(());
        }
        if self.config.skip_changes {
            return Ok(());
        }
        if filter.skip_identical(header.version, section.crc) {
            return Ok(());
        }
        trace!("PAT version {} tsid {:#x}", header.version, header.id);
        self.transport_stream_id = Some(header.id);

        let mut listed = Vec::new();
        for entry in self.parser.parse_pat(&mut r) {
            if entry.pid == pid {
                break;
            }
            debug!("sid={:#x} pid={:#x}", entry.program_number, entry.pid);
            if entry.program_number == 0 {
                // network PID
                continue;
            }
            let pmt_pid = entry.pid;
            if self
                .filters
                .get(pmt_pid)
                .is_some_and(|f| f.section_kind() != Some(SectionKind::Pmt))
            {
                self.close_filter(pmt_pid);
            }
            if !self.filters.contains(pmt_pid) {
                if let Err(e) = self.filters.open_section(pmt_pid, SectionKind::Pmt) {
                    warn!("cannot open PMT filter: {}", e);
                }
            }

            let program = self.programs.add(entry.program_number);
            program.pmt_pid = Some(pmt_pid);
            if program.pids.first().is_some_and(|&p| p != pmt_pid) {
                program.clear();
            }
            program.add_pid(pmt_pid);
            listed.push(entry.program_number);
        }

        if !self.config.skip_clear {
            for removed in self.programs.retain_ordered(&listed) {
                info!("program {} is no longer listed in the PAT", removed.id);
            }
        }
        Ok(())
    }

    fn handle_pmt(&mut self, pid: u16, filter: &mut SectionFilter, section: &Section) -> Result<()> {
        let mut r = ByteReader::new(section_body(section));
        let header = self.parser.parse_section_header(&mut r)?;
        if header.table_id != TABLE_ID_PMT || !header.current_next {
            return Ok(());
        }
        if !self.config.scan_all_pmts.enabled() && self.config.skip_changes {
            return Ok(());
        }
        if filter.skip_identical(header.version, section.crc) {
            return Ok(());
        }

        let program_id = header.id;
        let known = self.programs.get(program_id).is_some();
        if self.config.skip_unknown_pmt && !known {
            return Ok(());
        }
        if self
            .programs
            .get(program_id)
            .is_some_and(|p| p.pids.first().is_some_and(|&first| first != pid))
        {
            return Ok(());
        }
        trace!("PMT program {} version {}", program_id, header.version);

        let old_program = self
            .programs
            .get(program_id)
            .cloned()
            .unwrap_or_else(|| Program::new(program_id));
        let mut program = old_program.clone();
        program.clear();
        program.add_pid(pid);

        let pmt = self.parser.parse_pmt(&mut r)?;
        program.add_pid(pmt.pcr_pid);
        program.pcr_pid = Some(pmt.pcr_pid);
        program.pmt_version = Some(header.version);
        debug!("pcr_pid={:#x}", pmt.pcr_pid);

        let mut mp4_descrs: Vec<Mp4Descr> = Vec::new();
        for (tag, body) in DescriptorIter::new(pmt.program_info).map_while(|d| d.ok()) {
            if tag == IOD_DESCRIPTOR && body.len() >= 2 {
                // scope and label
                mp4_descrs = read_iod(&body[2..]);
                mp4_descrs.truncate(MAX_MP4_DESCR_COUNT);
            }
        }
        let prog_reg_desc = program_registration(pmt.program_info);

        let result = if pmt.elementary_stream_infos.is_empty() {
            Ok(())
        } else {
            self.pmt_seen = true;
            program.pmt_found = true;
            self.add_pmt_streams(
                pid,
                &mut program,
                &old_program,
                &pmt.elementary_stream_infos,
                &mp4_descrs,
                prog_reg_desc,
            )
        };

        if let Some(slot) = self.programs.get_mut(program_id) {
            *slot = program;
        }
        result
    }

    fn add_pmt_streams(
        &mut self,
        pmt_pid: u16,
        program: &mut Program,
        old_program: &Program,
        entries: &[ElementaryStreamInfo<'_>],
        mp4_descrs: &[Mp4Descr],
        prog_reg_desc: Option<u32>,
    ) -> Result<()> {
        let merge = self.config.merge_pmt_versions;
        for (i, entry) in entries.iter().enumerate() {
            let es_pid = entry.elementary_pid;
            let stream_type = entry.stream_type;
            if es_pid == pmt_pid {
                return Ok(());
            }
            let stream_identifier = find_stream_identifier(entry.descriptors);
            let matching = || {
                if merge {
                    old_program.find_matching_stream(stream_identifier, i)
                } else {
                    None
                }
            };

            let has_pes_filter = self.filters.get(es_pid).is_some_and(|f| f.is_pes());
            let index = if has_pes_filter || is_pes_stream(stream_type, prog_reg_desc) {
                if !has_pes_filter {
                    // wrongly added section filter
                    self.close_filter(es_pid);
                    self.filters.open_pes(es_pid, 0)?;
                }
                let current = self.filters.get(es_pid).and_then(|f| f.pes()).and_then(|p| p.stream);
                let index = match current {
                    Some(index) => index,
                    None => match matching() {
                        Some(index) => {
                            debug!("pid {:#x}: merged into stream {}", es_pid, index);
                            if let Some(pes) = self.filters.get_mut(es_pid).and_then(|f| f.pes_mut()) {
                                pes.stream_type = stream_type;
                            }
                            index
                        }
                        None => self.add_stream(es_pid),
                    },
                };
                if let Some(pes) = self.filters.get_mut(es_pid).and_then(|f| f.pes_mut()) {
                    pes.stream = Some(index);
                }
                self.classify_pes_stream(es_pid, index, stream_type, prog_reg_desc);
                index
            } else {
                let existing = self.streams.iter().position(|s| s.pid == es_pid);
                match existing.or_else(matching) {
                    Some(index) => index,
                    None => {
                        let index = self.add_stream(es_pid);
                        let stream = &mut self.streams[index];
                        stream.stream_type = stream_type;
                        stream.codec_tag = stream_type as u32;
                        stream.set_codec(MediaType::Data, CodecId::None);
                        if stream_type == STREAM_TYPE_SCTE35 && prog_reg_desc == Some(fourcc(b"CUEI")) {
                            if let Some((media_type, codec_id)) =
                                find_stream_type(SCTE_TYPES, stream_type as u32)
                            {
                                stream.set_codec(media_type, codec_id);
                            }
                            if let Err(e) = self.filters.open_section(es_pid, SectionKind::Scte35) {
                                warn!("cannot open SCTE-35 filter: {}", e);
                            }
                        }
                        index
                    }
                }
            };

            program.add_pid(es_pid);
            program.add_stream(index, stream_identifier);
            apply_descriptors(
                &mut self.streams[index],
                stream_type,
                entry.descriptors,
                mp4_descrs,
                es_pid,
            );

            if let Some(pes) = self.filters.get_mut(es_pid).and_then(|f| f.pes_mut()) {
                if prog_reg_desc == Some(fourcc(b"HDMV")) && stream_type == STREAM_TYPE_BLURAY_TRUEHD {
                    if let Some(sub) = pes.sub_stream {
                        program.add_sub_stream(sub);
                        self.streams[sub].codec_tag = self.streams[index].codec_tag;
                    }
                }
                if pes.stream_type == STREAM_TYPE_MPEG4_SL {
                    pes.sl = self.streams[index].sl;
                }
            }
        }

        if let Some(pcr_pid) = program.pcr_pid.filter(|&p| p != PID_NULL) {
            if !self.filters.contains(pcr_pid) {
                if let Err(e) = self.filters.open_pcr(pcr_pid) {
                    debug!("cannot open PCR filter: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Gives a PES filter that has not been classified yet its stream type,
    /// creating the AC-3 sub-stream of HDMV TrueHD tracks.
    fn classify_pes_stream(
        &mut self,
        pid: u16,
        index: usize,
        stream_type: u8,
        prog_reg_desc: Option<u32>,
    ) {
        let unclassified = self
            .filters
            .get(pid)
            .and_then(|f| f.pes())
            .is_some_and(|p| p.stream_type == 0);
        if !unclassified {
            return;
        }
        let needs_sub_stream = set_stream_info(&mut self.streams[index], stream_type, prog_reg_desc);
        let has_sub_stream = self
            .filters
            .get(pid)
            .and_then(|f| f.pes())
            .is_some_and(|p| p.sub_stream.is_some());
        let sub_stream = if needs_sub_stream && !has_sub_stream {
            let sub = self.add_stream(pid);
            let stream = &mut self.streams[sub];
            stream.stream_type = stream_type;
            stream.set_codec(MediaType::Audio, CodecId::Ac3);
            Some(sub)
        } else {
            None
        };
        if let Some(pes) = self.filters.get_mut(pid).and_then(|f| f.pes_mut()) {
            pes.stream_type = stream_type;
            if sub_stream.is_some() {
                pes.sub_stream = sub_stream;
            }
        }
    }

    fn handle_sdt(&mut self, filter: &mut SectionFilter, section: &Section) -> Result<()> {
        let mut r = ByteReader::new(section_body(section));
        let header = self.parser.parse_section_header(&mut r)?;
        if header.table_id != TABLE_ID_SDT || !header.current_next {
            return Ok(());
        }
        if self.config.skip_changes {
            return Ok(());
        }
        if filter.skip_identical(header.version, section.crc) {
            return Ok(());
        }
        for service in self.parser.parse_sdt(&mut r)? {
            if service.service_name.is_none() {
                continue;
            }
            debug!(
                "service {:#x}: {:?} by {:?}",
                service.service_id, service.service_name, service.provider_name
            );
            self.services.insert(service.service_id, service);
        }
        Ok(())
    }

    fn handle_eit(&mut self, section: &Section, pos: u64) -> Result<()> {
        let mut r = ByteReader::new(section_body(section));
        let header = self.parser.parse_section_header(&mut r)?;
        if !(TABLE_ID_EIT_FIRST..=TABLE_ID_EIT_LAST).contains(&header.table_id) {
            return Ok(());
        }
        if self.config.skip_changes {
            return Ok(());
        }
        if header.id == 0xffff {
            warn!("scrambled EIT table received");
            return Ok(());
        }
        if !self.header_read {
            return Ok(());
        }

        let stream_index = match self.epg_stream {
            Some(index) => index,
            None => {
                let index = self.add_stream(PID_EIT);
                self.streams[index].set_codec(MediaType::Data, CodecId::Epg);
                self.epg_stream = Some(index);
                index
            }
        };
        self.queue.push_back(
            Packet::new(section.data.clone())
                .with_stream_index(stream_index)
                .with_pos(pos),
        );
        Ok(())
    }

    fn handle_scte35(&mut self, pid: u16, section: &Section, pos: u64) -> Result<()> {
        let Some(stream_index) = self.streams.iter().position(|s| s.pid == pid) else {
            return Ok(());
        };
        if !self.header_read {
            return Ok(());
        }
        let current_pcr = self.filters.get(pid).and_then(|f| f.last_pcr);
        let pcr = program_pcr(&self.programs, &self.filters, stream_index, pid, current_pcr);

        let mut packet = Packet::new(section.data.clone())
            .with_stream_index(stream_index)
            .with_pos(pos);
        packet.pts = pcr;
        packet.dts = pcr;
        self.queue.push_back(packet);
        Ok(())
    }
}

/// Section bytes without the trailing CRC_32.
fn section_body(section: &Section) -> &[u8] {
    let len = section.data.len().saturating_sub(4);
    &section.data[..len]
}
