use super::types::{MAX_PIDS_PER_PROGRAM, MAX_STREAMS_PER_PROGRAM, PID_PAT};
use crate::av::Stream;
use log::debug;

/// A stream announced by a PMT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStream {
    /// Index in the demuxer's stream list.
    pub index: usize,
    pub stream_identifier: Option<u8>,
}

/// One service of the transport stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// program_number from the PAT.
    pub id: u16,
    pub pmt_pid: Option<u16>,
    pub pcr_pid: Option<u16>,
    pub pmt_version: Option<u8>,
    pub pmt_found: bool,
    /// PIDs of the program, the PMT PID first.
    pub pids: Vec<u16>,
    /// Streams in PMT order.
    pub streams: Vec<ProgramStream>,
    /// Streams sharing the PID of a PMT entry, such as the AC-3 core of
    /// an HDMV TrueHD track.
    pub sub_streams: Vec<usize>,
    pub discard: bool,
}

impl Program {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Forgets the PIDs and streams of the program.
    pub fn clear(&mut self) {
        self.pids.clear();
        self.streams.clear();
        self.sub_streams.clear();
        self.pmt_found = false;
    }

    pub fn add_pid(&mut self, pid: u16) {
        if self.pids.contains(&pid) || self.pids.len() >= MAX_PIDS_PER_PROGRAM {
            return;
        }
        self.pids.push(pid);
    }

    pub fn add_stream(&mut self, index: usize, stream_identifier: Option<u8>) {
        if self.streams.len() < MAX_STREAMS_PER_PROGRAM {
            self.streams.push(ProgramStream {
                index,
                stream_identifier,
            });
        }
    }

    pub fn add_sub_stream(&mut self, index: usize) {
        if !self.sub_streams.contains(&index) {
            self.sub_streams.push(index);
        }
    }

    pub fn has_stream(&self, index: usize) -> bool {
        self.streams.iter().any(|s| s.index == index) || self.sub_streams.contains(&index)
    }

    /// Finds the stream of a previous PMT version that a new entry
    /// continues: by stream identifier when the entry has one, using the
    /// PMT position to choose among duplicates, else by position alone.
    pub fn find_matching_stream(
        &self,
        stream_identifier: Option<u8>,
        pmt_stream_idx: usize,
    ) -> Option<usize> {
        match stream_identifier {
            Some(id) => {
                let mut found = None;
                for (i, s) in self.streams.iter().enumerate() {
                    if s.stream_identifier == Some(id) && (found.is_none() || i == pmt_stream_idx) {
                        found = Some(s.index);
                    }
                }
                found
            }
            None => self.streams.get(pmt_stream_idx).map(|s| s.index),
        }
    }
}

/// The programs listed by the current PAT.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: Vec<Program>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u16) -> Option<&Program> {
        self.programs.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut Program> {
        self.programs.iter_mut().find(|p| p.id == id)
    }

    /// Returns the program `id`, creating it when unknown.
    pub fn add(&mut self, id: u16) -> &mut Program {
        match self.programs.iter().position(|p| p.id == id) {
            Some(i) => &mut self.programs[i],
            None => {
                debug!("new program {}", id);
                self.programs.push(Program::new(id));
                let last = self.programs.len() - 1;
                &mut self.programs[last]
            }
        }
    }

    /// Keeps only the programs whose id is in `ids`, in that order.
    /// Returns the removed programs.
    pub fn retain_ordered(&mut self, ids: &[u16]) -> Vec<Program> {
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(i) = self.programs.iter().position(|p| p.id == *id) {
                kept.push(self.programs.remove(i));
            }
        }
        std::mem::replace(&mut self.programs, kept)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Programs that contain the stream `index`.
    pub fn with_stream(&self, index: usize) -> impl Iterator<Item = &Program> {
        self.programs.iter().filter(move |p| p.has_stream(index))
    }

    /// A PID is discarded when it belongs to some program and every program
    /// it belongs to is discarded. The PAT PID never is.
    pub fn is_pid_discarded(&self, pid: u16) -> bool {
        if pid == PID_PAT {
            return false;
        }
        let mut used = false;
        let mut discarded = false;
        for program in self.programs.iter().filter(|p| p.pids.contains(&pid)) {
            if program.discard {
                discarded = true;
            } else {
                used = true;
            }
        }
        !used && discarded
    }

    /// True when every program has seen its PMT.
    pub fn all_pmts_found(&self) -> bool {
        self.programs.iter().all(|p| p.pmt_found)
    }

    /// Removes every program.
    pub fn clear(&mut self) {
        self.programs.clear();
    }
}

/// Discard state of a stream, following its programs when it has any.
pub fn stream_discarded(registry: &ProgramRegistry, stream: &Stream) -> bool {
    let mut programs = registry.with_stream(stream.index).peekable();
    if stream.discard {
        return true;
    }
    programs.peek().is_some() && programs.all(|p| p.discard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_pid_bounded_and_unique() {
        let mut program = Program::new(1);
        program.add_pid(0x100);
        program.add_pid(0x100);
        assert_eq!(program.pids, vec![0x100]);
        for pid in 0..200 {
            program.add_pid(0x200 + pid);
        }
        assert_eq!(program.pids.len(), MAX_PIDS_PER_PROGRAM);
    }

    #[test]
    fn test_find_matching_stream() {
        let mut program = Program::new(1);
        program.add_stream(4, Some(0x10));
        program.add_stream(5, Some(0x11));
        program.add_stream(6, Some(0x11));
        program.add_stream(7, None);

        assert_eq!(program.find_matching_stream(Some(0x10), 3), Some(4));
        // duplicate identifiers fall back to the PMT position
        assert_eq!(program.find_matching_stream(Some(0x11), 2), Some(6));
        assert_eq!(program.find_matching_stream(Some(0x11), 0), Some(5));
        assert_eq!(program.find_matching_stream(Some(0x42), 0), None);
        assert_eq!(program.find_matching_stream(None, 3), Some(7));
        assert_eq!(program.find_matching_stream(None, 9), None);
    }

    #[test]
    fn test_retain_ordered() {
        let mut registry = ProgramRegistry::new();
        registry.add(1);
        registry.add(2);
        registry.add(3);
        let removed = registry.retain_ordered(&[3, 1, 9]);
        assert_eq!(registry.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(removed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_pid_discard() {
        let mut registry = ProgramRegistry::new();
        registry.add(1).add_pid(0x100);
        registry.add(2).add_pid(0x100);
        registry.add(2).add_pid(0x200);
        registry.get_mut(2).unwrap().discard = true;

        assert!(!registry.is_pid_discarded(0x100));
        assert!(registry.is_pid_discarded(0x200));
        assert!(!registry.is_pid_discarded(0x300));
        assert!(!registry.is_pid_discarded(PID_PAT));

        registry.get_mut(1).unwrap().discard = true;
        assert!(registry.is_pid_discarded(0x100));
    }

    #[test]
    fn test_stream_discard_follows_programs() {
        let mut registry = ProgramRegistry::new();
        registry.add(1).add_stream(0, None);
        let mut stream = Stream::new(0, 0x100);
        assert!(!stream_discarded(&registry, &stream));
        registry.get_mut(1).unwrap().discard = true;
        assert!(stream_discarded(&registry, &stream));

        let orphan = Stream::new(1, 0x101);
        assert!(!stream_discarded(&registry, &orphan));
        stream.discard = true;
        registry.get_mut(1).unwrap().discard = false;
        assert!(stream_discarded(&registry, &stream));
    }
}
