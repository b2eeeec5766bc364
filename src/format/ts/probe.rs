use super::types::*;

/// Score margin a packet size must clear over the other candidates.
pub const PROBE_PACKET_MARGIN: i32 = 5;
/// Upper bound on the bytes inspected by packet size detection.
pub const PROBE_PACKET_MAX_BUF: usize = 8192;
/// Growth step of the detection window.
pub const PROBE_PACKET_STEP: usize = 512;

/// Scores how well `buf` fits a grid of `packet_size` byte packets.
///
/// Counts sync bytes per residue modulo `packet_size` and returns the best
/// residue count minus a penalty for sync bytes scattered over the other
/// residues. With `probe` set, only sync bytes that look like a plausible
/// header (NULL PID or a non-zero adaptation_field_control) are counted.
pub fn analyze(buf: &[u8], packet_size: usize, probe: bool) -> i32 {
    let mut stat = vec![0i32; packet_size];
    let mut stat_all = 0i32;
    let mut best_score = 0i32;

    for i in 0..buf.len().saturating_sub(3) {
        if buf[i] != SYNC_BYTE {
            continue;
        }
        let pid = u16::from_be_bytes([buf[i + 1], buf[i + 2]]) & 0x1fff;
        let afc = buf[i + 3] & 0x30;
        if !probe || pid == PID_NULL || afc != 0 {
            let x = i % packet_size;
            stat[x] += 1;
            stat_all += 1;
            best_score = best_score.max(stat[x]);
        }
    }

    best_score - (stat_all - 10 * best_score).max(0) / 10
}

/// Detects the raw packet size of `buf`.
///
/// The window grows in [`PROBE_PACKET_STEP`] increments up to
/// [`PROBE_PACKET_MAX_BUF`] bytes and the first size whose score beats both
/// other candidates by [`PROBE_PACKET_MARGIN`] wins. Returns `None` when no
/// size stands out.
pub fn detect_packet_size(buf: &[u8]) -> Option<usize> {
    let limit = buf.len().min(PROBE_PACKET_MAX_BUF);
    let mut end = 0;
    while end < limit {
        end = (end + PROBE_PACKET_STEP).min(limit);
        let window = &buf[..end];
        let score = analyze(window, TS_PACKET_SIZE, false);
        let dvhs_score = analyze(window, TS_DVHS_PACKET_SIZE, false);
        let fec_score = analyze(window, TS_FEC_PACKET_SIZE, false);
        log::trace!(
            "packet size scores over {} bytes: 188={} 192={} 204={}",
            end,
            score,
            dvhs_score,
            fec_score
        );

        if score > fec_score.max(dvhs_score) + PROBE_PACKET_MARGIN {
            return Some(TS_PACKET_SIZE);
        } else if dvhs_score > score.max(fec_score) + PROBE_PACKET_MARGIN {
            return Some(TS_DVHS_PACKET_SIZE);
        } else if fec_score > score.max(dvhs_score) + PROBE_PACKET_MARGIN {
            return Some(TS_FEC_PACKET_SIZE);
        }
    }
    None
}
