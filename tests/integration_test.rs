use pretty_assertions::assert_eq;
use std::io::Cursor;
use tsdemux::av::{CodecData, CodecId, MediaType};
use tsdemux::format::ts::{RawTSReader, TSDemuxer, PID_PAT};
use tsdemux::format::Demuxer;
use tsdemux::utils::Crc32Mpeg2;

const PMT_PID: u16 = 0x100;
const VIDEO_PID: u16 = 0x101;

fn section(table_id: u8, id: u16, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut s = vec![table_id, 0xb0 | (len >> 8) as u8, len as u8];
    s.extend_from_slice(&id.to_be_bytes());
    s.extend_from_slice(&[0xc1, 0, 0]);
    s.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&s);
    s.extend_from_slice(&crc.to_be_bytes());
    s
}

/// A single packet with the payload placed after adaptation stuffing.
fn packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 182);
    let mut p = vec![0x47, (u8::from(pusi) << 6) | (pid >> 8) as u8, pid as u8, 0x30 | cc];
    let af_len = 183 - payload.len();
    p.push(af_len as u8);
    if af_len > 0 {
        p.push(0);
        p.extend(std::iter::repeat(0xff).take(af_len - 1));
    }
    p.extend_from_slice(payload);
    assert_eq!(p.len(), 188);
    p
}

fn pes(pts: i64, payload: &[u8]) -> Vec<u8> {
    let len = 3 + 5 + payload.len();
    let mut p = vec![0, 0, 1, 0xe0, (len >> 8) as u8, len as u8, 0x80, 0x80, 5];
    p.extend_from_slice(&[
        0x21 | ((((pts >> 30) & 0x07) as u8) << 1),
        (pts >> 22) as u8,
        ((((pts >> 15) & 0x7f) as u8) << 1) | 1,
        (pts >> 7) as u8,
        (((pts & 0x7f) as u8) << 1) | 1,
    ]);
    p.extend_from_slice(payload);
    p
}

fn sample_stream() -> Vec<u8> {
    let mut out = Vec::new();

    let mut pat = vec![0];
    pat.extend(section(0x00, 1, &[0x00, 0x01, 0xe0 | (PMT_PID >> 8) as u8, PMT_PID as u8]));
    out.extend(packet(PID_PAT, true, 0, &pat));

    let mut pmt = vec![0];
    pmt.extend(section(
        0x02,
        1,
        &[
            0xe0 | (VIDEO_PID >> 8) as u8,
            VIDEO_PID as u8,
            0xf0,
            0x00,
            0x1b,
            0xe0 | (VIDEO_PID >> 8) as u8,
            VIDEO_PID as u8,
            0xf0,
            0x00,
        ],
    ));
    out.extend(packet(PMT_PID, true, 0, &pmt));

    for (cc, pts) in [0i64, 3000, 6000].iter().enumerate() {
        out.extend(packet(VIDEO_PID, true, cc as u8, &pes(*pts, &[0xaa; 32])));
    }
    out
}

#[tokio::test]
async fn test_demux_through_trait() {
    let mut demuxer: Box<dyn Demuxer> = Box::new(TSDemuxer::new(Cursor::new(sample_stream())));
    demuxer.read_header().await.unwrap();

    let streams = demuxer.streams().await.unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].codec_id(), CodecId::H264);
    assert_eq!(streams[0].media_type(), MediaType::Video);

    let mut pts = Vec::new();
    while let Some(packet) = demuxer.read_packet().await.unwrap() {
        assert_eq!(packet.data.len(), 32);
        pts.push(packet.pts);
    }
    assert_eq!(pts, vec![Some(0), Some(3000), Some(6000)]);
}

#[tokio::test]
async fn test_raw_reader_returns_every_packet() {
    let data = sample_stream();
    let total = data.len() / 188;
    let mut reader = RawTSReader::new(Cursor::new(data));
    reader.read_header().await.unwrap();

    let mut count = 0;
    while let Some(packet) = reader.read_packet().await.unwrap() {
        assert_eq!(packet.data.len(), 188);
        assert_eq!(packet.pos, Some(count as u64 * 188));
        count += 1;
    }
    assert_eq!(count, total);
    assert_eq!(reader.stream().codec_id, CodecId::Mpeg2Ts);
}
