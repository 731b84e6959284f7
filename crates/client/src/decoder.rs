//! CDC-path frame decoder
//!
//! Drives a [`ByteStreamReader`] through the frame state machine:
//! sync, header, optional table/prelude, payload, optional CRC trailer.
//! Header parsing and CRC candidate evaluation are pure functions in the
//! `protocol` crate; this module owns the I/O sequencing, the dynamic
//! payload deadline, the CRC-delimited fallback scan and the bounded
//! resync/retry loop.

use crate::error::{ClientError, Result};
use crate::reader::{ByteStreamReader, ByteTransport};
use protocol::cdc::{self, CdcHeader, FrameKind};
use protocol::integrity::{self, CrcVariant};
use protocol::frame::{CdcFrame, SampleMatrix, Window};
use std::time::{Duration, Instant};
use tracing::debug;

/// CRC trailer handling on the CDC path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolicy {
    /// Evaluate the candidate set; reject the frame when nothing matches
    Auto,
    /// Skip validation (plotting/debug use)
    Disabled,
}

/// Decoder tuning knobs
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub crc: CrcPolicy,
    /// Deadline for finding the sync magic
    pub sync_wait: Duration,
    /// Base deadline for header/table/trailer reads
    pub io_timeout: Duration,
    /// Overall deadline for one `read_frame` call
    pub frame_timeout: Option<Duration>,
    /// Resync-and-reparse attempts before surfacing the last error
    pub max_retries: u32,
    /// Low-latency mode: skip the fallback payload scan entirely
    pub fast_drop: bool,
    /// Accept the byte-swapped sync magic as a frame start
    pub allow_swapped_magic: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            crc: CrcPolicy::Auto,
            sync_wait: Duration::from_secs(3),
            io_timeout: Duration::from_secs(1),
            frame_timeout: None,
            max_retries: 5,
            fast_drop: false,
            allow_swapped_magic: false,
        }
    }
}

/// Per-call deadline shared by every read inside one `read_frame`
struct FrameDeadline(Option<Instant>);

impl FrameDeadline {
    fn expired(&self) -> bool {
        self.0.is_some_and(|d| Instant::now() >= d)
    }

    /// Clamp a step deadline to the frame deadline
    fn remain(&self, step: Duration) -> Result<Duration> {
        match self.0 {
            None => Ok(step),
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    Err(ClientError::TransportTimeout("frame deadline"))
                } else {
                    Ok(step.min(d - now))
                }
            }
        }
    }
}

fn hex_head(bytes: &[u8], n: usize) -> String {
    bytes
        .iter()
        .take(n)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One parsed frame before matrix assembly
struct FrameParts {
    header: CdcHeader,
    header_raw: [u8; cdc::HEADER_LEN],
    kind: FrameKind,
    channels: u16,
    samples: u32,
    windows: Vec<Window>,
    table: Vec<u8>,
    payload: Vec<u8>,
    trailer: Option<[u8; 4]>,
    variant: Option<CrcVariant>,
}

/// CDC frame decoder
pub struct FrameDecoder {
    opts: DecodeOptions,
}

impl FrameDecoder {
    pub fn new(opts: DecodeOptions) -> Self {
        Self { opts }
    }

    /// Read one frame, resyncing and retrying on recoverable failures
    ///
    /// The final failure carries the full diagnostic context of the last
    /// attempt (hex heads and computed CRC candidates for CRC rejects).
    pub fn read_frame<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
    ) -> Result<CdcFrame> {
        let deadline = FrameDeadline(self.opts.frame_timeout.map(|t| Instant::now() + t));
        let mut last_err: Option<ClientError> = None;

        for attempt in 0..self.opts.max_retries.max(1) {
            if deadline.expired() {
                break;
            }
            match self.try_read_frame(reader, &deadline) {
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_recoverable() => {
                    debug!(attempt, error = %e, "frame parse failed, resyncing");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(ClientError::TransportTimeout("frame")))
    }

    fn try_read_frame<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
    ) -> Result<CdcFrame> {
        reader.sync_to_magic(
            deadline.remain(self.opts.sync_wait)?,
            self.opts.allow_swapped_magic,
        )?;

        let header_bytes = reader.read_exact(
            cdc::HEADER_LEN,
            "header",
            deadline.remain(self.opts.io_timeout)?,
        )?;
        let mut header_raw = [0u8; cdc::HEADER_LEN];
        header_raw.copy_from_slice(&header_bytes);
        let header = CdcHeader::parse(&header_raw);
        if header.ambiguous_layout {
            debug!(
                seq = header.seq,
                "both header field orders plausible, using primary"
            );
        }

        let kind = header.kind();
        let channels = header.channels();
        if !(1..=8).contains(&channels) {
            return Err(ClientError::Length(format!(
                "bad channel count: {}",
                channels
            )));
        }

        let mut parts = match kind {
            FrameKind::DiagFake => self.read_diag(reader, deadline, header, header_raw)?,
            FrameKind::Special => self.read_special(reader, deadline, header, header_raw)?,
            FrameKind::PerChannel => self.read_per_channel(reader, deadline, header, header_raw)?,
            FrameKind::Windowed => self.read_windowed(reader, deadline, header, header_raw)?,
            FrameKind::ZeroTable => self.read_zero_table(reader, deadline, header, header_raw)?,
        };

        self.validate_crc(&mut parts)?;
        Ok(self.assemble(parts))
    }

    /// Fixed 128x2 diagnostic frame, no CRC trailer
    fn read_diag<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: CdcHeader,
        header_raw: [u8; cdc::HEADER_LEN],
    ) -> Result<FrameParts> {
        let samples = cdc::DIAG_SAMPLES as u32;
        let channels = cdc::DIAG_CHANNELS;
        let payload = self.read_payload(
            reader,
            deadline,
            samples as usize * channels as usize * 2,
        )?;
        Ok(FrameParts {
            header,
            header_raw,
            kind: FrameKind::DiagFake,
            channels,
            samples,
            windows: vec![Window::new(0, cdc::DIAG_SAMPLES)],
            table: Vec::new(),
            payload,
            trailer: None,
            variant: None,
        })
    }

    /// 4-byte prelude format; payload length from the prelude candidates,
    /// or CRC-delimited when neither candidate is usable
    fn read_special<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: CdcHeader,
        header_raw: [u8; cdc::HEADER_LEN],
    ) -> Result<FrameParts> {
        let channels = header.channels();
        let table = reader.read_exact(4, "prelude", deadline.remain(self.opts.io_timeout)?)?;
        let prelude = [table[0], table[1], table[2], table[3]];

        if let Some(len) = cdc::resolve_special_len(&prelude) {
            let payload =
                self.read_payload(reader, deadline, len as usize * channels as usize * 2)?;
            return Ok(FrameParts {
                header,
                header_raw,
                kind: FrameKind::Special,
                channels,
                samples: len,
                windows: vec![Window::new(0, len as u16)],
                table,
                payload,
                trailer: None,
                variant: None,
            });
        }

        if self.opts.fast_drop {
            return Err(ClientError::Length(
                "special-format length unresolved (fast drop)".into(),
            ));
        }
        let (payload, trailer, variant) = self.fallback_scan(
            reader,
            deadline,
            &header_raw,
            &table,
            &CrcVariant::WITH_TABLE,
        )?;
        let samples = (payload.len() / 2 / channels as usize) as u32;
        if samples == 0 {
            return Err(ClientError::Length(
                "zero samples after CRC delimitation".into(),
            ));
        }
        Ok(FrameParts {
            header,
            header_raw,
            kind: FrameKind::Special,
            channels,
            samples,
            windows: vec![Window::new(0, samples as u16)],
            table,
            payload,
            trailer: Some(trailer),
            variant: Some(variant),
        })
    }

    /// Per-channel layout: the header declares samples per channel; the
    /// table (when present) holds each channel's start, or start/length
    fn read_per_channel<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: CdcHeader,
        header_raw: [u8; cdc::HEADER_LEN],
    ) -> Result<FrameParts> {
        let channels = header.channels();
        let mut samples = header.total_samples as u32;
        if !cdc::reasonable_samples(samples) {
            return Err(ClientError::Length(format!(
                "bad per-channel sample count: {}",
                samples
            )));
        }

        let table_bytes = header.table_bytes as usize;
        let starts_only = channels as usize * 2;
        let start_len_pairs = channels as usize * 4;
        let mut table = Vec::new();
        let mut windows = Vec::with_capacity(channels as usize);

        if table_bytes == 0 {
            for _ in 0..channels {
                windows.push(Window::new(0, samples as u16));
            }
        } else if table_bytes == starts_only {
            table = reader.read_exact(
                table_bytes,
                "per-channel starts",
                deadline.remain(self.opts.io_timeout)?,
            )?;
            for chunk in table.chunks_exact(2) {
                let start = u16::from_le_bytes([chunk[0], chunk[1]]);
                windows.push(Window::new(start, samples as u16));
            }
        } else if table_bytes == start_len_pairs {
            table = reader.read_exact(
                table_bytes,
                "per-channel table",
                deadline.remain(self.opts.io_timeout)?,
            )?;
            let entries = cdc::parse_window_table(&table)?;
            if let Some(first) = entries.first()
                && entries.iter().all(|w| w.length == first.length)
            {
                samples = first.length as u32;
            }
            for entry in &entries {
                windows.push(Window::new(entry.start, samples as u16));
            }
        } else {
            return Err(ClientError::Length(format!(
                "unexpected table size {} for {} per-channel starts",
                table_bytes, channels
            )));
        }

        let payload =
            self.read_payload(reader, deadline, samples as usize * channels as usize * 2)?;
        let trailer = self.read_trailer(reader, deadline)?;
        Ok(FrameParts {
            header,
            header_raw,
            kind: FrameKind::PerChannel,
            channels,
            samples,
            windows,
            table,
            payload,
            trailer: Some(trailer),
            variant: None,
        })
    }

    /// Generic windowed layout with the sum-vs-difference count heuristic
    fn read_windowed<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: CdcHeader,
        header_raw: [u8; cdc::HEADER_LEN],
    ) -> Result<FrameParts> {
        let channels = header.channels();
        let table_bytes = header.table_bytes;
        if table_bytes % 4 != 0 || table_bytes > cdc::MAX_TABLE_BYTES {
            return Err(ClientError::Length(format!(
                "bad table size: {}",
                table_bytes
            )));
        }

        let table = reader.read_exact(
            table_bytes as usize,
            "window table",
            deadline.remain(self.opts.io_timeout)?,
        )?;
        let windows = cdc::parse_window_table(&table)?;
        let (count, used_difference) = cdc::resolve_window_count(&windows);
        if used_difference {
            debug!(seq = header.seq, "window table read as end offsets");
        }

        if cdc::reasonable_samples(count) {
            let payload =
                self.read_payload(reader, deadline, count as usize * channels as usize * 2)?;
            let trailer = self.read_trailer(reader, deadline)?;
            return Ok(FrameParts {
                header,
                header_raw,
                kind: FrameKind::Windowed,
                channels,
                samples: count,
                windows,
                table,
                payload,
                trailer: Some(trailer),
                variant: None,
            });
        }

        if self.opts.fast_drop {
            return Err(ClientError::Length(
                "window sample count unresolved (fast drop)".into(),
            ));
        }
        let (payload, trailer, variant) = self.fallback_scan(
            reader,
            deadline,
            &header_raw,
            &table,
            &CrcVariant::TABLE_BODIES,
        )?;
        let samples = (payload.len() / 2 / channels as usize) as u32;
        if samples == 0 {
            return Err(ClientError::Length(
                "zero samples after CRC delimitation".into(),
            ));
        }
        Ok(FrameParts {
            header,
            header_raw,
            kind: FrameKind::Windowed,
            channels,
            samples,
            windows,
            table,
            payload,
            trailer: Some(trailer),
            variant: Some(variant),
        })
    }

    /// No table: one implicit window spans the header-declared length
    fn read_zero_table<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: CdcHeader,
        header_raw: [u8; cdc::HEADER_LEN],
    ) -> Result<FrameParts> {
        let channels = header.channels();
        let declared = header.total_samples as u32;
        if declared == 0 {
            return Err(ClientError::Length(
                "zero-table frame with zero declared samples".into(),
            ));
        }

        let payload = self.read_payload(reader, deadline, declared as usize * 2)?;
        let trailer = self.read_trailer(reader, deadline)?;
        let samples = (payload.len() / 2) as u32 / channels as u32;
        if samples == 0 {
            return Err(ClientError::Length(
                "zero samples per channel after payload read".into(),
            ));
        }
        Ok(FrameParts {
            header,
            header_raw,
            kind: FrameKind::ZeroTable,
            channels,
            samples,
            windows: vec![Window::new(0, samples as u16)],
            table: Vec::new(),
            payload,
            trailer: Some(trailer),
            variant: None,
        })
    }

    /// Payload read deadline scaled by the transport's byte rate, so large
    /// frames on slow links are not cut off prematurely
    fn read_payload<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        len: usize,
    ) -> Result<Vec<u8>> {
        let rate = reader.byte_rate().max(1.0);
        let estimate = Duration::from_secs_f64(len as f64 / rate + 0.5);
        let step = self.opts.io_timeout.max(estimate);
        reader.read_exact(len, "payload", deadline.remain(step)?)
    }

    fn read_trailer<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
    ) -> Result<[u8; 4]> {
        let bytes = reader.read_exact(4, "crc32", deadline.remain(self.opts.io_timeout)?)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Grow the payload in fixed steps until some CRC candidate matches the
    /// next four bytes, up to a hard cap
    fn fallback_scan<T: ByteTransport>(
        &self,
        reader: &mut ByteStreamReader<T>,
        deadline: &FrameDeadline,
        header: &[u8],
        table: &[u8],
        candidates: &[CrcVariant],
    ) -> Result<(Vec<u8>, [u8; 4], CrcVariant)> {
        let mut payload = Vec::new();
        loop {
            if payload.len() >= cdc::MAX_FALLBACK_PAYLOAD {
                return Err(ClientError::Length(format!(
                    "payload grew past {} bytes without a CRC match",
                    cdc::MAX_FALLBACK_PAYLOAD
                )));
            }
            let step = reader.read_exact(
                cdc::FALLBACK_STEP,
                "payload step",
                deadline.remain(self.opts.io_timeout)?,
            )?;
            payload.extend_from_slice(&step);
            let probe =
                reader.read_exact(4, "crc probe", deadline.remain(self.opts.io_timeout)?)?;
            let probe = [probe[0], probe[1], probe[2], probe[3]];
            if let Some(variant) =
                integrity::resolve_crc32(candidates, &cdc::MAGIC, header, table, &payload, probe)
            {
                debug!(variant = variant.name(), len = payload.len(), "fallback scan matched");
                return Ok((payload, probe, variant));
            }
            payload.extend_from_slice(&probe);
        }
    }

    /// Resolve the trailer against the candidate set; hard-reject on miss
    fn validate_crc(&self, parts: &mut FrameParts) -> Result<()> {
        let Some(trailer) = parts.trailer else {
            return Ok(());
        };
        if parts.variant.is_some() || self.opts.crc == CrcPolicy::Disabled {
            return Ok(());
        }

        let candidates = CrcVariant::candidates(!parts.table.is_empty());
        match integrity::resolve_crc32(
            candidates,
            &cdc::MAGIC,
            &parts.header_raw,
            &parts.table,
            &parts.payload,
            trailer,
        ) {
            Some(variant) => {
                parts.variant = Some(variant);
                Ok(())
            }
            None => {
                let report = integrity::candidate_report(
                    candidates,
                    &cdc::MAGIC,
                    &parts.header_raw,
                    &parts.table,
                    &parts.payload,
                );
                Err(ClientError::CrcMismatch(format!(
                    "seq={}, wins={}, msec={}, total={}, hdr16={}, tbl_head={}, payload_head={}, crc_le={:08x}, cand={}",
                    parts.header.seq,
                    parts.windows.len(),
                    parts.header.timestamp_ms,
                    parts.samples,
                    hex_head(&parts.header_raw, 16),
                    hex_head(&parts.table, 16),
                    hex_head(&parts.payload, 16),
                    u32::from_le_bytes(trailer),
                    report
                )))
            }
        }
    }

    fn assemble(&self, parts: FrameParts) -> CdcFrame {
        let data = SampleMatrix::from_le_bytes(&parts.payload, parts.channels as usize);
        let mut raw = Vec::with_capacity(
            2 + cdc::HEADER_LEN + parts.table.len() + parts.payload.len() + 4,
        );
        raw.extend_from_slice(&cdc::MAGIC);
        raw.extend_from_slice(&parts.header_raw);
        raw.extend_from_slice(&parts.table);
        raw.extend_from_slice(&parts.payload);
        if let Some(trailer) = parts.trailer {
            raw.extend_from_slice(&trailer);
        }

        CdcFrame {
            version: parts.header.version,
            seq: parts.header.seq,
            timestamp_ms: parts.header.timestamp_ms,
            flags: parts.header.flags,
            kind: parts.kind,
            channels: parts.channels,
            total_samples: parts.samples,
            header_total_samples: parts.header.total_samples,
            ambiguous_layout: parts.header.ambiguous_layout,
            windows: parts.windows,
            data,
            crc_variant: parts.variant,
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use protocol::cdc::{
        FMT_DIAG, FMT_PER_CHANNEL, FMT_SPECIAL, encode_header, encode_windowed_frame,
    };

    fn fast_opts() -> DecodeOptions {
        DecodeOptions {
            sync_wait: Duration::from_millis(30),
            io_timeout: Duration::from_millis(30),
            max_retries: 2,
            ..DecodeOptions::default()
        }
    }

    fn reader_for(stream: Vec<u8>) -> ByteStreamReader<MockTransport> {
        ByteStreamReader::new(MockTransport::from_bytes(&stream, 64))
    }

    #[test]
    fn test_windowed_roundtrip_incl_tbl() {
        let samples: Vec<i16> = (0..16).map(|i| i * 3 - 20).collect();
        let wire = encode_windowed_frame(
            3,
            2,
            &[Window::new(0, 8)],
            &samples,
            CrcVariant::InclTable,
        );
        let decoder = FrameDecoder::new(fast_opts());
        let frame = decoder.read_frame(&mut reader_for(wire.clone())).unwrap();

        assert_eq!(frame.seq, 3);
        assert_eq!(frame.kind, FrameKind::Windowed);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.total_samples, 8);
        assert_eq!(frame.windows, vec![Window::new(0, 8)]);
        assert_eq!(frame.data.rows(), 8);
        assert_eq!(frame.data.as_slice(), samples.as_slice());
        assert_eq!(frame.crc_variant.map(|v| v.name()), Some("incl+tbl"));
        assert_eq!(frame.raw, wire);
    }

    #[test]
    fn test_resync_past_garbage_prefix() {
        let mut stream = vec![0xEE, 0x00, 0x12];
        stream.extend(encode_windowed_frame(
            7,
            1,
            &[Window::new(0, 4)],
            &[1, 2, 3, 4],
            CrcVariant::ExclTable,
        ));
        let decoder = FrameDecoder::new(fast_opts());
        let frame = decoder.read_frame(&mut reader_for(stream)).unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.crc_variant, Some(CrcVariant::ExclTable));
    }

    #[test]
    fn test_corrupt_frame_retries_to_next_good_frame() {
        let mut bad = encode_windowed_frame(1, 1, &[Window::new(0, 2)], &[5, 6], CrcVariant::InclTable);
        let len = bad.len();
        bad[len - 1] ^= 0xFF; // break the trailer
        let good = encode_windowed_frame(2, 1, &[Window::new(0, 2)], &[7, 8], CrcVariant::InclTable);

        let mut stream = bad;
        stream.extend(good);
        let decoder = FrameDecoder::new(fast_opts());
        let frame = decoder.read_frame(&mut reader_for(stream)).unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(frame.data.as_slice(), &[7, 8]);
    }

    #[test]
    fn test_crc_mismatch_reports_candidates() {
        let mut wire = encode_windowed_frame(9, 1, &[Window::new(0, 2)], &[1, 2], CrcVariant::InclTable);
        let len = wire.len();
        wire[len - 2] ^= 0x55;
        let opts = DecodeOptions {
            max_retries: 1,
            ..fast_opts()
        };
        let err = FrameDecoder::new(opts)
            .read_frame(&mut reader_for(wire))
            .unwrap_err();
        match err {
            ClientError::CrcMismatch(msg) => {
                assert!(msg.contains("seq=9"));
                assert!(msg.contains("hdr16="));
                assert!(msg.contains("incl+tbl="));
            }
            other => panic!("expected CrcMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_table_zero_samples_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&encode_header(1, 0, 0, 4, 0, 2, 0));
        let opts = DecodeOptions {
            max_retries: 1,
            ..fast_opts()
        };
        let err = FrameDecoder::new(opts)
            .read_frame(&mut reader_for(stream))
            .unwrap_err();
        assert!(matches!(err, ClientError::Length(_)));
    }

    #[test]
    fn test_zero_table_frame_decodes() {
        let header = encode_header(1, 8, 0, 5, 0, 2, 0);
        let payload: Vec<u8> = (0u8..16).collect();
        let crc = CrcVariant::Excl.compute(&cdc::MAGIC, &header, &[], &payload);

        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(&crc.to_le_bytes());

        let frame = FrameDecoder::new(fast_opts())
            .read_frame(&mut reader_for(stream))
            .unwrap();
        assert_eq!(frame.kind, FrameKind::ZeroTable);
        // 8 total samples across 2 channels -> 4 per channel
        assert_eq!(frame.total_samples, 4);
        assert_eq!(frame.windows, vec![Window::new(0, 4)]);
        assert_eq!(frame.crc_variant, Some(CrcVariant::Excl));
    }

    #[test]
    fn test_diag_fake_frame() {
        let header = encode_header(1, 0, 0, 11, FMT_DIAG, 0, 0);
        let payload = vec![0xAB; 128 * 2 * 2];
        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&payload);

        let frame = FrameDecoder::new(fast_opts())
            .read_frame(&mut reader_for(stream))
            .unwrap();
        assert_eq!(frame.kind, FrameKind::DiagFake);
        assert!(frame.is_diagnostic());
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.total_samples, 128);
        assert_eq!(frame.data.rows(), 128);
        assert_eq!(frame.crc_variant, None);
    }

    #[test]
    fn test_special_format_prelude_length() {
        let header = encode_header(1, 0, 0, 6, FMT_SPECIAL, 2, 0);
        let mut prelude = [0u8; 4];
        prelude[0..2].copy_from_slice(&100u16.to_le_bytes());
        prelude[2..4].copy_from_slice(&108u16.to_le_bytes());
        // larger candidate (108) wins
        let payload = vec![0u8; 108 * 2 * 2];

        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&prelude);
        stream.extend_from_slice(&payload);

        let frame = FrameDecoder::new(fast_opts())
            .read_frame(&mut reader_for(stream))
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Special);
        assert_eq!(frame.total_samples, 108);
        assert_eq!(frame.crc_variant, None);
    }

    #[test]
    fn test_per_channel_implicit_windows() {
        let header = encode_header(1, 4, 0, 2, FMT_PER_CHANNEL, 2, 0);
        let payload: Vec<u8> = (0u8..16).collect();
        let crc = CrcVariant::Excl.compute(&cdc::MAGIC, &header, &[], &payload);

        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(&crc.to_le_bytes());

        let frame = FrameDecoder::new(fast_opts())
            .read_frame(&mut reader_for(stream))
            .unwrap();
        assert_eq!(frame.kind, FrameKind::PerChannel);
        assert_eq!(frame.total_samples, 4);
        assert_eq!(frame.windows, vec![Window::new(0, 4), Window::new(0, 4)]);
    }

    #[test]
    fn test_fallback_scan_recovers_length() {
        // Window sum 40000 is implausible in both interpretations, forcing
        // the CRC-delimited scan.
        let header = encode_header(1, 0, 0, 8, 0, 2, 4);
        let mut table = Vec::new();
        table.extend_from_slice(&0u16.to_le_bytes());
        table.extend_from_slice(&40000u16.to_le_bytes());
        let payload = vec![0x42u8; 32];
        let crc = CrcVariant::ExclTable.compute(&cdc::MAGIC, &header, &table, &payload);

        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&table);
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(&crc.to_le_bytes());

        let frame = FrameDecoder::new(fast_opts())
            .read_frame(&mut reader_for(stream))
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Windowed);
        // 32 payload bytes -> 16 samples -> 8 per channel
        assert_eq!(frame.total_samples, 8);
        assert_eq!(frame.crc_variant, Some(CrcVariant::ExclTable));
    }

    #[test]
    fn test_fast_drop_skips_fallback() {
        let header = encode_header(1, 0, 0, 8, 0, 2, 4);
        let mut stream = Vec::new();
        stream.extend_from_slice(&cdc::MAGIC);
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.extend_from_slice(&40000u16.to_le_bytes());
        stream.extend(vec![0x42u8; 64]);

        let opts = DecodeOptions {
            fast_drop: true,
            max_retries: 1,
            ..fast_opts()
        };
        let err = FrameDecoder::new(opts)
            .read_frame(&mut reader_for(stream))
            .unwrap_err();
        assert!(matches!(err, ClientError::Length(_)));
    }

    #[test]
    fn test_crc_disabled_accepts_any_trailer() {
        let mut wire = encode_windowed_frame(4, 1, &[Window::new(0, 2)], &[9, 9], CrcVariant::InclTable);
        let len = wire.len();
        wire[len - 1] ^= 0xFF;
        let opts = DecodeOptions {
            crc: CrcPolicy::Disabled,
            ..fast_opts()
        };
        let frame = FrameDecoder::new(opts)
            .read_frame(&mut reader_for(wire))
            .unwrap();
        assert_eq!(frame.seq, 4);
        assert_eq!(frame.crc_variant, None);
    }
}
