//! Capture files
//!
//! Writes a minimal FITS file: the continuum as the primary 8-bit array and
//! the spectrum as an IMAGE extension named SPECTRUM.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::capture::{Capture, CaptureOutcome};

const BLOCK: usize = 2880;
const CARD: usize = 80;

enum Value<'a> {
    Logical(bool),
    Int(i64),
    Float(f64),
    Text(&'a str),
}

/// One 80-column header card in fixed format
fn card(keyword: &str, value: Value<'_>, comment: &str) -> String {
    let value = match value {
        Value::Logical(b) => format!("{:>20}", if b { "T" } else { "F" }),
        Value::Int(i) => format!("{:>20}", i),
        Value::Float(f) => format!("{:>20}", format!("{:.6E}", f)),
        Value::Text(s) => format!("'{:<8}'", s.replace('\'', "''")),
    };
    let mut line = format!("{:<8}= {}", keyword, value);
    if !comment.is_empty() {
        line.push_str(" / ");
        line.push_str(comment);
    }
    line.truncate(CARD);
    format!("{:<80}", line)
}

fn write_header<W: Write>(out: &mut W, cards: &[String]) -> std::io::Result<()> {
    let mut header: String = cards.concat();
    header.push_str(&format!("{:<80}", "END"));
    let padded = header.len().div_ceil(BLOCK) * BLOCK;
    header.push_str(&" ".repeat(padded - header.len()));
    out.write_all(header.as_bytes())
}

fn write_data<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data)?;
    let padding = data.len().div_ceil(BLOCK) * BLOCK - data.len();
    out.write_all(&vec![0u8; padding])
}

/// Serialise a capture into `out`
pub fn write_fits<W: Write>(out: &mut W, device: &str, capture: &Capture) -> std::io::Result<()> {
    let request = &capture.request;
    let date_obs = capture.started_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

    let primary = [
        card("SIMPLE", Value::Logical(true), "conforms to FITS standard"),
        card("BITPIX", Value::Int(8), "unsigned 8-bit samples"),
        card("NAXIS", Value::Int(1), ""),
        card("NAXIS1", Value::Int(capture.continuum.len() as i64), "continuum samples"),
        card("EXTEND", Value::Logical(true), ""),
        card("INSTRUME", Value::Text(device), ""),
        card("DATE-OBS", Value::Text(&date_obs), "UTC capture start"),
        card("EXPTIME", Value::Float(request.duration), "[s] requested duration"),
        card("FREQ", Value::Float(request.frequency as f64), "[Hz] center frequency"),
        card("SAMPRATE", Value::Float(request.sample_rate as f64), "[Hz] sample rate"),
        card("BANDWID", Value::Float(request.bandwidth as f64), "[Hz] bandwidth"),
        card("GAIN", Value::Float(request.gain as f64 / 10.0), "[dB] tuner gain"),
        card(
            "COMPLETE",
            Value::Logical(capture.outcome == CaptureOutcome::Completed),
            "all expected samples received",
        ),
    ];
    write_header(out, &primary)?;
    write_data(out, &capture.continuum)?;

    let extension = [
        card("XTENSION", Value::Text("IMAGE"), ""),
        card("BITPIX", Value::Int(8), ""),
        card("NAXIS", Value::Int(1), ""),
        card("NAXIS1", Value::Int(capture.spectrum.len() as i64), "spectrum bins"),
        card("PCOUNT", Value::Int(0), ""),
        card("GCOUNT", Value::Int(1), ""),
        card("EXTNAME", Value::Text("SPECTRUM"), ""),
    ];
    write_header(out, &extension)?;
    write_data(out, &capture.spectrum)?;
    Ok(())
}

/// File name for a capture: device name plus start time
pub fn capture_file_name(device: &str, capture: &Capture) -> String {
    let device: String = device
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}.fits", device, capture.started_at.format("%Y%m%dT%H%M%S%.3f"))
}

/// Write a capture file into `dir`
pub fn save_capture(dir: &Path, device: &str, capture: &Capture) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let path = dir.join(capture_file_name(device, capture));

    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_fits(&mut out, device, capture).with_context(|| format!("Failed to write {}", path.display()))?;
    out.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::transform::SPECTRUM_SIZE;
    use crate::capture::CaptureRequest;
    use chrono::{TimeZone, Utc};

    fn capture(len: usize) -> Capture {
        Capture {
            outcome: CaptureOutcome::Completed,
            request: CaptureRequest {
                duration: 1.0,
                sample_rate: 10_000,
                frequency: 100_000_000,
                gain: 87,
                bandwidth: 10_000,
            },
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            expected_bytes: len,
            continuum: vec![7u8; len],
            spectrum: vec![3u8; SPECTRUM_SIZE],
        }
    }

    #[test]
    fn test_card_layout() {
        let c = card("BITPIX", Value::Int(8), "");
        assert_eq!(c.len(), CARD);
        assert_eq!(&c[..10], "BITPIX  = ");
        assert_eq!(&c[29..30], "8");

        let c = card("EXTNAME", Value::Text("SPECTRUM"), "");
        assert!(c.starts_with("EXTNAME = 'SPECTRUM'"));
    }

    #[test]
    fn test_fits_is_block_aligned() {
        let mut out = Vec::new();
        write_fits(&mut out, "RTL-SDR Receiver 0", &capture(10_240)).unwrap();

        assert_eq!(out.len() % BLOCK, 0);
        // primary header + 4 data blocks + extension header + 1 data block
        assert_eq!(out.len(), BLOCK * 7);
        assert!(out.starts_with(b"SIMPLE  =                    T"));

        let text = String::from_utf8_lossy(&out[..BLOCK]);
        assert!(text.contains("NAXIS1  =                10240"));
        assert!(text.contains("DATE-OBS= '2024-03-01T12:30:00.000'"));
        assert!(text.contains("END"));

        let ext = String::from_utf8_lossy(&out[BLOCK * 5..BLOCK * 6]);
        assert!(ext.starts_with("XTENSION= 'IMAGE   '"));
        assert!(ext.contains("NAXIS1  =                  256"));
    }

    #[test]
    fn test_file_name() {
        let name = capture_file_name("RTL-SDR Receiver 0", &capture(512));
        assert_eq!(name, "RTL-SDR_Receiver_0_20240301T123000.000.fits");
    }

    #[test]
    fn test_save_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_capture(dir.path(), "RTL-SDR Receiver 0", &capture(512)).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), BLOCK * 4);
    }
}
