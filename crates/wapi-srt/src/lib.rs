//! SRT (SubRip) rendering for a [`WhisperResult`]'s segments.
//!
//! Grounded in `original_source/src/whisper_api/data_models/task.py`'s
//! `WhisperResult.get_srt_buffer` (which drives whisper's `WriteSRT`
//! writer). The exact grammar is fully specified by the surrounding
//! document (`index`, `HH:MM:SS,mmm --> HH:MM:SS,mmm`, text, blank line),
//! so it's implemented directly rather than round-tripped through a
//! general-purpose subtitle crate (see DESIGN.md for why `srtlib` was
//! dropped in favor of a hand-rolled implementation; see DESIGN.md).

use log::warn;
use wapi_common::{Result, WApiError};
use wapi_protocol::Segment;

/// Renders segments into SRT text.
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (idx, seg) in segments.iter().enumerate() {
        if seg.end_s < seg.start_s {
            warn!("segment {idx} has end before start ({} < {})", seg.end_s, seg.start_s);
        }
        out.push_str(&(idx + 1).to_string());
        out.push('\n');
        out.push_str(&format!("{} --> {}\n", format_timestamp(seg.start_s), format_timestamp(seg.end_s)));
        out.push_str(seg.text.trim());
        out.push_str("\n\n");
    }
    out
}

/// Parses SRT text back into segments (used for round-trip tests and by
/// clients re-ingesting a downloaded `.srt`). Token-level data is not
/// recoverable from SRT and is left `None`.
pub fn parse(srt: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut blocks = srt.split("\n\n").map(str::trim).filter(|b| !b.is_empty());

    for block in &mut blocks {
        let mut lines = block.lines();
        let _index = lines
            .next()
            .ok_or_else(|| WApiError::MalformedMessage("missing cue index".to_string()))?;
        let time_line = lines
            .next()
            .ok_or_else(|| WApiError::MalformedMessage("missing cue timing line".to_string()))?;
        let (start_raw, end_raw) = time_line
            .split_once(" --> ")
            .ok_or_else(|| WApiError::MalformedMessage(format!("malformed timing line: {time_line}")))?;
        let start_s = parse_timestamp(start_raw.trim())?;
        let end_s = parse_timestamp(end_raw.trim())?;
        let text = lines.collect::<Vec<_>>().join("\n");

        segments.push(Segment { start_s, end_s, text, tokens: None });
    }

    Ok(segments)
}

fn format_timestamp(total_seconds: f64) -> String {
    let total_seconds = total_seconds.max(0.0);
    let millis_total = (total_seconds * 1000.0).round() as i64;
    let ms = millis_total % 1000;
    let total_secs = millis_total / 1000;
    let s = total_secs % 60;
    let total_mins = total_secs / 60;
    let m = total_mins % 60;
    let h = total_mins / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn parse_timestamp(raw: &str) -> Result<f64> {
    let (hms, ms) = raw
        .split_once(',')
        .ok_or_else(|| WApiError::MalformedMessage(format!("malformed timestamp: {raw}")))?;
    let mut parts = hms.split(':');
    let h: f64 = parts
        .next()
        .ok_or_else(|| WApiError::MalformedMessage(format!("malformed timestamp: {raw}")))?
        .parse()
        .map_err(|_| WApiError::MalformedMessage(format!("malformed hours: {raw}")))?;
    let m: f64 = parts
        .next()
        .ok_or_else(|| WApiError::MalformedMessage(format!("malformed timestamp: {raw}")))?
        .parse()
        .map_err(|_| WApiError::MalformedMessage(format!("malformed minutes: {raw}")))?;
    let s: f64 = parts
        .next()
        .ok_or_else(|| WApiError::MalformedMessage(format!("malformed timestamp: {raw}")))?
        .parse()
        .map_err(|_| WApiError::MalformedMessage(format!("malformed seconds: {raw}")))?;
    let ms: f64 = ms
        .parse()
        .map_err(|_| WApiError::MalformedMessage(format!("malformed milliseconds: {raw}")))?;
    Ok(h * 3600.0 + m * 60.0 + s + ms / 1000.0)
}

/// The filename the `/api/v1/srt` route should send:
/// `{original_file_name}_{output_language}.srt`.
pub fn srt_filename(original_file_name: &str, output_language: &str) -> String {
    format!("{original_file_name}_{output_language}.srt")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs() -> Vec<Segment> {
        vec![
            Segment { start_s: 0.0, end_s: 1.5, text: "Hello".to_string(), tokens: None },
            Segment { start_s: 1.5, end_s: 3.25, text: "world.".to_string(), tokens: None },
        ]
    }

    #[test]
    fn renders_expected_grammar() {
        let srt = render(&segs());
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,500\nHello\n\n2\n00:00:01,500 --> 00:00:03,250\nworld.\n\n"
        );
    }

    #[test]
    fn render_then_parse_round_trips_timing_and_text() {
        let original = segs();
        let srt = render(&original);
        let parsed = parse(&srt).unwrap();
        assert_eq!(parsed.len(), original.len());
        for (a, b) in original.iter().zip(parsed.iter()) {
            assert!((a.start_s - b.start_s).abs() < 1e-6);
            assert!((a.end_s - b.end_s).abs() < 1e-6);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn filename_matches_spec_pattern() {
        assert_eq!(srt_filename("clip.wav", "en"), "clip.wav_en.srt");
    }

    #[test]
    fn parse_rejects_malformed_timing() {
        assert!(parse("1\nnot a timing line\nhello\n\n").is_err());
    }
}
