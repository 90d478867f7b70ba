//! Local synthesizer and player invocations.
//!
//! Synthesis is blocking (`std::process`) and runs on the blocking pool;
//! playback is a `tokio::process` child so it can be killed mid-utterance.

use cadence_core::{Result, SpeechError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// Engine parameters captured when an utterance is submitted
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceParams {
    pub language: String,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

pub fn get_from_env_or_path(env_key: &str, default_bin: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    get_from_path(default_bin)
}

pub fn get_from_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.exists())
}

/// Resolve a Piper model from an explicit path, a name in the voice dir, or `PIPER_VOICE`.
pub fn resolve_piper_model(
    fixed: Option<&Path>,
    voice_dir: Option<&Path>,
    voice: Option<&str>,
) -> Option<PathBuf> {
    if let Some(voice) = voice.filter(|v| !v.is_empty()) {
        let direct = PathBuf::from(voice);
        if direct.exists() {
            return Some(direct);
        }
        if let Some(dir) = voice_dir {
            let candidate = dir.join(voice);
            if candidate.exists() {
                return Some(candidate);
            }
            let with_ext = dir.join(format!("{}.onnx", voice));
            if with_ext.exists() {
                return Some(with_ext);
            }
        }
    }
    fixed.map(Path::to_path_buf)
}

pub fn synth_with_piper(
    piper: &Path,
    model: &Path,
    params: &VoiceParams,
    sample_rate: u32,
    text: &str,
    out_wav: &Path,
) -> Result<()> {
    let mut cmd = Command::new(piper);
    cmd.arg("-m").arg(model);
    cmd.arg("-f").arg(out_wav);
    let length_scale = (1.0f32 / params.rate).clamp(0.5, 2.0);
    cmd.arg("--length_scale").arg(format!("{:.2}", length_scale));
    cmd.arg("--sample_rate").arg(sample_rate.to_string());
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!(target: "cli_engine", command = ?cmd, "Running piper");
    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(SpeechError::Engine(format!(
            "piper failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub fn espeak_args(params: &VoiceParams, text: &str, out_wav: &Path) -> Vec<String> {
    let wpm = (160.0 * params.rate).round().clamp(80.0, 450.0) as i32;
    let amp = (100.0 * params.volume).round().clamp(0.0, 200.0) as i32;
    let pitch = (50.0 * params.pitch).round().clamp(0.0, 99.0) as i32;
    let voice = params
        .voice
        .clone()
        .unwrap_or_else(|| params.language.to_lowercase());
    vec![
        "-v".to_string(),
        voice,
        "-s".to_string(),
        wpm.to_string(),
        "-a".to_string(),
        amp.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-w".to_string(),
        out_wav.to_string_lossy().into_owned(),
        // text after `--` so a leading dash is not read as a flag
        "--".to_string(),
        text.to_string(),
    ]
}

pub fn synth_with_espeak(
    espeak: &Path,
    params: &VoiceParams,
    text: &str,
    out_wav: &Path,
) -> Result<()> {
    let mut cmd = Command::new(espeak);
    cmd.args(espeak_args(params, text, out_wav));
    debug!(target: "cli_engine", command = ?cmd, "Running espeak-ng");
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(SpeechError::Engine(format!(
            "espeak-ng failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Locate the `data` chunk of a RIFF/WAVE buffer, returning `(start, len)`.
fn find_data_chunk(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return None;
    }
    let mut idx = 12;
    while idx + 8 <= buf.len() {
        let size = u32::from_le_bytes([buf[idx + 4], buf[idx + 5], buf[idx + 6], buf[idx + 7]])
            as usize;
        if &buf[idx..idx + 4] == b"data" {
            let start = idx + 8;
            return Some((start, size.min(buf.len() - start)));
        }
        // chunks are padded to even sizes
        idx += 8 + size + (size & 1);
    }
    None
}

/// Playback length of a PCM WAV buffer, from its `fmt ` byte rate.
pub fn wav_duration(buf: &[u8]) -> Option<Duration> {
    if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return None;
    }
    let mut idx = 12;
    let mut byte_rate = None;
    while idx + 8 <= buf.len() {
        let size = u32::from_le_bytes([buf[idx + 4], buf[idx + 5], buf[idx + 6], buf[idx + 7]])
            as usize;
        if &buf[idx..idx + 4] == b"fmt " && idx + 20 <= buf.len() {
            byte_rate = Some(u32::from_le_bytes([
                buf[idx + 16],
                buf[idx + 17],
                buf[idx + 18],
                buf[idx + 19],
            ]));
        }
        idx += 8 + size + (size & 1);
    }
    let byte_rate = byte_rate.filter(|r| *r > 0)?;
    let (_, data_len) = find_data_chunk(buf)?;
    Some(Duration::from_secs_f64(data_len as f64 / byte_rate as f64))
}

/// Scale 16-bit PCM samples in place. Non-WAV buffers are left untouched.
pub fn scale_pcm16(buf: &mut [u8], gain: f32) {
    let Some((start, len)) = find_data_chunk(buf) else {
        return;
    };
    for chunk in buf[start..start + len].chunks_exact_mut(2) {
        let s = i16::from_le_bytes([chunk[0], chunk[1]]);
        let scaled = (s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        chunk.copy_from_slice(&scaled.to_le_bytes());
    }
}

pub fn select_player(pref: Option<&str>) -> Option<PathBuf> {
    pref.and_then(get_from_path)
        .or_else(|| get_from_path("aplay"))
        .or_else(|| get_from_path("paplay"))
        .or_else(|| get_from_path("ffplay"))
}

pub fn player_command(player_bin: &Path, wav_path: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(player_bin);
    if player_bin.file_name().and_then(|s| s.to_str()) == Some("ffplay") {
        cmd.arg("-autoexit").arg("-nodisp").arg("-loglevel").arg("quiet");
    }
    cmd.arg(wav_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_wav_duration_from_byte_rate() {
        let buf = wav(16_000, &vec![0i16; 8_000]);
        assert_eq!(wav_duration(&buf), Some(Duration::from_millis(500)));
        assert_eq!(wav_duration(b"not a wav file"), None);
    }

    #[test]
    fn test_scale_pcm16_clamps() {
        let mut buf = wav(8_000, &[1000, -1000, 30000]);
        scale_pcm16(&mut buf, 2.0);
        let (start, _) = find_data_chunk(&buf).unwrap();
        let samples: Vec<i16> = buf[start..]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![2000, -2000, i16::MAX]);
    }

    #[test]
    fn test_espeak_args_map_params() {
        let params = VoiceParams {
            language: "en-GB".into(),
            voice: None,
            rate: 2.0,
            pitch: 0.5,
            volume: 0.5,
        };
        let args = espeak_args(&params, "-hello", Path::new("/tmp/out.wav"));
        assert_eq!(
            args,
            vec!["-v", "en-gb", "-s", "320", "-a", "50", "-p", "25", "-w", "/tmp/out.wav", "--", "-hello"]
        );
    }

    #[test]
    fn test_resolve_piper_model_falls_back_to_fixed() {
        let fixed = PathBuf::from("/models/default.onnx");
        let resolved = resolve_piper_model(Some(&fixed), None, Some("missing-voice"));
        assert_eq!(resolved, Some(fixed));
        assert_eq!(resolve_piper_model(None, None, None), None);
    }
}
