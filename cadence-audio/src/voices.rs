//! Voice discovery for the CLI engines.

use cadence_core::Voice;
use std::path::Path;

const QUALITY_NORMAL: u32 = 300;
const QUALITY_HIGH: u32 = 400;
const LATENCY_LOW: u32 = 200;
const LATENCY_NORMAL: u32 = 300;

/// Parse the table printed by `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 10)
/// ```
pub fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Pty"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _priority = fields.next()?;
            let language = fields.next()?;
            let _age_gender = fields.next()?;
            let name = fields.next()?;
            Some(Voice {
                id: language.to_string(),
                name: name.replace('_', " "),
                locale: language.to_string(),
                quality: QUALITY_NORMAL,
                latency: LATENCY_LOW,
                network_required: false,
                not_installed: false,
            })
        })
        .collect()
}

/// Locale of a Piper model file such as `en_US-lessac-medium.onnx`.
pub fn piper_locale(file_stem: &str) -> String {
    file_stem
        .split('-')
        .next()
        .unwrap_or(file_stem)
        .replace('_', "-")
}

/// One voice per `.onnx` model in `dir`.
pub fn scan_piper_voices(dir: &Path) -> std::io::Result<Vec<Voice>> {
    let mut voices = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        voices.push(Voice {
            id: stem.to_string(),
            name: stem.to_string(),
            locale: piper_locale(stem),
            quality: QUALITY_HIGH,
            latency: LATENCY_NORMAL,
            network_required: false,
            not_installed: false,
        });
    }
    voices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(voices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  en-gb           --/M      English_(Great_Britain) gmw/en            (en 2)
 5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
";

    #[test]
    fn test_parse_espeak_listing() {
        let voices = parse_espeak_voices(LISTING);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[1].id, "en-gb");
        assert_eq!(voices[1].name, "English (Great Britain)");
        assert_eq!(voices[2].locale, "en-us");
        assert!(voices[2].matches_language("en-US"));
    }

    #[test]
    fn test_parse_ignores_preamble_and_blank_lines() {
        let voices = parse_espeak_voices("warning: something\n\nPty Language\n\n");
        assert!(voices.is_empty());
    }

    #[test]
    fn test_piper_locale_from_file_stem() {
        assert_eq!(piper_locale("en_US-lessac-medium"), "en-US");
        assert_eq!(piper_locale("custom"), "custom");
    }
}
