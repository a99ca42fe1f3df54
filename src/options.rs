//! Run-time option store.
//!
//! Options come from three layers, later layers overriding earlier ones:
//! built-in defaults, the user's `~/.ostinatorc` file, and `set_option()`
//! directives issued from a score.

use std::fmt;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};

/// Default block size in frames.
pub const DEFAULT_BUFFER_FRAMES: usize = 4096;

/// Default cap on list elements shown by the `print` builtin.
pub const DEFAULT_PRINT_LIST_LIMIT: usize = 16;

/// Print verbosity levels consulted by the score-language builtins.
///
/// `print`/`printf` output is produced only at [`PrintLevel::Prints`] or
/// above; advisories require [`PrintLevel::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrintLevel {
    Silent = 0,
    Errors = 1,
    Warnings = 2,
    Prints = 3,
    All = 4,
}

/// Process-wide option values.
///
/// Owned by the engine behind an `RwLock`; scores mutate it through
/// `set_option`, hosts through the setters.
#[derive(Debug, Clone)]
pub struct Options {
    pub audio_on: bool,
    pub play_on: bool,
    pub record_on: bool,
    pub clobber_on: bool,
    pub report_clipping: bool,
    pub check_peaks: bool,
    pub print_level: PrintLevel,
    pub buffer_frames: usize,
    pub print_list_limit: usize,
    pub device: Option<String>,
    pub in_device: Option<String>,
    pub out_device: Option<String>,
    pub dso_path: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            audio_on: true,
            play_on: true,
            record_on: false,
            clobber_on: false,
            report_clipping: true,
            check_peaks: true,
            print_level: PrintLevel::All,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            print_list_limit: DEFAULT_PRINT_LIST_LIMIT,
            device: None,
            in_device: None,
            out_device: None,
            dso_path: None,
        }
    }
}

impl Options {
    /// Read a key-value configuration file and fold its settings in.
    ///
    /// A missing file is not an error (most users have none). A file that
    /// exists but cannot be read is.
    pub fn read_config_file(&mut self, path: &Path) -> Result<()> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::System(format!("cannot read {}: {e}", path.display()))),
        };
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => self.apply_config_key(key.trim(), value.trim()),
                None => warn!("{}:{}: malformed line (expected key = value)", path.display(), lineno + 1),
            }
        }
        Ok(())
    }

    fn apply_config_key(&mut self, key: &str, value: &str) {
        match key {
            "audio" => self.audio_on = parse_bool(key, value, self.audio_on),
            "play" => self.play_on = parse_bool(key, value, self.play_on),
            "record" => self.record_on = parse_bool(key, value, self.record_on),
            "clobber" => self.clobber_on = parse_bool(key, value, self.clobber_on),
            "print" => {
                self.print_level = if parse_bool(key, value, true) {
                    PrintLevel::All
                } else {
                    PrintLevel::Silent
                }
            }
            "report_clipping" => self.report_clipping = parse_bool(key, value, self.report_clipping),
            "check_peaks" => self.check_peaks = parse_bool(key, value, self.check_peaks),
            "buffer_frames" => match value.parse::<usize>() {
                Ok(frames) if frames > 0 => self.buffer_frames = frames,
                _ => warn!("bad value for buffer_frames: '{value}'"),
            },
            "device" => self.device = Some(value.to_string()),
            "indevice" => self.in_device = Some(value.to_string()),
            "outdevice" => self.out_device = Some(value.to_string()),
            "dso_path" => self.dso_path = Some(value.to_string()),
            other => warn!("unknown configuration key '{other}'"),
        }
    }

    /// Apply one `set_option` directive from a score.
    ///
    /// Two styles are accepted: a bare flag (`"AUDIO_ON"`, `"RECORD_OFF"`)
    /// and a `key = value` pair (`"device = MOTU 828"`). Whitespace around
    /// the key and `=` is stripped; whitespace inside the value survives so
    /// device names with spaces work. `audio_configured` tells whether the
    /// audio device has already been set up, which makes record/full-duplex
    /// changes illegal.
    pub fn set_option(&mut self, directive: &str, audio_configured: bool) -> Result<()> {
        let (key, value) = match directive.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (directive.trim(), None),
        };
        let upper = key.to_ascii_uppercase();
        match (upper.as_str(), value) {
            ("DEVICE", Some(v)) => self.device = Some(v.to_string()),
            ("INDEVICE", Some(v)) => self.in_device = Some(v.to_string()),
            ("OUTDEVICE", Some(v)) => self.out_device = Some(v.to_string()),
            ("DEVICE" | "INDEVICE" | "OUTDEVICE", None) => {
                return Err(Error::Param(format!("set_option: no value for \"{key}\"")));
            }
            ("AUDIO_ON" | "PLAY_ON", _) => self.play_on = true,
            ("AUDIO_OFF" | "PLAY_OFF", _) => self.play_on = false,
            ("RECORD_ON", _) => {
                if audio_configured {
                    return Err(Error::Param(
                        "set_option: turn on record BEFORE starting the audio device".into(),
                    ));
                }
                self.record_on = true;
            }
            ("RECORD_OFF", _) => self.record_on = false,
            ("CLOBBER_ON", _) => self.clobber_on = true,
            ("CLOBBER_OFF", _) => self.clobber_on = false,
            ("REPORT_CLIPPING_ON", _) => self.report_clipping = true,
            ("REPORT_CLIPPING_OFF", _) => self.report_clipping = false,
            ("CHECK_PEAKS_ON", _) => self.check_peaks = true,
            ("CHECK_PEAKS_OFF", _) => self.check_peaks = false,
            ("FULL_DUPLEX_ON", _) => {
                if audio_configured {
                    return Err(Error::Param(
                        "set_option: turn on full duplex BEFORE starting the audio device".into(),
                    ));
                }
                // Full duplex decomposes into play + record.
                self.record_on = true;
            }
            ("FULL_DUPLEX_OFF", _) => {
                self.record_on = self.record_on && !self.play_on;
                if self.record_on && audio_configured {
                    return Err(Error::Param(
                        "set_option: turn on record BEFORE starting the audio device".into(),
                    ));
                }
            }
            _ => {
                return Err(Error::Param(format!(
                    "set_option: unrecognized argument \"{directive}\""
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audio={} play={} record={} buffer_frames={}",
            self.audio_on, self.play_on, self.record_on, self.buffer_frames
        )
    }
}

fn parse_bool(key: &str, value: &str, current: bool) -> bool {
    match value {
        "true" | "yes" | "on" | "1" => true,
        "false" | "no" | "off" | "0" => false,
        other => {
            warn!("bad boolean for {key}: '{other}'");
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opt = Options::default();
        assert!(opt.audio_on);
        assert!(opt.play_on);
        assert!(!opt.record_on);
        assert_eq!(opt.buffer_frames, DEFAULT_BUFFER_FRAMES);
        assert_eq!(opt.print_level, PrintLevel::All);
    }

    #[test]
    fn test_set_option_flags() {
        let mut opt = Options::default();
        opt.set_option("AUDIO_OFF", false).unwrap();
        assert!(!opt.play_on);
        opt.set_option("play_on", false).unwrap();
        assert!(opt.play_on);
        opt.set_option("CHECK_PEAKS_OFF", false).unwrap();
        assert!(!opt.check_peaks);
    }

    #[test]
    fn test_set_option_key_value_preserves_inner_spaces() {
        let mut opt = Options::default();
        opt.set_option("  device =  MOTU 828", false).unwrap();
        assert_eq!(opt.device.as_deref(), Some("MOTU 828"));
    }

    #[test]
    fn test_set_option_unknown_is_error() {
        let mut opt = Options::default();
        assert!(opt.set_option("WIBBLE_ON", false).is_err());
    }

    #[test]
    fn test_set_option_missing_value() {
        let mut opt = Options::default();
        assert!(opt.set_option("device", false).is_err());
    }

    #[test]
    fn test_full_duplex_decomposition() {
        let mut opt = Options::default();
        opt.set_option("FULL_DUPLEX_ON", false).unwrap();
        assert!(opt.record_on);
        assert!(opt.play_on);

        // Rejected once audio is configured.
        let mut opt = Options::default();
        assert!(opt.set_option("FULL_DUPLEX_ON", true).is_err());
    }

    #[test]
    fn test_full_duplex_off_after_setup_rejected_when_record_survives() {
        // Record was enabled by full duplex, play later turned off; once
        // audio is configured, FULL_DUPLEX_OFF leaves record on and must
        // be rejected.
        let mut opt = Options::default();
        opt.set_option("FULL_DUPLEX_ON", false).unwrap();
        opt.set_option("PLAY_OFF", false).unwrap();
        assert!(opt.set_option("FULL_DUPLEX_OFF", true).is_err());

        // With play still on, the decomposition clears record and the
        // directive passes even after setup.
        let mut opt = Options::default();
        opt.set_option("FULL_DUPLEX_ON", false).unwrap();
        assert!(opt.set_option("FULL_DUPLEX_OFF", true).is_ok());
        assert!(!opt.record_on);
    }

    #[test]
    fn test_record_after_setup_rejected() {
        let mut opt = Options::default();
        assert!(opt.set_option("RECORD_ON", true).is_err());
        assert!(opt.set_option("RECORD_ON", false).is_ok());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("ostinato_test_rc");
        std::fs::write(
            &path,
            "# comment\naudio = false\nbuffer_frames = 1024\noutdevice = Built-in Output\nmystery = 3\n",
        )
        .unwrap();
        let mut opt = Options::default();
        opt.read_config_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(!opt.audio_on);
        assert_eq!(opt.buffer_frames, 1024);
        assert_eq!(opt.out_device.as_deref(), Some("Built-in Output"));
    }

    #[test]
    fn test_missing_config_file_ok() {
        let mut opt = Options::default();
        assert!(opt
            .read_config_file(Path::new("/definitely/not/here/ostinatorc"))
            .is_ok());
    }
}
