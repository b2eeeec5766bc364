use crate::error::{Result, TsError};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

lazy_static! {
    static ref CONFIG: RwLock<DemuxConfig> = RwLock::new(DemuxConfig::load().unwrap_or_default());
}

/// Default resync scan window in bytes.
pub const DEFAULT_RESYNC_SIZE: usize = 65536;
/// Default cap on the size of an emitted packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 204800;
/// Default number of bytes `read_header` may consume looking for PMTs.
pub const DEFAULT_PROBE_SIZE: usize = 5_000_000;
/// Teletext PES timestamps are clamped to PCR plus this many 90 kHz ticks.
pub const TELETEXT_PTS_OFFSET: i64 = 3654 + 9000;
/// Subtitle PES timestamps further than this ahead of the PCR are clamped.
pub const SUBTITLE_PTS_WINDOW: i64 = 10 * 90000;

/// Whether `read_header` keeps reading until every program has a PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanAllPmts {
    #[default]
    Auto,
    On,
    Off,
}

impl ScanAllPmts {
    pub fn enabled(self) -> bool {
        !matches!(self, ScanAllPmts::Off)
    }
}

/// Demuxer options.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxConfig {
    pub resync_size: usize,
    pub fix_teletext_pts: bool,
    pub scan_all_pmts: ScanAllPmts,
    pub skip_unknown_pmt: bool,
    pub merge_pmt_versions: bool,
    pub skip_changes: bool,
    pub skip_clear: bool,
    pub max_packet_size: usize,
    pub compute_pcr: bool,
    pub probe_size: usize,
    pub auto_guess: bool,
    pub teletext_pts_offset: i64,
    pub subtitle_pts_window: i64,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            resync_size: DEFAULT_RESYNC_SIZE,
            fix_teletext_pts: true,
            scan_all_pmts: ScanAllPmts::Auto,
            skip_unknown_pmt: false,
            merge_pmt_versions: false,
            skip_changes: false,
            skip_clear: false,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            compute_pcr: false,
            probe_size: DEFAULT_PROBE_SIZE,
            auto_guess: true,
            teletext_pts_offset: TELETEXT_PTS_OFFSET,
            subtitle_pts_window: SUBTITLE_PTS_WINDOW,
        }
    }
}

impl DemuxConfig {
    /// Builds a config from defaults, then `TSDEMUX_*` environment
    /// variables, then the first config file found in the working directory.
    pub fn load() -> Result<Self> {
        let mut config = DemuxConfig::default();

        for key in KEYS {
            if let Ok(value) = env::var(format!("TSDEMUX_{}", key.to_uppercase())) {
                config.set(key, &value)?;
            }
        }

        let config_paths = ["./tsdemux.toml", "./config.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_str(&content)?;
                    break;
                }
            }
        }

        Ok(config)
    }

    /// Applies `key = value` lines. Unknown keys and comments are ignored.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if !KEYS.contains(&key) {
                continue;
            }
            let value = value.trim().trim_matches('"').trim_matches('\'');
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Sets one option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "resync_size" => self.resync_size = value.parse()?,
            "fix_teletext_pts" => self.fix_teletext_pts = parse_bool(key, value)?,
            "scan_all_pmts" => {
                self.scan_all_pmts = match value {
                    "auto" | "-1" => ScanAllPmts::Auto,
                    "on" | "true" | "1" => ScanAllPmts::On,
                    "off" | "false" | "0" => ScanAllPmts::Off,
                    other => {
                        return Err(TsError::Config(format!(
                            "scan_all_pmts: unexpected value '{}'",
                            other
                        )))
                    }
                }
            }
            "skip_unknown_pmt" => self.skip_unknown_pmt = parse_bool(key, value)?,
            "merge_pmt_versions" => self.merge_pmt_versions = parse_bool(key, value)?,
            "skip_changes" => self.skip_changes = parse_bool(key, value)?,
            "skip_clear" => self.skip_clear = parse_bool(key, value)?,
            "max_packet_size" => {
                let size: usize = value.parse()?;
                if size == 0 {
                    return Err(TsError::Config("max_packet_size must be positive".into()));
                }
                self.max_packet_size = size;
            }
            "compute_pcr" => self.compute_pcr = parse_bool(key, value)?,
            "probe_size" => self.probe_size = value.parse()?,
            "auto_guess" => self.auto_guess = parse_bool(key, value)?,
            "teletext_pts_offset" => self.teletext_pts_offset = value.parse()?,
            "subtitle_pts_window" => self.subtitle_pts_window = value.parse()?,
            other => return Err(TsError::Config(format!("unknown option '{}'", other))),
        }
        Ok(())
    }

    /// Re-reads the environment and config files into the process-wide copy.
    pub fn reload() -> Result<()> {
        let new_config = DemuxConfig::load()?;
        *CONFIG.write() = new_config;
        Ok(())
    }
}

const KEYS: &[&str] = &[
    "resync_size",
    "fix_teletext_pts",
    "scan_all_pmts",
    "skip_unknown_pmt",
    "merge_pmt_versions",
    "skip_changes",
    "skip_clear",
    "max_packet_size",
    "compute_pcr",
    "probe_size",
    "auto_guess",
    "teletext_pts_offset",
    "subtitle_pts_window",
];

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(TsError::Config(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

/// Returns the process-wide configuration.
pub fn current() -> DemuxConfig {
    CONFIG.read().clone()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, TEMPLATE)?;
    }
    Ok(())
}

const TEMPLATE: &str = r#"# tsdemux configuration
# Every option may also be set through a TSDEMUX_<OPTION> environment variable.

# Bytes scanned for a sync byte before giving up
resync_size = 65536
# Replace unreliable teletext/subtitle timestamps with the program PCR
fix_teletext_pts = true
# auto | on | off
scan_all_pmts = "auto"
skip_unknown_pmt = false
merge_pmt_versions = false
max_packet_size = 204800
# Raw mode only
compute_pcr = false
"#;
