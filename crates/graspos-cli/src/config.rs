//! Configuration Vault – reads/writes `~/.graspos/config.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults of the
//! crate that owns them.  A minimal file only needs the robot address:
//!
//! ```toml
//! [robot]
//! ip = "10.121.46.2"
//! ```
//!
//! The `[calibration]` inversion flags were measured for one camera mount.
//! Re-derive them whenever the camera is remounted (the `x` / `y` operator
//! signals toggle them live for that purpose).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use graspos_kernel::MotionConfig;
use graspos_middleware::intake::DEFAULT_INTAKE_ADDR;
use graspos_perception::{FilterSettings, GripForceTable, PlacementMap};
use graspos_runtime::{SearchConfig, SequenceConfig, ServoConfig};
use graspos_types::{ArmError, CalibrationProfile};
use serde::{Deserialize, Serialize};

/// Manipulator controller address and socket timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub ip: String,
    /// Real-time telemetry stream.
    pub telemetry_port: u16,
    /// Script / command port.
    pub command_port: u16,
    pub telemetry_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    /// Connect attempts per command, including the first.
    pub connect_attempts: u32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            ip: "10.121.46.2".to_string(),
            telemetry_port: 30003,
            command_port: 30002,
            telemetry_timeout_ms: 1000,
            connect_timeout_ms: 5000,
            ack_timeout_ms: 500,
            connect_attempts: 3,
        }
    }
}

impl RobotConfig {
    pub fn telemetry_endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.telemetry_port)
    }

    pub fn command_endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.command_port)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Script snippets for a controller-hosted gripper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    pub enabled: bool,
    pub id: String,
    pub open_script: String,
    /// `{force}` is replaced by the grip force (0–100).
    pub close_script: String,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            id: "ag95".to_string(),
            open_script: "gripper_open()".to_string(),
            close_script: "gripper_close({force})".to_string(),
        }
    }
}

/// Operator signal listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub enabled: bool,
    pub addr: String,
    pub queue_capacity: usize,
    /// How long a connected client may stay silent before it is dropped.
    pub read_timeout_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: DEFAULT_INTAKE_ADDR.to_string(),
            queue_capacity: 32,
            read_timeout_ms: 1000,
        }
    }
}

impl IntakeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Replace the port of `addr`, keeping the host.
    fn set_port(&mut self, port: u16) {
        let host = self
            .addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("127.0.0.1");
        self.addr = format!("{host}:{port}");
    }
}

/// Persisted configuration stored in `~/.graspos/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub robot: RobotConfig,
    pub motion: MotionConfig,
    pub calibration: CalibrationProfile,
    pub sequence: SequenceConfig,
    pub search: SearchConfig,
    pub servo: ServoConfig,
    pub gripper: GripperConfig,
    pub intake: IntakeConfig,
    pub perception: FilterSettings,
    pub placement: PlacementMap,
    pub grip_force: GripForceTable,
}

/// Return the path to `~/.graspos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".graspos").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ArmError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ArmError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ArmError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| ArmError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `GRASPOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GRASPOS_ROBOT_IP` | `robot.ip` |
/// | `GRASPOS_INTAKE_PORT` | port of `intake.addr` |
/// | `GRASPOS_AUTO_PLACE` | `servo.auto_place` (`true`/`false`/`1`/`0`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Unparsable values are ignored.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(ip) = lookup("GRASPOS_ROBOT_IP") {
        cfg.robot.ip = ip;
    }
    if let Some(port) = lookup("GRASPOS_INTAKE_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.intake.set_port(port);
    }
    if let Some(v) = lookup("GRASPOS_AUTO_PLACE") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => cfg.servo.auto_place = true,
            "0" | "false" | "off" => cfg.servo.auto_place = false,
            _ => {}
        }
    }
}

/// Save the config to disk, creating `~/.graspos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ArmError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ArmError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ArmError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| ArmError::Config(format!("failed to set config directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ArmError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| ArmError::Config(format!("failed to write {}: {e}", path.display()));

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_path_points_to_graspos_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.graspos/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");

        assert_eq!(loaded.robot.telemetry_port, 30003);
        assert_eq!(loaded.robot.command_port, 30002);
        assert_eq!(loaded.motion, cfg.motion);
        assert_eq!(loaded.calibration, cfg.calibration);
        assert_eq!(loaded.sequence, cfg.sequence);
        assert_eq!(loaded.search.grid.len(), 9);
        assert_eq!(loaded.placement, cfg.placement);
        assert_eq!(loaded.grip_force.force_for("scissors"), 25);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[robot]\ntelemetry_port = 40003\n\n[calibration]\ninvert_y = true\n\n[servo]\nmax_centering_attempts = 4\n",
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.robot.telemetry_port, 40003);
        assert_eq!(cfg.robot.command_port, 30002);
        assert!(cfg.calibration.invert_x);
        assert!(cfg.calibration.invert_y);
        assert_eq!(cfg.servo.max_centering_attempts, 4);
        assert!((cfg.servo.centering_step_fraction - 0.6).abs() < 1e-12);
        assert_eq!(cfg.perception.min_confidence, 0.35);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[robot\nip = ").expect("write");
        assert!(matches!(load_from(&path), Err(ArmError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn overrides_replace_ip_port_and_auto_place() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[
                ("GRASPOS_ROBOT_IP", "192.168.0.20"),
                ("GRASPOS_INTAKE_PORT", "7000"),
                ("GRASPOS_AUTO_PLACE", "true"),
            ]),
        );
        assert_eq!(cfg.robot.ip, "192.168.0.20");
        assert_eq!(cfg.robot.command_endpoint(), "192.168.0.20:30002");
        assert_eq!(cfg.intake.addr, "127.0.0.1:7000");
        assert!(cfg.servo.auto_place);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[("GRASPOS_INTAKE_PORT", "not-a-port"), ("GRASPOS_AUTO_PLACE", "maybe")]),
        );
        assert_eq!(cfg.intake.addr, DEFAULT_INTAKE_ADDR);
        assert!(!cfg.servo.auto_place);
    }
}
