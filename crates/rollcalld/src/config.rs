use rollcall_core::RosterRules;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frames discarded each time the camera starts streaming.
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Base URL of the operator/attendance API, without trailing slash.
    pub api_url: String,
    /// Pre-issued bearer token for the API, if it requires one.
    pub api_token: Option<String>,
    /// Production line this kiosk records attendance for.
    pub line: String,
    /// Station this kiosk is installed at.
    pub station: String,
    /// Known station names; empty accepts any.
    pub stations: Vec<String>,
    /// Highest LED index an operator may be assigned.
    pub max_led_index: u32,
    /// Euclidean distance below which a probe is accepted.
    pub match_threshold: f32,
    /// Timeout for a single detect+describe call.
    pub detect_timeout_secs: u64,
    /// Timeout for each HTTP request.
    pub http_timeout_secs: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Delay between broker reconnect attempts.
    pub mqtt_reconnect_secs: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

        let line = env_string("ROLLCALL_LINE", "line-1");

        Self {
            camera_device: env_string("ROLLCALL_CAMERA_DEVICE", "/dev/video0"),
            warmup_frames: env_parse("ROLLCALL_WARMUP_FRAMES", 4),
            model_dir,
            api_url: env_string("ROLLCALL_API_URL", "http://localhost:3000/api")
                .trim_end_matches('/')
                .to_string(),
            api_token: std::env::var("ROLLCALL_API_TOKEN").ok().filter(|t| !t.is_empty()),
            station: env_string("ROLLCALL_STATION", "kiosk"),
            stations: parse_list(&env_string("ROLLCALL_STATIONS", "")),
            max_led_index: env_parse("ROLLCALL_MAX_LED_INDEX", 15),
            match_threshold: env_parse(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::DEFAULT_MATCH_THRESHOLD,
            ),
            detect_timeout_secs: env_parse("ROLLCALL_DETECT_TIMEOUT_SECS", 10),
            http_timeout_secs: env_parse("ROLLCALL_HTTP_TIMEOUT_SECS", 10),
            mqtt_host: env_string("ROLLCALL_MQTT_HOST", "localhost"),
            mqtt_port: env_parse("ROLLCALL_MQTT_PORT", 1883),
            mqtt_reconnect_secs: env_parse("ROLLCALL_MQTT_RECONNECT_SECS", 5),
            line,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    /// Broker topic LED intents are published to.
    pub fn led_topic(&self) -> String {
        format!("attendance/{}/led", self.line)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn roster_rules(&self) -> RosterRules {
        RosterRules {
            max_led_index: self.max_led_index,
            stations: self.stations.clone(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" press, weld ,,paint"), vec!["press", "weld", "paint"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("ROLLCALL_TEST_GARBAGE_U64", "not-a-number");
        assert_eq!(env_parse("ROLLCALL_TEST_GARBAGE_U64", 7u64), 7);
        std::env::set_var("ROLLCALL_TEST_GOOD_F32", "0.45");
        assert_eq!(env_parse("ROLLCALL_TEST_GOOD_F32", 0.6f32), 0.45);
    }

    #[test]
    fn test_led_topic_uses_line() {
        let mut cfg = Config::from_env();
        cfg.line = "line-7".into();
        assert_eq!(cfg.led_topic(), "attendance/line-7/led");
    }
}
