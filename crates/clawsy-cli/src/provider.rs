//! Capabilities backed by shell commands from the `[capabilities]` section.
//!
//! Each configured template runs under `sh -c`. Capabilities without a
//! template report themselves unavailable.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use clawsy_node::capabilities::{
    CameraImage, CameraInfo, CapabilityResult, Location, ScreenCapture,
};
use clawsy_node::{CapabilityError, CapabilityProvider};

use crate::config::CapabilitiesConfig;

/// Fixes within this distance of a smart location are labelled with its name.
const SMART_RADIUS_M: f64 = 100.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SmartLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

pub struct CommandProvider {
    templates: CapabilitiesConfig,
    smart: Mutex<Vec<SmartLocation>>,
    tracking: AtomicBool,
    next_file: AtomicU64,
}

impl CommandProvider {
    pub fn new(templates: CapabilitiesConfig) -> Self {
        Self {
            templates,
            smart: Mutex::new(Vec::new()),
            tracking: AtomicBool::new(false),
            next_file: AtomicU64::new(0),
        }
    }

    pub fn smart_locations(&self) -> Vec<SmartLocation> {
        self.smart.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    fn template<'a>(&self, template: &'a Option<String>, what: &str) -> CapabilityResult<&'a str> {
        template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CapabilityError::Unavailable(what.to_string()))
    }

    fn scratch_file(&self, extension: &str) -> PathBuf {
        let n = self.next_file.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("clawsy-{}-{n}.{extension}", std::process::id()))
    }

    /// Run a template that writes a file to `{path}` and return it base64 encoded.
    async fn capture_to_file(
        &self,
        template: &str,
        extension: &str,
        device: Option<&str>,
    ) -> CapabilityResult<String> {
        let path = self.scratch_file(extension);
        let mut command = template.replace("{path}", &shell_quote(&path.to_string_lossy()));
        if let Some(device) = device {
            command = command.replace("{device}", &shell_quote(device));
        }

        let result = async {
            run(&command, None).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| CapabilityError::Failed(format!("no output at {}: {e}", path.display())))?;
            if bytes.is_empty() {
                return Err(CapabilityError::Failed("capture produced an empty file".into()));
            }
            Ok::<_, CapabilityError>(STANDARD.encode(bytes))
        }
        .await;

        let _ = tokio::fs::remove_file(&path).await;
        result
    }

    fn label(&self, mut location: Location) -> Location {
        if let Some(place) = self.smart_locations().into_iter().find(|s| {
            distance_m(location.latitude, location.longitude, s.lat, s.lon) < SMART_RADIUS_M
        }) {
            location.custom_name = Some(place.name);
        }
        location
    }
}

/// Run `sh -c command`, optionally feeding stdin, and return stdout.
async fn run(command: &str, stdin: Option<&str>) -> CapabilityResult<String> {
    debug!(command, "running capability command");
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CapabilityError::Failed(format!("cannot run '{command}': {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CapabilityError::Failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        return Err(CapabilityError::Failed(if detail.is_empty() {
            format!("'{command}' exited with {}", output.status)
        } else {
            detail.to_string()
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Great-circle distance in metres.
fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

fn parse_camera_line(line: &str) -> Option<CameraInfo> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once('\t') {
        Some((id, name)) => CameraInfo {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
        },
        None => CameraInfo {
            id: line.to_string(),
            name: line.to_string(),
        },
    })
}

#[async_trait]
impl CapabilityProvider for CommandProvider {
    async fn capture_screen(&self, interactive: bool) -> CapabilityResult<ScreenCapture> {
        let template = self.template(&self.templates.screen_capture, "screen capture")?;
        if interactive {
            debug!("interactive selection is left to the capture command");
        }
        let base64 = self.capture_to_file(template, "png", None).await?;
        Ok(ScreenCapture {
            format: "png".into(),
            base64,
        })
    }

    async fn read_clipboard(&self) -> CapabilityResult<String> {
        let template = self.template(&self.templates.clipboard_read, "clipboard")?;
        run(template, None).await
    }

    async fn write_clipboard(&self, text: &str) -> CapabilityResult<()> {
        let template = self.template(&self.templates.clipboard_write, "clipboard")?;
        run(template, Some(text)).await.map(|_| ())
    }

    async fn list_cameras(&self) -> CapabilityResult<Vec<CameraInfo>> {
        let template = self.template(&self.templates.camera_list, "camera")?;
        let out = run(template, None).await?;
        Ok(out.lines().filter_map(parse_camera_line).collect())
    }

    async fn snap_camera(&self, device_id: Option<&str>) -> CapabilityResult<CameraImage> {
        let template = self.template(&self.templates.camera_snap, "camera")?;
        let base64 = self.capture_to_file(template, "jpg", device_id).await?;
        Ok(CameraImage { base64 })
    }

    async fn current_location(&self) -> CapabilityResult<Option<Location>> {
        let template = self.template(&self.templates.location, "location")?;
        debug!(tracking = self.is_tracking(), "reading location");
        let out = run(template, None).await?;
        if out.trim().is_empty() {
            return Ok(None);
        }

        #[derive(serde::Deserialize)]
        struct Fix {
            latitude: f64,
            longitude: f64,
            #[serde(default)]
            accuracy: f64,
            #[serde(default)]
            altitude: Option<f64>,
            #[serde(default)]
            speed: Option<f64>,
        }

        let fix: Fix = serde_json::from_str(out.trim())
            .map_err(|e| CapabilityError::Failed(format!("bad location output: {e}")))?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        Ok(Some(self.label(Location {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            altitude: fix.altitude,
            speed: fix.speed,
            timestamp,
            name: None,
            locality: None,
            country: None,
            custom_name: None,
        })))
    }

    async fn start_location(&self) -> CapabilityResult<()> {
        self.template(&self.templates.location, "location")?;
        self.tracking.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_location(&self) -> CapabilityResult<()> {
        self.template(&self.templates.location, "location")?;
        self.tracking.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn add_smart_location(&self, name: &str, lat: f64, lon: f64) -> CapabilityResult<()> {
        let mut smart = self.smart.lock().unwrap_or_else(|e| e.into_inner());
        smart.retain(|s| s.name != name);
        smart.push(SmartLocation {
            name: name.to_string(),
            lat,
            lon,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(templates: CapabilitiesConfig) -> CommandProvider {
        CommandProvider::new(templates)
    }

    #[tokio::test]
    async fn unconfigured_capabilities_are_unavailable() {
        let p = provider(CapabilitiesConfig::default());
        assert!(matches!(p.read_clipboard().await, Err(CapabilityError::Unavailable(_))));
        assert!(matches!(p.capture_screen(false).await, Err(CapabilityError::Unavailable(_))));
        assert!(matches!(p.start_location().await, Err(CapabilityError::Unavailable(_))));
    }

    #[tokio::test]
    async fn clipboard_round_trips_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip");
        let p = provider(CapabilitiesConfig {
            clipboard_read: Some(format!("cat {}", shell_quote(&file.to_string_lossy()))),
            clipboard_write: Some(format!("cat > {}", shell_quote(&file.to_string_lossy()))),
            ..Default::default()
        });

        p.write_clipboard("hello there").await.unwrap();
        assert_eq!(p.read_clipboard().await.unwrap(), "hello there");
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let p = provider(CapabilitiesConfig {
            clipboard_read: Some("echo boom >&2; exit 3".into()),
            ..Default::default()
        });
        assert_eq!(
            p.read_clipboard().await,
            Err(CapabilityError::Failed("boom".into()))
        );
    }

    #[tokio::test]
    async fn screen_capture_reads_the_written_file() {
        let p = provider(CapabilitiesConfig {
            screen_capture: Some("printf abc > {path}".into()),
            ..Default::default()
        });
        let shot = p.capture_screen(false).await.unwrap();
        assert_eq!(shot.format, "png");
        assert_eq!(shot.base64, "YWJj");
    }

    #[tokio::test]
    async fn camera_snap_substitutes_the_device() {
        let p = provider(CapabilitiesConfig {
            camera_snap: Some("printf %s {device} > {path}".into()),
            ..Default::default()
        });
        let image = p.snap_camera(Some("cam0")).await.unwrap();
        assert_eq!(STANDARD.decode(image.base64).unwrap(), b"cam0");
    }

    #[tokio::test]
    async fn camera_list_parses_lines() {
        let p = provider(CapabilitiesConfig {
            camera_list: Some("printf 'cam0\\tFaceTime HD\\nUSB Camera\\n'".into()),
            ..Default::default()
        });
        let cameras = p.list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id, "cam0");
        assert_eq!(cameras[0].name, "FaceTime HD");
        assert_eq!(cameras[1].name, "USB Camera");
    }

    #[tokio::test]
    async fn location_is_labelled_by_nearby_smart_location() {
        let p = provider(CapabilitiesConfig {
            location: Some(r#"echo '{"latitude": 52.52, "longitude": 13.405, "accuracy": 10}'"#.into()),
            ..Default::default()
        });

        let fix = p.current_location().await.unwrap().unwrap();
        assert!(fix.custom_name.is_none());

        p.add_smart_location("Office", 52.5201, 13.4051).await.unwrap();
        p.add_smart_location("Home", 48.0, 11.0).await.unwrap();
        let fix = p.current_location().await.unwrap().unwrap();
        assert_eq!(fix.custom_name.as_deref(), Some("Office"));
        assert_eq!(fix.accuracy, 10.0);
    }

    #[tokio::test]
    async fn smart_locations_replace_by_name() {
        let p = provider(CapabilitiesConfig::default());
        p.add_smart_location("Home", 1.0, 2.0).await.unwrap();
        p.add_smart_location("Home", 3.0, 4.0).await.unwrap();
        assert_eq!(
            p.smart_locations(),
            vec![SmartLocation {
                name: "Home".into(),
                lat: 3.0,
                lon: 4.0
            }]
        );
    }

    #[tokio::test]
    async fn tracking_toggles() {
        let p = provider(CapabilitiesConfig {
            location: Some("true".into()),
            ..Default::default()
        });
        p.start_location().await.unwrap();
        assert!(p.is_tracking());
        p.stop_location().await.unwrap();
        assert!(!p.is_tracking());
    }

    #[test]
    fn distance_is_roughly_right() {
        let d = distance_m(52.52, 13.405, 52.5201, 13.4051);
        assert!(d > 5.0 && d < 20.0, "{d}");
        assert!(distance_m(0.0, 0.0, 0.0, 1.0) > 100_000.0);
    }
}
