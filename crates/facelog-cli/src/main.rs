use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelog_core::{AttendanceEvent, FeatureVector, MatchedIdentity, Tier};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "facelog", about = "Facelog attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person so they can be enrolled
    Register {
        id: i64,
        /// Display name shown next to recognized faces
        name: String,
    },
    /// Enroll a person from captured feature vectors
    Enroll {
        id: i64,
        /// JSON array of samples; `null` marks a capture with no face
        #[arg(short, long)]
        samples: PathBuf,
    },
    /// Clear a person's signature so they can be enrolled again
    Clear { id: i64 },
    /// List registered people
    List,
    /// Show daemon status
    Status,
    /// Start a detection session
    Start,
    /// Stop the running detection session
    Stop,
    /// Reload the roster into the running session
    Reload,
    /// Feed frames of probe vectors to the daemon until EOF or Ctrl-C
    ///
    /// A line that is not a JSON array is skipped. Inside a frame, an element
    /// that is not a numeric vector is reported as rejected and the rest of
    /// the frame is still matched.
    Detect {
        /// JSON-lines file, one array of probe vectors per frame
        #[arg(short, long)]
        frames: PathBuf,
        /// Pause between frames
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[zbus::proxy(
    interface = "org.facelog.Attendance1",
    default_service = "org.facelog.Attendance1",
    default_path = "/org/facelog/Attendance1"
)]
trait Attendance {
    async fn register(&self, id: i64, name: &str) -> zbus::Result<bool>;
    async fn enroll(&self, id: i64, samples_json: &str) -> zbus::Result<String>;
    async fn clear_signature(&self, id: i64) -> zbus::Result<bool>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn start_session(&self) -> zbus::Result<u32>;
    async fn stop_session(&self) -> zbus::Result<bool>;
    async fn reload_roster(&self) -> zbus::Result<u32>;
    async fn process_frame(&self, probes_json: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Per-face annotation as returned by the daemon.
#[derive(Debug, Deserialize)]
struct FaceReply {
    identity: Option<MatchedIdentity>,
    /// `null` when there was nothing to compare against.
    distance: Option<f32>,
    tier: Tier,
}

#[derive(Debug, Deserialize)]
struct RejectedReply {
    index: usize,
    error: String,
}

#[derive(Debug, Deserialize)]
struct FrameReply {
    results: Vec<FaceReply>,
    events: Vec<AttendanceEvent>,
    rejected: Vec<RejectedReply>,
    sink_failures: usize,
}

/// One line of the frames file, split into vectors the daemon can take and
/// elements that were not vectors at all.
#[derive(Debug, Default)]
struct DecodedFrame {
    vectors: Vec<FeatureVector>,
    /// Position in the line of each entry of `vectors`.
    positions: Vec<usize>,
    unreadable: Vec<(usize, String)>,
}

impl DecodedFrame {
    /// Position in the input line of the daemon's `index`.
    fn position(&self, index: usize) -> usize {
        self.positions.get(index).copied().unwrap_or(index)
    }
}

fn decode_frame(line: &str) -> Result<DecodedFrame> {
    let elements: Vec<serde_json::Value> =
        serde_json::from_str(line).context("frame is not a JSON array")?;
    let mut frame = DecodedFrame::default();
    for (position, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<FeatureVector>(element) {
            Ok(vector) => {
                frame.vectors.push(vector);
                frame.positions.push(position);
            }
            Err(e) => frame.unreadable.push((position, e.to_string())),
        }
    }
    Ok(frame)
}

#[derive(Debug, Deserialize)]
struct IdentityRow {
    id: i64,
    display_name: String,
    enrolled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    };
    let conn = conn.context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("facelogd is not reachable")?;

    match cli.command {
        Commands::Register { id, name } => {
            if proxy.register(id, &name).await? {
                println!("Registered {id} ({name})");
            } else {
                println!("Identity {id} already exists");
            }
        }
        Commands::Enroll { id, samples } => {
            let samples_json = read_samples(&samples)?;
            match proxy.enroll(id, &samples_json).await?.as_str() {
                "already_enrolled" => {
                    println!("Signature for {id} already exists; run `facelog clear {id}` to re-enroll")
                }
                _ => println!("Signature for {id} enrolled"),
            }
        }
        Commands::Clear { id } => {
            if proxy.clear_signature(id).await? {
                println!("Signature for {id} cleared");
            } else {
                println!("Identity {id} not found");
            }
        }
        Commands::List => {
            let rows: Vec<IdentityRow> = serde_json::from_str(&proxy.list_identities().await?)?;
            if rows.is_empty() {
                println!("No identities registered");
            }
            for row in rows {
                let mark = if row.enrolled { "enrolled" } else { "not enrolled" };
                println!("{:>8}  {:<24} {mark}", row.id, row.display_name);
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Start => {
            let size = proxy.start_session().await?;
            println!("Session started with {size} enrolled identities");
        }
        Commands::Stop => {
            if proxy.stop_session().await? {
                println!("Session stopped");
            } else {
                println!("No session was running");
            }
        }
        Commands::Reload => {
            let size = proxy.reload_roster().await?;
            println!("Roster reloaded: {size} enrolled identities");
        }
        Commands::Detect {
            frames,
            interval_ms,
        } => {
            run_detect(&proxy, &frames, Duration::from_millis(interval_ms)).await?;
        }
    }

    Ok(())
}

/// Validate the samples file locally before shipping it to the daemon.
fn read_samples(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let samples: Vec<Option<FeatureVector>> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let usable = samples.iter().filter(|s| s.is_some()).count();
    tracing::debug!(total = samples.len(), usable, "samples loaded");
    Ok(serde_json::to_string(&samples)?)
}

/// Frame loop: one frame in flight at a time, Ctrl-C is honoured between frames.
async fn run_detect(proxy: &AttendanceProxy<'_>, path: &Path, interval: Duration) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut frame_no = 0u64;
    let mut recorded = 0usize;
    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                println!("Interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        frame_no += 1;

        let frame = match decode_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(frame = frame_no, error = %e, "skipping unreadable frame");
                continue;
            }
        };
        for (position, error) in &frame.unreadable {
            tracing::warn!(frame = frame_no, face = position, %error, "unreadable vector");
        }

        let reply = proxy.process_frame(&serde_json::to_string(&frame.vectors)?).await?;
        let reply: FrameReply = serde_json::from_str(&reply)?;
        recorded += reply.events.len() - reply.sink_failures.min(reply.events.len());
        print_frame(frame_no, &frame, &reply);

        if !interval.is_zero() {
            tokio::select! {
                _ = &mut ctrl_c => {
                    println!("Interrupted");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    println!("{frame_no} frames, {recorded} attendance events recorded");
    Ok(())
}

fn print_frame(frame_no: u64, frame: &DecodedFrame, reply: &FrameReply) {
    for (i, face) in reply.results.iter().enumerate() {
        let label = face
            .identity
            .as_ref()
            .map(|m| m.display_name.as_str())
            .unwrap_or("Unknown");
        let tier = face.tier.as_str();
        let pos = frame.position(i);
        match face.distance {
            Some(d) => println!("frame {frame_no} face {pos}: {label} [{tier}] {d:.3}"),
            None => println!("frame {frame_no} face {pos}: {label} [{tier}]"),
        }
    }
    for (position, error) in &frame.unreadable {
        println!("frame {frame_no} face {position}: rejected ({error})");
    }
    for rejected in &reply.rejected {
        println!(
            "frame {frame_no} face {}: rejected ({})",
            frame.position(rejected.index),
            rejected.error
        );
    }
    for event in &reply.events {
        println!(
            "frame {frame_no}: attendance marked for {} at {}",
            event.identity_id,
            event.timestamp.to_rfc3339()
        );
    }
    if reply.sink_failures > 0 {
        eprintln!(
            "frame {frame_no}: warning: {} attendance event(s) could not be stored",
            reply.sink_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_reply_accepts_null_distance() {
        let json = r#"{
            "results": [
                {"identity": {"id": 1, "display_name": "Alice"}, "distance": 0.2, "tier": "confident"},
                {"identity": null, "distance": null, "tier": "unknown"}
            ],
            "events": [{"identity_id": 1, "timestamp": "2026-01-01T08:00:00Z"}],
            "rejected": [{"index": 1, "error": "feature vector is empty"}],
            "sink_failures": 0
        }"#;
        let reply: FrameReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.results.len(), 2);
        assert_eq!(reply.results[0].tier, Tier::Confident);
        assert!(reply.results[1].distance.is_none());
        assert_eq!(reply.events[0].identity_id, 1);
        assert_eq!(reply.rejected[0].index, 1);
    }

    #[test]
    fn test_cli_parses_detect() {
        let cli = Cli::try_parse_from(["facelog", "detect", "--frames", "frames.jsonl"]).unwrap();
        match cli.command {
            Commands::Detect { frames, interval_ms } => {
                assert_eq!(frames, PathBuf::from("frames.jsonl"));
                assert_eq!(interval_ms, 0);
            }
            _ => panic!("expected detect"),
        }
    }

    #[test]
    fn test_bad_vector_does_not_drop_frame() {
        let frame = decode_frame(r#"[[0.1, 0.2], "oops", [0.3, 0.4], null]"#).unwrap();
        assert_eq!(frame.vectors.len(), 2);
        assert_eq!(frame.positions, vec![0, 2]);
        let bad: Vec<_> = frame.unreadable.iter().map(|(p, _)| *p).collect();
        assert_eq!(bad, vec![1, 3]);
        assert_eq!(frame.position(1), 2);
    }

    #[test]
    fn test_non_array_line_is_unreadable() {
        assert!(decode_frame(r#"{"not": "a frame"}"#).is_err());
        assert!(decode_frame("[[0.1,").is_err());
    }

    #[test]
    fn test_empty_frame_decodes() {
        let frame = decode_frame("[]").unwrap();
        assert!(frame.vectors.is_empty());
        assert!(frame.unreadable.is_empty());
    }
}
