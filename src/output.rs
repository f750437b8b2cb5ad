use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::interpreter::ScanSummary;
use crate::session::{SessionInfo, SessionSnapshot};

/// Metadata about a scan session
#[derive(Debug, Clone, Serialize)]
pub struct ScanMetadata {
    pub session_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub command: String,
    pub target: String,
    pub profile: String,
    pub cancelled: bool,
}

impl ScanMetadata {
    pub fn new(session: &SessionInfo, cancelled: bool) -> Self {
        Self {
            session_id: session.id.to_string(),
            start_time: session.started_at,
            end_time: chrono::Utc::now(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
            target: session.target.to_string(),
            profile: session.profile.clone(),
            cancelled,
        }
    }
}

/// Appends event records to `scan-stream.ndjson`, a replayable transcript.
pub struct StreamWriter {
    output_dir: PathBuf,
    file: Option<File>,
}

impl StreamWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            file: None,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.output_dir.join("scan-stream.ndjson")
    }

    /// Append one already-serialized record.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        // Lazy initialize file on first write
        let path = self.path();
        let file = match &mut self.file {
            Some(file) => file,
            slot => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                slot.insert(file)
            }
        };

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Writes final structured JSON results
pub struct JsonWriter {
    output_dir: PathBuf,
}

impl JsonWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub async fn write_results(&self, snapshot: &SessionSnapshot, metadata: &ScanMetadata) -> Result<PathBuf> {
        let path = self.output_dir.join("scan-results.json");

        let total_ports: usize = snapshot.hosts.iter().map(|h| h.ports.len()).sum();
        let output = serde_json::json!({
            "metadata": metadata,
            "summary": {
                "total_hosts": snapshot.hosts.len(),
                "total_ports": total_ports,
                "total_actions": snapshot.action_results.len(),
            },
            "hosts": snapshot.hosts,
            "action_results": snapshot.action_results,
        });

        let json_string = serde_json::to_string_pretty(&output)?;
        tokio::fs::write(&path, json_string)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(path)
    }
}

/// Writes human-readable Markdown report
pub struct MarkdownWriter {
    output_dir: PathBuf,
}

impl MarkdownWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub async fn write_report(&self, summary: &ScanSummary, metadata: &ScanMetadata) -> Result<PathBuf> {
        let path = self.output_dir.join("scan-report.md");
        tokio::fs::write(&path, render_report(summary, metadata))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

fn render_report(summary: &ScanSummary, metadata: &ScanMetadata) -> String {
    let mut report = String::new();

    report.push_str("# Network Scan Report\n\n");

    report.push_str("## Scan Metadata\n\n");
    report.push_str(&format!("- **Session ID:** `{}`\n", metadata.session_id));
    report.push_str(&format!("- **Target:** `{}`\n", metadata.target));
    report.push_str(&format!("- **Profile:** {}\n", metadata.profile));
    report.push_str(&format!(
        "- **Start Time:** {}\n",
        metadata.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!(
        "- **End Time:** {}\n",
        metadata.end_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("- **Command:** `{}`\n", metadata.command));
    if metadata.cancelled {
        report.push_str("- **Interrupted:** yes\n");
    }
    report.push('\n');

    report.push_str(&summary.to_markdown());
    report
}

pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating output directory {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanProfile;
    use crate::models::Phase;
    use crate::session::{EventRecord, ScanEvent};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("phasescan-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_stream_file_replays_line_for_line() {
        let dir = scratch_dir("stream");
        let mut writer = StreamWriter::new(dir.clone());
        let record = EventRecord {
            seq: 0,
            timestamp: chrono::Utc::now(),
            phase: Phase::Discovery,
            event: ScanEvent::PhaseStarted { targets: 1 },
        };

        let line = record.to_line().unwrap();
        writer.write_line(&line).await.unwrap();
        writer.write_line(&line).await.unwrap();

        let text = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(EventRecord::from_line(lines[1]).unwrap(), record);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_report_files_carry_metadata() {
        let dir = scratch_dir("report");
        let session = SessionInfo::new("10.0.0.0/24".parse().unwrap(), ScanProfile::Fast);
        let metadata = ScanMetadata::new(&session, false);

        let json_path = JsonWriter::new(dir.clone())
            .write_results(&SessionSnapshot::default(), &metadata)
            .await
            .unwrap();
        let md_path = MarkdownWriter::new(dir.clone())
            .write_report(&ScanSummary::default(), &metadata)
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(json["metadata"]["profile"], "fast");
        assert_eq!(json["summary"]["total_hosts"], 0);

        let md = std::fs::read_to_string(md_path).unwrap();
        assert!(md.contains(&session.id.to_string()));
        assert!(md.contains("0 active hosts found"));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
