use chrono::Utc;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tpms_protocol::eavesdrop::Observation;
use tpms_protocol::{Rejection, SensorReport};

type Writer = Arc<Mutex<BufWriter<fs::File>>>;

/// Append-only log file, opened on first write. A header is written only when
/// the file did not exist yet.
pub struct LogFile {
    path: PathBuf,
    header: Option<&'static str>,
    cell: OnceCell<Writer>,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, header: Option<&'static str>) -> Self {
        Self {
            path: path.into(),
            header,
            cell: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn get_file(&self) -> io::Result<Writer> {
        let arc = self
            .cell
            .get_or_try_init(|| async {
                if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir).await?;
                }
                let fresh = !fs::try_exists(&self.path).await.unwrap_or(false);
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                let mut writer = BufWriter::new(f);
                if let (true, Some(header)) = (fresh, self.header) {
                    writer.write_all(header.as_bytes()).await?;
                    writer.flush().await?;
                }
                Ok::<_, io::Error>(Arc::new(Mutex::new(writer)))
            })
            .await?;
        Ok(arc.clone())
    }

    pub async fn append(&self, line: &str) -> io::Result<()> {
        let file = self.get_file().await?;
        let mut f = file.lock().await;
        f.write_all(line.as_bytes()).await?;
        f.flush().await
    }
}

// ================================ Receiver ==================================

/// reports.csv + rejections.csv under one directory.
pub struct ReceiverLogs {
    reports: LogFile,
    rejections: LogFile,
}

impl ReceiverLogs {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            reports: LogFile::new(
                dir.join("reports.csv"),
                Some("ts,sensor,position,pressure_psi,flags,authenticated,crc_valid,low_pressure\n"),
            ),
            rejections: LogFile::new(dir.join("rejections.csv"), Some("ts,reason,len\n")),
        }
    }

    /// reports.csv: ts,sensor,position,pressure_psi,flags,authenticated,crc_valid,low_pressure
    pub async fn log_report(&self, r: &SensorReport, low_pressure: bool) -> io::Result<()> {
        let ts = Utc::now().to_rfc3339();
        let crc = r.crc_valid.map(|v| v.to_string()).unwrap_or_default();
        let line = format!(
            "{ts},{},{},{:.3},{},{},{crc},{low_pressure}\n",
            r.sensor_id,
            r.position.as_deref().unwrap_or(""),
            r.pressure_display(),
            r.flags,
            r.authenticated,
        );
        self.reports.append(&line).await
    }

    /// rejections.csv: ts,reason,len
    pub async fn log_rejection(&self, rejection: &Rejection, len: usize) -> io::Result<()> {
        let ts = Utc::now().to_rfc3339();
        let line = format!("{ts},{},{len}\n", rejection.label());
        self.rejections.append(&line).await
    }
}

// ============================== Interceptions ===============================

#[derive(Serialize)]
struct Interception<'a> {
    ts: String,
    #[serde(flatten)]
    observation: &'a Observation,
    tracking_possible: bool,
    /// Sightings of this sensor so far; absent for encrypted traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    total_sightings: Option<usize>,
}

/// One JSON object per line.
pub async fn log_interception(
    log: &LogFile,
    observation: &Observation,
    total_sightings: Option<usize>,
) -> io::Result<()> {
    let record = Interception {
        ts: Utc::now().to_rfc3339(),
        observation,
        tracking_possible: observation.tracking_possible(),
        total_sightings,
    };
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');
    log.append(&line).await
}
