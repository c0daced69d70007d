//! Face detector and embedder backed by an external program.
//!
//! The program is invoked once per item and prints JSON on stdout:
//!
//! - `<command...> detect <photo>` prints
//!   `{"faces": [{"top": 10, "right": 90, "bottom": 110, "left": 12}], "date": "2021-06-01"}`.
//!   `date` is optional.
//! - `<command...> embed <photo> <top> <right> <bottom> <left>` prints a
//!   JSON array of numbers.
//!
//! A non-zero exit status fails that item only.

use std::path::Path;
use std::process::Command;

use chrono::NaiveDate;
use serde::Deserialize;

use famface_catalog::BoundingBox;
use famface_pipeline::{Detection, FaceDetector, FaceEmbedder, OracleError};

pub struct ExecOracle {
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct DetectReply {
    #[serde(default)]
    faces: Vec<BoundingBox>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

impl ExecOracle {
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let Some((program, args)) = command.split_first() else {
            anyhow::bail!("no oracle command configured, set oracle.command in the config file");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command(&self, verb: &str, photo: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(verb).arg(photo);
        cmd
    }

    fn output(&self, mut cmd: Command) -> Result<Vec<u8>, OracleError> {
        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl FaceDetector for ExecOracle {
    fn detect(&self, photo: &Path) -> Result<Detection, OracleError> {
        let stdout = self.output(self.command("detect", photo))?;
        parse_detection(&stdout)
    }
}

impl FaceEmbedder for ExecOracle {
    fn embed(&self, photo: &Path, face: &BoundingBox) -> Result<Vec<f32>, OracleError> {
        let mut cmd = self.command("embed", photo);
        for v in [face.top, face.right, face.bottom, face.left] {
            cmd.arg(v.to_string());
        }
        let stdout = self.output(cmd)?;
        parse_embedding(&stdout)
    }
}

fn parse_detection(stdout: &[u8]) -> Result<Detection, OracleError> {
    let reply: DetectReply = serde_json::from_slice(stdout)
        .map_err(|e| OracleError::Failed(format!("bad detect output: {e}")))?;
    Ok(Detection {
        faces: reply.faces,
        date: reply.date,
    })
}

fn parse_embedding(stdout: &[u8]) -> Result<Vec<f32>, OracleError> {
    let vector: Vec<f32> = serde_json::from_slice(stdout)
        .map_err(|e| OracleError::Failed(format!("bad embed output: {e}")))?;
    if vector.is_empty() {
        return Err(OracleError::Failed("empty embedding".into()));
    }
    Ok(vector)
}
