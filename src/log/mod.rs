use anyhow::Context;
use fs_err as fs;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::NamedTempFile;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use crate::wire::RefinementRecord;

/// Compact stderr logging. `RUST_LOG` wins over `--debug`.
pub fn init(debug: bool) {
    let fallback = if debug { "info,prompt_refine=debug" } else { "warn,prompt_refine=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug)
        .compact();

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(env_filter).with(layer).try_init();
    tracing::debug!("tracing initialized");
}

fn tx_dir(root: &Path, session: Uuid) -> PathBuf {
    root.join(".refine").join("tx").join(session.to_string())
}

/// Writes every server-confirmed record snapshot of one session to
/// `<root>/.refine/tx/<session>/<seq>.<stage>.json`.
pub struct ArtifactLog {
    dir: PathBuf,
    seq: AtomicU32,
}

impl ArtifactLog {
    pub fn new(root: &Path) -> Self {
        Self::with_session(root, Uuid::new_v4())
    }

    pub fn with_session(root: &Path, session: Uuid) -> Self {
        Self { dir: tx_dir(root, session), seq: AtomicU32::new(0) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_stage(&self, stage: &str, record: &RefinementRecord) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{seq:03}.{stage}.json"));

        let tmp = NamedTempFile::new_in(&self.dir)?;
        fs::write(tmp.path(), to_string_pretty(record)?)?;
        tmp.persist(&path)
            .with_context(|| format!("writing artifact {}", path.display()))?;
        tracing::debug!(path = %path.display(), "artifact saved");
        Ok(path)
    }
}
