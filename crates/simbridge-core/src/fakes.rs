//! In-process engine fakes for tests.
//!
//! [`ScriptedEngine`] never spawns a process. It records each invocation and
//! runs a closure that may write files into the invocation's output
//! directory, standing in for the real engine's side effects.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{EngineInvocation, EngineOutcome, EngineRunner};
use crate::error::PipelineResult;

type Script = Box<dyn Fn(&EngineInvocation) -> PipelineResult<EngineOutcome> + Send + Sync>;

/// Engine stand-in driven by a closure.
pub struct ScriptedEngine {
    script: Script,
    calls: Mutex<Vec<EngineInvocation>>,
}

impl ScriptedEngine {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&EngineInvocation) -> PipelineResult<EngineOutcome> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Exits zero after writing `files` (name, contents) into the output directory.
    pub fn writing(files: &[(&str, &str)]) -> Self {
        let files: Vec<(String, String)> = files
            .iter()
            .map(|(n, c)| (n.to_string(), c.to_string()))
            .collect();
        Self::new(move |inv| {
            write_outputs(inv, &files)?;
            Ok(EngineOutcome::succeeded("done"))
        })
    }

    /// Exits non-zero without writing anything.
    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        let stderr = stderr.to_string();
        Self::new(move |_| Ok(EngineOutcome::failed(exit_code, stderr.clone())))
    }

    /// Every invocation seen so far, in order.
    pub fn invocations(&self) -> Vec<EngineInvocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EngineRunner for ScriptedEngine {
    async fn run(&self, invocation: &EngineInvocation) -> PipelineResult<EngineOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        (self.script)(invocation)
    }
}

/// Write `files` into the invocation's output directory.
pub fn write_outputs(inv: &EngineInvocation, files: &[(String, String)]) -> std::io::Result<()> {
    let dir = inv.out_dir().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invocation has no output dir")
    })?;
    std::fs::create_dir_all(&dir)?;
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents)?;
    }
    Ok(())
}

/// Minimal successful analysis output: sentinel plus run files.
pub fn analysis_files(runs: usize, body: &str) -> Vec<(String, String)> {
    let mut files = vec![("statistics.txt".to_string(), "runs completed".to_string())];
    for i in 1..=runs {
        files.push((format!("run-{i}.tsd"), body.to_string()));
    }
    files
}

/// Whether `inv` is a conversion run (uses the converter's `-oDir` flag).
pub fn is_conversion(inv: &EngineInvocation) -> bool {
    inv.args.iter().any(|a| a == crate::engine::CONVERSION_OUT_DIR_FLAG)
}

